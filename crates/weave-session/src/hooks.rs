use std::sync::Arc;

use weave_core::{Cleanup, EffectTrigger, HookError, Ref, RenderContext};

use crate::router::{SignalRouter, SignalSender};
use crate::session::SessionInfo;
use crate::signal::{Receiver, ReceiverId, Signal, SignalHub};

/// Signal hooks for views running inside a session.
pub trait SignalHooks {
    /// Receives `S` for as long as the view is mounted. The latest
    /// `receiver` passed in is the one invoked.
    fn use_signal<S, F>(&mut self, receiver: F) -> Result<ReceiverId, HookError>
    where
        S: Signal,
        F: Fn(S::Input) -> anyhow::Result<S::Output> + Send + Sync + 'static;

    /// A sender for `S` originating from this view's session.
    fn use_signal_sender<S: Signal>(&mut self) -> Result<SignalSender<S>, HookError>;
}

impl SignalHooks for RenderContext<'_> {
    fn use_signal<S, F>(&mut self, receiver: F) -> Result<ReceiverId, HookError>
    where
        S: Signal,
        F: Fn(S::Input) -> anyhow::Result<S::Output> + Send + Sync + 'static,
    {
        let id = self.use_static(ReceiverId::new)?;
        let latest: Ref<Option<Receiver<S>>> = self.use_ref(|| None)?;
        latest.set(Some(Arc::new(receiver)));
        let hub = self.use_service::<SignalHub>()?;
        self.use_effect(EffectTrigger::OnMount, move |_scope| {
            let subscription = hub.receive::<S, _>(id, move |input| {
                match latest.with(|receiver| receiver.clone()) {
                    Some(receiver) => receiver(input),
                    None => Err(anyhow::anyhow!("receiver {id} is not mounted")),
                }
            });
            Ok(Cleanup::new(move || subscription.cancel()))
        })?;
        Ok(id)
    }

    fn use_signal_sender<S: Signal>(&mut self) -> Result<SignalSender<S>, HookError> {
        let router = self.use_service::<SignalRouter>()?;
        let info = self.use_service::<SessionInfo>()?;
        Ok(router.create_sender::<S>(info.connection_id))
    }
}
