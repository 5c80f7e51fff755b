use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use futures::future::join_all;

use crate::session::{AppSession, ConnectionId};
use crate::signal::{BroadcastScope, Signal};
use crate::store::SessionStore;

/// Resolves broadcast targets against the session store.
#[derive(Clone)]
pub struct SignalRouter {
    store: Weak<SessionStore>,
}

impl SignalRouter {
    pub fn new(store: &Arc<SessionStore>) -> Self {
        Self {
            store: Arc::downgrade(store),
        }
    }

    /// A sender for `S` scoped by [`Signal::SCOPE`].
    pub fn create_sender<S: Signal>(&self, origin: ConnectionId) -> SignalSender<S> {
        self.create_sender_with_scope(S::SCOPE, origin)
    }

    pub fn create_sender_with_scope<S: Signal>(
        &self,
        scope: BroadcastScope,
        origin: ConnectionId,
    ) -> SignalSender<S> {
        SignalSender {
            router: self.clone(),
            scope,
            origin,
            _signal: PhantomData,
        }
    }

    /// Live sessions a signal from `origin` reaches. An unknown or disposed
    /// origin reaches nobody.
    pub fn targets(&self, scope: BroadcastScope, origin: &ConnectionId) -> Vec<Arc<AppSession>> {
        let Some(store) = self.store.upgrade() else {
            return Vec::new();
        };
        let Some(origin) = store.get_live(origin) else {
            log::debug!("signal origin {origin} not found");
            return Vec::new();
        };
        match scope {
            BroadcastScope::Session => vec![origin],
            BroadcastScope::Server => store.live_sessions(),
            BroadcastScope::Machine => store
                .live_sessions()
                .into_iter()
                .filter(|session| session.machine_id() == origin.machine_id())
                .collect(),
            BroadcastScope::App => store
                .live_sessions()
                .into_iter()
                .filter(|session| session.app_id() == origin.app_id())
                .collect(),
            BroadcastScope::Chrome => store.find_chrome(&origin).into_iter().collect(),
        }
    }
}

impl fmt::Debug for SignalRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalRouter")
            .field("store_alive", &(self.store.strong_count() > 0))
            .finish()
    }
}

/// Sends `S` from one session to every session its scope reaches.
pub struct SignalSender<S> {
    router: SignalRouter,
    scope: BroadcastScope,
    origin: ConnectionId,
    _signal: PhantomData<fn() -> S>,
}

impl<S> Clone for SignalSender<S> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
            scope: self.scope,
            origin: self.origin,
            _signal: PhantomData,
        }
    }
}

impl<S: Signal> SignalSender<S> {
    pub fn scope(&self) -> BroadcastScope {
        self.scope
    }

    pub fn origin(&self) -> ConnectionId {
        self.origin
    }

    /// Delivers `input` to every receiver of every target session,
    /// concurrently, and collects their outputs.
    pub async fn send(&self, input: S::Input) -> Vec<S::Output> {
        let targets = self.router.targets(self.scope, &self.origin);
        log::trace!(
            "signal {} from {} to {} session(s)",
            std::any::type_name::<S>(),
            self.origin,
            targets.len()
        );
        let deliveries = targets.iter().map(|session| {
            let input = input.clone();
            async move { session.signals().deliver::<S>(input).await }
        });
        join_all(deliveries).await.into_iter().flatten().collect()
    }
}

impl<S> fmt::Debug for SignalSender<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalSender")
            .field("signal", &std::any::type_name::<S>())
            .field("scope", &self.scope)
            .field("origin", &self.origin)
            .finish()
    }
}
