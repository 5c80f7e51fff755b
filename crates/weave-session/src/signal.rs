//! Typed signals delivered to receivers registered by views.
//!
//! Each session owns a [`SignalHub`]: one channel per signal type, each
//! holding the receivers mounted views registered by [`ReceiverId`].
//! Delivery runs every receiver concurrently on the blocking pool and
//! collects what they return; a failing receiver is reported and simply
//! contributes nothing.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use weave_core::{ErrorReporter, Fault, FaultKind};

use crate::session::ConnectionId;

/// Which sessions a signal sent from one session reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BroadcastScope {
    /// Only the sending session.
    Session,
    /// Every live session with the sender's machine id.
    Machine,
    /// Every live session with the sender's app id.
    App,
    /// The session owning the sender's navigation.
    Chrome,
    /// Every live session.
    Server,
}

/// A signal type. Usually derived:
///
/// ```ignore
/// #[derive(Signal)]
/// #[signal(scope = App, input = String, output = bool)]
/// struct Announce;
/// ```
pub trait Signal: Send + Sync + 'static {
    type Input: Clone + Send + Sync + 'static;
    type Output: Send + 'static;
    const SCOPE: BroadcastScope;
}

/// Stable identity of one receiver, usually one per mounted view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiverId(Uuid);

impl ReceiverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReceiverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReceiverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub type Receiver<S> =
    Arc<dyn Fn(<S as Signal>::Input) -> anyhow::Result<<S as Signal>::Output> + Send + Sync>;

trait AnyChannel: Send + Sync {
    fn remove(&self, receiver: &ReceiverId) -> bool;
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
}

struct Channel<S: Signal> {
    receivers: DashMap<ReceiverId, Receiver<S>>,
}

impl<S: Signal> AnyChannel for Channel<S> {
    fn remove(&self, receiver: &ReceiverId) -> bool {
        self.receivers.remove(receiver).is_some()
    }

    fn len(&self) -> usize {
        self.receivers.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Per-session signal channels.
pub struct SignalHub {
    session: ConnectionId,
    channels: DashMap<TypeId, Arc<dyn AnyChannel>>,
    reporter: Arc<dyn ErrorReporter>,
}

impl SignalHub {
    pub fn new(session: ConnectionId, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            session,
            channels: DashMap::new(),
            reporter,
        }
    }

    pub fn session(&self) -> ConnectionId {
        self.session
    }

    /// Registers `receiver` for `S` under `id`, replacing any receiver
    /// already registered under that id. Dropping the subscription removes
    /// it again.
    pub fn receive<S, F>(self: &Arc<Self>, id: ReceiverId, receiver: F) -> Subscription
    where
        S: Signal,
        F: Fn(S::Input) -> anyhow::Result<S::Output> + Send + Sync + 'static,
    {
        let channel = self.channel::<S>();
        if let Some(channel) = channel.as_any().downcast_ref::<Channel<S>>() {
            channel.receivers.insert(id, Arc::new(receiver));
        }
        log::trace!("session {}: receiver {id} for {}", self.session, type_name::<S>());
        Subscription {
            hub: Arc::downgrade(self),
            signal: TypeId::of::<S>(),
            receiver: id,
            active: true,
        }
    }

    fn channel<S: Signal>(&self) -> Arc<dyn AnyChannel> {
        let entry = self.channels.entry(TypeId::of::<S>()).or_insert_with(|| {
            Arc::new(Channel::<S> {
                receivers: DashMap::new(),
            })
        });
        Arc::clone(entry.value())
    }

    pub fn remove(&self, signal: TypeId, receiver: &ReceiverId) -> bool {
        let channel = self.channels.get(&signal).map(|entry| Arc::clone(entry.value()));
        channel.is_some_and(|channel| channel.remove(receiver))
    }

    pub fn receiver_count<S: Signal>(&self) -> usize {
        self.channels
            .get(&TypeId::of::<S>())
            .map_or(0, |entry| entry.value().len())
    }

    pub fn total_receivers(&self) -> usize {
        self.channels.iter().map(|entry| entry.value().len()).sum()
    }

    /// Drops every receiver of every signal.
    pub fn clear(&self) {
        self.channels.clear();
    }

    fn receivers<S: Signal>(&self) -> Vec<(ReceiverId, Receiver<S>)> {
        let Some(channel) = self
            .channels
            .get(&TypeId::of::<S>())
            .map(|entry| Arc::clone(entry.value()))
        else {
            return Vec::new();
        };
        channel
            .as_any()
            .downcast_ref::<Channel<S>>()
            .map(|channel| {
                channel
                    .receivers
                    .iter()
                    .map(|entry| (*entry.key(), Arc::clone(entry.value())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Runs every receiver of `S` in this session concurrently and returns
    /// the outputs of those that succeeded.
    pub async fn deliver<S: Signal>(&self, input: S::Input) -> Vec<S::Output> {
        let receivers = self.receivers::<S>();
        if receivers.is_empty() {
            return Vec::new();
        }
        let runs = receivers.into_iter().map(|(id, receiver)| {
            let input = input.clone();
            async move {
                let result = tokio::task::spawn_blocking(move || receiver(input)).await;
                (id, result)
            }
        });
        let mut outputs = Vec::new();
        for (id, result) in join_all(runs).await {
            let message = match result {
                Ok(Ok(output)) => {
                    outputs.push(output);
                    continue;
                }
                Ok(Err(err)) => format!("{err:#}"),
                Err(join) if join.is_panic() => "receiver panicked".to_string(),
                Err(join) => join.to_string(),
            };
            self.reporter.report(&Fault::new(
                FaultKind::SignalReceiverFailure,
                format!(
                    "{} receiver {id} in session {}: {message}",
                    type_name::<S>(),
                    self.session
                ),
            ));
        }
        outputs
    }
}

impl fmt::Debug for SignalHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalHub")
            .field("session", &self.session)
            .field("channels", &self.channels.len())
            .field("receivers", &self.total_receivers())
            .finish()
    }
}

/// Keeps a receiver registered until dropped or cancelled.
#[must_use = "dropping a subscription removes the receiver"]
pub struct Subscription {
    hub: Weak<SignalHub>,
    signal: TypeId,
    receiver: ReceiverId,
    active: bool,
}

impl Subscription {
    pub fn receiver(&self) -> ReceiverId {
        self.receiver
    }

    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.signal, &self.receiver);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("receiver", &self.receiver)
            .field("active", &self.active)
            .finish()
    }
}
