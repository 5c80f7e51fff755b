use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use weave_core::error::DispatchError;
use weave_core::report::panic_message;
use weave_core::{Event, InstanceInfo, TreeUpdate, ViewTree, WidgetNode};
use weave_runtime_tokio::TokioRuntime;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::queue::EventQueue;
use crate::signal::SignalHub;
use crate::store::SessionStore;
use crate::transport::{ClientMessage, ClientSink};

/// Identifier of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Metadata of a session, registered as a service so views can read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub connection_id: ConnectionId,
    pub machine_id: String,
    pub app_id: String,
    /// The session that owns navigation for this one, if any.
    pub parent_id: Option<ConnectionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    Created,
    Active,
    Disposed,
}

pub(crate) enum Command {
    Render,
    Events,
    Flush(oneshot::Sender<()>),
    Close,
}

/// Release actions run when the session is disposed, newest first.
pub struct Disposables {
    items: Mutex<Option<Vec<Box<dyn FnOnce() + Send>>>>,
}

impl Disposables {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Some(Vec::new())),
        }
    }

    /// Registers `release`. Once the bag has been disposed, `release` runs
    /// immediately.
    pub fn track(&self, release: impl FnOnce() + Send + 'static) {
        let mut guard = self.items.lock();
        if let Some(items) = guard.as_mut() {
            items.push(Box::new(release));
            return;
        }
        drop(guard);
        run_release(Box::new(release));
    }

    pub fn len(&self) -> usize {
        self.items.lock().as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dispose(&self) {
        let items = self.items.lock().take();
        for release in items.into_iter().flatten().rev() {
            run_release(release);
        }
    }
}

impl Default for Disposables {
    fn default() -> Self {
        Self::new()
    }
}

fn run_release(release: Box<dyn FnOnce() + Send>) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(release)) {
        log::warn!("session disposable panicked: {}", panic_message(payload));
    }
}

/// Session-scoped service that lets views control their own session.
#[derive(Clone)]
pub struct SessionControl {
    connection_id: ConnectionId,
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionControl {
    pub(crate) fn new(connection_id: ConnectionId, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            connection_id,
            commands,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Asks the render loop to dispose the session. Safe to call from event
    /// handlers and effects.
    pub fn close(&self) {
        if self.commands.send(Command::Close).is_err() {
            log::trace!("session {} already stopped", self.connection_id);
        }
    }
}

/// One live client connection: the view tree it renders, the signals its
/// views listen to and the loop that turns render requests into messages.
pub struct AppSession {
    info: SessionInfo,
    state: Mutex<SessionState>,
    runtime: TokioRuntime,
    tree: Mutex<ViewTree>,
    signals: Arc<SignalHub>,
    disposables: Disposables,
    events: EventQueue,
    sink: Arc<dyn ClientSink>,
    commands: mpsc::UnboundedSender<Command>,
    config: SessionConfig,
    store: Weak<SessionStore>,
    created_at: Instant,
    last_interaction: Mutex<Instant>,
}

pub(crate) struct SessionParts {
    pub info: SessionInfo,
    pub runtime: TokioRuntime,
    pub tree: ViewTree,
    pub signals: Arc<SignalHub>,
    pub sink: Arc<dyn ClientSink>,
    pub commands: mpsc::UnboundedSender<Command>,
    pub config: SessionConfig,
    pub store: Weak<SessionStore>,
}

impl AppSession {
    pub(crate) fn new(parts: SessionParts) -> Self {
        let now = Instant::now();
        Self {
            events: EventQueue::new(parts.config.event_queue_capacity),
            info: parts.info,
            state: Mutex::new(SessionState::Created),
            runtime: parts.runtime,
            tree: Mutex::new(parts.tree),
            signals: parts.signals,
            disposables: Disposables::new(),
            sink: parts.sink,
            commands: parts.commands,
            config: parts.config,
            store: parts.store,
            created_at: now,
            last_interaction: Mutex::new(now),
        }
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.info.connection_id
    }

    pub fn app_id(&self) -> &str {
        &self.info.app_id
    }

    pub fn machine_id(&self) -> &str {
        &self.info.machine_id
    }

    pub fn parent_id(&self) -> Option<ConnectionId> {
        self.info.parent_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == SessionState::Disposed
    }

    pub fn signals(&self) -> &Arc<SignalHub> {
        &self.signals
    }

    pub fn runtime(&self) -> &TokioRuntime {
        &self.runtime
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// A copy of the tree last sent to the client.
    pub fn widget_tree(&self) -> Option<WidgetNode> {
        self.tree.lock().widget_tree().cloned()
    }

    pub fn render_passes(&self) -> u64 {
        self.tree.lock().render_passes()
    }

    pub fn instances(&self) -> Vec<InstanceInfo> {
        self.tree.lock().instances()
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_interaction.lock().elapsed()
    }

    pub fn touch(&self) {
        *self.last_interaction.lock() = Instant::now();
    }

    /// Runs `release` when the session is disposed.
    pub fn track(&self, release: impl FnOnce() + Send + 'static) {
        self.disposables.track(release);
    }

    /// Queues a client event for the render loop.
    pub fn handle_event(&self, event: Event) -> Result<(), SessionError> {
        if self.is_disposed() {
            return Err(SessionError::Disposed(self.connection_id()));
        }
        self.touch();
        log::trace!("event `{}` on {} queued", event.name, event.target);
        if let Some(evicted) = self.events.push(event) {
            log::warn!(
                "session {}: event queue full, dropped `{}` on {}",
                self.connection_id(),
                evicted.name,
                evicted.target
            );
        }
        self.command(Command::Events)
    }

    /// Asks the render loop to dispose this session.
    pub fn close(&self) {
        if self.commands.send(Command::Close).is_err() {
            self.dispose();
        }
    }

    /// Waits until the render loop has processed every command queued
    /// before this call.
    pub async fn flush(&self) -> Result<(), SessionError> {
        let (done, wait) = oneshot::channel();
        self.command(Command::Flush(done))?;
        wait.await
            .map_err(|_| SessionError::Disposed(self.connection_id()))
    }

    fn command(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::Disposed(self.connection_id()))
    }

    /// One render pass: builds the tree and sends the result to the client.
    /// The first successful pass activates the session.
    pub fn render_pass(&self) -> Result<(), SessionError> {
        if self.is_disposed() {
            return Err(SessionError::Disposed(self.connection_id()));
        }
        self.runtime.take_render_request();
        // Sent under the tree lock so messages reach the sink in build order.
        let sent = {
            let mut tree = self.tree.lock();
            let update = tree
                .build()
                .map_err(|_| SessionError::Disposed(self.connection_id()))?;
            self.activate();
            let message = match update {
                TreeUpdate::Initial(root) => ClientMessage::Refresh { tree: root },
                TreeUpdate::Patch(patches) if patches.is_empty() => return Ok(()),
                TreeUpdate::Patch(patches) => ClientMessage::Update { patches },
            };
            self.sink.send(message)
        };
        if let Err(err) = sent {
            log::warn!("session {}: {err}; disposing", self.connection_id());
            self.dispose();
            return Err(err);
        }
        Ok(())
    }

    fn activate(&self) {
        let mut state = self.state.lock();
        if *state == SessionState::Created {
            *state = SessionState::Active;
            log::debug!("session {} [{}] active", self.info.connection_id, self.info.app_id);
        }
    }

    pub(crate) fn drain_events(&self) {
        let events = self.events.drain();
        if events.is_empty() {
            return;
        }
        let tree = self.tree.lock();
        for event in &events {
            match tree.dispatch(event) {
                Ok(()) => {}
                Err(DispatchError::UnknownTarget { widget, event }) => {
                    log::warn!("event `{event}` for widget {widget} not found");
                }
                Err(DispatchError::Disposed) => return,
                // Already reported through the runtime's reporter.
                Err(_) => {}
            }
        }
    }

    /// Tears the session down: unmounts every view, releases signal
    /// receivers and tracked disposables, and leaves the store. Idempotent.
    pub fn dispose(&self) {
        {
            let mut state = self.state.lock();
            if *state == SessionState::Disposed {
                return;
            }
            *state = SessionState::Disposed;
        }
        self.runtime.clear_render_waker();
        self.events.clear();
        self.tree.lock().dispose();
        self.signals.clear();
        self.disposables.dispose();
        if let Some(store) = self.store.upgrade() {
            store.remove(&self.info.connection_id);
        }
        log::debug!(
            "session {} [{}] disposed after {:?}",
            self.info.connection_id,
            self.info.app_id,
            self.age()
        );
    }
}

impl fmt::Debug for AppSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppSession")
            .field("info", &self.info)
            .field("state", &self.state())
            .finish()
    }
}

/// Drives one session until it is disposed or dropped.
pub(crate) async fn run_loop(session: Weak<AppSession>, mut commands: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = commands.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        match command {
            Command::Render => {
                let debounce = session.config.render_debounce();
                if !debounce.is_zero() {
                    tokio::time::sleep(debounce).await;
                }
                if session.is_disposed() {
                    break;
                }
                if let Err(err) = session.render_pass() {
                    log::debug!("render loop stopping: {err}");
                    break;
                }
            }
            Command::Events => session.drain_events(),
            Command::Flush(done) => {
                let _ = done.send(());
            }
            Command::Close => {
                session.dispose();
                break;
            }
        }
        if session.is_disposed() {
            break;
        }
    }
    log::trace!("render loop finished");
}
