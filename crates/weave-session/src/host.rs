use std::sync::Arc;

use tokio::sync::mpsc;

use weave_core::{ErrorReporter, LogReporter, RuntimeBuilder, ViewRegistry, ViewTree};
use weave_runtime_tokio::{TokioRuntime, TokioScheduler};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::router::SignalRouter;
use crate::session::{
    run_loop, AppSession, Command, ConnectionId, SessionControl, SessionInfo, SessionParts,
};
use crate::signal::SignalHub;
use crate::store::SessionStore;
use crate::transport::ClientSink;

type ServiceInstaller = Arc<dyn Fn(RuntimeBuilder) -> RuntimeBuilder + Send + Sync>;

/// What a client asks for when it connects.
#[derive(Debug, Clone, Default)]
pub struct ConnectRequest {
    /// Defaults to the registry's default app.
    pub app_id: Option<String>,
    pub machine_id: String,
    pub parent_id: Option<ConnectionId>,
}

impl ConnectRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn app(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn machine(mut self, machine_id: impl Into<String>) -> Self {
        self.machine_id = machine_id.into();
        self
    }

    pub fn parent(mut self, parent_id: ConnectionId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// Creates sessions for incoming connections.
pub struct SessionHost {
    registry: Arc<ViewRegistry>,
    store: Arc<SessionStore>,
    config: SessionConfig,
    reporter: Arc<dyn ErrorReporter>,
    services: Vec<ServiceInstaller>,
}

impl SessionHost {
    pub fn new(registry: ViewRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            store: Arc::new(SessionStore::new()),
            config: SessionConfig::default(),
            reporter: Arc::new(LogReporter),
            services: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Registers `service` with every session created from now on.
    pub fn with_service<T: Send + Sync + 'static>(mut self, service: Arc<T>) -> Self {
        self.services
            .push(Arc::new(move |builder: RuntimeBuilder| builder.service_arc(service.clone())));
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn router(&self) -> SignalRouter {
        SignalRouter::new(&self.store)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &ViewRegistry {
        &self.registry
    }

    /// Creates a session, renders it once and sends the initial tree to
    /// `sink`. Must be called from within a tokio runtime.
    pub fn connect(
        &self,
        request: ConnectRequest,
        sink: Arc<dyn ClientSink>,
    ) -> Result<Arc<AppSession>, SessionError> {
        let app_id = request
            .app_id
            .or_else(|| self.registry.default_app().map(str::to_string))
            .ok_or_else(|| SessionError::UnknownApp(String::new()))?;
        let root = self
            .registry
            .create(&app_id)
            .ok_or_else(|| SessionError::UnknownApp(app_id.clone()))?;

        let info = SessionInfo {
            connection_id: ConnectionId::new(),
            machine_id: request.machine_id,
            app_id,
            parent_id: request.parent_id,
        };
        let id = info.connection_id;
        let scheduler = Arc::new(TokioScheduler::current()?);
        let signals = Arc::new(SignalHub::new(id, self.reporter.clone()));
        let (commands, receiver) = mpsc::unbounded_channel();

        let runtime = TokioRuntime::with_scheduler(scheduler, |builder| {
            let builder = builder
                .reporter(self.reporter.clone())
                .service(info.clone())
                .service_arc(signals.clone())
                .service(self.router())
                .service(SessionControl::new(id, commands.clone()));
            self.services
                .iter()
                .fold(builder, |builder, install| install(builder))
        });
        let waker = commands.clone();
        runtime.set_render_waker(move || {
            let _ = waker.send(Command::Render);
        });

        let tree = ViewTree::new(root, runtime.runtime());
        let session = Arc::new(AppSession::new(SessionParts {
            info,
            runtime,
            tree,
            signals,
            sink,
            commands,
            config: self.config.clone(),
            store: Arc::downgrade(&self.store),
        }));
        self.store.insert(session.clone());
        log::debug!("session {id} [{}] created", session.app_id());
        tokio::spawn(run_loop(Arc::downgrade(&session), receiver));

        if let Err(err) = session.render_pass() {
            session.dispose();
            return Err(err);
        }
        Ok(session)
    }

    /// Disposes the session for a closed connection.
    pub fn disconnect(&self, id: &ConnectionId) -> bool {
        match self.store.remove(id) {
            Some(session) => {
                session.dispose();
                true
            }
            None => false,
        }
    }

    /// Disposes sessions idle for longer than the configured timeout.
    pub fn reap_idle(&self) -> usize {
        self.config
            .idle_timeout()
            .map_or(0, |timeout| self.store.reap_idle(timeout))
    }

    pub fn shutdown(&self) {
        self.store.dispose_all();
    }
}
