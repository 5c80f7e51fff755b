use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::session::{AppSession, ConnectionId};

/// Live sessions by connection id. Shared by the host, the signal router
/// and any transport endpoint that needs to find a session.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<ConnectionId, Arc<AppSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<AppSession>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// A session that is registered and not disposed.
    pub fn get_live(&self, id: &ConnectionId) -> Option<Arc<AppSession>> {
        self.get(id).filter(|session| !session.is_disposed())
    }

    pub fn insert(&self, session: Arc<AppSession>) -> Option<Arc<AppSession>> {
        self.sessions.insert(session.connection_id(), session)
    }

    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<AppSession>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn live_sessions(&self) -> Vec<Arc<AppSession>> {
        self.sessions
            .iter()
            .filter(|entry| !entry.value().is_disposed())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// The session owning navigation for `session`: its parent when it has
    /// one, otherwise the session itself.
    pub fn find_chrome(&self, session: &AppSession) -> Option<Arc<AppSession>> {
        let id = session.parent_id().unwrap_or_else(|| session.connection_id());
        self.get_live(&id)
    }

    /// Disposes every session idle for at least `timeout`.
    pub fn reap_idle(&self, timeout: Duration) -> usize {
        let idle: Vec<_> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for() >= timeout)
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for session in &idle {
            log::debug!("reaping idle session {}", session.connection_id());
            session.dispose();
            self.remove(&session.connection_id());
        }
        idle.len()
    }

    pub fn dispose_all(&self) {
        let sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for session in sessions {
            session.dispose();
        }
        self.sessions.clear();
    }
}
