use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const EVENT_QUEUE_CAPACITY_VAR: &str = "WEAVE_EVENT_QUEUE_CAPACITY";
pub const RENDER_DEBOUNCE_VAR: &str = "WEAVE_RENDER_DEBOUNCE_MS";
pub const IDLE_TIMEOUT_VAR: &str = "WEAVE_IDLE_TIMEOUT_SECS";

/// Per-session tuning shared by every session a host creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inbound events buffered per session. When full, the oldest event is
    /// dropped.
    pub event_queue_capacity: usize,
    /// Delay between a render request and the render pass it triggers.
    pub render_debounce_ms: u64,
    /// Sessions idle for longer than this are disposed by
    /// [`crate::SessionStore::reap_idle`].
    pub idle_timeout_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: 1024,
            render_debounce_ms: 0,
            idle_timeout_secs: None,
        }
    }
}

impl SessionConfig {
    /// Defaults overlaid with the `WEAVE_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    /// Overlays values found through `lookup`. Unparseable values are
    /// logged and ignored.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(capacity) = parse_var::<usize>(&lookup, EVENT_QUEUE_CAPACITY_VAR) {
            self.event_queue_capacity = capacity;
        }
        if let Some(debounce) = parse_var::<u64>(&lookup, RENDER_DEBOUNCE_VAR) {
            self.render_debounce_ms = debounce;
        }
        if let Some(timeout) = parse_var::<u64>(&lookup, IDLE_TIMEOUT_VAR) {
            self.idle_timeout_secs = Some(timeout);
        }
        self
    }

    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    pub fn with_render_debounce(mut self, debounce: Duration) -> Self {
        self.render_debounce_ms = debounce.as_millis() as u64;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_secs = Some(timeout.as_secs());
        self
    }

    pub fn render_debounce(&self) -> Duration {
        Duration::from_millis(self.render_debounce_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("ignoring {name}={raw:?}: not a valid number");
            None
        }
    }
}
