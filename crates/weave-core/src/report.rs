//! Fault reporting.
//!
//! Failures that are isolated by the runtime (a failing render, a panicking
//! effect, a broken signal receiver) are turned into [`Fault`] values and
//! handed to an [`ErrorReporter`]. The default reporter logs them.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{EffectError, RenderError};
use crate::instance::InstanceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FaultKind {
    HookOrderViolation,
    MissingContext,
    RenderFailure,
    EffectFailure,
    SignalReceiverFailure,
    EventHandlerFailure,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::HookOrderViolation => "hook-order-violation",
            FaultKind::MissingContext => "missing-context",
            FaultKind::RenderFailure => "render-failure",
            FaultKind::EffectFailure => "effect-failure",
            FaultKind::SignalReceiverFailure => "signal-receiver-failure",
            FaultKind::EventHandlerFailure => "event-handler-failure",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub instance: Option<InstanceId>,
    pub view: Option<String>,
    pub message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            instance: None,
            view: None,
            message: message.into(),
        }
    }

    pub fn with_instance(mut self, instance: InstanceId, view: &str) -> Self {
        self.instance = Some(instance);
        self.view = Some(view.to_string());
        self
    }

    pub(crate) fn from_render(error: &RenderError) -> Self {
        let kind = match error {
            RenderError::Hook(hook) if hook.is_order_violation() => FaultKind::HookOrderViolation,
            RenderError::Hook(crate::error::HookError::MissingContext { .. }) => {
                FaultKind::MissingContext
            }
            _ => FaultKind::RenderFailure,
        };
        Fault::new(kind, error.to_string())
    }

    pub(crate) fn from_effect(error: &EffectError) -> Self {
        Fault::new(FaultKind::EffectFailure, error.to_string())
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.view, self.instance) {
            (Some(view), Some(instance)) => {
                write!(f, "[{}] {view} ({instance}): {}", self.kind, self.message)
            }
            _ => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

/// Receives faults isolated by the runtime.
pub trait ErrorReporter: Send + Sync {
    /// Returns `true` when the fault was handled and should not reach later
    /// reporters in a [`ReporterPipeline`].
    fn report(&self, fault: &Fault) -> bool;
}

/// Writes faults to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, fault: &Fault) -> bool {
        match fault.kind {
            FaultKind::HookOrderViolation => log::error!("{fault}"),
            _ => log::warn!("{fault}"),
        }
        true
    }
}

/// Tries reporters in order until one handles the fault.
#[derive(Clone, Default)]
pub struct ReporterPipeline {
    reporters: Vec<Arc<dyn ErrorReporter>>,
}

impl ReporterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn push(&mut self, reporter: Arc<dyn ErrorReporter>) {
        self.reporters.push(reporter);
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}

impl ErrorReporter for ReporterPipeline {
    fn report(&self, fault: &Fault) -> bool {
        self.reporters.iter().any(|reporter| reporter.report(fault))
    }
}

/// Keeps every fault it sees. Useful in tests and for hosts that surface
/// faults in a diagnostics view.
#[derive(Default)]
pub struct CollectingReporter {
    faults: Mutex<Vec<Fault>>,
    handled: bool,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A collector that lets faults continue down a pipeline.
    pub fn passthrough() -> Self {
        Self {
            faults: Mutex::new(Vec::new()),
            handled: false,
        }
    }

    /// A collector that stops a pipeline after recording.
    pub fn terminal() -> Self {
        Self {
            faults: Mutex::new(Vec::new()),
            handled: true,
        }
    }

    pub fn faults(&self) -> Vec<Fault> {
        self.faults.lock().clone()
    }

    pub fn count(&self, kind: FaultKind) -> usize {
        self.faults.lock().iter().filter(|f| f.kind == kind).count()
    }

    pub fn clear(&self) {
        self.faults.lock().clear();
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, fault: &Fault) -> bool {
        self.faults.lock().push(fault.clone());
        self.handled
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
