use thiserror::Error;

use crate::instance::InstanceId;
use crate::widget::WidgetId;

/// Errors raised by hook calls during a render.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    /// The hook call sequence diverged from the one recorded on the first
    /// successful render of the instance.
    #[error("hook order violation in {instance} at hook #{index}: expected {expected}, found {found}")]
    OrderViolation {
        instance: InstanceId,
        index: usize,
        expected: String,
        found: String,
    },
    #[error("no ancestor provides context `{type_name}`")]
    MissingContext { type_name: &'static str },
    #[error("service `{type_name}` is not registered")]
    MissingService { type_name: &'static str },
}

impl HookError {
    pub fn is_order_violation(&self) -> bool {
        matches!(self, HookError::OrderViolation { .. })
    }
}

/// Why a single view instance produced an error node instead of its output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error(transparent)]
    Hook(#[from] HookError),
    #[error("render failed: {0}")]
    Failed(String),
    #[error("render panicked: {0}")]
    Panicked(String),
}

impl RenderError {
    pub(crate) fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast::<HookError>() {
            Ok(hook) => RenderError::Hook(hook),
            Err(other) => RenderError::Failed(format!("{other:#}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffectError {
    #[error("effect failed: {0}")]
    Failed(String),
    #[error("effect panicked: {0}")]
    Panicked(String),
    #[error("effect cleanup panicked: {0}")]
    CleanupPanicked(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("no handler for `{event}` on widget {widget}")]
    UnknownTarget { widget: WidgetId, event: String },
    #[error("event handler failed: {0}")]
    Failed(String),
    #[error("event handler panicked: {0}")]
    Panicked(String),
    #[error("view tree has been disposed")]
    Disposed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("view tree has been disposed")]
    Disposed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("widget {0} not found")]
    MissingNode(WidgetId),
    #[error("index {index} out of range under {parent} ({len} children)")]
    IndexOutOfRange {
        parent: WidgetId,
        index: usize,
        len: usize,
    },
}
