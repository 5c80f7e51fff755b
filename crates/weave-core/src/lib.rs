#![doc = r"Core runtime of the weave server-side view framework."]

extern crate self as weave_core;

pub mod collections;
mod context;
pub mod deps;
pub mod diff;
pub mod effect;
pub mod element;
pub mod error;
pub mod hash;
pub mod hooks;
pub mod instance;
pub mod platform;
pub mod report;
pub mod runtime;
pub mod services;
pub mod state;
pub mod tree;
pub mod view;
pub mod widget;

pub use deps::{DepValue, Deps};
pub use diff::{apply_patches, diff, Patch};
pub use effect::{CancelHandle, Cleanup, EffectScope, EffectTrigger};
pub use element::{Element, EventHandler, Key, Widget, TEXT_KIND};
pub use error::{BuildError, DispatchError, EffectError, HookError, PatchError, RenderError};
pub use hooks::{Callback, Dispatch, Ref, RefreshToken, RenderContext};
pub use instance::InstanceId;
pub use platform::RuntimeScheduler;
pub use report::{CollectingReporter, ErrorReporter, Fault, FaultKind, LogReporter, ReporterPipeline};
pub use runtime::{ManualScheduler, Runtime, RuntimeBuilder, RuntimeHandle};
pub use services::ServiceContainer;
pub use state::State;
pub use tree::{Event, InstanceInfo, TreeUpdate, ViewTree};
pub use view::{view_fn, FnView, View, ViewFactory, ViewRegistry, ViewSpec, ViewType};
pub use widget::{WidgetId, WidgetNode, ERROR_KIND, ROOT_KIND};

#[cfg(test)]
#[path = "tests/hook_tests.rs"]
mod hook_tests;

#[cfg(test)]
#[path = "tests/tree_tests.rs"]
mod tree_tests;

#[cfg(test)]
#[path = "tests/diff_tests.rs"]
mod diff_tests;
