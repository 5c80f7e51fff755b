use std::panic::{self, AssertUnwindSafe};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collections::map::HashMap;
use crate::diff::{diff, Patch};
use crate::element::EventHandler;
use crate::error::{BuildError, DispatchError};
use crate::instance::{InstanceId, ViewInstance};
use crate::report::{panic_message, Fault, FaultKind};
use crate::runtime::Runtime;
use crate::view::ViewSpec;
use crate::widget::{WidgetId, WidgetNode};

/// A client event addressed to a widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub target: WidgetId,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl Event {
    pub fn new(target: WidgetId, name: impl Into<String>) -> Self {
        Self {
            target,
            name: name.into(),
            args: Value::Null,
        }
    }

    pub fn with_args(mut self, args: impl Into<Value>) -> Self {
        self.args = args.into();
        self
    }
}

/// Result of one build pass.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeUpdate {
    /// First pass: the complete tree.
    Initial(WidgetNode),
    /// Later passes: changes since the previous pass. May be empty.
    Patch(Vec<Patch>),
}

impl TreeUpdate {
    pub fn is_empty(&self) -> bool {
        matches!(self, TreeUpdate::Patch(patches) if patches.is_empty())
    }

    pub fn patches(&self) -> &[Patch] {
        match self {
            TreeUpdate::Patch(patches) => patches,
            TreeUpdate::Initial(_) => &[],
        }
    }
}

/// Summary of one mounted instance, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub id: InstanceId,
    pub name: &'static str,
    pub depth: usize,
    pub render_count: u64,
    pub hooks: usize,
    pub active_effects: usize,
}

/// Owns the root view instance and the last widget tree sent to the client.
pub struct ViewTree {
    runtime: Runtime,
    root_spec: ViewSpec,
    root: Option<ViewInstance>,
    tree: Option<WidgetNode>,
    handlers: HashMap<WidgetId, IndexMap<String, EventHandler>>,
    passes: u64,
    disposed: bool,
}

impl ViewTree {
    pub fn new(root: ViewSpec, runtime: Runtime) -> Self {
        Self {
            runtime,
            root_spec: root,
            root: None,
            tree: None,
            handlers: HashMap::new(),
            passes: 0,
            disposed: false,
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn needs_render(&self) -> bool {
        !self.disposed && (self.tree.is_none() || self.runtime.needs_render())
    }

    pub fn render_passes(&self) -> u64 {
        self.passes
    }

    pub fn widget_tree(&self) -> Option<&WidgetNode> {
        self.tree.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Runs one render pass: renders dirty instances, reconciles children
    /// and returns the resulting tree or patch list.
    pub fn build(&mut self) -> Result<TreeUpdate, BuildError> {
        if self.disposed {
            return Err(BuildError::Disposed);
        }
        self.runtime.take_render_request();
        let handle = self.runtime.handle();
        let root_spec = &self.root_spec;
        let root = self
            .root
            .get_or_insert_with(|| ViewInstance::mount(root_spec.clone(), None, &handle));
        let mut next = WidgetNode::root(root.build("", false));
        let mut handlers = HashMap::new();
        next.assign_ids(None, &mut handlers);
        self.handlers = handlers;
        self.passes += 1;

        let update = match &self.tree {
            None => TreeUpdate::Initial(next.clone()),
            Some(previous) => TreeUpdate::Patch(diff(previous, &next)),
        };
        log::debug!(
            "render pass {} produced {}",
            self.passes,
            match &update {
                TreeUpdate::Initial(tree) => format!("initial tree of {} nodes", tree.count()),
                TreeUpdate::Patch(patches) => format!("{} patches", patches.len()),
            }
        );
        self.tree = Some(next);
        Ok(update)
    }

    /// Invokes the handler registered for `event`. Handler failures are
    /// reported and returned; they never unwind into the caller.
    pub fn dispatch(&self, event: &Event) -> Result<(), DispatchError> {
        if self.disposed {
            return Err(DispatchError::Disposed);
        }
        let handler = self
            .handlers
            .get(&event.target)
            .and_then(|handlers| handlers.get(&event.name))
            .cloned()
            .ok_or_else(|| DispatchError::UnknownTarget {
                widget: event.target.clone(),
                event: event.name.clone(),
            })?;
        let error = match panic::catch_unwind(AssertUnwindSafe(|| handler(&event.args))) {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) => DispatchError::Failed(format!("{err:#}")),
            Err(payload) => DispatchError::Panicked(panic_message(payload)),
        };
        self.runtime.report(Fault::new(
            FaultKind::EventHandlerFailure,
            format!("`{}` on {}: {error}", event.name, event.target),
        ));
        Err(error)
    }

    /// Mounted instances in depth-first order.
    pub fn instances(&self) -> Vec<InstanceInfo> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            collect_instances(root, 0, &mut out);
        }
        out
    }

    /// Unmounts every instance. Idempotent.
    pub fn dispose(&mut self) {
        if std::mem::replace(&mut self.disposed, true) {
            return;
        }
        if let Some(root) = self.root.take() {
            root.destroy();
        }
        self.tree = None;
        self.handlers.clear();
        log::debug!("view tree disposed after {} passes", self.passes);
    }
}

impl Drop for ViewTree {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn collect_instances(instance: &ViewInstance, depth: usize, out: &mut Vec<InstanceInfo>) {
    out.push(InstanceInfo {
        id: instance.id(),
        name: instance.name(),
        depth,
        render_count: instance.render_count(),
        hooks: instance.hook_count(),
        active_effects: instance.active_effects(),
    });
    for child in instance.children() {
        collect_instances(child, depth + 1, out);
    }
}
