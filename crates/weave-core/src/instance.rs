use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::context::ContextBindings;
use crate::element::{Element, Key};
use crate::error::RenderError;
use crate::hooks::{HookStore, RenderContext};
use crate::report::{panic_message, Fault, FaultKind};
use crate::runtime::RuntimeHandle;
use crate::view::{View, ViewSpec, ViewType};
use crate::widget::WidgetNode;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(u64);

impl InstanceId {
    fn next() -> Self {
        InstanceId(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view#{}", self.0)
    }
}

/// The part of an instance reachable from state cells, effect tasks and
/// descendants.
pub(crate) struct InstanceShared {
    id: InstanceId,
    name: &'static str,
    parent: Option<Weak<InstanceShared>>,
    runtime: RuntimeHandle,
    dirty: AtomicBool,
    dirty_descendant: AtomicBool,
    force_refresh: AtomicBool,
    alive: AtomicBool,
    pub(crate) contexts: ContextBindings,
}

impl InstanceShared {
    pub(crate) fn id(&self) -> InstanceId {
        self.id
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    pub(crate) fn parent(&self) -> Option<Arc<InstanceShared>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Marks this instance dirty, flags every ancestor and requests a
    /// render pass. No-op after unmount.
    pub(crate) fn invalidate(&self) {
        if !self.alive.load(Ordering::SeqCst) {
            return;
        }
        self.dirty.store(true, Ordering::SeqCst);
        let mut ancestor = self.parent();
        while let Some(instance) = ancestor {
            instance.dirty_descendant.store(true, Ordering::SeqCst);
            ancestor = instance.parent();
        }
        self.runtime.request_render();
    }

    pub(crate) fn force_refresh(&self) {
        if !self.alive.load(Ordering::SeqCst) {
            return;
        }
        self.force_refresh.store(true, Ordering::SeqCst);
        self.invalidate();
    }
}

/// Slot of a child view within its parent's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Slot {
    Key(Key),
    Index(usize),
}

/// Matches a child instance across renders: the list it sits in, its view
/// type, and its explicit key or position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ChildIdentity {
    list: String,
    view_type: ViewType,
    slot: Slot,
}

impl ChildIdentity {
    fn new(list: &str, spec: &ViewSpec, index: usize) -> Self {
        Self {
            list: list.to_string(),
            view_type: spec.view_type,
            slot: match &spec.key {
                Some(key) => Slot::Key(key.clone()),
                None => Slot::Index(index),
            },
        }
    }
}

struct Failure {
    kind: FaultKind,
    message: String,
}

struct CachedOutput {
    prefix: String,
    nodes: Vec<WidgetNode>,
}

/// A mounted view: its hook storage, last output and child instances.
pub(crate) struct ViewInstance {
    shared: Arc<InstanceShared>,
    view: Arc<dyn View>,
    hooks: HookStore,
    children: IndexMap<ChildIdentity, ViewInstance>,
    element: Option<Element>,
    output: Option<CachedOutput>,
    failure: Option<Failure>,
    faulted: bool,
    memo: Option<u64>,
    respecified: bool,
    render_count: u64,
}

pub(crate) struct Reconciled {
    pub(crate) children: IndexMap<ChildIdentity, ViewInstance>,
    pub(crate) removed: Vec<ViewInstance>,
}

/// Matches new child specs against the previous children. Matched
/// instances keep their hooks and receive the new spec when the parent
/// re-rendered; unmatched specs mount fresh instances; leftovers are
/// returned for disposal.
pub(crate) fn reconcile(
    parent: &Arc<InstanceShared>,
    mut previous: IndexMap<ChildIdentity, ViewInstance>,
    specs: Vec<(ChildIdentity, ViewSpec)>,
    parent_rendered: bool,
) -> Reconciled {
    let mut children = IndexMap::with_capacity(specs.len());
    let mut removed = Vec::new();
    for (identity, spec) in specs {
        if children.contains_key(&identity) {
            log::warn!(
                "duplicate child {:?} under {} ({}); only the first is mounted",
                identity,
                parent.name(),
                parent.id()
            );
            continue;
        }
        let child = match previous.shift_remove(&identity) {
            Some(mut existing) => {
                if parent_rendered {
                    existing.respecify(spec);
                }
                existing
            }
            None => ViewInstance::mount(spec, Some(parent), parent.runtime()),
        };
        children.insert(identity, child);
    }
    removed.extend(previous.into_values());
    Reconciled { children, removed }
}

fn item_key(prefix: &str, index: usize, explicit: Option<String>) -> String {
    let segment = explicit.unwrap_or_else(|| index.to_string());
    if prefix.is_empty() {
        segment
    } else {
        format!("{prefix}.{segment}")
    }
}

fn collect_specs(
    element: &Element,
    list: &str,
    index: usize,
    prefix: &str,
    out: &mut Vec<(ChildIdentity, ViewSpec)>,
) {
    match element {
        Element::Empty => {}
        Element::Widget(widget) => {
            let key = item_key(prefix, index, widget.explicit_key().map(|k| format!("#{k}")));
            let list = format!("{list}/{key}");
            for (i, child) in widget.child_elements().iter().enumerate() {
                collect_specs(child, &list, i, "", out);
            }
        }
        Element::Fragment(items) => {
            let key = item_key(prefix, index, None);
            let list = format!("{list}[{index}]");
            for (i, item) in items.iter().enumerate() {
                collect_specs(item, &list, i, &key, out);
            }
        }
        Element::View(spec) => out.push((ChildIdentity::new(list, spec, index), spec.clone())),
    }
}

impl ViewInstance {
    pub(crate) fn mount(spec: ViewSpec, parent: Option<&Arc<InstanceShared>>, runtime: &RuntimeHandle) -> Self {
        let shared = Arc::new(InstanceShared {
            id: InstanceId::next(),
            name: spec.name(),
            parent: parent.map(Arc::downgrade),
            runtime: runtime.clone(),
            dirty: AtomicBool::new(false),
            dirty_descendant: AtomicBool::new(false),
            force_refresh: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            contexts: ContextBindings::default(),
        });
        log::trace!("mount {} ({})", shared.name, shared.id);
        Self {
            shared,
            view: spec.view,
            hooks: HookStore::default(),
            children: IndexMap::new(),
            element: None,
            output: None,
            failure: None,
            faulted: false,
            memo: None,
            respecified: false,
            render_count: 0,
        }
    }

    pub(crate) fn id(&self) -> InstanceId {
        self.shared.id
    }

    pub(crate) fn render_count(&self) -> u64 {
        self.render_count
    }

    pub(crate) fn hook_count(&self) -> usize {
        self.hooks.hook_count()
    }

    pub(crate) fn active_effects(&self) -> usize {
        self.hooks.effects.active_runs()
    }

    pub(crate) fn children(&self) -> impl Iterator<Item = &ViewInstance> {
        self.children.values()
    }

    pub(crate) fn name(&self) -> &'static str {
        self.shared.name
    }

    fn respecify(&mut self, spec: ViewSpec) {
        if !Arc::ptr_eq(&self.view, &spec.view) {
            self.view = spec.view;
            self.respecified = true;
        }
    }

    fn memo_matches(&self) -> bool {
        match (self.memo, self.view.memo_key()) {
            (Some(previous), Some(next)) => previous == next,
            _ => false,
        }
    }

    /// Produces this instance's widget nodes, re-rendering only what changed.
    pub(crate) fn build(&mut self, prefix: &str, force: bool) -> Vec<WidgetNode> {
        let forced = self.shared.force_refresh.swap(false, Ordering::SeqCst) || force;
        let dirty = self.shared.dirty.swap(false, Ordering::SeqCst);
        let descendant = self.shared.dirty_descendant.swap(false, Ordering::SeqCst);
        let respecified = mem::take(&mut self.respecified);

        let should_render = !self.faulted
            && (self.render_count == 0
                || dirty
                || forced
                || (respecified && !self.memo_matches()));

        if !should_render && !descendant && !forced {
            if let Some(cached) = &self.output {
                if cached.prefix == prefix {
                    return cached.nodes.clone();
                }
            }
        }

        if should_render {
            self.render();
        }

        let nodes = match &self.failure {
            Some(failure) => {
                let node = WidgetNode::error(
                    item_key(prefix, 0, None),
                    self.shared.name,
                    &failure.kind.to_string(),
                    &failure.message,
                );
                self.unmount_children();
                vec![node]
            }
            None => self.expand(prefix, should_render, forced),
        };
        self.output = Some(CachedOutput {
            prefix: prefix.to_string(),
            nodes: nodes.clone(),
        });
        nodes
    }

    fn render(&mut self) {
        let shared = self.shared.clone();
        let view = self.view.clone();
        let outcome = {
            let mut cx = RenderContext::begin(&shared, &mut self.hooks);
            let result = panic::catch_unwind(AssertUnwindSafe(|| view.render(&mut cx)));
            match result {
                Ok(Ok(element)) => cx.finish().map(|pending| (element, pending)).map_err(RenderError::Hook),
                Ok(Err(err)) => Err(match cx.take_violation() {
                    Some(violation) => RenderError::Hook(violation),
                    None => RenderError::from_anyhow(err),
                }),
                Err(payload) => Err(match cx.take_violation() {
                    Some(violation) => RenderError::Hook(violation),
                    None => RenderError::Panicked(panic_message(payload)),
                }),
            }
        };
        self.render_count += 1;
        match outcome {
            Ok((element, pending)) => {
                log::trace!("rendered {} ({})", shared.name, shared.id);
                self.element = Some(element);
                self.failure = None;
                self.memo = view.memo_key();
                self.hooks.effects.commit(pending, shared.id, shared.name, &shared.runtime);
            }
            Err(error) => {
                let fault = Fault::from_render(&error).with_instance(shared.id, shared.name);
                if fault.kind == FaultKind::HookOrderViolation {
                    self.faulted = true;
                }
                self.failure = Some(Failure {
                    kind: fault.kind,
                    message: error.to_string(),
                });
                shared.runtime.report(fault);
            }
        }
    }

    fn expand(&mut self, prefix: &str, rendered: bool, force: bool) -> Vec<WidgetNode> {
        let Some(element) = self.element.take() else {
            return Vec::new();
        };
        let mut specs = Vec::new();
        collect_specs(&element, "", 0, prefix, &mut specs);
        let previous = mem::take(&mut self.children);
        let reconciled = reconcile(&self.shared, previous, specs, rendered);
        self.children = reconciled.children;
        for removed in reconciled.removed {
            removed.destroy();
        }
        let mut nodes = Vec::new();
        self.expand_element(&element, "", 0, prefix, force, &mut nodes);
        self.element = Some(element);
        nodes
    }

    fn expand_element(
        &mut self,
        element: &Element,
        list: &str,
        index: usize,
        prefix: &str,
        force: bool,
        out: &mut Vec<WidgetNode>,
    ) {
        match element {
            Element::Empty => {}
            Element::Widget(widget) => {
                let key = item_key(prefix, index, widget.explicit_key().map(|k| format!("#{k}")));
                let child_list = format!("{list}/{key}");
                let mut children = Vec::new();
                for (i, child) in widget.child_elements().iter().enumerate() {
                    self.expand_element(child, &child_list, i, "", force, &mut children);
                }
                out.push(WidgetNode::from_widget(widget, key, children));
            }
            Element::Fragment(items) => {
                let key = item_key(prefix, index, None);
                let fragment_list = format!("{list}[{index}]");
                for (i, item) in items.iter().enumerate() {
                    self.expand_element(item, &fragment_list, i, &key, force, out);
                }
            }
            Element::View(spec) => {
                let identity = ChildIdentity::new(list, spec, index);
                let key = item_key(prefix, index, spec.key.as_ref().map(|k| format!("@{k}")));
                if let Some(child) = self.children.get_mut(&identity) {
                    out.extend(child.build(&key, force));
                }
            }
        }
    }

    /// An error node has no child positions, so nothing below it stays mounted.
    fn unmount_children(&mut self) {
        self.element = None;
        for (_, child) in mem::take(&mut self.children) {
            child.destroy();
        }
    }

    /// Unmounts this instance and its subtree. Every pending cleanup runs
    /// exactly once; later state writes are ignored.
    pub(crate) fn destroy(mut self) {
        self.shared.alive.store(false, Ordering::SeqCst);
        self.unmount_children();
        self.hooks.effects.dispose(self.shared.id, &self.shared.runtime);
        self.shared.contexts.clear();
        log::trace!("unmount {} ({})", self.shared.name, self.shared.id);
    }
}
