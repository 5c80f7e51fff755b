use std::sync::Arc;

use weave_core::{
    BuildError, CollectingReporter, DispatchError, Event, Fault, FaultKind, InstanceInfo,
    ManualScheduler, Runtime, RuntimeBuilder, TreeUpdate, View, ViewSpec, ViewTree, WidgetId,
    WidgetNode,
};

/// Upper bound on render/effect rounds in [`TestHarness::settle`].
const MAX_SETTLE_ROUNDS: usize = 64;

/// Headless harness for exercising view trees in tests.
///
/// `TestHarness` owns a [`ManualScheduler`], so effect tasks only run when
/// the test asks for it, and a [`CollectingReporter`] that records every
/// isolated fault for later assertions.
pub struct TestHarness {
    tree: ViewTree,
    scheduler: Arc<ManualScheduler>,
    reporter: Arc<CollectingReporter>,
    updates: Vec<TreeUpdate>,
}

impl TestHarness {
    /// Mount `view` as the root and perform the initial render.
    pub fn new(view: impl View) -> Self {
        Self::with_spec(ViewSpec::new(view), |builder| builder)
    }

    /// Like [`TestHarness::new`], with access to the runtime builder for
    /// registering services.
    pub fn with_runtime(
        view: impl View,
        configure: impl FnOnce(RuntimeBuilder) -> RuntimeBuilder,
    ) -> Self {
        Self::with_spec(ViewSpec::new(view), configure)
    }

    pub fn with_spec(
        spec: ViewSpec,
        configure: impl FnOnce(RuntimeBuilder) -> RuntimeBuilder,
    ) -> Self {
        let scheduler = Arc::new(ManualScheduler::new());
        let reporter = Arc::new(CollectingReporter::terminal());
        let runtime =
            configure(Runtime::builder(scheduler.clone()).reporter(reporter.clone())).build();
        let mut harness = Self {
            tree: ViewTree::new(spec, runtime),
            scheduler,
            reporter,
            updates: Vec::new(),
        };
        harness.render();
        harness
    }

    /// Run one render pass and record its update.
    pub fn render(&mut self) -> &TreeUpdate {
        match self.tree.build() {
            Ok(update) => {
                self.updates.push(update);
            }
            Err(BuildError::Disposed) => {
                self.updates.push(TreeUpdate::Patch(Vec::new()));
            }
        }
        &self.updates[self.updates.len() - 1]
    }

    /// Poll spawned effect tasks until they stall. Returns how many finished.
    pub fn run_effects(&self) -> usize {
        self.scheduler.run_until_stalled()
    }

    /// Alternate effects and render passes until nothing is pending.
    /// Returns the number of render passes performed.
    pub fn settle(&mut self) -> usize {
        let mut passes = 0;
        for _ in 0..MAX_SETTLE_ROUNDS {
            self.run_effects();
            if !self.tree.needs_render() {
                return passes;
            }
            self.render();
            passes += 1;
        }
        log::warn!("view tree did not settle after {MAX_SETTLE_ROUNDS} rounds");
        passes
    }

    pub fn needs_render(&self) -> bool {
        self.tree.needs_render()
    }

    /// The widget tree produced by the last render.
    pub fn tree(&self) -> &WidgetNode {
        self.tree
            .widget_tree()
            .expect("harness renders on construction")
    }

    pub fn text(&self) -> String {
        self.tree().text_content()
    }

    pub fn find_kind(&self, kind: &str) -> Option<&WidgetNode> {
        self.tree().find_by(&|node| node.kind == kind)
    }

    pub fn find_all_kind(&self, kind: &str) -> Vec<&WidgetNode> {
        self.tree()
            .descendants()
            .into_iter()
            .filter(|node| node.kind == kind)
            .collect()
    }

    /// Id of the first widget of `kind`. Panics when there is none.
    pub fn id_of(&self, kind: &str) -> WidgetId {
        self.find_kind(kind)
            .map(|node| node.id.clone())
            .unwrap_or_else(|| panic!("no widget of kind `{kind}` in {:#?}", self.tree()))
    }

    pub fn dispatch(
        &mut self,
        target: &WidgetId,
        name: &str,
        args: serde_json::Value,
    ) -> Result<(), DispatchError> {
        self.tree
            .dispatch(&Event::new(target.clone(), name).with_args(args))
    }

    /// Dispatch `name` to the first widget of `kind`.
    pub fn fire(&mut self, kind: &str, name: &str) -> Result<(), DispatchError> {
        let target = self.id_of(kind);
        self.dispatch(&target, name, serde_json::Value::Null)
    }

    pub fn updates(&self) -> &[TreeUpdate] {
        &self.updates
    }

    pub fn last_update(&self) -> Option<&TreeUpdate> {
        self.updates.last()
    }

    pub fn render_passes(&self) -> u64 {
        self.tree.render_passes()
    }

    pub fn instances(&self) -> Vec<InstanceInfo> {
        self.tree.instances()
    }

    /// Render count of the first mounted instance named `name`.
    pub fn render_count(&self, name: &str) -> Option<u64> {
        self.instances()
            .into_iter()
            .find(|info| info.name == name)
            .map(|info| info.render_count)
    }

    pub fn faults(&self) -> Vec<Fault> {
        self.reporter.faults()
    }

    pub fn fault_count(&self, kind: FaultKind) -> usize {
        self.reporter.count(kind)
    }

    pub fn scheduler(&self) -> &Arc<ManualScheduler> {
        &self.scheduler
    }

    pub fn view_tree(&mut self) -> &mut ViewTree {
        &mut self.tree
    }

    pub fn dispose(&mut self) {
        self.tree.dispose();
    }
}

/// Convenience helper for tests that only need temporary access to a
/// harness.
pub fn run_test_view<R>(view: impl View, f: impl FnOnce(&mut TestHarness) -> R) -> R {
    let mut harness = TestHarness::new(view);
    f(&mut harness)
}
