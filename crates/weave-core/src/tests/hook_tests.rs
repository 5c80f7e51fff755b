use super::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

struct Fixture {
    tree: ViewTree,
    scheduler: Arc<ManualScheduler>,
    reporter: Arc<CollectingReporter>,
}

impl Fixture {
    fn new(view: impl View) -> Self {
        Self::with_runtime(view, |builder| builder)
    }

    fn with_runtime(view: impl View, configure: impl FnOnce(RuntimeBuilder) -> RuntimeBuilder) -> Self {
        let scheduler = Arc::new(ManualScheduler::new());
        let reporter = Arc::new(CollectingReporter::terminal());
        let runtime = configure(Runtime::builder(scheduler.clone()).reporter(reporter.clone())).build();
        Self {
            tree: ViewTree::new(ViewSpec::new(view), runtime),
            scheduler,
            reporter,
        }
    }

    fn build(&mut self) -> TreeUpdate {
        self.tree.build().expect("build")
    }

    fn text(&self) -> String {
        self.tree.widget_tree().expect("tree built").text_content()
    }

    fn root_renders(&self) -> u64 {
        self.tree.instances()[0].render_count
    }
}

type Slot<T> = Arc<Mutex<Option<T>>>;

fn slot<T>() -> Slot<T> {
    Arc::new(Mutex::new(None))
}

fn counter_view(captured: Slot<State<i32>>) -> impl View {
    view_fn("counter", move |cx| {
        let count = cx.use_state(|| 0)?;
        *captured.lock() = Some(count.clone());
        Ok(Element::text(count.value().to_string()))
    })
}

#[test]
fn set_marks_owner_dirty_and_equal_set_is_noop() {
    let captured = slot();
    let mut fixture = Fixture::new(counter_view(captured.clone()));
    assert!(matches!(fixture.build(), TreeUpdate::Initial(_)));
    assert!(!fixture.tree.needs_render());

    let count = captured.lock().clone().expect("state captured");
    assert!(!count.set(0));
    assert!(!fixture.tree.needs_render());

    assert!(count.set(1));
    assert!(fixture.tree.needs_render());
    assert!(fixture.scheduler.take_render_request());
    let update = fixture.build();
    assert!(matches!(update.patches(), [Patch::Update { .. }]));
    assert_eq!(fixture.text(), "1");
    assert_eq!(count.version(), 1);
}

#[test]
fn each_set_between_passes_renders_once() {
    let captured = slot();
    let mut fixture = Fixture::new(counter_view(captured.clone()));
    fixture.build();
    let count = captured.lock().clone().expect("state captured");

    for value in 1..=3 {
        count.set(value);
        fixture.build();
    }
    assert_eq!(fixture.root_renders(), 4);
    assert_eq!(fixture.text(), "3");
}

#[test]
fn writes_before_a_pass_coalesce_into_one_render() {
    let captured = slot();
    let mut fixture = Fixture::new(counter_view(captured.clone()));
    fixture.build();
    let count = captured.lock().clone().expect("state captured");

    count.set(1);
    count.set(2);
    count.set(3);
    fixture.build();
    assert_eq!(fixture.root_renders(), 2);
    assert_eq!(fixture.text(), "3");

    let update = fixture.build();
    assert!(update.is_empty());
    assert_eq!(fixture.root_renders(), 2);
}

#[test]
fn extra_hook_after_commit_faults_the_instance() {
    let captured = slot();
    let extra = Arc::new(AtomicBool::new(false));
    let flag = extra.clone();
    let sink = captured.clone();
    let mut fixture = Fixture::new(view_fn("conditional", move |cx| {
        let count = cx.use_state(|| 0)?;
        *sink.lock() = Some(count.clone());
        if flag.load(Ordering::SeqCst) {
            cx.use_state(|| "extra".to_string())?;
        }
        Ok(Element::text(count.value().to_string()))
    }));
    fixture.build();
    assert_eq!(fixture.text(), "0");

    extra.store(true, Ordering::SeqCst);
    let count: State<i32> = captured.lock().clone().expect("state captured");
    count.set(1);
    fixture.build();

    let tree = fixture.tree.widget_tree().expect("tree built");
    let error = tree.find_by(&|node| node.is_error()).expect("error node");
    assert_eq!(error.prop("error"), Some(&serde_json::json!("hook-order-violation")));
    assert_eq!(fixture.reporter.count(FaultKind::HookOrderViolation), 1);

    // Faulted until unmounted, even once the hook sequence is valid again.
    extra.store(false, Ordering::SeqCst);
    count.set(2);
    let renders = fixture.root_renders();
    fixture.build();
    assert_eq!(fixture.root_renders(), renders);
    let tree = fixture.tree.widget_tree().expect("tree built");
    assert!(tree.find_by(&|node| node.is_error()).is_some());
}

#[test]
fn missing_hook_after_commit_is_a_violation() {
    let captured = slot();
    let skip = Arc::new(AtomicBool::new(false));
    let flag = skip.clone();
    let sink = captured.clone();
    let mut fixture = Fixture::new(view_fn("shrinking", move |cx| {
        let count = cx.use_state(|| 0)?;
        *sink.lock() = Some(count.clone());
        if !flag.load(Ordering::SeqCst) {
            cx.use_ref(|| 0u8)?;
        }
        Ok(Element::text(count.value().to_string()))
    }));
    fixture.build();

    skip.store(true, Ordering::SeqCst);
    let count: State<i32> = captured.lock().clone().expect("state captured");
    count.set(5);
    fixture.build();
    let faults = fixture.reporter.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].kind, FaultKind::HookOrderViolation);
    assert!(faults[0].message.contains("end of render"), "{}", faults[0].message);
}

#[test]
fn failed_first_render_does_not_commit_hooks() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let captured: Slot<State<i32>> = slot();
    let sink = captured.clone();
    let mut fixture = Fixture::new(view_fn("flaky", move |cx| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        let state = cx.use_state(|| 0)?;
        *sink.lock() = Some(state.clone());
        if attempt == 0 {
            anyhow::bail!("not ready");
        }
        cx.use_ref(|| ())?;
        Ok(Element::text("ready"))
    }));
    fixture.build();
    assert_eq!(fixture.reporter.count(FaultKind::RenderFailure), 1);

    let state = captured.lock().clone().expect("state captured");
    state.set(1);
    fixture.build();
    assert_eq!(fixture.text(), "ready");
    assert_eq!(fixture.reporter.count(FaultKind::HookOrderViolation), 0);
    assert_eq!(fixture.tree.instances()[0].hooks, 2);
}

#[test]
fn on_change_effect_cleans_up_before_rerun_and_on_unmount() {
    let captured: Slot<(State<i32>, State<u32>)> = slot();
    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = captured.clone();
    let effect_log = log.clone();
    let mut fixture = Fixture::new(view_fn("effectful", move |cx| {
        let value = cx.use_state(|| 0)?;
        let unrelated = cx.use_state(|| 0u32)?;
        *sink.lock() = Some((value.clone(), unrelated.clone()));
        let current = value.value();
        let log = effect_log.clone();
        cx.use_effect(EffectTrigger::OnChange(deps![current]), move |_scope| {
            log.lock().push(format!("run {current}"));
            Ok(Cleanup::new(move || log.lock().push(format!("cleanup {current}"))))
        })?;
        Ok(Element::text(format!("{current}/{}", unrelated.value())))
    }));
    fixture.build();
    fixture.scheduler.run_until_stalled();
    assert_eq!(*log.lock(), ["run 0"]);

    let (value, unrelated) = captured.lock().clone().expect("state captured");
    unrelated.set(1);
    fixture.build();
    fixture.scheduler.run_until_stalled();
    assert_eq!(fixture.root_renders(), 2);
    assert_eq!(*log.lock(), ["run 0"]);

    value.set(1);
    fixture.build();
    fixture.scheduler.run_until_stalled();
    assert_eq!(*log.lock(), ["run 0", "cleanup 0", "run 1"]);

    fixture.tree.dispose();
    fixture.tree.dispose();
    assert_eq!(*log.lock(), ["run 0", "cleanup 0", "run 1", "cleanup 1"]);
}

#[test]
fn hook_of_another_kind_at_a_committed_position_is_a_violation() {
    let captured: Slot<State<i32>> = slot();
    let swap = Arc::new(AtomicBool::new(false));
    let flag = swap.clone();
    let sink = captured.clone();
    let mut fixture = Fixture::new(view_fn("swapping", move |cx| {
        let count = cx.use_state(|| 0)?;
        *sink.lock() = Some(count.clone());
        if flag.load(Ordering::SeqCst) {
            cx.use_ref(|| 0i32)?;
        } else {
            cx.use_state(|| 0i32)?;
        }
        Ok(Element::text(count.value().to_string()))
    }));
    fixture.build();

    swap.store(true, Ordering::SeqCst);
    let count = captured.lock().clone().expect("state captured");
    count.set(3);
    fixture.build();
    assert_eq!(fixture.reporter.count(FaultKind::HookOrderViolation), 1);
    let tree = fixture.tree.widget_tree().expect("tree built");
    let error = tree.find_by(&|node| node.is_error()).expect("error node");
    assert_eq!(error.prop("view"), Some(&serde_json::json!("swapping")));
}

#[test]
fn mount_and_every_render_triggers() {
    let captured = slot();
    let mounts = Arc::new(AtomicUsize::new(0));
    let renders = Arc::new(AtomicUsize::new(0));
    let (sink, on_mount, every) = (captured.clone(), mounts.clone(), renders.clone());
    let mut fixture = Fixture::new(view_fn("triggers", move |cx| {
        let value = cx.use_state(|| 0)?;
        *sink.lock() = Some(value.clone());
        let on_mount = on_mount.clone();
        cx.use_effect(EffectTrigger::OnMount, move |_| {
            on_mount.fetch_add(1, Ordering::SeqCst);
            Ok(Cleanup::none())
        })?;
        let every = every.clone();
        cx.use_effect(EffectTrigger::EveryRender, move |_| {
            every.fetch_add(1, Ordering::SeqCst);
            Ok(Cleanup::none())
        })?;
        Ok(Element::Empty)
    }));
    fixture.build();
    let value = captured.lock().clone().expect("state captured");
    for next in 1..=3 {
        value.set(next);
        fixture.build();
    }
    fixture.scheduler.run_until_stalled();
    assert_eq!(mounts.load(Ordering::SeqCst), 1);
    assert_eq!(renders.load(Ordering::SeqCst), 4);
}

#[test]
fn unmount_cancels_running_async_effect() {
    let observed = Arc::new(AtomicBool::new(false));
    let flag = observed.clone();
    let mut fixture = Fixture::new(view_fn("poller", move |cx| {
        let flag = flag.clone();
        cx.use_async_effect(EffectTrigger::OnMount, move |scope| async move {
            scope.cancelled().await;
            flag.store(!scope.is_active(), Ordering::SeqCst);
            Ok(Cleanup::none())
        })?;
        Ok(Element::Empty)
    }));
    fixture.build();
    assert_eq!(fixture.scheduler.run_until_stalled(), 0);
    assert_eq!(fixture.scheduler.pending_tasks(), 1);

    fixture.tree.dispose();
    assert_eq!(fixture.scheduler.run_until_stalled(), 1);
    assert!(observed.load(Ordering::SeqCst));
}

#[test]
fn cleanup_returned_after_unmount_runs_immediately() {
    let (tx, rx) = futures::channel::oneshot::channel::<()>();
    let receiver = Arc::new(Mutex::new(Some(rx)));
    let cleanups = Arc::new(AtomicUsize::new(0));
    let counter = cleanups.clone();
    let mut fixture = Fixture::new(view_fn("late", move |cx| {
        let rx = receiver.lock().take();
        let counter = counter.clone();
        cx.use_async_effect(EffectTrigger::OnMount, move |_scope| async move {
            if let Some(rx) = rx {
                let _ = rx.await;
            }
            Ok(Cleanup::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
        })?;
        Ok(Element::Empty)
    }));
    fixture.build();
    fixture.scheduler.run_until_stalled();
    fixture.tree.dispose();
    assert_eq!(cleanups.load(Ordering::SeqCst), 0);

    tx.send(()).expect("receiver alive");
    fixture.scheduler.run_until_stalled();
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[test]
fn failing_and_panicking_effects_are_reported_and_isolated() {
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let mut fixture = Fixture::new(view_fn("faulty", move |cx| {
        cx.use_effect(EffectTrigger::OnMount, |_| Err(anyhow::anyhow!("boom")))?;
        cx.use_effect(EffectTrigger::OnMount, |_| -> anyhow::Result<Cleanup> {
            panic!("effect exploded")
        })?;
        let flag = flag.clone();
        cx.use_effect(EffectTrigger::OnMount, move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(Cleanup::none())
        })?;
        Ok(Element::text("still here"))
    }));
    fixture.build();
    fixture.scheduler.run_until_stalled();
    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(fixture.reporter.count(FaultKind::EffectFailure), 2);
    assert_eq!(fixture.text(), "still here");
}

#[test]
fn memo_recomputes_only_when_deps_change() {
    let captured = slot();
    let computed = Arc::new(AtomicUsize::new(0));
    let callbacks: Slot<Callback<i32, i32>> = slot();
    let (sink, counter, callback_sink) = (captured.clone(), computed.clone(), callbacks.clone());
    let mut fixture = Fixture::new(view_fn("memo", move |cx| {
        let state = cx.use_state(|| (1, 0))?;
        *sink.lock() = Some(state.clone());
        let (factor, _noise) = state.value();
        let counter = counter.clone();
        let doubled = cx.use_memo(deps![factor], move || {
            counter.fetch_add(1, Ordering::SeqCst);
            factor * 2
        })?;
        let scale = cx.use_callback(deps![factor], move |x: i32| x * factor)?;
        let previous = callback_sink.lock().replace(scale.clone());
        if let Some(previous) = previous {
            assert_eq!(previous.ptr_eq(&scale), factor == 1);
        }
        Ok(Element::text(doubled.to_string()))
    }));
    fixture.build();
    let state = captured.lock().clone().expect("state captured");

    state.set((1, 1));
    fixture.build();
    assert_eq!(computed.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.text(), "2");

    state.set((4, 1));
    fixture.build();
    assert_eq!(computed.load(Ordering::SeqCst), 2);
    assert_eq!(fixture.text(), "8");
    let scale = callbacks.lock().clone().expect("callback captured");
    assert_eq!(scale.call(3), 12);
}

#[test]
fn reducer_dispatch_updates_state() {
    #[derive(Debug)]
    enum Action {
        Add(i32),
        Reset,
    }
    let dispatcher: Slot<Dispatch<i32, Action>> = slot();
    let sink = dispatcher.clone();
    let mut fixture = Fixture::new(view_fn("reducer", move |cx| {
        let (total, dispatch) = cx.use_reducer(
            |total: &i32, action: Action| match action {
                Action::Add(n) => total + n,
                Action::Reset => 0,
            },
            || 0,
        )?;
        *sink.lock() = Some(dispatch);
        Ok(Element::text(total.to_string()))
    }));
    fixture.build();
    let dispatch = dispatcher.lock().clone().expect("dispatch captured");
    assert!(dispatch.dispatch(Action::Add(5)));
    assert!(dispatch.dispatch(Action::Add(2)));
    fixture.build();
    assert_eq!(fixture.text(), "7");
    assert!(!dispatch.dispatch(Action::Add(0)));
    dispatch.dispatch(Action::Reset);
    fixture.build();
    assert_eq!(fixture.text(), "0");
}

#[test]
fn ref_and_static_never_trigger_renders() {
    let refs: Slot<Ref<Vec<i32>>> = slot();
    let sink = refs.clone();
    let mut fixture = Fixture::new(view_fn("refs", move |cx| {
        let seed = cx.use_static(|| 42u64)?;
        let history = cx.use_ref(Vec::new)?;
        *sink.lock() = Some(history.clone());
        Ok(Element::text(seed.to_string()))
    }));
    fixture.build();
    let history = refs.lock().clone().expect("ref captured");
    history.with_mut(|items| items.push(1));
    history.set(vec![1, 2]);
    assert!(!fixture.tree.needs_render());
    assert_eq!(history.get(), vec![1, 2]);
    assert_eq!(fixture.text(), "42");
}

#[derive(Debug)]
struct Theme(&'static str);

fn theme_consumer() -> impl View {
    view_fn("consumer", |cx| {
        let theme = cx.use_context::<Theme>()?;
        Ok(Element::text(theme.0))
    })
}

#[test]
fn context_resolves_nearest_provider() {
    let mut fixture = Fixture::new(view_fn("outer", |cx| {
        cx.create_context(|| Theme("dark"))?;
        Ok(Widget::new("column")
            .child(Element::view(theme_consumer()))
            .child(Element::view(view_fn("inner", |cx| {
                cx.create_context(|| Theme("light"))?;
                Ok(Element::view(theme_consumer()))
            })))
            .into())
    }));
    fixture.build();
    assert_eq!(fixture.text(), "darklight");
}

#[test]
fn missing_context_renders_an_error_node() {
    let mut fixture = Fixture::new(view_fn("orphan", |cx| {
        Ok(Widget::new("column")
            .child(Element::view(theme_consumer()))
            .child("sibling")
            .into())
    }));
    fixture.build();
    let tree = fixture.tree.widget_tree().expect("tree built");
    let error = tree.find_by(&|node| node.is_error()).expect("error node");
    assert_eq!(error.prop("error"), Some(&serde_json::json!("missing-context")));
    assert_eq!(tree.text_content(), "sibling");
    assert_eq!(fixture.reporter.count(FaultKind::MissingContext), 1);
}

#[derive(Debug)]
struct Greeting(String);

#[test]
fn services_resolve_from_the_runtime() {
    let view = view_fn("greeter", |cx| {
        let greeting = cx.use_service::<Greeting>()?;
        Ok(Element::text(greeting.0.clone()))
    });
    let mut fixture = Fixture::with_runtime(view, |builder| builder.service(Greeting("hello".into())));
    fixture.build();
    assert_eq!(fixture.text(), "hello");

    let mut bare = Fixture::new(view_fn("greeter", |cx| {
        cx.use_service::<Greeting>()?;
        Ok(Element::Empty)
    }));
    bare.build();
    assert_eq!(bare.reporter.count(FaultKind::RenderFailure), 1);
    let faults = bare.reporter.faults();
    assert!(faults[0].message.contains("Greeting"), "{}", faults[0].message);
}
