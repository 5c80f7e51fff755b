use super::*;
use crate::hash::hash_one;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn tree_for(view: impl View) -> (ViewTree, Arc<ManualScheduler>, Arc<CollectingReporter>) {
    let scheduler = Arc::new(ManualScheduler::new());
    let reporter = Arc::new(CollectingReporter::terminal());
    let runtime = Runtime::builder(scheduler.clone()).reporter(reporter.clone()).build();
    (ViewTree::new(ViewSpec::new(view), runtime), scheduler, reporter)
}

struct Item {
    id: u32,
    states: Arc<Mutex<HashMap<u32, State<i32>>>>,
}

impl View for Item {
    fn render(&self, cx: &mut RenderContext<'_>) -> anyhow::Result<Element> {
        let clicks = cx.use_state(|| 0)?;
        self.states.lock().insert(self.id, clicks.clone());
        Ok(Widget::new("row")
            .prop("id", self.id)
            .child(Element::text(clicks.value().to_string()))
            .into())
    }
}

#[test]
fn keyed_reorder_preserves_state_and_emits_one_move() {
    let states = Arc::new(Mutex::new(HashMap::new()));
    let order_slot: Arc<Mutex<Option<State<Vec<u32>>>>> = Arc::new(Mutex::new(None));
    let (item_states, sink) = (states.clone(), order_slot.clone());
    let (mut tree, _, _) = tree_for(view_fn("list", move |cx| {
        let order = cx.use_state(|| vec![1u32, 2])?;
        *sink.lock() = Some(order.clone());
        let rows = order.value().into_iter().map(|id| {
            Element::keyed_view(
                id,
                Item {
                    id,
                    states: item_states.clone(),
                },
            )
        });
        Ok(Widget::new("list").children(rows).into())
    }));
    tree.build().expect("initial build");

    states.lock()[&1].set(5);
    tree.build().expect("state build");

    let order = order_slot.lock().clone().expect("order captured");
    order.set(vec![2, 1]);
    let update = tree.build().expect("reorder build");
    match update.patches() {
        [Patch::Move { from: 1, to: 0, .. }] => {}
        other => panic!("expected a single move, got {other:?}"),
    }
    let list = &tree.widget_tree().expect("tree built").children[0];
    assert_eq!(list.children[0].prop("id"), Some(&serde_json::json!(2)));
    assert_eq!(list.children[1].text_content(), "5");
    assert_eq!(states.lock()[&1].value(), 5);
}

#[test]
fn unkeyed_children_match_by_position_and_type() {
    let show_first = Arc::new(Mutex::new(true));
    let toggle = show_first.clone();
    let (mut tree, _, _) = tree_for(view_fn("parent", move |cx| {
        let flip = cx.use_state(|| true)?;
        *toggle.lock() = flip.value();
        let first: Element = if flip.value() {
            Element::view(view_fn("a", |cx| {
                let n = cx.use_state(|| 7)?;
                Ok(Element::text(n.value().to_string()))
            }))
        } else {
            Element::view(view_fn("b", |_| Ok(Element::text("b"))))
        };
        let captured = flip.clone();
        Ok(Widget::new("box")
            .child(first)
            .child(Element::view(view_fn("c", |_| Ok(Element::text("c")))))
            .on("toggle", move |_| {
                captured.update(|value| !value);
                Ok(())
            })
            .into())
    }));
    tree.build().expect("initial build");
    let before: Vec<_> = tree.instances().into_iter().map(|info| (info.name, info.id)).collect();
    assert_eq!(before.iter().map(|(name, _)| *name).collect::<Vec<_>>(), ["parent", "a", "c"]);

    let target = tree.widget_tree().expect("tree built").children[0].id.clone();
    tree.dispatch(&Event::new(target, "toggle")).expect("toggle");
    tree.build().expect("rebuild");
    let after: Vec<_> = tree.instances().into_iter().map(|info| (info.name, info.id)).collect();
    assert_eq!(after[1].0, "b");
    assert_eq!(after[2], before[2]);
    assert!(!*show_first.lock());
}

struct Label {
    text: String,
    renders: Arc<AtomicUsize>,
}

impl View for Label {
    fn render(&self, _cx: &mut RenderContext<'_>) -> anyhow::Result<Element> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(Element::text(self.text.clone()))
    }

    fn memo_key(&self) -> Option<u64> {
        Some(hash_one(&self.text))
    }
}

#[test]
fn memoized_child_is_skipped_until_refreshed() {
    let renders = Arc::new(AtomicUsize::new(0));
    let tick_slot: Arc<Mutex<Option<State<u32>>>> = Arc::new(Mutex::new(None));
    let token_slot: Arc<Mutex<Option<RefreshToken>>> = Arc::new(Mutex::new(None));
    let (label_renders, ticks, tokens) = (renders.clone(), tick_slot.clone(), token_slot.clone());
    let (mut tree, _, _) = tree_for(view_fn("page", move |cx| {
        let tick = cx.use_state(|| 0u32)?;
        let token = cx.use_refresh_token()?;
        *ticks.lock() = Some(tick.clone());
        *tokens.lock() = Some(token);
        Ok(Element::fragment([
            Element::text(tick.value().to_string()),
            Element::view(Label {
                text: "fixed".into(),
                renders: label_renders.clone(),
            }),
        ]))
    }));
    tree.build().expect("initial build");
    assert_eq!(renders.load(Ordering::SeqCst), 1);

    let tick = tick_slot.lock().clone().expect("tick captured");
    tick.set(1);
    let update = tree.build().expect("tick build");
    assert_eq!(update.patches().len(), 1);
    assert_eq!(renders.load(Ordering::SeqCst), 1);

    let token = token_slot.lock().clone().expect("token captured");
    token.refresh_with("reason");
    tree.build().expect("refresh build");
    assert_eq!(renders.load(Ordering::SeqCst), 2);
    assert_eq!(token.generation(), 1);
    assert_eq!(token.take_returned::<&str>(), Some("reason"));
    assert_eq!(token.take_returned::<&str>(), None);
}

#[test]
fn render_failure_is_isolated_and_recovers() {
    let broken = Arc::new(Mutex::new(true));
    let flag = broken.clone();
    let retry_slot: Arc<Mutex<Option<State<u32>>>> = Arc::new(Mutex::new(None));
    let sink = retry_slot.clone();
    let (mut tree, _, reporter) = tree_for(view_fn("app", move |_| {
        let flag = flag.clone();
        let sink = sink.clone();
        Ok(Widget::new("column")
            .child(Element::view(view_fn("fragile", move |cx| {
                let attempt = cx.use_state(|| 0u32)?;
                *sink.lock() = Some(attempt.clone());
                if *flag.lock() {
                    anyhow::bail!("backend offline");
                }
                Ok(Element::text("recovered"))
            })))
            .child(Element::view(view_fn("panicky", |_| -> anyhow::Result<Element> {
                panic!("render exploded")
            })))
            .child("healthy")
            .into())
    }));
    tree.build().expect("initial build");
    let root = tree.widget_tree().expect("tree built");
    let errors: Vec<_> = root.descendants().into_iter().filter(|node| node.is_error()).collect();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].prop("message").is_some_and(|m| m.as_str().is_some_and(|m| m.contains("backend offline"))));
    assert!(errors[1].prop("message").is_some_and(|m| m.as_str().is_some_and(|m| m.contains("render exploded"))));
    assert_eq!(root.text_content(), "healthy");
    assert_eq!(reporter.count(FaultKind::RenderFailure), 2);

    *broken.lock() = false;
    let attempt = retry_slot.lock().clone().expect("state captured");
    attempt.set(1);
    tree.build().expect("retry build");
    assert_eq!(tree.widget_tree().expect("tree built").text_content(), "recoveredhealthy");
}

#[test]
fn removed_children_are_disposed_and_ignore_late_writes() {
    let cleanups = Arc::new(AtomicUsize::new(0));
    let show_slot: Arc<Mutex<Option<State<bool>>>> = Arc::new(Mutex::new(None));
    let child_slot: Arc<Mutex<Option<State<u32>>>> = Arc::new(Mutex::new(None));
    let (counter, show_sink, child_sink) = (cleanups.clone(), show_slot.clone(), child_slot.clone());
    let (mut tree, scheduler, _) = tree_for(view_fn("host", move |cx| {
        let show = cx.use_state(|| true)?;
        *show_sink.lock() = Some(show.clone());
        let counter = counter.clone();
        let child_sink = child_sink.clone();
        let child = show.value().then(|| {
            Element::view(view_fn("child", move |cx| {
                let value = cx.use_state(|| 0u32)?;
                *child_sink.lock() = Some(value.clone());
                let counter = counter.clone();
                cx.use_effect(EffectTrigger::OnMount, move |_| {
                    Ok(Cleanup::new(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }))
                })?;
                Ok(Element::Empty)
            }))
        });
        Ok(Element::from(child))
    }));
    tree.build().expect("initial build");
    scheduler.run_until_stalled();
    assert_eq!(tree.instances().len(), 2);

    let show = show_slot.lock().clone().expect("show captured");
    show.set(false);
    tree.build().expect("removal build");
    assert_eq!(tree.instances().len(), 1);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);

    scheduler.take_render_request();
    let orphan = child_slot.lock().clone().expect("child state captured");
    assert!(orphan.set(9));
    assert!(!scheduler.take_render_request());

    tree.dispose();
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[test]
fn dispatch_routes_events_and_reports_handler_failures() {
    let count_slot: Arc<Mutex<Option<State<i64>>>> = Arc::new(Mutex::new(None));
    let sink = count_slot.clone();
    let (mut tree, _, reporter) = tree_for(view_fn("clicker", move |cx| {
        let count = cx.use_state(|| 0i64)?;
        *sink.lock() = Some(count.clone());
        let add = count.clone();
        Ok(Widget::new("button")
            .prop("label", count.value())
            .on("click", move |args| {
                let by = args.get("by").and_then(|v| v.as_i64()).unwrap_or(1);
                add.update(|n| n + by);
                Ok(())
            })
            .on("fail", |_| Err(anyhow::anyhow!("handler refused")))
            .into())
    }));
    tree.build().expect("initial build");
    let button = tree.widget_tree().expect("tree built").children[0].clone();
    assert_eq!(button.events, ["click", "fail"]);

    tree.dispatch(&Event::new(button.id.clone(), "click").with_args(serde_json::json!({ "by": 3 })))
        .expect("click");
    let update = tree.build().expect("click build");
    match update.patches() {
        [Patch::Update { set, .. }] => assert_eq!(set.get("label"), Some(&serde_json::json!(3))),
        other => panic!("unexpected patches {other:?}"),
    }

    let err = tree.dispatch(&Event::new(button.id.clone(), "fail")).unwrap_err();
    assert!(matches!(err, DispatchError::Failed(_)));
    assert_eq!(reporter.count(FaultKind::EventHandlerFailure), 1);

    let err = tree.dispatch(&Event::new(WidgetId::new("nowhere"), "click")).unwrap_err();
    assert!(matches!(err, DispatchError::UnknownTarget { .. }));
}

#[test]
fn disposed_tree_refuses_work() {
    let (mut tree, _, _) = tree_for(view_fn("static", |_| Ok(Element::text("hi"))));
    tree.build().expect("initial build");
    tree.dispose();
    assert!(matches!(tree.build(), Err(BuildError::Disposed)));
    assert!(!tree.needs_render());
    assert!(tree.widget_tree().is_none());
    assert!(tree.instances().is_empty());
}

#[test]
fn widget_ids_are_stable_across_passes() {
    let tick_slot: Arc<Mutex<Option<State<u8>>>> = Arc::new(Mutex::new(None));
    let sink = tick_slot.clone();
    let (mut tree, _, _) = tree_for(view_fn("ids", move |cx| {
        let tick = cx.use_state(|| 0u8)?;
        *sink.lock() = Some(tick.clone());
        Ok(Widget::new("panel")
            .key("main")
            .child(Element::text(tick.value().to_string()))
            .into())
    }));
    tree.build().expect("initial build");
    let first = tree.widget_tree().expect("tree built").clone();
    tick_slot.lock().clone().expect("tick captured").set(1);
    tree.build().expect("second build");
    let second = tree.widget_tree().expect("tree built");
    assert_eq!(first.children[0].id, second.children[0].id);
    assert_eq!(first.children[0].children[0].id, second.children[0].children[0].id);
    assert_eq!(second.children[0].key, "#main");
    assert_ne!(first.children[0].id, first.children[0].children[0].id);
}

#[test]
fn repeated_widget_keys_keep_the_first_widget_and_its_handlers() {
    let hits = Arc::new(Mutex::new(Vec::new()));
    let log = hits.clone();
    let (mut tree, _, _) = tree_for(view_fn("twins", move |_| {
        let (first, second) = (log.clone(), log.clone());
        Ok(Widget::new("row")
            .child(Widget::new("button").key("go").prop("n", 1).on("click", move |_| {
                first.lock().push(1);
                Ok(())
            }))
            .child(Widget::new("button").key("go").prop("n", 2).on("click", move |_| {
                second.lock().push(2);
                Ok(())
            }))
            .into())
    }));
    tree.build().expect("initial build");
    let row = tree.widget_tree().expect("tree built").children[0].clone();
    assert_eq!(row.children.len(), 1);
    assert_eq!(row.children[0].prop("n"), Some(&serde_json::json!(1)));

    tree.dispatch(&Event::new(row.children[0].id.clone(), "click")).expect("click");
    assert_eq!(*hits.lock(), [1]);
}

#[test]
fn failing_parent_unmounts_its_children() {
    let cleanups = Arc::new(AtomicUsize::new(0));
    let fail_slot: Arc<Mutex<Option<State<bool>>>> = Arc::new(Mutex::new(None));
    let child_slot: Arc<Mutex<Option<State<u32>>>> = Arc::new(Mutex::new(None));
    let (counter, fail_sink, child_sink) = (cleanups.clone(), fail_slot.clone(), child_slot.clone());
    let (mut tree, scheduler, reporter) = tree_for(view_fn("parent", move |cx| {
        let fail = cx.use_state(|| false)?;
        *fail_sink.lock() = Some(fail.clone());
        if fail.value() {
            anyhow::bail!("parent gave up");
        }
        let counter = counter.clone();
        let child_sink = child_sink.clone();
        Ok(Element::view(view_fn("child", move |cx| {
            let value = cx.use_state(|| 0u32)?;
            *child_sink.lock() = Some(value.clone());
            let counter = counter.clone();
            cx.use_effect(EffectTrigger::OnMount, move |_| {
                Ok(Cleanup::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
            })?;
            Ok(Element::text(value.value().to_string()))
        })))
    }));
    tree.build().expect("initial build");
    scheduler.run_until_stalled();
    assert_eq!(tree.instances().len(), 2);

    let fail = fail_slot.lock().clone().expect("fail captured");
    fail.set(true);
    tree.build().expect("failing build");
    assert!(tree.widget_tree().expect("tree built").children[0].is_error());
    assert_eq!(tree.instances().len(), 1);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(reporter.count(FaultKind::RenderFailure), 1);

    scheduler.take_render_request();
    let hidden = child_slot.lock().clone().expect("child state captured");
    assert!(hidden.set(4));
    assert!(!scheduler.take_render_request());
    assert!(!tree.needs_render());

    fail.set(false);
    tree.build().expect("recovered build");
    scheduler.run_until_stalled();
    assert_eq!(tree.instances().len(), 2);
    assert_eq!(tree.widget_tree().expect("tree built").text_content(), "0");
}
