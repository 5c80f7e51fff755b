use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use weave_core::{
    view_fn, Element, ManualScheduler, Runtime, TreeUpdate, ViewSpec, ViewTree, Widget, WidgetNode,
};

fn build_rows(count: usize, rotate: usize) -> WidgetNode {
    let spec = ViewSpec::new(view_fn("rows", move |_| {
        let rows = (0..count).map(|i| {
            let id = (i + rotate) % count;
            Widget::new("row").key(id as u64).prop("label", format!("row {id}"))
        });
        Ok(Widget::new("list").children(rows).into())
    }));
    let mut tree = ViewTree::new(spec, Runtime::new(Arc::new(ManualScheduler::new())));
    match tree.build() {
        Ok(TreeUpdate::Initial(node)) => node,
        _ => WidgetNode::new("$root", ""),
    }
}

fn bench_diff(c: &mut Criterion) {
    let before = build_rows(1_000, 0);
    let rotated = build_rows(1_000, 1);
    let unchanged = before.clone();

    c.bench_function("diff_identical_1000", |b| {
        b.iter(|| weave_core::diff(black_box(&before), black_box(&unchanged)))
    });
    c.bench_function("diff_rotated_1000", |b| {
        b.iter(|| weave_core::diff(black_box(&before), black_box(&rotated)))
    });
    c.bench_function("element_to_text", |b| {
        b.iter(|| Element::text(black_box("hello")))
    });
}

criterion_group!(benches, bench_diff);
criterion_main!(benches);
