use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::deps::Deps;
use crate::error::EffectError;
use crate::instance::InstanceId;
use crate::report::{panic_message, Fault};
use crate::runtime::RuntimeHandle;

/// When an effect body runs.
#[derive(Debug)]
pub enum EffectTrigger {
    /// After every successful render of the owning instance.
    EveryRender,
    /// Once, after the first successful render.
    OnMount,
    /// After the first render and whenever any dependency changed.
    OnChange(Deps),
}

struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation flag handed to every effect run.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelHandle::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut notified = pin!(self.inner.notify.notified());
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Passed to effect bodies.
#[derive(Clone)]
pub struct EffectScope {
    instance: InstanceId,
    cancel: CancelHandle,
    runtime: RuntimeHandle,
}

impl EffectScope {
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// `false` once the run has been superseded or its instance unmounted.
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }
}

/// Teardown returned by an effect body. Runs exactly once: before the next
/// run of the same effect, or when the owning instance is unmounted.
#[derive(Default)]
pub struct Cleanup(Option<Box<dyn FnOnce() + Send + 'static>>);

impl Cleanup {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    fn run(self, instance: InstanceId, runtime: &RuntimeHandle) {
        let Some(f) = self.0 else {
            return;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            let error = EffectError::CleanupPanicked(panic_message(payload));
            runtime.report(Fault::from_effect(&error).with_instance(instance, "cleanup"));
        }
    }
}

type EffectFuture = BoxFuture<'static, anyhow::Result<Cleanup>>;

pub(crate) enum EffectBody {
    Sync(Box<dyn FnOnce(EffectScope) -> anyhow::Result<Cleanup> + Send + 'static>),
    Async(Box<dyn FnOnce(EffectScope) -> EffectFuture + Send + 'static>),
}

impl EffectBody {
    pub(crate) fn sync<F>(body: F) -> Self
    where
        F: FnOnce(EffectScope) -> anyhow::Result<Cleanup> + Send + 'static,
    {
        EffectBody::Sync(Box::new(body))
    }

    pub(crate) fn future<F, Fut>(body: F) -> Self
    where
        F: FnOnce(EffectScope) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Cleanup>> + Send + 'static,
    {
        EffectBody::Async(Box::new(move |scope| Box::pin(body(scope))))
    }

    fn into_future(self, scope: EffectScope) -> EffectFuture {
        match self {
            EffectBody::Sync(body) => Box::pin(async move { body(scope) }),
            EffectBody::Async(body) => Box::pin(async move { body(scope).await }),
        }
    }
}

enum CleanupSlot {
    Running,
    Ready(Cleanup),
    Released,
}

struct EffectRun {
    cancel: CancelHandle,
    slot: Arc<Mutex<CleanupSlot>>,
}

impl EffectRun {
    fn spawn(instance: InstanceId, view: &'static str, body: EffectBody, runtime: &RuntimeHandle) -> Self {
        let cancel = CancelHandle::new();
        let slot = Arc::new(Mutex::new(CleanupSlot::Running));
        let scope = EffectScope {
            instance,
            cancel: cancel.clone(),
            runtime: runtime.clone(),
        };
        let future = body.into_future(scope);
        let task_slot = slot.clone();
        let task_runtime = runtime.clone();
        runtime.spawn_task(Box::pin(async move {
            let error = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(cleanup)) => {
                    let late = {
                        let mut slot = task_slot.lock();
                        match *slot {
                            CleanupSlot::Released => Some(cleanup),
                            _ => {
                                *slot = CleanupSlot::Ready(cleanup);
                                None
                            }
                        }
                    };
                    if let Some(cleanup) = late {
                        cleanup.run(instance, &task_runtime);
                    }
                    return;
                }
                Ok(Err(err)) => EffectError::Failed(format!("{err:#}")),
                Err(payload) => EffectError::Panicked(panic_message(payload)),
            };
            task_runtime.report(Fault::from_effect(&error).with_instance(instance, view));
        }));
        Self { cancel, slot }
    }

    fn release(self, instance: InstanceId, runtime: &RuntimeHandle) {
        self.cancel.cancel();
        let ready = match std::mem::replace(&mut *self.slot.lock(), CleanupSlot::Released) {
            CleanupSlot::Ready(cleanup) => Some(cleanup),
            CleanupSlot::Running | CleanupSlot::Released => None,
        };
        if let Some(cleanup) = ready {
            cleanup.run(instance, runtime);
        }
    }
}

struct EffectRecord {
    deps: Option<Deps>,
    mounted: bool,
    run: Option<EffectRun>,
}

/// An effect whose trigger fired during the current render. Committed only
/// if the render succeeds.
pub(crate) struct PendingEffect {
    index: usize,
    deps: Option<Deps>,
    body: EffectBody,
}

#[derive(Default)]
pub(crate) struct EffectRegistry {
    records: Vec<EffectRecord>,
}

impl EffectRegistry {
    /// Decides whether the effect at `index` should run for this render.
    pub(crate) fn schedule(
        &mut self,
        index: usize,
        trigger: EffectTrigger,
        body: EffectBody,
    ) -> Option<PendingEffect> {
        if index == self.records.len() {
            self.records.push(EffectRecord {
                deps: None,
                mounted: false,
                run: None,
            });
        }
        let record = &self.records[index];
        let (fire, deps) = match trigger {
            EffectTrigger::EveryRender => (true, None),
            EffectTrigger::OnMount => (!record.mounted, None),
            EffectTrigger::OnChange(deps) => {
                let changed = match &record.deps {
                    Some(previous) => deps.changed_from(previous),
                    None => true,
                };
                (changed, Some(deps))
            }
        };
        fire.then_some(PendingEffect { index, deps, body })
    }

    /// Runs the previous cleanup of each fired effect, then spawns its body.
    pub(crate) fn commit(
        &mut self,
        pending: Vec<PendingEffect>,
        instance: InstanceId,
        view: &'static str,
        runtime: &RuntimeHandle,
    ) {
        for effect in pending {
            let Some(record) = self.records.get_mut(effect.index) else {
                continue;
            };
            if let Some(previous) = record.run.take() {
                previous.release(instance, runtime);
            }
            if effect.deps.is_some() {
                record.deps = effect.deps;
            }
            record.mounted = true;
            record.run = Some(EffectRun::spawn(instance, view, effect.body, runtime));
        }
    }

    pub(crate) fn dispose(&mut self, instance: InstanceId, runtime: &RuntimeHandle) {
        for record in self.records.iter_mut() {
            if let Some(run) = record.run.take() {
                run.release(instance, runtime);
            }
        }
    }

    /// Effects that ran and still hold a cancellation scope.
    pub(crate) fn active_runs(&self) -> usize {
        self.records.iter().filter(|record| record.run.is_some()).count()
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
    }
}
