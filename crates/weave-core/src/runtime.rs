use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures_task::ArcWake;
use parking_lot::Mutex;

use crate::platform::RuntimeScheduler;
use crate::report::{ErrorReporter, Fault, LogReporter};
use crate::services::ServiceContainer;

struct RuntimeInner {
    scheduler: Arc<dyn RuntimeScheduler>,
    reporter: Arc<dyn ErrorReporter>,
    services: ServiceContainer,
    needs_render: AtomicBool,
}

impl RuntimeInner {
    fn schedule(&self) {
        self.needs_render.store(true, Ordering::SeqCst);
        self.scheduler.schedule_render();
    }
}

#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn new(scheduler: Arc<dyn RuntimeScheduler>) -> Self {
        Self::builder(scheduler).build()
    }

    pub fn builder(scheduler: Arc<dyn RuntimeScheduler>) -> RuntimeBuilder {
        RuntimeBuilder {
            scheduler,
            reporter: None,
            services: ServiceContainer::new(),
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle(Arc::downgrade(&self.inner))
    }

    pub fn needs_render(&self) -> bool {
        self.inner.needs_render.load(Ordering::SeqCst)
    }

    pub fn request_render(&self) {
        self.inner.schedule();
    }

    /// Consumes the outstanding render request, if any. Called at the start
    /// of a render pass so that invalidations raised during the pass request
    /// a follow-up pass.
    pub fn take_render_request(&self) -> bool {
        self.inner.needs_render.swap(false, Ordering::SeqCst)
    }

    pub fn services(&self) -> &ServiceContainer {
        &self.inner.services
    }

    pub fn reporter(&self) -> &Arc<dyn ErrorReporter> {
        &self.inner.reporter
    }

    pub fn report(&self, fault: Fault) {
        self.inner.reporter.report(&fault);
    }
}

pub struct RuntimeBuilder {
    scheduler: Arc<dyn RuntimeScheduler>,
    reporter: Option<Arc<dyn ErrorReporter>>,
    services: ServiceContainer,
}

impl RuntimeBuilder {
    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn service<T: Send + Sync + 'static>(self, service: T) -> Self {
        self.services.insert(service);
        self
    }

    pub fn service_arc<T: Send + Sync + 'static>(self, service: Arc<T>) -> Self {
        self.services.insert_arc(service);
        self
    }

    pub fn build(self) -> Runtime {
        Runtime {
            inner: Arc::new(RuntimeInner {
                scheduler: self.scheduler,
                reporter: self.reporter.unwrap_or_else(|| Arc::new(LogReporter)),
                services: self.services,
                needs_render: AtomicBool::new(false),
            }),
        }
    }
}

/// Weak handle held by state cells and effects. Every operation is a no-op
/// once the owning [`Runtime`] has been dropped.
#[derive(Clone)]
pub struct RuntimeHandle(Weak<RuntimeInner>);

impl RuntimeHandle {
    pub fn request_render(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.schedule();
        }
    }

    pub fn spawn_task(&self, task: BoxFuture<'static, ()>) {
        if let Some(inner) = self.0.upgrade() {
            inner.scheduler.spawn_task(task);
        }
    }

    pub fn report(&self, fault: Fault) {
        match self.0.upgrade() {
            Some(inner) => {
                inner.reporter.report(&fault);
            }
            None => log::warn!("{fault}"),
        }
    }

    pub fn service<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.0.upgrade().and_then(|inner| inner.services.get::<T>())
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

struct ManualTask {
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    woken: AtomicBool,
}

impl ArcWake for ManualTask {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.woken.store(true, Ordering::SeqCst);
    }
}

/// Deterministic scheduler for tests and single-threaded hosts. Effect tasks
/// only make progress inside [`ManualScheduler::run_until_stalled`].
#[derive(Default)]
pub struct ManualScheduler {
    render_requested: AtomicBool,
    render_requests: AtomicUsize,
    tasks: Mutex<Vec<Arc<ManualTask>>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_render_request(&self) -> bool {
        self.render_requested.swap(false, Ordering::SeqCst)
    }

    /// Total number of render requests seen, coalesced or not.
    pub fn render_requests(&self) -> usize {
        self.render_requests.load(Ordering::SeqCst)
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Polls woken tasks until none can make progress. Returns how many
    /// tasks completed.
    pub fn run_until_stalled(&self) -> usize {
        let mut completed = 0;
        loop {
            let ready: Vec<Arc<ManualTask>> = self
                .tasks
                .lock()
                .iter()
                .filter(|task| task.woken.swap(false, Ordering::SeqCst))
                .cloned()
                .collect();
            if ready.is_empty() {
                break;
            }
            for task in ready {
                let waker = futures_task::waker(task.clone());
                let mut cx = Context::from_waker(&waker);
                let mut slot = task.future.lock();
                if let Some(mut future) = slot.take() {
                    match Pin::new(&mut future).poll(&mut cx) {
                        Poll::Ready(()) => completed += 1,
                        Poll::Pending => *slot = Some(future),
                    }
                }
            }
            self.tasks.lock().retain(|task| task.future.lock().is_some());
        }
        completed
    }
}

impl RuntimeScheduler for ManualScheduler {
    fn schedule_render(&self) {
        self.render_requests.fetch_add(1, Ordering::SeqCst);
        self.render_requested.store(true, Ordering::SeqCst);
    }

    fn spawn_task(&self, task: BoxFuture<'static, ()>) {
        self.tasks.lock().push(Arc::new(ManualTask {
            future: Mutex::new(Some(task)),
            woken: AtomicBool::new(true),
        }));
    }
}
