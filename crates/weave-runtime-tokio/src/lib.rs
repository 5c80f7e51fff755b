//! Tokio runtime services for weave.
//!
//! This crate provides a concrete implementation of the
//! [`RuntimeScheduler`] trait defined in `weave-core`. Effect tasks are
//! spawned onto a tokio runtime and render requests are forwarded to a
//! waker installed by the host, typically a closure that pokes the loop
//! owning the view tree.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::runtime::{Handle, TryCurrentError};

use weave_core::{Runtime, RuntimeBuilder, RuntimeHandle, RuntimeScheduler};

type RenderWaker = Arc<dyn Fn() + Send + Sync + 'static>;

/// Scheduler that spawns effect tasks on tokio.
pub struct TokioScheduler {
    handle: Handle,
    render_requested: AtomicBool,
    render_waker: RwLock<Option<RenderWaker>>,
    spawned: AtomicU64,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            render_requested: AtomicBool::new(false),
            render_waker: RwLock::new(None),
            spawned: AtomicU64::new(0),
        }
    }

    /// Uses the runtime of the calling task.
    pub fn current() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self::new)
    }

    /// Returns whether a render has been requested since the last call.
    pub fn take_render_request(&self) -> bool {
        self.render_requested.swap(false, Ordering::SeqCst)
    }

    /// Registers a waker invoked when a render is requested while none is
    /// outstanding.
    pub fn set_render_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        *self.render_waker.write() = Some(Arc::new(waker));
    }

    pub fn clear_render_waker(&self) {
        *self.render_waker.write() = None;
    }

    /// Number of effect tasks spawned so far.
    pub fn spawned_tasks(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    fn wake(&self) {
        let waker = self.render_waker.read().clone();
        if let Some(waker) = waker {
            waker();
        }
    }
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field(
                "render_requested",
                &self.render_requested.load(Ordering::SeqCst),
            )
            .field("spawned", &self.spawned.load(Ordering::Relaxed))
            .finish()
    }
}

impl RuntimeScheduler for TokioScheduler {
    fn schedule_render(&self) {
        if !self.render_requested.swap(true, Ordering::SeqCst) {
            self.wake();
        }
    }

    fn spawn_task(&self, task: BoxFuture<'static, ()>) {
        self.spawned.fetch_add(1, Ordering::Relaxed);
        self.handle.spawn(task);
    }
}

/// Convenience container bundling the tokio scheduler and a runtime.
#[derive(Clone)]
pub struct TokioRuntime {
    scheduler: Arc<TokioScheduler>,
    runtime: Runtime,
}

impl TokioRuntime {
    /// Creates a runtime on the calling task's tokio runtime.
    pub fn current() -> Result<Self, TryCurrentError> {
        Ok(Self::with_scheduler(Arc::new(TokioScheduler::current()?), |builder| builder))
    }

    /// Creates a runtime from `scheduler`, letting the caller register
    /// services and a reporter first.
    pub fn with_scheduler(
        scheduler: Arc<TokioScheduler>,
        configure: impl FnOnce(RuntimeBuilder) -> RuntimeBuilder,
    ) -> Self {
        let runtime = configure(Runtime::builder(scheduler.clone())).build();
        Self { scheduler, runtime }
    }

    /// Returns a [`weave_core::Runtime`] driven by the tokio scheduler.
    pub fn runtime(&self) -> Runtime {
        self.runtime.clone()
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    pub fn scheduler(&self) -> Arc<TokioScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Returns whether a render was requested since the last poll.
    pub fn take_render_request(&self) -> bool {
        self.scheduler.take_render_request()
    }

    /// Registers a waker to be called when the runtime requests a render.
    pub fn set_render_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        self.scheduler.set_render_waker(waker);
    }

    pub fn clear_render_waker(&self) {
        self.scheduler.clear_render_waker();
    }
}

impl fmt::Debug for TokioRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioRuntime")
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
