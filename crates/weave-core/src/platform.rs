//! Platform abstraction traits for the view runtime.
//!
//! The runtime never spawns threads or owns an executor itself. Hosts hand it
//! a [`RuntimeScheduler`] that decides where effect tasks run and how a
//! render request reaches the loop that owns the view tree.

use futures::future::BoxFuture;

/// Schedules work for the view runtime.
///
/// Implementations must be safe to use from multiple threads: state cells
/// are written from effect tasks and event handlers alike.
pub trait RuntimeScheduler: Send + Sync {
    /// Request that the host run a render pass soon.
    ///
    /// Requests that arrive while one is already outstanding should be
    /// coalesced into a single pass.
    fn schedule_render(&self);

    /// Spawn an effect task.
    ///
    /// The task must not be polled on the thread currently running a render
    /// pass before that pass returns.
    fn spawn_task(&self, task: BoxFuture<'static, ()>);
}
