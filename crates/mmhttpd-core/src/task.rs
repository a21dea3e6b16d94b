//! Worker pool abstraction.
//!
//! A `WorkerPool` runs `Task`s on a fixed set of long-lived threads.
//! The reactor is the producer; pool workers are the consumers.
//!
//! # Implementors
//!
//! - `FixedPool` (mmhttpd-module): N OS threads, bounded FIFO under a
//!   `Locker`, woken through a counting `Sem`.

use crate::error::{Result, TrySubmitError};

/// A unit of work executed exactly once by exactly one worker.
pub trait Task: Send + 'static {
    /// Processing entry point, called on a worker thread.
    fn process(self);
}

/// Executes tasks on a pool of threads.
///
/// **Contract:**
/// - `submit()` must NEVER block the caller. A full queue hands the task
///   back as `TrySubmitError::Full` so the caller can retry it later.
/// - Each accepted task is processed exactly once, by one worker.
/// - `shutdown()` stops intake, lets queued and in-flight tasks finish,
///   then joins every worker thread.
pub trait WorkerPool<T: Task>: Send + Sync {
    /// Enqueue a task if capacity allows.
    fn submit(&self, task: T) -> std::result::Result<(), TrySubmitError<T>>;

    /// Tasks waiting in the queue (snapshot).
    fn queued(&self) -> usize;

    /// Workers currently inside `Task::process` (snapshot).
    fn active_workers(&self) -> usize;

    /// Total number of worker threads.
    fn total_workers(&self) -> usize;

    /// Drain, stop, and join. Idempotent.
    fn shutdown(&mut self) -> Result<()>;
}
