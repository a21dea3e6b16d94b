//! `FixedPool`: default `WorkerPool` implementation.
//!
//! Spawns N OS threads at creation. The reactor appends tasks to a
//! bounded FIFO guarded by a `Locker` and posts a counting `Sem` once per
//! task; each worker waits on the semaphore, pops the front task under
//! the lock, and runs it with the lock released.
//!
//! Shutdown is explicit: intake closes, the caller waits on a `Cond`
//! until the queue is empty and no task is in flight, then every worker
//! is woken with the stop flag set and joined.

use mmhttpd_core::config::ServerConfig;
use mmhttpd_core::error::{HttpdError, Result, TrySubmitError};
use mmhttpd_core::sync::{Cond, Locker, Sem};
use mmhttpd_core::task::{Task, WorkerPool};
use mmhttpd_core::{kdebug, kerror, kinfo};

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Queue contents plus the bookkeeping the drain condition needs.
struct PoolState<T> {
    tasks: VecDeque<T>,
    /// Workers currently inside `Task::process`
    active: usize,
    /// Intake closed by `shutdown`
    closed: bool,
}

/// Shared state between the submitter and workers.
struct PoolInner<T> {
    queue: Locker<PoolState<T>>,
    /// One post per queued task, plus one per worker at stop
    queue_stat: Sem,
    /// Broadcast when the queue empties with no task in flight
    idle: Cond,
    /// Workers exit on their next wakeup
    stop: AtomicBool,
    max_requests: usize,
    total: usize,
}

pub struct FixedPool<T: Task> {
    inner: Arc<PoolInner<T>>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl<T: Task> FixedPool<T> {
    /// Create a pool with `n` workers.
    ///
    /// `max_requests`: max pending tasks before `submit` rejects.
    pub fn new(n: usize, max_requests: usize) -> Result<Self> {
        if n == 0 {
            return Err(HttpdError::InvalidConfig("pool needs at least one worker"));
        }
        if max_requests == 0 {
            return Err(HttpdError::InvalidConfig("pool queue capacity must be positive"));
        }

        let inner = Arc::new(PoolInner {
            queue: Locker::new(PoolState {
                tasks: VecDeque::with_capacity(max_requests.min(1024)),
                active: 0,
                closed: false,
            })?,
            queue_stat: Sem::new(0)?,
            idle: Cond::new()?,
            stop: AtomicBool::new(false),
            max_requests,
            total: n,
        });

        let mut pool = FixedPool {
            inner,
            handles: Vec::with_capacity(n),
        };
        for worker_id in 0..n {
            let inner = Arc::clone(&pool.inner);
            let spawned = thread::Builder::new()
                .name(format!("mmhttpd-worker-{}", worker_id))
                .spawn(move || worker_loop(inner, worker_id));
            match spawned {
                Ok(handle) => {
                    kinfo!("created worker {}", worker_id);
                    pool.handles.push(handle);
                }
                Err(e) => {
                    kerror!("failed to spawn worker {}: {}", worker_id, e);
                    let _ = pool.shutdown();
                    return Err(HttpdError::Spawn);
                }
            }
        }
        Ok(pool)
    }

    /// Pool sized by `workers` and `max_requests`.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Self::new(config.workers, config.max_requests)
    }

    /// Queue capacity.
    pub fn capacity(&self) -> usize {
        self.inner.max_requests
    }
}

impl<T: Task> WorkerPool<T> for FixedPool<T> {
    fn submit(&self, task: T) -> std::result::Result<(), TrySubmitError<T>> {
        {
            let mut state = match self.inner.queue.lock() {
                Ok(guard) => guard,
                Err(e) => {
                    kerror!("task queue lock failed: {}", e);
                    return Err(TrySubmitError::Stopped(task));
                }
            };
            if state.closed {
                return Err(TrySubmitError::Stopped(task));
            }
            if state.tasks.len() >= self.inner.max_requests {
                return Err(TrySubmitError::Full(task));
            }
            state.tasks.push_back(task);
        }
        if let Err(e) = self.inner.queue_stat.post() {
            kerror!("task queue post failed: {}", e);
        }
        Ok(())
    }

    fn queued(&self) -> usize {
        self.inner.queue.lock().map(|s| s.tasks.len()).unwrap_or(0)
    }

    fn active_workers(&self) -> usize {
        self.inner.queue.lock().map(|s| s.active).unwrap_or(0)
    }

    fn total_workers(&self) -> usize {
        self.inner.total
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.handles.is_empty() {
            return Ok(());
        }

        {
            let mut state = self.inner.queue.lock()?;
            state.closed = true;
            let _drained = self
                .inner
                .idle
                .wait_while(state, |s| !s.tasks.is_empty() || s.active > 0)?;
        }

        self.inner.stop.store(true, Ordering::Release);
        for _ in 0..self.handles.len() {
            self.inner.queue_stat.post()?;
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                kerror!("worker thread panicked during shutdown");
            }
        }
        kdebug!("worker pool stopped");
        Ok(())
    }
}

impl<T: Task> Drop for FixedPool<T> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            kerror!("worker pool shutdown failed: {}", e);
        }
    }
}

/// Worker thread main loop.
fn worker_loop<T: Task>(inner: Arc<PoolInner<T>>, worker_id: usize) {
    loop {
        if let Err(e) = inner.queue_stat.wait() {
            kerror!("worker {}: semaphore wait failed: {}", worker_id, e);
            break;
        }
        if inner.stop.load(Ordering::Acquire) {
            break;
        }

        let task = match inner.queue.lock() {
            Ok(mut state) => {
                let task = state.tasks.pop_front();
                if task.is_some() {
                    state.active += 1;
                }
                task
            }
            Err(e) => {
                kerror!("worker {}: queue lock failed: {}", worker_id, e);
                break;
            }
        };
        // Woken with nothing to pop; another worker got there first.
        let Some(task) = task else { continue };

        if panic::catch_unwind(AssertUnwindSafe(|| task.process())).is_err() {
            kerror!("worker {}: task panicked", worker_id);
        }

        match inner.queue.lock() {
            Ok(mut state) => {
                state.active -= 1;
                if state.tasks.is_empty() && state.active == 0 {
                    // only shutdown waits on idle
                    let _ = inner.idle.signal();
                }
            }
            Err(e) => {
                kerror!("worker {}: queue lock failed: {}", worker_id, e);
                break;
            }
        }
    }
    kdebug!("worker {} exiting", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    enum TestTask {
        Count { hits: Arc<Vec<AtomicUsize>>, id: usize },
        Gate(mpsc::Receiver<()>),
    }

    impl Task for TestTask {
        fn process(self) {
            match self {
                TestTask::Count { hits, id } => {
                    hits[id].fetch_add(1, Ordering::SeqCst);
                }
                TestTask::Gate(rx) => {
                    let _ = rx.recv();
                }
            }
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_rejects_zero_sizes() {
        assert!(FixedPool::<TestTask>::new(0, 4).is_err());
        assert!(FixedPool::<TestTask>::new(2, 0).is_err());
    }

    #[test]
    fn test_full_queue_rejects_without_blocking() {
        let mut pool = FixedPool::new(1, 2).unwrap();
        let hits = Arc::new((0..3).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>());

        // Park the only worker so queued tasks stay queued.
        let (gate_tx, gate_rx) = mpsc::channel();
        pool.submit(TestTask::Gate(gate_rx)).ok().unwrap();
        wait_for(|| pool.active_workers() == 1);

        for id in 0..2 {
            assert!(pool.submit(TestTask::Count { hits: Arc::clone(&hits), id }).is_ok());
        }
        assert_eq!(pool.queued(), 2);

        let rejected = pool.submit(TestTask::Count { hits: Arc::clone(&hits), id: 2 });
        match rejected {
            Err(e) => {
                assert!(e.is_full());
                assert!(matches!(e.into_inner(), TestTask::Count { id: 2, .. }));
            }
            Ok(()) => panic!("submit beyond capacity must fail"),
        }
        assert_eq!(pool.queued(), 2);

        gate_tx.send(()).unwrap();
        pool.shutdown().unwrap();

        assert_eq!(hits[0].load(Ordering::SeqCst), 1);
        assert_eq!(hits[1].load(Ordering::SeqCst), 1);
        assert_eq!(hits[2].load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_every_task_runs_exactly_once() {
        const N: usize = 2000;
        let mut pool = FixedPool::new(4, N).unwrap();
        assert_eq!(pool.total_workers(), 4);
        let hits = Arc::new((0..N).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>());

        for id in 0..N {
            assert!(pool.submit(TestTask::Count { hits: Arc::clone(&hits), id }).is_ok());
        }
        pool.shutdown().unwrap();

        assert!(hits.iter().all(|h| h.load(Ordering::SeqCst) == 1));
        assert_eq!(pool.queued(), 0);
    }

    #[test]
    fn test_submit_after_shutdown_is_stopped() {
        let mut pool = FixedPool::new(2, 8).unwrap();
        pool.shutdown().unwrap();
        // idempotent
        pool.shutdown().unwrap();

        let hits = Arc::new(vec![AtomicUsize::new(0)]);
        match pool.submit(TestTask::Count { hits, id: 0 }) {
            Err(TrySubmitError::Stopped(_)) => {}
            _ => panic!("stopped pool must reject"),
        }
    }

    #[test]
    fn test_shutdown_waits_for_in_flight_work() {
        let mut pool = FixedPool::new(1, 4).unwrap();
        let (gate_tx, gate_rx) = mpsc::channel();
        pool.submit(TestTask::Gate(gate_rx)).ok().unwrap();
        wait_for(|| pool.active_workers() == 1);

        let opener = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            gate_tx.send(()).unwrap();
        });
        let start = Instant::now();
        pool.shutdown().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(pool.active_workers(), 0);
        opener.join().unwrap();
    }
}
