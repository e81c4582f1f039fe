//! Bounded background dispatcher for trigger callbacks
//!
//! A FIFO task queue drained by a fixed pool of worker threads. Submission
//! never blocks: when the queue is full the task is rejected and the caller
//! drops it. Tasks run at most once; a panicking task is logged and does not
//! take its worker down.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use storekit_core::{StoreError, StoreResult};
use tracing::{error, info};

/// Error returned when the queue is full or the dispatcher is shut down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

impl std::fmt::Display for QueueFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "trigger queue is full")
    }
}

impl std::error::Error for QueueFull {}

/// Dispatcher metrics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Tasks waiting in the queue
    pub queue_depth: usize,
    /// Tasks currently running
    pub active_tasks: usize,
    /// Tasks finished (including panicked ones)
    pub tasks_completed: u64,
    /// Tasks rejected because the queue was full
    pub tasks_dropped: u64,
    /// Worker threads
    pub worker_count: usize,
}

type Task = Box<dyn FnOnce() + Send>;

struct DispatcherInner {
    queue: Mutex<VecDeque<Task>>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    active_tasks: AtomicUsize,
    max_queue_depth: usize,
    tasks_completed: AtomicU64,
    tasks_dropped: AtomicU64,
}

/// Fixed pool of workers draining a bounded FIFO queue
pub struct TriggerDispatcher {
    inner: Arc<DispatcherInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl std::fmt::Debug for TriggerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerDispatcher")
            .field("stats", &self.stats())
            .finish()
    }
}

impl TriggerDispatcher {
    /// Start `num_threads` workers over a queue of at most `max_queue_depth`
    ///
    /// Workers are named `storekit-trigger-0`, `storekit-trigger-1`, etc.
    ///
    /// # Errors
    ///
    /// Returns `Config` if a worker thread cannot be spawned.
    pub fn new(num_threads: usize, max_queue_depth: usize) -> StoreResult<Self> {
        let inner = Arc::new(DispatcherInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            active_tasks: AtomicUsize::new(0),
            max_queue_depth,
            tasks_completed: AtomicU64::new(0),
            tasks_dropped: AtomicU64::new(0),
        });

        let dispatcher = Self {
            inner,
            workers: Mutex::new(Vec::with_capacity(num_threads)),
            num_threads,
        };
        for i in 0..num_threads {
            let inner = Arc::clone(&dispatcher.inner);
            let handle = std::thread::Builder::new()
                .name(format!("storekit-trigger-{}", i))
                .spawn(move || worker_loop(&inner))
                .map_err(|e| {
                    dispatcher.shutdown();
                    StoreError::config(format!("failed to spawn trigger worker: {}", e))
                })?;
            dispatcher.workers.lock().push(handle);
        }
        info!(
            target: "storekit::trigger",
            workers = num_threads,
            queue_depth = max_queue_depth,
            "trigger dispatcher started"
        );
        Ok(dispatcher)
    }

    /// Queue `work`
    ///
    /// Returns `Err(QueueFull)` if the queue is at capacity or the dispatcher
    /// has been shut down; the task is dropped.
    pub fn submit(&self, work: impl FnOnce() + Send + 'static) -> Result<(), QueueFull> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            self.inner.tasks_dropped.fetch_add(1, Ordering::Relaxed);
            return Err(QueueFull);
        }
        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.max_queue_depth {
                self.inner.tasks_dropped.fetch_add(1, Ordering::Relaxed);
                return Err(QueueFull);
            }
            queue.push_back(Box::new(work));
        }
        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Block until every queued and running task has finished
    ///
    /// Workers keep running afterwards.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while !queue.is_empty() || self.inner.active_tasks.load(Ordering::Acquire) > 0 {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    /// Stop accepting tasks, let workers finish the queue, and join them
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            // Held so a worker between its shutdown check and wait() sees the notify
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }
        let mut workers = self.workers.lock();
        let joined = workers.len();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        if joined > 0 {
            info!(target: "storekit::trigger", workers = joined, "trigger dispatcher stopped");
        }
    }

    /// Metrics snapshot
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            queue_depth: self.inner.queue.lock().len(),
            active_tasks: self.inner.active_tasks.load(Ordering::Relaxed),
            tasks_completed: self.inner.tasks_completed.load(Ordering::Relaxed),
            tasks_dropped: self.inner.tasks_dropped.load(Ordering::Relaxed),
            worker_count: self.num_threads,
        }
    }
}

impl Drop for TriggerDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decrements `active_tasks` and wakes drain waiters, even if the task panicked
struct ActiveTaskGuard<'a> {
    inner: &'a DispatcherInner,
}

impl Drop for ActiveTaskGuard<'_> {
    fn drop(&mut self) {
        let prev_active = self.inner.active_tasks.fetch_sub(1, Ordering::Release);
        self.inner.tasks_completed.fetch_add(1, Ordering::Relaxed);
        if prev_active == 1 {
            let queue = self.inner.queue.lock();
            if queue.is_empty() {
                self.inner.drain_cond.notify_all();
            }
        }
    }
}

fn worker_loop(inner: &DispatcherInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    inner.active_tasks.fetch_add(1, Ordering::Release);
                    break task;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveTaskGuard { inner };
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            let message = e
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| e.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "(non-string panic)".to_string());
            error!(target: "storekit::trigger", panic = %message, "trigger callback panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Duration;

    #[test]
    fn test_submit_and_drain() {
        let dispatcher = TriggerDispatcher::new(2, 64).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let c = Arc::clone(&counter);
            dispatcher
                .submit(move || {
                    c.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
        }
        dispatcher.drain();
        assert_eq!(counter.load(Ordering::Relaxed), 10);
        assert_eq!(dispatcher.stats().tasks_completed, 10);
    }

    #[test]
    fn test_fifo_with_one_worker() {
        let dispatcher = TriggerDispatcher::new(1, 64).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let o = Arc::clone(&order);
            dispatcher.submit(move || o.lock().push(i)).unwrap();
        }
        dispatcher.drain();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_full_queue_drops() {
        let dispatcher = TriggerDispatcher::new(1, 2).unwrap();
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        dispatcher.submit(move || {
            b.wait();
        })
        .unwrap();
        // Let the worker pick up the blocking task
        std::thread::sleep(Duration::from_millis(50));

        dispatcher.submit(|| {}).unwrap();
        dispatcher.submit(|| {}).unwrap();
        assert_eq!(dispatcher.submit(|| {}), Err(QueueFull));
        assert_eq!(dispatcher.stats().tasks_dropped, 1);

        barrier.wait();
        dispatcher.drain();
        assert_eq!(dispatcher.stats().tasks_completed, 3);
    }

    #[test]
    fn test_panic_does_not_hang_drain() {
        let dispatcher = TriggerDispatcher::new(1, 8).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        dispatcher.submit(|| panic!("boom")).unwrap();
        let c = Arc::clone(&counter);
        dispatcher
            .submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        dispatcher.drain();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert_eq!(dispatcher.stats().active_tasks, 0);
    }

    #[test]
    fn test_shutdown_runs_queue_and_rejects_after() {
        let dispatcher = TriggerDispatcher::new(1, 64).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let c = Arc::clone(&counter);
            dispatcher
                .submit(move || {
                    c.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
        }
        dispatcher.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 20);
        assert_eq!(dispatcher.submit(|| {}), Err(QueueFull));
        dispatcher.shutdown();
    }

    #[test]
    fn test_drain_when_idle_returns() {
        let dispatcher = TriggerDispatcher::new(2, 8).unwrap();
        dispatcher.drain();
        assert_eq!(dispatcher.stats().worker_count, 2);
    }
}
