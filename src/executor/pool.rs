//! Thread pool for running propagated work.
//!
//! - **Capacity management**: configurable min/max threads with dynamic scaling
//! - **Fairness**: FIFO ordering
//! - **Shutdown**: graceful shutdown with bounded drain timeout
//!
//! ## Thread Lifecycle
//!
//! `min_threads` workers are spawned eagerly. A submission spawns another
//! worker (up to `max_threads`) whenever queued work outnumbers idle
//! workers, so a task that blocks on a sibling submitted to the same pool
//! does not starve it while capacity remains. Workers above `min_threads`
//! retire after `idle_timeout` without work.
//!
//! ## Shutdown
//!
//! After [`ThreadPool::shutdown`] new submissions are rejected; queued work
//! still runs before the workers exit.

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{Executor, Runnable};
use crate::error::{panic_message, Error, Result};
use crate::tracing_compat::{debug, error, trace, warn};

/// Default idle timeout before retiring excess threads.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration options for the pool.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Idle timeout before retiring excess threads.
    pub idle_timeout: Duration,
    /// Thread name prefix.
    pub thread_name_prefix: String,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_name_prefix: "strand".to_string(),
        }
    }
}

struct PoolInner {
    min_threads: usize,
    max_threads: usize,
    /// Threads that have been spawned and not yet exited.
    active_threads: AtomicUsize,
    /// Threads currently running a task.
    busy_threads: AtomicUsize,
    /// Tasks in the queue.
    pending_count: AtomicUsize,
    /// Monotonic counter for thread names.
    spawned_total: AtomicUsize,
    queue: SegQueue<Runnable>,
    shutdown: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
    idle_timeout: Duration,
    thread_name_prefix: String,
    thread_handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Owning handle to a thread pool. Dropping it shuts the pool down.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

/// A cloneable handle that submits to a pool without owning it.
#[derive(Clone)]
pub struct PoolHandle {
    inner: Arc<PoolInner>,
}

enum WorkerExit {
    Retired,
    Shutdown,
}

impl ThreadPool {
    /// Creates a pool with the given thread limits and default options.
    ///
    /// `max_threads` is raised to at least 1 and to at least `min_threads`.
    #[must_use]
    pub fn new(min_threads: usize, max_threads: usize) -> Self {
        Self::with_options(min_threads, max_threads, PoolOptions::default())
    }

    /// Creates a pool with custom options.
    #[must_use]
    pub fn with_options(min_threads: usize, max_threads: usize, options: PoolOptions) -> Self {
        let max_threads = max_threads.max(min_threads).max(1);
        let inner = Arc::new(PoolInner {
            min_threads,
            max_threads,
            active_threads: AtomicUsize::new(0),
            busy_threads: AtomicUsize::new(0),
            pending_count: AtomicUsize::new(0),
            spawned_total: AtomicUsize::new(0),
            queue: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
            idle_timeout: options.idle_timeout,
            thread_name_prefix: options.thread_name_prefix,
            thread_handles: Mutex::new(Vec::with_capacity(max_threads)),
        });

        for _ in 0..min_threads {
            if let Err(e) = spawn_thread(&inner) {
                warn!(error = %e, "failed to spawn eager pool worker");
            }
        }
        debug!(min_threads, max_threads, "thread pool started");

        Self { inner }
    }

    /// Returns a cloneable submission handle.
    #[must_use]
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending_count.load(Ordering::Relaxed)
    }

    /// Number of live worker threads.
    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.inner.active_threads.load(Ordering::Relaxed)
    }

    /// Number of workers currently running a task.
    #[must_use]
    pub fn busy_threads(&self) -> usize {
        self.inner.busy_threads.load(Ordering::Relaxed)
    }

    /// Returns `true` if the pool is shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Stops accepting work. Queued tasks still run.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.swap(true, Ordering::AcqRel) {
            debug!("thread pool shutting down");
        }
        notify_all(&self.inner);
    }

    /// Shuts down and waits for every worker to exit.
    ///
    /// Returns `true` if all threads exited before `timeout`.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();
        let deadline = Instant::now() + timeout;

        while self.inner.active_threads.load(Ordering::Acquire) > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            notify_all(&self.inner);
            thread::sleep(Duration::from_millis(5).min(remaining));
        }

        let current = thread::current().id();
        for handle in self.inner.thread_handles.lock().drain(..) {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        true
    }
}

impl Executor for ThreadPool {
    fn execute(&self, task: Runnable) -> Result<()> {
        submit(&self.inner, task)
    }
}

impl Executor for PoolHandle {
    fn execute(&self, task: Runnable) -> Result<()> {
        submit(&self.inner, task)
    }
}

impl PoolHandle {
    /// Returns `true` if the pool is shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        let _ = self.shutdown_and_wait(Duration::from_secs(5));
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("min_threads", &self.inner.min_threads)
            .field("max_threads", &self.inner.max_threads)
            .field("active_threads", &self.active_threads())
            .field("pending_tasks", &self.pending_count())
            .finish()
    }
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("active_threads", &self.inner.active_threads.load(Ordering::Relaxed))
            .field("pending_tasks", &self.inner.pending_count.load(Ordering::Relaxed))
            .finish()
    }
}

fn submit(inner: &Arc<PoolInner>, task: Runnable) -> Result<()> {
    if inner.shutdown.load(Ordering::Acquire) {
        return Err(Error::rejected("thread pool is shut down"));
    }
    inner.queue.push(task);
    inner.pending_count.fetch_add(1, Ordering::AcqRel);
    maybe_spawn_thread(inner);

    let _guard = inner.mutex.lock();
    inner.condvar.notify_one();
    Ok(())
}

fn notify_all(inner: &PoolInner) {
    let _guard = inner.mutex.lock();
    inner.condvar.notify_all();
}

fn spawn_thread(inner: &Arc<PoolInner>) -> std::io::Result<()> {
    let worker = Arc::clone(inner);
    let n = inner.spawned_total.fetch_add(1, Ordering::Relaxed);
    let name = format!("{}-pool-{n}", inner.thread_name_prefix);

    inner.active_threads.fetch_add(1, Ordering::AcqRel);
    let spawned = thread::Builder::new().name(name).spawn(move || {
        if let WorkerExit::Shutdown = worker_loop(&worker) {
            worker.active_threads.fetch_sub(1, Ordering::AcqRel);
        }
    });
    match spawned {
        Ok(handle) => {
            inner.thread_handles.lock().push(handle);
            Ok(())
        }
        Err(e) => {
            inner.active_threads.fetch_sub(1, Ordering::AcqRel);
            Err(e)
        }
    }
}

/// Spawns a worker when queued work outnumbers idle workers.
fn maybe_spawn_thread(inner: &Arc<PoolInner>) {
    let active = inner.active_threads.load(Ordering::Acquire);
    let busy = inner.busy_threads.load(Ordering::Acquire);
    let pending = inner.pending_count.load(Ordering::Acquire);
    let idle = active.saturating_sub(busy);

    if active < inner.max_threads && pending > idle {
        if let Err(e) = spawn_thread(inner) {
            error!(error = %e, active, "failed to spawn pool worker");
        }
    }
}

/// Leaves the pool if that keeps it at or above `min_threads`.
fn try_retire(inner: &PoolInner) -> bool {
    let mut active = inner.active_threads.load(Ordering::Acquire);
    while active > inner.min_threads {
        match inner.active_threads.compare_exchange_weak(
            active,
            active - 1,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => return true,
            Err(actual) => active = actual,
        }
    }
    false
}

fn worker_loop(inner: &PoolInner) -> WorkerExit {
    loop {
        if let Some(task) = inner.queue.pop() {
            // Count busy before un-counting pending so the spawn heuristic
            // never sees this task as nowhere.
            inner.busy_threads.fetch_add(1, Ordering::AcqRel);
            inner.pending_count.fetch_sub(1, Ordering::AcqRel);
            if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                error!(panic = %panic_message(&*payload), "pool task panicked");
            }
            inner.busy_threads.fetch_sub(1, Ordering::AcqRel);
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            return WorkerExit::Shutdown;
        }

        let mut guard = inner.mutex.lock();
        // Re-check under the lock: submitters notify while holding it.
        if !inner.queue.is_empty() || inner.shutdown.load(Ordering::Acquire) {
            continue;
        }
        if inner.active_threads.load(Ordering::Acquire) > inner.min_threads {
            let timed_out = inner
                .condvar
                .wait_for(&mut guard, inner.idle_timeout)
                .timed_out();
            drop(guard);
            if timed_out && inner.queue.is_empty() && try_retire(inner) {
                trace!("idle pool worker retired");
                return WorkerExit::Retired;
            }
        } else {
            inner.condvar.wait(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::wait_until;
    use std::sync::atomic::AtomicI32;
    use std::sync::mpsc;

    fn boxed(f: impl FnOnce() + Send + 'static) -> Runnable {
        Box::new(f)
    }

    #[test]
    fn runs_tasks() {
        let pool = ThreadPool::new(2, 8);
        let counter = Arc::new(AtomicI32::new(0));
        for _ in 0..100 {
            let c = Arc::clone(&counter);
            pool.execute(boxed(move || {
                c.fetch_add(1, Ordering::Relaxed);
            }))
            .expect("submit");
        }
        assert!(wait_until(Duration::from_secs(5), || {
            counter.load(Ordering::Relaxed) == 100
        }));
    }

    #[test]
    fn active_threads_starts_at_min() {
        let pool = ThreadPool::new(3, 8);
        assert_eq!(pool.active_threads(), 3);
    }

    #[test]
    fn grows_when_task_blocks_on_sibling() {
        let pool = ThreadPool::new(1, 4);
        let handle = pool.handle();
        let (tx, rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        pool.execute(boxed(move || {
            // Waits for a sibling that can only run on another worker.
            let got = rx.recv_timeout(Duration::from_secs(5)).ok();
            let _ = done_tx.send(got);
        }))
        .expect("submit");
        handle
            .execute(boxed(move || {
                let _ = tx.send(7);
            }))
            .expect("submit");
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).ok(), Some(Some(7)));
    }

    #[test]
    fn rejects_after_shutdown() {
        let pool = ThreadPool::new(1, 1);
        pool.shutdown();
        let err = pool.execute(boxed(|| {})).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Rejected);
        assert!(pool.handle().is_shutdown());
    }

    #[test]
    fn queued_work_drains_on_shutdown() {
        let pool = ThreadPool::new(1, 1);
        let counter = Arc::new(AtomicI32::new(0));
        for _ in 0..10 {
            let c = Arc::clone(&counter);
            pool.execute(boxed(move || {
                thread::sleep(Duration::from_millis(1));
                c.fetch_add(1, Ordering::Relaxed);
            }))
            .expect("submit");
        }
        assert!(pool.shutdown_and_wait(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::Relaxed), 10);
        assert_eq!(pool.active_threads(), 0);
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let pool = ThreadPool::new(1, 1);
        pool.execute(boxed(|| panic!("task panic"))).expect("submit");
        let (tx, rx) = mpsc::channel();
        pool.execute(boxed(move || {
            let _ = tx.send(());
        }))
        .expect("submit");
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert_eq!(pool.active_threads(), 1);
    }

    #[test]
    fn idle_workers_retire_to_min() {
        let options = PoolOptions {
            idle_timeout: Duration::from_millis(20),
            ..PoolOptions::default()
        };
        let pool = ThreadPool::with_options(0, 4, options);
        let (tx, rx) = mpsc::channel();
        for _ in 0..4 {
            let tx = tx.clone();
            pool.execute(boxed(move || {
                thread::sleep(Duration::from_millis(10));
                let _ = tx.send(());
            }))
            .expect("submit");
        }
        for _ in 0..4 {
            rx.recv_timeout(Duration::from_secs(5)).expect("ran");
        }
        assert!(wait_until(Duration::from_secs(5), || pool.active_threads() == 0));
    }
}
