//! Parallelism cap layered on another executor.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;

use super::{Executor, Runnable};
use crate::error::Result;
use crate::tracing_compat::warn;

/// Runs at most `max_parallel` tasks at a time on `backend`, queueing the
/// rest in FIFO order.
pub struct BoundedExecutor<E> {
    inner: Arc<Inner<E>>,
}

struct Inner<E> {
    backend: E,
    queue: SegQueue<Runnable>,
    running: AtomicUsize,
    max_parallel: usize,
}

impl<E: Executor + 'static> BoundedExecutor<E> {
    /// Caps `backend` at `max_parallel` concurrent tasks (at least one).
    pub fn new(backend: E, max_parallel: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                queue: SegQueue::new(),
                running: AtomicUsize::new(0),
                max_parallel: max_parallel.max(1),
            }),
        }
    }

    /// Tasks waiting for a slot.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Tasks currently handed to the backend.
    #[must_use]
    pub fn running(&self) -> usize {
        self.inner.running.load(Ordering::Acquire)
    }

    /// The configured cap.
    #[must_use]
    pub fn max_parallel(&self) -> usize {
        self.inner.max_parallel
    }
}

impl<E: Executor + 'static> Inner<E> {
    fn try_acquire(&self) -> bool {
        let mut current = self.running.load(Ordering::Acquire);
        loop {
            if current >= self.max_parallel {
                return false;
            }
            match self.running.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn drain(self: &Arc<Self>) {
        while !self.queue.is_empty() && self.try_acquire() {
            let permit = Permit(Arc::clone(self));
            let Some(task) = self.queue.pop() else {
                // Another drainer took it; the permit's drop re-checks.
                return;
            };
            let wrapped: Runnable = Box::new(move || {
                let _permit = permit;
                task();
            });
            if let Err(err) = self.backend.execute(wrapped) {
                warn!(error = %err, "bounded executor backend refused task");
            }
        }
    }
}

/// A running slot, released (and the queue drained again) on drop.
struct Permit<E: Executor + 'static>(Arc<Inner<E>>);

impl<E: Executor + 'static> Drop for Permit<E> {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::AcqRel);
        self.0.drain();
    }
}

impl<E: Executor + 'static> Executor for BoundedExecutor<E> {
    fn execute(&self, task: Runnable) -> Result<()> {
        self.inner.queue.push(task);
        self.inner.drain();
        Ok(())
    }
}

impl<E> Clone for BoundedExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> fmt::Debug for BoundedExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedExecutor")
            .field("max_parallel", &self.inner.max_parallel)
            .field("running", &self.inner.running.load(Ordering::Relaxed))
            .field("queued", &self.inner.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ThreadPerTask;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn never_exceeds_cap() {
        let exec = BoundedExecutor::new(ThreadPerTask::default(), 2);
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        for _ in 0..10 {
            let live = Arc::clone(&live);
            let peak = Arc::clone(&peak);
            let tx = tx.clone();
            exec.execute(Box::new(move || {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(5));
                live.fetch_sub(1, Ordering::SeqCst);
                let _ = tx.send(());
            }))
            .expect("queued");
        }
        for _ in 0..10 {
            rx.recv_timeout(Duration::from_secs(5)).expect("task ran");
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn zero_cap_is_clamped() {
        let exec = BoundedExecutor::new(ThreadPerTask::default(), 0);
        assert_eq!(exec.max_parallel(), 1);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let (tx, rx) = mpsc::channel();
        exec.execute(Box::new(move || {
            flag.store(true, Ordering::SeqCst);
            let _ = tx.send(());
        }))
        .expect("queued");
        rx.recv_timeout(Duration::from_secs(5)).expect("ran");
        assert!(ran.load(Ordering::SeqCst));
    }
}
