//! A single serialized dispatch thread.
//!
//! Tasks run one at a time in submission order. A task may carry an
//! expiry condition, checked just before it would run; if the condition no
//! longer holds the task is dropped instead.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};

use super::handle::{ResultSlot, TaskHandle};
use super::propagation::{Propagating, PropagationRecord};
use super::{Executor, Runnable};
use crate::error::{panic_message, Error, Result};
use crate::tracing_compat::{debug, error, trace};
use crate::types::CancelReason;

type Condition = Box<dyn Fn() -> bool + Send + 'static>;
type OnExpired = Box<dyn FnOnce() + Send + 'static>;

struct UiTask {
    id: u64,
    run: Runnable,
    expiry: Option<(Condition, OnExpired)>,
}

/// The dispatch thread.
///
/// Clones share the thread.
#[derive(Clone)]
pub struct UiDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    queue: Mutex<UiQueue>,
    ready: Condvar,
    next_id: AtomicU64,
    thread_id: OnceLock<ThreadId>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct UiQueue {
    tasks: VecDeque<UiTask>,
    shutdown: bool,
}

impl UiDispatcher {
    /// Starts a dispatch thread with the given name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let inner = Arc::new(Inner {
            queue: Mutex::new(UiQueue::default()),
            ready: Condvar::new(),
            next_id: AtomicU64::new(0),
            thread_id: OnceLock::new(),
            thread: Mutex::new(None),
        });
        let worker = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || worker.run())
            .map_err(|e| Error::rejected("failed to spawn dispatch thread").with_source(e))?;
        let _ = inner.thread_id.set(handle.thread().id());
        *inner.thread.lock() = Some(handle);
        Ok(Self { inner })
    }

    /// Returns true when called on the dispatch thread.
    #[must_use]
    pub fn is_dispatch_thread(&self) -> bool {
        self.inner.thread_id.get() == Some(&thread::current().id())
    }

    /// Queues `task` to run on the dispatch thread.
    pub fn invoke_later(&self, task: Runnable) -> Result<()> {
        self.push(task, None).map(drop)
    }

    /// Queues `task`, dropping it at dispatch time if `condition` returns
    /// false. `on_expired` then runs on the dispatch thread before the task
    /// is dropped.
    pub fn invoke_later_if(
        &self,
        task: Runnable,
        condition: impl Fn() -> bool + Send + 'static,
        on_expired: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        self.push(task, Some((Box::new(condition), Box::new(on_expired))))
            .map(drop)
    }

    /// Runs `f` on the dispatch thread and waits for its result.
    ///
    /// Called on the dispatch thread itself, `f` runs inline.
    pub fn invoke_and_wait<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_dispatch_thread() {
            return Ok(f());
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.invoke_later(Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(f)).map_err(|p| Error::panicked(&*p));
            let _ = tx.send(result);
        }))?;
        rx.recv()
            .map_err(|_| Error::rejected("dispatch thread stopped before running the task"))?
    }

    /// Tasks waiting to run.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.queue.lock().tasks.len()
    }

    /// Stops the dispatch thread. Queued tasks are dropped; a task already
    /// running finishes first.
    pub fn shutdown(&self) {
        let dropped: Vec<UiTask> = {
            let mut queue = self.inner.queue.lock();
            queue.shutdown = true;
            queue.tasks.drain(..).collect()
        };
        self.inner.ready.notify_all();
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "dispatcher shutdown dropped queued tasks");
        }
        drop(dropped);
        let handle = self.inner.thread.lock().take();
        if let Some(handle) = handle {
            if !self.is_dispatch_thread() {
                let _ = handle.join();
            }
        }
    }

    /// Removes a queued task without running it. Returns false if it was
    /// already dispatched or dropped.
    fn withdraw(&self, id: u64) -> bool {
        let removed = {
            let mut queue = self.inner.queue.lock();
            queue
                .tasks
                .iter()
                .position(|task| task.id == id)
                .and_then(|at| queue.tasks.remove(at))
        };
        // Dropped outside the lock: dropping a runnable resolves its job.
        removed.is_some()
    }

    fn push(&self, run: Runnable, expiry: Option<(Condition, OnExpired)>) -> Result<u64> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let task = UiTask { id, run, expiry };
        let mut queue = self.inner.queue.lock();
        if queue.shutdown {
            drop(queue);
            drop(task);
            return Err(Error::rejected("dispatcher is shut down"));
        }
        queue.tasks.push_back(task);
        drop(queue);
        self.inner.ready.notify_one();
        Ok(id)
    }
}

impl Inner {
    fn run(&self) {
        loop {
            let task = {
                let mut queue = self.queue.lock();
                loop {
                    if queue.shutdown {
                        return;
                    }
                    if let Some(task) = queue.tasks.pop_front() {
                        break task;
                    }
                    self.ready.wait(&mut queue);
                }
            };
            let UiTask { run, expiry, .. } = task;
            if let Some((condition, on_expired)) = expiry {
                let holds = catch_unwind(AssertUnwindSafe(|| condition())).unwrap_or(false);
                if !holds {
                    trace!("ui task expired before dispatch");
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(on_expired)) {
                        error!(panic = %panic_message(&*payload), "ui expiry hook panicked");
                    }
                    drop(run);
                    continue;
                }
            }
            if let Err(payload) = catch_unwind(AssertUnwindSafe(run)) {
                error!(panic = %panic_message(&*payload), "ui task panicked");
            }
        }
    }
}

impl Executor for UiDispatcher {
    fn execute(&self, task: Runnable) -> Result<()> {
        self.invoke_later(task)
    }
}

impl fmt::Debug for UiDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiDispatcher")
            .field("thread", &self.inner.thread_id.get())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Propagating<UiDispatcher> {
    /// Queues `task` on the dispatch thread under the caller's context,
    /// guarded by `condition`.
    ///
    /// If the condition fails at dispatch time the task never runs and its
    /// job is cancelled with [`CancelKind::Expired`](crate::CancelKind::Expired).
    /// Cancelling the job while the task is queued removes it from the
    /// queue.
    pub fn invoke_on_ui_thread<T, F>(
        &self,
        task: F,
        condition: impl Fn() -> bool + Send + 'static,
    ) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let record = PropagationRecord::capture();
        let job = record.job().clone();
        let slot = ResultSlot::new();
        let sink = Arc::clone(&slot);
        let runnable = record.into_runnable(task, move |result| {
            sink.set(result);
        });
        let expired = job.clone();
        let on_expired: OnExpired = Box::new(move || {
            expired.cancel(&CancelReason::expired());
        });
        let id = self
            .inner()
            .push(runnable, Some((Box::new(condition), on_expired)))
            .map_err(|err| err.with_job(job.id()))?;
        let dispatcher = self.inner().clone();
        job.on_cancel(move |_| {
            if dispatcher.withdraw(id) {
                trace!(task = id, "cancelled ui task withdrawn from queue");
            }
        });
        Ok(TaskHandle::new(job, slot))
    }

    /// Runs `task` on the dispatch thread under the caller's context and
    /// waits for it and its children.
    ///
    /// On the dispatch thread itself the task runs inline and only its own
    /// result is awaited: children it queued here cannot run before it
    /// returns. They stay attached to the caller's job.
    pub fn invoke_and_wait<T, F>(&self, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        if !self.inner().is_dispatch_thread() {
            return self.submit(task)?.join();
        }
        let record = PropagationRecord::capture();
        let job = record.job().clone();
        let slot = ResultSlot::new();
        let sink = Arc::clone(&slot);
        let runnable = record.into_runnable(task, move |result| {
            sink.set(result);
        });
        runnable();
        if let Some(failure) = job.failure() {
            return Err(failure);
        }
        slot.take().unwrap_or_else(|| {
            let reason = job.cancel_reason().unwrap_or_default();
            Err(Error::cancelled(&reason).with_job(job.id()))
        })
    }
}
