//! Delayed and periodic dispatch onto a backend executor.
//!
//! One timer thread owns a deadline heap. Due work is handed to the
//! backend; the timer thread itself never runs user code. Cancelled timers
//! are removed from the task map immediately and their heap entries are
//! skipped when they surface.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::handle::{ResultSlot, TaskHandle};
use super::propagation::{body_outcome, run_body, Propagating, PropagationRecord};
use super::{Executor, Runnable};
use crate::cx::ContextSet;
use crate::error::{Error, Result};
use crate::job::Job;
use crate::tracing_compat::{debug, trace, warn};
use crate::types::{CancelReason, Outcome};

/// Far-future fallback when a delay would overflow `Instant`.
const MAX_DELAY: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Identifies a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Timer thread dispatching due work onto a backend executor.
///
/// Clones share the same timer thread. Call
/// [`shutdown`](Self::shutdown) to stop it; pending work is dropped, which
/// cancels the jobs of propagated tasks.
#[derive(Clone)]
pub struct ScheduledExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<TimerState>,
    wakeup: Condvar,
    backend: Arc<dyn Executor>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    tasks: HashMap<u64, Runnable>,
    next_seq: u64,
    shutdown: bool,
}

impl ScheduledExecutor {
    /// Starts a timer thread named `strand-scheduler`.
    pub fn new(backend: impl Executor + 'static) -> Result<Self> {
        Self::with_thread_name(backend, "strand-scheduler")
    }

    /// Starts a timer thread with a custom name.
    pub fn with_thread_name(
        backend: impl Executor + 'static,
        name: impl Into<String>,
    ) -> Result<Self> {
        let inner = Arc::new(Inner {
            state: Mutex::new(TimerState::default()),
            wakeup: Condvar::new(),
            backend: Arc::new(backend),
            thread: Mutex::new(None),
        });
        let worker = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || worker.run())
            .map_err(|e| Error::rejected("failed to spawn scheduler thread").with_source(e))?;
        *inner.thread.lock() = Some(handle);
        Ok(Self { inner })
    }

    /// Runs `task` on the backend after `delay`.
    pub fn schedule_raw(&self, delay: Duration, task: Runnable) -> Result<TimerId> {
        let now = Instant::now();
        let at = now
            .checked_add(delay)
            .unwrap_or_else(|| now + MAX_DELAY);
        let mut state = self.inner.state.lock();
        if state.shutdown {
            drop(state);
            drop(task);
            return Err(Error::rejected("scheduler is shut down"));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        let earliest = state
            .heap
            .peek()
            .map_or(true, |Reverse((next, _))| at < *next);
        state.heap.push(Reverse((at, seq)));
        state.tasks.insert(seq, task);
        drop(state);
        if earliest {
            self.inner.wakeup.notify_one();
        }
        trace!(timer = seq, ?delay, "timer scheduled");
        Ok(TimerId(seq))
    }

    /// Cancels a timer that has not fired. Returns false if it already
    /// fired or was cancelled.
    ///
    /// The removed task is dropped on the calling thread.
    pub fn cancel(&self, id: TimerId) -> bool {
        let removed = self.inner.state.lock().tasks.remove(&id.0);
        removed.is_some()
    }

    /// Timers waiting to fire.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().tasks.len()
    }

    /// Returns true after [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().shutdown
    }

    /// Stops the timer thread and drops every pending timer.
    pub fn shutdown(&self) {
        let dropped: Vec<Runnable> = {
            let mut state = self.inner.state.lock();
            if state.shutdown {
                Vec::new()
            } else {
                state.shutdown = true;
                state.heap.clear();
                state.tasks.drain().map(|(_, task)| task).collect()
            }
        };
        self.inner.wakeup.notify_all();
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "scheduler shutdown dropped pending timers");
        }
        drop(dropped);

        let handle = self.inner.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Inner {
    fn run(&self) {
        let mut due: Vec<Runnable> = Vec::new();
        loop {
            {
                let mut state = self.state.lock();
                loop {
                    if state.shutdown {
                        return;
                    }
                    let now = Instant::now();
                    match state.heap.peek().copied() {
                        Some(Reverse((at, seq))) if at <= now => {
                            state.heap.pop();
                            if let Some(task) = state.tasks.remove(&seq) {
                                due.push(task);
                            }
                        }
                        Some(Reverse((at, _))) => {
                            if !due.is_empty() {
                                break;
                            }
                            self.wakeup.wait_until(&mut state, at);
                        }
                        None => {
                            if !due.is_empty() {
                                break;
                            }
                            self.wakeup.wait(&mut state);
                        }
                    }
                }
            }
            for task in due.drain(..) {
                if let Err(err) = self.backend.execute(task) {
                    warn!(error = %err, "scheduler backend refused due task");
                }
            }
        }
    }
}

impl Executor for ScheduledExecutor {
    fn execute(&self, task: Runnable) -> Result<()> {
        self.schedule_raw(Duration::ZERO, task).map(drop)
    }
}

impl fmt::Debug for ScheduledExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ScheduledExecutor")
            .field("pending", &state.tasks.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

impl Propagating<ScheduledExecutor> {
    /// Runs `task` after `delay` under the caller's context.
    ///
    /// Cancelling the returned handle before the timer fires removes the
    /// timer.
    pub fn schedule<T, F>(&self, task: F, delay: Duration) -> Result<TaskHandle<T>>
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
        let id = self
            .inner()
            .schedule_raw(delay, runnable)
            .map_err(|err| err.with_job(job.id()))?;
        let timers = self.inner().clone();
        job.on_cancel(move |_| {
            timers.cancel(id);
        });
        Ok(TaskHandle::new(job, slot))
    }

    /// Runs `task` repeatedly, waiting `period` after each run finishes.
    ///
    /// Every run shares one job. Cancelling it stops all future runs; a run
    /// that fails resolves the job as failed and is not rescheduled. Runs
    /// never overlap.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        task: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<PeriodicHandle>
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        let (context, job) = PropagationRecord::capture().into_parts();
        let runs = Arc::new(AtomicU64::new(0));
        let handle = PeriodicHandle {
            job: job.clone(),
            runs: Arc::clone(&runs),
        };
        if job.start_body().is_err() {
            debug!(job = %job.id(), "periodic task cancelled before first run");
            return Ok(handle);
        }
        let periodic = Arc::new(Periodic {
            job: job.clone(),
            context,
            task: Mutex::new(task),
            phase: AtomicU8::new(IDLE),
            runs,
            timers: self.inner().clone(),
            period,
            timer: Mutex::new(None),
        });
        let hook = Arc::clone(&periodic);
        job.on_cancel(move |reason| hook.cancel_requested(reason));
        if periodic.phase.load(Ordering::Acquire) == IDLE {
            Periodic::arm(&periodic, initial_delay);
        }
        Ok(handle)
    }
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const CANCEL_REQUESTED: u8 = 2;
const DONE: u8 = 3;

/// Shared state of one periodic submission.
///
/// Every decision about who resolves the job goes through `phase`: only
/// the party that moves it to `DONE` calls `finish_body`.
struct Periodic<F> {
    job: Job,
    context: ContextSet,
    task: Mutex<F>,
    phase: AtomicU8,
    runs: Arc<AtomicU64>,
    timers: ScheduledExecutor,
    period: Duration,
    timer: Mutex<Option<TimerId>>,
}

impl<F> Periodic<F>
where
    F: FnMut() -> Result<()> + Send + 'static,
{
    fn arm(this: &Arc<Self>, delay: Duration) {
        let tick = Tick(Some(Arc::clone(this)));
        match this.timers.schedule_raw(delay, Box::new(move || tick.fire())) {
            Ok(id) => {
                *this.timer.lock() = Some(id);
                if this.phase.load(Ordering::Acquire) == DONE {
                    this.timers.cancel(id);
                }
            }
            Err(err) => {
                debug!(job = %this.job.id(), error = %err, "periodic task could not be rescheduled");
            }
        }
    }

    fn tick(self: &Arc<Self>) {
        if self
            .phase
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        *self.timer.lock() = None;
        if self.job.is_cancelled() {
            // The cancel hook resolves once it sees IDLE.
            self.leave_running();
            return;
        }

        let result = run_body(&self.context, &self.job, || {
            let mut task = self.task.lock();
            (*task)()
        });
        self.runs.fetch_add(1, Ordering::AcqRel);

        if result.is_ok() {
            if self.leave_running() {
                Self::arm(self, self.period);
            }
        } else {
            self.phase.store(DONE, Ordering::Release);
            self.finish(body_outcome(&result));
        }
    }

    /// Moves RUNNING back to IDLE. If cancellation arrived meanwhile,
    /// resolves the job instead and returns false.
    fn leave_running(&self) -> bool {
        if self
            .phase
            .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return true;
        }
        self.phase.store(DONE, Ordering::Release);
        let reason = self
            .job
            .cancel_reason()
            .unwrap_or_else(CancelReason::parent_cancelled);
        self.finish(Outcome::Cancelled(reason));
        false
    }

    fn cancel_requested(&self, reason: &CancelReason) {
        loop {
            match self.phase.load(Ordering::Acquire) {
                IDLE => {
                    if self
                        .phase
                        .compare_exchange(IDLE, DONE, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        let pending = self.timer.lock().take();
                        if let Some(id) = pending {
                            self.timers.cancel(id);
                        }
                        self.finish(Outcome::Cancelled(reason.clone()));
                        return;
                    }
                }
                RUNNING => {
                    if self
                        .phase
                        .compare_exchange(
                            RUNNING,
                            CANCEL_REQUESTED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn finish(&self, outcome: Outcome<(), Error>) {
        if let Err(late) = self.job.finish_body(outcome) {
            warn!(job = %self.job.id(), error = %late, "periodic task resolved twice");
        }
    }
}

/// A pending tick. Dropped unrun (scheduler shutdown), it cancels the job.
struct Tick<F>(Option<Arc<Periodic<F>>>)
where
    F: FnMut() -> Result<()> + Send + 'static;

impl<F> Tick<F>
where
    F: FnMut() -> Result<()> + Send + 'static,
{
    fn fire(mut self) {
        if let Some(periodic) = self.0.take() {
            periodic.tick();
        }
    }
}

impl<F> Drop for Tick<F>
where
    F: FnMut() -> Result<()> + Send + 'static,
{
    fn drop(&mut self) {
        if let Some(periodic) = self.0.take() {
            if periodic.job.cancel_reason().is_none() {
                periodic.job.cancel(&CancelReason::shutdown());
            }
        }
    }
}

/// Handle to a fixed-delay periodic submission.
#[derive(Debug, Clone)]
pub struct PeriodicHandle {
    job: Job,
    runs: Arc<AtomicU64>,
}

impl PeriodicHandle {
    /// Stops all future runs. A run in progress finishes first.
    pub fn cancel(&self) {
        self.job.cancel(&CancelReason::user("periodic task cancelled"));
    }

    /// The job shared by every run.
    #[must_use]
    pub const fn job(&self) -> &Job {
        &self.job
    }

    /// Returns true once the submission is resolved and its children are
    /// done.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.job.is_terminal()
    }

    /// Runs that have completed so far.
    #[must_use]
    pub fn completed_runs(&self) -> u64 {
        self.runs.load(Ordering::Acquire)
    }

    /// Blocks until the submission is resolved.
    pub fn join(&self) -> Outcome<(), Error> {
        self.job.join()
    }

    /// Like [`join`](Self::join), giving up after `timeout`.
    pub fn join_timeout(&self, timeout: Duration) -> Option<Outcome<(), Error>> {
        self.job.join_timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cx::{ContextCarrier, IdentityTag};
    use crate::error::ErrorKind;
    use crate::executor::ThreadPerTask;
    use crate::test_utils::{init_test_logging, wait_until};
    use crate::types::CancelKind;
    use std::sync::mpsc;

    fn scheduler() -> Propagating<ScheduledExecutor> {
        Propagating::new(ScheduledExecutor::new(ThreadPerTask::default()).expect("scheduler"))
    }

    #[test]
    fn fires_in_deadline_order() {
        init_test_logging();
        let timers = ScheduledExecutor::new(ThreadPerTask::default()).expect("scheduler");
        let (tx, rx) = mpsc::channel();
        for (label, ms) in [("late", 60_u64), ("early", 5)] {
            let tx = tx.clone();
            timers
                .schedule_raw(
                    Duration::from_millis(ms),
                    Box::new(move || {
                        let _ = tx.send(label);
                    }),
                )
                .expect("schedule");
        }
        let first = rx.recv_timeout(Duration::from_secs(5)).expect("first");
        let second = rx.recv_timeout(Duration::from_secs(5)).expect("second");
        assert_eq!((first, second), ("early", "late"));
        timers.shutdown();
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let timers = ScheduledExecutor::new(ThreadPerTask::default()).expect("scheduler");
        let (tx, rx) = mpsc::channel::<()>();
        let id = timers
            .schedule_raw(
                Duration::from_millis(30),
                Box::new(move || {
                    let _ = tx.send(());
                }),
            )
            .expect("schedule");
        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        timers.shutdown();
    }

    #[test]
    fn schedule_after_shutdown_is_rejected() {
        let timers = ScheduledExecutor::new(ThreadPerTask::default()).expect("scheduler");
        timers.shutdown();
        let err = timers
            .schedule_raw(Duration::ZERO, Box::new(|| {}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rejected);
    }

    #[test]
    fn delayed_task_sees_submitter_context() {
        init_test_logging();
        let exec = scheduler();
        let handle = ContextCarrier::with_element(IdentityTag::new("delayed"), || {
            exec.schedule(
                || Ok(ContextCarrier::get::<IdentityTag>().map(|t| t.id().to_owned())),
                Duration::from_millis(5),
            )
        })
        .expect("schedule");
        assert_eq!(handle.join().expect("ran").as_deref(), Some("delayed"));
        exec.inner().shutdown();
    }

    #[test]
    fn cancelling_delayed_task_removes_timer() {
        let exec = scheduler();
        let handle = exec
            .schedule(|| Ok(()), Duration::from_secs(30))
            .expect("schedule");
        assert_eq!(exec.inner().pending_count(), 1);
        handle.cancel();
        assert_eq!(exec.inner().pending_count(), 0);
        assert!(handle.join().unwrap_err().is_cancelled());
        exec.inner().shutdown();
    }

    #[test]
    fn periodic_runs_until_cancelled() {
        init_test_logging();
        let exec = scheduler();
        let periodic = exec
            .schedule_with_fixed_delay(|| Ok(()), Duration::ZERO, Duration::from_millis(2))
            .expect("schedule");
        assert!(wait_until(Duration::from_secs(5), || periodic.completed_runs() >= 3));
        periodic.cancel();
        let outcome = periodic.join_timeout(Duration::from_secs(5)).expect("resolved");
        assert!(outcome.is_cancelled());
        let after = periodic.completed_runs();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(periodic.completed_runs(), after);
        exec.inner().shutdown();
    }

    #[test]
    fn periodic_failure_stops_rescheduling() {
        init_test_logging();
        let exec = scheduler();
        let mut count = 0;
        let periodic = exec
            .schedule_with_fixed_delay(
                move || {
                    count += 1;
                    if count == 2 {
                        Err(Error::user("tick two broke"))
                    } else {
                        Ok(())
                    }
                },
                Duration::ZERO,
                Duration::from_millis(1),
            )
            .expect("schedule");
        let outcome = periodic.join_timeout(Duration::from_secs(5)).expect("resolved");
        assert_eq!(outcome.err().and_then(Error::message), Some("tick two broke"));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(periodic.completed_runs(), 2);
        exec.inner().shutdown();
    }

    #[test]
    fn shutdown_cancels_periodic_job() {
        let exec = scheduler();
        let periodic = exec
            .schedule_with_fixed_delay(|| Ok(()), Duration::from_secs(30), Duration::from_secs(30))
            .expect("schedule");
        exec.inner().shutdown();
        let outcome = periodic.join_timeout(Duration::from_secs(5)).expect("resolved");
        assert_eq!(
            outcome.cancel_reason().map(CancelReason::kind),
            Some(CancelKind::Shutdown)
        );
    }
}
