//! Completion-driven promises.
//!
//! A promise is the one place where context deliberately does not flow:
//! callbacks run on whichever thread completes the promise (or on the
//! registering thread if it is already complete), and always with an
//! empty context installed. Neither the completer's context nor the
//! registrant's leaks into them.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::cx::ContextCarrier;
use crate::error::{panic_message, Error, Result};
use crate::job::Job;
use crate::tracing_compat::{error, trace};
use crate::types::CancelReason;

type Callback<T> = Box<dyn FnOnce(&Result<T>) + Send + 'static>;

enum State<T> {
    Pending(Vec<Callback<T>>),
    Done(Arc<Result<T>>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    done: Condvar,
    // The job producing the value, when the promise came from a submission.
    job: Option<Job>,
}

/// A value that becomes available later, exactly once.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + Sync + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Promise<T> {
    /// A pending promise.
    #[must_use]
    pub fn new() -> Self {
        Self::pending(None)
    }

    /// A pending promise fed by `job`. Cancelling the promise cancels the
    /// job.
    pub(crate) fn for_job(job: Job) -> Self {
        Self::pending(Some(job))
    }

    fn pending(job: Option<Job>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Pending(Vec::new())),
                done: Condvar::new(),
                job,
            }),
        }
    }

    /// A promise already resolved with `value`.
    #[must_use]
    pub fn resolved(value: T) -> Self {
        Self::completed(Ok(value))
    }

    /// A promise already rejected with `err`.
    #[must_use]
    pub fn rejected(err: Error) -> Self {
        Self::completed(Err(err))
    }

    fn completed(result: Result<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Done(Arc::new(result))),
                done: Condvar::new(),
                job: None,
            }),
        }
    }

    /// Fulfils the promise.
    pub fn resolve(&self, value: T) -> Result<()> {
        self.complete(Ok(value))
    }

    /// Rejects the promise.
    pub fn reject(&self, err: Error) -> Result<()> {
        self.complete(Err(err))
    }

    /// Rejects the promise with a cancellation error. Returns false if it
    /// was already complete.
    ///
    /// A promise returned by
    /// [`Propagating::submit_promise`](crate::Propagating::submit_promise)
    /// also cancels the task's job, so a task that has not started never
    /// runs and a running one sees the request at its next check.
    pub fn cancel(&self) -> bool {
        let reason = CancelReason::user("promise cancelled");
        if let Some(job) = &self.shared.job {
            if !self.is_done() {
                job.cancel(&reason);
            }
        }
        self.reject(Error::cancelled(&reason)).is_ok()
    }

    /// The job producing the value, if the promise came from a submission.
    #[must_use]
    pub fn job(&self) -> Option<&Job> {
        self.shared.job.as_ref()
    }

    /// Completes the promise and runs the registered callbacks on the
    /// calling thread.
    ///
    /// Completing twice returns
    /// [`ErrorKind::DoubleCompletion`](crate::ErrorKind::DoubleCompletion);
    /// the first result stands.
    pub fn complete(&self, result: Result<T>) -> Result<()> {
        let (callbacks, result) = {
            let mut state = self.shared.state.lock();
            if matches!(&*state, State::Done(_)) {
                return Err(Error::double_completion("promise already completed"));
            }
            let result = Arc::new(result);
            let previous = std::mem::replace(&mut *state, State::Done(Arc::clone(&result)));
            let callbacks = match previous {
                State::Pending(callbacks) => callbacks,
                State::Done(_) => Vec::new(),
            };
            (callbacks, result)
        };
        self.shared.done.notify_all();
        trace!(callbacks = callbacks.len(), ok = result.is_ok(), "promise completed");
        for callback in callbacks {
            run_isolated(|| callback(&result));
        }
        Ok(())
    }

    /// Returns true once resolved or rejected.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(&*self.shared.state.lock(), State::Done(_))
    }

    /// Registers a callback for either outcome.
    pub fn on_processed(&self, callback: impl FnOnce(&Result<T>) + Send + 'static) -> &Self {
        let result = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Pending(callbacks) => {
                    callbacks.push(Box::new(callback));
                    return self;
                }
                State::Done(result) => Arc::clone(result),
            }
        };
        run_isolated(|| callback(&result));
        self
    }

    /// Registers a callback for the fulfilled value.
    pub fn on_success(&self, callback: impl FnOnce(&T) + Send + 'static) -> &Self {
        self.on_processed(move |result| {
            if let Ok(value) = result {
                callback(value);
            }
        })
    }

    /// Registers a callback for the rejection error.
    pub fn on_error(&self, callback: impl FnOnce(&Error) + Send + 'static) -> &Self {
        self.on_processed(move |result| {
            if let Err(err) = result {
                callback(err);
            }
        })
    }

    /// Chains a transformation. Rejections pass through unchanged; a
    /// panicking transformation rejects the returned promise.
    pub fn then<U, F>(&self, f: F) -> Promise<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> Result<U> + Send + 'static,
    {
        let next = Promise::new();
        let sink = next.clone();
        self.on_processed(move |result| {
            let mapped = match result {
                Ok(value) => catch_unwind(AssertUnwindSafe(|| f(value)))
                    .unwrap_or_else(|payload| Err(Error::panicked(&*payload))),
                Err(err) => Err(err.clone()),
            };
            let _ = sink.complete(mapped);
        });
        next
    }

    /// Blocks until the promise completes and returns its result.
    ///
    /// Fails with
    /// [`ErrorKind::DeadlineExceeded`](crate::ErrorKind::DeadlineExceeded)
    /// after `timeout`.
    pub fn blocking_get(&self, timeout: Duration) -> Result<T>
    where
        T: Clone,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let State::Done(result) = &*state {
                return (**result).clone();
            }
            if self.shared.done.wait_until(&mut state, deadline).timed_out() {
                if let State::Done(result) = &*state {
                    return (**result).clone();
                }
                return Err(Error::deadline_exceeded(format!(
                    "promise not completed after {timeout:?}"
                )));
            }
        }
    }
}

/// Runs a callback with an empty context, containing panics.
fn run_isolated(callback: impl FnOnce()) {
    let _reset = ContextCarrier::reset();
    if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
        error!(panic = %panic_message(&*payload), "promise callback panicked");
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let done = matches!(&*self.shared.state.lock(), State::Done(_));
        f.debug_struct("Promise").field("done", &done).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cx::{ContextSet, IdentityTag};
    use crate::error::ErrorKind;
    use crate::test_utils::init_test_logging;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn second_completion_is_rejected() {
        let promise = Promise::new();
        promise.resolve(1).expect("first");
        let err = promise.resolve(2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DoubleCompletion);
        assert_eq!(promise.blocking_get(Duration::ZERO).ok(), Some(1));
    }

    #[test]
    fn callbacks_run_with_empty_context() {
        init_test_logging();
        let promise = Promise::<u8>::new();
        let (tx, rx) = mpsc::channel();
        ContextCarrier::with_element(IdentityTag::new("registrant"), || {
            promise.on_success(move |_| {
                let _ = tx.send(ContextCarrier::current());
            });
        });
        let completer = promise.clone();
        thread::spawn(move || {
            ContextCarrier::with_element(IdentityTag::new("completer"), || {
                completer.resolve(3).expect("resolve");
            });
        })
        .join()
        .expect("completer thread");
        assert!(rx.recv().expect("callback ran").is_empty());
    }

    #[test]
    fn late_registration_runs_immediately_isolated() {
        let promise = Promise::resolved("v");
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        ContextCarrier::with(ContextSet::of(IdentityTag::new("caller")), || {
            promise.on_processed(move |r| {
                *sink.lock() = Some((r.is_ok(), ContextCarrier::current().len()));
            });
        });
        assert_eq!(*seen.lock(), Some((true, 0)));
    }

    #[test]
    fn then_maps_and_passes_errors_through() {
        let ok = Promise::resolved(2).then(|v| Ok(v * 10));
        assert_eq!(ok.blocking_get(Duration::ZERO).ok(), Some(20));

        let failed = Promise::<i32>::rejected(Error::user("nope")).then(|v| Ok(v * 10));
        assert_eq!(
            failed.blocking_get(Duration::ZERO).unwrap_err().message(),
            Some("nope")
        );

        let panicked = Promise::resolved(1).then(|_| -> Result<i32> { panic!("mapper") });
        assert_eq!(
            panicked.blocking_get(Duration::ZERO).unwrap_err().kind(),
            ErrorKind::Panicked
        );
    }

    #[test]
    fn blocking_get_times_out() {
        let promise = Promise::<()>::new();
        let err = promise.blocking_get(Duration::from_millis(5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
        assert!(promise.cancel());
        assert!(!promise.cancel());
        assert!(promise.blocking_get(Duration::ZERO).unwrap_err().is_cancelled());
    }

    #[test]
    fn panicking_callback_does_not_stop_others() {
        init_test_logging();
        let promise = Promise::new();
        let (tx, rx) = mpsc::channel();
        promise.on_success(|_: &u8| panic!("first"));
        promise.on_success(move |v| {
            let _ = tx.send(*v);
        });
        promise.resolve(9).expect("resolve");
        assert_eq!(rx.recv().ok(), Some(9));
    }
}
