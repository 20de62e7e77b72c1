//! A serialized, process-aware client.
//!
//! [`SerialClient`] owns a value that is not safe to use concurrently
//! (typically the connection to a backing process) on one dedicated
//! thread. Callers queue closures against it and get [`TaskHandle`]s back;
//! closures run strictly in submission order, under the caller's context.
//!
//! When the backing process dies, [`terminate`](SerialClient::terminate)
//! fails every queued call, the one in flight, and every later call with
//! [`ErrorKind::ProcessTerminated`](crate::ErrorKind::ProcessTerminated),
//! without waiting for the stuck call to return.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::executor::handle::ResultSlot;
use crate::executor::{PropagationRecord, Runnable, TaskHandle};
use crate::job::Job;
use crate::tracing_compat::{debug, info};

/// Serializes calls against a client value on one thread.
pub struct SerialClient<C> {
    inner: Arc<Inner>,
    client: Arc<Mutex<C>>,
}

struct Inner {
    name: String,
    queue: Mutex<CallQueue>,
    ready: Condvar,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

/// Writes a failure into a call's result slot. Set-once, so the call's
/// real result is discarded if it arrives later.
type FailCall = Box<dyn FnOnce(Error) + Send>;

struct Call {
    job: Job,
    fail: FailCall,
    run: Runnable,
}

#[derive(Default)]
struct CallQueue {
    calls: VecDeque<Call>,
    in_flight: Option<(Job, FailCall)>,
    terminated: Option<Error>,
    shutdown: bool,
}

impl<C: Send + 'static> SerialClient<C> {
    /// Moves `client` onto a new thread named `name`.
    pub fn spawn(name: impl Into<String>, client: C) -> Result<Self> {
        let name = name.into();
        let inner = Arc::new(Inner {
            name: name.clone(),
            queue: Mutex::new(CallQueue::default()),
            ready: Condvar::new(),
            thread: Mutex::new(None),
        });
        let worker = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || worker.run())
            .map_err(|e| Error::rejected("failed to spawn client thread").with_source(e))?;
        *inner.thread.lock() = Some(handle);
        Ok(Self {
            inner,
            client: Arc::new(Mutex::new(client)),
        })
    }

    /// Queues `f` against the client.
    ///
    /// The call's job is a child of the caller's job. On a terminated
    /// client the returned handle is already failed.
    pub fn call<T, F>(&self, f: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> Result<T> + Send + 'static,
    {
        let record = PropagationRecord::capture();
        let job = record.job().clone();
        let slot = ResultSlot::new();

        let mut queue = self.inner.queue.lock();
        let refused = queue.terminated.clone().or_else(|| {
            queue
                .shutdown
                .then(|| Error::rejected(format!("client {} is shut down", self.inner.name)))
        });
        if let Some(err) = refused {
            drop(queue);
            let err = err.with_job(job.id());
            slot.set(Err(err.clone()));
            job.abandon_body(err);
            return TaskHandle::new(job, slot);
        }

        let client = Arc::clone(&self.client);
        let sink = Arc::clone(&slot);
        let failed = Arc::clone(&slot);
        let run = record.into_runnable(
            move || {
                let mut client = client.lock();
                f(&mut client)
            },
            move |result| {
                sink.set(result);
            },
        );
        queue.calls.push_back(Call {
            job: job.clone(),
            fail: Box::new(move |err| {
                failed.set(Err(err));
            }),
            run,
        });
        drop(queue);
        self.inner.ready.notify_one();
        TaskHandle::new(job, slot)
    }
}

impl<C> SerialClient<C> {
    /// Declares the backing process dead.
    ///
    /// Queued calls and the call in flight resolve immediately with
    /// `ProcessTerminated`, as does every later call. The thread stuck in
    /// the in-flight call is not interrupted; its eventual result is
    /// discarded. Returns false if the client was already terminated.
    pub fn terminate(&self, reason: impl Into<String>) -> bool {
        let err = Error::process_terminated(reason);
        let (pending, in_flight) = {
            let mut queue = self.inner.queue.lock();
            if queue.terminated.is_some() {
                return false;
            }
            queue.terminated = Some(err.clone());
            let pending: Vec<Call> = queue.calls.drain(..).collect();
            (pending, queue.in_flight.take())
        };
        self.inner.ready.notify_all();
        info!(
            client = %self.inner.name,
            error = %err,
            pending = pending.len(),
            in_flight = in_flight.is_some(),
            "client terminated"
        );
        // Every slot is filled before any job resolves, since abandoning one
        // call can cancel its siblings through a shared parent. Unrun calls
        // are dropped last so the drop cannot resolve them as cancelled.
        let mut unrun = Vec::with_capacity(pending.len());
        let mut abandoned = Vec::with_capacity(pending.len() + 1);
        let calls = pending.into_iter().map(|call| {
            unrun.push(call.run);
            (call.job, call.fail)
        });
        for (job, fail) in in_flight.into_iter().chain(calls) {
            let err = err.clone().with_job(job.id());
            fail(err.clone());
            abandoned.push((job, err));
        }
        for (job, err) in abandoned {
            job.abandon_body(err);
        }
        drop(unrun);
        true
    }

    /// Returns true after [`terminate`](Self::terminate).
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.queue.lock().terminated.is_some()
    }

    /// Calls queued but not yet started.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.queue.lock().calls.len()
    }

    /// Stops accepting calls, runs the ones already queued, and joins the
    /// thread.
    pub fn shutdown(&self) {
        self.inner.queue.lock().shutdown = true;
        self.inner.ready.notify_all();
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
        loop {
            let runnable = {
                let mut queue = self.queue.lock();
                loop {
                    if queue.terminated.is_some() {
                        debug!(client = %self.name, "client thread exiting after termination");
                        return;
                    }
                    if let Some(call) = queue.calls.pop_front() {
                        queue.in_flight = Some((call.job, call.fail));
                        break call.run;
                    }
                    if queue.shutdown {
                        return;
                    }
                    self.ready.wait(&mut queue);
                }
            };
            runnable();
            self.queue.lock().in_flight = None;
        }
    }
}

impl<C> Clone for SerialClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            client: Arc::clone(&self.client),
        }
    }
}

impl<C> fmt::Debug for SerialClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.inner.queue.lock();
        f.debug_struct("SerialClient")
            .field("name", &self.inner.name)
            .field("pending", &queue.calls.len())
            .field("terminated", &queue.terminated.is_some())
            .finish()
    }
}
