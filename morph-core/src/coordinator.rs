//! Registry of named queues, signals and worker threads
//!
//! Components that hand work across threads look up their queues and
//! signals by name through a shared `Coordinator` instead of global state.
//! Every worker is started with its own cancellation signal; stopping a
//! worker sets the signal and joins the thread.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info};

/// Error returned by a worker body
pub type WorkerError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by a worker body
pub type WorkerResult = Result<(), WorkerError>;

/// Errors from the coordinator
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Queue '{0}' does not exist")]
    NoSuchQueue(String),
    #[error("Queue '{0}' carries a different message type")]
    QueueTypeMismatch(String),
    #[error("Worker '{0}' is already running")]
    WorkerAlreadyRunning(String),
    #[error("Failed to spawn worker '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Worker '{name}' failed: {source}")]
    WorkerFailed {
        name: String,
        #[source]
        source: WorkerError,
    },
    #[error("Worker '{0}' panicked")]
    WorkerPanicked(String),
}

/// Boolean event flag that threads can poll or wait on
#[derive(Clone, Default)]
pub struct Signal {
    inner: Arc<SignalInner>,
}

#[derive(Default)]
struct SignalInner {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake every waiter
    pub fn set(&self) {
        let mut flag = self.inner.flag.lock();
        *flag = true;
        self.inner.cond.notify_all();
    }

    /// Lower the flag
    pub fn clear(&self) {
        *self.inner.flag.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.inner.flag.lock()
    }

    /// Block until the flag is raised or the timeout expires
    ///
    /// Returns the flag state at wake-up.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flag = self.inner.flag.lock();
        while !*flag {
            if self.inner.cond.wait_until(&mut flag, deadline).timed_out() {
                return *flag;
            }
        }
        true
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal").field("set", &self.is_set()).finish()
    }
}

/// Unbounded FIFO shared by name
///
/// Cloning yields another handle on the same channel.
pub struct Queue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Append a message
    ///
    /// Never blocks; the queue keeps its own receiver alive so a send
    /// cannot fail.
    pub fn send(&self, message: T) {
        let _ = self.tx.send(message);
    }

    /// Wait up to `timeout` for the next message
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Discard everything currently queued, returning how many were dropped
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn sender(&self) -> Sender<T> {
        self.tx.clone()
    }

    pub fn receiver(&self) -> Receiver<T> {
        self.rx.clone()
    }
}

struct Worker {
    handle: JoinHandle<WorkerResult>,
    cancel: Signal,
}

/// Named queues, signals and workers
#[derive(Default)]
pub struct Coordinator {
    queues: Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>,
    signals: Mutex<HashMap<String, Signal>>,
    workers: Mutex<HashMap<String, Worker>>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- queues ----

    /// Create a queue, or return the existing one of the same message type
    pub fn create_queue<T: Send + 'static>(&self, name: &str) -> Result<Queue<T>, CoordinatorError> {
        let mut queues = self.queues.lock();
        if let Some(existing) = queues.get(name) {
            return existing
                .downcast_ref::<Queue<T>>()
                .cloned()
                .ok_or_else(|| CoordinatorError::QueueTypeMismatch(name.to_string()));
        }
        let queue = Queue::<T>::new();
        queues.insert(name.to_string(), Box::new(queue.clone()));
        debug!(queue = name, "Queue created");
        Ok(queue)
    }

    pub fn get_queue<T: Send + 'static>(&self, name: &str) -> Result<Queue<T>, CoordinatorError> {
        let queues = self.queues.lock();
        let entry = queues
            .get(name)
            .ok_or_else(|| CoordinatorError::NoSuchQueue(name.to_string()))?;
        entry
            .downcast_ref::<Queue<T>>()
            .cloned()
            .ok_or_else(|| CoordinatorError::QueueTypeMismatch(name.to_string()))
    }

    /// Remove a queue from the registry; existing handles stay usable
    pub fn delete_queue(&self, name: &str) -> bool {
        self.queues.lock().remove(name).is_some()
    }

    // ---- signals ----

    pub fn create_signal(&self, name: &str) -> Signal {
        self.signals
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    pub fn signal(&self, name: &str) -> Option<Signal> {
        self.signals.lock().get(name).cloned()
    }

    /// Raise a named signal; unknown names are ignored
    pub fn set_signal(&self, name: &str) {
        if let Some(signal) = self.signal(name) {
            signal.set();
        }
    }

    pub fn clear_signal(&self, name: &str) {
        if let Some(signal) = self.signal(name) {
            signal.clear();
        }
    }

    pub fn is_signal_set(&self, name: &str) -> bool {
        self.signal(name).map(|s| s.is_set()).unwrap_or(false)
    }

    /// Wait for a named signal; an unknown signal waits out the timeout
    pub fn wait_for_signal(&self, name: &str, timeout: Duration) -> bool {
        match self.signal(name) {
            Some(signal) => signal.wait_timeout(timeout),
            None => {
                thread::sleep(timeout);
                false
            }
        }
    }

    // ---- workers ----

    /// Spawn a named worker thread
    ///
    /// The body receives its cancellation signal. A live worker under the
    /// same name is an error; a finished one is reaped and replaced.
    pub fn start_worker<F>(&self, name: &str, task: F) -> Result<Signal, CoordinatorError>
    where
        F: FnOnce(Signal) -> WorkerResult + Send + 'static,
    {
        let mut workers = self.workers.lock();
        if let Some(existing) = workers.get(name) {
            if !existing.handle.is_finished() {
                return Err(CoordinatorError::WorkerAlreadyRunning(name.to_string()));
            }
            if let Some(stale) = workers.remove(name) {
                if let Err(e) = Self::finish(name, stale.handle) {
                    error!(worker = name, "Reaped worker had failed: {}", e);
                }
            }
        }

        let cancel = Signal::new();
        let worker_cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || task(worker_cancel))
            .map_err(|source| CoordinatorError::Spawn {
                name: name.to_string(),
                source,
            })?;

        workers.insert(
            name.to_string(),
            Worker {
                handle,
                cancel: cancel.clone(),
            },
        );
        info!(worker = name, "Worker started");
        Ok(cancel)
    }

    /// Cancel a worker and wait for it to exit
    ///
    /// Unknown or already stopped workers are a no-op.
    pub fn stop_worker(&self, name: &str) -> Result<(), CoordinatorError> {
        let worker = self.workers.lock().remove(name);
        let Some(worker) = worker else {
            info!(worker = name, "Worker not found or already stopped");
            return Ok(());
        };

        info!(worker = name, "Stopping worker");
        worker.cancel.set();
        Self::finish(name, worker.handle)
    }

    /// Wait for a worker to finish on its own and return its result
    pub fn join_worker(&self, name: &str) -> Result<(), CoordinatorError> {
        let worker = self.workers.lock().remove(name);
        match worker {
            Some(worker) => Self::finish(name, worker.handle),
            None => {
                info!(worker = name, "Worker not found or already joined");
                Ok(())
            }
        }
    }

    pub fn is_worker_active(&self, name: &str) -> bool {
        self.workers
            .lock()
            .get(name)
            .map(|w| !w.handle.is_finished())
            .unwrap_or(false)
    }

    /// Names of workers whose threads are still running
    pub fn active_workers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .workers
            .lock()
            .iter()
            .filter(|(_, w)| !w.handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Stop every worker except the calling thread
    pub fn stop_all(&self) {
        let current = thread::current().id();
        let names: Vec<String> = self
            .workers
            .lock()
            .iter()
            .filter(|(_, w)| w.handle.thread().id() != current)
            .map(|(name, _)| name.clone())
            .collect();

        for name in names {
            if let Err(e) = self.stop_worker(&name) {
                error!(worker = %name, "Error while stopping worker: {}", e);
            }
        }
    }

    fn finish(name: &str, handle: JoinHandle<WorkerResult>) -> Result<(), CoordinatorError> {
        match handle.join() {
            Ok(Ok(())) => {
                info!(worker = name, "Worker stopped");
                Ok(())
            }
            Ok(Err(source)) => Err(CoordinatorError::WorkerFailed {
                name: name.to_string(),
                source,
            }),
            Err(_) => Err(CoordinatorError::WorkerPanicked(name.to_string())),
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop_all();
    }
}
