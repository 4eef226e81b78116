//! Callback-oriented task executor.
//!
//! [Executor::go] launches a user body on a fresh worker and funnels its
//! completion callback into one bounded channel, which the owning event loop
//! drains through [Executor::cb]. Module state stays on the owner loop, so it
//! never needs locks. [LinearContext] layers strict FIFO execution on top.
//!
//! Workers run on the blocking pool: bodies are plain closures that may block
//! or burn CPU, and their callback posts are plain blocking sends.

use crate::stack;
use captains_log::*;
use crossfire::{mpsc, AsyncRx, MTx};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A completion callback, drained on the owning loop.
pub type TaskCb = Box<dyn FnOnce() + Send + 'static>;

struct ExecutorInner {
    cb_tx: MTx<TaskCb>,
    pending: AtomicUsize,
    closing: AtomicBool,
}

impl ExecutorInner {
    /// Accounts for a new launch, unless the executor is already closing.
    fn begin_launch(&self, what: &str) -> bool {
        if self.closing.load(Ordering::Acquire) {
            error!("{} rejected: executor is closing", what);
            return false;
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        return true;
    }

    /// Unconditional callback delivery; the worker's last act.
    fn post(&self, callback: TaskCb) {
        if self.cb_tx.send(callback).is_err() {
            warn!("task callback dropped: executor channel closed");
        }
    }
}

pub struct Executor {
    inner: Arc<ExecutorInner>,
    cb_rx: AsyncRx<TaskCb>,
}

impl Executor {
    /// Creates an executor whose callback channel holds `capacity` entries
    /// (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let (cb_tx, cb_rx) = mpsc::bounded_tx_blocking_rx_async::<TaskCb>(capacity.max(1));
        Self {
            inner: Arc::new(ExecutorInner {
                cb_tx,
                pending: AtomicUsize::new(0),
                closing: AtomicBool::new(false),
            }),
            cb_rx,
        }
    }

    /// Launches `body` on a fresh worker.
    ///
    /// The worker posts `callback` to the callback channel no matter what:
    /// a panicking body is contained and logged first. The submitter never
    /// suspends.
    pub fn go<F, C>(&self, body: F, callback: C)
    where
        F: FnOnce() + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        if !self.inner.begin_launch("task") {
            return;
        }
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = catch_unwind(AssertUnwindSafe(body)) {
                stack::log_panic("task body", e);
            }
            inner.post(Box::new(callback));
        });
    }

    /// Executes one callback drained from [Executor::callback_channel].
    ///
    /// The pending count drops whether the callback succeeds or panics;
    /// callback panics are logged and swallowed.
    pub fn cb(&self, callback: TaskCb) {
        if let Err(e) = catch_unwind(AssertUnwindSafe(callback)) {
            stack::log_panic("task callback", e);
        }
        self.inner.pending.fetch_sub(1, Ordering::AcqRel);
    }

    /// Drains and executes callbacks until no task is pending.
    ///
    /// Submissions observed after close begins are rejected with an error
    /// log, so the drain terminates.
    pub async fn close(&mut self) {
        self.inner.closing.store(true, Ordering::Release);
        while self.inner.pending.load(Ordering::Acquire) > 0 {
            match self.cb_rx.recv().await {
                Ok(callback) => self.cb(callback),
                Err(_) => break,
            }
        }
    }

    /// True when every launched task has had its callback drained.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.inner.pending.load(Ordering::Acquire) == 0
    }

    /// The callback channel, drained by the owning event loop into
    /// [Executor::cb].
    #[inline]
    pub fn callback_channel(&self) -> &AsyncRx<TaskCb> {
        &self.cb_rx
    }

    /// Creates a FIFO-serialized sub-scheduler over this executor.
    pub fn new_linear_context(&self) -> LinearContext {
        LinearContext {
            inner: self.inner.clone(),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            exec_gate: Arc::new(Mutex::new(())),
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "executor pending={}", self.inner.pending.load(Ordering::Relaxed))
    }
}

struct LinearJob {
    body: Box<dyn FnOnce() + Send>,
    callback: TaskCb,
}

/// Strict FIFO execution over an [Executor].
///
/// Every submission still gets its own worker, but a shared execution gate
/// lets only one of them run its body at a time, and each worker pops the
/// current queue head. The first worker through the gate runs job 1, the
/// second job 2, and so on; splitting the queue gate from the execution gate
/// is what lets new submissions enqueue while an older job runs.
#[derive(Clone)]
pub struct LinearContext {
    inner: Arc<ExecutorInner>,
    queue: Arc<Mutex<VecDeque<LinearJob>>>,
    exec_gate: Arc<Mutex<()>>,
}

impl LinearContext {
    /// Launches `body` behind every previously submitted body of this
    /// context. Callback delivery matches [Executor::go].
    pub fn go<F, C>(&self, body: F, callback: C)
    where
        F: FnOnce() + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        if !self.inner.begin_launch("linear task") {
            return;
        }
        self.queue
            .lock()
            .unwrap()
            .push_back(LinearJob { body: Box::new(body), callback: Box::new(callback) });
        let inner = self.inner.clone();
        let queue = self.queue.clone();
        let exec_gate = self.exec_gate.clone();
        tokio::task::spawn_blocking(move || {
            let gate = exec_gate.lock().unwrap();
            // never empty: the job was pushed before this worker was spawned
            let LinearJob { body, callback } = queue.lock().unwrap().pop_front().unwrap();
            if let Err(e) = catch_unwind(AssertUnwindSafe(body)) {
                stack::log_panic("linear task body", e);
            }
            drop(gate);
            inner.post(callback);
        });
    }
}

impl std::fmt::Debug for LinearContext {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "linear context depth={}", self.queue.lock().unwrap().len())
    }
}
