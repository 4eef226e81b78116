//! Caller side of the RPC bus.
//!
//! A [Client] is a single-owner handle bound to one server: use it from one
//! conceptual caller at a time. Synchronous calls ride a one-slot reply
//! channel; asynchronous calls ride a bounded reply channel that the owner
//! drains through [Client::cb].

use crate::error::CallError;
use crate::proto::*;
use crate::server::ServerInner;
use crate::stack;
use crate::value::Value;
use captains_log::*;
use crossfire::{mpmc, MAsyncRx, MAsyncTx, TrySendError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// How long [Client::close] waits for one straggling reply before giving up.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Client {
    server: Arc<ServerInner>,
    sync_tx: MAsyncTx<RetInfo>,
    sync_rx: MAsyncRx<RetInfo>,
    async_tx: MAsyncTx<RetInfo>,
    async_rx: MAsyncRx<RetInfo>,
    /// Async replies outstanding in the async channel or at the server.
    pending: usize,
    /// Logical cap on outstanding async calls; may be 0 (sync-only handle).
    cap: usize,
}

impl Client {
    pub(crate) fn new(server: Arc<ServerInner>, async_capacity: usize) -> Self {
        let (sync_tx, sync_rx) = mpmc::bounded_async::<RetInfo>(1);
        // the channel itself needs a slot even when the logical cap is 0
        let (async_tx, async_rx) = mpmc::bounded_async::<RetInfo>(async_capacity.max(1));
        Self { server, sync_tx, sync_rx, async_tx, async_rx, pending: 0, cap: async_capacity }
    }

    /// Submits one synchronous call and awaits its reply.
    async fn call(
        &self, method: MethodId, expect: Arity, args: Vec<Value>,
    ) -> Result<Payload, CallError> {
        if self.server.is_closed() {
            return Err(CallError::ServerClosed);
        }
        let procedure = self.server.resolve(&method, expect)?;
        // discard any reply stranded by an earlier call abandoned mid-close
        while self.sync_rx.try_recv().is_ok() {}
        let ci = CallInfo {
            procedure,
            expect,
            args,
            sink: ReplySink::Sync(self.sync_tx.clone()),
            cb: None,
        };
        if self.server.call_tx.send(ci).await.is_err() {
            return Err(CallError::ServerClosed);
        }
        if self.server.is_closed() {
            // close raced the submit; the shutdown drain may or may not have
            // seen our request, so bound the wait
            return match tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, self.sync_rx.recv()).await {
                Ok(Ok(ri)) => ri.into_result(),
                _ => Err(CallError::ServerClosed),
            };
        }
        match self.sync_rx.recv().await {
            Ok(ri) => ri.into_result(),
            // the server dropped our request without replying
            Err(_) => Err(CallError::ServerClosed),
        }
    }

    /// Synchronous void call.
    ///
    /// Reentrancy hazard: a module that drains its own server loop must not
    /// issue a synchronous call back into itself; it would deadlock.
    pub async fn call_void(
        &self, method: impl Into<MethodId>, args: Vec<Value>,
    ) -> Result<(), CallError> {
        match self.call(method.into(), Arity::Void, args).await? {
            Payload::Empty => Ok(()),
            _ => Err(CallError::ArityMismatch),
        }
    }

    /// Synchronous single-value call. See [Client::call_void] for the
    /// reentrancy hazard.
    pub async fn call_one(
        &self, method: impl Into<MethodId>, args: Vec<Value>,
    ) -> Result<Value, CallError> {
        match self.call(method.into(), Arity::One, args).await? {
            Payload::One(v) => Ok(v),
            _ => Err(CallError::ArityMismatch),
        }
    }

    /// Synchronous multi-value call. See [Client::call_void] for the
    /// reentrancy hazard.
    pub async fn call_multi(
        &self, method: impl Into<MethodId>, args: Vec<Value>,
    ) -> Result<Vec<Value>, CallError> {
        match self.call(method.into(), Arity::Multi, args).await? {
            Payload::Multi(vs) => Ok(vs),
            _ => Err(CallError::ArityMismatch),
        }
    }

    /// Submits an asynchronous call; never suspends the submitter.
    ///
    /// The callback's shape selects the expected arity. Over the pending cap
    /// the callback runs right here with [CallError::Busy]; any submit-path
    /// failure otherwise comes back as a synthetic reply drained through
    /// [Client::cb]. Exactly one callback invocation happens per call.
    pub fn async_call(&mut self, method: impl Into<MethodId>, args: Vec<Value>, cb: Callback) {
        let method = method.into();
        if self.pending >= self.cap {
            trace!("async {}: over pending cap {}", method, self.cap);
            Self::run_cb(cb, Err(CallError::Busy));
            return;
        }
        let expect = cb.arity();
        if self.server.is_closed() {
            self.post_err(CallError::ServerClosed, cb);
            return;
        }
        let procedure = match self.server.resolve(&method, expect) {
            Err(e) => {
                self.post_err(e, cb);
                return;
            }
            Ok(p) => p,
        };
        let ci = CallInfo {
            procedure,
            expect,
            args,
            sink: ReplySink::Async(self.async_tx.clone()),
            cb: Some(cb),
        };
        match self.server.call_tx.try_send(ci) {
            Ok(()) => self.pending += 1,
            Err(TrySendError::Full(ci)) => {
                // server call channel congestion shows up as busy
                self.post_err(CallError::Busy, ci.cb.unwrap());
            }
            Err(TrySendError::Disconnected(ci)) => {
                self.post_err(CallError::ServerClosed, ci.cb.unwrap());
            }
        }
    }

    /// Posts a synthetic error reply onto the async channel so it is drained
    /// like any other completion. Counted as pending: every reply that enters
    /// the channel is decremented by [Client::cb] on the way out.
    fn post_err(&mut self, err: CallError, cb: Callback) {
        match self.async_tx.try_send(RetInfo::error(err, Some(cb))) {
            Ok(()) => self.pending += 1,
            Err(TrySendError::Full(ri)) | Err(TrySendError::Disconnected(ri)) => {
                // no room for the synthetic reply; run the callback here
                let err = ri.err.unwrap();
                Self::run_cb(ri.cb.unwrap(), Err(err));
            }
        }
    }

    fn run_cb(cb: Callback, ret: Result<Payload, CallError>) {
        if let Err(e) = catch_unwind(AssertUnwindSafe(move || cb.deliver(ret))) {
            stack::log_panic("async callback", e);
        }
    }

    /// Executes one async reply drained from [Client::async_return_channel].
    ///
    /// The pending counter is decremented whether the user callback succeeds
    /// or panics; callback panics are logged and swallowed.
    pub fn cb(&mut self, ri: RetInfo) {
        if self.pending > 0 {
            self.pending -= 1;
        }
        let RetInfo { payload, err, cb } = ri;
        match cb {
            Some(cb) => {
                let ret = match err {
                    Some(e) => Err(e),
                    None => Ok(payload),
                };
                Self::run_cb(cb, ret);
            }
            None => warn!("async reply without a callback"),
        }
    }

    /// Drains every outstanding async reply and executes its callback, so the
    /// caller is never left with un-invoked callbacks. Does not close the
    /// bound server. A sync call in flight at close time is a caller-contract
    /// violation.
    pub async fn close(&mut self) {
        while self.pending > 0 {
            match tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, self.async_rx.recv()).await {
                Ok(Ok(ri)) => self.cb(ri),
                Ok(Err(_)) => break,
                Err(_) => {
                    warn!("client close timed out with {} replies outstanding", self.pending);
                    break;
                }
            }
        }
    }

    /// True when no async call is outstanding.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.pending == 0
    }

    /// The async reply channel, drained by the owning event loop into
    /// [Client::cb].
    #[inline]
    pub fn async_return_channel(&self) -> &MAsyncRx<RetInfo> {
        &self.async_rx
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "client pending={}/{}", self.pending, self.cap)
    }
}
