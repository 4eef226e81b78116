//! Call dispatch side of the RPC bus.
//!
//! A [Server] owns a write-once procedure registry and a bounded call channel.
//! Peer modules talk to it through [Client](crate::Client) handles; the owning
//! event loop drains [Server::call_channel] and runs every request through
//! [Server::exec], so procedures always execute on the owner task and module
//! state needs no locks.

use crate::client::Client;
use crate::error::CallError;
use crate::proto::*;
use crate::stack;
use crate::value::Value;
use captains_log::*;
use crossfire::{mpmc, MAsyncRx, MAsyncTx};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) struct ServerInner {
    pub(crate) registry: HashMap<MethodId, Arc<Procedure>>,
    pub(crate) call_tx: MAsyncTx<CallInfo>,
    closed: AtomicBool,
}

impl ServerInner {
    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn lookup(&self, method: &MethodId) -> Result<Arc<Procedure>, CallError> {
        match self.registry.get(method) {
            Some(p) => Ok(p.clone()),
            None => Err(CallError::NotFound),
        }
    }

    /// Resolves `method` and checks it against the caller's expected arity.
    pub(crate) fn resolve(
        &self, method: &MethodId, expect: Arity,
    ) -> Result<Arc<Procedure>, CallError> {
        let procedure = self.lookup(method)?;
        if procedure.arity() != expect {
            return Err(CallError::ArityMismatch);
        }
        Ok(procedure)
    }
}

pub struct Server {
    inner: Arc<ServerInner>,
    call_rx: Option<MAsyncRx<CallInfo>>,
}

impl Server {
    /// Creates a server with an empty registry and a call channel of
    /// `capacity` (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let (call_tx, call_rx) = mpmc::bounded_async::<CallInfo>(capacity.max(1));
        Self {
            inner: Arc::new(ServerInner {
                registry: HashMap::new(),
                call_tx,
                closed: AtomicBool::new(false),
            }),
            call_rx: Some(call_rx),
        }
    }

    /// Registers `procedure` under `method`.
    ///
    /// Setup is single-phase: registration is only allowed before the first
    /// client handle is opened. Panics on a duplicate key or on registration
    /// after a handle exists; both are process configuration errors.
    pub fn register(&mut self, method: impl Into<MethodId>, procedure: Procedure) {
        let method = method.into();
        let inner = Arc::get_mut(&mut self.inner)
            .expect("register is only allowed before the first client handle is opened");
        if inner.registry.contains_key(&method) {
            panic!("method {} is already registered", method);
        }
        debug!("registered method {} ({})", method, procedure.arity());
        inner.registry.insert(method, Arc::new(procedure));
    }

    /// The call channel, drained by the owning event loop.
    #[inline]
    pub fn call_channel(&self) -> &MAsyncRx<CallInfo> {
        self.call_rx.as_ref().expect("server closed")
    }

    /// Opens a client handle bound to this server.
    ///
    /// `async_capacity` bounds the client's outstanding async calls; 0 yields
    /// a handle whose async calls always fast-fail busy.
    pub fn open(&self, async_capacity: usize) -> Client {
        Client::new(self.inner.clone(), async_capacity)
    }

    /// Runs one call on the owning task and routes its reply.
    ///
    /// This is the sole place procedures run. Panics in the procedure are
    /// contained, logged, and reported as [CallError::Panicked] through the
    /// reply sink.
    pub async fn exec(&self, ci: CallInfo) {
        let CallInfo { procedure, expect, args, sink, cb } = ci;
        let (payload, err) = if procedure.arity() != expect {
            (Payload::Empty, Some(CallError::ArityMismatch))
        } else {
            match catch_unwind(AssertUnwindSafe(|| procedure.invoke(&args))) {
                Ok(payload) => (payload, None),
                Err(e) => {
                    let reason = stack::log_panic("procedure", e);
                    (Payload::Empty, Some(CallError::panicked(reason)))
                }
            }
        };
        self.ret(sink, RetInfo { payload, err, cb }).await;
    }

    /// Routes a completion record to its reply sink. Send failures never
    /// cascade: a gone caller is logged and the record is dropped.
    async fn ret(&self, sink: ReplySink, ri: RetInfo) {
        match sink {
            ReplySink::Sync(tx) => {
                if tx.send(ri).await.is_err() {
                    warn!("sync reply dropped: caller is gone");
                }
            }
            ReplySink::Async(tx) => {
                if tx.send(ri).await.is_err() {
                    debug!("async reply dropped: client closed its channel");
                }
            }
            ReplySink::Discard => {}
        }
    }

    /// Fire-and-forget call: no reply sink, the result is discarded.
    ///
    /// An unknown method is logged and dropped; fire-and-forget has no error
    /// path. Must not be invoked from the loop that drains this server while
    /// the call channel is full.
    pub async fn go(&self, method: impl Into<MethodId>, args: Vec<Value>) {
        let method = method.into();
        if self.inner.is_closed() {
            warn!("go {}: {}", method, CallError::ServerClosed);
            return;
        }
        match self.inner.lookup(&method) {
            Err(e) => warn!("go {}: {}", method, e),
            Ok(procedure) => {
                let expect = procedure.arity();
                let ci =
                    CallInfo { procedure, expect, args, sink: ReplySink::Discard, cb: None };
                if self.inner.call_tx.send(ci).await.is_err() {
                    warn!("go {}: {}", method, CallError::ServerClosed);
                }
            }
        }
    }

    /// Synchronous void call through a transient client.
    pub async fn call_void(
        &self, method: impl Into<MethodId>, args: Vec<Value>,
    ) -> Result<(), CallError> {
        self.open(0).call_void(method, args).await
    }

    /// Synchronous single-value call through a transient client.
    pub async fn call_one(
        &self, method: impl Into<MethodId>, args: Vec<Value>,
    ) -> Result<Value, CallError> {
        self.open(0).call_one(method, args).await
    }

    /// Synchronous multi-value call through a transient client.
    pub async fn call_multi(
        &self, method: impl Into<MethodId>, args: Vec<Value>,
    ) -> Result<Vec<Value>, CallError> {
        self.open(0).call_multi(method, args).await
    }

    /// Closes the call channel and fails the backlog.
    ///
    /// Buffered requests each receive a terminal [CallError::ServerClosed]
    /// reply so no caller blocks forever; submissions from that point on fail
    /// at the sender.
    pub async fn close(&mut self) {
        self.inner.closed.store(true, Ordering::Release);
        if let Some(call_rx) = self.call_rx.take() {
            let mut drained = 0usize;
            while let Ok(ci) = call_rx.try_recv() {
                self.ret(ci.sink, RetInfo::error(CallError::ServerClosed, ci.cb)).await;
                drained += 1;
            }
            if drained > 0 {
                debug!("server closed, failed {} queued calls", drained);
            }
            // dropping the receiver disconnects every in-flight sender
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "server with {} methods", self.inner.registry.len())
    }
}
