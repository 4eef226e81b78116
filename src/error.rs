use std::fmt;

/// Prefix shared by every bus-internal error serialization.
pub const BUS_ERR_PREFIX: &'static str = "rpc_";

/// Call-time errors, always delivered through the reply path.
///
/// A synchronous caller receives these as the `Err` variant of its call
/// result; an asynchronous caller receives them through its callback. They
/// are never thrown through the caller's stack.
#[derive(strum::Display, PartialEq, Clone, thiserror::Error)]
pub enum CallError {
    /// Unknown procedure key.
    #[strum(serialize = "rpc_method_notfound")]
    NotFound,
    /// Procedure or callback shape inconsistent with the caller's expectation.
    #[strum(serialize = "rpc_arity_mismatch")]
    ArityMismatch,
    /// Submitted after close, or drained during close shutdown.
    #[strum(serialize = "rpc_server_closed")]
    ServerClosed,
    /// The async reply channel is at capacity, or the call channel is full.
    #[strum(serialize = "rpc_busy")]
    Busy,
    /// The procedure panicked. The stack trace, when captured, goes to the
    /// error log rather than the error itself.
    #[strum(to_string = "rpc_panic: {reason}")]
    Panicked { reason: String },
}

// The default Debug derive would ignore the strum serializations.
impl fmt::Debug for CallError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl CallError {
    #[inline]
    pub(crate) fn panicked(reason: String) -> Self {
        Self::Panicked { reason }
    }
}
