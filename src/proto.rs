//! Call protocol types shared by [Server](crate::Server) and [Client](crate::Client).

use crate::error::CallError;
use crate::value::Value;
use crossfire::MAsyncTx;
use std::fmt;
use std::sync::Arc;

/// Procedure key. Short strings and small integers cover typical use.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MethodId {
    Str(String),
    Num(i32),
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MethodId::Str(s) => write!(f, "{}", s),
            MethodId::Num(n) => write!(f, "#{}", n),
        }
    }
}

impl From<&str> for MethodId {
    #[inline]
    fn from(s: &str) -> Self {
        MethodId::Str(s.to_string())
    }
}

impl From<String> for MethodId {
    #[inline]
    fn from(s: String) -> Self {
        MethodId::Str(s)
    }
}

impl From<i32> for MethodId {
    #[inline]
    fn from(n: i32) -> Self {
        MethodId::Num(n)
    }
}

/// The shape of a procedure's result, fixed at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Arity {
    #[strum(serialize = "void")]
    Void,
    #[strum(serialize = "one")]
    One,
    #[strum(serialize = "multi")]
    Multi,
}

/// A registered callable of one of the three arities.
///
/// Procedures run on the server's owner task only, but the registry is shared
/// with client handles, hence the `Sync` bound.
pub enum Procedure {
    Void(Box<dyn Fn(&[Value]) + Send + Sync>),
    One(Box<dyn Fn(&[Value]) -> Value + Send + Sync>),
    Multi(Box<dyn Fn(&[Value]) -> Vec<Value> + Send + Sync>),
}

impl Procedure {
    #[inline]
    pub fn void(f: impl Fn(&[Value]) + Send + Sync + 'static) -> Self {
        Procedure::Void(Box::new(f))
    }

    #[inline]
    pub fn one(f: impl Fn(&[Value]) -> Value + Send + Sync + 'static) -> Self {
        Procedure::One(Box::new(f))
    }

    #[inline]
    pub fn multi(f: impl Fn(&[Value]) -> Vec<Value> + Send + Sync + 'static) -> Self {
        Procedure::Multi(Box::new(f))
    }

    #[inline]
    pub fn arity(&self) -> Arity {
        match self {
            Procedure::Void(_) => Arity::Void,
            Procedure::One(_) => Arity::One,
            Procedure::Multi(_) => Arity::Multi,
        }
    }

    #[inline]
    pub(crate) fn invoke(&self, args: &[Value]) -> Payload {
        match self {
            Procedure::Void(f) => {
                f(args);
                Payload::Empty
            }
            Procedure::One(f) => Payload::One(f(args)),
            Procedure::Multi(f) => Payload::Multi(f(args)),
        }
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "procedure/{}", self.arity())
    }
}

/// Result values produced by a procedure. Empty on error.
#[derive(Debug, PartialEq)]
pub enum Payload {
    Empty,
    One(Value),
    Multi(Vec<Value>),
}

/// Completion handler carried opaquely through the call path, shaped to the
/// procedure's arity.
pub enum Callback {
    Void(Box<dyn FnOnce(Result<(), CallError>) + Send>),
    One(Box<dyn FnOnce(Result<Value, CallError>) + Send>),
    Multi(Box<dyn FnOnce(Result<Vec<Value>, CallError>) + Send>),
}

impl Callback {
    #[inline]
    pub fn void(f: impl FnOnce(Result<(), CallError>) + Send + 'static) -> Self {
        Callback::Void(Box::new(f))
    }

    #[inline]
    pub fn one(f: impl FnOnce(Result<Value, CallError>) + Send + 'static) -> Self {
        Callback::One(Box::new(f))
    }

    #[inline]
    pub fn multi(f: impl FnOnce(Result<Vec<Value>, CallError>) + Send + 'static) -> Self {
        Callback::Multi(Box::new(f))
    }

    #[inline]
    pub fn arity(&self) -> Arity {
        match self {
            Callback::Void(_) => Arity::Void,
            Callback::One(_) => Arity::One,
            Callback::Multi(_) => Arity::Multi,
        }
    }

    /// Invokes the callback with the completion.
    ///
    /// A payload whose shape does not match the callback is reported as
    /// [CallError::ArityMismatch] through the callback itself, never a panic.
    pub(crate) fn deliver(self, ret: Result<Payload, CallError>) {
        match self {
            Callback::Void(f) => match ret {
                Ok(Payload::Empty) => f(Ok(())),
                Ok(_) => f(Err(CallError::ArityMismatch)),
                Err(e) => f(Err(e)),
            },
            Callback::One(f) => match ret {
                Ok(Payload::One(v)) => f(Ok(v)),
                Ok(_) => f(Err(CallError::ArityMismatch)),
                Err(e) => f(Err(e)),
            },
            Callback::Multi(f) => match ret {
                Ok(Payload::Multi(vs)) => f(Ok(vs)),
                Ok(_) => f(Err(CallError::ArityMismatch)),
                Err(e) => f(Err(e)),
            },
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "callback/{}", self.arity())
    }
}

/// Where a [RetInfo] is delivered.
pub enum ReplySink {
    Sync(MAsyncTx<RetInfo>),
    Async(MAsyncTx<RetInfo>),
    Discard,
}

impl fmt::Debug for ReplySink {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReplySink::Sync(_) => write!(f, "sync"),
            ReplySink::Async(_) => write!(f, "async"),
            ReplySink::Discard => write!(f, "discard"),
        }
    }
}

/// An in-flight request record.
pub struct CallInfo {
    pub(crate) procedure: Arc<Procedure>,
    pub(crate) expect: Arity,
    pub(crate) args: Vec<Value>,
    pub(crate) sink: ReplySink,
    pub(crate) cb: Option<Callback>,
}

impl fmt::Debug for CallInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "call {:?} args={} sink={:?}", self.procedure, self.args.len(), self.sink)
    }
}

/// A completion record: result payload or error, plus the carried callback.
pub struct RetInfo {
    pub(crate) payload: Payload,
    pub(crate) err: Option<CallError>,
    pub(crate) cb: Option<Callback>,
}

impl RetInfo {
    #[inline]
    pub(crate) fn error(err: CallError, cb: Option<Callback>) -> Self {
        Self { payload: Payload::Empty, err: Some(err), cb }
    }

    #[inline]
    pub fn err(&self) -> Option<&CallError> {
        self.err.as_ref()
    }

    #[inline]
    pub(crate) fn into_result(self) -> Result<Payload, CallError> {
        match self.err {
            Some(e) => Err(e),
            None => Ok(self.payload),
        }
    }
}

impl fmt::Debug for RetInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.err.as_ref() {
            Some(e) => write!(f, "ret err={}", e),
            None => write!(f, "ret {:?}", self.payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_method_id() {
        assert_eq!(MethodId::from("add"), MethodId::Str("add".to_string()));
        assert_eq!(MethodId::from(3), MethodId::Num(3));
        assert_eq!(MethodId::from("add").to_string(), "add");
        assert_eq!(MethodId::from(3).to_string(), "#3");
    }

    #[test]
    fn test_procedure_invoke() {
        let p = Procedure::one(|args| Value::from(args.len() as i64));
        assert_eq!(p.arity(), Arity::One);
        assert_eq!(p.invoke(&[Value::Nil]), Payload::One(Value::Int(1)));
        let p = Procedure::void(|_| {});
        assert_eq!(p.invoke(&[]), Payload::Empty);
        let p = Procedure::multi(|_| vec![Value::Nil, Value::Nil]);
        assert_eq!(p.invoke(&[]), Payload::Multi(vec![Value::Nil, Value::Nil]));
    }

    #[test]
    fn test_callback_shape_mismatch() {
        let hit = Arc::new(AtomicUsize::new(0));
        let h = hit.clone();
        let cb = Callback::one(move |r| {
            assert_eq!(r.unwrap_err(), CallError::ArityMismatch);
            h.fetch_add(1, Ordering::SeqCst);
        });
        cb.deliver(Ok(Payload::Empty));
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_error_passthrough() {
        let cb = Callback::multi(|r| assert_eq!(r.unwrap_err(), CallError::Busy));
        cb.deliver(Err(CallError::Busy));
    }
}
