//! Host embedding error taxonomy (spec.md §4.7: "Stack underflow or a type
//! mismatch is always a thrown exception, never silent. An operation must
//! name itself in the error for readability", SPEC_FULL.md §4.7 expansion).

use thiserror::Error;

use croc_runtime::Value;
use croc_vm::VmError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("{op}: stack underflow")]
    StackUnderflow { op: &'static str },

    #[error("{op}: invalid stack index {index}")]
    InvalidIndex { op: &'static str, index: i64 },

    #[error("{op}: expected {expected} at index {index}, got {got}")]
    TypeMismatch { op: &'static str, index: i64, expected: &'static str, got: &'static str },

    #[error("{op}: value is not callable")]
    NotCallable { op: &'static str },

    #[error("newGlobal: global '{name}' already exists")]
    GlobalExists { name: String },

    #[error("getGlobal/setGlobal: no such global '{name}'")]
    GlobalMissing { name: String },

    #[error("invalid ref id {id}")]
    InvalidRef { id: u64 },

    /// A script-level exception unwound out of a call the host made
    /// (spec.md §4.5's "propagates out of the call into host code, which
    /// sees it as an error return from the call primitive"). The host
    /// recovers the thrown value with [`crate::stack::Stack::catch_exception`].
    #[error("unhandled script exception")]
    ScriptException,

    /// Any `VmError` that isn't itself a script exception (stack overflow,
    /// a coroutine protocol violation, GC re-entry, ...) surfaces unchanged.
    #[error(transparent)]
    Vm(#[from] VmErrorNoValue),
}

/// `VmError` minus its `Value` payload, kept `Eq` so `ApiError` itself can
/// derive `Eq` (a thrown `Value` is not `Eq` — it may be a float). The
/// payload is never lost: `VmError::ScriptException` is intercepted by
/// `From<VmError>` below and turned into `ApiError::ScriptException`
/// instead, with the thrown value left in the thread's `pending_exception`
/// slot for `catchException` to retrieve.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct VmErrorNoValue(String);

impl From<VmError> for ApiError {
    fn from(e: VmError) -> Self {
        match e {
            VmError::ScriptException(_) => ApiError::ScriptException,
            other => ApiError::Vm(VmErrorNoValue(other.to_string())),
        }
    }
}

impl ApiError {
    /// Render this error as a thrown Croc `Value` (a plain `String`, since
    /// the core has no exception class hierarchy of its own — spec.md §7:
    /// "The core does not hard-code this hierarchy; it is assembled by the
    /// standard library").
    pub fn into_exception(self, gc: &mut croc_runtime::Gc) -> Value {
        Value::Ref(gc.intern_string(&self.to_string()))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
