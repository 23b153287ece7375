//! Internal VM error taxonomy (SPEC_FULL.md §0 expansion).
//!
//! Script-level exceptions are just thrown `Value`s (spec.md §7); this enum
//! is for conditions the interpreter itself detects before it has a thrown
//! value to work with (stack overflow, a coroutine protocol violation, a
//! bytecode reference out of range). `croc_api::ApiError` wraps these plus
//! its own stack-API-specific variants for the embedding boundary.

use thiserror::Error;

use croc_runtime::Value;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    /// An exception unwound with no `try` region anywhere on the thread's
    /// call chain to catch it; propagates out of `interp::call_into` as the
    /// host-visible error return spec.md §4.5 describes ("propagates out of
    /// the call into host code, which sees it as an error return from the
    /// call primitive").
    #[error("unhandled script exception")]
    ScriptException(Value),

    /// Internal signal used only within `interp`'s unwind search: an
    /// exception has unwound past the current synchronous call scope
    /// (metamethod or native call) with no handler found in it, so the
    /// caller one Rust frame up must resume its own unwind search from
    /// where it called in. Never observed outside `interp.rs`.
    #[error("exception propagating past a call boundary")]
    PropagatingUnwind,

    #[error("register stack overflow (limit {limit} slots)")]
    StackOverflow { limit: usize },

    #[error("division by zero")]
    DivisionByZero,

    #[error("index {index} out of bounds (length {length})")]
    IndexOutOfBounds { index: i64, length: usize },

    #[error("slice bounds [{lo}, {hi}) out of range for length {length}")]
    InvalidSlice { lo: i64, hi: i64, length: usize },

    #[error("attempt to {op} a {kind} value")]
    TypeError { op: &'static str, kind: &'static str },

    #[error("no such global '{name}'")]
    UndefinedGlobal { name: String },

    #[error("global '{name}' already exists")]
    GlobalExists { name: String },

    #[error("invalid function id {0}")]
    InvalidFunctionId(u32),

    #[error("attempt to call a non-callable {kind} value")]
    NotCallable { kind: &'static str },

    #[error("cannot resume a {state} coroutine")]
    InvalidResume { state: &'static str },

    #[error("cannot reset a coroutine that is not dead")]
    InvalidReset,

    #[error("cannot yield across a native call boundary")]
    YieldAcrossNativeCall,

    #[error("cannot yield from the main thread")]
    YieldFromMainThread,

    #[error("cannot throw while already throwing")]
    ThrowWhileThrowing,

    #[error("unhandled exception propagated out of call")]
    UnhandledException,

    #[error("GC re-entry attempted during finalization")]
    GcReentry,

    #[error("invalid ref id {0}")]
    InvalidRef(u64),

    /// The sentinel for a pending halt raised at a safe point (spec.md
    /// §4.6's "Halt", §7's "one sentinel for Halt"). Unlike a thrown
    /// script `Value`, a Halt is never caught by a `try`/`catch` region —
    /// it unwinds every activation record on the thread unconditionally.
    #[error("thread halted")]
    Halted,
}

pub type VmResult<T> = Result<T, VmError>;
