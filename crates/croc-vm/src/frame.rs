//! Activation records (spec.md §4.4).
//!
//! Grounded on the teacher's `CallFrame` (`func_id`, `pc`, `bp`, `ret_reg`,
//! `ret_count` — see `exec/call.rs`'s `exec_call`), generalized with the
//! extra bookkeeping spec.md §4.4 names that a statically-typed, non-vararg,
//! non-exception-unwinding VM doesn't need: vararg base/count, a tail-call
//! counter for collapsed traceback entries, and a direct-base-class pointer
//! for `super` calls.

use croc_runtime::GcRef;

/// One call frame. `base` is this frame's register-window origin on the
/// owning `Thread`'s register stack; slot `base + 0` is `this`, slot
/// `base + 1` is the first declared parameter (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct ActivationRecord {
    /// The `Function` value (heap `GcRef`) being executed. `None` only for
    /// the sentinel bottom frame some call paths push before a call target
    /// is resolved.
    pub function: GcRef,
    pub base: usize,
    /// Current stack extent for this frame (the `AR.top ≤ stack.length`
    /// invariant of spec.md §8).
    pub saved_top: usize,
    pub pc: usize,
    /// First vararg's absolute stack index, and how many there are. Zero
    /// count (regardless of base) means "no varargs captured".
    pub vararg_base: usize,
    pub vararg_count: usize,
    /// Where the caller wants this call's results written, and how many it
    /// expects (`u32::MAX` sentinel = "all of them", spec.md §4.4/§4.5).
    pub return_base: usize,
    pub expected_returns: u32,
    /// Incremented on every tail-call executed *through* this same frame
    /// slot, so a collapsed chain of tail calls still produces one
    /// traceback line (spec.md §4.4, §4.5, §7 — `<N tailcalls>`).
    pub tailcall_count: u32,
    /// The class `super` resolves against from inside a method body
    /// (spec.md §4.4's "pointer to the direct-base class").
    pub base_class: Option<GcRef>,
}

pub const ALL_RETURNS: u32 = u32::MAX;

impl ActivationRecord {
    pub fn new(function: GcRef, base: usize, return_base: usize, expected_returns: u32) -> Self {
        Self {
            function,
            base,
            saved_top: base,
            pc: 0,
            vararg_base: base,
            vararg_count: 0,
            return_base,
            expected_returns,
            tailcall_count: 0,
            base_class: None,
        }
    }
}
