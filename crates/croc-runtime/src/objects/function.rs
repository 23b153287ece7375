//! Closures: script functions (`FuncDef` + env + upvalues) and native
//! functions (function pointer + env + name + captured values) (spec.md
//! §4.2).

use core::ffi::c_void;

use crate::gc::{GcRef, Trace};
use crate::value::{Value, ValueKind};

/// A host-supplied native function. Takes an opaque pointer to the calling
/// `Thread` — owned by `croc-vm`, which this crate cannot name without an
/// upward dependency — and returns the number of values it pushed as
/// results. Mirrors the C-style embedding ABI of spec.md §6 ("one handle
/// type `Thread*`... a flat collection of procedures").
pub type NativeFn = fn(*mut c_void) -> i64;

pub enum FunctionBody {
    Script {
        funcdef: GcRef,
        upvalues: Vec<GcRef>,
    },
    Native {
        ptr: NativeFn,
        name: Box<str>,
        param_count: u16,
        /// Native functions carry inline captured `Value`s directly
        /// (spec.md §4.2's "an array of captured Values (its native
        /// upvalues)") rather than heap `Upvalue` cells, since a native
        /// function has no register window to close over.
        upvalues: Vec<Value>,
    },
}

pub struct FunctionObj {
    pub env: GcRef,
    pub body: FunctionBody,
}

impl FunctionObj {
    pub fn new_script(env: GcRef, funcdef: GcRef, upvalues: Vec<GcRef>) -> Self {
        Self { env, body: FunctionBody::Script { funcdef, upvalues } }
    }

    pub fn new_native(
        env: GcRef,
        name: impl Into<Box<str>>,
        param_count: u16,
        ptr: NativeFn,
        upvalues: Vec<Value>,
    ) -> Self {
        Self { env, body: FunctionBody::Native { ptr, name: name.into(), param_count, upvalues } }
    }

    pub fn is_native(&self) -> bool {
        matches!(self.body, FunctionBody::Native { .. })
    }

    /// Native functions carry their own name; script functions are named
    /// via their `FuncDef` instead (no name stored here).
    pub fn native_name(&self) -> Option<&str> {
        match &self.body {
            FunctionBody::Native { name, .. } => Some(name),
            FunctionBody::Script { .. } => None,
        }
    }

    pub fn funcdef(&self) -> Option<GcRef> {
        match &self.body {
            FunctionBody::Script { funcdef, .. } => Some(*funcdef),
            FunctionBody::Native { .. } => None,
        }
    }
}

impl Trace for FunctionObj {
    const KIND: ValueKind = ValueKind::Function;

    fn trace(&self, mark: &mut dyn FnMut(GcRef)) {
        mark(self.env);
        match &self.body {
            FunctionBody::Script { funcdef, upvalues } => {
                mark(*funcdef);
                for &u in upvalues {
                    mark(u);
                }
            }
            FunctionBody::Native { upvalues, .. } => {
                for v in upvalues {
                    if let Some(r) = v.as_ref() {
                        mark(r);
                    }
                }
            }
        }
    }
}
