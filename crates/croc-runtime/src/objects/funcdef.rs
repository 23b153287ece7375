//! Heap-resident function prototype (spec.md §4.2, §6).
//!
//! Wraps a reference to the compiler-produced `croc_common_core::Module`
//! plus the index of one of its `FuncDef`s, rather than an isolated
//! `FuncDef`: a prototype's code references its module's shared constant
//! pool and inner-function table by index (spec.md §6's bytecode module
//! format), so a `FuncDefObj` needs its owning module to resolve either.
//! This also means the interpreter never needs a `Module` threaded through
//! every call — each closure already knows which module it came from.

use std::rc::Rc;

use croc_common_core::{FuncDef, Module};

use crate::gc::{GcRef, Trace};
use crate::value::ValueKind;

pub struct FuncDefObj {
    module: Rc<Module>,
    index: u32,
}

impl FuncDefObj {
    pub fn new(module: Rc<Module>, index: u32) -> Self {
        Self { module, index }
    }

    pub fn def(&self) -> &FuncDef {
        self.module
            .get_function(self.index)
            .expect("FuncDefObj index must be valid within its module")
    }

    pub fn module(&self) -> &Rc<Module> {
        &self.module
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl Trace for FuncDefObj {
    const KIND: ValueKind = ValueKind::FuncDef;

    /// A prototype's constant pool holds only value types (spec.md §4.2's
    /// bytecode-module-format note) — no outgoing GC references to mark.
    fn trace(&self, _mark: &mut dyn FnMut(GcRef)) {}
}
