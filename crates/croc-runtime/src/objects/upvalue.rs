//! Captured-variable cell: open (points into a live register window) or
//! closed (heap-resident) (spec.md §3, §4.2, §4.4, GLOSSARY).
//!
//! The register window an open upvalue points into belongs to a `Thread`
//! owned by `croc-vm`; this crate only tracks *which* slot, not the stack
//! itself (an upward dependency this crate cannot take). `croc_vm::thread`
//! performs the actual read/write/close by passing a slot-index callback,
//! matching spec.md §4.4's "while an AR is live, an upvalue ... points
//! directly at the stack slot".

use crate::gc::{GcRef, Trace};
use crate::value::{Value, ValueKind};

#[derive(Clone, Copy)]
pub enum UpvalueState {
    Open { stack_index: usize },
    Closed(Value),
}

pub struct UpvalueObj {
    pub state: UpvalueState,
}

impl UpvalueObj {
    pub fn open(stack_index: usize) -> Self {
        Self { state: UpvalueState::Open { stack_index } }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, UpvalueState::Open { .. })
    }

    pub fn open_index(&self) -> Option<usize> {
        match self.state {
            UpvalueState::Open { stack_index } => Some(stack_index),
            UpvalueState::Closed(_) => None,
        }
    }

    /// Copy the live slot's value into the heap object, per spec.md §4.4's
    /// "closing" an upvalue when its owning activation record returns.
    pub fn close(&mut self, value: Value) {
        self.state = UpvalueState::Closed(value);
    }

    /// Read through this upvalue; `read_open` is invoked with the stack
    /// index when still open.
    pub fn get(&self, read_open: impl FnOnce(usize) -> Value) -> Value {
        match self.state {
            UpvalueState::Open { stack_index } => read_open(stack_index),
            UpvalueState::Closed(v) => v,
        }
    }

    /// Write through this upvalue; `write_open` is invoked with the stack
    /// index when still open.
    pub fn set(&mut self, value: Value, write_open: impl FnOnce(usize, Value)) {
        match self.state {
            UpvalueState::Open { stack_index } => write_open(stack_index, value),
            UpvalueState::Closed(_) => self.state = UpvalueState::Closed(value),
        }
    }
}

impl Trace for UpvalueObj {
    const KIND: ValueKind = ValueKind::Upvalue;

    fn trace(&self, mark: &mut dyn FnMut(GcRef)) {
        if let UpvalueState::Closed(v) = self.state {
            if let Some(r) = v.as_ref() {
                mark(r);
            }
        }
    }
}
