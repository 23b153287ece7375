//! Type-erased GC slot for the `Thread` value kind.
//!
//! A `Thread`'s register stack, activation-record stack, and scheduler
//! state (spec.md §4.4, §4.6) live in `croc-vm` (`croc_vm::thread::Thread`),
//! which depends on this crate — so this crate cannot name that type
//! directly without an upward dependency. `ThreadSlot` is the type-erased
//! trace/downcast boundary crossing that edge, the same shape this
//! collector already uses for kind dispatch in
//! `crate::objects::trace_children` (see `gc.rs`'s module doc, grounded on
//! `other_examples/..._mark_sweep.rs.rs`'s type-erased trace dispatch).

use core::any::Any;

use crate::gc::{GcRef, Trace};
use crate::value::ValueKind;

pub trait ThreadTrace: Any {
    fn trace_refs(&self, mark: &mut dyn FnMut(GcRef));
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub struct ThreadSlot {
    inner: Box<dyn ThreadTrace>,
}

impl ThreadSlot {
    pub fn new(inner: Box<dyn ThreadTrace>) -> Self {
        Self { inner }
    }

    pub fn downcast_ref<T: ThreadTrace>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: ThreadTrace>(&mut self) -> Option<&mut T> {
        self.inner.as_any_mut().downcast_mut::<T>()
    }
}

impl Trace for ThreadSlot {
    const KIND: ValueKind = ValueKind::Thread;

    fn trace(&self, mark: &mut dyn FnMut(GcRef)) {
        self.inner.trace_refs(mark)
    }
}
