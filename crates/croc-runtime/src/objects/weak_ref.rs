//! GC-nulled weak reference (spec.md §3, §4.3, GLOSSARY).

use core::cell::Cell;

use crate::gc::{Gc, GcColor, GcRef, Trace};
use crate::value::ValueKind;

pub struct WeakRefObj {
    target: Cell<GcRef>,
}

impl WeakRefObj {
    pub fn new(target: GcRef) -> Self {
        Self { target: Cell::new(target) }
    }

    /// Null iff the target was collected (spec.md §8's weak-ref testable
    /// property).
    pub fn get(&self) -> GcRef {
        self.target.get()
    }

    /// Patch the target after construction (`croc-serialize`'s reader
    /// forward-declares a WeakRef's own `GcRef` before the referent it read
    /// from the stream is necessarily resolved).
    pub fn retarget(&self, target: GcRef) {
        self.target.set(target);
    }
}

impl Trace for WeakRefObj {
    const KIND: ValueKind = ValueKind::WeakRef;

    /// A WeakRef's target is deliberately never traced (spec.md §4.3:
    /// "enqueued but ... not followed by the mark"). `Gc::mark_gray`
    /// special-cases `ValueKind::WeakRef` before this would even run.
    fn trace(&self, _mark: &mut dyn FnMut(GcRef)) {}
}

/// Called by `Gc::sweep_phase` for every recorded WeakRef: null the target
/// if it is (still) white, i.e. unreachable from strong roots.
pub(crate) fn sweep_if_dead(obj: GcRef) {
    let w = unsafe { Gc::payload::<WeakRefObj>(obj) };
    let t = w.target.get();
    if !t.is_null() && Gc::header(t).color == GcColor::White {
        w.target.set(core::ptr::null_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_target_is_not_swept() {
        let w = WeakRefObj::new(core::ptr::null_mut());
        assert!(w.get().is_null());
    }
}
