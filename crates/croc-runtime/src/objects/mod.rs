//! Heap object kinds (spec.md §4.2) and the kind-indexed dispatch the
//! collector needs without being generic over every concrete payload type.
//!
//! Each submodule owns one [`crate::value::ValueKind`]'s payload struct and
//! its [`crate::gc::Trace`] impl. This module supplies the three free
//! functions `gc.rs` calls by matching on a runtime [`ValueKind`]: tracing,
//! finalizer presence, and deallocation. The shape mirrors the teacher's
//! `gc_types::scan_object`/`free_object` kind-switch in `vo-vm/gc_types.rs`,
//! generalized from a fixed set of statically-typed containers to Croc's
//! open set of dynamically-typed object kinds.

pub mod array;
pub mod class;
pub mod function;
pub mod funcdef;
pub mod instance;
pub mod memblock;
pub mod namespace;
pub mod native_obj;
pub mod string;
pub mod table;
pub mod thread;
pub mod upvalue;
pub mod weak_ref;

use crate::gc::{Gc, GcRef};
use crate::value::ValueKind;

pub(crate) fn trace_children(kind: ValueKind, obj: GcRef, mark: &mut dyn FnMut(GcRef)) {
    use crate::gc::Trace;
    unsafe {
        match kind {
            ValueKind::String => Gc::payload::<string::StringObj>(obj).trace(mark),
            ValueKind::Table => Gc::payload::<table::TableObj>(obj).trace(mark),
            ValueKind::Array => Gc::payload::<array::ArrayObj>(obj).trace(mark),
            ValueKind::Memblock => Gc::payload::<memblock::MemblockObj>(obj).trace(mark),
            ValueKind::Namespace => Gc::payload::<namespace::NamespaceObj>(obj).trace(mark),
            ValueKind::Function => Gc::payload::<function::FunctionObj>(obj).trace(mark),
            ValueKind::FuncDef => Gc::payload::<funcdef::FuncDefObj>(obj).trace(mark),
            ValueKind::Class => Gc::payload::<class::ClassObj>(obj).trace(mark),
            ValueKind::Instance => Gc::payload::<instance::InstanceObj>(obj).trace(mark),
            ValueKind::NativeObj => Gc::payload::<native_obj::NativeObjData>(obj).trace(mark),
            ValueKind::WeakRef => Gc::payload::<weak_ref::WeakRefObj>(obj).trace(mark),
            ValueKind::Upvalue => Gc::payload::<upvalue::UpvalueObj>(obj).trace(mark),
            ValueKind::Thread => Gc::payload::<thread::ThreadSlot>(obj).trace(mark),
            ValueKind::Null | ValueKind::Bool | ValueKind::Int | ValueKind::Float | ValueKind::Char => {
                unreachable!("value kind {:?} is never heap-allocated", kind)
            }
        }
    }
}

/// Only `Instance`s can carry a finalizer (the class's finalizer hook,
/// spec.md §4.2). Everything else reports `false` unconditionally.
pub(crate) fn has_finalizer(obj: GcRef) -> bool {
    let header = Gc::header(obj);
    if header.kind() != ValueKind::Instance {
        return false;
    }
    unsafe { instance::InstanceObj::has_finalizer(Gc::payload::<instance::InstanceObj>(obj)) }
}

/// Deallocate the concrete `GcBox<T>` behind `obj`, dispatching on kind.
pub(crate) fn free_object(obj: GcRef) {
    let kind = Gc::header(obj).kind();
    unsafe {
        match kind {
            ValueKind::String => Gc::dealloc::<string::StringObj>(obj),
            ValueKind::Table => Gc::dealloc::<table::TableObj>(obj),
            ValueKind::Array => Gc::dealloc::<array::ArrayObj>(obj),
            ValueKind::Memblock => Gc::dealloc::<memblock::MemblockObj>(obj),
            ValueKind::Namespace => Gc::dealloc::<namespace::NamespaceObj>(obj),
            ValueKind::Function => Gc::dealloc::<function::FunctionObj>(obj),
            ValueKind::FuncDef => Gc::dealloc::<funcdef::FuncDefObj>(obj),
            ValueKind::Class => Gc::dealloc::<class::ClassObj>(obj),
            ValueKind::Instance => Gc::dealloc::<instance::InstanceObj>(obj),
            ValueKind::NativeObj => Gc::dealloc::<native_obj::NativeObjData>(obj),
            ValueKind::WeakRef => Gc::dealloc::<weak_ref::WeakRefObj>(obj),
            ValueKind::Upvalue => Gc::dealloc::<upvalue::UpvalueObj>(obj),
            ValueKind::Thread => Gc::dealloc::<thread::ThreadSlot>(obj),
            ValueKind::Null | ValueKind::Bool | ValueKind::Int | ValueKind::Float | ValueKind::Char => {
                unreachable!("value kind {:?} is never heap-allocated", kind)
            }
        }
    }
}
