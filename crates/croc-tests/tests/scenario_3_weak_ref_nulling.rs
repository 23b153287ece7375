//! spec.md §8 end-to-end scenario 3: "create a WeakRef to it, drop the
//! strong ref, run `gc()`, assert `deref(weakref) == null`."

mod common;

use common::*;

use croc_runtime::objects::instance::InstanceObj;
use croc_runtime::objects::namespace::NamespaceObj;
use croc_runtime::objects::weak_ref::WeakRefObj;
use croc_runtime::{Gc, Value};

#[test]
fn weak_ref_is_nulled_once_its_target_is_collected() {
    let mut vm = new_vm();

    let fields = vm.gc.alloc(NamespaceObj::new("instance_fields", None));
    let class_fields = vm.gc.alloc(NamespaceObj::new("A_fields", None));
    let class_ref = vm.gc.alloc(croc_runtime::objects::class::ClassObj::new("A", None, class_fields));
    let instance = vm.gc.alloc(InstanceObj::new(class_ref, fields));

    let weak = vm.gc.alloc(WeakRefObj::new(instance));

    // Root the class (so the weak ref's `get()` payload lookup stays valid
    // via the same reasoning as scenario 2) and the weak ref itself; the
    // instance deliberately gets no root of its own.
    let mut setup = croc_api::Stack::new(&mut vm, vm.main_thread);
    setup.new_global("A", Value::Ref(class_ref)).unwrap();
    setup.new_global("weak", Value::Ref(weak)).unwrap();

    assert!(!unsafe { Gc::payload::<WeakRefObj>(weak) }.get().is_null(), "weak ref must see its live target before collection");

    vm.collect();

    assert!(unsafe { Gc::payload::<WeakRefObj>(weak) }.get().is_null(), "weak ref target must be nulled once the instance is unreachable");
}
