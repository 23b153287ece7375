//! spec.md §8 end-to-end scenario 2: "a class `A` with a finalizer that
//! stores `this` into a module-global array. Create one instance, drop all
//! refs, run `gc()`. Assert the instance is alive in the global, its
//! finalizer was run exactly once, and a second `gc()` does not re-run the
//! finalizer."

mod common;

use common::*;

use croc_common_core::bytecode::{Constant, FuncDef, Module};
use croc_common_core::instruction::Opcode;
use croc_runtime::objects::array::ArrayObj;
use croc_runtime::objects::class::ClassObj;
use croc_runtime::objects::instance::InstanceObj;
use croc_runtime::objects::namespace::NamespaceObj;
use croc_runtime::{Gc, Value};

/// `A.finalize(this)`: appends `this` to the `finalized` global array and
/// bumps the `finalizeCount` global, so a single resurrection shows up as
/// both "instance reachable again" and "ran exactly once".
fn finalizer_def() -> FuncDef {
    let mut def = FuncDef::new("finalize");
    def.param_count = 0;
    def.local_slots = 5;
    def.code = vec![
        ins(Opcode::GlobalGet, 1, 0, 0), // r1 = finalized
        load_int(2, 1),                  // r2 = 1
        ins(Opcode::LengthAssign, 1, 2, 0), // finalized.length = 1
        load_int(3, 0),                  // r3 = 0
        ins(Opcode::IndexAssign, 0, 1, 3), // finalized[0] = this (r0)
        ins(Opcode::GlobalGet, 4, 1, 0), // r4 = finalizeCount
        ins(Opcode::Add, 4, 4, 2),       // r4 += 1
        ins(Opcode::GlobalSet, 4, 1, 0), // finalizeCount = r4
        ins(Opcode::Return, 0, 0, 0),
    ];
    def
}

#[test]
fn finalizer_resurrects_instance_exactly_once() {
    let mut vm = new_vm();

    let mut module = Module::new("finalizer_test");
    let name_idx = module.add_constant(Constant::String("finalized".to_string()));
    let count_idx = module.add_constant(Constant::String("finalizeCount".to_string()));
    assert_eq!(name_idx, 0);
    assert_eq!(count_idx, 1);
    module.add_function(finalizer_def());
    let module = std::rc::Rc::new(module);

    let finalized_array = vm.gc.alloc(ArrayObj::new());
    let mut setup = croc_api::Stack::new(&mut vm, vm.main_thread);
    setup.new_global("finalized", Value::Ref(finalized_array)).unwrap();
    setup.new_global("finalizeCount", Value::Int(0)).unwrap();

    let finalizer_fn = make_script_fn(&mut vm, &module, 0, vm.globals, vec![]);

    // The class must be reachable from a root too (a normal `class A { ... }`
    // declaration attaches itself to the enclosing namespace) — otherwise
    // it would be collected in the same cycle as the soon-to-be-finalizable
    // instance, and the finalizer call below would dereference a freed
    // class pointer.
    let class_fields = vm.gc.alloc(NamespaceObj::new("A_fields", None));
    let class_ref = vm.gc.alloc(ClassObj::new("A", None, class_fields));
    unsafe { Gc::payload_mut::<ClassObj>(class_ref) }.set_finalizer(Value::Ref(finalizer_fn));
    let mut setup = croc_api::Stack::new(&mut vm, vm.main_thread);
    setup.new_global("A", Value::Ref(class_ref)).unwrap();

    let instance_fields = vm.gc.alloc(NamespaceObj::new("instance_fields", None));
    let instance = vm.gc.alloc(InstanceObj::new(class_ref, instance_fields));
    // `instance` now lives only in this local variable — no global, no
    // registry entry, no thread stack slot references it — so it is
    // already garbage as far as the collector's root set is concerned.

    vm.collect();

    {
        let mut stack = croc_api::Stack::new(&mut vm, vm.main_thread);
        assert_eq!(stack.get_global("finalizeCount").as_int(), Some(1), "finalizer must have run exactly once");
    }

    let resurrected = unsafe { Gc::payload::<ArrayObj>(finalized_array) }.get(0);
    assert_eq!(resurrected, Some(Value::Ref(instance)), "the finalizer must have stored the very same instance, not a copy");

    vm.collect();

    let mut stack = croc_api::Stack::new(&mut vm, vm.main_thread);
    assert_eq!(stack.get_global("finalizeCount").as_int(), Some(1), "a second gc() must not re-run the finalizer");
}
