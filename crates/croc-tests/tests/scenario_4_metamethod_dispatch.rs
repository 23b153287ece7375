//! spec.md §8 end-to-end scenario 4: a class overriding `opAdd` so that
//! `instance1 + instance2` (the `Add` opcode's metamethod fallback) calls
//! the class method exactly once and returns its result.

mod common;

use common::*;

use croc_common_core::bytecode::{Constant, FuncDef, Module};
use croc_common_core::instruction::Opcode;
use croc_runtime::objects::class::ClassObj;
use croc_runtime::objects::instance::InstanceObj;
use croc_runtime::objects::namespace::NamespaceObj;
use croc_runtime::objects::upvalue::{UpvalueObj, UpvalueState};
use croc_runtime::{Gc, Value};
use croc_vm::interp;

/// `Vec2.opAdd(this, other)`: reads `this.val`/`other.val`, adds them,
/// writes the sum into a pre-built result instance captured as an upvalue
/// (there's no instantiation opcode to build a fresh one), and bumps a
/// global call counter so the test can assert "exactly once".
fn op_add_def() -> FuncDef {
    let mut def = FuncDef::new("opAdd");
    def.param_count = 1;
    def.local_slots = 8;
    def.code = vec![
        ins(Opcode::Field, 2, 0, 0),      // r2 = this.val      (const0 = "val")
        ins(Opcode::Field, 3, 1, 0),      // r3 = other.val
        ins(Opcode::Add, 4, 2, 3),        // r4 = r2 + r3
        ins(Opcode::UpvalGet, 5, 0, 0),   // r5 = result instance (upvalue 0)
        ins(Opcode::FieldAssign, 4, 5, 0), // result.val = r4
        ins(Opcode::GlobalGet, 6, 1, 0),  // r6 = addCalls       (const1 = "addCalls")
        load_int(7, 1),                   // r7 = 1
        ins(Opcode::Add, 6, 6, 7),        // r6 += 1
        ins(Opcode::GlobalSet, 6, 1, 0),  // addCalls = r6
        ins(Opcode::Return, 5, 1, 0),     // return result
    ];
    def
}

#[test]
fn add_opcode_dispatches_to_class_metamethod_exactly_once() {
    let mut vm = new_vm();

    let mut module = Module::new("vec2_test");
    let val_idx = const_str(&mut module, "val");
    let add_calls_idx = const_str(&mut module, "addCalls");
    assert_eq!(val_idx, 0);
    assert_eq!(add_calls_idx, 1);
    module.add_function(op_add_def());
    let module = std::rc::Rc::new(module);

    let mut setup = croc_api::Stack::new(&mut vm, vm.main_thread);
    setup.new_global("addCalls", Value::Int(0)).unwrap();

    let result_fields = vm.gc.alloc(NamespaceObj::new("result_fields", None));
    let class_fields = vm.gc.alloc(NamespaceObj::new("Vec2_fields", None));
    let class_ref = vm.gc.alloc(ClassObj::new("Vec2", None, class_fields));

    let result_instance = vm.gc.alloc(InstanceObj::new(class_ref, result_fields));
    let result_upvalue = vm.gc.alloc(UpvalueObj { state: UpvalueState::Closed(Value::Ref(result_instance)) });

    let op_add_fn = make_script_fn(&mut vm, &module, 0, vm.globals, vec![result_upvalue]);
    let op_add_name = vm.gc.intern_string("opAdd");
    unsafe { Gc::payload_mut::<NamespaceObj>(class_fields) }.set_local(Value::Ref(op_add_name), Value::Ref(op_add_fn));

    let mut setup = croc_api::Stack::new(&mut vm, vm.main_thread);
    setup.new_global("Vec2", Value::Ref(class_ref)).unwrap();

    let lhs_fields = vm.gc.alloc(NamespaceObj::new("lhs_fields", None));
    let lhs = vm.gc.alloc(InstanceObj::new(class_ref, lhs_fields));
    let val_name = vm.gc.intern_string("val");
    unsafe { Gc::payload_mut::<NamespaceObj>(lhs_fields) }.set_local(Value::Ref(val_name), Value::Int(3));

    let rhs_fields = vm.gc.alloc(NamespaceObj::new("rhs_fields", None));
    let rhs = vm.gc.alloc(InstanceObj::new(class_ref, rhs_fields));
    unsafe { Gc::payload_mut::<NamespaceObj>(rhs_fields) }.set_local(Value::Ref(val_name), Value::Int(4));

    let sum = interp::ops::add(&mut vm, vm.main_thread, Value::Ref(lhs), Value::Ref(rhs)).expect("opAdd must succeed");
    assert_eq!(sum.as_ref(), Some(result_instance), "Add must dispatch through opAdd and return its result");

    let mut stack = croc_api::Stack::new(&mut vm, vm.main_thread);
    assert_eq!(stack.get_global("addCalls").as_int(), Some(1), "opAdd must run exactly once");

    let result_val = unsafe { Gc::payload::<InstanceObj>(result_instance) }.lookup(Value::Ref(val_name));
    assert_eq!(result_val.as_int(), Some(7));
}
