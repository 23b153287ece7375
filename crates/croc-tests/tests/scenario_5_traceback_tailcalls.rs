//! spec.md §8 end-to-end scenario 5: "`caller` calls `f`; `f` tailcalls
//! itself twice more, then tailcalls `g`; `g` throws. The traceback
//! contains `g`, then `<3 tailcalls>`, then the caller of `f`."

mod common;

use common::*;

use croc_common_core::bytecode::{Constant, FuncDef, Module};
use croc_common_core::instruction::Opcode;
use croc_runtime::Value;
use croc_vm::{interp, unwind, VmError};

fn jmp_false(cond: u16, offset: i32) -> croc_common_core::instruction::Instruction {
    ins(Opcode::JmpFalse, cond, 0, 0).set_imm32(offset)
}

/// `f(depth)`: tailcalls itself with `depth+1` while `depth < 2`, then
/// tailcalls `g` — so by the time `g` runs, the same activation record has
/// been reused three times (two self-tailcalls, one into `g`).
fn f_def(f_idx: u16, g_idx: u16) -> FuncDef {
    let mut def = FuncDef::new("f");
    def.param_count = 1;
    def.local_slots = 12;
    def.code = vec![
        load_int(7, 0),                       // 0: r7 = 0
        ins(Opcode::Equals, 6, 1, 7),          // 1: r6 = (depth == 0)
        jmp_false(6, 4),                       // 2: if depth != 0, skip to 7
        ins(Opcode::GlobalGet, 9, f_idx, 0),   // 3: r9 = f
        ins(Opcode::LoadNil, 10, 0, 0),        // 4: r10 = this = null
        load_int(11, 1),                       // 5: r11 = 1
        ins(Opcode::TailCall, 9, 1, 0),        // 6: tailcall f(1)
        load_int(7, 1),                        // 7: r7 = 1
        ins(Opcode::Equals, 6, 1, 7),          // 8: r6 = (depth == 1)
        jmp_false(6, 4),                        // 9: if depth != 1, skip to 14
        ins(Opcode::GlobalGet, 9, f_idx, 0),   // 10: r9 = f
        ins(Opcode::LoadNil, 10, 0, 0),        // 11: r10 = this = null
        load_int(11, 2),                       // 12: r11 = 2
        ins(Opcode::TailCall, 9, 1, 0),        // 13: tailcall f(2)
        ins(Opcode::GlobalGet, 9, g_idx, 0),   // 14: r9 = g
        ins(Opcode::LoadNil, 10, 0, 0),        // 15: r10 = this = null
        ins(Opcode::TailCall, 9, 0, 0),        // 16: tailcall g()
    ];
    def
}

fn g_def(msg_idx: u16) -> FuncDef {
    let mut def = FuncDef::new("g");
    def.param_count = 0;
    def.local_slots = 2;
    def.code = vec![
        ins(Opcode::LoadConst, 1, msg_idx, 0), // r1 = "boom"
        ins(Opcode::Throw, 1, 0, 0),
    ];
    def
}

fn caller_def(f_idx: u16) -> FuncDef {
    let mut def = FuncDef::new("caller");
    def.param_count = 0;
    def.local_slots = 4;
    def.code = vec![
        ins(Opcode::GlobalGet, 1, f_idx, 0), // r1 = f
        ins(Opcode::LoadNil, 2, 0, 0),       // r2 = this = null
        load_int(3, 0),                      // r3 = 0
        ins(Opcode::Call, 1, 1, 0),          // call f(0)
        ins(Opcode::Return, 0, 0, 0),
    ];
    def
}

#[test]
fn traceback_records_tailcall_count_before_the_caller() {
    let mut vm = new_vm();

    let mut module = Module::new("traceback_test");
    let f_name_idx = module.add_constant(Constant::String("f".to_string()));
    let g_name_idx = module.add_constant(Constant::String("g".to_string()));
    let msg_idx = module.add_constant(Constant::String("boom".to_string()));
    module.add_function(f_def(f_name_idx, g_name_idx));
    module.add_function(g_def(msg_idx));
    module.add_function(caller_def(f_name_idx));
    let module = std::rc::Rc::new(module);

    let f_fn = make_script_fn(&mut vm, &module, 0, vm.globals, vec![]);
    let g_fn = make_script_fn(&mut vm, &module, 1, vm.globals, vec![]);
    let caller_fn = make_script_fn(&mut vm, &module, 2, vm.globals, vec![]);

    let mut setup = croc_api::Stack::new(&mut vm, vm.main_thread);
    setup.new_global("f", Value::Ref(f_fn)).unwrap();
    setup.new_global("g", Value::Ref(g_fn)).unwrap();
    setup.new_global("caller", Value::Ref(caller_fn)).unwrap();

    let main = vm.main_thread;
    let err = interp::call_into(&mut vm, main, Value::Ref(caller_fn), Value::Null, &[], 0).unwrap_err();
    assert!(matches!(err, VmError::ScriptException(_)), "an unhandled throw must surface as ScriptException, got {err:?}");

    let trace = unwind::take_traceback(vm.thread_mut(main));
    let g_pos = trace.find("g").expect("traceback must mention g");
    let tailcalls_pos = trace.find("<3 tailcalls>").expect("traceback must record exactly 3 reused tailcall frames");
    let caller_pos = trace.find("caller").expect("traceback must mention the caller of f");
    assert!(g_pos < tailcalls_pos, "g must appear before the tailcall count:\n{trace}");
    assert!(tailcalls_pos < caller_pos, "the tailcall count must appear before the caller:\n{trace}");
}
