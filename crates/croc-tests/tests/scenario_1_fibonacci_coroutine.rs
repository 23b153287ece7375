//! spec.md §8 end-to-end scenario 1: "spawn a thread whose body yields 0,
//! 1, 1, 2, 3, 5 on successive resumes. After 6 resumes the caller receives
//! [0, 1, 1, 2, 3, 5]."

mod common;

use common::*;

use croc_common_core::bytecode::{FuncDef, Module};
use croc_common_core::instruction::Opcode;
use croc_runtime::Value;

/// `fibBody`: r1/r2 hold the running Fibonacci pair, r3 is scratch. Each of
/// the six iterations yields the current low value, then advances the
/// pair — the same recurrence a host-level `fib` would use, just spelled
/// out as bytecode since there's no compiler front end to do it for us.
fn fib_body_def() -> FuncDef {
    let mut def = FuncDef::new("fibBody");
    def.param_count = 0;
    def.local_slots = 4;
    def.code = vec![
        load_int(1, 0), // r1 = 0
        load_int(2, 1), // r2 = 1
    ];
    for _ in 0..6 {
        def.code.push(ins(Opcode::Yield, 1, 1, 0)); // yield r1
        def.code.push(ins(Opcode::Add, 3, 1, 2)); // r3 = r1 + r2
        def.code.push(ins(Opcode::Move, 1, 2, 0)); // r1 = r2
        def.code.push(ins(Opcode::Move, 2, 3, 0)); // r2 = r3
    }
    def
}

#[test]
fn fibonacci_coroutine_yields_expected_sequence() {
    let mut vm = new_vm();
    let mut module = Module::new("fib_test");
    module.add_function(fib_body_def());
    let module = std::rc::Rc::new(module);

    let body_fn = make_script_fn(&mut vm, &module, 0, vm.globals, vec![]);
    let co = vm.spawn_thread(Value::Ref(body_fn));

    let mut caller = croc_api::Stack::new(&mut vm, vm.main_thread);
    let mut received = Vec::new();
    for _ in 0..6 {
        let yielded = caller.resume(co, &[], 1).expect("resume should succeed");
        assert!(yielded, "the first six resumes must all land on a Yield, not a Return");
        let v = caller.get_int(-1).expect("yielded value must be an int");
        received.push(v);
        caller.pop(1).unwrap();
    }

    assert_eq!(received, vec![0, 1, 1, 2, 3, 5]);

    // The body falls off the end of its bytecode right after the sixth
    // yield's follow-up arithmetic, so one more resume drains it to Dead
    // (spec.md §8 boundary: "Resuming a Dead thread throws").
    let drained = caller.resume(co, &[], 0).expect("seventh resume runs the body to completion");
    assert!(!drained, "the coroutine has nothing left to yield");
    let err = caller.resume(co, &[], 0).unwrap_err();
    assert!(matches!(err, croc_api::ApiError::Vm(_)), "resuming a dead thread must be a VM-level error, got {err:?}");
}
