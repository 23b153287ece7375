//! Shared bytecode-assembly helpers for the end-to-end scenarios (spec.md
//! §8). There is no compiler front-end in scope, so every scenario builds
//! its `Module`/`FuncDef` by hand; these helpers just keep that hand
//! assembly from being repeated six times over.

use std::rc::Rc;

use croc_common_core::bytecode::{Constant, FuncDef, Module};
use croc_common_core::instruction::{Instruction, Opcode};
use croc_runtime::objects::funcdef::FuncDefObj;
use croc_runtime::objects::function::FunctionObj;
use croc_runtime::{Gc, GcRef, Value};
use croc_vm::Vm;

#[allow(dead_code)]
pub fn ins(op: Opcode, a: u16, b: u16, c: u16) -> Instruction {
    Instruction::new(op, a, b, c)
}

#[allow(dead_code)]
pub fn load_int(dest: u16, value: i32) -> Instruction {
    Instruction::new(Opcode::LoadInt, dest, 0, 0).set_imm32(value)
}

#[allow(dead_code)]
pub fn jump(offset: i32) -> Instruction {
    Instruction::new(Opcode::Jmp, 0, 0, 0).set_imm32(offset)
}

/// Allocate a script `Function` for `module`'s `func_index`'th `FuncDef`,
/// closed over `env` with the given (already-constructed) upvalue cells.
/// Mirrors what the `Closure` opcode does internally (`interp.rs`), minus
/// consulting `FuncDef::upvals` — tests wire upvalues by hand instead of
/// compiling a `Closure` instruction to do it.
#[allow(dead_code)]
pub fn make_script_fn(vm: &mut Vm, module: &Rc<Module>, func_index: u32, env: GcRef, upvalues: Vec<GcRef>) -> GcRef {
    let funcdef_ref = vm.gc.alloc(FuncDefObj::new(module.clone(), func_index));
    vm.gc.alloc(FunctionObj::new_script(env, funcdef_ref, upvalues))
}

#[allow(dead_code)]
pub fn single_function_module(name: &str, def: FuncDef) -> Rc<Module> {
    let mut m = Module::new(name);
    m.add_function(def);
    Rc::new(m)
}

/// Intern `s` and add it to `module`'s constant pool, returning the index.
#[allow(dead_code)]
pub fn const_str(module: &mut Module, s: &str) -> u16 {
    module.add_constant(Constant::String(s.to_string()))
}

#[allow(dead_code)]
pub fn new_vm() -> Vm {
    Vm::new()
}

#[allow(dead_code)]
pub fn as_int(v: Value) -> i64 {
    v.as_int().unwrap_or_else(|| panic!("expected int value, got {:?}", v.kind()))
}

#[allow(dead_code)]
pub fn header_kind(r: GcRef) -> croc_runtime::ValueKind {
    Gc::header(r).kind()
}
