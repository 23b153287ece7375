//! The register-based bytecode interpreter: opcode dispatch, the call/return
//! convention, metamethod fallback, exception unwinding, and the coroutine
//! yield boundary (spec.md §4.4, §4.5, §4.6).
//!
//! Grounded on the teacher's `exec::call::exec_call`/`exec_call_closure`
//! (new frame's base = current stack top, args copied into the new window,
//! an `ExecResult` telling the outer loop "frames changed, re-fetch") and
//! `vm::types::ExecResult`'s `Continue`/`Return` shape, generalized from a
//! single static calling convention to Croc's callee/this/args register
//! window and its metamethod fallback table.
//!
//! Ordinary script-to-script calls never recurse through Rust: `Call` and
//! `TailCall` just push/pop `ActivationRecord`s on the same `Thread` and the
//! same dispatch loop keeps going, which is what lets `yield` bubble all the
//! way out through any depth of plain calls. Only a native function or a
//! metamethod invocation recurses into Rust (`call_sync`), and only that
//! path increments `native_call_depth` — the one thing `yield` is forbidden
//! to cross, mirroring Lua's restriction on yielding across a C-call
//! boundary.

use croc_common_core::bytecode::{Constant, Module, UpvalSource};
use croc_common_core::instruction::{Instruction, Opcode};

use croc_runtime::metamethod::Metamethod;
use croc_runtime::objects::array::ArrayObj;
use croc_runtime::objects::class::ClassObj;
use croc_runtime::objects::function::{FunctionBody, FunctionObj};
use croc_runtime::objects::funcdef::FuncDefObj;
use croc_runtime::objects::instance::InstanceObj;
use croc_runtime::objects::namespace::NamespaceObj;
use croc_runtime::objects::table::TableObj;
use croc_runtime::objects::upvalue::UpvalueObj;
use croc_runtime::{value, Gc, GcRef, Value, ValueKind};

use crate::error::{VmError, VmResult};
use crate::frame::{ActivationRecord, ALL_RETURNS};
use crate::thread::ThreadStatus;
use crate::unwind::{self, TryRegion};
use crate::vm::Vm;

/// What a host-facing call produced: either it ran to completion, or the
/// thread hit a `Yield` (spec.md §4.6).
pub enum ExecOutcome {
    Return(Vec<Value>),
    Yield(Vec<Value>),
}

/// What one frame boundary did, reported back to the loop in [`run_frames`].
enum FrameExit {
    Returned(Vec<Value>),
    Yielded(Vec<Value>),
}

/// What a single `execute_one` step produced.
enum Step {
    /// Ordinary instruction, no frame-stack change.
    Continue,
    /// A new frame was pushed, or a tail call replaced the current one —
    /// the loop must re-fetch the (now different) current frame.
    Called,
    /// A frame was popped via `Return` or by running off the end of a
    /// function body. `values` already sit at `thread.regs[base..base+n]`.
    Returned(usize, usize),
    Yielded(Vec<Value>),
    /// `Throw` (or a runtime error raised as a script exception) set
    /// `thread.pending_exception`; the loop must search for a handler.
    Unwind,
}

enum HandlerOutcome {
    Caught,
}

#[inline]
fn reserved_slots(expected: u32) -> usize {
    if expected == ALL_RETURNS {
        0
    } else {
        expected as usize
    }
}

/// Run `thread_handle`'s frame stack until it pops back down to
/// `stop_depth` (a `Return`/Yield at or above that depth) or an unhandled
/// exception escapes it. `stop_depth` is the frame count the thread had
/// right before the call that's waiting on this result — 0 for a coroutine
/// running its body from scratch, `N` for a nested `call_sync`.
fn run_frames(vm: &mut Vm, th: GcRef, stop_depth: usize) -> VmResult<FrameExit> {
    loop {
        if vm.thread(th).pending_halt {
            return Err(halt(vm, th));
        }
        match execute_one(vm, th)? {
            Step::Continue | Step::Called => continue,
            Step::Returned(base, count) => {
                if vm.thread(th).frames.len() <= stop_depth {
                    let values = vm.thread(th).regs[base..base + count].to_vec();
                    return Ok(FrameExit::Returned(values));
                }
            }
            Step::Yielded(values) => return Ok(FrameExit::Yielded(values)),
            Step::Unwind => {
                let _: HandlerOutcome = unwind_in_scope(vm, th, stop_depth)?;
            }
        }
    }
}

/// Pop frames off `th` searching for a `try` region that covers the current
/// PC, within `[stop_depth, current depth)` only (spec.md §4.5's "unwinding
/// pops AR records until one with an active `try`-region ... is found").
/// If nothing catches it within that scope: at `stop_depth == 0` this is
/// truly unhandled and becomes the host-visible `ScriptException`; at a
/// nested `call_sync` boundary it instead returns `PropagatingUnwind`, a
/// sentinel that bubbles one Rust frame up via `?` so the ancestor call
/// resumes the same search from its own `stop_depth`.
fn unwind_in_scope(vm: &mut Vm, th: GcRef, stop_depth: usize) -> VmResult<HandlerOutcome> {
    loop {
        let depth = vm.thread(th).frames.len();
        if depth <= stop_depth {
            if stop_depth == 0 {
                let value = vm.thread_mut(th).pending_exception.take().unwrap_or(Value::Null);
                return Err(VmError::ScriptException(value));
            }
            return Err(VmError::PropagatingUnwind);
        }
        let frame_depth = depth - 1;
        let pc = vm.thread(th).frames[frame_depth].pc;
        match unwind::find_handler(&vm.thread(th).try_regions, frame_depth, pc) {
            Some(idx) => {
                let region: TryRegion = vm.thread(th).try_regions[idx];
                vm.thread_mut(th).try_regions.truncate(idx);
                while vm.thread(th).frames.len() > frame_depth + 1 {
                    let f = vm.thread_mut(th).frames.pop().unwrap();
                    vm.thread_mut(th).close_upvalues_from(f.base);
                }
                let base = vm.thread(th).frames[frame_depth].base;
                if region.is_finally {
                    // A `finally` region always runs on the way out, but it
                    // doesn't catch: leave `pending_exception` set so
                    // `EndFinally` resumes unwinding the same value once the
                    // block finishes (spec.md §4.5).
                    vm.thread_mut(th).frames[frame_depth].pc = region.handler_pc;
                    return Ok(HandlerOutcome::Caught);
                }
                let value = vm.thread_mut(th).pending_exception.take().unwrap_or(Value::Null);
                vm.thread_mut(th).set_reg(base + region.handler_reg as usize, value);
                vm.thread_mut(th).frames[frame_depth].pc = region.handler_pc;
                return Ok(HandlerOutcome::Caught);
            }
            None => {
                let f = vm.thread_mut(th).frames.pop().unwrap();
                vm.thread_mut(th).close_upvalues_from(f.base);
                vm.thread_mut(th).try_regions.retain(|r| r.frame_depth != frame_depth);
            }
        }
    }
}

/// Raise `message` as a thrown string value, matching spec's uniform error
/// model where a bad operation is just an ordinary catchable exception
/// rather than a Rust-level abort (reserved for genuine host/VM-protocol
/// violations: stack overflow, coroutine misuse, GC re-entry).
fn rt_error(vm: &mut Vm, th: GcRef, message: String) -> VmResult<Step> {
    log::debug!("runtime error raised as exception: {message}");
    let v = Value::Ref(vm.gc.intern_string(&message));
    unwind::throw(vm.thread_mut(th), v, None)?;
    Ok(Step::Unwind)
}

/// Service a pending halt at the current safe point (spec.md §4.6): close
/// every open upvalue and unconditionally unwind every activation record
/// on `th`, bypassing any `try` regions, then transition it Dead.
fn halt(vm: &mut Vm, th: GcRef) -> VmError {
    vm.thread_mut(th).pending_halt = false;
    while let Some(f) = vm.thread_mut(th).frames.pop() {
        vm.thread_mut(th).close_upvalues_from(f.base);
    }
    vm.thread_mut(th).try_regions.clear();
    vm.thread_mut(th).status = ThreadStatus::Dead;
    VmError::Halted
}

/// Synchronous call used by native functions and metamethod dispatch: the
/// one place script execution recurses through Rust. Bumps
/// `native_call_depth` for the duration, which is what makes `Yield`
/// refuse to cross it.
fn call_sync(
    vm: &mut Vm,
    th: GcRef,
    callee: Value,
    this: Value,
    args: &[Value],
    expected_returns: u32,
) -> VmResult<Vec<Value>> {
    let stop_depth = vm.thread(th).frames.len();
    let return_base = vm.thread(th).regs.len();
    vm.thread_mut(th).ensure_capacity(return_base + reserved_slots(expected_returns))?;
    vm.thread_mut(th).native_call_depth += 1;
    let result = begin_call(vm, th, callee, this, args, return_base, expected_returns, false)
        .and_then(|()| run_frames(vm, th, stop_depth));
    vm.thread_mut(th).native_call_depth -= 1;
    match result? {
        FrameExit::Returned(values) => Ok(values),
        FrameExit::Yielded(_) => unreachable!("yield cannot cross a native_call_depth boundary"),
    }
}

/// Try `mm` on `obj` (primitive metatable, or instance/class field chain),
/// calling it with `args` if present. `Ok(None)` means no handler exists.
fn try_metamethod(vm: &mut Vm, th: GcRef, obj: Value, mm: Metamethod, args: &[Value]) -> VmResult<Option<Value>> {
    let handler = lookup_metamethod(vm, obj, mm);
    if handler.is_null() {
        return Ok(None);
    }
    let results = call_sync(vm, th, handler, obj, args, 1)?;
    Ok(Some(results.into_iter().next().unwrap_or(Value::Null)))
}

/// Resolve `mm` for `obj`: instance/class field-chain lookup first (a
/// class method named e.g. `opAdd` *is* its metamethod), then the per-type
/// metatable slot (spec.md §4.5, §9).
fn lookup_metamethod(vm: &mut Vm, obj: Value, mm: Metamethod) -> Value {
    if let Value::Ref(r) = obj {
        match Gc::header(r).kind() {
            ValueKind::Instance => {
                let key = Value::Ref(vm.gc.intern_string(mm.name()));
                let v = unsafe { Gc::payload::<InstanceObj>(r) }.lookup(key);
                if !v.is_null() {
                    return v;
                }
            }
            ValueKind::Class => {
                let key = Value::Ref(vm.gc.intern_string(mm.name()));
                let v = unsafe { Gc::payload::<ClassObj>(r) }.lookup(key);
                if !v.is_null() {
                    return v;
                }
            }
            _ => {}
        }
    }
    vm.metatables.get(obj.kind()).get(mm)
}

pub fn get_field(vm: &mut Vm, th: GcRef, obj: Value, name: Value) -> VmResult<Value> {
    if let Value::Ref(r) = obj {
        match Gc::header(r).kind() {
            ValueKind::Namespace => return Ok(unsafe { Gc::payload::<NamespaceObj>(r) }.get(name)),
            ValueKind::Class => return Ok(unsafe { Gc::payload::<ClassObj>(r) }.lookup(name)),
            ValueKind::Instance => {
                let v = unsafe { Gc::payload::<InstanceObj>(r) }.lookup(name);
                if !v.is_null() {
                    return Ok(v);
                }
            }
            _ => {}
        }
    }
    if let Some(v) = try_metamethod(vm, th, obj, Metamethod::Field, &[name])? {
        return Ok(v);
    }
    if let Some(v) = try_metamethod(vm, th, obj, Metamethod::Method, &[name])? {
        return Ok(v);
    }
    Err(VmError::TypeError { op: "field access", kind: obj.kind().name() })
}

fn set_field(vm: &mut Vm, th: GcRef, obj: Value, name: Value, value: Value) -> VmResult<Step> {
    if let Value::Ref(r) = obj {
        match Gc::header(r).kind() {
            ValueKind::Namespace => {
                unsafe { Gc::payload_mut::<NamespaceObj>(r) }.set_local(name, value);
                return Ok(Step::Continue);
            }
            ValueKind::Instance => {
                unsafe { Gc::payload_mut::<InstanceObj>(r) }.set_field(name, value);
                return Ok(Step::Continue);
            }
            _ => {}
        }
    }
    if try_metamethod(vm, th, obj, Metamethod::FieldEq, &[name, value])?.is_some() {
        return Ok(Step::Continue);
    }
    rt_error(vm, th, format!("attempt to assign a field on a {} value", obj.kind().name()))
}

pub fn get_index(vm: &mut Vm, th: GcRef, obj: Value, key: Value) -> VmResult<Value> {
    if let Value::Ref(r) = obj {
        match Gc::header(r).kind() {
            ValueKind::Table => return Ok(unsafe { Gc::payload::<TableObj>(r) }.get(&key)),
            ValueKind::Array => {
                if let Some(i) = key.as_int() {
                    let arr = unsafe { Gc::payload::<ArrayObj>(r) };
                    return arr.get(i).ok_or(VmError::IndexOutOfBounds { index: i, length: arr.length() });
                }
            }
            _ => {}
        }
    }
    if let Some(v) = try_metamethod(vm, th, obj, Metamethod::Index, &[key])? {
        return Ok(v);
    }
    Err(VmError::TypeError { op: "index", kind: obj.kind().name() })
}

fn set_index(vm: &mut Vm, th: GcRef, obj: Value, key: Value, value: Value) -> VmResult<Step> {
    if let Value::Ref(r) = obj {
        match Gc::header(r).kind() {
            ValueKind::Table => {
                unsafe { Gc::payload_mut::<TableObj>(r) }.set(key, value);
                return Ok(Step::Continue);
            }
            ValueKind::Array => {
                if let Some(i) = key.as_int() {
                    let ok = unsafe { Gc::payload_mut::<ArrayObj>(r) }.set(i, value);
                    if ok {
                        return Ok(Step::Continue);
                    }
                    let len = unsafe { Gc::payload::<ArrayObj>(r) }.length();
                    return Err(VmError::IndexOutOfBounds { index: i, length: len });
                }
            }
            _ => {}
        }
    }
    if try_metamethod(vm, th, obj, Metamethod::IndexEq, &[key, value])?.is_some() {
        return Ok(Step::Continue);
    }
    rt_error(vm, th, format!("attempt to index-assign a {} value", obj.kind().name()))
}

pub fn get_length(vm: &mut Vm, th: GcRef, obj: Value) -> VmResult<Value> {
    if let Value::Ref(r) = obj {
        match Gc::header(r).kind() {
            ValueKind::String => return Ok(Value::Int(croc_runtime::objects::string::as_str(r, &vm.gc).chars().count() as i64)),
            ValueKind::Array => return Ok(Value::Int(unsafe { Gc::payload::<ArrayObj>(r) }.length() as i64)),
            ValueKind::Table => return Ok(Value::Int(unsafe { Gc::payload::<TableObj>(r) }.length() as i64)),
            _ => {}
        }
    }
    if let Some(v) = try_metamethod(vm, th, obj, Metamethod::Length, &[])? {
        return Ok(v);
    }
    Err(VmError::TypeError { op: "get the length of", kind: obj.kind().name() })
}

fn set_length(vm: &mut Vm, th: GcRef, obj: Value, new_len: Value) -> VmResult<Step> {
    if let Value::Ref(r) = obj {
        if Gc::header(r).kind() == ValueKind::Array {
            if let Some(n) = new_len.as_int() {
                unsafe { Gc::payload_mut::<ArrayObj>(r) }.set_length(n.max(0) as usize);
                return Ok(Step::Continue);
            }
        }
    }
    if try_metamethod(vm, th, obj, Metamethod::LengthEq, &[new_len])?.is_some() {
        return Ok(Step::Continue);
    }
    rt_error(vm, th, format!("attempt to set the length of a {} value", obj.kind().name()))
}

fn push_str_or_char(s: &mut String, v: Value, gc: &Gc) {
    match v {
        Value::Char(c) => s.push(c),
        Value::Ref(r) => s.push_str(croc_runtime::objects::string::as_str(r, gc)),
        _ => unreachable!("push_str_or_char called on a non-string/char value"),
    }
}

fn concat_pair(vm: &mut Vm, th: GcRef, a: Value, b: Value) -> VmResult<Value> {
    let (ak, bk) = (a.kind(), b.kind());
    let is_text = |k: ValueKind| matches!(k, ValueKind::String | ValueKind::Char);
    if is_text(ak) && is_text(bk) {
        let mut s = String::new();
        push_str_or_char(&mut s, a, &vm.gc);
        push_str_or_char(&mut s, b, &vm.gc);
        return Ok(Value::Ref(vm.gc.intern_string(&s)));
    }
    if ak == ValueKind::Array && bk == ValueKind::Array {
        let (ra, rb) = (a.as_ref().unwrap(), b.as_ref().unwrap());
        let mut items: Vec<Value> = unsafe { Gc::payload::<ArrayObj>(ra) }.iter().copied().collect();
        items.extend(unsafe { Gc::payload::<ArrayObj>(rb) }.iter().copied());
        return Ok(Value::Ref(vm.gc.alloc(ArrayObj::from_vec(items))));
    }
    if let Some(v) = try_metamethod(vm, th, a, Metamethod::Cat, &[b])? {
        return Ok(v);
    }
    Err(VmError::TypeError { op: "concatenate", kind: ak.name() })
}

pub fn do_concat(vm: &mut Vm, th: GcRef, vals: &[Value]) -> VmResult<Value> {
    let mut iter = vals.iter().copied();
    let mut acc = iter.next().unwrap_or(Value::Null);
    for v in iter {
        acc = concat_pair(vm, th, acc, v)?;
    }
    Ok(acc)
}

fn load_const(vm: &mut Vm, module: &Module, idx: u16) -> Value {
    match &module.constants[idx as usize] {
        Constant::Null => Value::Null,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Int(i) => Value::Int(*i),
        Constant::Float(f) => Value::Float(*f),
        Constant::Char(c) => Value::Char(*c),
        Constant::String(s) => Value::Ref(vm.gc.intern_string(s)),
    }
}

fn script_upvalues(function_ref: GcRef) -> &'static [GcRef] {
    match &unsafe { Gc::payload::<FunctionObj>(function_ref) }.body {
        FunctionBody::Script { upvalues, .. } => upvalues,
        FunctionBody::Native { .. } => unreachable!("native functions carry no script upvalue array"),
    }
}

#[inline]
fn reg(vm: &Vm, th: GcRef, rel: u16) -> Value {
    let t = vm.thread(th);
    let base = t.frames.last().expect("reg() with no active frame").base;
    t.reg(base + rel as usize)
}

#[inline]
fn set_reg(vm: &Vm, th: GcRef, rel: u16, v: Value) {
    let t = vm.thread_mut(th);
    let base = t.frames.last().expect("set_reg() with no active frame").base;
    t.set_reg(base + rel as usize, v);
}

/// Write up to `expected` values from `values` into `regs[return_base..]`,
/// padding short returns with `null` (spec.md §4.4/§4.5's M/N reconciliation).
fn write_returns(vm: &Vm, th: GcRef, values: &[Value], return_base: usize, expected_returns: u32) {
    let n = if expected_returns == ALL_RETURNS { values.len() } else { expected_returns as usize };
    for i in 0..n {
        let v = values.get(i).copied().unwrap_or(Value::Null);
        vm.thread_mut(th).set_reg(return_base + i, v);
    }
}

fn pop_return(vm: &Vm, th: GcRef, values: &[Value]) -> Step {
    let frame = vm.thread_mut(th).frames.pop().expect("pop_return with no active frame");
    vm.thread_mut(th).close_upvalues_from(frame.base);
    write_returns(vm, th, values, frame.return_base, frame.expected_returns);
    let n = if frame.expected_returns == ALL_RETURNS { values.len() } else { frame.expected_returns as usize };
    Step::Returned(frame.return_base, n)
}

/// Push a new frame for `function_ref` (or run a native call to
/// completion), copying `this`/`args` into its window, per spec.md §4.4's
/// "slot `base+0` is `this`, slot `base+1` is the first declared parameter".
fn push_frame(
    vm: &mut Vm,
    th: GcRef,
    function_ref: GcRef,
    this: Value,
    args: &[Value],
    return_base: usize,
    expected_returns: u32,
    tailcall_count: u32,
) -> VmResult<Step> {
    vm.thread_mut(th).ensure_capacity(return_base + reserved_slots(expected_returns))?;
    let is_native = unsafe { Gc::payload::<FunctionObj>(function_ref) }.is_native();
    if is_native {
        let new_base = vm.thread(th).regs.len();
        vm.thread_mut(th).ensure_capacity(new_base + 1 + args.len())?;
        vm.thread_mut(th).set_reg(new_base, this);
        for (i, v) in args.iter().enumerate() {
            vm.thread_mut(th).set_reg(new_base + 1 + i, *v);
        }
        let (ptr, name) = match &unsafe { Gc::payload::<FunctionObj>(function_ref) }.body {
            FunctionBody::Native { ptr, name, .. } => (*ptr, name.clone()),
            FunctionBody::Script { .. } => unreachable!(),
        };
        vm.thread_mut(th).native_stack.push(name);
        vm.thread_mut(th).native_call_depth += 1;
        vm.thread_mut(th).native_bases.push(new_base);
        let produced = ptr(th as *mut core::ffi::c_void);
        vm.thread_mut(th).native_bases.pop();
        vm.thread_mut(th).native_call_depth -= 1;
        vm.thread_mut(th).native_stack.pop();
        let produced = produced.max(0) as usize;
        let values: Vec<Value> = (0..produced).map(|i| vm.thread(th).reg(new_base + i)).collect();
        write_returns(vm, th, &values, return_base, expected_returns);
        let n = if expected_returns == ALL_RETURNS { values.len() } else { expected_returns as usize };
        return Ok(Step::Returned(return_base, n));
    }

    let funcdef_ref = unsafe { Gc::payload::<FunctionObj>(function_ref) }.funcdef().unwrap();
    let def = unsafe { Gc::payload::<FuncDefObj>(funcdef_ref) }.def().clone();
    let new_base = vm.thread(th).regs.len();
    let declared = def.param_count as usize;
    let window = (def.local_slots as usize).max(1 + declared);
    vm.thread_mut(th).ensure_capacity(new_base + window)?;
    vm.thread_mut(th).set_reg(new_base, this);
    for i in 0..declared {
        vm.thread_mut(th).set_reg(new_base + 1 + i, args.get(i).copied().unwrap_or(Value::Null));
    }
    let mut ar = ActivationRecord::new(function_ref, new_base, return_base, expected_returns);
    ar.tailcall_count = tailcall_count;
    if def.is_vararg && args.len() > declared {
        let extra = &args[declared..];
        let vb = new_base + window;
        vm.thread_mut(th).ensure_capacity(vb + extra.len())?;
        for (i, v) in extra.iter().enumerate() {
            vm.thread_mut(th).set_reg(vb + i, *v);
        }
        ar.vararg_base = vb;
        ar.vararg_count = extra.len();
    }
    vm.thread_mut(th).frames.push(ar);
    fire_hook_if_wanted(vm, th, crate::hooks::HookEvent::Call)?;
    Ok(Step::Called)
}

/// Resolve `callee` through `opCall` when it isn't a `Function`, otherwise
/// push (or, if `tail`, replace the current frame with) a new call.
fn begin_call(
    vm: &mut Vm,
    th: GcRef,
    callee: Value,
    this: Value,
    args: &[Value],
    return_base: usize,
    expected_returns: u32,
    tail: bool,
) -> VmResult<Step> {
    let callee_ref = match callee {
        Value::Ref(r) if Gc::header(r).kind() == ValueKind::Function => r,
        _ => {
            return match try_metamethod(vm, th, callee, Metamethod::Call, args)? {
                Some(v) => {
                    write_returns(vm, th, &[v], return_base, expected_returns);
                    let n = if expected_returns == ALL_RETURNS { 1 } else { expected_returns as usize };
                    Ok(Step::Returned(return_base, n))
                }
                None => Err(VmError::NotCallable { kind: callee.kind().name() }),
            };
        }
    };
    if tail {
        let popped = vm.thread_mut(th).frames.pop().expect("tail call with no active frame");
        vm.thread_mut(th).close_upvalues_from(popped.base);
        fire_hook_if_wanted(vm, th, crate::hooks::HookEvent::TailRet)?;
        return push_frame(vm, th, callee_ref, this, args, popped.return_base, popped.expected_returns, popped.tailcall_count + 1);
    }
    push_frame(vm, th, callee_ref, this, args, return_base, expected_returns, 0)
}

fn do_call(vm: &mut Vm, th: GcRef, instr: Instruction, tail: bool) -> VmResult<Step> {
    let base = vm.thread(th).frames.last().unwrap().base;
    let callee_abs = base + instr.a as usize;
    let n = instr.b as usize;
    let callee = vm.thread(th).reg(callee_abs);
    let this = vm.thread(th).reg(callee_abs + 1);
    let args: Vec<Value> = (0..n).map(|i| vm.thread(th).reg(callee_abs + 2 + i)).collect();
    let m = if instr.c == 0xFFFF { ALL_RETURNS } else { instr.c as u32 };
    begin_call(vm, th, callee, this, &args, callee_abs, m, tail)
}

fn fire_hook_if_wanted(vm: &mut Vm, th: GcRef, event: crate::hooks::HookEvent) -> VmResult<()> {
    if !vm.thread(th).hooks.wants(event) {
        return Ok(());
    }
    let hook_fn = vm.thread(th).hooks.hook_fn.unwrap();
    let name = Value::Ref(vm.gc.intern_string(event.name()));
    log::trace!("firing {} hook on thread {th:p}", event.name());
    vm.thread_mut(th).hooks.in_hook = true;
    let result = call_sync(vm, th, hook_fn, Value::Null, &[name], 0);
    vm.thread_mut(th).hooks.in_hook = false;
    result.map(|_| ())
}

/// Execute exactly one instruction of the current top frame.
fn execute_one(vm: &mut Vm, th: GcRef) -> VmResult<Step> {
    let (function_ref, module) = {
        let t = vm.thread(th);
        let frame = t.frames.last().expect("execute_one with an empty frame stack");
        let fobj = unsafe { Gc::payload::<FunctionObj>(frame.function) };
        let funcdef_ref = fobj.funcdef().expect("execute_one reached on a native frame");
        (frame.function, unsafe { Gc::payload::<FuncDefObj>(funcdef_ref) }.module().clone())
    };
    let func_idx = unsafe { Gc::payload::<FuncDefObj>(unsafe { Gc::payload::<FunctionObj>(function_ref) }.funcdef().unwrap()) }.index();
    let def = module.get_function(func_idx).expect("valid func index");

    let pc = vm.thread(th).frames.last().unwrap().pc;
    if pc >= def.code.len() {
        return Ok(pop_return(vm, th, &[]));
    }
    let instr = def.code[pc];
    vm.thread_mut(th).frames.last_mut().unwrap().pc = pc + 1;
    if vm.thread(th).hooks.wants(crate::hooks::HookEvent::Line) {
        fire_hook_if_wanted(vm, th, crate::hooks::HookEvent::Line)?;
    }
    if vm.thread_mut(th).hooks.tick_delay() {
        fire_hook_if_wanted(vm, th, crate::hooks::HookEvent::Delay)?;
    }

    use Opcode::*;
    match instr.opcode() {
        Nop => Ok(Step::Continue),

        LoadNil => {
            set_reg(vm, th, instr.a, Value::Null);
            Ok(Step::Continue)
        }
        LoadTrue => {
            set_reg(vm, th, instr.a, Value::Bool(true));
            Ok(Step::Continue)
        }
        LoadFalse => {
            set_reg(vm, th, instr.a, Value::Bool(false));
            Ok(Step::Continue)
        }
        LoadInt => {
            set_reg(vm, th, instr.a, Value::Int(instr.imm32() as i64));
            Ok(Step::Continue)
        }
        LoadConst => {
            let v = load_const(vm, &module, instr.b);
            set_reg(vm, th, instr.a, v);
            Ok(Step::Continue)
        }
        Move => {
            let v = reg(vm, th, instr.b);
            set_reg(vm, th, instr.a, v);
            Ok(Step::Continue)
        }

        GlobalGet => {
            let name = load_const(vm, &module, instr.b);
            let ns = if instr.c == 0 {
                unsafe { Gc::payload::<FunctionObj>(function_ref) }.env
            } else {
                match reg(vm, th, instr.c) {
                    Value::Ref(r) if Gc::header(r).kind() == ValueKind::Namespace => r,
                    other => return Err(VmError::TypeError { op: "read a global from", kind: other.kind().name() }),
                }
            };
            let v = unsafe { Gc::payload::<NamespaceObj>(ns) }.get(name);
            set_reg(vm, th, instr.a, v);
            Ok(Step::Continue)
        }
        GlobalSet => {
            let name = load_const(vm, &module, instr.b);
            let ns = if instr.c == 0 {
                unsafe { Gc::payload::<FunctionObj>(function_ref) }.env
            } else {
                match reg(vm, th, instr.c) {
                    Value::Ref(r) if Gc::header(r).kind() == ValueKind::Namespace => r,
                    other => return Err(VmError::TypeError { op: "write a global on", kind: other.kind().name() }),
                }
            };
            let v = reg(vm, th, instr.a);
            unsafe { Gc::payload_mut::<NamespaceObj>(ns) }.set_local(name, v);
            Ok(Step::Continue)
        }
        UpvalGet => {
            let upv = script_upvalues(function_ref)[instr.b as usize];
            let v = unsafe { Gc::payload::<UpvalueObj>(upv) }.get(|idx| vm.thread(th).reg(idx));
            set_reg(vm, th, instr.a, v);
            Ok(Step::Continue)
        }
        UpvalSet => {
            let upv = script_upvalues(function_ref)[instr.a as usize];
            let v = reg(vm, th, instr.b);
            unsafe { Gc::payload_mut::<UpvalueObj>(upv) }.set(v, |idx, val| vm.thread_mut(th).set_reg(idx, val));
            Ok(Step::Continue)
        }

        Field => {
            let obj = reg(vm, th, instr.b);
            let name = load_const(vm, &module, instr.c);
            let v = get_field(vm, th, obj, name)?;
            set_reg(vm, th, instr.a, v);
            Ok(Step::Continue)
        }
        FieldAssign => {
            let obj = reg(vm, th, instr.b);
            let name = load_const(vm, &module, instr.c);
            let v = reg(vm, th, instr.a);
            set_field(vm, th, obj, name, v)
        }
        Index => {
            let obj = reg(vm, th, instr.b);
            let key = reg(vm, th, instr.c);
            let v = get_index(vm, th, obj, key)?;
            set_reg(vm, th, instr.a, v);
            Ok(Step::Continue)
        }
        IndexAssign => {
            let obj = reg(vm, th, instr.b);
            let key = reg(vm, th, instr.c);
            let v = reg(vm, th, instr.a);
            set_index(vm, th, obj, key, v)
        }
        Slice => {
            let obj = reg(vm, th, instr.b);
            let lo_reg = (instr.c & 0xFF) as u16;
            let hi_reg = (instr.c >> 8) as u16;
            let lo = reg(vm, th, lo_reg).as_int().ok_or(VmError::TypeError { op: "slice with non-int bound", kind: "non-int" })?;
            let hi = reg(vm, th, hi_reg).as_int().ok_or(VmError::TypeError { op: "slice with non-int bound", kind: "non-int" })?;
            if let Value::Ref(r) = obj {
                if Gc::header(r).kind() == ValueKind::Array {
                    let arr = unsafe { Gc::payload::<ArrayObj>(r) };
                    let len = arr.length();
                    let items = arr
                        .slice(lo, hi)
                        .ok_or(VmError::InvalidSlice { lo, hi, length: len })?;
                    let v = Value::Ref(vm.gc.alloc(ArrayObj::from_vec(items)));
                    set_reg(vm, th, instr.a, v);
                    return Ok(Step::Continue);
                }
            }
            if let Some(v) = try_metamethod(vm, th, obj, Metamethod::Slice, &[Value::Int(lo), Value::Int(hi)])? {
                set_reg(vm, th, instr.a, v);
                return Ok(Step::Continue);
            }
            Err(VmError::TypeError { op: "slice", kind: obj.kind().name() })
        }
        SliceAssign => {
            let obj = reg(vm, th, instr.b);
            let lo_reg = (instr.c & 0xFF) as u16;
            let hi_reg = (instr.c >> 8) as u16;
            let lo = reg(vm, th, lo_reg);
            let hi = reg(vm, th, hi_reg);
            let v = reg(vm, th, instr.a);
            if try_metamethod(vm, th, obj, Metamethod::SliceEq, &[lo, hi, v])?.is_some() {
                return Ok(Step::Continue);
            }
            rt_error(vm, th, format!("attempt to slice-assign a {} value", obj.kind().name()))
        }
        Length => {
            let obj = reg(vm, th, instr.b);
            let v = get_length(vm, th, obj)?;
            set_reg(vm, th, instr.a, v);
            Ok(Step::Continue)
        }
        LengthAssign => {
            let obj = reg(vm, th, instr.a);
            let n = reg(vm, th, instr.b);
            set_length(vm, th, obj, n)
        }

        Add => binop_numeric(vm, th, instr, Metamethod::Add, Metamethod::AddR, |a, b| a.checked_add(b).ok_or(()), |a, b| a + b),
        Sub => binop_numeric(vm, th, instr, Metamethod::Sub, Metamethod::SubR, |a, b| a.checked_sub(b).ok_or(()), |a, b| a - b),
        Mul => binop_numeric(vm, th, instr, Metamethod::Mul, Metamethod::MulR, |a, b| a.checked_mul(b).ok_or(()), |a, b| a * b),
        Div => {
            let lhs = reg(vm, th, instr.b);
            let rhs = reg(vm, th, instr.c);
            if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
                if b == 0 {
                    return rt_error(vm, th, "division by zero".to_string());
                }
                set_reg(vm, th, instr.a, Value::Int(a.wrapping_div(b)));
                return Ok(Step::Continue);
            }
            binop_numeric(vm, th, instr, Metamethod::Div, Metamethod::DivR, |_, _| Err(()), |a, b| a / b)
        }
        Mod => {
            let lhs = reg(vm, th, instr.b);
            let rhs = reg(vm, th, instr.c);
            if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
                if b == 0 {
                    return rt_error(vm, th, "modulo by zero".to_string());
                }
                set_reg(vm, th, instr.a, Value::Int(a.wrapping_rem(b)));
                return Ok(Step::Continue);
            }
            binop_numeric(vm, th, instr, Metamethod::Mod, Metamethod::ModR, |_, _| Err(()), |a, b| a % b)
        }
        Neg => {
            let v = reg(vm, th, instr.b);
            match v {
                Value::Int(i) => {
                    set_reg(vm, th, instr.a, Value::Int(i.wrapping_neg()));
                    Ok(Step::Continue)
                }
                Value::Float(f) => {
                    set_reg(vm, th, instr.a, Value::Float(-f));
                    Ok(Step::Continue)
                }
                _ => match try_metamethod(vm, th, v, Metamethod::Neg, &[])? {
                    Some(r) => {
                        set_reg(vm, th, instr.a, r);
                        Ok(Step::Continue)
                    }
                    None => Err(VmError::TypeError { op: "negate", kind: v.kind().name() }),
                },
            }
        }
        BitAnd => binop_int(vm, th, instr, Metamethod::BitAnd, Metamethod::BitAndR, |a, b| a & b),
        BitOr => binop_int(vm, th, instr, Metamethod::BitOr, Metamethod::BitOrR, |a, b| a | b),
        BitXor => binop_int(vm, th, instr, Metamethod::BitXor, Metamethod::BitXorR, |a, b| a ^ b),
        Shl => binop_int(vm, th, instr, Metamethod::Shl, Metamethod::ShlR, |a, b| a.wrapping_shl(b as u32 & 63)),
        Shr => binop_int(vm, th, instr, Metamethod::Shr, Metamethod::ShrR, |a, b| a.wrapping_shr(b as u32 & 63)),
        UShr => binop_int(vm, th, instr, Metamethod::UShr, Metamethod::UShrR, |a, b| ((a as u64) >> (b as u32 & 63)) as i64),
        Com => {
            let v = reg(vm, th, instr.b);
            match v {
                Value::Int(i) => {
                    set_reg(vm, th, instr.a, Value::Int(!i));
                    Ok(Step::Continue)
                }
                _ => match try_metamethod(vm, th, v, Metamethod::Com, &[])? {
                    Some(r) => {
                        set_reg(vm, th, instr.a, r);
                        Ok(Step::Continue)
                    }
                    None => Err(VmError::TypeError { op: "bitwise-complement", kind: v.kind().name() }),
                },
            }
        }

        Cmp => {
            let lhs = reg(vm, th, instr.b);
            let rhs = reg(vm, th, instr.c);
            match lhs.partial_cmp(&rhs) {
                Some(ord) => {
                    set_reg(vm, th, instr.a, Value::Int(ord as i64));
                    Ok(Step::Continue)
                }
                None => match try_metamethod(vm, th, lhs, Metamethod::Cmp, &[rhs])? {
                    Some(v) => {
                        set_reg(vm, th, instr.a, v);
                        Ok(Step::Continue)
                    }
                    None => Err(VmError::TypeError { op: "compare", kind: lhs.kind().name() }),
                },
            }
        }
        Equals => {
            let lhs = reg(vm, th, instr.b);
            let rhs = reg(vm, th, instr.c);
            let eq = if lhs == rhs {
                true
            } else if matches!((lhs, rhs), (Value::Ref(_), Value::Ref(_))) {
                try_metamethod(vm, th, lhs, Metamethod::Equals, &[rhs])?.map(|v| v.is_truthy()).unwrap_or(false)
            } else {
                false
            };
            set_reg(vm, th, instr.a, Value::Bool(eq));
            Ok(Step::Continue)
        }
        Is => {
            let lhs = reg(vm, th, instr.b);
            let rhs = reg(vm, th, instr.c);
            set_reg(vm, th, instr.a, Value::Bool(value::is_same(&lhs, &rhs)));
            Ok(Step::Continue)
        }
        Not => {
            let v = reg(vm, th, instr.b);
            set_reg(vm, th, instr.a, Value::Bool(!v.is_truthy()));
            Ok(Step::Continue)
        }

        Cat => {
            let n = instr.c as usize;
            let vals: Vec<Value> = (0..n).map(|i| reg(vm, th, instr.b + i as u16)).collect();
            let v = do_concat(vm, th, &vals)?;
            set_reg(vm, th, instr.a, v);
            Ok(Step::Continue)
        }

        Jmp => {
            jump(vm, th, instr.imm32());
            Ok(Step::Continue)
        }
        JmpTrue => {
            if reg(vm, th, instr.a).is_truthy() {
                jump(vm, th, instr.imm32());
            }
            Ok(Step::Continue)
        }
        JmpFalse => {
            if !reg(vm, th, instr.a).is_truthy() {
                jump(vm, th, instr.imm32());
            }
            Ok(Step::Continue)
        }

        Call => do_call(vm, th, instr, false),
        TailCall => do_call(vm, th, instr, true),
        Return => {
            let frame = vm.thread(th).frames.last().unwrap().clone();
            let src_base = frame.base + instr.a as usize;
            let count = if instr.b == 0xFFFF { vm.thread(th).regs.len().saturating_sub(src_base) } else { instr.b as usize };
            let values: Vec<Value> = (0..count).map(|i| vm.thread(th).reg(src_base + i)).collect();
            fire_hook_if_wanted(vm, th, crate::hooks::HookEvent::Ret)?;
            if frame.tailcall_count > 0 {
                fire_hook_if_wanted(vm, th, crate::hooks::HookEvent::TailRet)?;
            }
            Ok(pop_return(vm, th, &values))
        }

        Closure => {
            let def_idx = instr.b as u32;
            let target = module.get_function(def_idx).expect("valid funcdef index for Closure").clone();
            let base = vm.thread(th).frames.last().unwrap().base;
            let mut ups = Vec::with_capacity(target.upvals.len());
            for uv in &target.upvals {
                let r = match uv.source {
                    UpvalSource::Local => {
                        let gc_ptr: *mut Gc = &mut vm.gc;
                        vm.thread_mut(th).find_or_open_upvalue(unsafe { &mut *gc_ptr }, base + uv.index as usize)
                    }
                    UpvalSource::Outer => script_upvalues(function_ref)[uv.index as usize],
                };
                ups.push(r);
            }
            let funcdef_obj = vm.gc.alloc(FuncDefObj::new(module.clone(), def_idx));
            let env = unsafe { Gc::payload::<FunctionObj>(function_ref) }.env;
            let new_fn = vm.gc.alloc(FunctionObj::new_script(env, funcdef_obj, ups));
            set_reg(vm, th, instr.a, Value::Ref(new_fn));
            Ok(Step::Continue)
        }
        Vararg => {
            let frame = vm.thread(th).frames.last().unwrap().clone();
            let want = if instr.b == 0xFFFF { frame.vararg_count } else { (instr.b as usize).min(frame.vararg_count) };
            for i in 0..want {
                let v = vm.thread(th).reg(frame.vararg_base + i);
                set_reg(vm, th, instr.a + i as u16, v);
            }
            if instr.b != 0xFFFF {
                for i in want..(instr.b as usize) {
                    set_reg(vm, th, instr.a + i as u16, Value::Null);
                }
            }
            Ok(Step::Continue)
        }

        ForeachPrep => {
            let obj = reg(vm, th, instr.b);
            let state = try_metamethod(vm, th, obj, Metamethod::Apply, &[])?
                .ok_or(VmError::TypeError { op: "iterate over", kind: obj.kind().name() })?;
            set_reg(vm, th, instr.a, state);
            set_reg(vm, th, instr.a + 1, obj);
            set_reg(vm, th, instr.a + 2, Value::Null);
            Ok(Step::Continue)
        }
        ForeachIter => {
            let iter_fn = reg(vm, th, instr.a);
            let state = reg(vm, th, instr.a + 1);
            let control = reg(vm, th, instr.a + 2);
            let count = instr.c as usize;
            let results = call_sync(vm, th, iter_fn, Value::Null, &[state, control], count as u32)?;
            let done = results.first().map(Value::is_null).unwrap_or(true);
            if !done {
                set_reg(vm, th, instr.a + 2, results[0]);
            }
            for i in 0..count {
                let v = results.get(i).copied().unwrap_or(Value::Null);
                set_reg(vm, th, instr.b + i as u16, v);
            }
            set_reg(vm, th, instr.a, Value::Bool(!done));
            Ok(Step::Continue)
        }

        TryPush => {
            let base_depth = vm.thread(th).frames.len() - 1;
            let pc_now = vm.thread(th).frames.last().unwrap().pc;
            vm.thread_mut(th).try_regions.push(TryRegion {
                start_pc: pc_now,
                end_pc: usize::MAX,
                handler_pc: instr.imm32() as usize,
                frame_depth: base_depth,
                is_finally: instr.flags != 0,
                handler_reg: instr.a,
            });
            Ok(Step::Continue)
        }
        TryPop => {
            vm.thread_mut(th).try_regions.pop();
            Ok(Step::Continue)
        }
        Throw => {
            let v = reg(vm, th, instr.a);
            unwind::throw(vm.thread_mut(th), v, None)?;
            Ok(Step::Unwind)
        }
        EndFinally => {
            if vm.thread(th).pending_exception.is_some() {
                return Ok(Step::Unwind);
            }
            Ok(Step::Continue)
        }

        Yield => {
            if vm.thread(th).is_main() {
                return Err(VmError::YieldFromMainThread);
            }
            if vm.thread(th).native_call_depth > 0 {
                return Err(VmError::YieldAcrossNativeCall);
            }
            let n = instr.b as usize;
            let values: Vec<Value> = (0..n).map(|i| reg(vm, th, instr.a + i as u16)).collect();
            vm.thread_mut(th).yield_resume = Some((vm.thread(th).frames.last().unwrap().base + instr.a as usize, instr.c as u32));
            vm.thread_mut(th).status = ThreadStatus::Suspended;
            Ok(Step::Yielded(values))
        }
    }
}

fn jump(vm: &Vm, th: GcRef, offset: i32) {
    let frame = vm.thread_mut(th).frames.last_mut().unwrap();
    frame.pc = (frame.pc as i64 + offset as i64) as usize;
}

fn binop_numeric(
    vm: &mut Vm,
    th: GcRef,
    instr: Instruction,
    mm: Metamethod,
    mm_r: Metamethod,
    int_op: impl FnOnce(i64, i64) -> Result<i64, ()>,
    float_op: impl FnOnce(f64, f64) -> f64,
) -> VmResult<Step> {
    let lhs = reg(vm, th, instr.b);
    let rhs = reg(vm, th, instr.c);
    let v = eval_binop_numeric(vm, th, lhs, rhs, mm, mm_r, int_op, float_op)?;
    set_reg(vm, th, instr.a, v);
    Ok(Step::Continue)
}

/// Value-level core of [`binop_numeric`], reused by the embedding API's
/// arithmetic operations (spec.md §4.7) so a host call to e.g. `add` shares
/// the exact fast-path/metamethod dispatch an `Add` opcode would take.
pub(crate) fn eval_binop_numeric(
    vm: &mut Vm,
    th: GcRef,
    lhs: Value,
    rhs: Value,
    mm: Metamethod,
    mm_r: Metamethod,
    int_op: impl FnOnce(i64, i64) -> Result<i64, ()>,
    float_op: impl FnOnce(f64, f64) -> f64,
) -> VmResult<Value> {
    Ok(match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => match int_op(a, b) {
            Ok(r) => Value::Int(r),
            Err(()) => Value::Float(float_op(a as f64, b as f64)),
        },
        _ => match (lhs.as_number(), rhs.as_number()) {
            (Some(a), Some(b)) => Value::Float(float_op(a, b)),
            _ => match try_metamethod(vm, th, lhs, mm, &[rhs])? {
                Some(v) => v,
                None => match try_metamethod(vm, th, rhs, mm_r, &[lhs])? {
                    Some(v) => v,
                    None => return Err(VmError::TypeError { op: mm.name(), kind: lhs.kind().name() }),
                },
            },
        },
    })
}

fn binop_int(vm: &mut Vm, th: GcRef, instr: Instruction, mm: Metamethod, mm_r: Metamethod, op: impl FnOnce(i64, i64) -> i64) -> VmResult<Step> {
    let lhs = reg(vm, th, instr.b);
    let rhs = reg(vm, th, instr.c);
    let v = eval_binop_int(vm, th, lhs, rhs, mm, mm_r, op)?;
    set_reg(vm, th, instr.a, v);
    Ok(Step::Continue)
}

/// Value-level core of [`binop_int`] (bitwise operators have no float
/// promotion), reused by the embedding API.
pub(crate) fn eval_binop_int(
    vm: &mut Vm,
    th: GcRef,
    lhs: Value,
    rhs: Value,
    mm: Metamethod,
    mm_r: Metamethod,
    op: impl FnOnce(i64, i64) -> i64,
) -> VmResult<Value> {
    Ok(match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Value::Int(op(a, b)),
        _ => match try_metamethod(vm, th, lhs, mm, &[rhs])? {
            Some(v) => v,
            None => match try_metamethod(vm, th, rhs, mm_r, &[lhs])? {
                Some(v) => v,
                None => return Err(VmError::TypeError { op: mm.name(), kind: lhs.kind().name() }),
            },
        },
    })
}

/// Host-facing entry point (spec.md §4.7's call primitive): call `callee`
/// synchronously from depth 0. Used for the initial call into a script and
/// for any host-driven call into a `Function` value.
pub fn call_into(vm: &mut Vm, th: GcRef, callee: Value, this: Value, args: &[Value], expected_returns: u32) -> VmResult<Vec<Value>> {
    call_sync(vm, th, callee, this, args, expected_returns)
}

/// Start a coroutine's body running for the first time (spec.md §4.6's
/// "Resume" on an `Initial` thread).
pub fn start_thread(vm: &mut Vm, th: GcRef, body: Value, args: &[Value], expected_returns: u32) -> VmResult<ExecOutcome> {
    let return_base = vm.thread(th).regs.len();
    vm.thread_mut(th).ensure_capacity(return_base + reserved_slots(expected_returns))?;
    vm.thread_mut(th).status = ThreadStatus::Running;
    begin_call(vm, th, body, Value::Null, args, return_base, expected_returns, false)?;
    match run_frames(vm, th, 0)? {
        FrameExit::Returned(values) => {
            vm.thread_mut(th).status = ThreadStatus::Dead;
            Ok(ExecOutcome::Return(values))
        }
        FrameExit::Yielded(values) => Ok(ExecOutcome::Yield(values)),
    }
}

/// Resume a `Suspended` thread past its `Yield` with `resume_values`
/// (spec.md §4.6). Never increments `native_call_depth`: the resumed
/// frame's own call chain may yield again.
pub fn continue_after_yield(vm: &mut Vm, th: GcRef, resume_values: &[Value]) -> VmResult<ExecOutcome> {
    let (slot, expected) = vm.thread_mut(th).yield_resume.take().expect("resume on a thread that never yielded");
    write_returns(vm, th, resume_values, slot, expected);
    vm.thread_mut(th).status = ThreadStatus::Running;
    match run_frames(vm, th, 0)? {
        FrameExit::Returned(values) => {
            vm.thread_mut(th).status = ThreadStatus::Dead;
            Ok(ExecOutcome::Return(values))
        }
        FrameExit::Yielded(values) => Ok(ExecOutcome::Yield(values)),
    }
}

/// Invoke every queued finalizer (spec.md §4.3's finalizer phase): each is
/// an ordinary call to the owning class's finalizer function with the
/// dying instance as `this`. Errors thrown from a finalizer are swallowed
/// rather than propagated — there is no call in progress left to unwind
/// into.
pub fn run_finalizers(vm: &mut Vm, queue: Vec<GcRef>) {
    let th = vm.main_thread;
    for obj in queue {
        let finalizer = match Gc::header(obj).kind() {
            ValueKind::Instance => unsafe { Gc::payload::<InstanceObj>(obj) }.finalizer(),
            _ => None,
        };
        if let Some(f) = finalizer {
            let _ = call_sync(vm, th, f, Value::Ref(obj), &[], 0);
        }
    }
}

/// Turn a `Step::Unwind` produced by one of the value-level ops below into
/// a host-visible `ScriptException`, the same terminal outcome
/// `unwind_in_scope` would reach if the assignment had instead been a
/// bytecode instruction with no surrounding `try`. `croc-api` calls land
/// outside the normal dispatch loop, so there is no loop left to hand
/// `Step::Unwind` back to.
fn step_to_result(vm: &mut Vm, th: GcRef, step: VmResult<Step>) -> VmResult<()> {
    match step? {
        Step::Continue => Ok(()),
        Step::Unwind => {
            let value = vm.thread_mut(th).pending_exception.take().unwrap_or(Value::Null);
            Err(VmError::ScriptException(value))
        }
        _ => unreachable!("field/index/length/slice assignment never produces this Step variant"),
    }
}

/// Value-level operator surface for the embedding API (spec.md §4.7's
/// "Arithmetic/logic ... all go through the full metamethod dispatch",
/// "Indexing", "`pushLen`/`len`/`lena`"). Every function here is a thin
/// wrapper over the exact fast-path/metamethod logic the opcode dispatch
/// in [`execute_one`] uses, so a host-driven `add` and a bytecode `Add`
/// instruction can never disagree on semantics.
pub mod ops {
    use super::*;

    pub fn add(vm: &mut Vm, th: GcRef, a: Value, b: Value) -> VmResult<Value> {
        eval_binop_numeric(vm, th, a, b, Metamethod::Add, Metamethod::AddR, |x, y| x.checked_add(y).ok_or(()), |x, y| x + y)
    }

    pub fn sub(vm: &mut Vm, th: GcRef, a: Value, b: Value) -> VmResult<Value> {
        eval_binop_numeric(vm, th, a, b, Metamethod::Sub, Metamethod::SubR, |x, y| x.checked_sub(y).ok_or(()), |x, y| x - y)
    }

    pub fn mul(vm: &mut Vm, th: GcRef, a: Value, b: Value) -> VmResult<Value> {
        eval_binop_numeric(vm, th, a, b, Metamethod::Mul, Metamethod::MulR, |x, y| x.checked_mul(y).ok_or(()), |x, y| x * y)
    }

    pub fn div(vm: &mut Vm, th: GcRef, a: Value, b: Value) -> VmResult<Value> {
        if let (Value::Int(x), Value::Int(y)) = (a, b) {
            if y == 0 {
                return Err(VmError::DivisionByZero);
            }
            return Ok(Value::Int(x.wrapping_div(y)));
        }
        eval_binop_numeric(vm, th, a, b, Metamethod::Div, Metamethod::DivR, |_, _| Err(()), |x, y| x / y)
    }

    pub fn modulo(vm: &mut Vm, th: GcRef, a: Value, b: Value) -> VmResult<Value> {
        if let (Value::Int(x), Value::Int(y)) = (a, b) {
            if y == 0 {
                return Err(VmError::DivisionByZero);
            }
            return Ok(Value::Int(x.wrapping_rem(y)));
        }
        eval_binop_numeric(vm, th, a, b, Metamethod::Mod, Metamethod::ModR, |_, _| Err(()), |x, y| x % y)
    }

    pub fn neg(vm: &mut Vm, th: GcRef, v: Value) -> VmResult<Value> {
        match v {
            Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
            Value::Float(f) => Ok(Value::Float(-f)),
            _ => try_metamethod(vm, th, v, Metamethod::Neg, &[])?
                .ok_or(VmError::TypeError { op: "negate", kind: v.kind().name() }),
        }
    }

    pub fn bit_and(vm: &mut Vm, th: GcRef, a: Value, b: Value) -> VmResult<Value> {
        eval_binop_int(vm, th, a, b, Metamethod::BitAnd, Metamethod::BitAndR, |x, y| x & y)
    }

    pub fn bit_or(vm: &mut Vm, th: GcRef, a: Value, b: Value) -> VmResult<Value> {
        eval_binop_int(vm, th, a, b, Metamethod::BitOr, Metamethod::BitOrR, |x, y| x | y)
    }

    pub fn bit_xor(vm: &mut Vm, th: GcRef, a: Value, b: Value) -> VmResult<Value> {
        eval_binop_int(vm, th, a, b, Metamethod::BitXor, Metamethod::BitXorR, |x, y| x ^ y)
    }

    pub fn shl(vm: &mut Vm, th: GcRef, a: Value, b: Value) -> VmResult<Value> {
        eval_binop_int(vm, th, a, b, Metamethod::Shl, Metamethod::ShlR, |x, y| x.wrapping_shl(y as u32 & 63))
    }

    pub fn shr(vm: &mut Vm, th: GcRef, a: Value, b: Value) -> VmResult<Value> {
        eval_binop_int(vm, th, a, b, Metamethod::Shr, Metamethod::ShrR, |x, y| x.wrapping_shr(y as u32 & 63))
    }

    pub fn ushr(vm: &mut Vm, th: GcRef, a: Value, b: Value) -> VmResult<Value> {
        eval_binop_int(vm, th, a, b, Metamethod::UShr, Metamethod::UShrR, |x, y| ((x as u64) >> (y as u32 & 63)) as i64)
    }

    pub fn com(vm: &mut Vm, th: GcRef, v: Value) -> VmResult<Value> {
        match v {
            Value::Int(i) => Ok(Value::Int(!i)),
            _ => try_metamethod(vm, th, v, Metamethod::Com, &[])?
                .ok_or(VmError::TypeError { op: "bitwise-complement", kind: v.kind().name() }),
        }
    }

    /// `<=>` (spec.md §4.5's "Comparison"): a signed int, `-1`/`0`/`1` for
    /// the fast-path numeric/char case, or whatever `opCmp` returns.
    pub fn cmp(vm: &mut Vm, th: GcRef, a: Value, b: Value) -> VmResult<i64> {
        match a.partial_cmp(&b) {
            Some(ord) => Ok(ord as i64),
            None => match try_metamethod(vm, th, a, Metamethod::Cmp, &[b])? {
                Some(v) => v.as_int().ok_or(VmError::TypeError { op: "compare", kind: a.kind().name() }),
                None => Err(VmError::TypeError { op: "compare", kind: a.kind().name() }),
            },
        }
    }

    /// `==` (spec.md §4.5's "Comparison"): value equality, falling back to
    /// `opEquals` only between two reference-typed values.
    pub fn equals(vm: &mut Vm, th: GcRef, a: Value, b: Value) -> VmResult<bool> {
        if a == b {
            return Ok(true);
        }
        if matches!((a, b), (Value::Ref(_), Value::Ref(_))) {
            Ok(try_metamethod(vm, th, a, Metamethod::Equals, &[b])?.map(|v| v.is_truthy()).unwrap_or(false))
        } else {
            Ok(false)
        }
    }

    /// `is` (spec.md §4.5's "Comparison"): raw identity, no coercion.
    pub fn is_same(a: Value, b: Value) -> bool {
        value::is_same(&a, &b)
    }

    pub fn concat(vm: &mut Vm, th: GcRef, vals: &[Value]) -> VmResult<Value> {
        do_concat(vm, th, vals)
    }

    pub fn length(vm: &mut Vm, th: GcRef, obj: Value) -> VmResult<Value> {
        get_length(vm, th, obj)
    }

    pub fn set_length(vm: &mut Vm, th: GcRef, obj: Value, new_len: Value) -> VmResult<()> {
        let step = super::set_length(vm, th, obj, new_len);
        step_to_result(vm, th, step)
    }

    pub fn index(vm: &mut Vm, th: GcRef, obj: Value, key: Value) -> VmResult<Value> {
        get_index(vm, th, obj, key)
    }

    pub fn index_assign(vm: &mut Vm, th: GcRef, obj: Value, key: Value, value: Value) -> VmResult<()> {
        let step = super::set_index(vm, th, obj, key, value);
        step_to_result(vm, th, step)
    }

    pub fn field(vm: &mut Vm, th: GcRef, obj: Value, name: Value) -> VmResult<Value> {
        get_field(vm, th, obj, name)
    }

    pub fn field_assign(vm: &mut Vm, th: GcRef, obj: Value, name: Value, value: Value) -> VmResult<()> {
        let step = super::set_field(vm, th, obj, name, value);
        step_to_result(vm, th, step)
    }

    pub fn slice(vm: &mut Vm, th: GcRef, obj: Value, lo: i64, hi: i64) -> VmResult<Value> {
        if let Value::Ref(r) = obj {
            if Gc::header(r).kind() == ValueKind::Array {
                let arr = unsafe { Gc::payload::<ArrayObj>(r) };
                let len = arr.length();
                let items = arr.slice(lo, hi).ok_or(VmError::InvalidSlice { lo, hi, length: len })?;
                return Ok(Value::Ref(vm.gc.alloc(ArrayObj::from_vec(items))));
            }
        }
        try_metamethod(vm, th, obj, Metamethod::Slice, &[Value::Int(lo), Value::Int(hi)])?
            .ok_or(VmError::TypeError { op: "slice", kind: obj.kind().name() })
    }

    pub fn slice_assign(vm: &mut Vm, th: GcRef, obj: Value, lo: Value, hi: Value, value: Value) -> VmResult<()> {
        if try_metamethod(vm, th, obj, Metamethod::SliceEq, &[lo, hi, value])?.is_some() {
            return Ok(());
        }
        let msg = format!("attempt to slice-assign a {} value", obj.kind().name());
        let v = Value::Ref(vm.gc.intern_string(&msg));
        unwind::throw(vm.thread_mut(th), v, None)?;
        let value = vm.thread_mut(th).pending_exception.take().unwrap_or(Value::Null);
        Err(VmError::ScriptException(value))
    }

    /// `opCall` / `opMethod` last-resort dispatch plus ordinary calls
    /// (spec.md §4.7's "Calls"): call `callee` synchronously from the
    /// host, at native-call depth (so it cannot cross a `yield`).
    pub fn call(vm: &mut Vm, th: GcRef, callee: Value, this: Value, args: &[Value], expected_returns: u32) -> VmResult<Vec<Value>> {
        call_sync(vm, th, callee, this, args, expected_returns)
    }
}
