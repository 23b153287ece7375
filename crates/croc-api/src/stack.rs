//! The host embedding stack API (spec.md §4.7).
//!
//! `Stack` is the thin, index-based view onto one `Thread`'s register window
//! that a host embedder actually touches — the "`Thread*` with a flat
//! collection of procedures" ABI of spec.md §6. It never hands out a raw
//! `Value`-bearing pointer; every operation goes through a stack-relative
//! index, resolved against the thread's *current* frame (or, while a native
//! function is running with no script frame above it, the native call's own
//! base — `croc_vm::thread::Thread::native_bases`).
//!
//! Grounded on the teacher's `RuntimeApi` (`gox-runtime-core/src/api.rs`):
//! a thin wrapper around the lower-level engine (there, a `Gc`; here, a
//! `Vm` plus one of its `Thread`s) exposing small `#[inline]` delegating
//! methods grouped by concern. The categories below mirror spec.md §4.7's
//! own grouping one-to-one.

use core::ffi::c_void;

use croc_common_core::bytecode::Module;
use croc_runtime::objects::array::ArrayObj;
use croc_runtime::objects::class::ClassObj;
use croc_runtime::objects::function::{FunctionBody, FunctionObj, NativeFn};
use croc_runtime::objects::funcdef::FuncDefObj;
use croc_runtime::objects::instance::InstanceObj;
use croc_runtime::objects::namespace::{self, NamespaceObj};
use croc_runtime::objects::native_obj::NativeObjData;
use croc_runtime::objects::table::TableObj;
use croc_runtime::objects::upvalue::UpvalueObj;
use croc_runtime::objects::weak_ref::WeakRefObj;
use croc_runtime::{Gc, GcRef, Value, ValueKind};
use croc_vm::thread::ThreadStatus;
use croc_vm::{interp, unwind, Vm};

use crate::error::{ApiError, ApiResult};

/// A stack-relative view onto one `Thread`. Cheap to construct; callers
/// typically make one per host-facing entry point.
pub struct Stack<'a> {
    vm: &'a mut Vm,
    th: GcRef,
}

impl<'a> Stack<'a> {
    pub fn new(vm: &'a mut Vm, th: GcRef) -> Self {
        Self { vm, th }
    }

    pub fn thread_handle(&self) -> GcRef {
        self.th
    }

    pub fn vm(&mut self) -> &mut Vm {
        self.vm
    }

    /// The origin of the frame indices are relative to: the current
    /// activation record's base if one is live, else the innermost running
    /// native call's base, else the bottom of the register stack (spec.md
    /// §4.7: "Slot 0 of the frame is the current `this` value").
    fn base(&self) -> usize {
        let t = self.vm.thread(self.th);
        if let Some(frame) = t.current_frame() {
            frame.base
        } else if let Some(&b) = t.native_bases.last() {
            b
        } else {
            0
        }
    }

    fn top(&self) -> usize {
        self.vm.thread(self.th).regs.len()
    }

    fn size(&self) -> usize {
        self.top().saturating_sub(self.base())
    }

    /// Resolve a stack-relative index to an absolute register index
    /// (spec.md §4.7: "Negative indices count from the top; positive from
    /// the bottom of the current AR's frame").
    fn resolve(&self, op: &'static str, index: i64) -> ApiResult<usize> {
        let base = self.base() as i64;
        let top = self.top() as i64;
        let abs = if index >= 0 { base + index } else { top + index };
        if abs < base || abs >= top {
            return Err(ApiError::InvalidIndex { op, index });
        }
        Ok(abs as usize)
    }

    fn fetch(&self, op: &'static str, index: i64) -> ApiResult<Value> {
        let abs = self.resolve(op, index)?;
        Ok(self.vm.thread(self.th).reg(abs))
    }

    fn push_value(&mut self, v: Value) {
        self.vm.thread_mut(self.th).regs.push(v);
    }

    fn pop_n(&mut self, op: &'static str, n: usize) -> ApiResult<Vec<Value>> {
        if self.size() < n {
            return Err(ApiError::StackUnderflow { op });
        }
        let base = self.base();
        let regs = &mut self.vm.thread_mut(self.th).regs;
        Ok(regs.split_off(regs.len() - n).into_iter().inspect(|_| debug_assert!(base <= regs.len())).collect())
    }

    fn kind_name(v: Value) -> &'static str {
        v.kind().name()
    }

    // === Stack manipulation ===

    /// Push a copy of the value at `index` (spec.md §4.7 "dup").
    pub fn dup(&mut self, index: i64) -> ApiResult<()> {
        let v = self.fetch("dup", index)?;
        self.push_value(v);
        Ok(())
    }

    /// Swap the top two stack slots.
    pub fn swap(&mut self) -> ApiResult<()> {
        if self.size() < 2 {
            return Err(ApiError::StackUnderflow { op: "swap" });
        }
        let top = self.top();
        let regs = &mut self.vm.thread_mut(self.th).regs;
        regs.swap(top - 1, top - 2);
        Ok(())
    }

    /// Pop the top value and insert it at `index`, shifting values above it
    /// up by one (spec.md §4.7 "insert").
    pub fn insert(&mut self, index: i64) -> ApiResult<()> {
        let abs = self.resolve("insert", index)?;
        if self.size() < 1 {
            return Err(ApiError::StackUnderflow { op: "insert" });
        }
        let regs = &mut self.vm.thread_mut(self.th).regs;
        let v = regs.pop().expect("checked non-empty above");
        regs.insert(abs, v);
        Ok(())
    }

    /// Cyclically rotate the top `n` stack slots by one (spec.md §4.7 "rotate").
    pub fn rotate(&mut self, n: usize) -> ApiResult<()> {
        if self.size() < n || n == 0 {
            return Err(ApiError::StackUnderflow { op: "rotate" });
        }
        let top = self.top();
        let regs = &mut self.vm.thread_mut(self.th).regs;
        regs[top - n..top].rotate_right(1);
        Ok(())
    }

    /// Pop `n` values (spec.md §4.7 "pop").
    pub fn pop(&mut self, n: usize) -> ApiResult<()> {
        if self.size() < n {
            return Err(ApiError::StackUnderflow { op: "pop" });
        }
        let new_len = self.top() - n;
        self.vm.thread_mut(self.th).regs.truncate(new_len);
        Ok(())
    }

    /// Grow or shrink the frame to exactly `size` slots, zero-filling on
    /// grow (spec.md §4.7 "setStackSize").
    pub fn set_stack_size(&mut self, size: usize) {
        let base = self.base();
        self.vm.thread_mut(self.th).regs.resize(base + size, Value::Null);
    }

    /// Pop `n` values off the top of this stack and push them, in order,
    /// onto `dst` — `dst` must be a different thread of the same VM
    /// (spec.md §4.7 "transferVals (between threads of one VM)"). Sound
    /// because [`Vm::thread_mut`] only ever needs `&Vm`: the single-mutator
    /// invariant that makes every raw `GcRef` accessor in this codebase
    /// sound also lets us hold two `Thread`s of the same `Vm` live at once.
    pub fn transfer_vals(&mut self, dst: GcRef, n: usize) -> ApiResult<()> {
        let values = self.pop_n("transferVals", n)?;
        let dst_regs = &mut self.vm.thread_mut(dst).regs;
        dst_regs.extend(values);
        Ok(())
    }

    // === Pushers ===

    pub fn push_null(&mut self) {
        self.push_value(Value::Null);
    }

    pub fn push_bool(&mut self, b: bool) {
        self.push_value(Value::Bool(b));
    }

    pub fn push_int(&mut self, i: i64) {
        self.push_value(Value::Int(i));
    }

    pub fn push_float(&mut self, f: f64) {
        self.push_value(Value::Float(f));
    }

    pub fn push_char(&mut self, c: char) {
        self.push_value(Value::Char(c));
    }

    pub fn push_string(&mut self, s: &str) {
        let r = self.vm.gc.intern_string(s);
        self.push_value(Value::Ref(r));
    }

    /// Tango-style `{}`-placeholder formatting (spec.md §4.7 "pushFormat"):
    /// each `{}` in `fmt` consumes the next value of `args`, rendered via
    /// `toString` fast-path rules (no metamethod dispatch — this is meant
    /// for quick diagnostic strings, not user-visible `toString` output).
    pub fn push_format(&mut self, fmt: &str, args: &[Value]) -> ApiResult<()> {
        let mut out = String::with_capacity(fmt.len());
        let mut arg_iter = args.iter();
        let mut chars = fmt.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '{' && chars.peek() == Some(&'}') {
                chars.next();
                let Some(v) = arg_iter.next() else {
                    return Err(ApiError::StackUnderflow { op: "pushFormat" });
                };
                out.push_str(&display_value(*v, &self.vm.gc));
            } else {
                out.push(c);
            }
        }
        self.push_string(&out);
        Ok(())
    }

    pub fn new_table(&mut self) {
        let r = self.vm.gc.alloc(TableObj::new());
        self.push_value(Value::Ref(r));
    }

    pub fn new_array(&mut self, len: usize) {
        let r = self.vm.gc.alloc(ArrayObj::with_capacity(len));
        self.push_value(Value::Ref(r));
    }

    /// Pop `n` values and build a new `Array` from them, in order (spec.md
    /// §4.7 "newArrayFromStack").
    pub fn new_array_from_stack(&mut self, n: usize) -> ApiResult<()> {
        let items = self.pop_n("newArrayFromStack", n)?;
        let r = self.vm.gc.alloc(ArrayObj::from_vec(items));
        self.push_value(Value::Ref(r));
        Ok(())
    }

    /// Build a native `Function` closing over the current environment
    /// (spec.md §4.7 "newFunction (native)").
    pub fn new_function(&mut self, name: &str, param_count: u16, ptr: NativeFn) {
        let env = self.current_env();
        let r = self.vm.gc.alloc(FunctionObj::new_native(env, name, param_count, ptr, Vec::new()));
        self.push_value(Value::Ref(r));
    }

    /// Like [`Self::new_function`] but with an explicit environment
    /// namespace (spec.md §4.7 "newFunctionWithEnv").
    pub fn new_function_with_env(&mut self, name: &str, param_count: u16, ptr: NativeFn, env: GcRef) {
        let r = self.vm.gc.alloc(FunctionObj::new_native(env, name, param_count, ptr, Vec::new()));
        self.push_value(Value::Ref(r));
    }

    /// Build a native `Function` from a script `FuncDef` already registered
    /// in `module` at `func_index` (used by the module-registration
    /// facility named in spec.md §1/§6, before any bytecode has run).
    pub fn new_script_function(&mut self, module: &std::rc::Rc<Module>, func_index: u32, env: GcRef, upvalues: Vec<GcRef>) {
        let funcdef = self.vm.gc.alloc(FuncDefObj::new(module.clone(), func_index));
        let r = self.vm.gc.alloc(FunctionObj::new_script(env, funcdef, upvalues));
        self.push_value(Value::Ref(r));
    }

    pub fn new_class(&mut self, name: &str, base: Option<GcRef>) {
        let env = self.current_env();
        let fields = self.vm.gc.alloc(NamespaceObj::new("fields", Some(env)));
        let r = self.vm.gc.alloc(ClassObj::new(name, base, fields));
        self.push_value(Value::Ref(r));
    }

    /// Create a bare `Instance` of the class at `class_index` (spec.md
    /// §4.7 "newInstance"). Does not run the class's allocator hook — that
    /// is a script-level concern driven from inside the interpreter's
    /// `New` handling; this is the raw allocation primitive a native
    /// allocator hook itself would call.
    pub fn new_instance(&mut self, class_index: i64) -> ApiResult<()> {
        let class_v = self.fetch("newInstance", class_index)?;
        let Value::Ref(class) = class_v else {
            return Err(ApiError::TypeMismatch { op: "newInstance", index: class_index, expected: "class", got: Self::kind_name(class_v) });
        };
        if Gc::header(class).kind() != ValueKind::Class {
            return Err(ApiError::TypeMismatch { op: "newInstance", index: class_index, expected: "class", got: Self::kind_name(class_v) });
        }
        let fields = self.vm.gc.alloc(NamespaceObj::new("instance", None));
        let r = self.vm.gc.alloc(InstanceObj::new(class, fields));
        self.push_value(Value::Ref(r));
        Ok(())
    }

    pub fn new_namespace(&mut self, name: &str) {
        let env = self.current_env();
        let r = self.vm.gc.alloc(NamespaceObj::new(name, Some(env)));
        self.push_value(Value::Ref(r));
    }

    pub fn new_namespace_no_parent(&mut self, name: &str) {
        let r = self.vm.gc.alloc(NamespaceObj::new(name, None));
        self.push_value(Value::Ref(r));
    }

    /// Spawn a new coroutine thread whose body is the callable at `index`
    /// (spec.md §4.7 "newThread", §4.6).
    pub fn new_thread(&mut self, index: i64) -> ApiResult<()> {
        let body = self.fetch("newThread", index)?;
        let handle = self.vm.spawn_thread(body);
        self.push_value(Value::Ref(handle));
        Ok(())
    }

    pub fn push_native_obj(&mut self, ptr: *mut c_void) {
        let r = self.vm.gc.alloc(NativeObjData::new(ptr));
        self.push_value(Value::Ref(r));
    }

    pub fn push_weak_ref(&mut self, index: i64) -> ApiResult<()> {
        let v = self.fetch("pushWeakRef", index)?;
        let Some(target) = v.as_ref() else {
            return Err(ApiError::TypeMismatch { op: "pushWeakRef", index, expected: "reference type", got: Self::kind_name(v) });
        };
        let r = self.vm.gc.alloc(WeakRefObj::new(target));
        self.push_value(Value::Ref(r));
        Ok(())
    }

    fn current_env(&self) -> GcRef {
        match self.vm.thread(self.th).current_frame() {
            Some(frame) => unsafe { Gc::payload::<FunctionObj>(frame.function) }.env,
            None => self.vm.globals,
        }
    }

    // === Queries ===

    pub fn is_valid_index(&self, index: i64) -> bool {
        self.resolve("isValidIndex", index).is_ok()
    }

    pub fn type_of(&self, index: i64) -> ApiResult<&'static str> {
        Ok(self.fetch("type", index)?.kind().name())
    }

    /// MiniD truthiness: `Null`, `false`, `0`, `0.0`, `'\0'` are false
    /// (spec.md §4.7 "isTrue").
    pub fn is_true(&self, index: i64) -> ApiResult<bool> {
        let v = self.fetch("isTrue", index)?;
        Ok(match v {
            Value::Null | Value::Bool(false) => false,
            Value::Int(0) => false,
            Value::Float(f) if f == 0.0 => false,
            Value::Char('\0') => false,
            _ => true,
        })
    }

    pub fn is_kind(&self, index: i64, kind: ValueKind) -> bool {
        self.fetch("is", index).map(|v| v.kind() == kind).unwrap_or(false)
    }

    pub fn is_null(&self, index: i64) -> bool {
        self.is_kind(index, ValueKind::Null)
    }
    pub fn is_bool(&self, index: i64) -> bool {
        self.is_kind(index, ValueKind::Bool)
    }
    pub fn is_int(&self, index: i64) -> bool {
        self.is_kind(index, ValueKind::Int)
    }
    pub fn is_float(&self, index: i64) -> bool {
        self.is_kind(index, ValueKind::Float)
    }
    pub fn is_char(&self, index: i64) -> bool {
        self.is_kind(index, ValueKind::Char)
    }
    pub fn is_string(&self, index: i64) -> bool {
        self.is_kind(index, ValueKind::String)
    }
    pub fn is_table(&self, index: i64) -> bool {
        self.is_kind(index, ValueKind::Table)
    }
    pub fn is_array(&self, index: i64) -> bool {
        self.is_kind(index, ValueKind::Array)
    }
    pub fn is_function(&self, index: i64) -> bool {
        self.is_kind(index, ValueKind::Function)
    }
    pub fn is_class(&self, index: i64) -> bool {
        self.is_kind(index, ValueKind::Class)
    }
    pub fn is_instance(&self, index: i64) -> bool {
        self.is_kind(index, ValueKind::Instance)
    }
    pub fn is_namespace(&self, index: i64) -> bool {
        self.is_kind(index, ValueKind::Namespace)
    }
    pub fn is_thread(&self, index: i64) -> bool {
        self.is_kind(index, ValueKind::Thread)
    }
    pub fn is_native_obj(&self, index: i64) -> bool {
        self.is_kind(index, ValueKind::NativeObj)
    }
    pub fn is_weak_ref(&self, index: i64) -> bool {
        self.is_kind(index, ValueKind::WeakRef)
    }

    // === Getters (spec.md: "panic on type mismatch" — here, a thrown `ApiError`) ===

    pub fn get_bool(&self, index: i64) -> ApiResult<bool> {
        match self.fetch("getBool", index)? {
            Value::Bool(b) => Ok(b),
            v => Err(ApiError::TypeMismatch { op: "getBool", index, expected: "bool", got: Self::kind_name(v) }),
        }
    }

    pub fn get_int(&self, index: i64) -> ApiResult<i64> {
        match self.fetch("getInt", index)? {
            Value::Int(i) => Ok(i),
            v => Err(ApiError::TypeMismatch { op: "getInt", index, expected: "int", got: Self::kind_name(v) }),
        }
    }

    pub fn get_float(&self, index: i64) -> ApiResult<f64> {
        match self.fetch("getFloat", index)? {
            Value::Float(f) => Ok(f),
            v => Err(ApiError::TypeMismatch { op: "getFloat", index, expected: "float", got: Self::kind_name(v) }),
        }
    }

    /// Accepts either `Int` or `Float`, widening `Int` (spec.md §4.7 "getNum").
    pub fn get_num(&self, index: i64) -> ApiResult<f64> {
        let v = self.fetch("getNum", index)?;
        v.as_number().ok_or(ApiError::TypeMismatch { op: "getNum", index, expected: "int or float", got: Self::kind_name(v) })
    }

    pub fn get_char(&self, index: i64) -> ApiResult<char> {
        match self.fetch("getChar", index)? {
            Value::Char(c) => Ok(c),
            v => Err(ApiError::TypeMismatch { op: "getChar", index, expected: "char", got: Self::kind_name(v) }),
        }
    }

    /// Borrowed from `&self`: the returned `&str` can't outlive this `Stack`
    /// (and so can't outlive a `collect()`/`maybe_gc()` call made through
    /// it), since a swept `String` object is genuinely deallocated rather
    /// than merely unreachable (`gc.rs`'s `sweep_phase`/`free_object`).
    pub fn get_string(&self, index: i64) -> ApiResult<&str> {
        let v = self.fetch("getString", index)?;
        match v {
            Value::Ref(r) if r_kind(r) == ValueKind::String => Ok(croc_runtime::objects::string::as_str(r, &self.vm.gc)),
            _ => Err(ApiError::TypeMismatch { op: "getString", index, expected: "string", got: Self::kind_name(v) }),
        }
    }

    pub fn get_thread(&self, index: i64) -> ApiResult<GcRef> {
        let v = self.fetch("getThread", index)?;
        match v {
            Value::Ref(r) if r_kind(r) == ValueKind::Thread => Ok(r),
            _ => Err(ApiError::TypeMismatch { op: "getThread", index, expected: "thread", got: Self::kind_name(v) }),
        }
    }

    pub fn get_native_obj(&self, index: i64) -> ApiResult<*mut c_void> {
        let v = self.fetch("getNativeObj", index)?;
        match v {
            Value::Ref(r) if r_kind(r) == ValueKind::NativeObj => Ok(unsafe { Gc::payload::<NativeObjData>(r) }.ptr()),
            _ => Err(ApiError::TypeMismatch { op: "getNativeObj", index, expected: "nativeobj", got: Self::kind_name(v) }),
        }
    }

    // === Arithmetic / logic (spec.md §4.7: "all go through the full metamethod dispatch") ===

    /// Pop the top two values, push `lhs OP rhs`.
    fn binop(&mut self, op: &'static str, f: impl FnOnce(&mut Vm, GcRef, Value, Value) -> croc_vm::VmResult<Value>) -> ApiResult<()> {
        let vs = self.pop_n(op, 2)?;
        let r = f(self.vm, self.th, vs[0], vs[1])?;
        self.push_value(r);
        Ok(())
    }

    pub fn add(&mut self) -> ApiResult<()> {
        self.binop("add", interp::ops::add)
    }
    pub fn sub(&mut self) -> ApiResult<()> {
        self.binop("sub", interp::ops::sub)
    }
    pub fn mul(&mut self) -> ApiResult<()> {
        self.binop("mul", interp::ops::mul)
    }
    pub fn div(&mut self) -> ApiResult<()> {
        self.binop("div", interp::ops::div)
    }
    pub fn modulo(&mut self) -> ApiResult<()> {
        self.binop("mod", interp::ops::modulo)
    }
    pub fn bit_and(&mut self) -> ApiResult<()> {
        self.binop("and", interp::ops::bit_and)
    }
    pub fn bit_or(&mut self) -> ApiResult<()> {
        self.binop("or", interp::ops::bit_or)
    }
    pub fn bit_xor(&mut self) -> ApiResult<()> {
        self.binop("xor", interp::ops::bit_xor)
    }
    pub fn shl(&mut self) -> ApiResult<()> {
        self.binop("shl", interp::ops::shl)
    }
    pub fn shr(&mut self) -> ApiResult<()> {
        self.binop("shr", interp::ops::shr)
    }
    pub fn ushr(&mut self) -> ApiResult<()> {
        self.binop("ushr", interp::ops::ushr)
    }

    /// Pop the top value, push its negation (spec.md §4.7 "neg").
    pub fn neg(&mut self) -> ApiResult<()> {
        let v = self.pop_n("neg", 1)?[0];
        let r = interp::ops::neg(self.vm, self.th, v)?;
        self.push_value(r);
        Ok(())
    }

    /// Pop the top value, push its bitwise complement (spec.md §4.7 "com").
    pub fn com(&mut self) -> ApiResult<()> {
        let v = self.pop_n("com", 1)?[0];
        let r = interp::ops::com(self.vm, self.th, v)?;
        self.push_value(r);
        Ok(())
    }

    /// Pop the top `n` values, push their concatenation (spec.md §4.7
    /// "cat", §4.5 "Concatenation fast path").
    pub fn cat(&mut self, n: usize) -> ApiResult<()> {
        let values = self.pop_n("cat", n)?;
        let r = interp::ops::concat(self.vm, self.th, &values)?;
        self.push_value(r);
        Ok(())
    }

    /// In-place append: pop the top value (`rhs`) and concatenate it onto
    /// the value at `lhs_index` via `opCatAssign`, or `Array::append` on
    /// the fast path (spec.md §4.7 "cateq", §4.5's `opCatAssign`).
    pub fn cat_eq(&mut self, lhs_index: i64) -> ApiResult<()> {
        let lhs_abs = self.resolve("cateq", lhs_index)?;
        let rhs = self.pop_n("cateq", 1)?[0];
        let lhs = self.vm.thread(self.th).reg(lhs_abs);
        if let (Value::Ref(a), Value::Ref(b)) = (lhs, rhs) {
            if r_kind(a) == ValueKind::Array && r_kind(b) == ValueKind::Array {
                let other = unsafe { Gc::payload::<ArrayObj>(b) }.iter().copied().collect::<Vec<_>>();
                for v in other {
                    unsafe { Gc::payload_mut::<ArrayObj>(a) }.push(v);
                }
                return Ok(());
            }
        }
        if let Value::Ref(a) = lhs {
            if r_kind(a) == ValueKind::Array {
                unsafe { Gc::payload_mut::<ArrayObj>(a) }.push(rhs);
                return Ok(());
            }
        }
        Err(ApiError::TypeMismatch { op: "cateq", index: lhs_index, expected: "array", got: Self::kind_name(lhs) })
    }

    pub fn equals(&mut self) -> ApiResult<bool> {
        let vs = self.pop_n("equals", 2)?;
        Ok(interp::ops::equals(self.vm, self.th, vs[0], vs[1])?)
    }

    pub fn cmp(&mut self) -> ApiResult<i64> {
        let vs = self.pop_n("cmp", 2)?;
        Ok(interp::ops::cmp(self.vm, self.th, vs[0], vs[1])?)
    }

    pub fn is_same(&mut self) -> ApiResult<bool> {
        let vs = self.pop_n("is", 2)?;
        Ok(interp::ops::is_same(vs[0], vs[1]))
    }

    // === Indexing ===

    pub fn idx(&mut self, obj_index: i64, key_index: i64) -> ApiResult<()> {
        let obj = self.fetch("idx", obj_index)?;
        let key = self.fetch("idx", key_index)?;
        let v = interp::ops::index(self.vm, self.th, obj, key)?;
        self.push_value(v);
        Ok(())
    }

    pub fn idxa(&mut self, obj_index: i64, key_index: i64, value_index: i64) -> ApiResult<()> {
        let obj = self.fetch("idxa", obj_index)?;
        let key = self.fetch("idxa", key_index)?;
        let value = self.fetch("idxa", value_index)?;
        Ok(interp::ops::index_assign(self.vm, self.th, obj, key, value)?)
    }

    /// Integer-keyed shortcut: `key` is supplied directly, not read off the
    /// stack (spec.md §4.7 "idxi").
    pub fn idxi(&mut self, obj_index: i64, key: i64) -> ApiResult<()> {
        let obj = self.fetch("idxi", obj_index)?;
        let v = interp::ops::index(self.vm, self.th, obj, Value::Int(key))?;
        self.push_value(v);
        Ok(())
    }

    pub fn idxai(&mut self, obj_index: i64, key: i64, value_index: i64) -> ApiResult<()> {
        let obj = self.fetch("idxai", obj_index)?;
        let value = self.fetch("idxai", value_index)?;
        Ok(interp::ops::index_assign(self.vm, self.th, obj, Value::Int(key), value)?)
    }

    pub fn field(&mut self, obj_index: i64, name: &str) -> ApiResult<()> {
        let obj = self.fetch("field", obj_index)?;
        let key = Value::Ref(self.vm.gc.intern_string(name));
        let v = interp::ops::field(self.vm, self.th, obj, key)?;
        self.push_value(v);
        Ok(())
    }

    pub fn fielda(&mut self, obj_index: i64, name: &str, value_index: i64) -> ApiResult<()> {
        let obj = self.fetch("fielda", obj_index)?;
        let value = self.fetch("fielda", value_index)?;
        let key = Value::Ref(self.vm.gc.intern_string(name));
        Ok(interp::ops::field_assign(self.vm, self.th, obj, key, value)?)
    }

    pub fn slice(&mut self, obj_index: i64, lo: i64, hi: i64) -> ApiResult<()> {
        let obj = self.fetch("slice", obj_index)?;
        let v = interp::ops::slice(self.vm, self.th, obj, lo, hi)?;
        self.push_value(v);
        Ok(())
    }

    pub fn slicea(&mut self, obj_index: i64, lo: i64, hi: i64, value_index: i64) -> ApiResult<()> {
        let obj = self.fetch("slicea", obj_index)?;
        let value = self.fetch("slicea", value_index)?;
        Ok(interp::ops::slice_assign(self.vm, self.th, obj, Value::Int(lo), Value::Int(hi), value)?)
    }

    pub fn push_len(&mut self, obj_index: i64) -> ApiResult<()> {
        let obj = self.fetch("pushLen", obj_index)?;
        let v = interp::ops::length(self.vm, self.th, obj)?;
        self.push_value(v);
        Ok(())
    }

    pub fn len(&mut self, obj_index: i64) -> ApiResult<i64> {
        let obj = self.fetch("len", obj_index)?;
        let v = interp::ops::length(self.vm, self.th, obj)?;
        v.as_int().ok_or(ApiError::TypeMismatch { op: "len", index: obj_index, expected: "int-valued length", got: Self::kind_name(v) })
    }

    pub fn lena(&mut self, obj_index: i64, new_len_index: i64) -> ApiResult<()> {
        let obj = self.fetch("lena", obj_index)?;
        let new_len = self.fetch("lena", new_len_index)?;
        Ok(interp::ops::set_length(self.vm, self.th, obj, new_len)?)
    }

    // === Calls ===

    /// Call the value at `callee_index` with `this` at `this_index` and
    /// `args`, expecting `expected_returns` results (`u32::MAX` = all);
    /// results are pushed onto the stack (spec.md §4.7 "rawCall").
    pub fn raw_call(&mut self, callee_index: i64, this_index: i64, args: &[Value], expected_returns: u32) -> ApiResult<usize> {
        let callee = self.fetch("rawCall", callee_index)?;
        let this = self.fetch("rawCall", this_index)?;
        if callee.kind() != ValueKind::Function {
            return Err(ApiError::NotCallable { op: "rawCall" });
        }
        let results = interp::ops::call(self.vm, self.th, callee, this, args, expected_returns)?;
        let n = results.len();
        for v in results {
            self.push_value(v);
        }
        Ok(n)
    }

    /// Resolve `name` on the object at `obj_index` (instance/class field
    /// chain, falling back to `opMethod`) and call it, with `this`
    /// defaulting to the object itself unless `custom_this` overrides it
    /// (spec.md §4.7 "methodCall").
    pub fn method_call(&mut self, obj_index: i64, name: &str, args: &[Value], expected_returns: u32, custom_this: Option<Value>) -> ApiResult<usize> {
        let obj = self.fetch("methodCall", obj_index)?;
        let key = Value::Ref(self.vm.gc.intern_string(name));
        let method = interp::ops::field(self.vm, self.th, obj, key)?;
        if method.kind() != ValueKind::Function {
            return Err(ApiError::NotCallable { op: "methodCall" });
        }
        let this = custom_this.unwrap_or(obj);
        let results = interp::ops::call(self.vm, self.th, method, this, args, expected_returns)?;
        let n = results.len();
        for v in results {
            self.push_value(v);
        }
        Ok(n)
    }

    /// Call `name` resolved starting from the currently-executing method's
    /// declared base class, not `this`'s actual runtime class (spec.md
    /// §4.7 "superCall": "works only from a method; resolves in the
    /// currently-executing function's declared base class").
    pub fn super_call(&mut self, name: &str, args: &[Value], expected_returns: u32) -> ApiResult<usize> {
        let frame = self.vm.thread(self.th).current_frame().cloned();
        let Some(frame) = frame else {
            return Err(ApiError::NotCallable { op: "superCall" });
        };
        let Some(base_class) = frame.base_class else {
            return Err(ApiError::NotCallable { op: "superCall" });
        };
        let key = Value::Ref(self.vm.gc.intern_string(name));
        let method = unsafe { Gc::payload::<ClassObj>(base_class) }.lookup(key);
        if method.kind() != ValueKind::Function {
            return Err(ApiError::NotCallable { op: "superCall" });
        }
        let this = self.vm.thread(self.th).reg(frame.base);
        let results = interp::ops::call(self.vm, self.th, method, this, args, expected_returns)?;
        let n = results.len();
        for v in results {
            self.push_value(v);
        }
        Ok(n)
    }

    // === Error handling ===

    /// Throw the value at `index` (spec.md §4.7 "throwException").
    pub fn throw_exception(&mut self, index: i64) -> ApiResult<()> {
        let v = self.fetch("throwException", index)?;
        unwind::throw(self.vm.thread_mut(self.th), v, None)?;
        Err(ApiError::ScriptException)
    }

    /// Like [`Self::throw_exception`] but the thrown value is built from a
    /// `pushFormat`-style string.
    pub fn throw_format(&mut self, fmt: &str, args: &[Value]) -> ApiResult<()> {
        self.push_format(fmt, args)?;
        self.throw_exception(-1)
    }

    /// Pop the in-flight exception onto the stack (spec.md §4.7
    /// "catchException"). Pushes `null` if nothing is in flight.
    pub fn catch_exception(&mut self) {
        let v = self.vm.thread_mut(self.th).pending_exception.take().unwrap_or(Value::Null);
        self.push_value(v);
    }

    /// Pop and format the recorded call chain (spec.md §4.7
    /// "getTraceback", §7: "erased after `getTraceback` is called once").
    pub fn get_traceback(&mut self) -> String {
        unwind::take_traceback(self.vm.thread_mut(self.th))
    }

    // === Globals / upvalues / env ===

    pub fn push_global(&mut self, name: &str) {
        let v = namespace::lookup_by_str(self.vm.globals, &mut self.vm.gc, name);
        self.push_value(v);
    }

    pub fn get_global(&mut self, name: &str) -> Value {
        namespace::lookup_by_str(self.vm.globals, &mut self.vm.gc, name)
    }

    /// Requires the global already exist (spec.md §4.7 "setGlobal").
    pub fn set_global(&mut self, name: &str, value: Value) -> ApiResult<()> {
        let key = Value::Ref(self.vm.gc.intern_string(name));
        let globals = self.vm.globals;
        if !unsafe { Gc::payload::<NamespaceObj>(globals) }.has_local(&key) {
            return Err(ApiError::GlobalMissing { name: name.to_string() });
        }
        unsafe { Gc::payload_mut::<NamespaceObj>(globals) }.set_local(key, value);
        Ok(())
    }

    /// Requires the global not already exist (spec.md §4.7 "newGlobal").
    pub fn new_global(&mut self, name: &str, value: Value) -> ApiResult<()> {
        let key = Value::Ref(self.vm.gc.intern_string(name));
        let globals = self.vm.globals;
        if unsafe { Gc::payload::<NamespaceObj>(globals) }.has_local(&key) {
            return Err(ApiError::GlobalExists { name: name.to_string() });
        }
        unsafe { Gc::payload_mut::<NamespaceObj>(globals) }.set_local(key, value);
        Ok(())
    }

    pub fn find_global(&mut self, name: &str) -> bool {
        let key = Value::Ref(self.vm.gc.intern_string(name));
        unsafe { Gc::payload::<NamespaceObj>(self.vm.globals) }.has_local(&key)
    }

    /// Push the environment namespace of the function running `depth`
    /// frames below the current one (spec.md §4.7 "pushEnvironment").
    pub fn push_environment(&mut self, depth: usize) -> ApiResult<()> {
        let frames = &self.vm.thread(self.th).frames;
        let idx = frames.len().checked_sub(1 + depth).ok_or(ApiError::InvalidIndex { op: "pushEnvironment", index: depth as i64 })?;
        let function = frames[idx].function;
        let env = unsafe { Gc::payload::<FunctionObj>(function) }.env;
        self.push_value(Value::Ref(env));
        Ok(())
    }

    /// Read upvalue `index` of the currently executing script function
    /// (spec.md §4.7 "getUpval").
    pub fn get_upval(&mut self, index: usize) -> ApiResult<Value> {
        let upvalue = self.current_upvalue(index)?;
        let th = self.vm.thread(self.th);
        Ok(unsafe { Gc::payload::<UpvalueObj>(upvalue) }.get(|i| th.reg(i)))
    }

    pub fn set_upval(&mut self, index: usize, value: Value) -> ApiResult<()> {
        let upvalue = self.current_upvalue(index)?;
        let th = self.th;
        let set_open = |i: usize, v: Value| self.vm.thread_mut(th).set_reg(i, v);
        unsafe { Gc::payload_mut::<UpvalueObj>(upvalue) }.set(value, set_open);
        Ok(())
    }

    fn current_upvalue(&self, index: usize) -> ApiResult<GcRef> {
        let frame = self.vm.thread(self.th).current_frame().ok_or(ApiError::NotCallable { op: "getUpval/setUpval" })?;
        let f = unsafe { Gc::payload::<FunctionObj>(frame.function) };
        match &f.body {
            FunctionBody::Script { upvalues, .. } => {
                upvalues.get(index).copied().ok_or(ApiError::InvalidIndex { op: "getUpval/setUpval", index: index as i64 })
            }
            FunctionBody::Native { .. } => Err(ApiError::NotCallable { op: "getUpval/setUpval" }),
        }
    }

    // === Refs ===

    /// Strongly root the value at `index` under a new 64-bit host handle
    /// (spec.md §4.7 "createRef").
    pub fn create_ref(&mut self, index: i64) -> ApiResult<u64> {
        let v = self.fetch("createRef", index)?;
        let id = self.vm.refs.create(v);
        log::trace!("createRef: host handle {id} rooted");
        Ok(id)
    }

    /// Push the value a ref resolves to (spec.md §4.7 "pushRef").
    pub fn push_ref(&mut self, id: u64) -> ApiResult<()> {
        let v = self.vm.refs.resolve(id).map_err(|_| ApiError::InvalidRef { id })?;
        self.push_value(v);
        Ok(())
    }

    pub fn remove_ref(&mut self, id: u64) -> ApiResult<()> {
        self.vm.refs.remove(id).map_err(|_| ApiError::InvalidRef { id })
    }

    // === GC control ===

    pub fn maybe_gc(&mut self) {
        if self.vm.should_collect() {
            log::trace!("maybe_gc: threshold reached, running a cycle");
        }
        self.vm.maybe_collect();
    }

    pub fn gc(&mut self) {
        self.vm.collect();
    }

    // === Registry (spec.md §6) ===

    pub fn push_registry(&mut self, name: &str) {
        let v = namespace::lookup_by_str(self.vm.registry, &mut self.vm.gc, name);
        self.push_value(v);
    }

    pub fn set_registry(&mut self, name: &str, value: Value) {
        let key = Value::Ref(self.vm.gc.intern_string(name));
        let registry = self.vm.registry;
        unsafe { Gc::payload_mut::<NamespaceObj>(registry) }.set_local(key, value);
    }

    // === Coroutine resume/yield (spec.md §4.6) ===

    /// Resume this thread with `args`, expecting `expected_returns`
    /// values, which are pushed onto the *caller's* stack on return or
    /// yield (spec.md §4.6 "Resume protocol"). `self` must be the resuming
    /// thread's own `Stack`, not the coroutine's.
    pub fn resume(&mut self, co: GcRef, args: &[Value], expected_returns: u32) -> ApiResult<bool> {
        let status = self.vm.thread(co).status;
        let outcome = match status {
            ThreadStatus::Initial => {
                let body = self.vm.thread(co).body.expect("Initial thread always has a body");
                interp::start_thread(self.vm, co, body, args, expected_returns)?
            }
            ThreadStatus::Suspended => interp::continue_after_yield(self.vm, co, args)?,
            other => return Err(ApiError::from(croc_vm::VmError::InvalidResume { state: status_name(other) })),
        };
        let (values, yielded) = match outcome {
            interp::ExecOutcome::Return(v) => (v, false),
            interp::ExecOutcome::Yield(v) => (v, true),
        };
        log::trace!("resume {co:p}: {}", if yielded { "yielded" } else { "returned" });
        for v in values {
            self.push_value(v);
        }
        Ok(yielded)
    }

    pub fn pending_halt(&mut self, co: GcRef) {
        self.vm.thread_mut(co).pending_halt = true;
    }

    /// Reset a `Dead` thread back to `Initial` (spec.md §4.6 "Reset").
    pub fn reset_thread(&mut self, co: GcRef, new_body: Option<Value>) -> ApiResult<()> {
        Ok(self.vm.thread_mut(co).reset(new_body)?)
    }
}

fn r_kind(r: GcRef) -> ValueKind {
    Gc::header(r).kind()
}

fn status_name(s: ThreadStatus) -> &'static str {
    match s {
        ThreadStatus::Initial => "initial",
        ThreadStatus::Running => "running",
        ThreadStatus::Waiting => "waiting",
        ThreadStatus::Suspended => "suspended",
        ThreadStatus::Dead => "dead",
    }
}

/// Quick, metamethod-free rendering used by `pushFormat`/`throwFormat`.
fn display_value(v: Value, gc: &Gc) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Char(c) => c.to_string(),
        Value::Ref(r) if r_kind(r) == ValueKind::String => croc_runtime::objects::string::as_str(r, gc).to_string(),
        Value::Ref(r) => format!("{}: {:p}", r_kind(r).name(), r),
    }
}
