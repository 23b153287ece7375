//! Depth-first graph reader (spec.md §4.8 point 5: "allocates id-indexed
//! forward-declarations so that cyclic graphs can be reconnected in one
//! pass").
//!
//! Every reference kind is allocated with placeholder contents and
//! registered under its wire id *before* its children are read, mirroring
//! the writer's "assign an id the moment a reference is first visited"
//! rule (`write.rs`). A child that back-references an ancestor still being
//! built — e.g. `t.self = t` — resolves against the already-allocated (if
//! not yet fully populated) object instead of recursing forever.

use core::ffi::c_void;
use std::rc::Rc;

use hashbrown::HashMap;

use croc_common_core::bytecode::{Constant, FuncDef, Module, UpvalDesc, UpvalSource};
use croc_common_core::instruction::Instruction;
use croc_runtime::objects::array::ArrayObj;
use croc_runtime::objects::class::ClassObj;
use croc_runtime::objects::function::{FunctionBody, FunctionObj, NativeFn};
use croc_runtime::objects::funcdef::FuncDefObj;
use croc_runtime::objects::instance::InstanceObj;
use croc_runtime::objects::memblock::MemblockObj;
use croc_runtime::objects::namespace::NamespaceObj;
use croc_runtime::objects::table::TableObj;
use croc_runtime::objects::upvalue::{UpvalueObj, UpvalueState};
use croc_runtime::objects::weak_ref::WeakRefObj;
use croc_runtime::{Gc, GcRef, Value};

use crate::tag::{
    read_bool, read_bytes_with_len, read_f64, read_i64, read_string, read_tag, read_u32,
    read_varint, Tag,
};
use crate::write::mem_type_from_u8;
use crate::{SerializeError, SerializeResult, Transients};

fn noop_native(_: *mut c_void) -> i64 {
    0
}

pub struct GraphReader<'g, 't, T: Transients> {
    gc: &'g mut Gc,
    transients: &'t T,
    ids: HashMap<u32, GcRef>,
    modules: HashMap<u32, Rc<Module>>,
    placeholder_ns: Option<GcRef>,
    placeholder_cls: Option<GcRef>,
}

impl<'g, 't, T: Transients> GraphReader<'g, 't, T> {
    pub fn new(gc: &'g mut Gc, transients: &'t T) -> Self {
        Self {
            gc,
            transients,
            ids: HashMap::new(),
            modules: HashMap::new(),
            placeholder_ns: None,
            placeholder_cls: None,
        }
    }

    pub fn read(&mut self, input: &mut dyn crate::Input) -> SerializeResult<Value> {
        let result = self.read_value(input);
        match &result {
            Ok(_) => log::trace!("deserialized graph of {} references", self.ids.len()),
            Err(e) => log::warn!("graph deserialization failed: {e}"),
        }
        result
    }

    fn placeholder_namespace(&mut self) -> GcRef {
        if let Some(p) = self.placeholder_ns {
            return p;
        }
        let p = self.gc.alloc(NamespaceObj::new("", None));
        self.placeholder_ns = Some(p);
        p
    }

    fn placeholder_class(&mut self) -> GcRef {
        if let Some(p) = self.placeholder_cls {
            return p;
        }
        let ns = self.placeholder_namespace();
        let p = self.gc.alloc(ClassObj::new("", None, ns));
        self.placeholder_cls = Some(p);
        p
    }

    /// Read a node expected to be a reference (every field the writer
    /// produced with `write_ref` rather than `write_value`).
    fn read_ref(&mut self, input: &mut dyn crate::Input) -> SerializeResult<GcRef> {
        match self.read_value(input)? {
            Value::Ref(r) => Ok(r),
            other => Err(SerializeError::Malformed(format!(
                "expected a reference, got {}",
                other.kind().name()
            ))),
        }
    }

    fn read_value(&mut self, input: &mut dyn crate::Input) -> SerializeResult<Value> {
        match read_tag(input)? {
            Tag::Null => Ok(Value::Null),
            Tag::True => Ok(Value::Bool(true)),
            Tag::False => Ok(Value::Bool(false)),
            Tag::Int => Ok(Value::Int(read_i64(input)?)),
            Tag::Float => Ok(Value::Float(read_f64(input)?)),
            Tag::Char => {
                let v = read_u32(input)?;
                char::from_u32(v)
                    .map(Value::Char)
                    .ok_or_else(|| SerializeError::Malformed(format!("invalid char codepoint {v}")))
            }
            Tag::Backref => {
                let id = read_u32(input)?;
                let r = *self.ids.get(&id).ok_or(SerializeError::UnknownBackref(id))?;
                Ok(Value::Ref(r))
            }
            Tag::Transient => {
                let token = read_string(input)?;
                self.transients
                    .resolve(&token)
                    .ok_or(SerializeError::UnknownTransient(token))
            }
            Tag::Str => {
                let id = read_u32(input)?;
                let s = read_string(input)?;
                let r = self.gc.intern_string(&s);
                self.ids.insert(id, r);
                Ok(Value::Ref(r))
            }
            Tag::Table => self.read_table(input),
            Tag::Array => self.read_array(input),
            Tag::Memblock => self.read_memblock(input),
            Tag::Namespace => self.read_namespace(input),
            Tag::Class => self.read_class(input),
            Tag::Instance => self.read_instance(input),
            Tag::FunctionScript => self.read_function(input),
            Tag::FuncDef => self.read_funcdef(input),
            Tag::WeakRef => self.read_weak_ref(input),
            Tag::Upvalue => self.read_upvalue(input),
        }
    }

    fn read_table(&mut self, input: &mut dyn crate::Input) -> SerializeResult<Value> {
        let id = read_u32(input)?;
        let r = self.gc.alloc(TableObj::new());
        self.ids.insert(id, r);
        let n = read_varint(input)? as usize;
        for _ in 0..n {
            let k = self.read_value(input)?;
            let v = self.read_value(input)?;
            unsafe { Gc::payload_mut::<TableObj>(r) }.set(k, v);
        }
        Ok(Value::Ref(r))
    }

    fn read_array(&mut self, input: &mut dyn crate::Input) -> SerializeResult<Value> {
        let id = read_u32(input)?;
        let r = self.gc.alloc(ArrayObj::new());
        self.ids.insert(id, r);
        let n = read_varint(input)? as usize;
        for _ in 0..n {
            let v = self.read_value(input)?;
            unsafe { Gc::payload_mut::<ArrayObj>(r) }.push(v);
        }
        Ok(Value::Ref(r))
    }

    fn read_memblock(&mut self, input: &mut dyn crate::Input) -> SerializeResult<Value> {
        let id = read_u32(input)?;
        let mut tyb = [0u8; 1];
        input.read_bytes(&mut tyb)?;
        let ty = mem_type_from_u8(tyb[0])?;
        let elem_count = read_varint(input)? as usize;
        let mut block = MemblockObj::new(ty, elem_count);
        input.read_bytes(block.raw_bytes_mut())?;
        let r = self.gc.alloc(block);
        self.ids.insert(id, r);
        Ok(Value::Ref(r))
    }

    fn read_namespace(&mut self, input: &mut dyn crate::Input) -> SerializeResult<Value> {
        let id = read_u32(input)?;
        let name = read_string(input)?;
        let r = self.gc.alloc(NamespaceObj::new(name, None));
        self.ids.insert(id, r);
        let has_parent = read_bool(input)?;
        let parent = if has_parent { Some(self.read_ref(input)?) } else { None };
        unsafe { Gc::payload_mut::<NamespaceObj>(r) }.set_parent(parent);
        let n = read_varint(input)? as usize;
        for _ in 0..n {
            let k = self.read_value(input)?;
            let v = self.read_value(input)?;
            unsafe { Gc::payload_mut::<NamespaceObj>(r) }.set_local(k, v);
        }
        Ok(Value::Ref(r))
    }

    fn read_class(&mut self, input: &mut dyn crate::Input) -> SerializeResult<Value> {
        let id = read_u32(input)?;
        let name = read_string(input)?;
        let placeholder_fields = self.placeholder_namespace();
        let r = self.gc.alloc(ClassObj::new(name, None, placeholder_fields));
        self.ids.insert(id, r);

        let has_base = read_bool(input)?;
        let base = if has_base { Some(self.read_ref(input)?) } else { None };
        let fields = self.read_ref(input)?;
        let has_allocator = read_bool(input)?;
        let allocator = if has_allocator { Some(self.read_value(input)?) } else { None };
        let has_finalizer = read_bool(input)?;
        let finalizer = if has_finalizer { Some(self.read_value(input)?) } else { None };

        let cls = unsafe { Gc::payload_mut::<ClassObj>(r) };
        cls.set_base(base);
        cls.set_fields(fields);
        if let Some(v) = allocator {
            cls.set_allocator(v);
        }
        if let Some(v) = finalizer {
            cls.set_finalizer(v);
        }
        Ok(Value::Ref(r))
    }

    fn read_instance(&mut self, input: &mut dyn crate::Input) -> SerializeResult<Value> {
        let id = read_u32(input)?;
        let dummy_class = self.placeholder_class();
        let dummy_fields = self.placeholder_namespace();
        let r = self.gc.alloc(InstanceObj::new(dummy_class, dummy_fields));
        self.ids.insert(id, r);

        let class = self.read_ref(input)?;
        let fields = self.read_ref(input)?;
        let n_extra = read_varint(input)? as usize;
        let mut extra = Vec::with_capacity(n_extra);
        for _ in 0..n_extra {
            extra.push(self.read_value(input)?);
        }
        let raw = read_bytes_with_len(input)?;

        let inst = unsafe { Gc::payload_mut::<InstanceObj>(r) };
        inst.set_class(class);
        inst.set_fields(fields);
        inst.set_extra_slots(extra.len());
        for (i, v) in extra.into_iter().enumerate() {
            inst.extra_set(i, v);
        }
        *inst.raw_bytes_mut() = raw;
        Ok(Value::Ref(r))
    }

    fn read_function(&mut self, input: &mut dyn crate::Input) -> SerializeResult<Value> {
        let id = read_u32(input)?;
        let placeholder_env = self.placeholder_namespace();
        let r = self.gc.alloc(FunctionObj::new_native(
            placeholder_env,
            "",
            0,
            noop_native as NativeFn,
            Vec::new(),
        ));
        self.ids.insert(id, r);

        let env = self.read_ref(input)?;
        let funcdef = self.read_ref(input)?;
        let n_up = read_varint(input)? as usize;
        let mut upvalues = Vec::with_capacity(n_up);
        for _ in 0..n_up {
            upvalues.push(self.read_ref(input)?);
        }

        let f = unsafe { Gc::payload_mut::<FunctionObj>(r) };
        f.env = env;
        f.body = FunctionBody::Script { funcdef, upvalues };
        Ok(Value::Ref(r))
    }

    fn read_funcdef(&mut self, input: &mut dyn crate::Input) -> SerializeResult<Value> {
        let id = read_u32(input)?;
        let module = self.read_module_ref(input)?;
        let index = read_u32(input)?;
        let r = self.gc.alloc(FuncDefObj::new(module, index));
        self.ids.insert(id, r);
        Ok(Value::Ref(r))
    }

    fn read_weak_ref(&mut self, input: &mut dyn crate::Input) -> SerializeResult<Value> {
        let id = read_u32(input)?;
        let r = self.gc.alloc(WeakRefObj::new(core::ptr::null_mut()));
        self.ids.insert(id, r);
        let has_target = read_bool(input)?;
        if has_target {
            let target = self.read_ref(input)?;
            unsafe { Gc::payload::<WeakRefObj>(r) }.retarget(target);
        }
        Ok(Value::Ref(r))
    }

    fn read_upvalue(&mut self, input: &mut dyn crate::Input) -> SerializeResult<Value> {
        let id = read_u32(input)?;
        let r = self.gc.alloc(UpvalueObj::open(0));
        self.ids.insert(id, r);
        let v = self.read_value(input)?;
        unsafe { Gc::payload_mut::<UpvalueObj>(r) }.state = UpvalueState::Closed(v);
        Ok(Value::Ref(r))
    }

    fn read_module_ref(&mut self, input: &mut dyn crate::Input) -> SerializeResult<Rc<Module>> {
        let fresh = read_bool(input)?;
        let mid = read_u32(input)?;
        if !fresh {
            return self
                .modules
                .get(&mid)
                .cloned()
                .ok_or_else(|| SerializeError::Malformed(format!("module id {mid} referenced before defined")));
        }
        let module = read_module_contents(input)?;
        let rc = Rc::new(module);
        self.modules.insert(mid, rc.clone());
        Ok(rc)
    }
}

fn read_module_contents(input: &mut dyn crate::Input) -> SerializeResult<Module> {
    let name = read_string(input)?;
    let n_const = read_varint(input)? as usize;
    let mut constants = Vec::with_capacity(n_const);
    for _ in 0..n_const {
        constants.push(read_constant(input)?);
    }
    let n_fn = read_varint(input)? as usize;
    let mut funcdefs = Vec::with_capacity(n_fn);
    for _ in 0..n_fn {
        funcdefs.push(read_funcdef_raw(input)?);
    }
    let entry_func = read_u32(input)?;
    Ok(Module { name, constants, funcdefs, entry_func })
}

fn read_constant(input: &mut dyn crate::Input) -> SerializeResult<Constant> {
    let mut b = [0u8; 1];
    input.read_bytes(&mut b)?;
    Ok(match b[0] {
        0 => Constant::Null,
        1 => Constant::Bool(read_bool(input)?),
        2 => Constant::Int(read_i64(input)?),
        3 => Constant::Float(read_f64(input)?),
        4 => {
            let v = read_u32(input)?;
            Constant::Char(
                char::from_u32(v)
                    .ok_or_else(|| SerializeError::Malformed(format!("invalid char codepoint {v}")))?,
            )
        }
        5 => Constant::String(read_string(input)?),
        other => return Err(SerializeError::Malformed(format!("unknown constant tag {other}"))),
    })
}

fn read_funcdef_raw(input: &mut dyn crate::Input) -> SerializeResult<FuncDef> {
    let name = read_string(input)?;
    let param_count = read_varint(input)? as u16;
    let local_slots = read_varint(input)? as u16;
    let is_vararg = read_bool(input)?;
    let n_code = read_varint(input)? as usize;
    let mut code = Vec::with_capacity(n_code);
    for _ in 0..n_code {
        code.push(read_instruction(input)?);
    }
    let n_up = read_varint(input)? as usize;
    let mut upvals = Vec::with_capacity(n_up);
    for _ in 0..n_up {
        let mut b = [0u8; 1];
        input.read_bytes(&mut b)?;
        let source = match b[0] {
            0 => UpvalSource::Local,
            1 => UpvalSource::Outer,
            other => return Err(SerializeError::Malformed(format!("unknown upval source {other}"))),
        };
        let index = read_varint(input)? as u16;
        upvals.push(UpvalDesc { source, index });
    }
    let n_inner = read_varint(input)? as usize;
    let mut inner_funcs = Vec::with_capacity(n_inner);
    for _ in 0..n_inner {
        inner_funcs.push(read_u32(input)?);
    }
    let debug_func_id = read_u32(input)?;
    Ok(FuncDef { name, param_count, local_slots, is_vararg, code, upvals, inner_funcs, debug_func_id })
}

fn read_instruction(input: &mut dyn crate::Input) -> SerializeResult<Instruction> {
    let mut head = [0u8; 2];
    input.read_bytes(&mut head)?;
    let mut ab = [0u8; 2];
    input.read_bytes(&mut ab)?;
    let mut bb = [0u8; 2];
    input.read_bytes(&mut bb)?;
    let mut cb = [0u8; 2];
    input.read_bytes(&mut cb)?;
    Ok(Instruction {
        op: head[0],
        flags: head[1],
        a: u16::from_le_bytes(ab),
        b: u16::from_le_bytes(bb),
        c: u16::from_le_bytes(cb),
    })
}
