//! Depth-first graph writer (spec.md §4.8 points 1, 2, 3, 4).

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;
use std::rc::Rc;

use hashbrown::HashMap;

use croc_common_core::bytecode::{Constant, FuncDef, Module, UpvalSource};
use croc_common_core::instruction::Instruction;
use croc_runtime::objects::class::ClassObj;
use croc_runtime::objects::function::{FunctionBody, FunctionObj};
use croc_runtime::objects::funcdef::FuncDefObj;
use croc_runtime::objects::instance::InstanceObj;
use croc_runtime::objects::memblock::{MemType, MemblockObj};
use croc_runtime::objects::namespace::NamespaceObj;
use croc_runtime::objects::table::TableObj;
use croc_runtime::objects::upvalue::{UpvalueObj, UpvalueState};
use croc_runtime::objects::weak_ref::WeakRefObj;
use croc_runtime::objects::{array::ArrayObj, string::StringObj};
use croc_runtime::{Gc, GcRef, Value, ValueKind};

use crate::tag::{
    write_bool, write_bytes_with_len, write_f64, write_i64, write_str, write_u32, write_varint, Tag,
};
use crate::{Output, SerializeError, SerializeResult, Transients};

/// Walks a reachable [`Value`] graph depth-first, writing a tagged stream.
/// `seen` assigns each reference an id the moment it is first visited
/// (before recursing into its children), so a cycle's second visit finds
/// an entry already present and emits a [`Tag::Backref`] instead of
/// recursing forever (spec.md §4.8 point 2).
pub struct GraphWriter<'t, T: Transients> {
    transients: &'t T,
    seen: HashMap<GcRef, u32>,
    next_id: u32,
    modules_seen: HashMap<usize, u32>,
    next_module_id: u32,
}

impl<'t, T: Transients> GraphWriter<'t, T> {
    pub fn new(transients: &'t T) -> Self {
        Self {
            transients,
            seen: HashMap::new(),
            next_id: 0,
            modules_seen: HashMap::new(),
            next_module_id: 0,
        }
    }

    pub fn write(&mut self, out: &mut dyn Output, root: Value) -> SerializeResult<()> {
        let result = self.write_value(out, root);
        match &result {
            Ok(()) => log::trace!("serialized graph of {} references", self.seen.len()),
            Err(e) => log::warn!("graph serialization failed: {e}"),
        }
        result
    }

    fn write_value(&mut self, out: &mut dyn Output, v: Value) -> SerializeResult<()> {
        match v {
            Value::Null => write_tag(out, Tag::Null),
            Value::Bool(true) => write_tag(out, Tag::True),
            Value::Bool(false) => write_tag(out, Tag::False),
            Value::Int(i) => {
                write_tag(out, Tag::Int)?;
                write_i64(out, i)
            }
            Value::Float(f) => {
                write_tag(out, Tag::Float)?;
                write_f64(out, f)
            }
            Value::Char(c) => {
                write_tag(out, Tag::Char)?;
                write_u32(out, c as u32)
            }
            Value::Ref(r) => self.write_ref(out, r),
        }
    }

    fn write_ref(&mut self, out: &mut dyn Output, r: GcRef) -> SerializeResult<()> {
        if let Some(token) = self.transients.token_for(r) {
            write_tag(out, Tag::Transient)?;
            return write_str(out, token);
        }
        if let Some(&id) = self.seen.get(&r) {
            write_tag(out, Tag::Backref)?;
            return write_varint(out, id as u64);
        }

        let kind = Gc::header(r).kind();
        let id = self.next_id;
        self.next_id += 1;
        self.seen.insert(r, id);

        match kind {
            ValueKind::String => {
                write_tag(out, Tag::Str)?;
                write_varint(out, id as u64)?;
                write_str(out, unsafe { Gc::payload::<StringObj>(r) }.as_str())
            }
            ValueKind::Table => self.write_table(out, id, r),
            ValueKind::Array => self.write_array(out, id, r),
            ValueKind::Memblock => self.write_memblock(out, id, r),
            ValueKind::Namespace => self.write_namespace(out, id, r),
            ValueKind::Class => self.write_class(out, id, r),
            ValueKind::Instance => self.write_instance(out, id, r),
            ValueKind::Function => self.write_function(out, id, r),
            ValueKind::FuncDef => self.write_funcdef(out, id, r),
            ValueKind::WeakRef => self.write_weak_ref(out, id, r),
            ValueKind::Upvalue => self.write_upvalue(out, id, r),
            ValueKind::NativeObj | ValueKind::Thread => {
                Err(SerializeError::NotSerializable { kind: kind.name() })
            }
            ValueKind::Null | ValueKind::Bool | ValueKind::Int | ValueKind::Float | ValueKind::Char => {
                unreachable!("value kinds are never behind a GcRef")
            }
        }
    }

    fn write_table(&mut self, out: &mut dyn Output, id: u32, r: GcRef) -> SerializeResult<()> {
        write_tag(out, Tag::Table)?;
        write_varint(out, id as u64)?;
        let entries: Vec<(Value, Value)> =
            unsafe { Gc::payload::<TableObj>(r) }.iter().map(|(k, v)| (*k, *v)).collect();
        write_varint(out, entries.len() as u64)?;
        for (k, v) in entries {
            self.write_value(out, k)?;
            self.write_value(out, v)?;
        }
        Ok(())
    }

    fn write_array(&mut self, out: &mut dyn Output, id: u32, r: GcRef) -> SerializeResult<()> {
        write_tag(out, Tag::Array)?;
        write_varint(out, id as u64)?;
        let items: Vec<Value> = unsafe { Gc::payload::<ArrayObj>(r) }.iter().copied().collect();
        write_varint(out, items.len() as u64)?;
        for v in items {
            self.write_value(out, v)?;
        }
        Ok(())
    }

    fn write_memblock(&mut self, out: &mut dyn Output, id: u32, r: GcRef) -> SerializeResult<()> {
        write_tag(out, Tag::Memblock)?;
        write_varint(out, id as u64)?;
        let m = unsafe { Gc::payload::<MemblockObj>(r) };
        out.write_bytes(&[mem_type_to_u8(m.elem_type())])?;
        write_varint(out, m.elem_count() as u64)?;
        out.write_bytes(m.raw_bytes())
    }

    fn write_namespace(&mut self, out: &mut dyn Output, id: u32, r: GcRef) -> SerializeResult<()> {
        write_tag(out, Tag::Namespace)?;
        write_varint(out, id as u64)?;
        let ns = unsafe { Gc::payload::<NamespaceObj>(r) };
        write_str(out, ns.name())?;
        let parent = ns.parent();
        write_bool(out, parent.is_some())?;
        let entries: Vec<(Value, Value)> = ns.iter_local().map(|(k, v)| (*k, *v)).collect();
        if let Some(p) = parent {
            self.write_ref(out, p)?;
        }
        write_varint(out, entries.len() as u64)?;
        for (k, v) in entries {
            self.write_value(out, k)?;
            self.write_value(out, v)?;
        }
        Ok(())
    }

    fn write_class(&mut self, out: &mut dyn Output, id: u32, r: GcRef) -> SerializeResult<()> {
        write_tag(out, Tag::Class)?;
        write_varint(out, id as u64)?;
        let c = unsafe { Gc::payload::<ClassObj>(r) };
        write_str(out, c.name())?;
        let base = c.base();
        let fields = c.fields();
        let allocator = c.allocator();
        let finalizer = c.finalizer();
        write_bool(out, base.is_some())?;
        if let Some(b) = base {
            self.write_ref(out, b)?;
        }
        self.write_ref(out, fields)?;
        write_bool(out, allocator.is_some())?;
        if let Some(v) = allocator {
            self.write_value(out, v)?;
        }
        write_bool(out, finalizer.is_some())?;
        if let Some(v) = finalizer {
            self.write_value(out, v)?;
        }
        Ok(())
    }

    fn write_instance(&mut self, out: &mut dyn Output, id: u32, r: GcRef) -> SerializeResult<()> {
        write_tag(out, Tag::Instance)?;
        write_varint(out, id as u64)?;
        let inst = unsafe { Gc::payload::<InstanceObj>(r) };
        let class = inst.class();
        let fields = inst.fields();
        let extra: Vec<Value> = inst.extra().to_vec();
        let raw = inst.raw_bytes().to_vec();
        self.write_ref(out, class)?;
        self.write_ref(out, fields)?;
        write_varint(out, extra.len() as u64)?;
        for v in extra {
            self.write_value(out, v)?;
        }
        write_bytes_with_len(out, &raw)
    }

    fn write_function(&mut self, out: &mut dyn Output, id: u32, r: GcRef) -> SerializeResult<()> {
        let f = unsafe { Gc::payload::<FunctionObj>(r) };
        match &f.body {
            FunctionBody::Script { funcdef, upvalues } => {
                write_tag(out, Tag::FunctionScript)?;
                write_varint(out, id as u64)?;
                let env = f.env;
                let funcdef = *funcdef;
                let upvalues = upvalues.clone();
                self.write_ref(out, env)?;
                self.write_ref(out, funcdef)?;
                write_varint(out, upvalues.len() as u64)?;
                for u in upvalues {
                    self.write_ref(out, u)?;
                }
                Ok(())
            }
            FunctionBody::Native { .. } => Err(SerializeError::NotSerializable { kind: "Function(native)" }),
        }
    }

    fn write_funcdef(&mut self, out: &mut dyn Output, id: u32, r: GcRef) -> SerializeResult<()> {
        write_tag(out, Tag::FuncDef)?;
        write_varint(out, id as u64)?;
        let fd = unsafe { Gc::payload::<FuncDefObj>(r) };
        let module = fd.module().clone();
        let index = fd.index();
        self.write_module_ref(out, &module)?;
        write_u32(out, index)
    }

    fn write_weak_ref(&mut self, out: &mut dyn Output, id: u32, r: GcRef) -> SerializeResult<()> {
        write_tag(out, Tag::WeakRef)?;
        write_varint(out, id as u64)?;
        let target = unsafe { Gc::payload::<WeakRefObj>(r) }.get();
        write_bool(out, !target.is_null())?;
        if !target.is_null() {
            self.write_ref(out, target)?;
        }
        Ok(())
    }

    fn write_upvalue(&mut self, out: &mut dyn Output, id: u32, r: GcRef) -> SerializeResult<()> {
        let closed = match unsafe { Gc::payload::<UpvalueObj>(r) }.state {
            UpvalueState::Closed(v) => v,
            UpvalueState::Open { .. } => {
                return Err(SerializeError::NotSerializable { kind: "Upvalue(open)" })
            }
        };
        write_tag(out, Tag::Upvalue)?;
        write_varint(out, id as u64)?;
        self.write_value(out, closed)
    }

    fn write_module_ref(&mut self, out: &mut dyn Output, module: &Rc<Module>) -> SerializeResult<()> {
        let key = Rc::as_ptr(module) as usize;
        if let Some(&mid) = self.modules_seen.get(&key) {
            write_bool(out, false)?;
            return write_varint(out, mid as u64);
        }
        let mid = self.next_module_id;
        self.next_module_id += 1;
        self.modules_seen.insert(key, mid);
        write_bool(out, true)?;
        write_varint(out, mid as u64)?;
        write_module_contents(out, module)
    }
}

fn write_module_contents(out: &mut dyn Output, module: &Module) -> SerializeResult<()> {
    write_str(out, &module.name)?;
    write_varint(out, module.constants.len() as u64)?;
    for c in &module.constants {
        write_constant(out, c)?;
    }
    write_varint(out, module.funcdefs.len() as u64)?;
    for fd in &module.funcdefs {
        write_funcdef_raw(out, fd)?;
    }
    write_u32(out, module.entry_func)
}

fn write_constant(out: &mut dyn Output, c: &Constant) -> SerializeResult<()> {
    match c {
        Constant::Null => out.write_bytes(&[0]),
        Constant::Bool(b) => {
            out.write_bytes(&[1])?;
            write_bool(out, *b)
        }
        Constant::Int(i) => {
            out.write_bytes(&[2])?;
            write_i64(out, *i)
        }
        Constant::Float(f) => {
            out.write_bytes(&[3])?;
            write_f64(out, *f)
        }
        Constant::Char(ch) => {
            out.write_bytes(&[4])?;
            write_u32(out, *ch as u32)
        }
        Constant::String(s) => {
            out.write_bytes(&[5])?;
            write_str(out, s)
        }
    }
}

fn write_funcdef_raw(out: &mut dyn Output, fd: &FuncDef) -> SerializeResult<()> {
    write_str(out, &fd.name)?;
    write_varint(out, fd.param_count as u64)?;
    write_varint(out, fd.local_slots as u64)?;
    write_bool(out, fd.is_vararg)?;
    write_varint(out, fd.code.len() as u64)?;
    for instr in &fd.code {
        write_instruction(out, instr)?;
    }
    write_varint(out, fd.upvals.len() as u64)?;
    for u in &fd.upvals {
        out.write_bytes(&[u.source as u8])?;
        write_varint(out, u.index as u64)?;
    }
    write_varint(out, fd.inner_funcs.len() as u64)?;
    for i in &fd.inner_funcs {
        write_u32(out, *i)?;
    }
    write_u32(out, fd.debug_func_id)
}

fn write_instruction(out: &mut dyn Output, instr: &Instruction) -> SerializeResult<()> {
    out.write_bytes(&[instr.op, instr.flags])?;
    out.write_bytes(&instr.a.to_le_bytes())?;
    out.write_bytes(&instr.b.to_le_bytes())?;
    out.write_bytes(&instr.c.to_le_bytes())
}

fn mem_type_to_u8(ty: MemType) -> u8 {
    match ty {
        MemType::I8 => 0,
        MemType::U8 => 1,
        MemType::I16 => 2,
        MemType::U16 => 3,
        MemType::I32 => 4,
        MemType::U32 => 5,
        MemType::I64 => 6,
        MemType::U64 => 7,
        MemType::F32 => 8,
        MemType::F64 => 9,
    }
}

pub(crate) fn mem_type_from_u8(v: u8) -> SerializeResult<MemType> {
    Ok(match v {
        0 => MemType::I8,
        1 => MemType::U8,
        2 => MemType::I16,
        3 => MemType::U16,
        4 => MemType::I32,
        5 => MemType::U32,
        6 => MemType::I64,
        7 => MemType::U64,
        8 => MemType::F32,
        9 => MemType::F64,
        other => return Err(SerializeError::Malformed(format!("unknown MemType byte {other}"))),
    })
}

#[cfg(not(feature = "std"))]
use alloc::format;
#[cfg(feature = "std")]
use std::format;
