//! Named, single-inheritance prototype bag (spec.md §4.2).
//!
//! A class owns a fields namespace (methods and class-level values), an
//! optional base class for single inheritance, and optional allocator/
//! finalizer hook functions (spec.md §4.2, §4.5 "class.allocator").

use crate::gc::{Gc, GcRef, Trace};
use crate::objects::namespace::NamespaceObj;
use crate::value::{Value, ValueKind};

pub struct ClassObj {
    name: Box<str>,
    base: Option<GcRef>,
    fields: GcRef,
    /// Controls instance creation (spec.md §4.2, §4.5 "allocator function").
    allocator: Option<Value>,
    finalizer: Option<Value>,
}

impl ClassObj {
    pub fn new(name: impl Into<Box<str>>, base: Option<GcRef>, fields: GcRef) -> Self {
        Self { name: name.into(), base, fields, allocator: None, finalizer: None }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> Option<GcRef> {
        self.base
    }

    pub fn fields(&self) -> GcRef {
        self.fields
    }

    /// Patch the base/fields links after construction (`croc-serialize`'s
    /// reader forward-declares a class's `GcRef` before its base class and
    /// fields namespace are necessarily resolved, the same need
    /// `NamespaceObj::set_parent` serves).
    pub fn set_base(&mut self, base: Option<GcRef>) {
        self.base = base;
    }

    pub fn set_fields(&mut self, fields: GcRef) {
        self.fields = fields;
    }

    pub fn allocator(&self) -> Option<Value> {
        self.allocator
    }

    pub fn set_allocator(&mut self, f: Value) {
        self.allocator = Some(f);
    }

    pub fn finalizer(&self) -> Option<Value> {
        self.finalizer
    }

    pub fn set_finalizer(&mut self, f: Value) {
        self.finalizer = Some(f);
    }

    /// Walk this class's fields, then its base-class chain (spec.md §4.2's
    /// "class-fields -> base-class-fields chain", the class-and-up tail of
    /// the full instance lookup order implemented by `InstanceObj::lookup`).
    pub fn lookup(&self, key: Value) -> Value {
        let v = unsafe { Gc::payload::<NamespaceObj>(self.fields) }.get(key);
        if !v.is_null() {
            return v;
        }
        match self.base {
            Some(b) => unsafe { Gc::payload::<ClassObj>(b) }.lookup(key),
            None => Value::Null,
        }
    }

    /// Whether `self` is `other` or inherits (transitively) from it.
    pub fn derives_from(&self, other: GcRef, self_ref: GcRef) -> bool {
        if self_ref == other {
            return true;
        }
        match self.base {
            Some(b) => unsafe { Gc::payload::<ClassObj>(b) }.derives_from(other, b),
            None => false,
        }
    }
}

impl Trace for ClassObj {
    const KIND: ValueKind = ValueKind::Class;

    fn trace(&self, mark: &mut dyn FnMut(GcRef)) {
        if let Some(b) = self.base {
            mark(b);
        }
        mark(self.fields);
        if let Some(v) = self.allocator {
            if let Some(r) = v.as_ref() {
                mark(r);
            }
        }
        if let Some(v) = self.finalizer {
            if let Some(r) = v.as_ref() {
                mark(r);
            }
        }
    }
}
