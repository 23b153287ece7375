//! Class instance: private fields namespace, optional extra `Value` slots,
//! and an optional raw byte buffer (spec.md §4.2).

use crate::gc::{Gc, GcRef, Trace};
use crate::objects::class::ClassObj;
use crate::objects::namespace::NamespaceObj;
use crate::value::{Value, ValueKind};

pub struct InstanceObj {
    class: GcRef,
    fields: GcRef,
    /// Extra `Value` slots a native allocator hook may reserve for a class
    /// with compiled-in state (spec.md §4.2's "optional extra Value slots").
    extra: Vec<Value>,
    /// Raw byte buffer a native allocator hook may reserve (spec.md §4.2's
    /// "raw byte buffer").
    raw_bytes: Vec<u8>,
}

impl InstanceObj {
    pub fn new(class: GcRef, fields: GcRef) -> Self {
        Self { class, fields, extra: Vec::new(), raw_bytes: Vec::new() }
    }

    pub fn class(&self) -> GcRef {
        self.class
    }

    pub fn fields(&self) -> GcRef {
        self.fields
    }

    /// Patch the class/fields links after construction (`croc-serialize`'s
    /// reader forward-declares an instance's `GcRef` before its class and
    /// fields namespace are necessarily resolved).
    pub fn set_class(&mut self, class: GcRef) {
        self.class = class;
    }

    pub fn set_fields(&mut self, fields: GcRef) {
        self.fields = fields;
    }

    pub fn extra(&self) -> &[Value] {
        &self.extra
    }

    pub fn set_extra_slots(&mut self, count: usize) {
        self.extra.resize(count, Value::Null);
    }

    pub fn extra_get(&self, index: usize) -> Option<Value> {
        self.extra.get(index).copied()
    }

    pub fn extra_set(&mut self, index: usize, value: Value) -> bool {
        match self.extra.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw_bytes
    }

    pub fn raw_bytes_mut(&mut self) -> &mut Vec<u8> {
        &mut self.raw_bytes
    }

    /// Full lookup order: instance-fields -> class-fields -> base-class
    /// chain (spec.md §4.2).
    pub fn lookup(&self, key: Value) -> Value {
        let v = unsafe { Gc::payload::<NamespaceObj>(self.fields) }.get(key);
        if !v.is_null() {
            return v;
        }
        unsafe { Gc::payload::<ClassObj>(self.class) }.lookup(key)
    }

    pub fn set_field(&mut self, key: Value, value: Value) {
        unsafe { Gc::payload_mut::<NamespaceObj>(self.fields) }.set_local(key, value);
    }

    pub(crate) fn has_finalizer(this: &InstanceObj) -> bool {
        unsafe { Gc::payload::<ClassObj>(this.class) }.finalizer().is_some()
    }

    pub fn finalizer(&self) -> Option<Value> {
        unsafe { Gc::payload::<ClassObj>(self.class) }.finalizer()
    }
}

impl Trace for InstanceObj {
    const KIND: ValueKind = ValueKind::Instance;

    fn trace(&self, mark: &mut dyn FnMut(GcRef)) {
        mark(self.class);
        mark(self.fields);
        for v in &self.extra {
            if let Some(r) = v.as_ref() {
                mark(r);
            }
        }
    }
}
