//! Name→Value mapping with a parent pointer (spec.md §4.2). Backs modules,
//! globals, and class/instance field storage.

use hashbrown::HashMap;

use crate::gc::{Gc, GcRef, Trace};
use crate::value::{Value, ValueKind};

pub struct NamespaceObj {
    name: Box<str>,
    parent: Option<GcRef>,
    /// Keys are interned `String` objects: this is one of the collection
    /// kinds whose `Hash`/`Eq` strategy relies on `Value`'s string-content
    /// hashing (`crate::value::Value`'s `Hash` impl).
    entries: HashMap<Value, Value>,
}

impl NamespaceObj {
    pub fn new(name: impl Into<Box<str>>, parent: Option<GcRef>) -> Self {
        Self { name: name.into(), parent, entries: HashMap::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<GcRef> {
        self.parent
    }

    /// Patch the parent link after construction. Used by `croc-serialize`'s
    /// reader, which must forward-declare a namespace's `GcRef` (so a
    /// cyclic entry can back-reference it) before the parent it read from
    /// the stream is necessarily resolved.
    pub fn set_parent(&mut self, parent: Option<GcRef>) {
        self.parent = parent;
    }

    /// Reads walk the parent chain (spec.md §4.2); writes act on the leaf
    /// only, via `set_local`.
    pub fn get(&self, key: Value) -> Value {
        if let Some(v) = self.entries.get(&key) {
            return *v;
        }
        match self.parent {
            Some(p) => unsafe { Gc::payload::<NamespaceObj>(p) }.get(key),
            None => Value::Null,
        }
    }

    pub fn set_local(&mut self, key: Value, value: Value) {
        self.entries.insert(key, value);
    }

    pub fn has_local(&self, key: &Value) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove_local(&mut self, key: &Value) {
        self.entries.remove(key);
    }

    pub fn iter_local(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter()
    }
}

impl Trace for NamespaceObj {
    const KIND: ValueKind = ValueKind::Namespace;

    fn trace(&self, mark: &mut dyn FnMut(GcRef)) {
        if let Some(p) = self.parent {
            mark(p);
        }
        for (k, v) in &self.entries {
            if let Some(r) = k.as_ref() {
                mark(r);
            }
            if let Some(r) = v.as_ref() {
                mark(r);
            }
        }
    }
}

pub fn lookup_by_str(ns: GcRef, gc: &mut Gc, key: &str) -> Value {
    let key = Value::Ref(gc.intern_string(key));
    unsafe { Gc::payload::<NamespaceObj>(ns) }.get(key)
}
