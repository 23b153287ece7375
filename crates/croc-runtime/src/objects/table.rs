//! Hash map Table object (spec.md §4.2).

use hashbrown::HashMap;

use crate::gc::{GcRef, Trace};
use crate::value::{Value, ValueKind};

pub struct TableObj {
    entries: HashMap<Value, Value>,
}

impl TableObj {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { entries: HashMap::with_capacity(cap) }
    }

    pub fn get(&self, key: &Value) -> Value {
        self.entries.get(key).copied().unwrap_or(Value::Null)
    }

    /// Set `key` to `value`. Setting to `Null` removes the key (spec.md
    /// §3's invariant 3 and §4.2's "removing a key by setting its value to
    /// Null is the defined API"). `key` must not be `Null`; callers enforce
    /// this at the interpreter/API boundary and raise a typed error
    /// otherwise (spec.md §7).
    pub fn set(&mut self, key: Value, value: Value) {
        debug_assert!(!key.is_null(), "Table keys may not be Null");
        if value.is_null() {
            self.entries.remove(&key);
        } else {
            self.entries.insert(key, value);
        }
    }

    /// `Table.remove` of an absent key is a no-op (spec.md §8).
    pub fn remove(&mut self, key: &Value) {
        self.entries.remove(key);
    }

    pub fn length(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.entries.contains_key(key)
    }

    /// Iteration order is implementation-defined but stable between
    /// mutations (spec.md §4.2), which `hashbrown`'s insertion-order-free
    /// but mutation-stable iteration satisfies.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter()
    }
}

impl Default for TableObj {
    fn default() -> Self {
        Self::new()
    }
}

impl Trace for TableObj {
    const KIND: ValueKind = ValueKind::Table;

    fn trace(&self, mark: &mut dyn FnMut(GcRef)) {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_null_removes_key() {
        let mut t = TableObj::new();
        t.set(Value::Int(1), Value::Bool(true));
        assert_eq!(t.length(), 1);
        t.set(Value::Int(1), Value::Null);
        assert_eq!(t.length(), 0);
    }

    #[test]
    fn remove_absent_key_is_noop() {
        let mut t = TableObj::new();
        t.remove(&Value::Int(1));
        assert_eq!(t.length(), 0);
    }
}
