//! Fixed-index metamethod name enumeration and per-type metatable slots
//! (spec.md §4.5, §9 — "implement the dispatch table once as a two-level
//! lookup: per-type metatable slot for primitive types; per-class
//! field-chain walk for user types ... store them on classes in a
//! fixed-index array for fast lookup where possible").
//!
//! The instance/class field-chain side of the lookup is plain
//! `ClassObj::lookup`/`InstanceObj::lookup` (ordinary name lookup — a class
//! method named `opAdd` *is* its `opAdd` metamethod). This module only
//! supplies the primitive-type half: a fixed-size metatable per
//! [`crate::value::ValueKind`], indexed by [`Metamethod`] for O(1) lookup
//! without a hash probe on the hot arithmetic/index path.

use crate::value::{Value, ValueKind};

/// The complete metamethod name surface of spec.md §4.5.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metamethod {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    AddR,
    SubR,
    MulR,
    DivR,
    ModR,
    AddEq,
    SubEq,
    MulEq,
    DivEq,
    ModEq,
    Neg,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
    BitAndR,
    BitOrR,
    BitXorR,
    ShlR,
    ShrR,
    UShrR,
    BitAndEq,
    BitOrEq,
    BitXorEq,
    ShlEq,
    ShrEq,
    UShrEq,
    Com,
    Equals,
    Cmp,
    Cat,
    CatEq,
    Length,
    LengthEq,
    Index,
    IndexEq,
    Slice,
    SliceEq,
    Field,
    FieldEq,
    Apply,
    Call,
    Method,
    ToString,
}

impl Metamethod {
    pub const COUNT: usize = Self::ToString as usize + 1;

    /// Every variant, in declaration order — the single source of truth a
    /// caller (e.g. `croc_vm::vm::Vm::collect`'s root scan) iterates
    /// instead of hand-duplicating the list.
    pub const ALL: [Metamethod; Self::COUNT] = [
        Metamethod::Add,
        Metamethod::Sub,
        Metamethod::Mul,
        Metamethod::Div,
        Metamethod::Mod,
        Metamethod::AddR,
        Metamethod::SubR,
        Metamethod::MulR,
        Metamethod::DivR,
        Metamethod::ModR,
        Metamethod::AddEq,
        Metamethod::SubEq,
        Metamethod::MulEq,
        Metamethod::DivEq,
        Metamethod::ModEq,
        Metamethod::Neg,
        Metamethod::BitAnd,
        Metamethod::BitOr,
        Metamethod::BitXor,
        Metamethod::Shl,
        Metamethod::Shr,
        Metamethod::UShr,
        Metamethod::BitAndR,
        Metamethod::BitOrR,
        Metamethod::BitXorR,
        Metamethod::ShlR,
        Metamethod::ShrR,
        Metamethod::UShrR,
        Metamethod::BitAndEq,
        Metamethod::BitOrEq,
        Metamethod::BitXorEq,
        Metamethod::ShlEq,
        Metamethod::ShrEq,
        Metamethod::UShrEq,
        Metamethod::Com,
        Metamethod::Equals,
        Metamethod::Cmp,
        Metamethod::Cat,
        Metamethod::CatEq,
        Metamethod::Length,
        Metamethod::LengthEq,
        Metamethod::Index,
        Metamethod::IndexEq,
        Metamethod::Slice,
        Metamethod::SliceEq,
        Metamethod::Field,
        Metamethod::FieldEq,
        Metamethod::Apply,
        Metamethod::Call,
        Metamethod::Method,
        Metamethod::ToString,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metamethod::Add => "opAdd",
            Metamethod::Sub => "opSub",
            Metamethod::Mul => "opMul",
            Metamethod::Div => "opDiv",
            Metamethod::Mod => "opMod",
            Metamethod::AddR => "opAdd_r",
            Metamethod::SubR => "opSub_r",
            Metamethod::MulR => "opMul_r",
            Metamethod::DivR => "opDiv_r",
            Metamethod::ModR => "opMod_r",
            Metamethod::AddEq => "opAddEq",
            Metamethod::SubEq => "opSubEq",
            Metamethod::MulEq => "opMulEq",
            Metamethod::DivEq => "opDivEq",
            Metamethod::ModEq => "opModEq",
            Metamethod::Neg => "opNeg",
            Metamethod::BitAnd => "opAnd",
            Metamethod::BitOr => "opOr",
            Metamethod::BitXor => "opXor",
            Metamethod::Shl => "opShl",
            Metamethod::Shr => "opShr",
            Metamethod::UShr => "opUShr",
            Metamethod::BitAndR => "opAnd_r",
            Metamethod::BitOrR => "opOr_r",
            Metamethod::BitXorR => "opXor_r",
            Metamethod::ShlR => "opShl_r",
            Metamethod::ShrR => "opShr_r",
            Metamethod::UShrR => "opUShr_r",
            Metamethod::BitAndEq => "opAndEq",
            Metamethod::BitOrEq => "opOrEq",
            Metamethod::BitXorEq => "opXorEq",
            Metamethod::ShlEq => "opShlEq",
            Metamethod::ShrEq => "opShrEq",
            Metamethod::UShrEq => "opUShrEq",
            Metamethod::Com => "opCom",
            Metamethod::Equals => "opEquals",
            Metamethod::Cmp => "opCmp",
            Metamethod::Cat => "opCat",
            Metamethod::CatEq => "opCatAssign",
            Metamethod::Length => "opLength",
            Metamethod::LengthEq => "opLengthAssign",
            Metamethod::Index => "opIndex",
            Metamethod::IndexEq => "opIndexAssign",
            Metamethod::Slice => "opSlice",
            Metamethod::SliceEq => "opSliceAssign",
            Metamethod::Field => "opField",
            Metamethod::FieldEq => "opFieldAssign",
            Metamethod::Apply => "opApply",
            Metamethod::Call => "opCall",
            Metamethod::Method => "opMethod",
            Metamethod::ToString => "toString",
        }
    }
}

/// One primitive type's metamethod slots. `Value::Null` in a slot means
/// "not defined".
#[derive(Clone, Copy)]
pub struct Metatable {
    slots: [Value; Metamethod::COUNT],
}

impl Metatable {
    pub fn new() -> Self {
        Self { slots: [Value::Null; Metamethod::COUNT] }
    }

    pub fn get(&self, m: Metamethod) -> Value {
        self.slots[m as usize]
    }

    pub fn set(&mut self, m: Metamethod, v: Value) {
        self.slots[m as usize] = v;
    }
}

impl Default for Metatable {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of [`ValueKind`] variants; a metatable is meaningful for every
/// kind (user types dispatch through `ClassObj`/`InstanceObj` field chains
/// instead, but indexing by kind is still harmless and avoids a second
/// lookup enum).
const VALUE_KIND_COUNT: usize = 18;

/// Per-VM set of primitive-type metatables, indexed by [`ValueKind`]
/// (spec.md §3's "the metatable-per-type table" GC root).
pub struct MetatableSet {
    tables: [Metatable; VALUE_KIND_COUNT],
}

impl MetatableSet {
    pub fn new() -> Self {
        Self { tables: [Metatable::new(); VALUE_KIND_COUNT] }
    }

    pub fn get(&self, kind: ValueKind) -> &Metatable {
        &self.tables[kind as usize]
    }

    pub fn get_mut(&mut self, kind: ValueKind) -> &mut Metatable {
        &mut self.tables[kind as usize]
    }
}

impl Default for MetatableSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metatable_slot_roundtrip() {
        let mut mt = Metatable::new();
        assert!(mt.get(Metamethod::Add).is_null());
        mt.set(Metamethod::Add, Value::Int(1));
        assert_eq!(mt.get(Metamethod::Add), Value::Int(1));
    }

    #[test]
    fn metamethod_names_match_spec() {
        assert_eq!(Metamethod::Add.name(), "opAdd");
        assert_eq!(Metamethod::AddR.name(), "opAdd_r");
        assert_eq!(Metamethod::Apply.name(), "opApply");
        assert_eq!(Metamethod::ToString.name(), "toString");
    }
}
