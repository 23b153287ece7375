//! # croc-runtime
//!
//! The allocator, garbage collector, and heap object model of the Croc
//! runtime (spec.md §3, §4.1–§4.3): a register-free-standing layer with no
//! notion of a call stack, interpreter, or thread scheduling — those live
//! in `croc-vm`, which depends on this crate.
//!
//! - `alloc` — byte-accounting allocator facade and GC growth heuristic
//! - `gc` — tri-color mark/sweep collector, `GcRef`/`GcHeader`, the `Trace` trait
//! - `intern` — content-hashed string intern table
//! - `value` — the tagged-union `Value` representation
//! - `metamethod` — fixed-index metamethod enumeration and per-type metatables
//! - `objects` — one module per heap object kind (spec.md §3's Value variants)

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod alloc;
pub mod gc;
pub mod intern;
pub mod metamethod;
pub mod objects;
pub mod value;

pub use gc::{Gc, GcColor, GcHeader, GcRef, GcStats, Trace};
pub use metamethod::{Metamethod, Metatable, MetatableSet};
pub use value::{Value, ValueKind};
