//! # croc-vm
//!
//! The call stack, register-based interpreter, coroutine scheduler, and
//! debug-hook dispatch of the Croc virtual machine (spec.md §2, §4.4–§4.6).
//! Built on top of `croc-runtime`'s allocator/GC/object model; has no
//! notion of stack-relative indices or host error taxonomies — those live
//! one layer up, in `croc-api`.
//!
//! - `frame` — activation records (the call-stack unit)
//! - `thread` — per-thread register stack, AR stack, open upvalues, hooks
//! - `hooks` — debug-hook bitmask and event dispatch
//! - `unwind` — exception throw/catch/traceback bookkeeping
//! - `interp` — opcode dispatch loop, call convention, metamethod fallback
//! - `vm` — the `Vm`: GC, metatables, registry, ref table, live threads
//! - `error` — internal `VmError` taxonomy

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod error;
pub mod frame;
pub mod hooks;
pub mod interp;
pub mod thread;
pub mod unwind;
pub mod vm;

pub use error::{VmError, VmResult};
pub use frame::ActivationRecord;
pub use interp::ExecOutcome;
pub use thread::{Thread, ThreadStatus};
pub use vm::Vm;
