//! # croc-api
//!
//! The host embedding surface (spec.md §4.7, §6): a stack-relative,
//! index-based view onto one `Thread` of a `croc_vm::Vm`, plus the error
//! taxonomy a host sees when it misuses that surface.
//!
//! - `stack` — the `Stack` type: manipulation, pushers, queries, getters,
//!   arithmetic/logic, indexing, calls, error handling, globals/upvalues,
//!   refs, GC control, and coroutine resume/yield
//! - `error` — `ApiError`, thrown back at the host on misuse
//!
//! `croc-vm` has no notion of stack-relative indices or host-facing error
//! messages; this crate is the layer that adds them, mirroring the
//! teacher's own `RuntimeApi` (`gox-runtime-core/src/api.rs`): a thin,
//! index/handle-based wrapper one layer above the raw engine.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod error;
pub mod stack;

pub use error::{ApiError, ApiResult};
pub use stack::Stack;
