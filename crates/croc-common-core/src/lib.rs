//! # croc-common-core
//!
//! Core, `no_std`-compatible types shared by the Croc runtime (`croc-runtime`)
//! and virtual machine (`croc-vm`):
//!
//! - `instruction` — fixed-width register bytecode instruction format and opcodes
//! - `bytecode` — compiled module format: `Module`, `FuncDef`, constants, upvalue descriptors
//! - `debug_info` — PC-to-source-location tables for tracebacks and line hooks
//! - `source_provider` — on-demand source text access for diagnostic rendering

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod bytecode;
#[cfg(feature = "std")]
pub mod debug_info;
pub mod instruction;
pub mod source_provider;

pub use bytecode::{Constant, FuncDef, Module, UpvalDesc, UpvalSource};
#[cfg(feature = "std")]
pub use debug_info::{DebugInfo, DebugLoc, FuncDebugInfo, SourceLoc};
pub use instruction::{Instruction, Opcode};
pub use source_provider::{NoSource, SourceProvider};
