//! Object-graph serializer (spec.md §4.8).
//!
//! A depth-first, shared/cyclic-reference-preserving wire format for an
//! arbitrary reachable [`Value`] graph, plus a symmetric reader that
//! reconstructs it in a (possibly different) VM. Grounded on the
//! DFS-with-visited-set shape the teacher uses for GC root scanning
//! (`vo-vm/src/gc_roots.rs`'s `scan_fibers`/`scan_globals`) applied to
//! writing a byte stream instead of marking gray, plus the tagged-stream/
//! id-table shape common to this retrieval pack's other binary serializers
//! (e.g. `r3e-network-neo-rs`'s `BinarySerializer`, which also walks a
//! container graph with an identity set to detect cycles before recursing).
//!
//! This crate does not prescribe a transport: [`Output`]/[`Input`] are the
//! abstract byte-stream interface spec.md §4.8 calls for, and `std`'s
//! `Write`/`Read` get a blanket impl under the `std` feature.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

mod read;
mod tag;
mod write;

pub use read::GraphReader;
pub use write::GraphWriter;

#[cfg(not(feature = "std"))]
use alloc::string::String;

use thiserror::Error;

use croc_runtime::{GcRef, Value};

/// Where serialized bytes go. Mirrors `std::io::Write` minus the parts that
/// need an allocator-backed error type, so it stays usable under `no_std`.
pub trait Output {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), SerializeError>;
}

/// Where serialized bytes come from.
pub trait Input {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), SerializeError>;
}

#[cfg(feature = "std")]
impl<W: std::io::Write> Output for W {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), SerializeError> {
        self.write_all(bytes).map_err(|e| SerializeError::Io(e.to_string()))
    }
}

#[cfg(feature = "std")]
impl<R: std::io::Read> Input for R {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), SerializeError> {
        self.read_exact(buf).map_err(|e| SerializeError::Io(e.to_string()))
    }
}

/// Caller-supplied mapping between distinguished host objects and stable
/// tokens (spec.md §4.8 point 3: "A caller-supplied transient table maps
/// distinguished host objects ... to stable tokens so that on
/// deserialization they can be re-bound in the destination VM").
///
/// The same implementation is used for both directions: `token_for` is
/// consulted while writing (by the source object's identity), `resolve` is
/// consulted while reading (by the token string) to look up the
/// corresponding value already present in the destination VM.
pub trait Transients {
    fn token_for(&self, obj: GcRef) -> Option<&str>;
    fn resolve(&self, token: &str) -> Option<Value>;
}

/// A `Transients` that maps nothing; every would-be-transient reference
/// (native objects, live open upvalues, native functions, threads) becomes
/// a [`SerializeError::NotSerializable`].
pub struct NoTransients;

impl Transients for NoTransients {
    fn token_for(&self, _obj: GcRef) -> Option<&str> {
        None
    }

    fn resolve(&self, _token: &str) -> Option<Value> {
        None
    }
}

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("i/o error: {0}")]
    Io(String),

    #[error("malformed stream: {0}")]
    Malformed(String),

    #[error("value of kind {kind} is not serializable and has no transient-table entry")]
    NotSerializable { kind: &'static str },

    #[error("transient token '{0}' has no binding in the destination VM")]
    UnknownTransient(String),

    #[error("backreference id {0} was never written")]
    UnknownBackref(u32),
}

pub type SerializeResult<T> = Result<T, SerializeError>;
