//! Exception throw/unwind and traceback formatting (spec.md §4.5 "Exception
//! unwinding", §7).
//!
//! Grounded on the teacher's `panic_value`/`panic_msg` fields on `Fiber`
//! (`vo-vm/src/fiber.rs`) generalized from a single Go-style panic payload
//! to the full `try`/`catch`/`finally` region-table search spec.md §4.5
//! describes, plus the `<N tailcalls>` traceback collapsing named in §4.5
//! and §7.

use croc_common_core::DebugInfo;
use croc_runtime::objects::function::FunctionObj;
use croc_runtime::objects::funcdef::FuncDefObj;
use croc_runtime::{Gc, Value};

use crate::error::{VmError, VmResult};
use crate::thread::{Thread, TraceEntry};

/// A `try` region: the PC range it covers and the PC of its handler.
#[derive(Debug, Clone, Copy)]
pub struct TryRegion {
    pub start_pc: usize,
    pub end_pc: usize,
    pub handler_pc: usize,
    pub frame_depth: usize,
    pub is_finally: bool,
    /// Register (frame-relative) the caught exception value is written to
    /// when control transfers to `handler_pc` (spec.md §4.5's "the exception
    /// is accessible via `catchException`" — here, landing in the handler
    /// hands the value straight to a register rather than a side API call).
    pub handler_reg: u16,
}

/// Begin throwing `value`: sets the in-flight slot and records a traceback
/// snapshot of the current call chain (spec.md §4.5). Returns an error if
/// already throwing (spec.md §7's "cannot throw while throwing").
pub fn throw(thread: &mut Thread, value: Value, debug: Option<&DebugInfo>) -> VmResult<()> {
    if thread.pending_exception.is_some() {
        return Err(VmError::ThrowWhileThrowing);
    }
    thread.pending_exception = Some(value);
    record_traceback(thread, debug);
    Ok(())
}

/// Snapshot the current frame stack into `thread.traceback`, collapsing
/// consecutive tail calls through the same frame slot into one
/// `<N tailcalls>` entry (spec.md §4.5, §7, §8 scenario 5).
fn record_traceback(thread: &mut Thread, debug: Option<&DebugInfo>) {
    thread.traceback.clear();
    for frame in thread.frames.iter().rev() {
        let (name, func_id) = match unsafe { Gc::payload::<FunctionObj>(frame.function) }.funcdef() {
            Some(fd) => {
                let fd = unsafe { Gc::payload::<FuncDefObj>(fd) };
                (fd.def().name.clone(), fd.def().debug_func_id)
            }
            None => (String::from("<native>"), 0),
        };
        let line = debug.and_then(|d| d.lookup(func_id, frame.pc as u32)).map(|l| l.line);
        thread.traceback.push(TraceEntry::Script { name, line });
        if frame.tailcall_count > 0 {
            thread.traceback.push(TraceEntry::TailCalls { count: frame.tailcall_count });
        }
    }
    for name in thread.native_stack.iter().rev() {
        thread.traceback.push(TraceEntry::Native { name: name.to_string() });
    }
}

/// Find the innermost active `try` region covering `pc` at `frame_depth`,
/// searching from the most recently pushed region (innermost first, per
/// spec.md §4.5's "unwinding pops AR records until one with an active
/// `try`-region covering the current PC is found").
pub fn find_handler(regions: &[TryRegion], frame_depth: usize, pc: usize) -> Option<usize> {
    regions
        .iter()
        .rposition(|r| r.frame_depth == frame_depth && r.start_pc <= pc && pc < r.end_pc)
}

/// Render the recorded traceback as a multi-line string (spec.md §7's
/// `getTraceback`: "one line per AR ... or native ... or `<N tailcalls>`").
/// Per spec.md §7, the traceback is erased by the caller after one read —
/// callers invoke `Thread::traceback.clear()` themselves (or call
/// `take_traceback` below) once they've formatted it.
pub fn format_traceback(thread: &Thread) -> String {
    let mut out = String::new();
    for entry in &thread.traceback {
        match entry {
            TraceEntry::Script { name, line } => {
                if name.is_empty() {
                    match line {
                        Some(l) => out.push_str(&format!("at line {l}\n")),
                        None => out.push_str("<script>\n"),
                    }
                } else {
                    match line {
                        Some(l) => out.push_str(&format!("{name}:{l}\n")),
                        None => out.push_str(&format!("{name}\n")),
                    }
                }
            }
            TraceEntry::Native { name } => out.push_str(&format!("{name} (native)\n")),
            TraceEntry::TailCalls { count } => out.push_str(&format!("<{count} tailcalls>\n")),
        }
    }
    out
}

/// Pop and format the traceback, leaving it empty for the next throw
/// (spec.md §7: "The traceback is erased after `getTraceback` is called
/// once").
pub fn take_traceback(thread: &mut Thread) -> String {
    let s = format_traceback(thread);
    thread.traceback.clear();
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_throw_is_rejected() {
        let mut t = Thread::new(None);
        throw(&mut t, Value::Int(1), None).unwrap();
        assert_eq!(throw(&mut t, Value::Int(2), None), Err(VmError::ThrowWhileThrowing));
    }

    #[test]
    fn handler_search_prefers_innermost() {
        let regions = vec![
            TryRegion { start_pc: 0, end_pc: 100, handler_pc: 50, frame_depth: 0, is_finally: false, handler_reg: 0 },
            TryRegion { start_pc: 10, end_pc: 20, handler_pc: 15, frame_depth: 0, is_finally: false, handler_reg: 0 },
        ];
        assert_eq!(find_handler(&regions, 0, 12), Some(1));
        assert_eq!(find_handler(&regions, 0, 50), Some(0));
        assert_eq!(find_handler(&regions, 0, 200), None);
    }
}
