//! `Thread`: one execution context — register stack, activation-record
//! stack, open-upvalue list, hook state, and coroutine status (spec.md
//! §4.4, §4.6, GLOSSARY).
//!
//! Grounded on the teacher's `Fiber`/`FiberStatus` (`vo-vm/src/fiber.rs`):
//! the state machine and per-thread stack ownership carry over almost
//! one-to-one. The teacher's `DeferEntry`/`DeferExecution` (Go `defer`
//! bookkeeping) has no Croc equivalent; `pending_exception` plus
//! `unwind::unwind_to_handler` in `unwind.rs` play the corresponding role
//! for Croc's `try`/`catch`/`finally`.

use croc_runtime::objects::function::FunctionObj;
use croc_runtime::objects::funcdef::FuncDefObj;
use croc_runtime::objects::thread::ThreadTrace;
use croc_runtime::objects::upvalue::UpvalueObj;
use croc_runtime::{Gc, GcRef, Value};

use crate::frame::ActivationRecord;
use crate::hooks::HookState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Initial,
    Running,
    Waiting,
    Suspended,
    Dead,
}

/// One entry of a recorded traceback (spec.md §7): either a normal script
/// frame, a native frame, or a collapsed run of tail calls.
#[derive(Debug, Clone)]
pub enum TraceEntry {
    Script { name: String, line: Option<u32> },
    Native { name: String },
    TailCalls { count: u32 },
}

pub struct Thread {
    pub status: ThreadStatus,
    pub regs: Vec<Value>,
    pub frames: Vec<ActivationRecord>,
    /// Open upvalues, kept sorted ascending by the stack slot they point
    /// at (spec.md §9: "maintain a per-thread sorted linked list (by the
    /// register slot they point to)"). A `Vec` kept sorted by insertion
    /// plays the same role as the teacher's intrusive list without unsafe
    /// linked-list plumbing.
    pub open_upvalues: Vec<GcRef>,
    pub hooks: HookState,
    /// The function this thread will run when resumed from `Initial`, and
    /// what `reset()` restores it to (spec.md §4.6's "Reset").
    pub body: Option<Value>,
    /// Native functions on the Rust call stack above this thread's resume
    /// point; `yield` refuses while nonzero (stackless restriction, spec.md
    /// §4.6/§9, SPEC_FULL.md §4.6 expansion).
    pub native_call_depth: u32,
    pub pending_exception: Option<Value>,
    pub pending_halt: bool,
    pub traceback: Vec<TraceEntry>,
    /// Maximum register-stack size before `VmError::StackOverflow` (spec.md
    /// §7's "stack-overflow on the register stack beyond a large limit").
    pub stack_limit: usize,
    /// Active `try` regions, pushed by `TryPush` and popped by `TryPop` in
    /// strict stack discipline (spec.md §4.5's "unwinding pops AR records
    /// until one with an active `try`-region ... is found").
    pub try_regions: Vec<crate::unwind::TryRegion>,
    /// Names of native functions currently on the Rust call stack above
    /// this thread, innermost last, for traceback interleaving (spec.md §7).
    pub native_stack: Vec<Box<str>>,
    /// Register-stack base of each native call currently running on this
    /// thread, innermost last. `croc-api`'s stack-relative index 0 resolves
    /// against `native_bases.last()` while a native function is on top
    /// (spec.md §4.7's "stack indices are relative to the current native
    /// call's base").
    pub native_bases: Vec<usize>,
    /// Where to write the resumer's values and how many are expected, set
    /// by the `Yield` opcode just before suspending and consumed by
    /// [`crate::interp::continue_after_yield`] (spec.md §4.6's "when
    /// resumed next will return M values").
    pub yield_resume: Option<(usize, u32)>,
}

const DEFAULT_STACK_LIMIT: usize = 1 << 20;

impl Thread {
    pub fn new(body: Option<Value>) -> Self {
        Self {
            status: ThreadStatus::Initial,
            regs: Vec::new(),
            frames: Vec::new(),
            open_upvalues: Vec::new(),
            hooks: HookState::default(),
            body,
            native_call_depth: 0,
            pending_exception: None,
            pending_halt: false,
            traceback: Vec::new(),
            stack_limit: DEFAULT_STACK_LIMIT,
            try_regions: Vec::new(),
            native_stack: Vec::new(),
            native_bases: Vec::new(),
            yield_resume: None,
        }
    }

    pub fn is_main(&self) -> bool {
        self.body.is_none() && self.frames.is_empty() && self.status == ThreadStatus::Running
    }

    /// Reset a `Dead` thread back to `Initial`, optionally replacing its
    /// body function (spec.md §4.6's "Reset").
    pub fn reset(&mut self, new_body: Option<Value>) -> Result<(), crate::error::VmError> {
        if self.status != ThreadStatus::Dead {
            return Err(crate::error::VmError::InvalidReset);
        }
        self.status = ThreadStatus::Initial;
        self.regs.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        self.native_call_depth = 0;
        self.pending_exception = None;
        self.pending_halt = false;
        self.traceback.clear();
        self.try_regions.clear();
        self.native_stack.clear();
        self.native_bases.clear();
        self.yield_resume = None;
        if let Some(b) = new_body {
            self.body = Some(b);
        }
        Ok(())
    }

    #[inline]
    pub fn current_frame(&self) -> Option<&ActivationRecord> {
        self.frames.last()
    }

    #[inline]
    pub fn current_frame_mut(&mut self) -> Option<&mut ActivationRecord> {
        self.frames.last_mut()
    }

    #[inline]
    pub fn reg(&self, index: usize) -> Value {
        self.regs.get(index).copied().unwrap_or(Value::Null)
    }

    #[inline]
    pub fn set_reg(&mut self, index: usize, value: Value) {
        if index >= self.regs.len() {
            self.regs.resize(index + 1, Value::Null);
        }
        self.regs[index] = value;
    }

    pub fn ensure_capacity(&mut self, len: usize) -> Result<(), crate::error::VmError> {
        if len > self.stack_limit {
            return Err(crate::error::VmError::StackOverflow { limit: self.stack_limit });
        }
        if self.regs.len() < len {
            self.regs.resize(len, Value::Null);
        }
        Ok(())
    }

    /// Find (or create) the open upvalue pointing at `stack_index`, keeping
    /// `open_upvalues` sorted ascending (spec.md §9).
    pub fn find_or_open_upvalue(
        &mut self,
        gc: &mut Gc,
        stack_index: usize,
    ) -> GcRef {
        let pos = self
            .open_upvalues
            .partition_point(|&u| upvalue_index(u) < stack_index);
        if let Some(&existing) = self.open_upvalues.get(pos) {
            if upvalue_index(existing) == stack_index {
                return existing;
            }
        }
        let obj = gc.alloc(UpvalueObj::open(stack_index));
        self.open_upvalues.insert(pos, obj);
        obj
    }

    /// Close every open upvalue at or above `from_index` (spec.md §4.4:
    /// "when that AR returns, the interpreter walks the open-upvalue list
    /// and closes each one whose target is at or above the returning
    /// base"). Open upvalues are kept sorted ascending, so these are always
    /// a contiguous tail of the list.
    pub fn close_upvalues_from(&mut self, from_index: usize) {
        let split = self.open_upvalues.partition_point(|&u| upvalue_index(u) < from_index);
        for &u in &self.open_upvalues[split..] {
            let idx = upvalue_index(u);
            let value = self.reg(idx);
            unsafe { Gc::payload_mut::<UpvalueObj>(u) }.close(value);
        }
        self.open_upvalues.truncate(split);
    }
}

fn upvalue_index(u: GcRef) -> usize {
    unsafe { Gc::payload::<UpvalueObj>(u) }
        .open_index()
        .expect("open_upvalues must only hold still-open upvalues")
}

impl ThreadTrace for Thread {
    fn trace_refs(&self, mark: &mut dyn FnMut(GcRef)) {
        // Only the live register window of each active frame is a root
        // (spec.md §4.3): a slot that went out of scope when its call
        // returned must stop pinning whatever it used to hold. Mirrors the
        // teacher's `scan_fibers`, which scans `&fiber.stack[frame.bp..]`
        // bounded by the callee's own declared slot count.
        for frame in &self.frames {
            mark(frame.function);
            if let Some(bc) = frame.base_class {
                mark(bc);
            }
            if let Some(funcdef_ref) = unsafe { Gc::payload::<FunctionObj>(frame.function) }.funcdef() {
                let def = unsafe { Gc::payload::<FuncDefObj>(funcdef_ref) }.def();
                let declared = def.param_count as usize;
                let window = (def.local_slots as usize).max(1 + declared);
                let top = (frame.base + window).min(self.regs.len());
                for v in &self.regs[frame.base.min(top)..top] {
                    if let Some(r) = v.as_ref() {
                        mark(r);
                    }
                }
            }
            if frame.vararg_count > 0 {
                let vtop = (frame.vararg_base + frame.vararg_count).min(self.regs.len());
                for v in &self.regs[frame.vararg_base.min(vtop)..vtop] {
                    if let Some(r) = v.as_ref() {
                        mark(r);
                    }
                }
            }
        }
        for &u in &self.open_upvalues {
            mark(u);
        }
        if let Some(v) = self.body {
            if let Some(r) = v.as_ref() {
                mark(r);
            }
        }
        if let Some(v) = self.pending_exception {
            if let Some(r) = v.as_ref() {
                mark(r);
            }
        }
        if let Some(v) = self.hooks.hook_fn {
            if let Some(r) = v.as_ref() {
                mark(r);
            }
        }
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn core::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_thread_is_initial() {
        let t = Thread::new(Some(Value::Null));
        assert_eq!(t.status, ThreadStatus::Initial);
        assert!(t.frames.is_empty());
    }

    #[test]
    fn reg_out_of_range_reads_null() {
        let t = Thread::new(None);
        assert!(t.reg(5).is_null());
    }
}
