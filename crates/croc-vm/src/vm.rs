//! The VM: garbage collector, per-type metatables, registry, string intern
//! table (owned by `Gc`), ref table, and the set of live threads (spec.md
//! §2, §3's "Lifecycles", §6's "Registry").

use std::collections::HashMap;

use croc_runtime::objects::namespace::NamespaceObj;
use croc_runtime::objects::thread::ThreadSlot;
use croc_runtime::{Gc, GcRef, MetatableSet, Value, ValueKind};

use crate::error::{VmError, VmResult};
use crate::thread::Thread;

/// A host-held 64-bit handle that strongly roots a heap object across
/// calls (spec.md §4.7 "Refs"). Multiple refs to the same object are
/// tracked independently; the object stays rooted while any exist.
struct RefEntry {
    value: Value,
    count: u32,
}

#[derive(Default)]
pub struct RefTable {
    entries: HashMap<u64, RefEntry>,
    next_id: u64,
}

impl RefTable {
    pub fn create(&mut self, value: Value) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.insert(id, RefEntry { value, count: 1 });
        id
    }

    pub fn resolve(&self, id: u64) -> VmResult<Value> {
        self.entries.get(&id).map(|e| e.value).ok_or(VmError::InvalidRef(id))
    }

    pub fn remove(&mut self, id: u64) -> VmResult<()> {
        let Some(entry) = self.entries.get_mut(&id) else {
            return Err(VmError::InvalidRef(id));
        };
        entry.count -= 1;
        if entry.count == 0 {
            self.entries.remove(&id);
        }
        Ok(())
    }

    pub fn retain(&mut self, id: u64) -> VmResult<()> {
        let entry = self.entries.get_mut(&id).ok_or(VmError::InvalidRef(id))?;
        entry.count += 1;
        Ok(())
    }

    fn iter_values(&self) -> impl Iterator<Item = Value> + '_ {
        self.entries.values().map(|e| e.value)
    }
}

pub struct Vm {
    pub gc: Gc,
    pub metatables: MetatableSet,
    /// Host-private namespace, never reachable from script globals (spec.md
    /// §6's "Registry").
    pub registry: GcRef,
    /// The root module-global namespace new top-level modules attach under.
    pub globals: GcRef,
    pub refs: RefTable,
    /// Every live `Thread`, as a `ThreadSlot` GC root (spec.md §3's
    /// Lifecycles: "all live thread stacks").
    pub threads: Vec<GcRef>,
    pub main_thread: GcRef,
    /// The thread currently executing, if any (spec.md §8: "for Running,
    /// exactly one thread in the VM is in that state").
    pub current_thread: Option<GcRef>,
}

impl Vm {
    pub fn new() -> Self {
        let mut gc = Gc::new();
        let registry = gc.alloc(NamespaceObj::new("registry", None));
        let globals = gc.alloc(NamespaceObj::new("global", None));
        let main_thread = gc.alloc(ThreadSlot::new(Box::new(Thread::new(None))));
        {
            let t = unsafe { Gc::payload_mut::<ThreadSlot>(main_thread) };
            t.downcast_mut::<Thread>().unwrap().status = crate::thread::ThreadStatus::Running;
        }
        Self {
            gc,
            metatables: MetatableSet::new(),
            registry,
            globals,
            refs: RefTable::default(),
            threads: vec![main_thread],
            main_thread,
            current_thread: Some(main_thread),
        }
    }

    /// Like [`Gc::payload`]/[`Gc::payload_mut`], this indexes straight into
    /// the GC heap behind a raw `GcRef` rather than through `&mut Vm` — it
    /// takes `&self` even for the mutable accessor, so interpreter code can
    /// hold a `&mut Thread` and `&mut Gc` (or several threads) at once
    /// without fighting the borrow checker over unrelated heap objects.
    /// Single-threaded execution is what makes this sound, the same
    /// invariant every other unsafe accessor in `croc-runtime` relies on.
    pub fn thread(&self, handle: GcRef) -> &Thread {
        unsafe { Gc::payload::<ThreadSlot>(handle) }
            .downcast_ref::<Thread>()
            .expect("GcRef of kind Thread must hold a croc_vm::thread::Thread")
    }

    pub fn thread_mut(&self, handle: GcRef) -> &mut Thread {
        unsafe { Gc::payload_mut::<ThreadSlot>(handle) }
            .downcast_mut::<Thread>()
            .expect("GcRef of kind Thread must hold a croc_vm::thread::Thread")
    }

    pub fn spawn_thread(&mut self, body: Value) -> GcRef {
        let handle = self.gc.alloc(ThreadSlot::new(Box::new(Thread::new(Some(body)))));
        self.threads.push(handle);
        log::trace!("spawned thread {handle:p}, {} now live", self.threads.len());
        handle
    }

    /// Run one full GC cycle, scanning every root named in spec.md §4.3.
    pub fn collect(&mut self) {
        log::debug!("gc: starting cycle {} ({} live threads)", self.gc.collections + 1, self.threads.len());
        let registry = self.registry;
        let globals = self.globals;
        let threads = self.threads.clone();
        let metatables = core::mem::replace(&mut self.metatables, MetatableSet::new());
        let ref_values: Vec<Value> = self.refs.iter_values().collect();
        let mut queued_finalizers: Vec<GcRef> = Vec::new();

        self.gc.collect(
            |gc| {
                gc.mark_gray(registry);
                gc.mark_gray(globals);
                for &t in &threads {
                    gc.mark_gray(t);
                }
                for kind in ALL_VALUE_KINDS {
                    for mm in croc_runtime::Metamethod::ALL {
                        if let Some(r) = metatables.get(kind).get(mm).as_ref() {
                            gc.mark_gray(r);
                        }
                    }
                }
                for v in &ref_values {
                    if let Some(r) = v.as_ref() {
                        gc.mark_gray(r);
                    }
                }
            },
            |obj| queued_finalizers.push(obj),
        );

        self.metatables = metatables;
        log::debug!("gc: cycle {} reclaimed {} bytes, {} finalizers queued", self.gc.collections, self.gc.last_reclaimed, queued_finalizers.len());

        // Finalizers run after the collector itself returns (spec.md
        // §4.3's "Finalizer phase": "runs after mark/sweep with the GC
        // effectively off"). Invoking one is a full method call through
        // the interpreter, which needs `&mut Vm` — and `self.gc` was just
        // borrowed mutably by `collect` above, so the actual calls happen
        // here instead of inside `Gc`'s own finalizer callback.
        crate::interp::run_finalizers(self, queued_finalizers);
    }

    pub fn should_collect(&self) -> bool {
        self.gc.should_collect()
    }

    pub fn maybe_collect(&mut self) {
        if self.should_collect() {
            self.collect();
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

const ALL_VALUE_KINDS: [ValueKind; 18] = [
    ValueKind::Null,
    ValueKind::Bool,
    ValueKind::Int,
    ValueKind::Float,
    ValueKind::Char,
    ValueKind::String,
    ValueKind::Table,
    ValueKind::Array,
    ValueKind::Memblock,
    ValueKind::Namespace,
    ValueKind::Function,
    ValueKind::FuncDef,
    ValueKind::Class,
    ValueKind::Instance,
    ValueKind::NativeObj,
    ValueKind::WeakRef,
    ValueKind::Upvalue,
    ValueKind::Thread,
];
