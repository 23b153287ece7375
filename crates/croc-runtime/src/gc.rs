//! Tri-color, non-moving, stop-the-world mark-and-sweep collector (spec.md §4.3).
//!
//! Every heap object is a [`GcBox<T>`], a [`GcHeader`] immediately followed
//! by a concrete Rust payload, allocated through [`Gc::alloc`] and linked
//! into an intrusive allocation list for sweeping. This mirrors the
//! teacher's "`GcHeader` + concrete struct, accessed via raw pointer cast"
//! idiom (e.g. `vo-runtime/src/objects/array.rs`'s `ArrayHeader::as_ref`),
//! generalized from packed `u64` register slots to owned Rust types since
//! Croc's object kinds are heterogeneous rather than fixed-layout.
//!
//! Dispatch from an opaque [`GcRef`] back to kind-specific tracing logic is
//! a `match` on [`ValueKind`] calling into `crate::objects::*`, the same
//! shape as the teacher's `gc_types::scan_object` and the type-erased
//! trace-function dispatch seen in the wider retrieval pack's mark-sweep
//! collectors.

use crate::alloc::Allocator;
use crate::value::ValueKind;

/// A raw, non-owning pointer to a heap object's [`GcHeader`]. Never moves
/// once allocated (this collector is non-moving). `null` denotes "no
/// object" where a slot permits it.
pub type GcRef = *mut GcHeader;

pub const NULL_REF: GcRef = core::ptr::null_mut();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcColor {
    White,
    Gray,
    Black,
}

#[repr(C)]
pub struct GcHeader {
    pub kind: ValueKind,
    pub color: GcColor,
    pub finalized: bool,
    /// Total allocation size in bytes (header + payload), for accounting.
    pub size: u32,
    /// Intrusive singly-linked list of every live allocation, walked by sweep.
    pub next: GcRef,
}

impl GcHeader {
    #[inline]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }
}

/// Header immediately followed by a concrete payload of type `T`.
#[repr(C)]
struct GcBox<T> {
    header: GcHeader,
    payload: T,
}

/// Per-kind behavior the collector needs without knowing `T`: how to walk an
/// object's outgoing references, and what to do (if anything) when it is
/// freed. Implemented once per heap object type in `crate::objects`.
pub trait Trace {
    const KIND: ValueKind;
    /// Mark every reachable child gray via `mark`.
    fn trace(&self, mark: &mut dyn FnMut(GcRef));
    /// Run non-GC cleanup (e.g. dropping a boxed host resource) before the
    /// Rust value itself is dropped. Most kinds need nothing extra here;
    /// the box's `Drop` impl (derived from `T`'s own `Drop`) still runs.
    fn on_free(&mut self) {}
}

/// Objects whose class declares a finalizer are queued instead of freed
/// immediately; `has_finalizer` lets `Gc::alloc_finalizable` mark them.
struct FinalizerQueue {
    pending: Vec<GcRef>,
}

pub struct GcStats {
    pub total_bytes: usize,
    pub object_count: usize,
    pub collections: usize,
    pub last_reclaimed: usize,
}

/// The collector. Owns the allocation list, the gray worklist, the
/// finalizer queue, and delegates byte accounting to an [`Allocator`].
pub struct Gc {
    alloc: Allocator,
    head: GcRef,
    object_count: usize,
    gray: Vec<GcRef>,
    weak_refs: Vec<GcRef>,
    finalizer_queue: FinalizerQueue,
    /// Set while finalizers run: GC must not re-enter (spec.md §4.3, §5).
    finalizing: bool,
    collections: usize,
    last_reclaimed: usize,
    intern: crate::intern::InternTable,
}

impl Gc {
    pub fn new() -> Self {
        Self {
            alloc: Allocator::default(),
            head: NULL_REF,
            object_count: 0,
            gray: Vec::new(),
            weak_refs: Vec::new(),
            finalizer_queue: FinalizerQueue { pending: Vec::new() },
            finalizing: false,
            collections: 0,
            last_reclaimed: 0,
            intern: crate::intern::InternTable::new(),
        }
    }

    /// Intern `text`, allocating a new `String` object only if no equal
    /// one already exists (spec.md §4.2).
    pub fn intern_string(&mut self, text: &str) -> GcRef {
        // Split borrow: `InternTable::intern` needs `&mut Gc` to allocate
        // but only reads/writes its own bucket map, so move it out.
        let mut table = core::mem::take(&mut self.intern);
        let obj = table.intern(self, text);
        self.intern = table;
        obj
    }

    pub fn intern_len(&self) -> usize {
        self.intern.len()
    }

    #[inline]
    pub fn header(obj: GcRef) -> &'static GcHeader {
        unsafe { &*obj }
    }

    #[inline]
    fn header_mut(obj: GcRef) -> &'static mut GcHeader {
        unsafe { &mut *obj }
    }

    #[inline]
    pub fn total_bytes(&self) -> usize {
        self.alloc.total_bytes()
    }

    #[inline]
    pub fn object_count(&self) -> usize {
        self.object_count
    }

    #[inline]
    pub fn should_collect(&self) -> bool {
        self.alloc.should_collect()
    }

    pub fn stats(&self) -> GcStats {
        GcStats {
            total_bytes: self.total_bytes(),
            object_count: self.object_count,
            collections: self.collections,
            last_reclaimed: self.last_reclaimed,
        }
    }

    /// Allocate a new heap object of kind `T::KIND` holding `payload`.
    /// Newly allocated objects start white, like everything else; they
    /// survive the *current* cycle only by being reachable from a root or
    /// already-marked object (this collector does not gray new allocations
    /// mid-cycle, since collection never runs concurrently with mutation —
    /// spec.md §2, §5).
    pub fn alloc<T>(&mut self, payload: T) -> GcRef
    where
        T: Trace,
    {
        let size = core::mem::size_of::<GcBox<T>>();
        let boxed = Box::new(GcBox {
            header: GcHeader { kind: T::KIND, color: GcColor::White, finalized: false, size: size as u32, next: self.head },
            payload,
        });
        let raw = Box::into_raw(boxed) as GcRef;
        self.head = raw;
        self.object_count += 1;
        self.alloc.allocate(size);
        if T::KIND == ValueKind::WeakRef {
            // Tracked once, here, for this object's whole lifetime — `mark_gray`
            // only flips its color and must not push it again on every cycle,
            // or a long-lived WeakRef accumulates a duplicate entry per collect().
            self.weak_refs.push(raw);
        }
        raw
    }

    #[inline]
    pub unsafe fn payload<T>(obj: GcRef) -> &'static T {
        &(*(obj as *const GcBox<T>)).payload
    }

    #[inline]
    pub unsafe fn payload_mut<T>(obj: GcRef) -> &'static mut T {
        &mut (*(obj as *mut GcBox<T>)).payload
    }

    /// Reclaim a `GcBox<T>` allocated by `alloc::<T>`. Callers (`crate::objects`)
    /// must pass the same `T` the object was allocated with; kind dispatch
    /// at the call site guarantees this.
    #[inline]
    pub unsafe fn dealloc<T>(obj: GcRef) {
        drop(Box::from_raw(obj as *mut GcBox<T>));
    }

    /// Mark `obj` gray (queue it for scanning) if it is currently white.
    /// WeakRef objects are recorded but never traced through (spec.md
    /// §4.3's "WeakRef objects are enqueued but their target is not
    /// followed by the mark").
    pub fn mark_gray(&mut self, obj: GcRef) {
        if obj.is_null() {
            return;
        }
        let header = Self::header_mut(obj);
        if header.color != GcColor::White {
            return;
        }
        header.color = GcColor::Gray;
        if header.kind == ValueKind::WeakRef {
            // Already tracked in `self.weak_refs` since `alloc`. A WeakRef's
            // own header survives scanning (it's reachable), but we never
            // follow its `target` field from here. Promote straight to black
            // since it has no children to mark.
            header.color = GcColor::Black;
            return;
        }
        self.gray.push(obj);
    }

    /// Run one full mark/sweep/finalize cycle. `scan_roots` is called once
    /// at the start and must call `mark_gray` for every GC root (registry,
    /// metatables, live threads, intern table, ref table, open upvalues —
    /// spec.md §4.3).
    pub fn collect<F, Finalize>(&mut self, mut scan_roots: F, mut run_finalizer: Finalize)
    where
        F: FnMut(&mut Gc),
        Finalize: FnMut(GcRef),
    {
        debug_assert!(!self.finalizing, "GC re-entry during finalization is forbidden (spec.md §7)");

        scan_roots(self);
        self.mark_phase();
        let freed = self.sweep_phase();
        self.finalize_phase(&mut run_finalizer);

        self.collections += 1;
        self.last_reclaimed = freed;
        self.alloc.maybe_grow_limit();

        #[cfg(feature = "gc-debug")]
        self.verify_invariants();
    }

    fn mark_phase(&mut self) {
        while let Some(obj) = self.gray.pop() {
            let header = Self::header_mut(obj);
            if header.color == GcColor::Black {
                continue;
            }
            header.color = GcColor::Black;
            let kind = header.kind;
            crate::objects::trace_children(kind, obj, &mut |child| self.mark_gray(child));
        }
    }

    /// Sweep the allocation list: null out dead `WeakRef`s, defer
    /// finalizable white objects (leaving them linked, uncollected, and
    /// queued), free everything else. Returns bytes reclaimed.
    ///
    /// A finalizable white object is never freed in the cycle that
    /// discovers it dead: it stays in the allocation list so that if its
    /// finalizer resurrects it (stores it into a reachable root), the
    /// *next* cycle's mark phase finds it reachable and keeps it alive. If
    /// instead the next cycle's mark still fails to reach it, `finalized`
    /// is already `true` so this same sweep frees it for real the second
    /// time around (spec.md §4.3, §8's "runs at most once ... even across
    /// resurrection").
    fn sweep_phase(&mut self) -> usize {
        for &w in &self.weak_refs {
            crate::objects::weak_ref::sweep_if_dead(w);
        }
        self.weak_refs.retain(|&w| Self::header(w).color != GcColor::White);

        let mut reclaimed = 0usize;
        let mut prev: GcRef = NULL_REF;
        let mut cur = self.head;
        while !cur.is_null() {
            let header = Self::header_mut(cur);
            let next = header.next;
            if header.color == GcColor::White {
                if crate::objects::has_finalizer(cur) && !header.finalized {
                    header.finalized = true;
                    self.finalizer_queue.pending.push(cur);
                    prev = cur;
                } else {
                    if header.kind == ValueKind::String {
                        self.intern.forget(cur);
                    }
                    if !prev.is_null() {
                        Self::header_mut(prev).next = next;
                    } else {
                        self.head = next;
                    }
                    self.object_count -= 1;
                    reclaimed += header.size as usize;
                    self.alloc.free(header.size as usize);
                    crate::objects::free_object(cur);
                }
            } else {
                header.color = GcColor::White;
                prev = cur;
            }
            cur = next;
        }
        reclaimed
    }

    /// Run queued finalizers with the collector's re-entry flag set. The
    /// objects themselves remain linked in the allocation list (see
    /// `sweep_phase`); this phase only invokes the finalizer method, it
    /// does not free anything.
    fn finalize_phase<Finalize>(&mut self, run_finalizer: &mut Finalize)
    where
        Finalize: FnMut(GcRef),
    {
        if self.finalizer_queue.pending.is_empty() {
            return;
        }
        self.finalizing = true;
        let queue = core::mem::take(&mut self.finalizer_queue.pending);
        for obj in queue {
            run_finalizer(obj);
        }
        self.finalizing = false;
    }

    pub fn is_finalizing(&self) -> bool {
        self.finalizing
    }

    #[cfg(feature = "gc-debug")]
    fn verify_invariants(&self) {
        assert!(self.gray.is_empty(), "gray worklist not empty after mark phase");
        let mut cur = self.head;
        while !cur.is_null() {
            let header = Self::header(cur);
            assert_eq!(header.color, GcColor::White, "sweep must reset survivors to white");
            cur = header.next;
        }
    }
}

impl Default for Gc {
    fn default() -> Self {
        Self::new()
    }
}

/// Deallocate every live object unconditionally (VM teardown). Finalizers
/// are *not* run here — spec.md scopes finalization to the mark/sweep
/// cycle, not process exit.
impl Drop for Gc {
    fn drop(&mut self) {
        let mut cur = self.head;
        while !cur.is_null() {
            let next = Self::header(cur).next;
            crate::objects::free_object(cur);
            cur = next;
        }
    }
}
