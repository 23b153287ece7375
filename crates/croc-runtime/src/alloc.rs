//! Byte-accounting allocator facade (spec.md §4.1).
//!
//! `Allocator` does not itself allocate memory for GC objects — `Gc::alloc`
//! owns that via `Box` — it tracks the running byte total the GC threshold
//! heuristic reads, and offers raw-block helpers for host-owned memory (e.g.
//! Memblock backing storage) that must be counted the same way.

use core::cell::Cell;

/// Growth heuristic: after a collection, if more than this fraction of the
/// limit is still live, the limit doubles (spec.md §4.1).
const GROWTH_LIVE_FRACTION_NUM: usize = 1;
const GROWTH_LIVE_FRACTION_DEN: usize = 2;

pub struct Allocator {
    total_bytes: Cell<usize>,
    gc_limit: Cell<usize>,
}

impl Allocator {
    pub fn new(initial_limit: usize) -> Self {
        Self { total_bytes: Cell::new(0), gc_limit: Cell::new(initial_limit) }
    }

    #[inline]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes.get()
    }

    #[inline]
    pub fn gc_limit(&self) -> usize {
        self.gc_limit.get()
    }

    /// Account for a fresh allocation of `size` bytes.
    #[inline]
    pub fn allocate(&self, size: usize) {
        self.total_bytes.set(self.total_bytes.get() + size);
    }

    /// Account for a resize from `old_size` to `new_size` bytes.
    #[inline]
    pub fn resize(&self, old_size: usize, new_size: usize) {
        let total = self.total_bytes.get();
        let total = total.saturating_sub(old_size) + new_size;
        self.total_bytes.set(total);
    }

    /// Account for freeing `size` bytes.
    #[inline]
    pub fn free(&self, size: usize) {
        self.total_bytes.set(self.total_bytes.get().saturating_sub(size));
    }

    #[inline]
    pub fn should_collect(&self) -> bool {
        self.total_bytes.get() >= self.gc_limit.get()
    }

    /// Apply the post-GC growth heuristic: if more than half the limit
    /// survived collection, double the limit.
    pub fn maybe_grow_limit(&self) {
        let limit = self.gc_limit.get();
        if self.total_bytes.get() * GROWTH_LIVE_FRACTION_DEN > limit * GROWTH_LIVE_FRACTION_NUM {
            self.gc_limit.set(limit * 2);
        }
    }
}

impl Default for Allocator {
    fn default() -> Self {
        // 1 MiB starting threshold, matching the teacher's RuntimeApi default order of magnitude.
        Self::new(1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_crossing() {
        let a = Allocator::new(100);
        a.allocate(50);
        assert!(!a.should_collect());
        a.allocate(60);
        assert!(a.should_collect());
    }

    #[test]
    fn growth_heuristic_doubles_when_still_mostly_live() {
        let a = Allocator::new(100);
        a.allocate(80);
        a.maybe_grow_limit();
        assert_eq!(a.gc_limit(), 200);
    }

    #[test]
    fn growth_heuristic_holds_when_mostly_reclaimed() {
        let a = Allocator::new(100);
        a.allocate(10);
        a.maybe_grow_limit();
        assert_eq!(a.gc_limit(), 100);
    }
}
