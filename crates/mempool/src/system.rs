//! The coarse-grained allocator underneath the pools.
//!
//! Pools request whole chunks and oversized blocks through
//! [`SystemAllocator`]. [`Global`] forwards to the Rust global allocator;
//! [`Bounded`] caps how much another system allocator may hand out.

use core::{alloc::Layout, ptr::NonNull};

/// Source of raw memory for a pool.
///
/// # Safety
///
/// Implementors must return blocks that are valid for reads and writes of
/// `layout.size()` bytes, aligned to `layout.align()`, and not aliased by
/// any other live allocation until passed back to
/// [`deallocate`](Self::deallocate).
pub unsafe trait SystemAllocator {
    /// Allocates a block described by `layout`, or returns `None` on
    /// exhaustion.
    ///
    /// Pools never request zero-sized layouts.
    fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>>;

    /// Releases a block obtained from [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator's `allocate` with the
    /// same `layout`, and must not be used afterwards.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout);
}

/// The Rust global allocator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Global;

unsafe impl SystemAllocator for Global {
    fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() > 0);
        NonNull::new(unsafe { alloc::alloc::alloc(layout) })
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

/// A system allocator that refuses to hold more than `budget` live bytes.
///
/// Requests that would push the live total over the budget fail without
/// reaching the inner allocator. Cloning a `Bounded` copies its counters;
/// the clone then tracks its own allocations independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bounded<S = Global> {
    inner: S,
    budget: usize,
    live: usize,
    calls: usize,
    failures: usize,
}

impl<S> Bounded<S> {
    /// Wraps `inner`, allowing at most `budget` live bytes.
    #[must_use]
    pub const fn new(inner: S, budget: usize) -> Self {
        Self {
            inner,
            budget,
            live: 0,
            calls: 0,
            failures: 0,
        }
    }

    /// The current cap on live bytes.
    #[must_use]
    pub const fn budget(&self) -> usize {
        self.budget
    }

    /// Changes the budget. Blocks already handed out are unaffected.
    pub const fn set_budget(&mut self, budget: usize) {
        self.budget = budget;
    }

    /// Bytes currently handed out and not yet returned.
    #[must_use]
    pub const fn live(&self) -> usize {
        self.live
    }

    /// Bytes that can still be handed out before the budget is hit.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.budget.saturating_sub(self.live)
    }

    /// Number of `allocate` calls made, successful or not.
    #[must_use]
    pub const fn calls(&self) -> usize {
        self.calls
    }

    /// Number of `allocate` calls that returned `None`.
    #[must_use]
    pub const fn failures(&self) -> usize {
        self.failures
    }

    /// The wrapped allocator.
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

unsafe impl<S> SystemAllocator for Bounded<S>
where
    S: SystemAllocator,
{
    fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        self.calls += 1;
        let block = (layout.size() <= self.remaining())
            .then(|| self.inner.allocate(layout))
            .flatten();
        if block.is_some() {
            self.live += layout.size();
        } else {
            self.failures += 1;
        }
        block
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { self.inner.deallocate(ptr, layout) }
        self.live -= layout.size();
    }
}
