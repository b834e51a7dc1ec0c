//! Pool region and chunk allocator.
//!
//! The pool region is a single `[start, end)` span of raw bytes that has not
//! been carved into blocks yet. Refills carve batches from its front by
//! bumping `start`. When the region cannot supply even one block, the chunk
//! allocator replaces it:
//!
//! 1. the leftover bytes (always narrower than the requested block) are
//!    donated to the free list of their own width;
//! 2. a new chunk of `2 * request + round_up(heap_size / 16)` bytes is
//!    requested from the system allocator;
//! 3. if that fails, one free block of the requested class or any wider one
//!    becomes the new region (scavenging);
//! 4. if nothing can be scavenged, the system allocator is asked once more,
//!    and a second failure is reported to the caller.
//!
//! Chunks are never returned to the system allocator.

use core::{alloc::Layout, ptr::NonNull};

use tracing::{debug, trace, warn};

use crate::{
    error::{Result, SystemExhaustedSnafu},
    free_list::FreeListBank,
    size_class::{ALIGN, MAX_BYTES, SizeClass, index_freelist, round_up},
    system::SystemAllocator,
};

/// A refill never needs more than one region replacement before carving
/// succeeds: a fresh chunk or a scavenged block always holds a whole block.
const MAX_STEPS: usize = 2;

/// Uncarved bytes shared by all size classes.
#[derive(Debug)]
struct PoolRegion {
    start: *mut u8,
    end: *mut u8,
}

unsafe impl Send for PoolRegion {}

impl PoolRegion {
    const fn empty() -> Self {
        Self {
            start: core::ptr::null_mut(),
            end: core::ptr::null_mut(),
        }
    }

    fn remaining(&self) -> usize {
        self.end.addr() - self.start.addr()
    }

    /// Takes `bytes` from the front of the region.
    fn carve(&mut self, bytes: usize) -> NonNull<u8> {
        assert!(bytes > 0 && bytes <= self.remaining());
        let Some(block) = NonNull::new(self.start) else {
            unreachable!("non-empty pool region starts at null");
        };
        self.start = self.start.wrapping_add(bytes);
        block
    }

    /// Empties the region, returning what was left of it.
    fn take_rest(&mut self) -> Option<(NonNull<u8>, usize)> {
        let rest = NonNull::new(self.start).map(|start| (start, self.remaining()));
        *self = Self::empty();
        rest.filter(|&(_, len)| len > 0)
    }

    fn reset(&mut self, start: NonNull<u8>, len: usize) {
        self.start = start.as_ptr();
        self.end = start.as_ptr().wrapping_add(len);
    }
}

/// A run of `nobj` adjacent blocks carved from the pool region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Batch {
    pub(crate) start: NonNull<u8>,
    pub(crate) nobj: usize,
}

/// Result of one pass over the chunk allocation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// The region held the whole batch.
    Satisfied(Batch),
    /// The region held at least one block but not the whole batch.
    Reduced(Batch),
    /// A new chunk replaced the region.
    Grown,
    /// A free block of this class replaced the region.
    Scavenged(SizeClass),
    /// Neither the system allocator nor the free lists had memory.
    Exhausted { bytes: usize },
}

/// Feeds refills from the pool region, growing it on demand.
#[derive(Debug)]
pub(crate) struct ChunkAllocator<S> {
    region: PoolRegion,
    heap_size: usize,
    system: S,
}

impl<S> ChunkAllocator<S> {
    pub(crate) const fn new(system: S) -> Self {
        Self {
            region: PoolRegion::empty(),
            heap_size: 0,
            system,
        }
    }

    /// Total bytes ever obtained from the system allocator as chunks.
    pub(crate) const fn heap_size(&self) -> usize {
        self.heap_size
    }

    /// Bytes left in the pool region.
    pub(crate) fn region_remaining(&self) -> usize {
        self.region.remaining()
    }

    pub(crate) const fn system(&self) -> &S {
        &self.system
    }

    pub(crate) const fn system_mut(&mut self) -> &mut S {
        &mut self.system
    }
}

impl<S> ChunkAllocator<S>
where
    S: SystemAllocator,
{
    /// Carves up to `nobj` adjacent blocks of `size` bytes.
    ///
    /// The returned batch holds at least one block; callers must use its
    /// `nobj`, which may be smaller than requested. `bank` receives the
    /// region's leftover bytes on growth and is scavenged when the system
    /// allocator fails.
    pub(crate) fn block_alloc(
        &mut self,
        bank: &mut FreeListBank,
        size: usize,
        nobj: usize,
    ) -> Result<Batch> {
        assert!(size > 0 && size <= MAX_BYTES && size.is_multiple_of(ALIGN));
        assert!(nobj > 0);

        for _ in 0..MAX_STEPS {
            match self.step(bank, size, nobj) {
                Step::Satisfied(batch) | Step::Reduced(batch) => return Ok(batch),
                Step::Grown | Step::Scavenged(_) => {}
                Step::Exhausted { bytes } => return SystemExhaustedSnafu { bytes }.fail(),
            }
        }
        unreachable!("pool region still empty after being refilled");
    }

    fn step(&mut self, bank: &mut FreeListBank, size: usize, nobj: usize) -> Step {
        let bytes_total = size.saturating_mul(nobj);
        let bytes_left = self.region.remaining();

        if bytes_left >= bytes_total {
            let start = self.region.carve(bytes_total);
            return Step::Satisfied(Batch { start, nobj });
        }
        if bytes_left >= size {
            let nobj = bytes_left / size;
            let start = self.region.carve(nobj * size);
            return Step::Reduced(Batch { start, nobj });
        }

        self.donate_rest(bank);

        let bytes_to_get = bytes_total
            .saturating_mul(2)
            .saturating_add(round_up(self.heap_size >> 4));
        if self.grow(bytes_to_get) {
            return Step::Grown;
        }
        if let Some(class) = self.scavenge(bank, size) {
            return Step::Scavenged(class);
        }
        if self.grow(bytes_to_get) {
            return Step::Grown;
        }

        warn!(
            "chunk allocator exhausted: size={size}, nobj={nobj}, bytes_to_get={bytes_to_get}, heap_size={}",
            self.heap_size
        );
        Step::Exhausted {
            bytes: bytes_to_get,
        }
    }

    /// Pushes the region's leftover bytes onto the free list of their width.
    fn donate_rest(&mut self, bank: &mut FreeListBank) {
        let Some((rest, len)) = self.region.take_rest() else {
            return;
        };
        let class = SizeClass::from_index(index_freelist(len));
        let Some(class) = class.filter(|class| class.width() == len) else {
            unreachable!("pool region leftover of {len} bytes matches no size class");
        };
        trace!("donating {len} leftover bytes to {class}");
        unsafe {
            bank.push(class, rest);
        }
    }

    /// Replaces the region with a fresh chunk of `bytes` bytes.
    fn grow(&mut self, bytes: usize) -> bool {
        let Ok(layout) = Layout::from_size_align(bytes, ALIGN) else {
            return false;
        };
        let Some(chunk) = self.system.allocate(layout) else {
            debug!("system allocator refused a chunk of {bytes} bytes");
            return false;
        };
        self.heap_size += bytes;
        self.region.reset(chunk, bytes);
        debug!(
            "pool grown by {bytes} bytes, heap_size={}",
            self.heap_size
        );
        true
    }

    /// Replaces the region with one free block of at least `size` bytes.
    fn scavenge(&mut self, bank: &mut FreeListBank, size: usize) -> Option<SizeClass> {
        let first = SizeClass::for_size(size)?;
        let (class, block) = first
            .iter_from()
            .find_map(|class| bank.pop(class).map(|block| (class, block)))?;
        self.region.reset(block, class.width());
        debug!("scavenged a block of {class} for {size}-byte blocks");
        Some(class)
    }
}
