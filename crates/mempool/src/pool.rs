//! The untyped pool facade.
//!
//! [`BytePool`] routes each request either to the free lists (widths up to
//! [`MAX_BYTES`]) or straight to the system allocator (anything wider). An
//! empty free list is refilled with a batch of blocks carved by the chunk
//! allocator.

use core::{alloc::Layout, num::NonZeroUsize, ptr::NonNull};

use snafu::OptionExt as _;
use tracing::trace;

use crate::{
    chunk::ChunkAllocator,
    error::{Result, SizeOverflowSnafu, SystemExhaustedSnafu},
    free_list::FreeListBank,
    size_class::{ALIGN, DEFAULT_BATCH, MAX_BYTES, NUM_CLASSES, SizeClass},
    system::{Global, SystemAllocator},
};

/// Tunables of a pool.
///
/// The size-class constants are fixed at compile time; only the refill batch
/// can be changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolConfig {
    batch: NonZeroUsize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolConfig {
    /// Default refill batch, [`DEFAULT_BATCH`] blocks.
    pub const DEFAULT_BATCH: NonZeroUsize = match NonZeroUsize::new(DEFAULT_BATCH) {
        Some(batch) => batch,
        None => panic!("default batch must not be zero"),
    };

    /// The default tunables: refills carve [`Self::DEFAULT_BATCH`] blocks.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            batch: Self::DEFAULT_BATCH,
        }
    }

    /// Sets the number of blocks a refill tries to carve at once.
    #[must_use]
    pub const fn with_batch(self, batch: NonZeroUsize) -> Self {
        Self { batch }
    }

    /// Number of blocks a refill tries to carve at once.
    #[must_use]
    pub const fn batch(self) -> NonZeroUsize {
        self.batch
    }
}

/// Snapshot of a pool's internal state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolStats {
    /// Bytes ever obtained from the system allocator as chunks.
    pub heap_size: usize,
    /// Bytes of the current chunk not yet carved into blocks.
    pub region_remaining: usize,
    /// Blocks waiting on each size class's free list.
    pub free_blocks: [usize; NUM_CLASSES],
}

impl PoolStats {
    /// Free blocks across all size classes.
    #[must_use]
    pub fn total_free_blocks(&self) -> usize {
        self.free_blocks.iter().sum()
    }

    /// Bytes sitting on free lists, ready for reuse.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        SizeClass::all()
            .zip(self.free_blocks)
            .map(|(class, count)| class.width() * count)
            .sum()
    }
}

/// Returns a non-null pointer aligned to [`ALIGN`] for zero-byte requests.
fn dangling() -> NonNull<u8> {
    #[repr(align(8))]
    struct Aligned;
    const _: () = assert!(align_of::<Aligned>() == ALIGN);
    NonNull::<Aligned>::dangling().cast()
}

/// A second-level allocator serving raw byte blocks.
///
/// Requests of `1..=MAX_BYTES` bytes are rounded up to a size class and
/// served from that class's free list; wider requests go to the system
/// allocator `S`. Pooled memory is recycled internally and never returned to
/// `S`, not even when the pool is dropped.
///
/// Every pooled block is aligned to [`ALIGN`].
///
/// # Examples
///
/// ```
/// use mempool::BytePool;
///
/// let mut pool = BytePool::new();
/// let a = pool.allocate(24).unwrap();
/// unsafe { pool.deallocate(a, 24) };
///
/// // the most recently freed block of a class is reused first
/// let b = pool.allocate(20).unwrap();
/// assert_eq!(a, b);
/// # unsafe { pool.deallocate(b, 20) };
/// ```
#[derive(Debug)]
pub struct BytePool<S = Global> {
    bank: FreeListBank,
    chunks: ChunkAllocator<S>,
    config: PoolConfig,
}

impl Default for BytePool<Global> {
    fn default() -> Self {
        Self::new()
    }
}

impl BytePool<Global> {
    /// Creates an empty pool backed by the Rust global allocator.
    ///
    /// No memory is requested until the first allocation.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_system(Global)
    }
}

impl<S> BytePool<S> {
    /// Creates an empty pool that draws chunks from `system`.
    #[must_use]
    pub const fn with_system(system: S) -> Self {
        Self::with_config(system, PoolConfig::new())
    }

    /// Creates an empty pool with the given system allocator and tunables.
    #[must_use]
    pub const fn with_config(system: S, config: PoolConfig) -> Self {
        Self {
            bank: FreeListBank::new(),
            chunks: ChunkAllocator::new(system),
            config,
        }
    }

    /// Returns the tunables this pool was created with.
    #[must_use]
    pub const fn config(&self) -> PoolConfig {
        self.config
    }

    /// The system allocator backing this pool.
    #[must_use]
    pub const fn system(&self) -> &S {
        self.chunks.system()
    }

    /// Takes a snapshot of the pool's state.
    ///
    /// Counting free blocks walks every free list.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let mut free_blocks = [0; NUM_CLASSES];
        for class in SizeClass::all() {
            free_blocks[class.index()] = self.bank.len(class);
        }
        PoolStats {
            heap_size: self.chunks.heap_size(),
            region_remaining: self.chunks.region_remaining(),
            free_blocks,
        }
    }
}

impl<S> BytePool<S>
where
    S: SystemAllocator,
{
    /// Allocates a block of at least `bytes` bytes, aligned to [`ALIGN`].
    ///
    /// Zero-byte requests return a dangling pointer without touching the
    /// pool.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::SystemExhausted`](crate::AllocError::SystemExhausted)
    /// if the system allocator cannot supply an oversized block, or cannot
    /// grow the pool while no free block is left to scavenge, and
    /// [`AllocError::SizeOverflow`](crate::AllocError::SizeOverflow) if an
    /// oversized request does not fit in a layout.
    pub fn allocate(&mut self, bytes: usize) -> Result<NonNull<u8>> {
        if bytes == 0 {
            return Ok(dangling());
        }
        let Some(class) = SizeClass::for_size(bytes) else {
            let layout = Self::oversized_layout(bytes)?;
            return self.allocate_system(layout);
        };
        if let Some(block) = self.bank.pop(class) {
            return Ok(block);
        }
        self.refill(class)
    }

    /// Returns a block to the pool.
    ///
    /// Pooled blocks go back onto their class's free list; oversized blocks
    /// are released to the system allocator.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `ptr` was returned by [`allocate`](Self::allocate) on this pool
    /// - `bytes` maps to the same size class as the original request (or is
    ///   the same oversized size)
    /// - `ptr` has not been deallocated already and is not used afterwards
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize) {
        if bytes == 0 {
            return;
        }
        let Some(class) = SizeClass::for_size(bytes) else {
            let Ok(layout) = Self::oversized_layout(bytes) else {
                unreachable!("deallocating {bytes} bytes that could never be allocated");
            };
            unsafe { self.deallocate_system(ptr, layout) };
            return;
        };
        unsafe { self.bank.push(class, ptr) };
    }

    /// Allocates straight from the system allocator, bypassing the pool.
    pub(crate) fn allocate_system(&mut self, layout: Layout) -> Result<NonNull<u8>> {
        self.chunks
            .system_mut()
            .allocate(layout)
            .context(SystemExhaustedSnafu {
                bytes: layout.size(),
            })
    }

    /// Releases a block obtained from [`allocate_system`](Self::allocate_system).
    pub(crate) unsafe fn deallocate_system(&mut self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { self.chunks.system_mut().deallocate(ptr, layout) }
    }

    fn oversized_layout(bytes: usize) -> Result<Layout> {
        debug_assert!(bytes > MAX_BYTES);
        Layout::from_size_align(bytes, ALIGN)
            .ok()
            .context(SizeOverflowSnafu {
                count: bytes,
                width: 1_usize,
            })
    }

    /// Carves a batch for `class`, keeps the first block for the caller and
    /// threads the rest onto the class's free list.
    fn refill(&mut self, class: SizeClass) -> Result<NonNull<u8>> {
        let width = class.width();
        let batch = self
            .chunks
            .block_alloc(&mut self.bank, width, self.config.batch.get())?;
        trace!("refilled {class} with {} blocks", batch.nobj);
        if batch.nobj > 1 {
            unsafe {
                let rest = batch.start.add(width);
                self.bank.thread(class, rest, batch.nobj - 1);
            }
        }
        Ok(batch.start)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::Bounded;

    struct TestPool<S> {
        pool: BytePool<S>,
    }

    impl<S> TestPool<S>
    where
        S: SystemAllocator,
    {
        fn allocate(&mut self, bytes: usize) -> Option<NonNull<u8>> {
            let ptr = self.pool.allocate(bytes).ok()?;
            unsafe {
                ptr.as_ptr().write_bytes(0x33, bytes);
            }
            Some(ptr)
        }

        unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize) {
            unsafe {
                for i in 0..bytes {
                    assert_eq!(ptr.add(i).read(), 0x33);
                }
                ptr.as_ptr().write_bytes(0x55, bytes);
                self.pool.deallocate(ptr, bytes);
            }
        }

        fn stats(&self) -> PoolStats {
            self.pool.stats()
        }
    }

    fn with_pool<F>(test_fn: F)
    where
        F: FnOnce(&mut TestPool<Global>),
    {
        test_fn(&mut TestPool {
            pool: BytePool::new(),
        });
    }

    fn with_bounded_pool<F>(budget: usize, test_fn: F)
    where
        F: FnOnce(&mut TestPool<Bounded>),
    {
        test_fn(&mut TestPool {
            pool: BytePool::with_system(Bounded::new(Global, budget)),
        });
    }

    fn class_of(bytes: usize) -> usize {
        SizeClass::for_size(bytes).unwrap().index()
    }

    fn assert_disjoint(blocks: &mut [(NonNull<u8>, usize)]) {
        blocks.sort_by_key(|(ptr, _)| ptr.addr());
        for pair in blocks.windows(2) {
            let (a, a_len) = pair[0];
            let (b, _) = pair[1];
            assert!(a.addr().get() + a_len <= b.addr().get());
        }
    }

    #[test]
    fn test_basic_allocation() {
        with_pool(|pool| unsafe {
            let ptr = pool.allocate(64).unwrap();
            assert_eq!(ptr.addr().get() % ALIGN, 0);
            pool.deallocate(ptr, 64);
        });
    }

    #[test]
    fn test_first_refill() {
        with_pool(|pool| {
            pool.allocate(1).unwrap();
            let stats = pool.stats();

            // one 20-block batch carved from a chunk twice its size
            assert_eq!(stats.heap_size, 2 * 8 * 20);
            assert_eq!(stats.region_remaining, 8 * 20);
            assert_eq!(stats.free_blocks[0], 19);
            assert_eq!(stats.total_free_blocks(), 19);
            assert_eq!(stats.free_bytes(), 19 * 8);
        });
    }

    #[test]
    fn test_size_class_routing() {
        with_pool(|pool| {
            pool.allocate(1).unwrap();
            assert_eq!(pool.stats().free_blocks[class_of(1)], 19);
            assert_eq!(class_of(1), 0);

            // the 160 bytes left in the region hold ten 16-byte blocks
            pool.allocate(9).unwrap();
            assert_eq!(pool.stats().free_blocks[class_of(9)], 9);
            assert_eq!(class_of(9), 1);

            // a second 9..=16-byte request comes from the list
            pool.allocate(16).unwrap();
            assert_eq!(pool.stats().free_blocks[1], 8);
            assert_eq!(pool.stats().heap_size, 320);
        });
    }

    #[test]
    fn test_lifo_reuse() {
        with_pool(|pool| unsafe {
            let first = pool.allocate(40).unwrap();
            pool.deallocate(first, 40);
            let second = pool.allocate(40).unwrap();
            assert_eq!(first, second);

            let a = pool.allocate(40).unwrap();
            let b = pool.allocate(40).unwrap();
            pool.deallocate(a, 40);
            pool.deallocate(b, 40);
            assert_eq!(pool.allocate(40), Some(b));
            assert_eq!(pool.allocate(40), Some(a));
        });
    }

    #[test]
    fn test_reuse_within_class() {
        with_pool(|pool| unsafe {
            let ptr = pool.allocate(17).unwrap();
            pool.deallocate(ptr, 17);
            // 17 and 24 bytes share the 24-byte class
            assert_eq!(pool.allocate(24), Some(ptr));
        });
    }

    #[test]
    fn test_non_overlapping_allocations() {
        with_pool(|pool| unsafe {
            let mut blocks = Vec::new();
            for _ in 0..100 {
                blocks.push((pool.allocate(24).unwrap(), 24));
            }
            assert_disjoint(&mut blocks);
            for (ptr, bytes) in blocks {
                pool.deallocate(ptr, bytes);
            }
        });
    }

    #[test]
    fn test_growth_across_classes() {
        with_pool(|pool| unsafe {
            let mut blocks = Vec::new();
            for i in 0..2000 {
                let bytes = 1 + (i * 37) % MAX_BYTES;
                blocks.push((pool.allocate(bytes).unwrap(), bytes));
            }

            let mut ranges: Vec<_> = blocks
                .iter()
                .map(|&(ptr, bytes)| (ptr, SizeClass::for_size(bytes).unwrap().width()))
                .collect();
            assert_disjoint(&mut ranges);

            for (ptr, bytes) in blocks {
                pool.deallocate(ptr, bytes);
            }
            assert!(pool.stats().heap_size > 0);
        });
    }

    #[test]
    fn test_single_block_refill_skips_free_list() {
        with_pool(|pool| {
            pool.allocate(8).unwrap();
            assert_eq!(pool.stats().region_remaining, 160);

            // 160 bytes left: exactly one 128-byte block
            pool.allocate(128).unwrap();
            let stats = pool.stats();
            assert_eq!(stats.free_blocks[class_of(128)], 0);
            assert_eq!(stats.region_remaining, 32);
            assert_eq!(stats.heap_size, 320);
        });
    }

    #[test]
    fn test_leftover_donated_on_growth() {
        with_pool(|pool| {
            pool.allocate(8).unwrap();
            let first = pool.allocate(128).unwrap();

            // 32 bytes left: they move to the 32-byte list before growing
            pool.allocate(128).unwrap();
            let stats = pool.stats();
            assert_eq!(stats.free_blocks[class_of(32)], 1);
            assert_eq!(stats.heap_size, 320 + 2 * 128 * 20 + 24);

            let leftover = pool.allocate(32).unwrap();
            assert_eq!(leftover.addr().get(), first.addr().get() + 128);
            assert_eq!(pool.stats().heap_size, stats.heap_size);
            assert_eq!(pool.stats().free_blocks[class_of(32)], 0);
        });
    }

    #[test]
    fn test_oversized_bypasses_free_lists() {
        with_pool(|pool| unsafe {
            pool.allocate(24).unwrap();
            let before = pool.stats();

            let ptr = pool.allocate(MAX_BYTES + 1).unwrap();
            assert_eq!(pool.stats(), before);

            pool.deallocate(ptr, MAX_BYTES + 1);
            assert_eq!(pool.stats(), before);
        });
    }

    #[test]
    fn test_oversized_uses_system_allocator() {
        with_bounded_pool(usize::MAX, |pool| unsafe {
            let ptr = pool.allocate(4096).unwrap();
            assert_eq!(pool.pool.system().live(), 4096);
            assert_eq!(pool.stats().heap_size, 0);

            pool.deallocate(ptr, 4096);
            assert_eq!(pool.pool.system().live(), 0);

            // passed through at the requested size, not rounded to ALIGN
            let ptr = pool.allocate(MAX_BYTES + 1).unwrap();
            assert_eq!(ptr.addr().get() % ALIGN, 0);
            assert_eq!(pool.pool.system().live(), MAX_BYTES + 1);
            pool.deallocate(ptr, MAX_BYTES + 1);
            assert_eq!(pool.pool.system().live(), 0);
        });
    }

    #[test]
    fn test_oversized_out_of_memory() {
        with_bounded_pool(1024, |pool| {
            let err = pool.pool.allocate(4096).unwrap_err();
            assert!(err.is_system_exhausted());
            assert_eq!(pool.stats(), BytePool::new().stats());
        });
    }

    #[test]
    fn test_oversized_layout_overflow() {
        let mut pool = BytePool::new();
        let err = pool.allocate(usize::MAX).unwrap_err();
        assert!(err.is_size_overflow());
    }

    #[test]
    fn test_zero_bytes() {
        with_pool(|pool| unsafe {
            let ptr = pool.pool.allocate(0).unwrap();
            assert_eq!(ptr.addr().get() % ALIGN, 0);
            pool.pool.deallocate(ptr, 0);
            assert_eq!(pool.stats(), BytePool::new().stats());
        });
    }

    #[test]
    fn test_exhaustion_and_recovery() {
        with_bounded_pool(320, |pool| unsafe {
            let mut blocks = Vec::new();
            while let Some(ptr) = pool.allocate(8) {
                blocks.push(ptr);
            }
            // one 320-byte chunk holds forty 8-byte blocks
            assert_eq!(blocks.len(), 40);
            assert!(pool.pool.allocate(8).unwrap_err().is_system_exhausted());

            let last = blocks.pop().unwrap();
            pool.deallocate(last, 8);
            assert_eq!(pool.allocate(8), Some(last));

            for ptr in blocks {
                pool.deallocate(ptr, 8);
            }
        });
    }

    #[test]
    fn test_scavenging_serves_narrower_class() {
        with_bounded_pool(640, |pool| unsafe {
            let wide = pool.allocate(16).unwrap();
            let mut rest = Vec::new();
            while let Some(ptr) = pool.allocate(16) {
                rest.push(ptr);
            }
            assert_eq!(pool.stats().total_free_blocks(), 0);

            // no chunk can be had, so the freed 16-byte block is split
            pool.deallocate(wide, 16);
            let a = pool.allocate(8).unwrap();
            let b = pool.allocate(8).unwrap();
            assert_eq!(a, wide);
            assert_eq!(b.addr().get(), wide.addr().get() + 8);
            assert_eq!(pool.stats().free_blocks[class_of(16)], 0);
            assert!(pool.allocate(8).is_none());
        });
    }

    #[test]
    fn test_custom_batch() {
        let config = PoolConfig::new().with_batch(NonZeroUsize::new(4).unwrap());
        let mut pool = BytePool::with_config(Global, config);
        assert_eq!(pool.config().batch().get(), 4);

        pool.allocate(48).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.heap_size, 2 * 48 * 4);
        assert_eq!(stats.free_blocks[class_of(48)], 3);
    }

    #[test]
    fn test_batch_of_one() {
        let config = PoolConfig::new().with_batch(NonZeroUsize::MIN);
        let mut pool = BytePool::with_config(Global, config);
        let a = pool.allocate(8).unwrap();
        let b = pool.allocate(8).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.stats().total_free_blocks(), 0);
    }

    #[test]
    fn test_default_config() {
        assert_eq!(PoolConfig::default().batch().get(), DEFAULT_BATCH);
        assert_eq!(BytePool::default().config(), PoolConfig::new());
    }
}
