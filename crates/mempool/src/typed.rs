//! Element-typed pools.
//!
//! [`Pool<T>`] counts in elements of `T` rather than bytes and adds the
//! usual allocator conveniences: in-place construction and destruction,
//! address-of, a maximum element count and rebinding to another element
//! type.

use core::{
    alloc::Layout,
    marker::PhantomData,
    ptr::{self, NonNull},
};

use snafu::OptionExt as _;

use crate::{
    error::{Result, SizeOverflowSnafu},
    pool::{BytePool, PoolConfig, PoolStats},
    size_class::ALIGN,
    system::{Global, SystemAllocator},
};

/// A pool handing out arrays of `T`.
///
/// `allocate(n)` requests `n * size_of::<T>()` bytes from the underlying
/// [`BytePool`], so small arrays are served from free lists and large ones
/// from the system allocator. Element types aligned more strictly than
/// [`ALIGN`] always go to the system allocator, since pooled blocks only
/// guarantee [`ALIGN`]-byte alignment.
///
/// Each `Pool` owns its free lists; [`rebind`](Self::rebind) yields a fresh
/// pool rather than sharing them.
///
/// # Examples
///
/// ```
/// use mempool::Pool;
///
/// let mut pool = Pool::<u32>::new();
/// let p = pool.allocate(4).unwrap();
/// unsafe {
///     for i in 0..4 {
///         Pool::<u32>::construct(p.add(i), i as u32 * 10);
///     }
///     assert_eq!(*p.add(3).as_ptr(), 30);
///     Pool::<u32>::destroy_range(p, p.add(4));
///     pool.deallocate(p, 4);
/// }
/// ```
#[derive(Debug)]
pub struct Pool<T, S = Global> {
    raw: BytePool<S>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for Pool<T, Global> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Pool<T, Global> {
    /// Creates an empty pool backed by the [`Global`] allocator.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_system(Global)
    }
}

impl<T, S> Pool<T, S> {
    const POOLED: bool = align_of::<T>() <= ALIGN;

    /// Creates an empty pool that draws chunks from `system`.
    #[must_use]
    pub const fn with_system(system: S) -> Self {
        Self::with_config(system, PoolConfig::new())
    }

    /// Creates an empty pool with the given system allocator and tunables.
    #[must_use]
    pub const fn with_config(system: S, config: PoolConfig) -> Self {
        Self {
            raw: BytePool::with_config(system, config),
            _marker: PhantomData,
        }
    }

    /// Returns the tunables this pool was created with.
    #[must_use]
    pub const fn config(&self) -> PoolConfig {
        self.raw.config()
    }

    /// Returns the system allocator backing this pool.
    #[must_use]
    pub const fn system(&self) -> &S {
        self.raw.system()
    }

    /// Takes a snapshot of the pool's counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.raw.stats()
    }

    /// Largest element count whose byte size fits in `usize`.
    #[must_use]
    pub const fn max_size() -> usize {
        match usize::MAX.checked_div(size_of::<T>()) {
            Some(max) => max,
            None => usize::MAX,
        }
    }

    /// Moves `value` into the uninitialized slot at `p`.
    ///
    /// # Safety
    ///
    /// `p` must be valid for writes and properly aligned. Any value already
    /// at `p` is overwritten without being dropped.
    pub unsafe fn construct(p: NonNull<T>, value: T) {
        unsafe { p.write(value) }
    }

    /// Drops the value at `p` in place, leaving the slot uninitialized.
    ///
    /// # Safety
    ///
    /// `p` must point to an initialized `T` that is not used afterwards.
    pub unsafe fn destroy(p: NonNull<T>) {
        unsafe { ptr::drop_in_place(p.as_ptr()) }
    }

    /// Drops every value in `first..last` in place.
    ///
    /// # Safety
    ///
    /// `first` and `last` must belong to the same allocation with
    /// `first <= last`, and every slot in between must hold an initialized
    /// `T` that is not used afterwards.
    pub unsafe fn destroy_range(first: NonNull<T>, last: NonNull<T>) {
        let mut cur = first;
        while cur < last {
            unsafe {
                Self::destroy(cur);
                cur = cur.add(1);
            }
        }
    }

    /// Returns the address of `value`.
    #[must_use]
    pub fn address(value: &mut T) -> NonNull<T> {
        NonNull::from(value)
    }

    /// Returns the address of `value` as a read-only pointer.
    #[must_use]
    pub const fn address_const(value: &T) -> *const T {
        ptr::from_ref(value)
    }

    /// Returns a new, empty pool for elements of type `U`.
    ///
    /// The new pool uses the same configuration and a clone of the system
    /// allocator handle. It shares no free lists with `self`.
    #[must_use]
    pub fn rebind<U>(&self) -> Pool<U, S>
    where
        S: Clone,
    {
        Pool::with_config(self.system().clone(), self.config())
    }

    fn layout(count: usize) -> Result<Layout> {
        Layout::array::<T>(count).ok().context(SizeOverflowSnafu {
            count,
            width: size_of::<T>(),
        })
    }
}

impl<T, S> Pool<T, S>
where
    S: SystemAllocator,
{
    /// Allocates uninitialized room for `count` elements.
    ///
    /// A zero-byte request (`count == 0` or a zero-sized `T`) returns a
    /// dangling pointer without touching the pool.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::SizeOverflow`](crate::AllocError::SizeOverflow)
    /// if `count` elements do not fit in a layout, and
    /// [`AllocError::SystemExhausted`](crate::AllocError::SystemExhausted)
    /// if no memory can be obtained.
    pub fn allocate(&mut self, count: usize) -> Result<NonNull<T>> {
        let layout = Self::layout(count)?;
        if layout.size() == 0 {
            return Ok(NonNull::dangling());
        }
        let block = if Self::POOLED {
            self.raw.allocate(layout.size())?
        } else {
            self.raw.allocate_system(layout)?
        };
        Ok(block.cast())
    }

    /// Same as [`allocate`](Self::allocate); the locality hint is ignored.
    pub fn allocate_with_hint(
        &mut self,
        count: usize,
        _hint: Option<NonNull<T>>,
    ) -> Result<NonNull<T>> {
        self.allocate(count)
    }

    /// Returns room for `count` elements to the pool.
    ///
    /// Values still stored there are not dropped; call
    /// [`Pool::destroy_range`] first if needed.
    ///
    /// # Safety
    ///
    /// `p` must have been returned by [`allocate`](Self::allocate) on this
    /// pool with the same `count`, must not have been deallocated already,
    /// and must not be used afterwards.
    pub unsafe fn deallocate(&mut self, p: NonNull<T>, count: usize) {
        let Ok(layout) = Self::layout(count) else {
            unreachable!("deallocating {count} elements that could never be allocated");
        };
        if layout.size() == 0 {
            return;
        }
        unsafe {
            if Self::POOLED {
                self.raw.deallocate(p.cast(), layout.size());
            } else {
                self.raw.deallocate_system(p.cast(), layout);
            }
        }
    }
}
