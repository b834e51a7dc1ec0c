//! A second-level memory pool allocator.
//!
//! The pools in this crate sit between code that makes many small
//! allocations and a coarse-grained system allocator. They cut per-allocation
//! overhead in two ways:
//!
//! - requests of up to [`MAX_BYTES`](size_class::MAX_BYTES) bytes are rounded
//!   up to one of sixteen size classes and served from per-class free lists;
//! - memory is taken from the system allocator in large chunks, carved into
//!   blocks on demand, and recycled internally instead of being released.
//!
//! Larger requests are passed straight through to the system allocator.
//!
//! # Available Pools
//!
//! ## [`BytePool`]
//!
//! Serves raw byte blocks. `allocate(n)` returns at least `n` bytes aligned
//! to [`ALIGN`](size_class::ALIGN); `deallocate(p, n)` must be given the
//! same size.
//!
//! ## [`Pool<T>`](Pool)
//!
//! Serves arrays of `T`, counted in elements, and carries the usual
//! allocator helpers: [`construct`](Pool::construct),
//! [`destroy`](Pool::destroy), [`address`](Pool::address),
//! [`max_size`](Pool::max_size) and [`rebind`](Pool::rebind).
//!
//! # Usage Examples
//!
//! ```rust
//! use mempool::{BytePool, size_class::SizeClass};
//!
//! let mut pool = BytePool::new();
//!
//! // 1 byte and 9 bytes land in the 8- and 16-byte classes
//! let a = pool.allocate(1).unwrap();
//! let b = pool.allocate(9).unwrap();
//! assert_eq!(SizeClass::for_size(9).unwrap().width(), 16);
//!
//! // 129 bytes bypass the free lists entirely
//! let big = pool.allocate(129).unwrap();
//!
//! unsafe {
//!     pool.deallocate(a, 1);
//!     pool.deallocate(b, 9);
//!     pool.deallocate(big, 129);
//! }
//! ```
//!
//! Capping the memory a pool may draw from the system:
//!
//! ```rust
//! use mempool::{BytePool, system::{Bounded, Global}};
//!
//! let mut pool = BytePool::with_system(Bounded::new(Global, 4096));
//! assert!(pool.allocate(64).is_ok());
//! assert!(pool.allocate(4096).unwrap_err().is_system_exhausted());
//! ```
//!
//! # Design Considerations
//!
//! ## Memory Safety
//!
//! Deallocation is `unsafe`. The pools keep no per-block metadata, so they
//! cannot detect a foreign pointer, a double free, or a size that differs
//! from the one used to allocate. Callers must ensure none of these happen.
//!
//! ## Memory Retention
//!
//! Chunk memory is never handed back to the system allocator, even when a
//! pool is dropped; freed blocks only return to their free list.
//!
//! ## Thread Safety
//!
//! The pools are `Send` (when their system allocator is) but not `Sync`.
//! Sharing one between threads requires external synchronization.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

pub use self::{
    error::{AllocError, Result},
    pool::{BytePool, PoolConfig, PoolStats},
    typed::Pool,
};

mod chunk;
mod error;
pub mod free_list;
mod pool;
pub mod size_class;
pub mod system;
mod typed;
