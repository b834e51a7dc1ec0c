//! Intrusive free lists, one per size class.
//!
//! A free block stores the link to the next free block of the same class in
//! its own leading word, so the bank keeps no memory of its own beyond the
//! list heads.
//!
//! ```text
//! heads[i] ──► ┌──────┬─────────┐   ┌──────┬─────────┐
//!              │ next ├─ ... ───┼──►│ null │   ...   │
//!              └──────┴─────────┘   └──────┴─────────┘
//!              (i + 1) * ALIGN bytes
//! ```
//!
//! The link is only meaningful while the block sits on a list. Once a block
//! is popped the whole width belongs to the caller again.

use core::ptr::{self, NonNull};

use crate::size_class::{NUM_CLASSES, SizeClass};

/// Link word overlaid on the first bytes of a free block.
#[repr(C)]
struct FreeBlock {
    next: *mut Self,
}

impl FreeBlock {
    /// Reinterprets the start of a raw block as a link.
    ///
    /// # Safety
    ///
    /// `block` must be [`ALIGN`](crate::size_class::ALIGN)-aligned and point
    /// to at least one writable class width owned by the free-list bank.
    unsafe fn from_block(block: *mut u8) -> *mut Self {
        #[expect(clippy::cast_ptr_alignment)]
        let node = block.cast::<Self>();
        debug_assert!(!node.is_null(), "free block must not be null");
        debug_assert!(node.is_aligned(), "free block must be aligned for a link");
        node
    }
}

/// Heads of the per-class free lists.
///
/// Lists are LIFO stacks without a length counter. The bank never checks
/// that a pushed block really is as wide as its class; callers guarantee it.
#[derive(Debug)]
pub struct FreeListBank {
    heads: [*mut FreeBlock; NUM_CLASSES],
}

unsafe impl Send for FreeListBank {}

impl Default for FreeListBank {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeListBank {
    /// Creates a bank with every list empty.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            heads: [ptr::null_mut(); NUM_CLASSES],
        }
    }

    /// Returns `true` if `class` has no idle blocks.
    #[must_use]
    pub fn is_empty(&self, class: SizeClass) -> bool {
        self.heads[class.index()].is_null()
    }

    /// Counts the blocks on `class`'s list by walking it.
    #[must_use]
    pub fn len(&self, class: SizeClass) -> usize {
        let mut count = 0;
        let mut node = self.heads[class.index()];
        while !node.is_null() {
            count += 1;
            node = unsafe { (*node).next };
        }
        count
    }

    /// Detaches the most recently pushed block of `class`.
    pub fn pop(&mut self, class: SizeClass) -> Option<NonNull<u8>> {
        let head = &mut self.heads[class.index()];
        let node = NonNull::new(*head)?;
        unsafe {
            *head = (*node.as_ptr()).next;
        }
        Some(node.cast())
    }

    /// Pushes `block` onto `class`'s list.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `block` is [`ALIGN`](crate::size_class::ALIGN)-aligned and points to
    ///   `class.width()` writable bytes
    /// - the caller gives up all access to the block
    /// - the block is not already on any list of this bank
    pub unsafe fn push(&mut self, class: SizeClass, block: NonNull<u8>) {
        let head = &mut self.heads[class.index()];
        unsafe {
            let node = FreeBlock::from_block(block.as_ptr());
            node.write(FreeBlock { next: *head });
            *head = node;
        }
    }

    /// Links `count` adjacent blocks starting at `start` onto `class`'s list.
    ///
    /// The blocks end up in address order, the lowest one at the head, with
    /// the last one pointing at whatever the list held before.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `start..start + count * class.width()` is
    /// writable, [`ALIGN`](crate::size_class::ALIGN)-aligned memory that is
    /// not in use anywhere else, in addition to the requirements of
    /// [`push`](Self::push) for each block.
    pub unsafe fn thread(&mut self, class: SizeClass, start: NonNull<u8>, count: usize) {
        let width = class.width();
        let head = &mut self.heads[class.index()];
        let mut next = *head;
        for i in (0..count).rev() {
            unsafe {
                let node = FreeBlock::from_block(start.as_ptr().add(i * width));
                node.write(FreeBlock { next });
                next = node;
            }
        }
        *head = next;
    }
}
