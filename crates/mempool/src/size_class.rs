//! Size classes for pooled allocations.
//!
//! Every request of `1..=MAX_BYTES` bytes is served by exactly one of
//! [`NUM_CLASSES`] fixed-width buckets. Widths are multiples of [`ALIGN`], so
//! class `i` hands out blocks of `(i + 1) * ALIGN` bytes.
//!
//! ```text
//! request  1..=8   9..=16  17..=24  ...  121..=128
//! class       0       1       2     ...     15
//! width       8      16      24     ...    128
//! ```

use derive_more::Display;

/// Byte boundary every size-class width is rounded to.
pub const ALIGN: usize = 8;

/// Largest request served from the free lists.
///
/// Anything wider goes straight to the system allocator.
pub const MAX_BYTES: usize = 128;

/// Number of size classes (and free lists).
pub const NUM_CLASSES: usize = MAX_BYTES / ALIGN;

/// Blocks carved per refill when the chunk allocator has room for all of them.
pub const DEFAULT_BATCH: usize = 20;

const _: () = assert!(ALIGN.is_power_of_two());
const _: () = assert!(MAX_BYTES.is_multiple_of(ALIGN));
// a free block stores its link in its own first word
const _: () = assert!(size_of::<*mut u8>() <= ALIGN);
const _: () = assert!(align_of::<*mut u8>() <= ALIGN);

/// Rounds `bytes` up to the next multiple of [`ALIGN`].
///
/// # Examples
///
/// ```
/// # use mempool::size_class::round_up;
/// assert_eq!(round_up(1), 8);
/// assert_eq!(round_up(8), 8);
/// assert_eq!(round_up(9), 16);
/// ```
#[must_use]
pub const fn round_up(bytes: usize) -> usize {
    (bytes + ALIGN - 1) & !(ALIGN - 1)
}

/// Returns the free-list index serving `bytes`.
///
/// The caller guarantees `1 <= bytes <= MAX_BYTES`; no range check is made.
#[must_use]
pub const fn index_freelist(bytes: usize) -> usize {
    (bytes + ALIGN - 1) / ALIGN - 1
}

/// One of the [`NUM_CLASSES`] pooled size classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display("class {index} ({} bytes)", (index + 1) * ALIGN)]
pub struct SizeClass {
    index: usize,
}

impl SizeClass {
    /// Smallest class, holding [`ALIGN`]-byte blocks.
    pub const MIN: Self = Self { index: 0 };

    /// Widest class, holding [`MAX_BYTES`]-byte blocks.
    pub const MAX: Self = Self {
        index: NUM_CLASSES - 1,
    };

    /// Returns the class serving a request of `bytes` bytes.
    ///
    /// Returns `None` for zero-byte requests and for requests wider than
    /// [`MAX_BYTES`], which are not pooled.
    ///
    /// # Examples
    ///
    /// ```
    /// # use mempool::size_class::SizeClass;
    /// assert_eq!(SizeClass::for_size(1).unwrap().index(), 0);
    /// assert_eq!(SizeClass::for_size(9).unwrap().width(), 16);
    /// assert!(SizeClass::for_size(129).is_none());
    /// ```
    #[must_use]
    pub const fn for_size(bytes: usize) -> Option<Self> {
        if bytes == 0 || bytes > MAX_BYTES {
            return None;
        }
        Some(Self {
            index: index_freelist(bytes),
        })
    }

    /// Returns the class with the given free-list index, if it exists.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < NUM_CLASSES {
            Some(Self { index })
        } else {
            None
        }
    }

    /// Position of this class in the free-list bank, `0..NUM_CLASSES`.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }

    /// Width in bytes of every block in this class.
    #[must_use]
    pub const fn width(self) -> usize {
        (self.index + 1) * ALIGN
    }

    /// Iterates over this class and every wider one, narrowest first.
    pub fn iter_from(self) -> impl Iterator<Item = Self> {
        (self.index..NUM_CLASSES).map(|index| Self { index })
    }

    /// Iterates over all classes, narrowest first.
    pub fn all() -> impl Iterator<Item = Self> {
        Self::MIN.iter_from()
    }
}
