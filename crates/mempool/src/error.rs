use derive_more::IsVariant;
use snafu::{Location, Snafu};

/// Errors reported by the pool allocators.
///
/// Routing an oversized request to the system allocator is not an error, and
/// misuse of [`deallocate`](crate::BytePool::deallocate) cannot be detected,
/// so neither has a variant here.
#[derive(Debug, Snafu, IsVariant)]
#[snafu(visibility(pub(crate)))]
pub enum AllocError {
    /// The system allocator refused a request, and no free-list capacity
    /// could be scavenged in its place.
    #[snafu(display("system allocator could not supply {bytes} bytes"))]
    SystemExhausted {
        bytes: usize,
        #[snafu(implicit)]
        location: Location,
    },
    /// `count` elements of `width` bytes do not fit in a valid layout.
    #[snafu(display("allocation of {count} elements of {width} bytes overflows"))]
    SizeOverflow {
        count: usize,
        width: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Result type returned by the pool allocators.
pub type Result<T, E = AllocError> = core::result::Result<T, E>;
