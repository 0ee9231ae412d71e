use std::alloc::Layout;

use thiserror::Error;

/// Errors reported by the fallible growth operations of
/// [`OpaqueVec`][crate::OpaqueVec], such as [`try_reserve()`][crate::OpaqueVec::try_reserve].
///
/// The infallible operations do not report these conditions. They panic on capacity
/// overflow and abort the process via [`std::alloc::handle_alloc_error`] when the
/// allocator cannot satisfy a request.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The requested capacity does not fit in the address space.
    #[error("requested capacity exceeds size of virtual memory")]
    CapacityOverflow,

    /// The allocator returned a null pointer for the request.
    #[error("memory allocation of {} bytes (align {}) failed", .layout.size(), .layout.align())]
    AllocationFailed {
        /// The layout of the allocation that could not be satisfied.
        layout: Layout,
    },
}

/// A specialized `Result` type for `OpaqueVec` growth operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn allocation_failed_mentions_layout() {
        let error = Error::AllocationFailed {
            layout: Layout::from_size_align(64, 8).unwrap(),
        };

        let message = error.to_string();
        assert!(message.contains("64 bytes"));
        assert!(message.contains("align 8"));
    }

    #[test]
    fn capacity_overflow_is_error() {
        let result: Result<()> = Err(Error::CapacityOverflow);
        assert!(matches!(result, Err(Error::CapacityOverflow)));
    }
}
