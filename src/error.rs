//! Error taxonomy for the storage substrate.
//!
//! Every failure is local to the operation that raised it: a failed buffer
//! or slab request leaves the container/pool in its prior valid state, so
//! callers may retry or give up without repair work. Retry policy itself
//! belongs to the tree/transaction layer above this crate.

use thiserror::Error as ThisError;

/// Errors raised by the segmented array and the pool allocation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
#[non_exhaustive]
pub enum Error {
    /// The system allocator refused a slab request.
    ///
    /// The reference implementation treats this as fatal and aborts; here it
    /// is propagated as a recoverable error so the host can decide. The
    /// segmented array still follows the reference's fatal choice, since its
    /// buffers come from the global allocator (which aborts on OOM).
    #[error("system allocator refused a request for {bytes} bytes")]
    AllocationFailure {
        /// Size of the refused request.
        bytes: usize,
    },

    /// An element index at or beyond the current logical size.
    #[error("index {index} out of bounds for length {size}")]
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// The logical size at the time of the access.
        size: usize,
    },

    /// `front`/`back` access on an empty container.
    #[error("access into an empty container")]
    EmptyContainer,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_the_failing_values() {
        let err = Error::AllocationFailure { bytes: 8 << 20 };
        assert_eq!(
            err.to_string(),
            "system allocator refused a request for 8388608 bytes"
        );

        let err = Error::IndexOutOfBounds { index: 12, size: 3 };
        assert_eq!(err.to_string(), "index 12 out of bounds for length 3");

        assert_eq!(
            Error::EmptyContainer.to_string(),
            "access into an empty container"
        );
    }

    #[test]
    fn errors_compare_by_payload() {
        assert_eq!(
            Error::IndexOutOfBounds { index: 1, size: 0 },
            Error::IndexOutOfBounds { index: 1, size: 0 }
        );
        assert_ne!(
            Error::IndexOutOfBounds { index: 1, size: 0 },
            Error::IndexOutOfBounds { index: 2, size: 0 }
        );
        assert_ne!(
            Error::AllocationFailure { bytes: 64 },
            Error::EmptyContainer
        );
    }
}
