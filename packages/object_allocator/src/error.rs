use std::fmt;

use thiserror::Error;

/// Errors that can occur when allocating or releasing blocks.
///
/// Every error is fatal to the single operation that raised it. The allocator never retries
/// internally and its state is left unchanged when a release is rejected.
///
/// Addresses are reported as plain integers, as the pointers they came from may not point to
/// anything the caller is allowed to touch.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The system allocator could not satisfy a request for a new page or, in pass-through
    /// mode, for a single object.
    #[error("no system memory available for a request of {size} bytes")]
    OutOfMemory {
        /// The size of the request that could not be satisfied.
        size: usize,
    },

    /// An allocation was requested while the allocator had no free blocks and already owned
    /// the configured maximum number of pages.
    #[error("the maximum number of pages ({max_pages}) has been allocated")]
    PageLimitReached {
        /// The configured page limit.
        max_pages: usize,
    },

    /// A release targeted a block that is already free.
    #[error("block at {address:#x} has already been released")]
    MultipleFree {
        /// Address of the released pointer.
        address: usize,
    },

    /// A release targeted a pointer that is not within any page owned by the allocator.
    #[error("address {address:#x} is not on any page owned by the allocator")]
    BadAddress {
        /// Address of the released pointer.
        address: usize,
    },

    /// A release targeted a pointer within a page that does not point to the start of
    /// a block's payload.
    #[error("address {address:#x} is not on a block boundary")]
    BadBoundary {
        /// Address of the released pointer.
        address: usize,
    },

    /// The guard bytes adjacent to a block's payload have been overwritten.
    #[error("guard bytes {side} the block at {address:#x} have been overwritten")]
    CorruptedBlock {
        /// Address of the payload whose guard bytes are damaged.
        address: usize,

        /// Which of the two guard regions was found damaged first.
        side: GuardSide,
    },
}

/// Identifies one of the two guard regions that flank every payload.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum GuardSide {
    /// The guard bytes immediately preceding the payload.
    Before,

    /// The guard bytes immediately following the payload.
    After,
}

impl fmt::Display for GuardSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before => f.write_str("before"),
            Self::After => f.write_str("after"),
        }
    }
}

/// A specialized `Result` type for allocator operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug, Copy);
    assert_impl_all!(GuardSide: Send, Sync, Debug, Copy);

    #[test]
    fn messages_include_address_in_hex() {
        let error = Error::BadBoundary { address: 0x1234 };
        assert_eq!(error.to_string(), "address 0x1234 is not on a block boundary");

        let error = Error::MultipleFree { address: 0xff };
        assert!(error.to_string().contains("0xff"));
    }

    #[test]
    fn corrupted_block_message_names_side() {
        let before = Error::CorruptedBlock {
            address: 0x10,
            side: GuardSide::Before,
        };
        let after = Error::CorruptedBlock {
            address: 0x10,
            side: GuardSide::After,
        };

        assert_eq!(
            before.to_string(),
            "guard bytes before the block at 0x10 have been overwritten"
        );
        assert_eq!(
            after.to_string(),
            "guard bytes after the block at 0x10 have been overwritten"
        );
    }

    #[test]
    fn capacity_errors_report_sizes() {
        assert!(
            Error::PageLimitReached { max_pages: 3 }
                .to_string()
                .contains('3')
        );
        assert!(
            Error::OutOfMemory { size: 4096 }
                .to_string()
                .contains("4096")
        );
    }
}
