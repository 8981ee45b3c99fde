//! A fixed-size block allocator with built-in debugging aids for detecting memory misuse.
//!
//! This crate provides [`ObjectAllocator`], which serves blocks of one fixed size from large
//! pages obtained from the system allocator. Released blocks are kept on a free list and
//! reused, so that steady-state allocation never touches the system allocator.
//!
//! # Key Features
//!
//! - **Fixed-size blocks**: Every block has the same size, configured at creation time
//! - **Page-based growth**: Pages are created on demand, optionally up to a limit
//! - **LIFO reuse**: The most recently released block is handed out next
//! - **Guard bytes**: Optional padding around every payload detects buffer overruns
//! - **Usage headers**: Optional per-block flags speed up leak dumps and double release checks
//! - **Debug mode**: Byte patterns in payloads and full validation of every release
//! - **Pass-through mode**: Forwards every request to the system allocator, for comparison
//! - **Statistics**: Counters for pages, blocks and operations, including a high-water mark
//!
//! # Memory layout
//!
//! Every page starts with a link field holding the address of the page created before it,
//! followed by a run of alignment bytes and then the blocks. Each block consists of:
//!
//! ```text
//! [header][guard][payload][guard][alignment]
//! ```
//!
//! The alignment bytes are omitted after the last block of a page. Non-payload bytes are
//! stamped with [`PAD_PATTERN`] (guards) and [`ALIGN_PATTERN`] (alignment) when the page is
//! created. In debug mode, payloads are additionally stamped with [`UNALLOCATED_PATTERN`],
//! [`ALLOCATED_PATTERN`] and [`FREED_PATTERN`] as they move through their lifecycle.
//!
//! # Examples
//!
//! ```rust
//! use new_zealand::nz;
//! use object_allocator::ObjectAllocator;
//!
//! let mut allocator = ObjectAllocator::builder()
//!     .object_size(32)
//!     .objects_per_page(nz!(16))
//!     .max_pages(0) // Unbounded.
//!     .build()
//!     .unwrap();
//!
//! let block = allocator.allocate().unwrap();
//! assert_eq!(allocator.stats().objects_in_use(), 1);
//!
//! // SAFETY: The block came from this allocator and has not been released yet.
//! unsafe { allocator.release(block) }.unwrap();
//!
//! // The released block is the next one handed out.
//! assert_eq!(allocator.allocate().unwrap(), block);
//! ```
//!
//! ## Detecting corruption
//!
//! ```rust
//! use object_allocator::{Error, GuardSide, ObjectAllocator};
//!
//! let mut allocator = ObjectAllocator::builder()
//!     .object_size(8)
//!     .pad_bytes(4)
//!     .debug(true)
//!     .build()
//!     .unwrap();
//!
//! let block = allocator.allocate().unwrap();
//!
//! // Overrun the payload by one byte.
//! // SAFETY: The guard bytes after the payload belong to the allocator's page.
//! unsafe { block.add(8).write(0) };
//!
//! let mut corrupted = Vec::new();
//! assert_eq!(allocator.scan_all_pages(|ptr, _| corrupted.push(ptr)), 1);
//! assert_eq!(corrupted, vec![block]);
//!
//! // SAFETY: Debug mode validates the release before touching any memory.
//! let result = unsafe { allocator.release(block) };
//! assert!(matches!(
//!     result,
//!     Err(Error::CorruptedBlock {
//!         side: GuardSide::After,
//!         ..
//!     })
//! ));
//! ```

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod allocator;
mod block_handle;
mod builder;
mod config;
mod drop_policy;
mod error;
mod free_list;
mod layout;
mod page;
mod page_store;
mod pattern;
mod stats;
mod validator;

pub use allocator::ObjectAllocator;
pub(crate) use block_handle::*;
pub use builder::ObjectAllocatorBuilder;
pub use config::Config;
pub use drop_policy::*;
pub use error::*;
pub(crate) use free_list::*;
pub(crate) use layout::*;
pub(crate) use page::*;
pub(crate) use page_store::*;
pub use pattern::*;
pub use stats::Stats;
