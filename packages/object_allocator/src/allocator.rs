use std::alloc::{Layout, dealloc};
use std::num::NonZero;
use std::ptr::NonNull;
use std::thread;

use tracing::{trace, warn};

use crate::{
    ALLOCATED_PATTERN, BlockHandle, BlockLayout, Config, DropPolicy, Error, FREED_PATTERN,
    FreeList, ObjectAllocatorBuilder, PageStore, Result, Stats, acquire, validator,
};

/// Usage flag value of a block that is lent out to a client.
const IN_USE_FLAG: u8 = 1;

/// Usage flag value of a block that is on the free list.
const FREE_FLAG: u8 = 0;

/// A pool of fixed-size memory blocks, served from large pages obtained from the system
/// allocator.
///
/// Every block has the same size, configured at creation time. Blocks are handed out as raw
/// pointers to exactly `object_size` usable bytes and remain valid until they are released
/// or the allocator is dropped.
///
/// # Debugging aids
///
/// The allocator can surround every payload with guard bytes and precede it with a usage
/// header. In debug mode, payloads are stamped with recognizable byte patterns and every
/// release is validated, detecting double releases, foreign pointers, misaligned pointers
/// and writes past either end of a payload. [`scan_all_pages()`](Self::scan_all_pages) checks
/// the guard bytes of every block at any time.
///
/// # Pass-through mode
///
/// In pass-through mode, every request is forwarded to the system allocator. No pages are
/// created and the statistics still track allocations and releases.
///
/// # Examples
///
/// ```
/// use object_allocator::{Error, ObjectAllocator};
///
/// let mut allocator = ObjectAllocator::builder()
///     .layout_of::<u64>()
///     .debug(true)
///     .pad_bytes(2)
///     .build()
///     .unwrap();
///
/// let block = allocator.allocate().unwrap();
///
/// // SAFETY: The block is valid for writes of 8 bytes. Blocks carry no alignment guarantee,
/// // hence the unaligned write.
/// unsafe { block.cast::<u64>().write_unaligned(42) };
///
/// // SAFETY: The block came from this allocator and has not been released yet.
/// unsafe { allocator.release(block) }.unwrap();
///
/// // Debug mode catches the second release.
/// // SAFETY: Debug mode validates the release before touching any memory.
/// let result = unsafe { allocator.release(block) };
/// assert!(matches!(result, Err(Error::MultipleFree { .. })));
/// ```
///
/// # Thread safety
///
/// The allocator is thread-mobile ([`Send`]) and can be moved between threads, but it is not
/// thread-safe ([`Sync`]). Shared use requires external synchronization that serializes all
/// calls, such as a mutex guarding the whole allocator.
#[derive(Debug)]
pub struct ObjectAllocator {
    config: Config,

    /// Owns all pages. `None` in pass-through mode, which never needs a page layout.
    pages: Option<PageStore>,

    free_list: FreeList,

    stats: Stats,

    drop_policy: DropPolicy,
}

impl ObjectAllocator {
    /// Creates a builder for configuring and constructing an [`ObjectAllocator`].
    ///
    /// You must specify an object size using either `.object_size()` or `.layout_of::<T>()`
    /// before calling `.build()`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use object_allocator::ObjectAllocator;
    ///
    /// let allocator = ObjectAllocator::builder().object_size(24).build().unwrap();
    ///
    /// assert_eq!(allocator.config().object_size(), 24);
    /// assert_eq!(allocator.stats().objects_in_use(), 0);
    /// ```
    #[inline]
    pub fn builder() -> ObjectAllocatorBuilder {
        ObjectAllocatorBuilder::new()
    }

    /// Creates a new allocator with the specified configuration, including its first page
    /// unless in pass-through mode.
    pub(crate) fn new_inner(config: Config, drop_policy: DropPolicy) -> Result<Self> {
        if config.pass_through() {
            return Ok(Self {
                config,
                pages: None,
                free_list: FreeList::new(),
                stats: Stats::new(config.object_size(), 0),
                drop_policy,
            });
        }

        let block_layout = BlockLayout::new(&config)?;

        let mut allocator = Self {
            config,
            pages: Some(PageStore::new(block_layout)),
            free_list: FreeList::new(),
            stats: Stats::new(config.object_size(), block_layout.page_size()),
            drop_policy,
        };

        allocator.add_page()?;

        Ok(allocator)
    }

    /// Hands out a block of exactly `object_size` usable bytes.
    ///
    /// The most recently released block is reused first. A new page is created when no
    /// block is free. In debug mode, the payload is filled with [`ALLOCATED_PATTERN`];
    /// otherwise its contents are unspecified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageLimitReached`] if no block is free and the allocator already owns
    /// the maximum number of pages. Returns [`Error::OutOfMemory`] if the system allocator
    /// cannot provide a new page (or, in pass-through mode, the block itself).
    ///
    /// # Example
    ///
    /// ```rust
    /// use new_zealand::nz;
    /// use object_allocator::{Error, ObjectAllocator};
    ///
    /// let mut allocator = ObjectAllocator::builder()
    ///     .object_size(16)
    ///     .objects_per_page(nz!(2))
    ///     .max_pages(1)
    ///     .build()
    ///     .unwrap();
    ///
    /// let _a = allocator.allocate().unwrap();
    /// let _b = allocator.allocate().unwrap();
    ///
    /// assert_eq!(
    ///     allocator.allocate(),
    ///     Err(Error::PageLimitReached { max_pages: 1 })
    /// );
    /// ```
    pub fn allocate(&mut self) -> Result<NonNull<u8>> {
        if self.config.pass_through() {
            return self.allocate_from_system();
        }

        if self.free_list.is_empty() {
            if !self.config.allows_page(self.pooled_pages().len()) {
                return Err(Error::PageLimitReached {
                    max_pages: self.config.max_pages().map_or(0, NonZero::get),
                });
            }

            self.add_page()?;
        }

        let handle = self
            .free_list
            .pop()
            .expect("a new page was just added if the free list was empty");

        let debug_on = self.config.debug_on();
        let pages = self.pooled_pages_mut();

        if debug_on {
            pages.stamp_payload(handle, ALLOCATED_PATTERN);
        }

        pages.set_usage_flag(handle, IN_USE_FLAG);
        let ptr = pages.payload_ptr(handle);

        self.stats.record_allocation(true);
        trace!(address = ptr.addr().get(), "allocated block");

        Ok(ptr)
    }

    /// Returns a block to the allocator.
    ///
    /// In debug mode, the release is validated first and the payload is then filled with
    /// [`FREED_PATTERN`]. A rejected release leaves the allocator unchanged.
    ///
    /// # Errors
    ///
    /// Only in debug mode: returns [`Error::MultipleFree`] if the block is already free,
    /// [`Error::BadAddress`] if the pointer is not within any page, [`Error::BadBoundary`]
    /// if the pointer is not at the start of a payload and [`Error::CorruptedBlock`] if
    /// the guard bytes of the block have been overwritten.
    ///
    /// # Panics
    ///
    /// Outside debug mode, panics if the pointer does not resolve to a block of this
    /// allocator. This is a courtesy, not a guarantee - see the safety requirements.
    ///
    /// # Safety
    ///
    /// Unless debug mode is on, the caller must guarantee that `ptr` was returned by
    /// [`allocate()`](Self::allocate) on this allocator and has not been released since.
    ///
    /// In pass-through mode this requirement applies even in debug mode, as the system
    /// allocator performs no validation.
    ///
    /// In all modes, the caller must not use the block after releasing it.
    pub unsafe fn release(&mut self, ptr: NonNull<u8>) -> Result<()> {
        if self.config.pass_through() {
            // SAFETY: Forwarding safety requirements to the caller.
            unsafe {
                self.release_to_system(ptr);
            }
            return Ok(());
        }

        let debug_on = self.config.debug_on();
        let pages = self
            .pages
            .as_mut()
            .expect("pooled allocators always own a page store");

        let handle = if debug_on {
            validator::validate(pages, &self.free_list, ptr).inspect_err(|e| {
                warn!(error = %e, "rejected release");
            })?
        } else {
            validator::locate(pages, ptr.addr().get())
                .unwrap_or_else(|e| panic!("released pointer is not a block of this allocator: {e}"))
        };

        if debug_on {
            pages.stamp_payload(handle, FREED_PATTERN);
        }

        pages.set_usage_flag(handle, FREE_FLAG);
        self.free_list.push(handle);
        self.stats.record_release(true);

        trace!(address = ptr.addr().get(), "released block");

        Ok(())
    }

    /// Checks whether a pointer could be released without error, without releasing it.
    ///
    /// This performs the same checks as a release in debug mode, regardless of whether
    /// debug mode is on.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`release()`](Self::release) in debug mode. In pass-through
    /// mode there are no pages, so every pointer is reported as [`Error::BadAddress`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use object_allocator::{Error, ObjectAllocator};
    ///
    /// let mut allocator = ObjectAllocator::builder().object_size(16).build().unwrap();
    /// let block = allocator.allocate().unwrap();
    ///
    /// assert_eq!(allocator.validate_address(block), Ok(()));
    ///
    /// // SAFETY: We never dereference this pointer, it is only validated.
    /// let inside = unsafe { block.add(1) };
    /// assert!(matches!(
    ///     allocator.validate_address(inside),
    ///     Err(Error::BadBoundary { .. })
    /// ));
    /// ```
    pub fn validate_address(&self, ptr: NonNull<u8>) -> Result<()> {
        let Some(pages) = &self.pages else {
            return Err(Error::BadAddress {
                address: ptr.addr().get(),
            });
        };

        validator::validate(pages, &self.free_list, ptr).map(|_| ())
    }

    /// Calls `visitor` with the payload pointer and size of every block currently in use and
    /// returns the number of such blocks.
    ///
    /// With usage headers, this reads one header byte per block. Without them, every block is
    /// looked up on the free list, which is considerably slower for large allocators.
    ///
    /// Blocks lent out in pass-through mode are not tracked and never visited.
    ///
    /// # Example
    ///
    /// ```rust
    /// use object_allocator::ObjectAllocator;
    ///
    /// let mut allocator = ObjectAllocator::builder().object_size(16).build().unwrap();
    /// let block = allocator.allocate().unwrap();
    ///
    /// let mut seen = Vec::new();
    /// let count = allocator.dump_in_use(|ptr, size| seen.push((ptr, size)));
    ///
    /// assert_eq!(count, 1);
    /// assert_eq!(seen, vec![(block, 16)]);
    /// ```
    pub fn dump_in_use(&self, mut visitor: impl FnMut(NonNull<u8>, usize)) -> usize {
        let Some(pages) = &self.pages else {
            return 0;
        };

        let object_size = self.config.object_size();
        let mut in_use: usize = 0;

        for handle in pages.blocks() {
            if !self.is_in_use(pages, handle) {
                continue;
            }

            // Cannot overflow because every block in use occupies virtual memory.
            in_use = in_use.wrapping_add(1);
            visitor(pages.payload_ptr(handle), object_size);
        }

        in_use
    }

    /// Checks the guard bytes of every block on every page, free or in use.
    ///
    /// Calls `visitor` with the payload pointer and size of every block whose guard bytes
    /// have been overwritten and returns the number of such blocks. This works regardless of
    /// debug mode, as guard bytes are always stamped.
    ///
    /// # Example
    ///
    /// ```rust
    /// use object_allocator::ObjectAllocator;
    ///
    /// let mut allocator = ObjectAllocator::builder()
    ///     .object_size(16)
    ///     .pad_bytes(1)
    ///     .build()
    ///     .unwrap();
    ///
    /// let block = allocator.allocate().unwrap();
    ///
    /// // Write one byte past the end of the payload.
    /// // SAFETY: The guard byte after the payload is part of the allocator's page.
    /// unsafe { block.add(16).write(0) };
    ///
    /// assert_eq!(allocator.scan_all_pages(|_, _| {}), 1);
    /// ```
    pub fn scan_all_pages(&self, visitor: impl FnMut(NonNull<u8>, usize)) -> usize {
        self.pages
            .as_ref()
            .map_or(0, |pages| validator::scan(pages, visitor))
    }

    /// Enables or disables debug mode.
    ///
    /// Guard bytes and usage headers are maintained regardless of debug mode, so validation is
    /// fully effective for blocks allocated before debug mode was enabled.
    #[inline]
    pub fn set_debug_mode(&mut self, enabled: bool) {
        self.config.debug_on = enabled;
    }

    /// The payload pointer of the block the next allocation will receive, if any block is
    /// free. Intended for tests and diagnostic tools.
    #[must_use]
    pub fn free_list_head(&self) -> Option<NonNull<u8>> {
        let handle = self.free_list.head()?;
        Some(self.pooled_pages().payload_ptr(handle))
    }

    /// The base pointer of the most recently created page, if any. The first machine word of
    /// every page holds the address of the page created before it. Intended for tests and
    /// diagnostic tools.
    #[must_use]
    pub fn page_list_head(&self) -> Option<NonNull<u8>> {
        self.pages
            .as_ref()
            .and_then(PageStore::head)
            .map(crate::Page::base_ptr)
    }

    /// The configuration of the allocator.
    #[must_use]
    #[inline]
    pub fn config(&self) -> Config {
        self.config
    }

    /// A snapshot of the allocator's counters.
    #[must_use]
    #[inline]
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// The page store of an allocator that is not in pass-through mode.
    fn pooled_pages(&self) -> &PageStore {
        self.pages
            .as_ref()
            .expect("pooled allocators always own a page store")
    }

    fn pooled_pages_mut(&mut self) -> &mut PageStore {
        self.pages
            .as_mut()
            .expect("pooled allocators always own a page store")
    }

    fn add_page(&mut self) -> Result<()> {
        let debug_on = self.config.debug_on();
        let page_index = self.pooled_pages_mut().create_page(debug_on)?;
        let objects_per_page = self.config.objects_per_page().get();

        self.free_list.push_page(page_index, objects_per_page);
        self.stats.record_page(objects_per_page);

        debug_assert_eq!(self.stats.free_objects(), self.free_list.len());
        debug_assert_eq!(self.stats.pages_in_use(), self.pooled_pages().len());

        Ok(())
    }

    fn is_in_use(&self, pages: &PageStore, handle: BlockHandle) -> bool {
        match pages.usage_flag(handle) {
            Some(flag) => flag == IN_USE_FLAG,
            None => !self.free_list.contains(handle),
        }
    }

    fn system_layout(&self) -> Result<Layout> {
        let size = self.config.object_size();

        // An object too large to describe is as unsatisfiable as one the system refuses.
        Layout::array::<u8>(size).map_err(|_layout_error| Error::OutOfMemory { size })
    }

    fn allocate_from_system(&mut self) -> Result<NonNull<u8>> {
        let ptr = acquire(self.system_layout()?)?;

        self.stats.record_allocation(false);
        trace!(address = ptr.addr().get(), "allocated block from system");

        Ok(ptr)
    }

    /// # Safety
    ///
    /// The pointer must have been returned by `allocate_from_system()` and not yet released.
    unsafe fn release_to_system(&mut self, ptr: NonNull<u8>) {
        let layout = self
            .system_layout()
            .expect("layout was valid when the block was allocated");

        // SAFETY: The caller guarantees the pointer came from allocate_from_system(),
        // which allocated it with this same layout.
        unsafe {
            dealloc(ptr.as_ptr(), layout);
        }

        self.stats.record_release(false);
        trace!(address = ptr.addr().get(), "released block to system");
    }
}

impl Drop for ObjectAllocator {
    fn drop(&mut self) {
        let in_use = self.stats.objects_in_use();

        if let Some(pages) = &mut self.pages {
            pages.teardown_all();
        }

        // We do this check at the end so we clean up the memory first. If we are already
        // panicking, we do not want to panic again because that will simply obscure whatever
        // the first panic was, leading to debug difficulties.
        if !thread::panicking() && matches!(self.drop_policy, DropPolicy::MustNotDropBlocks) {
            assert!(
                in_use == 0,
                "dropped an ObjectAllocator with {in_use} blocks in use - this is forbidden by DropPolicy::MustNotDropBlocks"
            );
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::arithmetic_side_effects,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::collections::HashSet;

    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::{PAD_PATTERN, UNALLOCATED_PATTERN};

    assert_impl_all!(ObjectAllocator: Send, std::fmt::Debug);
    assert_not_impl_any!(ObjectAllocator: Sync);

    fn read_bytes(ptr: NonNull<u8>, len: usize) -> Vec<u8> {
        (0..len).map(|i| unsafe { ptr.add(i).read() }).collect()
    }

    #[test]
    fn smoke_test() {
        let mut allocator = ObjectAllocator::builder()
            .object_size(16)
            .objects_per_page(nz!(4))
            .build()
            .unwrap();

        let a = allocator.allocate().unwrap();
        let b = allocator.allocate().unwrap();
        assert_ne!(a, b);

        unsafe {
            a.cast::<[u8; 16]>().write_unaligned([1; 16]);
            b.cast::<[u8; 16]>().write_unaligned([2; 16]);
        }

        assert_eq!(read_bytes(a, 16), vec![1; 16]);
        assert_eq!(read_bytes(b, 16), vec![2; 16]);

        unsafe { allocator.release(a) }.unwrap();
        unsafe { allocator.release(b) }.unwrap();

        assert_eq!(allocator.stats().objects_in_use(), 0);
        assert_eq!(allocator.stats().free_objects(), 4);
    }

    #[test]
    fn blocks_do_not_overlap() {
        let mut allocator = ObjectAllocator::builder()
            .object_size(8)
            .objects_per_page(nz!(5))
            .max_pages(0)
            .pad_bytes(1)
            .header_bytes(1)
            .alignment(2)
            .build()
            .unwrap();

        let mut addresses = (0..23)
            .map(|_| allocator.allocate().unwrap().addr().get())
            .collect::<Vec<_>>();
        addresses.sort_unstable();

        let unique = addresses.iter().copied().collect::<HashSet<_>>();
        assert_eq!(unique.len(), addresses.len());

        for pair in addresses.windows(2) {
            assert!(pair[1] - pair[0] >= 8);
        }
    }

    #[test]
    fn allocation_creates_pages_on_demand() {
        let mut allocator = ObjectAllocator::builder()
            .object_size(8)
            .objects_per_page(nz!(2))
            .max_pages(0)
            .build()
            .unwrap();

        assert_eq!(allocator.stats().pages_in_use(), 1);

        _ = allocator.allocate().unwrap();
        _ = allocator.allocate().unwrap();
        assert_eq!(allocator.stats().pages_in_use(), 1);

        _ = allocator.allocate().unwrap();
        assert_eq!(allocator.stats().pages_in_use(), 2);
        assert_eq!(allocator.stats().free_objects(), 1);
    }

    #[test]
    fn page_limit_leaves_state_unchanged() {
        let mut allocator = ObjectAllocator::builder()
            .object_size(8)
            .objects_per_page(nz!(1))
            .max_pages(1)
            .build()
            .unwrap();

        _ = allocator.allocate().unwrap();
        let before = allocator.stats();

        assert_eq!(
            allocator.allocate(),
            Err(Error::PageLimitReached { max_pages: 1 })
        );
        assert_eq!(allocator.stats(), before);
    }

    #[test]
    fn debug_mode_stamps_payload_patterns() {
        let mut allocator = ObjectAllocator::builder()
            .object_size(12)
            .debug(true)
            .build()
            .unwrap();

        // The next block is untouched since page creation.
        let head = allocator.free_list_head().unwrap();
        assert_eq!(read_bytes(head, 12), vec![UNALLOCATED_PATTERN; 12]);

        let block = allocator.allocate().unwrap();
        assert_eq!(block, head);
        assert_eq!(read_bytes(block, 12), vec![ALLOCATED_PATTERN; 12]);

        unsafe { allocator.release(block) }.unwrap();
        assert_eq!(read_bytes(block, 12), vec![FREED_PATTERN; 12]);
    }

    #[test]
    fn usage_header_tracks_block_state() {
        let mut allocator = ObjectAllocator::builder()
            .object_size(8)
            .pad_bytes(2)
            .header_bytes(1)
            .build()
            .unwrap();

        let block = allocator.allocate().unwrap();
        let flag = unsafe { block.sub(3) };

        assert_eq!(unsafe { flag.read() }, IN_USE_FLAG);
        assert_eq!(unsafe { block.sub(1).read() }, PAD_PATTERN);

        unsafe { allocator.release(block) }.unwrap();
        assert_eq!(unsafe { flag.read() }, FREE_FLAG);
    }

    #[test]
    fn release_in_debug_mode_rejects_foreign_pointer() {
        let mut allocator = ObjectAllocator::builder()
            .object_size(8)
            .debug(true)
            .build()
            .unwrap();

        let mut local = 0_u64;
        let foreign = NonNull::from(&mut local).cast::<u8>();
        let address = foreign.addr().get();

        let before = allocator.stats();
        assert_eq!(
            unsafe { allocator.release(foreign) },
            Err(Error::BadAddress { address })
        );
        assert_eq!(allocator.stats(), before);
    }

    #[test]
    fn rejected_release_leaves_free_list_unchanged() {
        let mut allocator = ObjectAllocator::builder()
            .object_size(8)
            .debug(true)
            .build()
            .unwrap();

        let block = allocator.allocate().unwrap();
        let head = allocator.free_list_head();

        let misaligned = unsafe { block.add(1) };
        assert!(unsafe { allocator.release(misaligned) }.is_err());

        assert_eq!(allocator.free_list_head(), head);
        assert_eq!(allocator.stats().objects_in_use(), 1);
    }

    #[test]
    #[should_panic]
    fn release_outside_debug_mode_panics_on_foreign_pointer() {
        let mut allocator = ObjectAllocator::builder().object_size(8).build().unwrap();

        let mut local = 0_u64;
        let foreign = NonNull::from(&mut local).cast::<u8>();

        _ = unsafe { allocator.release(foreign) };
    }

    #[test]
    fn debug_mode_can_be_enabled_later() {
        let mut allocator = ObjectAllocator::builder()
            .object_size(8)
            .pad_bytes(1)
            .build()
            .unwrap();

        let block = allocator.allocate().unwrap();
        unsafe { block.add(8).write(0) };

        allocator.set_debug_mode(true);
        assert!(allocator.config().debug_on());

        assert!(matches!(
            unsafe { allocator.release(block) },
            Err(Error::CorruptedBlock { .. })
        ));
    }

    #[test]
    fn validate_address_works_outside_debug_mode() {
        let mut allocator = ObjectAllocator::builder().object_size(8).build().unwrap();

        let block = allocator.allocate().unwrap();
        assert_eq!(allocator.validate_address(block), Ok(()));

        unsafe { allocator.release(block) }.unwrap();
        assert!(matches!(
            allocator.validate_address(block),
            Err(Error::MultipleFree { .. })
        ));
    }

    #[test]
    fn page_list_head_is_newest_page() {
        let mut allocator = ObjectAllocator::builder()
            .object_size(8)
            .objects_per_page(nz!(1))
            .max_pages(0)
            .build()
            .unwrap();

        let first_page = allocator.page_list_head().unwrap();

        _ = allocator.allocate().unwrap();
        _ = allocator.allocate().unwrap();

        let second_page = allocator.page_list_head().unwrap();
        assert_ne!(first_page, second_page);

        let link = unsafe { second_page.cast::<usize>().read() };
        assert_eq!(link, first_page.addr().get());
    }

    #[test]
    fn free_list_head_is_none_when_exhausted() {
        let mut allocator = ObjectAllocator::builder()
            .object_size(8)
            .objects_per_page(nz!(1))
            .build()
            .unwrap();

        assert!(allocator.free_list_head().is_some());
        _ = allocator.allocate().unwrap();
        assert!(allocator.free_list_head().is_none());
    }

    #[test]
    fn dump_in_use_agrees_with_and_without_headers() {
        for header_bytes in [0, 1] {
            let mut allocator = ObjectAllocator::builder()
                .object_size(8)
                .objects_per_page(nz!(3))
                .max_pages(0)
                .header_bytes(header_bytes)
                .build()
                .unwrap();

            let blocks = (0..7)
                .map(|_| allocator.allocate().unwrap())
                .collect::<Vec<_>>();

            for block in blocks.iter().step_by(2) {
                unsafe { allocator.release(*block) }.unwrap();
            }

            let mut seen = HashSet::new();
            let count = allocator.dump_in_use(|ptr, size| {
                assert_eq!(size, 8);
                seen.insert(ptr);
            });

            let expected = blocks.iter().skip(1).step_by(2).copied().collect::<HashSet<_>>();
            assert_eq!(count, 3);
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn pass_through_allocates_outside_pages() {
        let mut allocator = ObjectAllocator::builder()
            .object_size(32)
            .pass_through(true)
            .build()
            .unwrap();

        let block = allocator.allocate().unwrap();
        unsafe { block.cast::<[u8; 32]>().write_unaligned([9; 32]) };

        assert_eq!(allocator.stats().objects_in_use(), 1);
        assert_eq!(allocator.stats().pages_in_use(), 0);
        assert_eq!(allocator.stats().page_size(), 0);
        assert!(allocator.free_list_head().is_none());
        assert_eq!(allocator.dump_in_use(|_, _| {}), 0);

        unsafe { allocator.release(block) }.unwrap();
        assert_eq!(allocator.stats().objects_in_use(), 0);
        assert_eq!(allocator.stats().deallocations(), 1);
    }

    #[test]
    fn pass_through_reports_out_of_memory() {
        // Four such objects would not fit on a page, which is irrelevant without pages.
        let mut allocator = ObjectAllocator::builder()
            .object_size(1 << 62)
            .pass_through(true)
            .build()
            .unwrap();

        assert_eq!(
            allocator.allocate(),
            Err(Error::OutOfMemory { size: 1 << 62 })
        );
        assert_eq!(allocator.stats().allocations(), 0);
    }

    #[test]
    fn build_reports_out_of_memory_for_first_page() {
        let result = ObjectAllocator::builder()
            .object_size(1 << 62)
            .objects_per_page(nz!(1))
            .build();

        assert!(matches!(result, Err(Error::OutOfMemory { .. })));
    }

    #[test]
    fn build_reports_out_of_memory_for_page_beyond_virtual_memory() {
        let result = ObjectAllocator::builder().object_size(1 << 62).build();

        assert_eq!(
            result.map(|allocator| allocator.stats()),
            Err(Error::OutOfMemory { size: usize::MAX })
        );
    }

    #[test]
    fn pass_through_validates_no_address() {
        let mut allocator = ObjectAllocator::builder()
            .object_size(8)
            .pass_through(true)
            .build()
            .unwrap();

        let block = allocator.allocate().unwrap();

        assert_eq!(
            allocator.validate_address(block),
            Err(Error::BadAddress {
                address: block.addr().get()
            })
        );

        unsafe { allocator.release(block) }.unwrap();
    }

    #[test]
    fn page_limit_error_reports_configured_limit() {
        let mut allocator = ObjectAllocator::builder()
            .object_size(8)
            .objects_per_page(nz!(3))
            .max_pages(2)
            .build()
            .unwrap();

        for _ in 0..6 {
            _ = allocator.allocate().unwrap();
        }

        assert_eq!(
            allocator.allocate(),
            Err(Error::PageLimitReached { max_pages: 2 })
        );
    }

    #[test]
    #[should_panic]
    fn must_not_drop_blocks_panics_with_block_in_use() {
        let mut allocator = ObjectAllocator::builder()
            .object_size(8)
            .drop_policy(DropPolicy::MustNotDropBlocks)
            .build()
            .unwrap();

        _ = allocator.allocate().unwrap();
    }

    #[test]
    fn must_not_drop_blocks_allows_drop_when_all_released() {
        let mut allocator = ObjectAllocator::builder()
            .object_size(8)
            .drop_policy(DropPolicy::MustNotDropBlocks)
            .build()
            .unwrap();

        let block = allocator.allocate().unwrap();
        unsafe { allocator.release(block) }.unwrap();
    }

    #[test]
    fn may_drop_blocks_allows_drop_with_block_in_use() {
        let mut allocator = ObjectAllocator::builder().object_size(8).build().unwrap();

        _ = allocator.allocate().unwrap();
    }

    #[test]
    fn allocator_can_move_between_threads() {
        let mut allocator = ObjectAllocator::builder().object_size(8).build().unwrap();
        let block = allocator.allocate().unwrap();
        let address = block.addr().get();

        let stats = thread::spawn(move || {
            let block = allocator.free_list_head();
            assert!(block.is_some());
            allocator.stats()
        })
        .join()
        .unwrap();

        assert_eq!(stats.objects_in_use(), 1);
        assert_ne!(address, 0);
    }
}
