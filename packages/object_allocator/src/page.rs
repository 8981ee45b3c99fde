use std::alloc::{Layout, alloc, dealloc};
use std::ops::Range;
use std::ptr::{self, NonNull};

use tracing::error;

use crate::{
    ALIGN_PATTERN, BlockLayout, Error, LINK_FIELD_SIZE, PAD_PATTERN, Result, UNALLOCATED_PATTERN,
};

/// Obtains a block of memory from the system allocator.
///
/// # Errors
///
/// Returns [`Error::OutOfMemory`] if the system allocator refuses the request.
///
/// # Panics
///
/// Panics if the layout is zero-sized.
pub(crate) fn acquire(layout: Layout) -> Result<NonNull<u8>> {
    assert!(layout.size() > 0, "cannot acquire a zero-sized allocation");

    // SAFETY: The layout is non-zero-sized, as asserted above.
    let ptr = unsafe { alloc(layout) };

    NonNull::new(ptr).ok_or_else(|| {
        error!(size = layout.size(), "system allocator refused the request");

        Error::OutOfMemory {
            size: layout.size(),
        }
    })
}

/// One contiguous buffer obtained from the system allocator, holding a link field followed
/// by a fixed number of blocks.
///
/// This is the only type that reads or writes allocator memory. All access goes through
/// bounds-checked byte offsets relative to the start of the page, so the rest of the crate
/// never manipulates raw pointers directly.
///
/// # Out of band access
///
/// The page never creates references to its memory. Clients write into payloads through
/// pointers obtained from [`ptr_at()`](Self::ptr_at) while the page is reading and writing
/// the metadata bytes that surround the payloads, which is valid because every access on
/// both sides goes through raw pointers derived from the same base pointer.
#[derive(Debug)]
pub(crate) struct Page {
    base: NonNull<u8>,
    layout: Layout,
}

impl Page {
    /// Creates a page for the given block layout and stamps its initial byte patterns.
    ///
    /// The link field records `previous`, the base address of the page created before this
    /// one, or zero if this is the first page.
    ///
    /// Alignment bytes, usage headers and guard bytes are always stamped. The payloads are
    /// stamped with [`UNALLOCATED_PATTERN`] only if `debug_on` is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the system allocator cannot provide the page.
    pub(crate) fn new(block_layout: &BlockLayout, previous: usize, debug_on: bool) -> Result<Self> {
        let layout = block_layout.page_layout();
        let base = acquire(layout)?;

        let mut page = Self { base, layout };

        // SAFETY: The page layout is aligned for usize and the page starts with a link field
        // of LINK_FIELD_SIZE bytes, so the write is in bounds and aligned.
        unsafe {
            page.base.cast::<usize>().write(previous);
        }

        page.stamp(block_layout, debug_on);

        Ok(page)
    }

    fn stamp(&mut self, block_layout: &BlockLayout, debug_on: bool) {
        self.fill(
            block_layout.left_align_offset(),
            block_layout.left_align_size(),
            ALIGN_PATTERN,
        );

        for index in 0..block_layout.objects_per_page().get() {
            self.fill(
                block_layout.header_offset(index),
                block_layout.header_bytes(),
                0,
            );
            self.fill(
                block_layout.left_guard_offset(index),
                block_layout.pad_bytes(),
                PAD_PATTERN,
            );

            if debug_on {
                self.fill(
                    block_layout.payload_offset(index),
                    block_layout.object_size(),
                    UNALLOCATED_PATTERN,
                );
            }

            self.fill(
                block_layout.right_guard_offset(index),
                block_layout.pad_bytes(),
                PAD_PATTERN,
            );

            if let Some(offset) = block_layout.inter_align_offset(index) {
                self.fill(offset, block_layout.inter_align_size(), ALIGN_PATTERN);
            }
        }
    }

    /// The size of the page in bytes.
    #[must_use]
    pub(crate) fn size(&self) -> usize {
        self.layout.size()
    }

    /// The base address of the page.
    #[must_use]
    pub(crate) fn address(&self) -> usize {
        self.base.addr().get()
    }

    /// The range of addresses covered by the page.
    #[must_use]
    pub(crate) fn address_range(&self) -> Range<usize> {
        // Cannot overflow because the page exists in virtual memory.
        self.address()..self.address().wrapping_add(self.size())
    }

    /// The base address of the page created before this one, or zero for the first page.
    #[must_use]
    pub(crate) fn previous_page_address(&self) -> usize {
        // SAFETY: The link field was initialized in new() and is aligned for usize.
        unsafe { self.base.cast::<usize>().read() }
    }

    /// A pointer to the page itself.
    #[must_use]
    pub(crate) fn base_ptr(&self) -> NonNull<u8> {
        self.base
    }

    /// A pointer to the byte at `offset`, with provenance over the entire page.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is not within the page.
    #[must_use]
    pub(crate) fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(
            offset < self.size(),
            "offset {offset} out of bounds in page of {} bytes",
            self.size()
        );

        // SAFETY: The offset is within our allocation, as asserted above.
        unsafe { self.base.add(offset) }
    }

    /// Reads the byte at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is not within the page.
    #[must_use]
    pub(crate) fn read_byte(&self, offset: usize) -> u8 {
        let ptr = self.ptr_at(offset);

        // SAFETY: The pointer is within our allocation. Metadata bytes are always initialized
        // by stamp() and we only ever read metadata bytes.
        unsafe { ptr.read() }
    }

    /// Writes the byte at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is not within the page.
    pub(crate) fn write_byte(&mut self, offset: usize, value: u8) {
        let ptr = self.ptr_at(offset);

        // SAFETY: The pointer is within our allocation and we hold an exclusive reference
        // to the page.
        unsafe {
            ptr.write(value);
        }
    }

    /// Fills `len` bytes starting at `offset` with `value`.
    ///
    /// # Panics
    ///
    /// Panics if the range is not within the page.
    pub(crate) fn fill(&mut self, offset: usize, len: usize, value: u8) {
        if len == 0 {
            return;
        }

        let end = offset
            .checked_add(len)
            .expect("fill range cannot overflow for ranges within a page");

        assert!(
            end <= self.size(),
            "fill range {offset}..{end} out of bounds in page of {} bytes",
            self.size()
        );

        let ptr = self.ptr_at(offset);

        // SAFETY: The entire range is within our allocation, as asserted above, and we hold
        // an exclusive reference to the page.
        unsafe {
            ptr::write_bytes(ptr.as_ptr(), value, len);
        }
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        // SAFETY: We allocated the memory with this layout in new() and it has not yet
        // been deallocated.
        unsafe {
            dealloc(self.base.as_ptr(), self.layout);
        }
    }
}

// SAFETY: The page exclusively owns its allocation and does not rely on thread-local state.
// All access is mediated by &self/&mut self methods, so moving the page to another thread
// cannot create aliasing that Rust's borrowing rules do not already govern.
unsafe impl Send for Page {}

#[cfg(test)]
#[allow(
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same rigor as production code"
)]
mod tests {
    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::{FREED_PATTERN, ObjectAllocator};

    assert_impl_all!(Page: Send);
    assert_not_impl_any!(Page: Sync);

    fn block_layout(debug: bool) -> BlockLayout {
        BlockLayout::new(
            &ObjectAllocator::builder()
                .object_size(16)
                .objects_per_page(nz!(3))
                .debug(debug)
                .pad_bytes(2)
                .header_bytes(2)
                .alignment(4)
                .to_config(),
        )
        .unwrap()
    }

    #[test]
    fn new_page_has_layout_size() {
        let layout = block_layout(false);
        let page = Page::new(&layout, 0, false).unwrap();

        assert_eq!(page.size(), layout.page_size());
        assert_eq!(page.address_range().len(), layout.page_size());
    }

    #[test]
    fn link_field_records_previous_page() {
        let layout = block_layout(false);
        let first = Page::new(&layout, 0, false).unwrap();
        let second = Page::new(&layout, first.address(), false).unwrap();

        assert_eq!(first.previous_page_address(), 0);
        assert_eq!(second.previous_page_address(), first.address());
    }

    #[test]
    fn structural_bytes_are_stamped_without_debug() {
        let layout = block_layout(false);
        let page = Page::new(&layout, 0, false).unwrap();

        for offset in 0..layout.left_align_size() {
            assert_eq!(page.read_byte(layout.left_align_offset() + offset), ALIGN_PATTERN);
        }

        for index in 0..3 {
            for offset in 0..layout.header_bytes() {
                assert_eq!(page.read_byte(layout.header_offset(index) + offset), 0);
            }

            for offset in 0..layout.pad_bytes() {
                assert_eq!(
                    page.read_byte(layout.left_guard_offset(index) + offset),
                    PAD_PATTERN
                );
                assert_eq!(
                    page.read_byte(layout.right_guard_offset(index) + offset),
                    PAD_PATTERN
                );
            }
        }

        for index in 0..2 {
            let align = layout.inter_align_offset(index).unwrap();
            for offset in 0..layout.inter_align_size() {
                assert_eq!(page.read_byte(align + offset), ALIGN_PATTERN);
            }
        }
    }

    #[test]
    fn payloads_are_stamped_in_debug_mode() {
        let layout = block_layout(true);
        let page = Page::new(&layout, 0, true).unwrap();

        for index in 0..3 {
            for offset in 0..layout.object_size() {
                assert_eq!(
                    page.read_byte(layout.payload_offset(index) + offset),
                    UNALLOCATED_PATTERN
                );
            }
        }
    }

    #[test]
    fn write_and_fill_are_visible_to_reads() {
        let layout = block_layout(false);
        let mut page = Page::new(&layout, 0, false).unwrap();

        let payload = layout.payload_offset(1);
        page.fill(payload, layout.object_size(), FREED_PATTERN);
        page.write_byte(payload, 7);

        assert_eq!(page.read_byte(payload), 7);
        assert_eq!(page.read_byte(payload + 1), FREED_PATTERN);
        assert_eq!(page.read_byte(payload + layout.object_size() - 1), FREED_PATTERN);
    }

    #[test]
    fn writes_through_handed_out_pointer_are_visible() {
        let layout = block_layout(false);
        let page = Page::new(&layout, 0, false).unwrap();

        let guard = layout.right_guard_offset(0);
        let payload_ptr = page.ptr_at(layout.payload_offset(0));

        // SAFETY: The guard byte is within the page and the pointer carries provenance
        // over the entire page.
        unsafe {
            payload_ptr.add(layout.object_size()).write(0);
        }

        assert_eq!(page.read_byte(guard), 0);
    }

    #[test]
    fn empty_fill_is_noop_at_page_end() {
        let layout = block_layout(false);
        let mut page = Page::new(&layout, 0, false).unwrap();

        page.fill(page.size(), 0, 0);
    }

    #[test]
    #[should_panic]
    fn read_out_of_bounds_panics() {
        let layout = block_layout(false);
        let page = Page::new(&layout, 0, false).unwrap();

        _ = page.read_byte(page.size());
    }

    #[test]
    #[should_panic]
    fn fill_past_end_panics() {
        let layout = block_layout(false);
        let mut page = Page::new(&layout, 0, false).unwrap();

        let last = page.size() - 1;
        page.fill(last, 2, 0);
    }

    #[test]
    fn acquire_refuses_impossible_request() {
        let layout = Layout::from_size_align(1 << 62, 1).unwrap();

        assert_eq!(acquire(layout), Err(Error::OutOfMemory { size: 1 << 62 }));
    }
}
