use std::ptr::NonNull;

use tracing::debug;

use crate::{BlockHandle, BlockLayout, Page, Result};

/// Owns every page of an allocator, in creation order.
///
/// Pages are only ever added, never removed, until [`teardown_all()`](Self::teardown_all)
/// releases all of them at once. This keeps page indexes stable, so a [`BlockHandle`] remains
/// valid for as long as the store holds pages.
///
/// Each page additionally records the address of its predecessor in its link field, so the
/// memory of the newest page leads to every other page.
#[derive(Debug)]
pub(crate) struct PageStore {
    block_layout: BlockLayout,
    pages: Vec<Page>,
}

impl PageStore {
    #[must_use]
    pub(crate) fn new(block_layout: BlockLayout) -> Self {
        Self {
            block_layout,
            pages: Vec::new(),
        }
    }

    #[must_use]
    pub(crate) fn block_layout(&self) -> &BlockLayout {
        &self.block_layout
    }

    /// Number of pages currently owned.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub(crate) fn len(&self) -> usize {
        self.pages.len()
    }

    /// Obtains a new page from the system allocator and makes it the head of the page list.
    ///
    /// Returns the index of the new page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`][crate::Error::OutOfMemory] if the system allocator
    /// cannot provide the page. The store is unchanged in that case.
    pub(crate) fn create_page(&mut self, debug_on: bool) -> Result<usize> {
        let previous = self.head().map_or(0, Page::address);

        let page = Page::new(&self.block_layout, previous, debug_on)?;

        let index = self.pages.len();

        debug!(
            page_index = index,
            address = page.address(),
            size = page.size(),
            "created page"
        );

        self.pages.push(page);

        Ok(index)
    }

    /// Releases every page to the system allocator.
    ///
    /// Returns the number of pages released. Calling this on an empty store does nothing.
    pub(crate) fn teardown_all(&mut self) -> usize {
        let count = self.pages.len();

        if count == 0 {
            return 0;
        }

        // Newest first, following the chain of link fields.
        while let Some(page) = self.pages.pop() {
            debug_assert_eq!(
                page.previous_page_address(),
                self.pages.last().map_or(0, Page::address)
            );

            drop(page);
        }

        debug!(pages = count, "released all pages");

        count
    }

    /// The most recently created page, if any.
    #[must_use]
    pub(crate) fn head(&self) -> Option<&Page> {
        self.pages.last()
    }

    #[must_use]
    pub(crate) fn page(&self, index: usize) -> &Page {
        self.pages
            .get(index)
            .expect("page index is always valid for handles created by this store")
    }

    #[must_use]
    pub(crate) fn page_mut(&mut self, index: usize) -> &mut Page {
        self.pages
            .get_mut(index)
            .expect("page index is always valid for handles created by this store")
    }

    /// Iterates over every block on every page, in creation order.
    pub(crate) fn blocks(&self) -> impl Iterator<Item = BlockHandle> {
        let objects_per_page = self.block_layout.objects_per_page().get();

        (0..self.pages.len()).flat_map(move |page_index| {
            (0..objects_per_page)
                .map(move |block_index| BlockHandle::from_parts(page_index, block_index))
        })
    }

    /// Index of the page whose address range contains `address`, if any.
    #[must_use]
    pub(crate) fn find_page(&self, address: usize) -> Option<usize> {
        self.pages
            .iter()
            .position(|page| page.address_range().contains(&address))
    }

    /// Pointer to the payload of a block.
    #[must_use]
    pub(crate) fn payload_ptr(&self, handle: BlockHandle) -> NonNull<u8> {
        let offset = self.block_layout.payload_offset(handle.block_index());
        self.page(handle.page_index()).ptr_at(offset)
    }

    /// Reads the usage flag of a block.
    ///
    /// Returns `None` if usage headers are disabled.
    #[must_use]
    pub(crate) fn usage_flag(&self, handle: BlockHandle) -> Option<u8> {
        let offset = self.block_layout.usage_flag_offset(handle.block_index())?;
        Some(self.page(handle.page_index()).read_byte(offset))
    }

    /// Writes the usage flag of a block. Does nothing if usage headers are disabled.
    pub(crate) fn set_usage_flag(&mut self, handle: BlockHandle, value: u8) {
        if let Some(offset) = self.block_layout.usage_flag_offset(handle.block_index()) {
            self.page_mut(handle.page_index()).write_byte(offset, value);
        }
    }

    /// Fills the payload of a block with `pattern`.
    pub(crate) fn stamp_payload(&mut self, handle: BlockHandle, pattern: u8) {
        let offset = self.block_layout.payload_offset(handle.block_index());
        let len = self.block_layout.object_size();
        self.page_mut(handle.page_index()).fill(offset, len, pattern);
    }
}

impl Drop for PageStore {
    fn drop(&mut self) {
        self.teardown_all();
    }
}

#[cfg(test)]
#[allow(
    clippy::arithmetic_side_effects,
    reason = "test code doesn't need the same rigor as production code"
)]
mod tests {
    use new_zealand::nz;

    use super::*;
    use crate::{ALLOCATED_PATTERN, ObjectAllocator};

    fn store(header_bytes: usize) -> PageStore {
        PageStore::new(BlockLayout::new(
            &ObjectAllocator::builder()
                .object_size(8)
                .objects_per_page(nz!(4))
                .pad_bytes(1)
                .header_bytes(header_bytes)
                .to_config(),
        )
        .unwrap())
    }

    #[test]
    fn new_store_is_empty() {
        let store = store(0);

        assert_eq!(store.len(), 0);
        assert!(store.head().is_none());
        assert_eq!(store.blocks().count(), 0);
    }

    #[test]
    fn create_page_returns_sequential_indexes() {
        let mut store = store(0);

        assert_eq!(store.create_page(false).unwrap(), 0);
        assert_eq!(store.create_page(false).unwrap(), 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.blocks().count(), 8);
    }

    #[test]
    fn head_is_newest_page_and_links_to_previous() {
        let mut store = store(0);

        store.create_page(false).unwrap();
        store.create_page(false).unwrap();

        let head = store.head().unwrap();
        assert_eq!(head.address(), store.page(1).address());
        assert_eq!(head.previous_page_address(), store.page(0).address());
        assert_eq!(store.page(0).previous_page_address(), 0);
    }

    #[test]
    fn teardown_all_releases_every_page() {
        let mut store = store(0);

        store.create_page(false).unwrap();
        store.create_page(false).unwrap();
        store.create_page(false).unwrap();

        assert_eq!(store.teardown_all(), 3);
        assert_eq!(store.len(), 0);
        assert!(store.head().is_none());
    }

    #[test]
    fn teardown_all_is_idempotent() {
        let mut store = store(0);

        assert_eq!(store.teardown_all(), 0);

        store.create_page(false).unwrap();
        assert_eq!(store.teardown_all(), 1);
        assert_eq!(store.teardown_all(), 0);
    }

    #[test]
    fn find_page_locates_payloads() {
        let mut store = store(0);

        store.create_page(false).unwrap();
        store.create_page(false).unwrap();

        let handle = BlockHandle::from_parts(1, 2);
        let address = store.payload_ptr(handle).addr().get();

        assert_eq!(store.find_page(address), Some(1));
        assert_eq!(store.find_page(store.page(0).address()), Some(0));
    }

    #[test]
    fn find_page_rejects_foreign_addresses() {
        let mut store = store(0);
        store.create_page(false).unwrap();

        let local = 0_u64;
        let foreign = std::ptr::from_ref(&local).addr();

        assert_eq!(store.find_page(foreign), None);

        let page_end = store.page(0).address_range().end;
        assert_eq!(store.find_page(page_end), None);
    }

    #[test]
    fn usage_flags_are_absent_without_headers() {
        let mut store = store(0);
        store.create_page(false).unwrap();

        let handle = BlockHandle::from_parts(0, 0);
        assert_eq!(store.usage_flag(handle), None);

        // Must not write anywhere.
        store.set_usage_flag(handle, 1);
        assert_eq!(store.usage_flag(handle), None);
    }

    #[test]
    fn usage_flags_round_trip_with_headers() {
        let mut store = store(1);
        store.create_page(false).unwrap();

        let handle = BlockHandle::from_parts(0, 3);
        assert_eq!(store.usage_flag(handle), Some(0));

        store.set_usage_flag(handle, 1);
        assert_eq!(store.usage_flag(handle), Some(1));
        assert_eq!(store.usage_flag(BlockHandle::from_parts(0, 2)), Some(0));
    }

    #[test]
    fn stamp_payload_fills_exactly_the_payload() {
        let mut store = store(0);
        store.create_page(false).unwrap();

        let handle = BlockHandle::from_parts(0, 1);
        store.stamp_payload(handle, ALLOCATED_PATTERN);

        let layout = *store.block_layout();
        let page = store.page(0);
        let payload = layout.payload_offset(1);

        for offset in payload..payload + layout.object_size() {
            assert_eq!(page.read_byte(offset), ALLOCATED_PATTERN);
        }
        assert_eq!(page.read_byte(payload - 1), crate::PAD_PATTERN);
        assert_eq!(
            page.read_byte(payload + layout.object_size()),
            crate::PAD_PATTERN
        );
    }
}
