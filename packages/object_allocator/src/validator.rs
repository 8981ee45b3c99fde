//! Read-only inspection of allocator memory: address validation for releases and guard byte
//! scanning for corruption.
//!
//! Nothing in here reads a byte before the address has been resolved to a block by pure
//! address arithmetic, so validating a bogus pointer never touches memory the allocator
//! does not own.

use std::ptr::NonNull;

use tracing::warn;

use crate::{BlockHandle, Error, FreeList, GuardSide, PAD_PATTERN, PageStore, Result};

/// Resolves an address to the block whose payload starts there.
///
/// # Errors
///
/// Returns [`Error::BadAddress`] if no page contains the address and [`Error::BadBoundary`]
/// if the address is within a page but not at the start of a payload.
pub(crate) fn locate(pages: &PageStore, address: usize) -> Result<BlockHandle> {
    let page_index = pages
        .find_page(address)
        .ok_or(Error::BadAddress { address })?;

    // Cannot wrap because find_page() guarantees the address is within the page.
    let offset = address.wrapping_sub(pages.page(page_index).address());

    let block_index = pages
        .block_layout()
        .block_index_at(offset)
        .ok_or(Error::BadBoundary { address })?;

    Ok(BlockHandle::from_parts(page_index, block_index))
}

/// Checks whether a pointer may be released, returning the block it refers to.
///
/// The checks run in a fixed order and the first failure is reported:
///
/// 1. The block must not already be free.
/// 2. The pointer must be within a page.
/// 3. The pointer must be at the start of a payload.
/// 4. The guard bytes on both sides of the payload must be intact.
///
/// # Errors
///
/// Returns [`Error::MultipleFree`], [`Error::BadAddress`], [`Error::BadBoundary`] or
/// [`Error::CorruptedBlock`] for the first failed check.
pub(crate) fn validate(
    pages: &PageStore,
    free_list: &FreeList,
    ptr: NonNull<u8>,
) -> Result<BlockHandle> {
    let address = ptr.addr().get();
    let location = locate(pages, address);

    // An address that does not resolve to a block cannot be a free block, so only a
    // resolved block is checked here. Any resolution error is reported right after.
    if let Ok(handle) = location {
        let already_free = match pages.usage_flag(handle) {
            Some(flag) => flag == 0,
            None => free_list.contains(handle),
        };

        if already_free {
            return Err(Error::MultipleFree { address });
        }
    }

    let handle = location?;

    if let Some(side) = guard_violation(pages, handle) {
        return Err(Error::CorruptedBlock { address, side });
    }

    Ok(handle)
}

/// Identifies the first damaged guard region of a block, if any.
///
/// The guard bytes before the payload are checked first, starting with the byte closest to
/// the payload, followed by the guard bytes after the payload.
#[must_use]
pub(crate) fn guard_violation(pages: &PageStore, handle: BlockHandle) -> Option<GuardSide> {
    let layout = pages.block_layout();
    let page = pages.page(handle.page_index());
    let pad_bytes = layout.pad_bytes();

    let before = layout.left_guard_offset(handle.block_index());
    // Cannot overflow because the guard bytes are within the page.
    let before_end = before.wrapping_add(pad_bytes);

    if (before..before_end)
        .rev()
        .any(|offset| page.read_byte(offset) != PAD_PATTERN)
    {
        return Some(GuardSide::Before);
    }

    let after = layout.right_guard_offset(handle.block_index());
    // Cannot overflow because the guard bytes are within the page.
    let after_end = after.wrapping_add(pad_bytes);

    if (after..after_end).any(|offset| page.read_byte(offset) != PAD_PATTERN) {
        return Some(GuardSide::After);
    }

    None
}

/// Checks the guard bytes of every block on every page, regardless of whether the block is
/// free or in use.
///
/// Calls `visitor` with the payload pointer and object size of every corrupted block and
/// returns the number of corrupted blocks.
pub(crate) fn scan(pages: &PageStore, mut visitor: impl FnMut(NonNull<u8>, usize)) -> usize {
    let object_size = pages.block_layout().object_size();
    let mut corruptions: usize = 0;

    for handle in pages.blocks() {
        let Some(side) = guard_violation(pages, handle) else {
            continue;
        };

        let ptr = pages.payload_ptr(handle);

        warn!(
            address = ptr.addr().get(),
            %side,
            "guard bytes of block have been overwritten"
        );

        // Cannot overflow because every corrupted block occupies virtual memory.
        corruptions = corruptions.wrapping_add(1);
        visitor(ptr, object_size);
    }

    corruptions
}

#[cfg(test)]
#[allow(
    clippy::arithmetic_side_effects,
    reason = "test code doesn't need the same rigor as production code"
)]
mod tests {
    use new_zealand::nz;

    use super::*;
    use crate::{BlockLayout, ObjectAllocator};

    fn pages(pad_bytes: usize, header_bytes: usize) -> PageStore {
        let mut pages = PageStore::new(BlockLayout::new(
            &ObjectAllocator::builder()
                .object_size(16)
                .objects_per_page(nz!(4))
                .pad_bytes(pad_bytes)
                .header_bytes(header_bytes)
                .to_config(),
        )
        .unwrap());

        pages.create_page(true).unwrap();
        pages.create_page(true).unwrap();
        pages
    }

    /// Marks every block as in use, the way allocation does.
    fn mark_all_in_use(pages: &mut PageStore) {
        let handles = pages.blocks().collect::<Vec<_>>();
        for handle in handles {
            pages.set_usage_flag(handle, 1);
        }
    }

    fn corrupt(pages: &mut PageStore, handle: BlockHandle, offset: usize) {
        pages.page_mut(handle.page_index()).write_byte(offset, 0);
    }

    #[test]
    fn locate_resolves_every_payload() {
        let pages = pages(2, 0);

        for handle in pages.blocks() {
            let address = pages.payload_ptr(handle).addr().get();
            assert_eq!(locate(&pages, address), Ok(handle));
        }
    }

    #[test]
    fn locate_rejects_foreign_address() {
        let pages = pages(2, 0);

        let local = 0_u64;
        let address = std::ptr::from_ref(&local).addr();

        assert_eq!(locate(&pages, address), Err(Error::BadAddress { address }));
    }

    #[test]
    fn locate_rejects_misaligned_address() {
        let pages = pages(2, 0);

        let address = pages.payload_ptr(BlockHandle::from_parts(1, 1)).addr().get() + 1;
        assert_eq!(locate(&pages, address), Err(Error::BadBoundary { address }));

        // The link field is within the page but never a payload.
        let address = pages.page(0).address();
        assert_eq!(locate(&pages, address), Err(Error::BadBoundary { address }));
    }

    #[test]
    fn validate_accepts_block_in_use_without_headers() {
        let pages = pages(2, 0);
        let free_list = FreeList::new();

        let handle = BlockHandle::from_parts(0, 3);
        let ptr = pages.payload_ptr(handle);

        assert_eq!(validate(&pages, &free_list, ptr), Ok(handle));
    }

    #[test]
    fn validate_detects_free_block_via_free_list() {
        let pages = pages(2, 0);
        let mut free_list = FreeList::new();

        let handle = BlockHandle::from_parts(0, 3);
        free_list.push(handle);

        let ptr = pages.payload_ptr(handle);
        let address = ptr.addr().get();

        assert_eq!(
            validate(&pages, &free_list, ptr),
            Err(Error::MultipleFree { address })
        );
    }

    #[test]
    fn validate_detects_free_block_via_header() {
        let mut pages = pages(2, 1);
        let free_list = FreeList::new();

        let handle = BlockHandle::from_parts(1, 0);
        let ptr = pages.payload_ptr(handle);
        let address = ptr.addr().get();

        // Freshly created pages have all headers reading "free".
        assert_eq!(
            validate(&pages, &free_list, ptr),
            Err(Error::MultipleFree { address })
        );

        mark_all_in_use(&mut pages);
        assert_eq!(validate(&pages, &free_list, ptr), Ok(handle));
    }

    #[test]
    fn multiple_free_is_reported_before_corruption() {
        let mut pages = pages(2, 0);
        let mut free_list = FreeList::new();

        let handle = BlockHandle::from_parts(0, 0);
        free_list.push(handle);

        let guard = pages.block_layout().right_guard_offset(0);
        corrupt(&mut pages, handle, guard);

        let ptr = pages.payload_ptr(handle);
        assert!(matches!(
            validate(&pages, &free_list, ptr),
            Err(Error::MultipleFree { .. })
        ));
    }

    #[test]
    fn validate_detects_corruption_before_payload() {
        let mut pages = pages(2, 1);
        mark_all_in_use(&mut pages);

        let handle = BlockHandle::from_parts(0, 2);
        let guard = pages.block_layout().left_guard_offset(2);
        corrupt(&mut pages, handle, guard);

        let ptr = pages.payload_ptr(handle);
        let address = ptr.addr().get();

        assert_eq!(
            validate(&pages, &FreeList::new(), ptr),
            Err(Error::CorruptedBlock {
                address,
                side: GuardSide::Before
            })
        );
    }

    #[test]
    fn validate_detects_corruption_after_payload() {
        let mut pages = pages(3, 0);

        let handle = BlockHandle::from_parts(1, 3);
        let guard = pages.block_layout().right_guard_offset(3) + 2;
        corrupt(&mut pages, handle, guard);

        let ptr = pages.payload_ptr(handle);
        let address = ptr.addr().get();

        assert_eq!(
            validate(&pages, &FreeList::new(), ptr),
            Err(Error::CorruptedBlock {
                address,
                side: GuardSide::After
            })
        );
    }

    #[test]
    fn guard_violation_is_none_without_guard_bytes() {
        let pages = pages(0, 0);

        for handle in pages.blocks() {
            assert_eq!(guard_violation(&pages, handle), None);
        }
    }

    #[test]
    fn scan_reports_nothing_for_intact_pages() {
        let pages = pages(2, 1);

        let mut visited = 0;
        let count = scan(&pages, |_, _| visited += 1);

        assert_eq!(count, 0);
        assert_eq!(visited, 0);
    }

    #[test]
    fn scan_reports_each_corrupted_block_once() {
        let mut pages = pages(2, 0);

        let first = BlockHandle::from_parts(0, 1);
        let second = BlockHandle::from_parts(1, 2);

        // Damage both sides of the first block; it must still be reported only once.
        let layout = *pages.block_layout();
        corrupt(&mut pages, first, layout.left_guard_offset(1));
        corrupt(&mut pages, first, layout.right_guard_offset(1));
        corrupt(&mut pages, second, layout.right_guard_offset(2) + 1);

        let mut visited = Vec::new();
        let count = scan(&pages, |ptr, size| visited.push((ptr, size)));

        assert_eq!(count, 2);
        assert_eq!(
            visited,
            vec![
                (pages.payload_ptr(first), 16),
                (pages.payload_ptr(second), 16)
            ]
        );
    }
}
