use std::alloc::Layout;
use std::mem::{align_of, size_of};
use std::num::NonZero;

use num_integer::Integer;

use crate::{Config, Error, Result};

/// Size of the link field at the start of every page, which records the address of the
/// previously created page.
pub(crate) const LINK_FIELD_SIZE: usize = size_of::<usize>();

/// Precalculates the byte offsets of every region of a page, based on the allocator
/// configuration.
///
/// A page is laid out as follows, with `K` being the number of blocks per page:
///
/// ```text
/// [link][left align]
///     [header][pad][payload 0][pad][inter align]
///     [header][pad][payload 1][pad][inter align]
///     ...
///     [header][pad][payload K-1][pad]
/// ```
///
/// The distance between the start of two consecutive payloads is the stride. The last block
/// carries no trailing alignment bytes, which the left alignment bytes make up for, so the
/// page size is exactly `link + K * stride`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct BlockLayout {
    object_size: usize,
    objects_per_page: NonZero<usize>,
    pad_bytes: usize,
    header_bytes: usize,
    left_align_size: usize,
    inter_align_size: usize,

    /// Byte distance from the start of one payload to the start of the next.
    stride: usize,

    /// Byte offset from the start of the page to the payload of the first block.
    first_payload_offset: usize,

    /// Memory layout of an entire page. Aligned for the link field.
    page_layout: Layout,
}

impl BlockLayout {
    /// Calculates the layout of a page for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if a page would not fit in virtual memory. If the page
    /// size cannot even be represented, the reported size is `usize::MAX`.
    ///
    /// # Panics
    ///
    /// Panics if the object size is zero.
    pub(crate) fn new(config: &Config) -> Result<Self> {
        let object_size = config.object_size();
        assert!(
            object_size > 0,
            "BlockLayout cannot be calculated for zero-sized objects"
        );

        let unrepresentable = Error::OutOfMemory { size: usize::MAX };

        let stride = config
            .pad_bytes()
            .checked_mul(2)
            .and_then(|x| x.checked_add(config.header_bytes()))
            .and_then(|x| x.checked_add(config.inter_align_size()))
            .and_then(|x| x.checked_add(object_size))
            .ok_or(unrepresentable)?;

        let first_payload_offset = LINK_FIELD_SIZE
            .checked_add(config.left_align_size())
            .and_then(|x| x.checked_add(config.header_bytes()))
            .and_then(|x| x.checked_add(config.pad_bytes()))
            .ok_or(unrepresentable)?;

        let page_size = stride
            .checked_mul(config.objects_per_page().get())
            .and_then(|x| x.checked_add(LINK_FIELD_SIZE))
            .ok_or(unrepresentable)?;

        let page_layout = Layout::from_size_align(page_size, align_of::<usize>())
            .map_err(|_layout_error| Error::OutOfMemory { size: page_size })?;

        Ok(Self {
            object_size,
            objects_per_page: config.objects_per_page(),
            pad_bytes: config.pad_bytes(),
            header_bytes: config.header_bytes(),
            left_align_size: config.left_align_size(),
            inter_align_size: config.inter_align_size(),
            stride,
            first_payload_offset,
            page_layout,
        })
    }

    #[must_use]
    pub(crate) fn object_size(&self) -> usize {
        self.object_size
    }

    #[must_use]
    pub(crate) fn objects_per_page(&self) -> NonZero<usize> {
        self.objects_per_page
    }

    #[must_use]
    pub(crate) fn pad_bytes(&self) -> usize {
        self.pad_bytes
    }

    #[must_use]
    pub(crate) fn header_bytes(&self) -> usize {
        self.header_bytes
    }

    #[must_use]
    pub(crate) fn left_align_size(&self) -> usize {
        self.left_align_size
    }

    #[must_use]
    pub(crate) fn inter_align_size(&self) -> usize {
        self.inter_align_size
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn stride(&self) -> usize {
        self.stride
    }

    #[must_use]
    pub(crate) fn page_layout(&self) -> Layout {
        self.page_layout
    }

    #[must_use]
    pub(crate) fn page_size(&self) -> usize {
        self.page_layout.size()
    }

    /// Byte offset of the alignment bytes that precede the first block.
    #[must_use]
    pub(crate) fn left_align_offset(&self) -> usize {
        LINK_FIELD_SIZE
    }

    /// Byte offset from the start of the page to the payload of the block at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a valid block index.
    #[must_use]
    pub(crate) fn payload_offset(&self, index: usize) -> usize {
        assert!(
            index < self.objects_per_page.get(),
            "block {index} index out of bounds in page of {} blocks",
            self.objects_per_page
        );

        // Cannot overflow because the whole page fits in the page layout.
        self.first_payload_offset
            .wrapping_add(index.wrapping_mul(self.stride))
    }

    /// Byte offset of the header region of the block at `index`.
    #[must_use]
    pub(crate) fn header_offset(&self, index: usize) -> usize {
        // Cannot wrap because the header and guard bytes precede the payload on the page.
        self.payload_offset(index)
            .wrapping_sub(self.pad_bytes)
            .wrapping_sub(self.header_bytes)
    }

    /// Byte offset of the usage flag of the block at `index`, if headers are enabled.
    ///
    /// The flag is the last header byte, immediately before the left guard bytes.
    #[must_use]
    pub(crate) fn usage_flag_offset(&self, index: usize) -> Option<usize> {
        if self.header_bytes == 0 {
            return None;
        }

        // Cannot wrap because the header byte precedes the payload on the page.
        Some(
            self.payload_offset(index)
                .wrapping_sub(self.pad_bytes)
                .wrapping_sub(1),
        )
    }

    /// Byte offset of the guard bytes before the payload of the block at `index`.
    #[must_use]
    pub(crate) fn left_guard_offset(&self, index: usize) -> usize {
        // Cannot wrap because the guard bytes precede the payload on the page.
        self.payload_offset(index).wrapping_sub(self.pad_bytes)
    }

    /// Byte offset of the guard bytes after the payload of the block at `index`.
    #[must_use]
    pub(crate) fn right_guard_offset(&self, index: usize) -> usize {
        // Cannot overflow because the guard bytes are within the page.
        self.payload_offset(index).wrapping_add(self.object_size)
    }

    /// Byte offset of the alignment bytes after the block at `index`, or `None` for the
    /// last block on the page, which has no trailing alignment bytes.
    #[must_use]
    pub(crate) fn inter_align_offset(&self, index: usize) -> Option<usize> {
        // Cannot overflow because the page has at least one block.
        let last_index = self.objects_per_page.get().wrapping_sub(1);

        if index >= last_index {
            return None;
        }

        // Cannot overflow because the alignment bytes are within the page.
        Some(
            self.right_guard_offset(index)
                .wrapping_add(self.pad_bytes),
        )
    }

    /// Resolves a byte offset within a page to the index of the block whose payload starts
    /// exactly at that offset.
    ///
    /// Returns `None` if no payload starts at the offset.
    #[must_use]
    pub(crate) fn block_index_at(&self, offset: usize) -> Option<usize> {
        let from_first = offset.checked_sub(self.first_payload_offset)?;

        let (index, remainder) = from_first.div_rem(&self.stride);

        if remainder != 0 || index >= self.objects_per_page.get() {
            return None;
        }

        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use new_zealand::nz;

    use super::*;
    use crate::ObjectAllocator;

    fn layout(
        object_size: usize,
        objects_per_page: NonZero<usize>,
        pad_bytes: usize,
        header_bytes: usize,
        alignment: usize,
    ) -> BlockLayout {
        let config = ObjectAllocator::builder()
            .object_size(object_size)
            .objects_per_page(objects_per_page)
            .pad_bytes(pad_bytes)
            .header_bytes(header_bytes)
            .alignment(alignment)
            .to_config();

        BlockLayout::new(&config).unwrap()
    }

    #[test]
    #[should_panic]
    fn panics_on_zero_sized_object() {
        drop(layout(0, nz!(4), 0, 0, 0));
    }

    #[test]
    fn bare_blocks_are_packed_back_to_back() {
        let layout = layout(16, nz!(4), 0, 0, 0);

        assert_eq!(layout.stride(), 16);
        assert_eq!(layout.page_size(), LINK_FIELD_SIZE + 4 * 16);
        assert_eq!(layout.payload_offset(0), LINK_FIELD_SIZE);
        assert_eq!(layout.payload_offset(3), LINK_FIELD_SIZE + 3 * 16);
        assert_eq!(layout.usage_flag_offset(0), None);
    }

    #[test]
    fn stride_includes_all_overhead() {
        let layout = layout(16, nz!(4), 2, 1, 4);

        // object + 2 * pad + header + alignment
        assert_eq!(layout.stride(), 16 + 4 + 1 + 4);
        assert_eq!(layout.page_size(), LINK_FIELD_SIZE + 4 * layout.stride());
    }

    #[test]
    fn regions_are_ordered_within_block() {
        let layout = layout(16, nz!(4), 2, 1, 4);

        assert_eq!(layout.left_align_offset(), LINK_FIELD_SIZE);
        assert_eq!(layout.header_offset(0), LINK_FIELD_SIZE + 4);
        assert_eq!(layout.usage_flag_offset(0), Some(LINK_FIELD_SIZE + 4));
        assert_eq!(layout.left_guard_offset(0), LINK_FIELD_SIZE + 4 + 1);
        assert_eq!(layout.payload_offset(0), LINK_FIELD_SIZE + 4 + 1 + 2);
        assert_eq!(layout.right_guard_offset(0), LINK_FIELD_SIZE + 4 + 1 + 2 + 16);
        assert_eq!(
            layout.inter_align_offset(0),
            Some(LINK_FIELD_SIZE + 4 + 1 + 2 + 16 + 2)
        );

        // The next block's header immediately follows the alignment bytes.
        assert_eq!(
            layout.header_offset(1),
            layout.inter_align_offset(0).unwrap() + 4
        );
    }

    #[test]
    fn usage_flag_is_last_header_byte() {
        let layout = layout(8, nz!(2), 3, 4, 0);

        assert_eq!(
            layout.usage_flag_offset(1),
            Some(layout.header_offset(1) + 3)
        );
        assert_eq!(
            layout.usage_flag_offset(1).unwrap() + 1,
            layout.left_guard_offset(1)
        );
    }

    #[test]
    fn last_block_ends_at_page_end() {
        let layout = layout(24, nz!(5), 3, 2, 8);

        let last = 4;
        assert_eq!(layout.inter_align_offset(last), None);
        assert_eq!(
            layout.right_guard_offset(last) + layout.pad_bytes(),
            layout.page_size()
        );
    }

    #[test]
    fn block_index_at_resolves_payload_starts() {
        let layout = layout(16, nz!(4), 2, 1, 0);

        for index in 0..4 {
            assert_eq!(
                layout.block_index_at(layout.payload_offset(index)),
                Some(index)
            );
        }
    }

    #[test]
    fn block_index_at_rejects_misaligned_offsets() {
        let layout = layout(16, nz!(4), 2, 1, 0);

        assert_eq!(layout.block_index_at(layout.payload_offset(1) + 1), None);
        assert_eq!(layout.block_index_at(layout.payload_offset(0) - 1), None);
        assert_eq!(layout.block_index_at(0), None);
    }

    #[test]
    fn block_index_at_rejects_offsets_past_last_block() {
        let layout = layout(16, nz!(4), 0, 0, 0);

        let past_end = layout.payload_offset(3) + layout.stride();
        assert_eq!(layout.block_index_at(past_end), None);
    }

    #[test]
    fn page_is_aligned_for_link_field() {
        let layout = layout(1, nz!(1), 0, 0, 0);

        assert_eq!(layout.page_layout().align(), align_of::<usize>());
        assert_eq!(layout.page_size(), LINK_FIELD_SIZE + 1);
    }

    #[test]
    #[should_panic]
    fn payload_offset_out_of_bounds_panics() {
        let layout = layout(16, nz!(4), 0, 0, 0);
        _ = layout.payload_offset(4);
    }

    #[test]
    fn page_beyond_virtual_memory_is_out_of_memory() {
        // 4 * 2^62 cannot be represented at all.
        let config = ObjectAllocator::builder().object_size(1 << 62).to_config();
        assert_eq!(
            BlockLayout::new(&config),
            Err(Error::OutOfMemory { size: usize::MAX })
        );

        // 2 * 2^62 can be represented but exceeds the largest possible allocation.
        let config = ObjectAllocator::builder()
            .object_size(1 << 62)
            .objects_per_page(nz!(2))
            .to_config();
        assert_eq!(
            BlockLayout::new(&config),
            Err(Error::OutOfMemory {
                size: (1 << 63) + LINK_FIELD_SIZE
            })
        );
    }
}
