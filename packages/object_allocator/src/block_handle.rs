/// Identifies a block by the page that contains it and its position within that page.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct BlockHandle {
    /// The index of the page containing this block, in page creation order.
    page_index: usize,
    /// The index within the page where this block is stored.
    block_index: usize,
}

impl BlockHandle {
    #[must_use]
    pub(crate) fn from_parts(page_index: usize, block_index: usize) -> Self {
        Self {
            page_index,
            block_index,
        }
    }

    /// Returns the index of the page containing this block.
    #[must_use]
    pub(crate) fn page_index(&self) -> usize {
        self.page_index
    }

    /// Returns the index within the page where this block is stored.
    #[must_use]
    pub(crate) fn block_index(&self) -> usize {
        self.block_index
    }
}
