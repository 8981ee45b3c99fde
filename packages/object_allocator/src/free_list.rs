use crate::BlockHandle;

/// A LIFO stack of the blocks that are currently available for allocation.
///
/// The most recently released block is handed out first, which keeps recently touched
/// memory hot and makes block reuse predictable.
#[derive(Debug, Default)]
pub(crate) struct FreeList {
    stack: Vec<BlockHandle>,
}

impl FreeList {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub(crate) fn len(&self) -> usize {
        self.stack.len()
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// The block that the next allocation will receive, if any.
    #[must_use]
    pub(crate) fn head(&self) -> Option<BlockHandle> {
        self.stack.last().copied()
    }

    pub(crate) fn push(&mut self, handle: BlockHandle) {
        self.stack.push(handle);
    }

    /// Adds every block of a freshly created page, so that the highest-index block of the
    /// page is handed out first.
    pub(crate) fn push_page(&mut self, page_index: usize, objects_per_page: usize) {
        self.stack.reserve(objects_per_page);
        self.stack.extend(
            (0..objects_per_page).map(|block_index| BlockHandle::from_parts(page_index, block_index)),
        );
    }

    pub(crate) fn pop(&mut self) -> Option<BlockHandle> {
        self.stack.pop()
    }

    /// Whether the block is currently on the free list.
    ///
    /// This is a linear scan over the entire list.
    #[must_use]
    pub(crate) fn contains(&self, handle: BlockHandle) -> bool {
        self.stack.contains(&handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_list_is_empty() {
        let mut list = FreeList::new();

        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
        assert_eq!(list.head(), None);
        assert_eq!(list.pop(), None);
    }

    #[test]
    fn pop_returns_most_recently_pushed() {
        let mut list = FreeList::new();

        let a = BlockHandle::from_parts(0, 0);
        let b = BlockHandle::from_parts(0, 1);

        list.push(a);
        list.push(b);

        assert_eq!(list.head(), Some(b));
        assert_eq!(list.pop(), Some(b));
        assert_eq!(list.pop(), Some(a));
        assert!(list.is_empty());
    }

    #[test]
    fn push_page_hands_out_last_block_first() {
        let mut list = FreeList::new();

        list.push_page(2, 3);

        assert_eq!(list.len(), 3);
        assert_eq!(list.pop(), Some(BlockHandle::from_parts(2, 2)));
        assert_eq!(list.pop(), Some(BlockHandle::from_parts(2, 1)));
        assert_eq!(list.pop(), Some(BlockHandle::from_parts(2, 0)));
    }

    #[test]
    fn contains_finds_only_listed_blocks() {
        let mut list = FreeList::new();

        list.push_page(0, 2);

        assert!(list.contains(BlockHandle::from_parts(0, 0)));
        assert!(list.contains(BlockHandle::from_parts(0, 1)));
        assert!(!list.contains(BlockHandle::from_parts(0, 2)));
        assert!(!list.contains(BlockHandle::from_parts(1, 0)));

        _ = list.pop();
        assert!(!list.contains(BlockHandle::from_parts(0, 1)));
    }
}
