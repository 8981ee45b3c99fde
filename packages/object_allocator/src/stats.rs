/// A snapshot of the counters maintained by an [`ObjectAllocator`][crate::ObjectAllocator].
///
/// # Examples
///
/// ```
/// use object_allocator::ObjectAllocator;
///
/// let mut allocator = ObjectAllocator::builder().object_size(16).build().unwrap();
///
/// let block = allocator.allocate().unwrap();
///
/// let stats = allocator.stats();
/// assert_eq!(stats.objects_in_use(), 1);
/// assert_eq!(stats.allocations(), 1);
///
/// // SAFETY: The block came from this allocator and has not been released yet.
/// unsafe { allocator.release(block) }.unwrap();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    object_size: usize,
    page_size: usize,
    free_objects: usize,
    objects_in_use: usize,
    pages_in_use: usize,
    most_objects: usize,
    allocations: usize,
    deallocations: usize,
}

impl Stats {
    #[must_use]
    pub(crate) fn new(object_size: usize, page_size: usize) -> Self {
        Self {
            object_size,
            page_size,
            ..Self::default()
        }
    }

    /// Number of usable bytes in every block.
    #[must_use]
    #[inline]
    pub fn object_size(&self) -> usize {
        self.object_size
    }

    /// Size of every page in bytes, including all metadata. Zero in pass-through mode.
    #[must_use]
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of blocks currently available for allocation without creating a page.
    #[must_use]
    #[inline]
    pub fn free_objects(&self) -> usize {
        self.free_objects
    }

    /// Number of blocks currently lent out to clients.
    #[must_use]
    #[inline]
    pub fn objects_in_use(&self) -> usize {
        self.objects_in_use
    }

    /// Number of pages currently owned.
    #[must_use]
    #[inline]
    pub fn pages_in_use(&self) -> usize {
        self.pages_in_use
    }

    /// The highest number of blocks that have been in use at the same time.
    #[must_use]
    #[inline]
    pub fn most_objects(&self) -> usize {
        self.most_objects
    }

    /// Total number of successful allocations over the lifetime of the allocator.
    #[must_use]
    #[inline]
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    /// Total number of successful releases over the lifetime of the allocator.
    #[must_use]
    #[inline]
    pub fn deallocations(&self) -> usize {
        self.deallocations
    }

    pub(crate) fn record_page(&mut self, objects_per_page: usize) {
        // Cannot overflow because every page occupies virtual memory.
        self.pages_in_use = self.pages_in_use.wrapping_add(1);
        self.free_objects = self.free_objects.wrapping_add(objects_per_page);
    }

    /// Records a block being handed out. `from_pool` is false in pass-through mode, where
    /// there is no free block to consume.
    pub(crate) fn record_allocation(&mut self, from_pool: bool) {
        if from_pool {
            self.free_objects = self
                .free_objects
                .checked_sub(1)
                .expect("allocated a pooled block while no blocks were free");
        }

        // Cannot overflow because every block in use occupies virtual memory.
        self.objects_in_use = self.objects_in_use.wrapping_add(1);
        self.allocations = self.allocations.wrapping_add(1);
        self.most_objects = self.most_objects.max(self.objects_in_use);
    }

    /// Records a block being returned. `to_pool` is false in pass-through mode.
    pub(crate) fn record_release(&mut self, to_pool: bool) {
        if to_pool {
            // Cannot overflow because the block was previously taken from the free count.
            self.free_objects = self.free_objects.wrapping_add(1);
        }

        self.objects_in_use = self
            .objects_in_use
            .checked_sub(1)
            .expect("released a block while no blocks were in use");
        self.deallocations = self.deallocations.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_stats_are_zeroed() {
        let stats = Stats::new(16, 128);

        assert_eq!(stats.object_size(), 16);
        assert_eq!(stats.page_size(), 128);
        assert_eq!(stats.free_objects(), 0);
        assert_eq!(stats.objects_in_use(), 0);
        assert_eq!(stats.pages_in_use(), 0);
        assert_eq!(stats.most_objects(), 0);
        assert_eq!(stats.allocations(), 0);
        assert_eq!(stats.deallocations(), 0);
    }

    #[test]
    fn pooled_allocation_moves_block_from_free_to_in_use() {
        let mut stats = Stats::new(16, 128);

        stats.record_page(4);
        stats.record_allocation(true);

        assert_eq!(stats.free_objects(), 3);
        assert_eq!(stats.objects_in_use(), 1);
        assert_eq!(stats.allocations(), 1);

        stats.record_release(true);

        assert_eq!(stats.free_objects(), 4);
        assert_eq!(stats.objects_in_use(), 0);
        assert_eq!(stats.deallocations(), 1);
    }

    #[test]
    fn high_water_mark_survives_releases() {
        let mut stats = Stats::new(16, 128);
        stats.record_page(4);

        stats.record_allocation(true);
        stats.record_allocation(true);
        stats.record_allocation(true);
        stats.record_release(true);
        stats.record_release(true);
        stats.record_allocation(true);

        assert_eq!(stats.objects_in_use(), 2);
        assert_eq!(stats.most_objects(), 3);
    }

    #[test]
    fn pass_through_leaves_free_count_alone() {
        let mut stats = Stats::new(16, 0);

        stats.record_allocation(false);
        assert_eq!(stats.free_objects(), 0);
        assert_eq!(stats.objects_in_use(), 1);

        stats.record_release(false);
        assert_eq!(stats.free_objects(), 0);
        assert_eq!(stats.objects_in_use(), 0);
    }

    #[test]
    #[should_panic]
    fn pooled_allocation_without_free_block_panics() {
        let mut stats = Stats::new(16, 128);
        stats.record_allocation(true);
    }
}
