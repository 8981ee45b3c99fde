use std::num::NonZero;

/// The configuration of an [`ObjectAllocator`][crate::ObjectAllocator].
///
/// Created via [`ObjectAllocator::builder()`][crate::ObjectAllocator::builder] and immutable
/// afterwards, with the exception of the debug mode flag, which can be toggled via
/// [`ObjectAllocator::set_debug_mode()`][crate::ObjectAllocator::set_debug_mode].
///
/// # Examples
///
/// ```
/// use object_allocator::ObjectAllocator;
///
/// let allocator = ObjectAllocator::builder()
///     .object_size(32)
///     .pad_bytes(2)
///     .build()
///     .unwrap();
///
/// let config = allocator.config();
/// assert_eq!(config.object_size(), 32);
/// assert_eq!(config.pad_bytes(), 2);
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Config {
    pub(crate) object_size: usize,
    pub(crate) objects_per_page: NonZero<usize>,
    pub(crate) max_pages: Option<NonZero<usize>>,
    pub(crate) debug_on: bool,
    pub(crate) pad_bytes: usize,
    pub(crate) header_bytes: usize,
    pub(crate) alignment: usize,
    pub(crate) left_align_size: usize,
    pub(crate) inter_align_size: usize,
    pub(crate) pass_through: bool,
}

impl Config {
    /// Number of usable bytes in every block handed out by the allocator.
    #[must_use]
    #[inline]
    pub fn object_size(&self) -> usize {
        self.object_size
    }

    /// Number of blocks on every page.
    #[must_use]
    #[inline]
    pub fn objects_per_page(&self) -> NonZero<usize> {
        self.objects_per_page
    }

    /// The maximum number of pages the allocator may own, or `None` if unbounded.
    #[must_use]
    #[inline]
    pub fn max_pages(&self) -> Option<NonZero<usize>> {
        self.max_pages
    }

    /// Whether debug patterns are stamped and releases are validated.
    #[must_use]
    #[inline]
    pub fn debug_on(&self) -> bool {
        self.debug_on
    }

    /// Number of guard bytes on each side of every payload.
    #[must_use]
    #[inline]
    pub fn pad_bytes(&self) -> usize {
        self.pad_bytes
    }

    /// Number of header bytes preceding every block. Zero disables usage headers.
    #[must_use]
    #[inline]
    pub fn header_bytes(&self) -> usize {
        self.header_bytes
    }

    /// The configured alignment, in bytes.
    #[must_use]
    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Number of alignment bytes before the first block on a page.
    #[must_use]
    #[inline]
    pub fn left_align_size(&self) -> usize {
        self.left_align_size
    }

    /// Number of alignment bytes between consecutive blocks on a page.
    #[must_use]
    #[inline]
    pub fn inter_align_size(&self) -> usize {
        self.inter_align_size
    }

    /// Whether every request is forwarded to the system allocator, bypassing the pool.
    #[must_use]
    #[inline]
    pub fn pass_through(&self) -> bool {
        self.pass_through
    }

    /// Whether the allocator may create another page when it already owns `page_count` pages.
    #[must_use]
    pub(crate) fn allows_page(&self, page_count: usize) -> bool {
        self.max_pages.is_none_or(|max| page_count < max.get())
    }
}

#[cfg(test)]
mod tests {
    use new_zealand::nz;

    use super::*;
    use crate::ObjectAllocator;

    #[test]
    fn derived_alignment_sizes_match_alignment() {
        let config = ObjectAllocator::builder()
            .object_size(8)
            .alignment(16)
            .to_config();

        assert_eq!(config.alignment(), 16);
        assert_eq!(config.left_align_size(), 16);
        assert_eq!(config.inter_align_size(), 16);
    }

    #[test]
    fn zero_max_pages_is_unbounded() {
        let config = ObjectAllocator::builder()
            .object_size(8)
            .max_pages(0)
            .to_config();

        assert_eq!(config.max_pages(), None);
        assert!(config.allows_page(0));
        assert!(config.allows_page(usize::MAX));
    }

    #[test]
    fn max_pages_limits_page_count() {
        let config = ObjectAllocator::builder()
            .object_size(8)
            .max_pages(2)
            .to_config();

        assert_eq!(config.max_pages(), Some(nz!(2)));
        assert!(config.allows_page(0));
        assert!(config.allows_page(1));
        assert!(!config.allows_page(2));
    }
}
