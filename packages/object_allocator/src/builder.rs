use std::cell::Cell;
use std::marker::PhantomData;
use std::mem::size_of;
use std::num::NonZero;

use new_zealand::nz;

use crate::{Config, DropPolicy, ObjectAllocator, Result};

/// Number of blocks on every page unless configured otherwise.
pub(crate) const DEFAULT_OBJECTS_PER_PAGE: NonZero<usize> = nz!(4);

/// Page limit unless configured otherwise.
pub(crate) const DEFAULT_MAX_PAGES: usize = 3;

/// Builder for creating an instance of [`ObjectAllocator`].
///
/// The object size is mandatory. Use either `.object_size()` to provide a specific size or
/// `.layout_of::<T>()` to use the size of the provided type. All other settings are optional.
///
/// Unless overridden, an allocator has 4 blocks per page, a limit of 3 pages, debug mode off,
/// no guard bytes, no usage headers and no alignment bytes.
///
/// # Examples
///
/// ```
/// use new_zealand::nz;
/// use object_allocator::ObjectAllocator;
///
/// let allocator = ObjectAllocator::builder()
///     .object_size(64)
///     .objects_per_page(nz!(32))
///     .max_pages(0) // Unbounded.
///     .debug(true)
///     .pad_bytes(4)
///     .header_bytes(1)
///     .build()
///     .unwrap();
///
/// assert_eq!(allocator.stats().pages_in_use(), 1);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) and can be safely transferred between threads,
/// allowing allocator configuration to happen on different threads than where it is used.
/// However, it is not thread-safe ([`Sync`]) as it contains mutable configuration state.
#[derive(Debug)]
#[must_use]
pub struct ObjectAllocatorBuilder {
    object_size: Option<usize>,
    objects_per_page: NonZero<usize>,
    max_pages: usize,
    debug_on: bool,
    pad_bytes: usize,
    header_bytes: usize,
    alignment: usize,
    pass_through: bool,
    drop_policy: DropPolicy,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl ObjectAllocatorBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            object_size: None,
            objects_per_page: DEFAULT_OBJECTS_PER_PAGE,
            max_pages: DEFAULT_MAX_PAGES,
            debug_on: false,
            pad_bytes: 0,
            header_bytes: 0,
            alignment: 0,
            pass_through: false,
            drop_policy: DropPolicy::default(),
            _not_sync: PhantomData,
        }
    }

    /// Sets the number of usable bytes in every block.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    #[inline]
    pub fn object_size(mut self, size: usize) -> Self {
        assert!(size > 0, "ObjectAllocator must have non-zero object size");
        self.object_size = Some(size);
        self
    }

    /// Sets the number of usable bytes in every block to the size of `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    ///
    /// # Examples
    ///
    /// ```
    /// use object_allocator::ObjectAllocator;
    ///
    /// let allocator = ObjectAllocator::builder()
    ///     .layout_of::<[u64; 4]>()
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(allocator.config().object_size(), 32);
    /// ```
    #[inline]
    pub fn layout_of<T>(self) -> Self {
        self.object_size(size_of::<T>())
    }

    /// Sets the number of blocks on every page.
    #[inline]
    pub fn objects_per_page(mut self, count: NonZero<usize>) -> Self {
        self.objects_per_page = count;
        self
    }

    /// Sets the maximum number of pages the allocator may own. Zero means unbounded.
    #[inline]
    pub fn max_pages(mut self, count: usize) -> Self {
        self.max_pages = count;
        self
    }

    /// Enables or disables debug mode, in which payloads are stamped with debug patterns
    /// and every release is validated.
    #[inline]
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug_on = enabled;
        self
    }

    /// Sets the number of guard bytes on each side of every payload.
    #[inline]
    pub fn pad_bytes(mut self, count: usize) -> Self {
        self.pad_bytes = count;
        self
    }

    /// Sets the number of header bytes preceding every block. A non-zero value enables
    /// constant-time tracking of whether a block is in use.
    #[inline]
    pub fn header_bytes(mut self, count: usize) -> Self {
        self.header_bytes = count;
        self
    }

    /// Sets the number of alignment bytes placed before the first block and between
    /// consecutive blocks on every page.
    #[inline]
    pub fn alignment(mut self, bytes: usize) -> Self {
        self.alignment = bytes;
        self
    }

    /// Enables or disables pass-through mode, in which every request is forwarded to the
    /// system allocator and no pages are ever created.
    #[inline]
    pub fn pass_through(mut self, enabled: bool) -> Self {
        self.pass_through = enabled;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the allocator. This governs how to treat blocks
    /// still in use when the allocator is dropped.
    #[inline]
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Produces the configuration described by the builder.
    ///
    /// # Panics
    ///
    /// Panics if no object size has been set.
    pub(crate) fn to_config(&self) -> Config {
        let object_size = self.object_size.expect(
            "object size must be set using .object_size() or .layout_of::<T>() before calling .build()",
        );

        Config {
            object_size,
            objects_per_page: self.objects_per_page,
            max_pages: NonZero::new(self.max_pages),
            debug_on: self.debug_on,
            pad_bytes: self.pad_bytes,
            header_bytes: self.header_bytes,
            alignment: self.alignment,
            left_align_size: self.alignment,
            inter_align_size: self.alignment,
            pass_through: self.pass_through,
        }
    }

    /// Builds the allocator with the specified configuration.
    ///
    /// Unless in pass-through mode, the first page is created immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`][crate::Error::OutOfMemory] if the system allocator
    /// cannot provide the first page.
    ///
    /// # Panics
    ///
    /// Panics if no object size has been set using either
    /// [`object_size`](Self::object_size) or [`layout_of`](Self::layout_of).
    pub fn build(self) -> Result<ObjectAllocator> {
        ObjectAllocator::new_inner(self.to_config(), self.drop_policy)
    }
}
