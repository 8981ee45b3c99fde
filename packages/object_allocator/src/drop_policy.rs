/// Determines how the allocator treats blocks that are still in use when it is dropped.
///
/// By default, the allocator releases its pages regardless of any blocks still lent out.
///
/// # Examples
///
/// ```
/// use object_allocator::{DropPolicy, ObjectAllocator};
///
/// // The drop policy is set at allocator creation time.
/// let allocator = ObjectAllocator::builder()
///     .object_size(16)
///     .drop_policy(DropPolicy::MustNotDropBlocks)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The allocator releases all pages when dropped, even if some blocks are still in use.
    /// This is the default.
    #[default]
    MayDropBlocks,

    /// The allocator will panic if any blocks are still in use when it is dropped.
    ///
    /// The pages are released before the panic. This turns leaked blocks into a loud failure
    /// at teardown, which is valuable when auditing client code for missing releases.
    MustNotDropBlocks,
}
