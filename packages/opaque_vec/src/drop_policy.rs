/// Determines what happens to remaining elements when an [`OpaqueVec`][crate::OpaqueVec]
/// is dropped.
///
/// By default, the vector runs the cleanup hook on each remaining element and then releases
/// its storage.
///
/// # Examples
///
/// ```
/// use opaque_vec::{DropPolicy, OpaqueVec};
///
/// // The drop policy is set at creation time.
/// let vec = OpaqueVec::builder()
///     .layout_of::<u32>()
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
///
/// assert_eq!(vec.drop_policy(), DropPolicy::MustNotDropItems);
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// Remaining elements are cleaned up when the vector is dropped. This is the default.
    #[default]
    MayDropItems,

    /// The vector will panic if it still contains elements when it is dropped.
    ///
    /// This may be valuable if elements own resources that must be released in a specific
    /// way before the vector goes away, so that forgetting to empty it is a bug worth
    /// surfacing. Storage is still released when this panic unwinds.
    MustNotDropItems,
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(DropPolicy: Send, Sync, Copy, std::fmt::Debug);

    #[test]
    fn default_is_may_drop_items() {
        assert_eq!(DropPolicy::default(), DropPolicy::MayDropItems);
    }
}
