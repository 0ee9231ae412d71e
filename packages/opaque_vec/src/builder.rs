use std::alloc::{GlobalAlloc, Layout};
use std::cell::Cell;
use std::marker::PhantomData;

use crate::{Cleanup, DropPolicy, Global, OpaqueVec};

/// Builder for creating an instance of [`OpaqueVec`].
///
/// [`OpaqueVec`] requires the element memory layout to be specified at construction time.
/// Use `.layout()` to provide a specific layout, `.element_size()` to provide a plain byte
/// width or `.layout_of::<T>()` to derive both the layout and the cleanup hook from a type.
///
/// The layout is mandatory, whereas other settings are optional.
///
/// # Examples
///
/// Using a specific layout:
///
/// ```
/// use std::alloc::Layout;
///
/// use opaque_vec::OpaqueVec;
///
/// let layout = Layout::new::<u32>();
/// let vec = OpaqueVec::builder().layout(layout).build();
/// ```
///
/// Using type-based layout, which also installs the destructor of the type:
///
/// ```
/// use opaque_vec::OpaqueVec;
///
/// let vec = OpaqueVec::builder().layout_of::<String>().build();
///
/// assert!(vec.cleanup().is_some());
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) when its allocator is, and can be transferred
/// between threads. However, it is not thread-safe ([`Sync`]) as it contains mutable
/// configuration state.
#[derive(Debug)]
#[must_use]
pub struct OpaqueVecBuilder<A: GlobalAlloc = Global> {
    item_layout: Option<Layout>,
    cleanup: Option<Cleanup>,
    capacity: usize,
    drop_policy: DropPolicy,
    allocator: A,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

/// Capacity of a vector built without an explicit `.capacity()`.
const DEFAULT_CAPACITY: usize = 1;

impl OpaqueVecBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            item_layout: None,
            cleanup: None,
            capacity: DEFAULT_CAPACITY,
            drop_policy: DropPolicy::default(),
            allocator: Global,
            _not_sync: PhantomData,
        }
    }
}

impl<A: GlobalAlloc> OpaqueVecBuilder<A> {
    /// Sets the memory layout of the elements stored in the vector.
    ///
    /// Elements are stored at a stride of the layout's size rounded up to its alignment.
    /// Zero-sized layouts are permitted.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::alloc::Layout;
    ///
    /// use opaque_vec::OpaqueVec;
    ///
    /// let layout = Layout::new::<[u16; 3]>();
    /// let vec = OpaqueVec::builder().layout(layout).build();
    ///
    /// assert_eq!(vec.element_size(), 6);
    /// ```
    #[inline]
    pub fn layout(mut self, layout: Layout) -> Self {
        self.item_layout = Some(layout);
        self
    }

    /// Sets the element layout to `element_size` bytes with an alignment of 1.
    ///
    /// # Panics
    ///
    /// Panics if `element_size` exceeds `isize::MAX`.
    ///
    /// # Examples
    ///
    /// ```
    /// use opaque_vec::OpaqueVec;
    ///
    /// let vec = OpaqueVec::builder().element_size(12).build();
    ///
    /// assert_eq!(vec.element_size(), 12);
    /// assert_eq!(vec.item_layout().align(), 1);
    /// ```
    #[inline]
    pub fn element_size(mut self, element_size: usize) -> Self {
        let layout = Layout::from_size_align(element_size, 1)
            .expect("element size must not exceed isize::MAX bytes");
        self.item_layout = Some(layout);
        self
    }

    /// Sets the element layout from a type and installs the destructor of that type as the
    /// cleanup hook (or no hook at all, if the type has nothing to drop).
    ///
    /// This replaces any hook set earlier via [`cleanup()`](Self::cleanup).
    ///
    /// # Examples
    ///
    /// ```
    /// use opaque_vec::OpaqueVec;
    ///
    /// let plain = OpaqueVec::builder().layout_of::<u64>().build();
    /// assert!(plain.cleanup().is_none());
    ///
    /// let owning = OpaqueVec::builder().layout_of::<Vec<u64>>().build();
    /// assert!(owning.cleanup().is_some());
    /// ```
    #[inline]
    pub fn layout_of<T>(mut self) -> Self {
        self.item_layout = Some(Layout::new::<T>());
        self.cleanup = Cleanup::of::<T>();
        self
    }

    /// Sets the hook invoked on every element that the vector disposes of.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::ptr::NonNull;
    ///
    /// use opaque_vec::{Cleanup, OpaqueVec};
    ///
    /// unsafe fn close_descriptor(element: NonNull<u8>) {
    ///     // SAFETY: The vector only ever holds i32 descriptors.
    ///     let descriptor = unsafe { element.cast::<i32>().read() };
    ///     println!("closing descriptor {descriptor}");
    /// }
    ///
    /// let vec = OpaqueVec::builder()
    ///     .layout_of::<i32>()
    ///     .cleanup(Cleanup::new(close_descriptor))
    ///     .build();
    ///
    /// assert!(vec.cleanup().is_some());
    /// ```
    #[inline]
    pub fn cleanup(mut self, cleanup: Cleanup) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    /// Sets the number of elements the vector can hold before it first grows.
    ///
    /// Defaults to 1. Zero is permitted and defers allocation to the first append.
    ///
    /// # Examples
    ///
    /// ```
    /// use opaque_vec::OpaqueVec;
    ///
    /// let vec = OpaqueVec::builder().layout_of::<u8>().capacity(0).build();
    ///
    /// assert_eq!(vec.capacity(), 0);
    /// ```
    #[inline]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the vector. This governs how to treat
    /// remaining elements when the vector is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use opaque_vec::{DropPolicy, OpaqueVec};
    ///
    /// let vec = OpaqueVec::builder()
    ///     .layout_of::<u32>()
    ///     .drop_policy(DropPolicy::MustNotDropItems)
    ///     .build();
    /// ```
    #[inline]
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Sets the allocator that provides the element storage.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::alloc::System;
    ///
    /// use opaque_vec::OpaqueVec;
    ///
    /// let vec = OpaqueVec::builder()
    ///     .layout_of::<u32>()
    ///     .allocator(System)
    ///     .build();
    ///
    /// assert_eq!(vec.capacity(), 1);
    /// ```
    #[inline]
    pub fn allocator<B: GlobalAlloc>(self, allocator: B) -> OpaqueVecBuilder<B> {
        OpaqueVecBuilder {
            item_layout: self.item_layout,
            cleanup: self.cleanup,
            capacity: self.capacity,
            drop_policy: self.drop_policy,
            allocator,
            _not_sync: PhantomData,
        }
    }

    /// Builds the vector with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if no layout has been set using [`layout`](Self::layout),
    /// [`layout_of`](Self::layout_of) or [`element_size`](Self::element_size).
    ///
    /// Panics if the total size of the initial capacity exceeds `isize::MAX` bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::alloc::Layout;
    ///
    /// use opaque_vec::OpaqueVec;
    ///
    /// let layout = Layout::new::<u32>();
    /// let vec = OpaqueVec::builder().layout(layout).build();
    /// ```
    #[must_use]
    #[inline]
    pub fn build(self) -> OpaqueVec<A> {
        let layout = self.item_layout.expect(
            "Layout must be set using .layout(), .layout_of::<T>() or .element_size() before calling .build()",
        );

        OpaqueVec::new_inner(
            layout,
            self.capacity,
            self.cleanup,
            self.drop_policy,
            self.allocator,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::alloc::System;
    use std::ptr::NonNull;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    // Test trait implementations.
    assert_impl_all!(OpaqueVecBuilder: Send, std::fmt::Debug);
    assert_not_impl_any!(OpaqueVecBuilder: Sync);

    unsafe fn noop_cleanup(_element: NonNull<u8>) {}

    #[test]
    fn builder_new_creates_default_state() {
        let builder = OpaqueVecBuilder::new();
        assert!(builder.item_layout.is_none());
        assert!(builder.cleanup.is_none());
        assert_eq!(builder.capacity, DEFAULT_CAPACITY);
        assert_eq!(builder.drop_policy, DropPolicy::default());
    }

    #[test]
    fn layout_sets_layout_without_cleanup() {
        let layout = Layout::new::<String>();
        let builder = OpaqueVecBuilder::new().layout(layout);
        assert_eq!(builder.item_layout, Some(layout));
        assert!(builder.cleanup.is_none());
    }

    #[test]
    fn layout_of_sets_layout_and_cleanup() {
        let builder = OpaqueVecBuilder::new().layout_of::<String>();
        assert_eq!(builder.item_layout, Some(Layout::new::<String>()));
        assert!(builder.cleanup.is_some());

        let builder = OpaqueVecBuilder::new().layout_of::<u16>();
        assert!(builder.cleanup.is_none());
    }

    #[test]
    fn layout_of_replaces_earlier_cleanup() {
        let builder = OpaqueVecBuilder::new()
            .cleanup(Cleanup::new(noop_cleanup))
            .layout_of::<u64>();
        assert!(builder.cleanup.is_none());
    }

    #[test]
    fn cleanup_after_layout_of_overrides() {
        let builder = OpaqueVecBuilder::new()
            .layout_of::<u64>()
            .cleanup(Cleanup::new(noop_cleanup));
        assert!(builder.cleanup.is_some());
    }

    #[test]
    fn element_size_uses_byte_alignment() {
        let builder = OpaqueVecBuilder::new().element_size(7);
        assert_eq!(
            builder.item_layout,
            Some(Layout::from_size_align(7, 1).unwrap())
        );
    }

    #[test]
    #[should_panic]
    fn element_size_too_large_panics() {
        _ = OpaqueVecBuilder::new().element_size(usize::MAX);
    }

    #[test]
    fn zero_sized_layout_is_accepted() {
        let vec = OpaqueVecBuilder::new().layout_of::<()>().build();
        assert_eq!(vec.element_size(), 0);
        assert_eq!(vec.capacity(), 1);
    }

    #[test]
    fn capacity_sets_initial_capacity() {
        let vec = OpaqueVecBuilder::new().layout_of::<u8>().capacity(33).build();
        assert_eq!(vec.capacity(), 33);
        assert!(vec.is_empty());
    }

    #[test]
    fn drop_policy_sets_policy_correctly() {
        let builder = OpaqueVecBuilder::new().drop_policy(DropPolicy::MustNotDropItems);
        assert_eq!(builder.drop_policy, DropPolicy::MustNotDropItems);

        let builder = OpaqueVecBuilder::new().drop_policy(DropPolicy::MayDropItems);
        assert_eq!(builder.drop_policy, DropPolicy::MayDropItems);
    }

    #[test]
    fn allocator_keeps_other_settings() {
        let builder = OpaqueVecBuilder::new()
            .layout_of::<String>()
            .capacity(5)
            .drop_policy(DropPolicy::MustNotDropItems)
            .allocator(System);

        assert_eq!(builder.item_layout, Some(Layout::new::<String>()));
        assert!(builder.cleanup.is_some());
        assert_eq!(builder.capacity, 5);
        assert_eq!(builder.drop_policy, DropPolicy::MustNotDropItems);

        let vec = builder.build();
        assert_eq!(vec.capacity(), 5);
    }

    #[test]
    #[should_panic]
    fn build_without_layout_panics() {
        let _vec = OpaqueVecBuilder::new().build();
    }
}
