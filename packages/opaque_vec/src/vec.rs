use std::alloc::{GlobalAlloc, Layout};
use std::ptr::NonNull;
use std::thread;

use tracing::{debug, trace};

use crate::storage::{RawStorage, handle_growth_result};
use crate::{Cleanup, DropPolicy, Error, Global, OpaqueVecBuilder, Result};

/// A growable array of elements whose type is known only by its memory layout.
///
/// Elements are stored contiguously from index 0 and copied in by raw bytes. The vector does
/// not know the element type, so putting elements in and reading them back out are `unsafe`
/// operations in which the caller vouches that the layout (and cleanup hook, if any) matches.
///
/// # Growth
///
/// When an append finds the vector full, the capacity doubles (or becomes 1 if it was 0).
/// Capacity never shrinks. Growth may move the element storage to a new address, so raw
/// pointers obtained from [`as_ptr()`][Self::as_ptr] or [`get_ptr()`][Self::get_ptr] are
/// invalidated by any operation that may grow the vector. The `OpaqueVec` value itself is
/// mutated in place and remains the sole handle to the storage.
///
/// Unused slots (those in `len()..capacity()`) always contain zero bytes.
///
/// # Element cleanup
///
/// If the vector has a [`Cleanup`] hook, the hook is invoked exactly once on every element
/// that the vector disposes of: the element removed by [`erase()`][Self::erase], every element
/// on [`clear()`][Self::clear] and every remaining element when the vector is dropped, in
/// ascending index order. Behavior of the vector if dropped when non-empty is determined by
/// its [drop policy][DropPolicy].
///
/// # Permissive contract
///
/// Out-of-range [`erase()`][Self::erase] is a silent no-op rather than an error, and reads of
/// out-of-range indexes return `None`. For the "no vector at all" state, use
/// `Option<OpaqueVec>` together with [`MaybeOpaqueVec`][crate::MaybeOpaqueVec].
///
/// # Thread safety
///
/// The vector is single-threaded: it is neither [`Send`] nor [`Sync`].
///
/// # Example
///
/// ```rust
/// use opaque_vec::OpaqueVec;
///
/// let mut vec = OpaqueVec::builder().layout_of::<String>().build();
///
/// // SAFETY: String matches the layout used to create the vector.
/// unsafe {
///     vec.push("alpha".to_string());
///     vec.push("beta".to_string());
///     vec.push("gamma".to_string());
/// }
///
/// // The destructor of "beta" runs here and "gamma" moves down one slot.
/// vec.erase(1);
///
/// assert_eq!(vec.len(), 2);
/// // SAFETY: The vector holds String values.
/// assert_eq!(unsafe { vec.get::<String>(1) }.map(String::as_str), Some("gamma"));
///
/// // Remaining elements are dropped with the vector.
/// ```
#[derive(Debug)]
pub struct OpaqueVec<A: GlobalAlloc = Global> {
    /// Element slots. Slots `0..len` hold live elements, the rest are zero bytes.
    storage: RawStorage<A>,

    /// Number of live elements at the start of the storage.
    len: usize,

    /// Invoked on every element the vector disposes of. `None` for elements that own nothing.
    cleanup: Option<Cleanup>,

    drop_policy: DropPolicy,
}

impl OpaqueVec {
    /// Creates a builder for configuring and constructing an [`OpaqueVec`].
    ///
    /// You must specify the element layout using either `.layout()`, `.layout_of::<T>()` or
    /// `.element_size()` before calling `.build()`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use opaque_vec::{DropPolicy, OpaqueVec};
    ///
    /// let vec = OpaqueVec::builder()
    ///     .layout_of::<u64>()
    ///     .capacity(16)
    ///     .drop_policy(DropPolicy::MustNotDropItems)
    ///     .build();
    ///
    /// assert_eq!(vec.capacity(), 16);
    /// ```
    #[cfg_attr(test, mutants::skip)] // Gets mutated to alternate version of itself.
    pub fn builder() -> OpaqueVecBuilder {
        OpaqueVecBuilder::new()
    }

    /// Creates an empty vector with room for exactly one element.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::alloc::Layout;
    ///
    /// use opaque_vec::OpaqueVec;
    ///
    /// let vec = OpaqueVec::new(Layout::new::<u32>(), None);
    ///
    /// assert!(vec.is_empty());
    /// assert_eq!(vec.capacity(), 1);
    /// assert_eq!(vec.element_size(), 4);
    /// ```
    #[must_use]
    pub fn new(layout: Layout, cleanup: Option<Cleanup>) -> Self {
        Self::with_capacity(1, layout, cleanup)
    }

    /// Creates an empty vector with room for exactly `capacity` elements.
    ///
    /// A capacity of zero is legal; such a vector allocates on its first append.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::alloc::Layout;
    ///
    /// use opaque_vec::{Cleanup, OpaqueVec};
    ///
    /// let vec = OpaqueVec::with_capacity(
    ///     100,
    ///     Layout::new::<Vec<u8>>(),
    ///     Cleanup::of::<Vec<u8>>(),
    /// );
    ///
    /// assert_eq!(vec.capacity(), 100);
    /// assert_eq!(vec.len(), 0);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the total size of `capacity` elements exceeds `isize::MAX` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize, layout: Layout, cleanup: Option<Cleanup>) -> Self {
        Self::new_inner(layout, capacity, cleanup, DropPolicy::default(), Global)
    }
}

impl<A: GlobalAlloc> OpaqueVec<A> {
    #[must_use]
    pub(crate) fn new_inner(
        layout: Layout,
        capacity: usize,
        cleanup: Option<Cleanup>,
        drop_policy: DropPolicy,
        allocator: A,
    ) -> Self {
        let item_layout = layout.pad_to_align();

        debug!(
            element_size = item_layout.size(),
            align = item_layout.align(),
            capacity,
            has_cleanup = cleanup.is_some(),
            "creating opaque vec"
        );

        Self {
            storage: RawStorage::new(item_layout, capacity, allocator),
            len: 0,
            cleanup,
            drop_policy,
        }
    }

    /// The number of live elements in the vector.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// The number of elements the vector can hold without growing.
    ///
    /// This is always at least [`len()`][Self::len].
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Whether the vector has no live elements.
    ///
    /// An empty vector may still be holding unused capacity.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The byte width of one element slot.
    ///
    /// This is the size of the layout the vector was created with, rounded up to a multiple
    /// of its alignment.
    #[must_use]
    #[inline]
    pub fn element_size(&self) -> usize {
        self.storage.item_layout().size()
    }

    /// The memory layout of one element slot.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::alloc::Layout;
    ///
    /// use opaque_vec::OpaqueVec;
    ///
    /// // A 3-byte element with 2-byte alignment occupies 4 bytes.
    /// let layout = Layout::from_size_align(3, 2).unwrap();
    /// let vec = OpaqueVec::new(layout, None);
    ///
    /// assert_eq!(vec.item_layout(), Layout::from_size_align(4, 2).unwrap());
    /// assert_eq!(vec.element_size(), 4);
    /// ```
    #[must_use]
    #[inline]
    pub fn item_layout(&self) -> Layout {
        self.storage.item_layout()
    }

    /// The cleanup hook invoked on elements the vector disposes of, if any.
    #[must_use]
    #[inline]
    pub fn cleanup(&self) -> Option<Cleanup> {
        self.cleanup
    }

    /// The policy applied to remaining elements when the vector is dropped.
    #[must_use]
    #[inline]
    pub fn drop_policy(&self) -> DropPolicy {
        self.drop_policy
    }

    /// The allocator that provides the element storage.
    #[must_use]
    #[inline]
    pub fn allocator(&self) -> &A {
        self.storage.allocator()
    }

    /// Pointer to the first byte of slot 0.
    ///
    /// The pointer is dangling (but aligned) if the vector has no allocated memory. It is
    /// invalidated by any operation that grows the vector.
    #[must_use]
    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.storage.as_ptr()
    }

    /// Pointer to the first byte of the element at `index`, or `None` if `index` is not
    /// less than [`len()`][Self::len].
    ///
    /// The pointer is invalidated by any operation that grows or compacts the vector.
    ///
    /// # Example
    ///
    /// ```rust
    /// use opaque_vec::OpaqueVec;
    ///
    /// let mut vec = OpaqueVec::builder().element_size(2).build();
    ///
    /// let bytes = [0xAB_u8, 0xCD];
    /// // SAFETY: Two plain bytes are a valid element for a 2-byte vector without cleanup.
    /// unsafe { vec.push_raw(std::ptr::NonNull::from(&bytes).cast()) };
    ///
    /// let element = vec.get_ptr(0).unwrap();
    /// // SAFETY: The element is live and 2 bytes long.
    /// assert_eq!(unsafe { element.cast::<[u8; 2]>().read() }, [0xAB, 0xCD]);
    ///
    /// assert!(vec.get_ptr(1).is_none());
    /// ```
    #[must_use]
    #[inline]
    pub fn get_ptr(&self, index: usize) -> Option<NonNull<u8>> {
        (index < self.len).then(|| self.storage.slot(index))
    }

    /// Shared reference to the element at `index` as a `T`, or `None` if `index` is not less
    /// than [`len()`][Self::len].
    ///
    /// # Safety
    ///
    /// The caller must ensure that the element at `index` is a valid `T` and that the layout
    /// of `T` is compatible with the vector's item layout.
    #[must_use]
    pub unsafe fn get<T>(&self, index: usize) -> Option<&T> {
        self.debug_assert_layout_compatible::<T>();

        self.get_ptr(index).map(|element| {
            // SAFETY: The element is live (index < len), and the caller guarantees it is a
            // valid, suitably aligned T. The reference borrows self, so no mutation or
            // growth can happen while it exists.
            unsafe { element.cast::<T>().as_ref() }
        })
    }

    /// Exclusive reference to the element at `index` as a `T`, or `None` if `index` is not
    /// less than [`len()`][Self::len].
    ///
    /// # Safety
    ///
    /// The caller must ensure that the element at `index` is a valid `T` and that the layout
    /// of `T` is compatible with the vector's item layout.
    #[must_use]
    pub unsafe fn get_mut<T>(&mut self, index: usize) -> Option<&mut T> {
        self.debug_assert_layout_compatible::<T>();

        self.get_ptr(index).map(|element| {
            // SAFETY: The element is live (index < len), and the caller guarantees it is a
            // valid, suitably aligned T. We hold &mut self for the lifetime of the reference.
            unsafe { element.cast::<T>().as_mut() }
        })
    }

    /// Ensures that the vector can hold at least `additional` more elements without growing.
    ///
    /// If growth is needed, the capacity at least doubles, or jumps straight to the required
    /// capacity if doubling is not enough. Does nothing if capacity is already sufficient.
    ///
    /// # Example
    ///
    /// ```rust
    /// use opaque_vec::OpaqueVec;
    ///
    /// let mut vec = OpaqueVec::builder().layout_of::<u32>().build();
    ///
    /// vec.reserve(10);
    /// assert!(vec.capacity() >= 10);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the required capacity exceeds `isize::MAX` bytes. Aborts via
    /// [`std::alloc::handle_alloc_error`] if the allocator cannot satisfy the request.
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub fn reserve(&mut self, additional: usize) {
        handle_growth_result(self.try_reserve(additional));
    }

    /// Fallible version of [`reserve()`][Self::reserve].
    ///
    /// On error, the vector is left unchanged.
    ///
    /// # Example
    ///
    /// ```rust
    /// use opaque_vec::{Error, OpaqueVec};
    ///
    /// let mut vec = OpaqueVec::builder().layout_of::<u64>().build();
    ///
    /// assert_eq!(vec.try_reserve(usize::MAX), Err(Error::CapacityOverflow));
    /// assert_eq!(vec.capacity(), 1);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityOverflow`] if the required capacity does not fit in the
    /// address space and [`Error::AllocationFailed`] if the allocator returns no memory.
    pub fn try_reserve(&mut self, additional: usize) -> Result<()> {
        let required = self
            .len
            .checked_add(additional)
            .ok_or(Error::CapacityOverflow)?;

        if self.capacity() >= required {
            return Ok(());
        }

        let new_capacity =
            doubled_capacity(self.capacity()).map_or(required, |doubled| doubled.max(required));

        self.storage.try_grow_to(new_capacity)
    }

    /// Appends an element by copying [`element_size()`][Self::element_size] bytes from `src`
    /// into the slot at index [`len()`][Self::len], growing the vector first if it is full.
    ///
    /// Ownership of the element moves into the vector: the bytes at `src` must not be used
    /// as a live element afterwards (for example, by dropping a value they belong to).
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::mem::ManuallyDrop;
    /// use std::ptr::NonNull;
    ///
    /// use opaque_vec::OpaqueVec;
    ///
    /// let mut vec = OpaqueVec::builder().layout_of::<String>().build();
    ///
    /// let value = ManuallyDrop::new("moved in by bytes".to_string());
    /// // SAFETY: The bytes are a valid String and we relinquish ownership of them.
    /// unsafe { vec.push_raw(NonNull::from(&*value).cast()) };
    ///
    /// // SAFETY: The vector holds String values.
    /// assert_eq!(unsafe { vec.get::<String>(0) }.unwrap(), "moved in by bytes");
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if growth would exceed `isize::MAX` bytes. Aborts via
    /// [`std::alloc::handle_alloc_error`] if the allocator cannot satisfy the request.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    /// - `src` is valid for reads of [`element_size()`][Self::element_size] bytes and does not
    ///   point into this vector's own storage. This is the padded slot width, not necessarily
    ///   the size of the layout the vector was created with: for a layout of size 3 and
    ///   alignment 2, four bytes are read from `src`, so a bare 3-byte record is too short.
    /// - The bytes form a valid element for the vector's cleanup hook (if any) and for any
    ///   typed access the caller later performs.
    pub unsafe fn push_raw(&mut self, src: NonNull<u8>) {
        handle_growth_result(self.grow_if_full());

        // SAFETY: Forwarding safety requirements to the caller; there is now a vacant slot.
        unsafe {
            self.copy_into_vacant_slot(src);
        }
    }

    /// Fallible version of [`push_raw()`][Self::push_raw].
    ///
    /// On error, the vector is left unchanged and the element at `src` is not consumed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityOverflow`] if the grown capacity does not fit in the address
    /// space and [`Error::AllocationFailed`] if the allocator returns no memory.
    ///
    /// # Safety
    ///
    /// Same as [`push_raw()`][Self::push_raw].
    pub unsafe fn try_push_raw(&mut self, src: NonNull<u8>) -> Result<()> {
        self.grow_if_full()?;

        // SAFETY: Forwarding safety requirements to the caller; there is now a vacant slot.
        unsafe {
            self.copy_into_vacant_slot(src);
        }

        Ok(())
    }

    /// Appends a value, growing the vector first if it is full.
    ///
    /// # Example
    ///
    /// ```rust
    /// use opaque_vec::OpaqueVec;
    ///
    /// let mut vec = OpaqueVec::builder().layout_of::<u64>().build();
    ///
    /// // SAFETY: u64 matches the layout used to create the vector.
    /// unsafe {
    ///     vec.push(1_u64);
    ///     vec.push(2_u64);
    /// }
    ///
    /// assert_eq!(vec.len(), 2);
    /// // SAFETY: The vector holds u64 values.
    /// assert_eq!(unsafe { vec.get::<u64>(1) }, Some(&2));
    /// ```
    ///
    /// # Panics
    ///
    /// In debug builds, panics if the layout of `T` is not compatible with the vector's item
    /// layout. Panics if growth would exceed `isize::MAX` bytes.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    /// - The layout of `T` is compatible with the vector's item layout (same size, alignment
    ///   no greater than the item alignment).
    /// - The vector's cleanup hook (if any) is valid to invoke on a `T`.
    /// - If `T` contains references or other lifetime-dependent data, those lifetimes remain
    ///   valid for as long as the value stays in the vector.
    pub unsafe fn push<T>(&mut self, value: T) {
        self.debug_assert_layout_compatible::<T>();

        handle_growth_result(self.grow_if_full());

        // SAFETY: grow_if_full() guarantees that slot `len` is within capacity and vacant,
        // and the caller guarantees it is suitably sized and aligned for T.
        unsafe {
            self.storage.slot(self.len).cast::<T>().write(value);
        }

        // Cannot overflow because len < capacity before the increment.
        self.len = self.len.wrapping_add(1);
    }

    /// Removes the element at `index`, invoking the cleanup hook on it and shifting every
    /// following element down by one slot.
    ///
    /// If `index` is not less than [`len()`][Self::len], this does nothing. Capacity is
    /// never reduced. Takes O(`len() - index`) time.
    ///
    /// # Example
    ///
    /// ```rust
    /// use opaque_vec::OpaqueVec;
    ///
    /// let mut vec = OpaqueVec::builder().layout_of::<char>().build();
    ///
    /// // SAFETY: char matches the layout used to create the vector.
    /// unsafe {
    ///     for c in ['a', 'b', 'c', 'd'] {
    ///         vec.push(c);
    ///     }
    /// }
    ///
    /// vec.erase(1);
    /// vec.erase(100); // Out of range, nothing happens.
    ///
    /// // SAFETY: The vector holds char values.
    /// let remaining: Vec<char> = (0..vec.len())
    ///     .map(|i| unsafe { *vec.get::<char>(i).unwrap() })
    ///     .collect();
    /// assert_eq!(remaining, ['a', 'c', 'd']);
    /// ```
    pub fn erase(&mut self, index: usize) {
        if index >= self.len {
            return;
        }

        let original_len = self.len;

        // The slots from `index` onward are outside the live range until compaction is done,
        // so a panicking cleanup hook leaks them instead of exposing a dead element.
        self.len = index;

        if let Some(cleanup) = self.cleanup {
            // Cannot overflow because index < original_len.
            let leaked = original_len.wrapping_sub(index);

            // If the hook panics, the leaked slots become unused slots and must read as zero.
            let storage = scopeguard::guard(&mut self.storage, move |storage| {
                storage.zero_slots(index, leaked);
            });

            // SAFETY: The element at `index` was live and is never touched again as a live
            // element because it is overwritten by compaction below.
            unsafe {
                cleanup.call(storage.slot(index));
            }

            // The hook returned, so compaction takes care of the slots instead.
            scopeguard::ScopeGuard::into_inner(storage);
        }

        self.close_gap(index, original_len);
    }

    /// Moves the element at `index` out of the vector without invoking the cleanup hook,
    /// shifting every following element down by one slot.
    ///
    /// Returns `None` if `index` is not less than [`len()`][Self::len].
    ///
    /// # Example
    ///
    /// ```rust
    /// use opaque_vec::OpaqueVec;
    ///
    /// let mut vec = OpaqueVec::builder().layout_of::<String>().build();
    ///
    /// // SAFETY: String matches the layout used to create the vector.
    /// unsafe { vec.push("kept alive".to_string()) };
    ///
    /// // SAFETY: The vector holds String values.
    /// let value = unsafe { vec.remove::<String>(0) };
    ///
    /// assert_eq!(value.as_deref(), Some("kept alive"));
    /// assert!(vec.is_empty());
    /// ```
    ///
    /// # Safety
    ///
    /// The caller must ensure that the element at `index` is a valid `T` and that the layout
    /// of `T` is compatible with the vector's item layout.
    #[must_use]
    pub unsafe fn remove<T>(&mut self, index: usize) -> Option<T> {
        self.debug_assert_layout_compatible::<T>();

        if index >= self.len {
            return None;
        }

        // SAFETY: The element is live and the caller guarantees it is a valid T. Its slot is
        // overwritten by compaction below, so ownership moves to the caller exactly once.
        let value = unsafe { self.storage.slot(index).cast::<T>().read() };

        let original_len = self.len;
        self.close_gap(index, original_len);

        Some(value)
    }

    /// Invokes the cleanup hook on every element in ascending index order and leaves the
    /// vector empty. Capacity is kept.
    ///
    /// # Example
    ///
    /// ```rust
    /// use opaque_vec::OpaqueVec;
    ///
    /// let mut vec = OpaqueVec::builder().layout_of::<Vec<u8>>().build();
    ///
    /// // SAFETY: Vec<u8> matches the layout used to create the vector.
    /// unsafe {
    ///     vec.push(vec![1_u8, 2, 3]);
    ///     vec.push(vec![4_u8]);
    /// }
    ///
    /// let capacity = vec.capacity();
    /// vec.clear();
    ///
    /// assert!(vec.is_empty());
    /// assert_eq!(vec.capacity(), capacity);
    /// ```
    pub fn clear(&mut self) {
        let cleaned_up = self.clean_up_all();
        self.storage.zero_slots(0, cleaned_up);
    }

    fn grow_if_full(&mut self) -> Result<()> {
        if self.len < self.capacity() {
            return Ok(());
        }

        let new_capacity = doubled_capacity(self.capacity()).ok_or(Error::CapacityOverflow)?;

        self.storage.try_grow_to(new_capacity)
    }

    /// # Safety
    ///
    /// Slot `len` must be within capacity. The requirements of `push_raw()` apply to `src`.
    unsafe fn copy_into_vacant_slot(&mut self, src: NonNull<u8>) {
        debug_assert!(self.len < self.capacity());

        // SAFETY: The destination slot is within our allocation and vacant. The caller
        // guarantees that src is readable for element_size() bytes and does not overlap it.
        unsafe {
            src.copy_to_nonoverlapping(self.storage.slot(self.len), self.element_size());
        }

        // Cannot overflow because len < capacity before the increment.
        self.len = self.len.wrapping_add(1);
    }

    /// Shifts the elements after the dead slot at `index` down by one and zeroes the slot
    /// this vacates at the end. `original_len` is the length including the dead slot.
    fn close_gap(&mut self, index: usize, original_len: usize) {
        // Cannot overflow because index < original_len.
        let new_len = original_len.wrapping_sub(1);
        let trailing = new_len.wrapping_sub(index);

        if trailing > 0 {
            self.storage.move_slots(index.wrapping_add(1), index, trailing);
        }

        self.storage.zero_slots(new_len, 1);
        self.len = new_len;
    }

    /// Invokes the cleanup hook on every live element in ascending index order and empties
    /// the vector. Returns the number of elements that were live.
    fn clean_up_all(&mut self) -> usize {
        let original_len = self.len;

        // Nothing is live while the hooks run, so a panicking hook leaks the remainder
        // instead of exposing already cleaned up elements.
        self.len = 0;

        if let Some(cleanup) = self.cleanup {
            trace!(count = original_len, "cleaning up opaque vec elements");

            // If a hook panics, every formerly live slot is unused and must read as zero.
            let storage = scopeguard::guard(&mut self.storage, move |storage| {
                storage.zero_slots(0, original_len);
            });

            for index in 0..original_len {
                // SAFETY: Every element in 0..original_len was live, and each one is cleaned
                // up exactly once because the vector no longer considers any of them live.
                unsafe {
                    cleanup.call(storage.slot(index));
                }
            }

            scopeguard::ScopeGuard::into_inner(storage);
        }

        original_len
    }

    fn debug_assert_layout_compatible<T>(&self) {
        let layout = Layout::new::<T>();

        debug_assert_eq!(
            layout.size(),
            self.element_size(),
            "size of {} does not match the element size of the vector",
            std::any::type_name::<T>()
        );
        debug_assert!(
            layout.align() <= self.item_layout().align(),
            "alignment of {} exceeds the element alignment of the vector",
            std::any::type_name::<T>()
        );
    }
}

impl<A: GlobalAlloc> Drop for OpaqueVec<A> {
    fn drop(&mut self) {
        let original_len = self.clean_up_all();

        debug!(
            dropped_elements = original_len,
            capacity = self.capacity(),
            "dropping opaque vec"
        );

        // The storage is released after this returns, even if we panic here.
        //
        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if !thread::panicking() && matches!(self.drop_policy, DropPolicy::MustNotDropItems) {
            assert!(
                original_len == 0,
                "dropped a non-empty OpaqueVec with {original_len} items - this is forbidden by DropPolicy::MustNotDropItems"
            );
        }
    }
}

/// The next capacity under the doubling growth law, or `None` on overflow.
fn doubled_capacity(capacity: usize) -> Option<usize> {
    if capacity == 0 {
        Some(1)
    } else {
        capacity.checked_mul(2)
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    clippy::items_after_statements,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::slice;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(OpaqueVec: std::fmt::Debug);
    assert_not_impl_any!(OpaqueVec: Send, Sync);

    thread_local! {
        static CLEANED_UP: RefCell<Vec<u32>> = const { RefCell::new(Vec::new()) };
    }

    unsafe fn record_cleanup(element: NonNull<u8>) {
        let value = unsafe { element.cast::<u32>().read() };
        CLEANED_UP.with_borrow_mut(|seen| seen.push(value));
    }

    fn take_cleaned_up() -> Vec<u32> {
        CLEANED_UP.with_borrow_mut(std::mem::take)
    }

    fn recording_vec(values: &[u32]) -> OpaqueVec {
        take_cleaned_up();

        let mut vec = OpaqueVec::new(Layout::new::<u32>(), Some(Cleanup::new(record_cleanup)));
        for value in values {
            unsafe { vec.push(*value) };
        }
        vec
    }

    fn values_of(vec: &OpaqueVec) -> Vec<u32> {
        (0..vec.len())
            .map(|index| unsafe { *vec.get::<u32>(index).unwrap() })
            .collect()
    }

    fn unused_bytes_of<A: GlobalAlloc>(vec: &OpaqueVec<A>) -> &[u8] {
        let used = vec.len() * vec.element_size();
        let total = vec.capacity() * vec.element_size();
        let all = unsafe { slice::from_raw_parts(vec.as_ptr().as_ptr(), total) };
        &all[used..]
    }

    #[test]
    fn smoke_test() {
        let mut vec = OpaqueVec::builder().layout_of::<String>().build();

        assert_eq!(vec.len(), 0);
        assert!(vec.is_empty());

        unsafe {
            vec.push("Hello".to_string());
            vec.push("World".to_string());
            vec.push("Test".to_string());
        }

        assert_eq!(vec.len(), 3);
        assert!(!vec.is_empty());
        assert!(vec.capacity() >= 3);

        unsafe {
            assert_eq!(vec.get::<String>(0).unwrap(), "Hello");
            assert_eq!(vec.get::<String>(1).unwrap(), "World");
            assert_eq!(vec.get::<String>(2).unwrap(), "Test");
        }

        vec.erase(1);

        unsafe {
            assert_eq!(vec.get::<String>(1).unwrap(), "Test");
        }
        assert_eq!(vec.len(), 2);
    }

    #[test]
    fn fresh_vec_is_empty_with_capacity_one() {
        let vec = OpaqueVec::new(Layout::new::<u64>(), None);

        assert_eq!(vec.len(), 0);
        assert!(vec.is_empty());
        assert_eq!(vec.capacity(), 1);
        assert_eq!(vec.element_size(), 8);
        assert!(vec.cleanup().is_none());
        assert_eq!(vec.drop_policy(), DropPolicy::MayDropItems);
    }

    #[test]
    fn growth_doubles_from_zero() {
        let mut vec = OpaqueVec::with_capacity(0, Layout::new::<u32>(), None);
        assert_eq!(vec.capacity(), 0);

        let mut observed = Vec::new();
        for value in 0..9_u32 {
            unsafe { vec.push(value) };
            observed.push(vec.capacity());
        }

        assert_eq!(observed, [1, 2, 4, 4, 8, 8, 8, 8, 16]);
    }

    #[test]
    fn growth_doubles_from_reserved_capacity() {
        let mut vec = OpaqueVec::with_capacity(3, Layout::new::<u8>(), None);

        for value in 0..3_u8 {
            unsafe { vec.push(value) };
        }
        assert_eq!(vec.capacity(), 3);

        unsafe { vec.push(3_u8) };
        assert_eq!(vec.capacity(), 6);
    }

    #[test]
    fn push_then_read_back_last() {
        let mut vec = OpaqueVec::new(Layout::new::<u64>(), None);

        for value in [10_u64, 20, 30] {
            let len_before = vec.len();
            unsafe { vec.push(value) };

            assert_eq!(vec.len(), len_before + 1);
            assert_eq!(unsafe { vec.get::<u64>(vec.len() - 1) }, Some(&value));
            assert!(vec.capacity() >= vec.len());
        }
    }

    #[test]
    fn push_raw_copies_bytes() {
        let mut vec = OpaqueVec::builder().element_size(3).build();

        let first = [1_u8, 2, 3];
        let second = [4_u8, 5, 6];
        unsafe {
            vec.push_raw(NonNull::from(&first).cast());
            vec.push_raw(NonNull::from(&second).cast());
        }

        assert_eq!(vec.len(), 2);
        unsafe {
            assert_eq!(vec.get_ptr(0).unwrap().cast::<[u8; 3]>().read(), first);
            assert_eq!(vec.get_ptr(1).unwrap().cast::<[u8; 3]>().read(), second);
        }
    }

    #[test]
    fn try_push_raw_succeeds_with_room_to_grow() {
        let mut vec = OpaqueVec::with_capacity(0, Layout::new::<u16>(), None);

        let value = 0x1234_u16;
        unsafe { vec.try_push_raw(NonNull::from(&value).cast()) }.unwrap();

        assert_eq!(unsafe { vec.get::<u16>(0) }, Some(&0x1234));
        assert_eq!(vec.capacity(), 1);
    }

    #[test]
    fn get_mut_modifies_in_place() {
        let mut vec = OpaqueVec::new(Layout::new::<i32>(), None);
        unsafe { vec.push(5_i32) };

        unsafe {
            *vec.get_mut::<i32>(0).unwrap() += 10;
            assert!(vec.get_mut::<i32>(1).is_none());
        }

        assert_eq!(unsafe { vec.get::<i32>(0) }, Some(&15));
    }

    #[test]
    fn erase_compacts_and_cleans_up_once() {
        let mut vec = recording_vec(&[100, 101, 102, 103]);
        let capacity = vec.capacity();

        vec.erase(1);

        assert_eq!(values_of(&vec), [100, 102, 103]);
        assert_eq!(take_cleaned_up(), [101]);
        assert_eq!(vec.capacity(), capacity);
    }

    #[test]
    fn erase_last_element() {
        let mut vec = recording_vec(&[1, 2, 3]);

        vec.erase(2);

        assert_eq!(values_of(&vec), [1, 2]);
        assert_eq!(take_cleaned_up(), [3]);
    }

    #[test]
    fn erase_out_of_range_is_noop() {
        let mut vec = recording_vec(&[7, 8, 9]);
        let capacity = vec.capacity();

        vec.erase(vec.len());
        vec.erase(vec.len() + 5);
        vec.erase(usize::MAX);

        assert_eq!(values_of(&vec), [7, 8, 9]);
        assert_eq!(vec.capacity(), capacity);
        assert!(take_cleaned_up().is_empty());
    }

    #[test]
    fn erase_zeroes_vacated_slot() {
        let mut vec = OpaqueVec::new(Layout::new::<u32>(), None);
        for value in [0xFFFF_FFFF_u32, 0xEEEE_EEEE, 0xDDDD_DDDD] {
            unsafe { vec.push(value) };
        }

        vec.erase(0);

        assert!(unused_bytes_of(&vec).iter().all(|b| *b == 0));
        assert_eq!(unused_bytes_of(&vec).len(), 8);
    }

    #[test]
    fn grown_slots_are_zeroed() {
        let mut vec = OpaqueVec::new(Layout::new::<u64>(), None);

        for value in 1..=5_u64 {
            unsafe { vec.push(u64::MAX - value) };
            assert!(unused_bytes_of(&vec).iter().all(|b| *b == 0));
        }

        assert_eq!(vec.capacity(), 8);
    }

    #[test]
    fn remove_moves_value_out_without_cleanup() {
        let mut vec = recording_vec(&[1, 2, 3]);

        let removed = unsafe { vec.remove::<u32>(0) };

        assert_eq!(removed, Some(1));
        assert_eq!(values_of(&vec), [2, 3]);
        assert!(take_cleaned_up().is_empty());

        assert_eq!(unsafe { vec.remove::<u32>(2) }, None);
    }

    #[test]
    fn clear_cleans_up_in_order_and_keeps_capacity() {
        let mut vec = recording_vec(&[5, 6, 7]);
        let capacity = vec.capacity();

        vec.clear();

        assert!(vec.is_empty());
        assert_eq!(vec.capacity(), capacity);
        assert_eq!(take_cleaned_up(), [5, 6, 7]);
        assert!(unused_bytes_of(&vec).iter().all(|b| *b == 0));
    }

    #[test]
    fn drop_cleans_up_every_element_in_ascending_order() {
        let vec = recording_vec(&[40, 41, 42, 43, 44]);

        drop(vec);

        assert_eq!(take_cleaned_up(), [40, 41, 42, 43, 44]);
    }

    #[test]
    fn drop_of_empty_vec_runs_no_cleanup() {
        let vec = recording_vec(&[]);

        drop(vec);

        assert!(take_cleaned_up().is_empty());
    }

    #[test]
    fn layout_of_drops_values_natively() {
        let drops = Rc::new(Cell::new(0_usize));

        struct Counted(Rc<Cell<usize>>);

        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let mut vec = OpaqueVec::builder().layout_of::<Counted>().build();
        for _ in 0..4 {
            unsafe { vec.push(Counted(Rc::clone(&drops))) };
        }

        vec.erase(0);
        assert_eq!(drops.get(), 1);

        drop(vec);
        assert_eq!(drops.get(), 4);
        assert_eq!(Rc::strong_count(&drops), 1);
    }

    #[test]
    fn reserve_grows_to_requirement() {
        let mut vec = OpaqueVec::new(Layout::new::<u32>(), None);

        vec.reserve(0);
        assert_eq!(vec.capacity(), 1);

        // Doubling (2) is not enough, so the requirement wins.
        vec.reserve(10);
        assert_eq!(vec.capacity(), 10);

        for value in 0..10_u32 {
            unsafe { vec.push(value) };
        }
        assert_eq!(vec.capacity(), 10);

        // Doubling (20) exceeds the requirement (11).
        vec.reserve(1);
        assert_eq!(vec.capacity(), 20);
        assert_eq!(values_of(&vec), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn try_reserve_overflow_leaves_vec_intact() {
        let mut vec = recording_vec(&[1, 2]);
        let capacity = vec.capacity();

        assert_eq!(vec.try_reserve(usize::MAX), Err(Error::CapacityOverflow));
        assert_eq!(vec.try_reserve(usize::MAX / 2), Err(Error::CapacityOverflow));

        assert_eq!(vec.capacity(), capacity);
        assert_eq!(values_of(&vec), [1, 2]);
    }

    #[test]
    #[should_panic]
    fn reserve_overflow_panics() {
        let mut vec = OpaqueVec::new(Layout::new::<u64>(), None);
        vec.reserve(usize::MAX);
    }

    #[test]
    fn zero_sized_elements_follow_growth_law() {
        let mut vec = OpaqueVec::with_capacity(0, Layout::new::<()>(), None);

        for _ in 0..5 {
            unsafe { vec.push(()) };
        }

        assert_eq!(vec.len(), 5);
        assert_eq!(vec.capacity(), 8);
        assert_eq!(vec.element_size(), 0);

        vec.erase(2);
        assert_eq!(vec.len(), 4);
        assert_eq!(unsafe { vec.get::<()>(3) }, Some(&()));
    }

    #[test]
    fn over_aligned_elements_stay_aligned() {
        #[repr(align(64))]
        struct CacheLine(u8);

        let mut vec = OpaqueVec::with_capacity(0, Layout::new::<CacheLine>(), None);
        for value in 0..5_u8 {
            unsafe { vec.push(CacheLine(value)) };
        }

        for index in 0..vec.len() {
            let element = vec.get_ptr(index).unwrap();
            assert!(element.cast::<CacheLine>().is_aligned());
            assert_eq!(
                unsafe { element.cast::<CacheLine>().as_ref() }.0,
                u8::try_from(index).unwrap()
            );
        }
    }

    thread_local! {
        static EXPLOSIONS: Cell<usize> = const { Cell::new(0) };
    }

    unsafe fn explode(_element: NonNull<u8>) {
        EXPLOSIONS.with(|calls| calls.set(calls.get() + 1));
        panic!("cleanup failed");
    }

    fn exploding_vec(values: &[u32]) -> RefCell<OpaqueVec> {
        EXPLOSIONS.with(|calls| calls.set(0));

        let mut vec = OpaqueVec::new(Layout::new::<u32>(), Some(Cleanup::new(explode)));
        for value in values {
            unsafe { vec.push(*value) };
        }
        RefCell::new(vec)
    }

    #[test]
    fn panicking_cleanup_does_not_clean_up_twice() {
        let vec = exploding_vec(&[0xAAAA_AAAA, 0xBBBB_BBBB, 0xCCCC_CCCC]);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            vec.borrow_mut().erase(0);
        }));
        assert!(result.is_err());

        // The erased element and everything after it are no longer live.
        let vec = vec.into_inner();
        assert_eq!(vec.len(), 0);
        assert_eq!(vec.capacity(), 4);
        assert_eq!(EXPLOSIONS.with(Cell::get), 1);

        // The leaked elements do not linger as stale bytes in unused slots.
        assert_eq!(unused_bytes_of(&vec).len(), 16);
        assert!(unused_bytes_of(&vec).iter().all(|b| *b == 0));

        // Nothing is live, so dropping runs no further cleanup.
        drop(vec);
        assert_eq!(EXPLOSIONS.with(Cell::get), 1);
    }

    #[test]
    fn panicking_cleanup_in_middle_erase_zeroes_leaked_slots() {
        let vec = exploding_vec(&[0x1111_1111, 0x2222_2222, 0x3333_3333]);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            vec.borrow_mut().erase(1);
        }));
        assert!(result.is_err());

        let vec = vec.into_inner();
        assert_eq!(vec.len(), 1);
        assert_eq!(unsafe { vec.get_ptr(0).unwrap().cast::<u32>().read() }, 0x1111_1111);
        assert!(unused_bytes_of(&vec).iter().all(|b| *b == 0));
    }

    #[test]
    fn panicking_cleanup_during_clear_zeroes_all_slots() {
        let vec = exploding_vec(&[0xAAAA_AAAA, 0xBBBB_BBBB, 0xCCCC_CCCC]);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            vec.borrow_mut().clear();
        }));
        assert!(result.is_err());

        let vec = vec.into_inner();
        assert_eq!(vec.len(), 0);
        assert_eq!(EXPLOSIONS.with(Cell::get), 1);
        assert_eq!(unused_bytes_of(&vec).len(), 16);
        assert!(unused_bytes_of(&vec).iter().all(|b| *b == 0));

        drop(vec);
        assert_eq!(EXPLOSIONS.with(Cell::get), 1);
    }

    #[test]
    fn push_raw_copies_padded_slot_width() {
        // A 3-byte element with 2-byte alignment occupies a 4-byte slot, and all 4 bytes are
        // copied from the source.
        let layout = Layout::from_size_align(3, 2).unwrap();
        let mut vec = OpaqueVec::new(layout, None);
        assert_eq!(vec.element_size(), 4);

        let record = [1_u8, 2, 3, 4];
        unsafe { vec.push_raw(NonNull::from(&record).cast()) };

        assert_eq!(
            unsafe { vec.get_ptr(0).unwrap().cast::<[u8; 4]>().read() },
            record
        );
    }

    #[test]
    fn try_push_raw_reports_capacity_overflow_when_full() {
        let mut vec = OpaqueVec::with_capacity(usize::MAX, Layout::new::<()>(), None);
        assert_eq!(vec.capacity(), usize::MAX);

        // Zero-sized elements need no bytes written, so the vector can be filled directly.
        vec.len = vec.capacity();

        let result = unsafe { vec.try_push_raw(NonNull::<()>::dangling().cast()) };

        assert_eq!(result, Err(Error::CapacityOverflow));
        assert_eq!(vec.len(), usize::MAX);
        assert_eq!(vec.capacity(), usize::MAX);
    }

    #[test]
    #[should_panic]
    fn push_raw_panics_on_capacity_overflow_when_full() {
        let mut vec = OpaqueVec::with_capacity(usize::MAX, Layout::new::<()>(), None);
        vec.len = vec.capacity();

        unsafe { vec.push_raw(NonNull::<()>::dangling().cast()) };
    }

    #[test]
    #[should_panic]
    fn must_not_drop_items_panics_when_non_empty() {
        let mut vec = OpaqueVec::builder()
            .layout_of::<u32>()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        unsafe { vec.push(1_u32) };

        drop(vec);
    }

    #[test]
    fn must_not_drop_items_allows_empty_drop() {
        let mut vec = OpaqueVec::builder()
            .layout_of::<u32>()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        unsafe { vec.push(1_u32) };
        vec.erase(0);

        drop(vec);
    }

    #[test]
    fn doubled_capacity_law() {
        assert_eq!(doubled_capacity(0), Some(1));
        assert_eq!(doubled_capacity(1), Some(2));
        assert_eq!(doubled_capacity(12), Some(24));
        assert_eq!(doubled_capacity(usize::MAX), None);
    }
}
