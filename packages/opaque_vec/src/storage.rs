use std::alloc::{GlobalAlloc, Layout};
use std::ptr::{self, NonNull};

use tracing::{debug, trace};

use crate::{Error, Result};

/// A zero-initialized block of element slots of a single layout, owned together with the
/// allocator that produced it.
///
/// The storage knows nothing about which slots hold live elements. It only guarantees that
/// every slot it adds (at creation or growth) starts out as zero bytes and that its memory is
/// released when it is dropped.
#[derive(Debug)]
pub(crate) struct RawStorage<A: GlobalAlloc> {
    /// First byte of slot 0. Dangling (but aligned) while no memory is allocated, which is
    /// the case for zero capacity and for zero-sized elements.
    ptr: NonNull<u8>,

    /// Number of slots the allocation can hold.
    capacity: usize,

    /// Layout of one slot. The size is a multiple of the alignment, so it is also the stride.
    item_layout: Layout,

    allocator: A,
}

impl<A: GlobalAlloc> RawStorage<A> {
    /// Allocates zeroed storage for `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if the total size overflows. Aborts via [`std::alloc::handle_alloc_error`]
    /// if the allocator cannot satisfy the request.
    #[must_use]
    pub(crate) fn new(item_layout: Layout, capacity: usize, allocator: A) -> Self {
        debug_assert_eq!(item_layout, item_layout.pad_to_align());

        let mut storage = Self {
            ptr: dangling(item_layout),
            capacity: 0,
            item_layout,
            allocator,
        };

        if capacity > 0 {
            handle_growth_result(storage.try_grow_to(capacity));
        }

        storage
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub(crate) fn item_layout(&self) -> Layout {
        self.item_layout
    }

    #[must_use]
    pub(crate) fn allocator(&self) -> &A {
        &self.allocator
    }

    #[must_use]
    pub(crate) fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Returns a pointer to the first byte of slot `index`.
    ///
    /// `index == capacity` is accepted and yields the one-past-the-end pointer.
    #[must_use]
    pub(crate) fn slot(&self, index: usize) -> NonNull<u8> {
        debug_assert!(
            index <= self.capacity,
            "slot {index} out of bounds in storage of capacity {}",
            self.capacity
        );

        // Cannot overflow because the whole allocation was sized with checked arithmetic.
        let offset = index.wrapping_mul(self.item_layout.size());

        // SAFETY: offset is within (or one past the end of) our allocation per the bounds
        // check above, and byte_add preserves pointer validity. For zero-sized elements
        // the offset is always zero.
        unsafe { self.ptr.byte_add(offset) }
    }

    /// Overwrites `count` slots starting at `first` with zero bytes.
    pub(crate) fn zero_slots(&mut self, first: usize, count: usize) {
        // Cannot overflow because the range lies within the allocation.
        let byte_count = count.wrapping_mul(self.item_layout.size());

        // SAFETY: The caller passes a range of slots within our capacity, so the bytes are
        // within our allocation (or zero bytes are written for zero-sized elements).
        unsafe {
            ptr::write_bytes(self.slot(first).as_ptr(), 0, byte_count);
        }
    }

    /// Moves `count` slots starting at `from` so that they start at `to`. The ranges may
    /// overlap.
    pub(crate) fn move_slots(&mut self, from: usize, to: usize, count: usize) {
        // Cannot overflow because the range lies within the allocation.
        let byte_count = count.wrapping_mul(self.item_layout.size());

        // SAFETY: The caller passes ranges of slots within our capacity. ptr::copy permits
        // overlapping source and destination.
        unsafe {
            ptr::copy(
                self.slot(from).as_ptr(),
                self.slot(to).as_ptr(),
                byte_count,
            );
        }
    }

    /// Grows the storage so it holds exactly `new_capacity` slots, preserving the bytes of
    /// all existing slots and zero-filling the added ones.
    ///
    /// On error, the storage is left unchanged.
    pub(crate) fn try_grow_to(&mut self, new_capacity: usize) -> Result<()> {
        debug_assert!(new_capacity > self.capacity);

        let old_layout = self.array_layout(self.capacity)?;
        let new_layout = self.array_layout(new_capacity)?;

        if new_layout.size() == 0 {
            // Zero-sized elements never need memory.
            self.capacity = new_capacity;
            return Ok(());
        }

        let new_ptr = if old_layout.size() == 0 {
            // SAFETY: new_layout has a non-zero size, as checked above.
            unsafe { self.allocator.alloc_zeroed(new_layout) }
        } else {
            // SAFETY: self.ptr was allocated by self.allocator with old_layout, and the new
            // size is non-zero and was validated by array_layout() not to overflow isize.
            unsafe {
                self.allocator
                    .realloc(self.ptr.as_ptr(), old_layout, new_layout.size())
            }
        };

        let Some(new_ptr) = NonNull::new(new_ptr) else {
            debug!(
                requested_bytes = new_layout.size(),
                align = new_layout.align(),
                "opaque vec storage allocation failed"
            );
            return Err(Error::AllocationFailed { layout: new_layout });
        };

        trace!(
            old_capacity = self.capacity,
            new_capacity,
            element_size = self.item_layout.size(),
            relocated = (new_ptr != self.ptr),
            "grew opaque vec storage"
        );

        if old_layout.size() != 0 {
            // realloc() does not zero the tail, so we do it ourselves.
            // SAFETY: Both offsets are within the new allocation of new_layout.size() bytes.
            unsafe {
                ptr::write_bytes(
                    new_ptr.byte_add(old_layout.size()).as_ptr(),
                    0,
                    new_layout.size().wrapping_sub(old_layout.size()),
                );
            }
        }

        self.ptr = new_ptr;
        self.capacity = new_capacity;

        Ok(())
    }

    fn array_layout(&self, capacity: usize) -> Result<Layout> {
        let size = self
            .item_layout
            .size()
            .checked_mul(capacity)
            .ok_or(Error::CapacityOverflow)?;

        Layout::from_size_align(size, self.item_layout.align())
            .map_err(|_layout_error| Error::CapacityOverflow)
    }
}

impl<A: GlobalAlloc> Drop for RawStorage<A> {
    fn drop(&mut self) {
        // Cannot overflow because the allocation was created with this exact layout.
        let size = self.item_layout.size().wrapping_mul(self.capacity);

        if size == 0 {
            return;
        }

        // SAFETY: The size and alignment are the ones we allocated with, which were
        // validated by array_layout() at the time.
        let layout = unsafe { Layout::from_size_align_unchecked(size, self.item_layout.align()) };

        // SAFETY: self.ptr was allocated by self.allocator with exactly this layout and has
        // not been released yet.
        unsafe {
            self.allocator.dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

/// Turns a failed growth into the fatal outcome used by all infallible operations.
pub(crate) fn handle_growth_result(result: Result<()>) {
    match result {
        Ok(()) => {}
        Err(Error::CapacityOverflow) => {
            panic!("requested capacity exceeds size of virtual memory")
        }
        Err(Error::AllocationFailed { layout }) => std::alloc::handle_alloc_error(layout),
    }
}

fn dangling(item_layout: Layout) -> NonNull<u8> {
    // SAFETY: Layout guarantees that the alignment is a non-zero power of two.
    unsafe { NonNull::new_unchecked(ptr::without_provenance_mut(item_layout.align())) }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::slice;

    use super::*;
    use crate::Global;

    fn bytes_of<A: GlobalAlloc>(storage: &RawStorage<A>) -> &[u8] {
        let len = storage.item_layout.size() * storage.capacity;
        unsafe { slice::from_raw_parts(storage.as_ptr().as_ptr(), len) }
    }

    #[test]
    fn new_storage_is_zeroed() {
        let storage = RawStorage::new(Layout::new::<u64>(), 4, Global);

        assert_eq!(storage.capacity(), 4);
        assert_eq!(bytes_of(&storage).len(), 32);
        assert!(bytes_of(&storage).iter().all(|b| *b == 0));
    }

    #[test]
    fn zero_capacity_allocates_nothing() {
        let storage = RawStorage::new(Layout::new::<u64>(), 0, Global);

        assert_eq!(storage.capacity(), 0);
        assert!(storage.as_ptr().cast::<u64>().is_aligned());
    }

    #[test]
    fn growth_preserves_bytes_and_zeroes_tail() {
        let mut storage = RawStorage::new(Layout::new::<u32>(), 2, Global);

        unsafe {
            storage.slot(0).cast::<u32>().write(11);
            storage.slot(1).cast::<u32>().write(22);
        }

        storage.try_grow_to(8).unwrap();

        assert_eq!(storage.capacity(), 8);
        unsafe {
            assert_eq!(storage.slot(0).cast::<u32>().read(), 11);
            assert_eq!(storage.slot(1).cast::<u32>().read(), 22);
        }
        assert!(bytes_of(&storage)[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn growth_from_zero_capacity() {
        let mut storage = RawStorage::new(Layout::new::<u16>(), 0, Global);

        storage.try_grow_to(1).unwrap();

        assert_eq!(storage.capacity(), 1);
        assert_eq!(bytes_of(&storage), &[0, 0]);
    }

    #[test]
    fn zero_sized_items_track_capacity_without_memory() {
        let mut storage = RawStorage::new(Layout::new::<()>(), 0, Global);

        storage.try_grow_to(1_000_000).unwrap();

        assert_eq!(storage.capacity(), 1_000_000);
        assert_eq!(storage.slot(999_999), storage.as_ptr());
    }

    #[test]
    fn overflowing_growth_is_error_and_leaves_storage_intact() {
        let mut storage = RawStorage::new(Layout::new::<u64>(), 1, Global);

        let result = storage.try_grow_to(usize::MAX);

        assert_eq!(result, Err(Error::CapacityOverflow));
        assert_eq!(storage.capacity(), 1);
    }

    #[test]
    fn move_slots_handles_overlap() {
        let mut storage = RawStorage::new(Layout::new::<u8>(), 4, Global);

        unsafe {
            for (index, value) in [1_u8, 2, 3, 4].into_iter().enumerate() {
                storage.slot(index).write(value);
            }
        }

        storage.move_slots(1, 0, 3);
        storage.zero_slots(3, 1);

        assert_eq!(bytes_of(&storage), &[2, 3, 4, 0]);
    }

    #[test]
    #[should_panic]
    fn infallible_overflow_panics() {
        let layout = Layout::from_size_align(1 << 20, 1).unwrap();
        let _storage = RawStorage::new(layout, usize::MAX, Global);
    }
}
