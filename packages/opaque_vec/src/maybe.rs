use std::alloc::GlobalAlloc;
use std::ptr::NonNull;

use crate::OpaqueVec;

/// Null-tolerant operations on an optional [`OpaqueVec`].
///
/// Code that tracks "maybe a vector, maybe nothing" as `Option<OpaqueVec>` can use these
/// operations without checking for `None` first. The absent vector behaves as an empty one
/// that cannot be modified:
///
/// * [`size()`][Self::size], [`capacity()`][Self::capacity] and
///   [`element_size()`][Self::element_size] return 0 and [`is_empty()`][Self::is_empty]
///   returns `true`.
/// * [`push_raw()`][Self::push_raw], [`erase()`][Self::erase] and
///   [`destroy()`][Self::destroy] do nothing. In particular, pushing into `None` does not
///   create a vector.
///
/// This permissive behavior is deliberate. Callers that need to distinguish the absent case
/// should match on the `Option` instead.
///
/// # Examples
///
/// ```
/// use std::ptr::NonNull;
///
/// use opaque_vec::{MaybeOpaqueVec, OpaqueVec};
///
/// let mut absent: Option<OpaqueVec> = None;
///
/// assert_eq!(absent.size(), 0);
/// assert!(absent.is_empty());
///
/// let value = 5_u32;
/// // SAFETY: A u32 is a valid element, and nothing is pushed anyway.
/// unsafe { absent.push_raw(NonNull::from(&value).cast()) };
/// assert!(absent.is_none());
///
/// let mut present = Some(OpaqueVec::builder().layout_of::<u32>().build());
/// // SAFETY: A u32 is a valid element for a u32 vector.
/// unsafe { present.push_raw(NonNull::from(&value).cast()) };
/// assert_eq!(present.size(), 1);
///
/// present.destroy();
/// ```
pub trait MaybeOpaqueVec {
    /// The number of live elements, or 0 if there is no vector.
    #[must_use]
    fn size(&self) -> usize;

    /// The number of element slots, or 0 if there is no vector.
    #[must_use]
    fn capacity(&self) -> usize;

    /// The byte width of one element slot, or 0 if there is no vector.
    #[must_use]
    fn element_size(&self) -> usize;

    /// Whether there are no live elements, which includes there being no vector.
    #[must_use]
    fn is_empty(&self) -> bool;

    /// Appends an element by copying its bytes from `src`, if there is a vector.
    ///
    /// See [`OpaqueVec::push_raw()`].
    ///
    /// # Safety
    ///
    /// Same as [`OpaqueVec::push_raw()`] when there is a vector. If there is none, ownership
    /// of the element at `src` stays with the caller.
    unsafe fn push_raw(&mut self, src: NonNull<u8>);

    /// Removes the element at `index`, if there is a vector and the index is in range.
    ///
    /// See [`OpaqueVec::erase()`].
    fn erase(&mut self, index: usize);

    /// Drops the vector, if there is one, cleaning up every remaining element.
    fn destroy(self);
}

impl<A: GlobalAlloc> MaybeOpaqueVec for Option<OpaqueVec<A>> {
    #[inline]
    fn size(&self) -> usize {
        self.as_ref().map_or(0, OpaqueVec::len)
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.as_ref().map_or(0, OpaqueVec::capacity)
    }

    #[inline]
    fn element_size(&self) -> usize {
        self.as_ref().map_or(0, OpaqueVec::element_size)
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.as_ref().is_none_or(OpaqueVec::is_empty)
    }

    unsafe fn push_raw(&mut self, src: NonNull<u8>) {
        if let Some(vec) = self {
            // SAFETY: Forwarding safety requirements to the caller.
            unsafe {
                vec.push_raw(src);
            }
        }
    }

    fn erase(&mut self, index: usize) {
        if let Some(vec) = self {
            vec.erase(index);
        }
    }

    #[cfg_attr(test, mutants::skip)] // Dropping is what happens anyway.
    fn destroy(self) {
        drop(self);
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::alloc::Layout;
    use std::cell::Cell;

    use super::*;
    use crate::Cleanup;

    thread_local! {
        static CLEANUPS: Cell<usize> = const { Cell::new(0) };
    }

    unsafe fn count_cleanup(_element: NonNull<u8>) {
        CLEANUPS.with(|count| count.set(count.get() + 1));
    }

    #[test]
    fn absent_vec_reports_zeroes() {
        let absent: Option<OpaqueVec> = None;

        assert_eq!(absent.size(), 0);
        assert_eq!(absent.capacity(), 0);
        assert_eq!(absent.element_size(), 0);
        assert!(absent.is_empty());
    }

    #[test]
    fn absent_vec_mutators_are_noops() {
        let mut absent: Option<OpaqueVec> = None;
        let value = 1_u64;

        unsafe { absent.push_raw(NonNull::from(&value).cast()) };
        absent.erase(0);
        absent.erase(usize::MAX);

        assert!(absent.is_none());
        absent.destroy();
    }

    #[test]
    fn present_vec_forwards_everything() {
        CLEANUPS.with(|count| count.set(0));

        let mut present = Some(OpaqueVec::new(
            Layout::new::<u64>(),
            Some(Cleanup::new(count_cleanup)),
        ));

        assert_eq!(present.capacity(), 1);
        assert_eq!(present.element_size(), 8);
        assert!(present.is_empty());

        for value in [1_u64, 2, 3] {
            unsafe { present.push_raw(NonNull::from(&value).cast()) };
        }

        assert_eq!(present.size(), 3);
        assert_eq!(present.capacity(), 4);
        assert!(!present.is_empty());

        present.erase(0);
        present.erase(7);
        assert_eq!(present.size(), 2);
        assert_eq!(CLEANUPS.with(Cell::get), 1);

        present.destroy();
        assert_eq!(CLEANUPS.with(Cell::get), 3);
    }
}
