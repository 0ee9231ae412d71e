use std::mem;
use std::ptr::{self, NonNull};

/// A per-element teardown hook that remembers how to clean up an element while forgetting
/// its type.
///
/// An [`OpaqueVec`][crate::OpaqueVec] invokes the hook on an element immediately before the
/// element's slot is overwritten by compaction and on every remaining element when the
/// vector is dropped. Element types that own nothing (plain data) need no hook at all.
///
/// The usual way to obtain a hook is [`Cleanup::of::<T>()`][Self::of], which wraps the native
/// destructor of `T`. A custom function can be supplied via [`Cleanup::new()`][Self::new]
/// when the elements own resources that are released in some other way.
///
/// # Examples
///
/// ```
/// use opaque_vec::Cleanup;
///
/// // Plain data needs no cleanup.
/// assert!(Cleanup::of::<u64>().is_none());
///
/// // Types with a destructor get one.
/// assert!(Cleanup::of::<String>().is_some());
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Cleanup {
    cleanup_fn: unsafe fn(NonNull<u8>),
}

impl Cleanup {
    /// Wraps a custom cleanup function.
    ///
    /// The function receives a pointer to the first byte of the element being cleaned up.
    /// After it returns, the element's bytes are considered dead and may be overwritten.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::ptr::NonNull;
    ///
    /// use opaque_vec::Cleanup;
    ///
    /// unsafe fn release_handle(element: NonNull<u8>) {
    ///     // SAFETY: Forwarding the caller's guarantee that the element is a live u32.
    ///     let handle = unsafe { element.cast::<u32>().read() };
    ///     println!("releasing handle {handle}");
    /// }
    ///
    /// let cleanup = Cleanup::new(release_handle);
    /// # _ = cleanup;
    /// ```
    #[must_use]
    pub const fn new(cleanup_fn: unsafe fn(NonNull<u8>)) -> Self {
        Self { cleanup_fn }
    }

    /// Returns a hook that runs the destructor of `T`, or `None` if dropping a `T` is a no-op.
    #[must_use]
    pub const fn of<T>() -> Option<Self> {
        if mem::needs_drop::<T>() {
            Some(Self {
                cleanup_fn: drop_fn::<T>,
            })
        } else {
            None
        }
    }

    /// Invokes the hook on the element at `element`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `element` points to a live element of the type this hook
    /// was created for, and that the element is not used again after this call.
    pub(crate) unsafe fn call(self, element: NonNull<u8>) {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe { (self.cleanup_fn)(element) }
    }
}

unsafe fn drop_fn<T>(element: NonNull<u8>) {
    debug_assert!(
        element.cast::<T>().is_aligned(),
        "cleanup target is not aligned for the element type"
    );

    // SAFETY: Cleanup::call() forwards the guarantee that this is a live, aligned T.
    unsafe {
        ptr::drop_in_place(element.cast::<T>().as_ptr());
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Cleanup: Send, Sync, Copy, std::fmt::Debug);

    /// Test helper that tracks whether it has been dropped.
    struct DropTracker {
        dropped: Rc<Cell<bool>>,
    }

    impl Drop for DropTracker {
        fn drop(&mut self) {
            self.dropped.set(true);
        }
    }

    #[test]
    fn of_plain_data_is_none() {
        assert!(Cleanup::of::<u8>().is_none());
        assert!(Cleanup::of::<[u64; 4]>().is_none());
        assert!(Cleanup::of::<()>().is_none());
    }

    #[test]
    fn of_drop_type_runs_destructor() {
        let dropped = Rc::new(Cell::new(false));
        let mut tracker = mem::ManuallyDrop::new(DropTracker {
            dropped: Rc::clone(&dropped),
        });

        let cleanup = Cleanup::of::<DropTracker>().unwrap();

        assert!(!dropped.get());
        unsafe {
            cleanup.call(NonNull::from(&mut *tracker).cast());
        }
        assert!(dropped.get());
    }

    #[test]
    fn custom_function_receives_element_pointer() {
        thread_local! {
            static SEEN: Cell<u32> = const { Cell::new(0) };
        }

        unsafe fn record(element: NonNull<u8>) {
            let value = unsafe { element.cast::<u32>().read() };
            SEEN.with(|seen| seen.set(value));
        }

        let mut value = 0xDEAD_BEEF_u32;
        let cleanup = Cleanup::new(record);

        unsafe {
            cleanup.call(NonNull::from(&mut value).cast());
        }

        assert_eq!(SEEN.with(Cell::get), 0xDEAD_BEEF);
    }
}
