use std::alloc::{self, GlobalAlloc, Layout};

/// The default allocator of an [`OpaqueVec`][crate::OpaqueVec], forwarding every request to
/// the process-wide global allocator (whatever is registered via `#[global_allocator]`,
/// or the system allocator if nothing is).
///
/// Any other [`GlobalAlloc`] implementation, such as [`std::alloc::System`], may be
/// substituted via [`OpaqueVecBuilder::allocator()`][crate::OpaqueVecBuilder::allocator].
#[derive(Clone, Copy, Debug, Default)]
#[non_exhaustive]
pub struct Global;

// SAFETY: Every method forwards to the corresponding std::alloc function, which upholds the
// GlobalAlloc contract by delegating to the registered global allocator.
unsafe impl GlobalAlloc for Global {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe { alloc::alloc(layout) }
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe { alloc::alloc_zeroed(layout) }
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe { alloc::realloc(ptr, layout, new_size) }
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe { alloc::dealloc(ptr, layout) }
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Global: Send, Sync, Copy, Default, std::fmt::Debug);

    #[test]
    fn zeroed_allocation_round_trip() {
        let layout = Layout::array::<u64>(4).unwrap();

        unsafe {
            let ptr = Global.alloc_zeroed(layout);
            assert!(!ptr.is_null());
            assert_eq!(ptr.cast::<[u64; 4]>().read(), [0; 4]);

            ptr.cast::<u64>().write(7);

            let grown = Global.realloc(ptr, layout, layout.size() * 2);
            assert!(!grown.is_null());
            assert_eq!(grown.cast::<u64>().read(), 7);

            Global.dealloc(grown, Layout::array::<u64>(8).unwrap());
        }
    }
}
