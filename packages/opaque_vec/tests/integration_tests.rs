//! Integration tests for the `opaque_vec` package.
//!
//! These exercise `OpaqueVec` through its public API only: the growth law, compaction,
//! cleanup ordering, the null-tolerant `Option` handle and allocator substitution.

#![allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::{Cell, RefCell};
use std::ptr::{self, NonNull};
use std::rc::Rc;

use opaque_vec::{Cleanup, DropPolicy, Error, MaybeOpaqueVec, OpaqueVec};

/// Counts the calls made to the allocation primitives and forwards them to `System`.
#[derive(Debug, Default)]
struct Counters {
    allocs: Cell<usize>,
    zeroed_allocs: Cell<usize>,
    reallocs: Cell<usize>,
    deallocs: Cell<usize>,
    fail_from_now_on: Cell<bool>,
}

#[derive(Debug, Default, Clone)]
struct CountingAlloc {
    counters: Rc<Counters>,
}

fn bump(counter: &Cell<usize>) {
    counter.set(counter.get() + 1);
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        bump(&self.counters.allocs);
        if self.counters.fail_from_now_on.get() {
            return ptr::null_mut();
        }
        unsafe { System.alloc(layout) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        bump(&self.counters.zeroed_allocs);
        if self.counters.fail_from_now_on.get() {
            return ptr::null_mut();
        }
        unsafe { System.alloc_zeroed(layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        bump(&self.counters.reallocs);
        if self.counters.fail_from_now_on.get() {
            return ptr::null_mut();
        }
        unsafe { System.realloc(ptr, layout, new_size) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        bump(&self.counters.deallocs);
        unsafe { System.dealloc(ptr, layout) }
    }
}

thread_local! {
    static CLEANUP_LOG: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

unsafe fn log_cleanup(element: NonNull<u8>) {
    let value = unsafe { element.cast::<u64>().read() };
    CLEANUP_LOG.with_borrow_mut(|log| log.push(value));
}

fn take_cleanup_log() -> Vec<u64> {
    CLEANUP_LOG.with_borrow_mut(std::mem::take)
}

fn logging_vec() -> OpaqueVec {
    take_cleanup_log();
    OpaqueVec::with_capacity(
        0,
        Layout::new::<u64>(),
        Some(Cleanup::new(log_cleanup)),
    )
}

fn push_u64(vec: &mut OpaqueVec, value: u64) {
    unsafe { vec.push_raw(NonNull::from(&value).cast()) };
}

fn contents(vec: &OpaqueVec) -> Vec<u64> {
    (0..vec.len())
        .map(|index| unsafe { vec.get_ptr(index).unwrap().cast::<u64>().read() })
        .collect()
}

#[test]
fn capacity_sequence_follows_doubling() {
    let mut vec = logging_vec();
    let mut capacities = vec![vec.capacity()];

    for value in 0..33 {
        push_u64(&mut vec, value);

        assert!(vec.capacity() >= vec.len());
        if capacities.last() != Some(&vec.capacity()) {
            capacities.push(vec.capacity());
        }
    }

    assert_eq!(capacities, [0, 1, 2, 4, 8, 16, 32, 64]);
}

#[test]
fn capacity_never_decreases_during_churn() {
    let mut vec = logging_vec();
    let mut previous_capacity = vec.capacity();

    for round in 0..50_u64 {
        push_u64(&mut vec, round);
        push_u64(&mut vec, round + 1000);

        if round % 3 == 0 {
            vec.erase(0);
        }

        assert!(vec.capacity() >= previous_capacity);
        assert!(vec.capacity() >= vec.len());
        previous_capacity = vec.capacity();
    }
}

#[test]
fn erase_middle_preserves_order_and_cleans_up_before_shift() {
    let mut vec = logging_vec();
    for value in [10, 11, 12, 13] {
        push_u64(&mut vec, value);
    }

    vec.erase(1);

    assert_eq!(contents(&vec), [10, 12, 13]);
    assert_eq!(take_cleanup_log(), [11]);
    assert_eq!(vec.len(), 3);
}

#[test]
fn erase_out_of_range_changes_nothing() {
    let mut vec = logging_vec();
    for value in [1, 2, 3] {
        push_u64(&mut vec, value);
    }
    let capacity = vec.capacity();

    let len = vec.len();
    vec.erase(len);
    vec.erase(len + 5);

    assert_eq!(contents(&vec), [1, 2, 3]);
    assert_eq!(vec.len(), len);
    assert_eq!(vec.capacity(), capacity);
    assert!(take_cleanup_log().is_empty());
}

#[test]
fn teardown_cleans_up_all_in_ascending_order() {
    let mut vec = logging_vec();
    for value in [5, 4, 3, 2, 1] {
        push_u64(&mut vec, value);
    }

    drop(vec);

    assert_eq!(take_cleanup_log(), [5, 4, 3, 2, 1]);
}

#[test]
fn null_handle_is_benign() {
    let mut absent: Option<OpaqueVec> = None;

    assert_eq!(absent.size(), 0);
    assert_eq!(absent.capacity(), 0);
    assert_eq!(absent.element_size(), 0);
    assert!(absent.is_empty());

    let value = 99_u64;
    unsafe { absent.push_raw(NonNull::from(&value).cast()) };
    assert!(absent.is_none());

    absent.erase(3);
    absent.destroy();
}

#[test]
fn substituted_allocator_sees_whole_lifecycle() {
    let allocator = CountingAlloc::default();
    let counters = Rc::clone(&allocator.counters);

    let mut vec = OpaqueVec::builder()
        .layout_of::<u32>()
        .allocator(allocator)
        .build();

    assert_eq!(counters.zeroed_allocs.get(), 1);
    assert_eq!(counters.allocs.get(), 0);

    for value in 0..8_u32 {
        unsafe { vec.push(value) };
    }

    // 1 -> 2 -> 4 -> 8
    assert_eq!(counters.reallocs.get(), 3);
    assert_eq!(vec.capacity(), 8);
    assert_eq!(unsafe { vec.get::<u32>(7) }, Some(&7));

    drop(vec);

    assert_eq!(counters.deallocs.get(), 1);
}

#[test]
fn zero_capacity_defers_allocation() {
    let allocator = CountingAlloc::default();
    let counters = Rc::clone(&allocator.counters);

    let mut vec = OpaqueVec::builder()
        .layout_of::<u64>()
        .capacity(0)
        .allocator(allocator)
        .build();

    assert_eq!(counters.zeroed_allocs.get(), 0);

    unsafe { vec.push(1_u64) };
    assert_eq!(counters.zeroed_allocs.get(), 1);
    assert_eq!(counters.reallocs.get(), 0);

    drop(vec);
    assert_eq!(counters.deallocs.get(), 1);
}

#[test]
fn zero_sized_elements_never_touch_allocator() {
    let allocator = CountingAlloc::default();
    let counters = Rc::clone(&allocator.counters);

    let mut vec = OpaqueVec::builder()
        .layout_of::<()>()
        .allocator(allocator)
        .build();

    for _ in 0..100 {
        unsafe { vec.push(()) };
    }
    assert_eq!(vec.len(), 100);
    assert_eq!(vec.capacity(), 128);

    drop(vec);

    assert_eq!(counters.zeroed_allocs.get(), 0);
    assert_eq!(counters.reallocs.get(), 0);
    assert_eq!(counters.deallocs.get(), 0);
}

#[test]
fn allocation_failure_is_reported_by_fallible_push() {
    let allocator = CountingAlloc::default();
    let counters = Rc::clone(&allocator.counters);

    let mut vec = OpaqueVec::builder()
        .layout_of::<u64>()
        .allocator(allocator)
        .build();

    let first = 1_u64;
    unsafe { vec.try_push_raw(NonNull::from(&first).cast()) }.unwrap();

    counters.fail_from_now_on.set(true);

    let second = 2_u64;
    let result = unsafe { vec.try_push_raw(NonNull::from(&second).cast()) };

    assert_eq!(
        result,
        Err(Error::AllocationFailed {
            layout: Layout::array::<u64>(2).unwrap()
        })
    );
    assert_eq!(vec.len(), 1);
    assert_eq!(vec.capacity(), 1);
    assert_eq!(unsafe { vec.get::<u64>(0) }, Some(&1));

    counters.fail_from_now_on.set(false);
    unsafe { vec.try_push_raw(NonNull::from(&second).cast()) }.unwrap();
    assert_eq!(vec.len(), 2);
}

#[test]
fn allocation_failure_is_reported_by_try_reserve() {
    let allocator = CountingAlloc::default();
    let counters = Rc::clone(&allocator.counters);

    let mut vec = OpaqueVec::builder()
        .layout_of::<u16>()
        .capacity(4)
        .allocator(allocator)
        .build();

    counters.fail_from_now_on.set(true);

    assert_eq!(vec.try_reserve(4), Ok(()));
    assert!(matches!(
        vec.try_reserve(5),
        Err(Error::AllocationFailed { .. })
    ));
    assert_eq!(vec.capacity(), 4);
}

#[test]
fn native_destructors_run_exactly_once() {
    struct Tracked(Rc<Cell<isize>>);

    impl Tracked {
        fn new(alive: &Rc<Cell<isize>>) -> Self {
            alive.set(alive.get() + 1);
            Self(Rc::clone(alive))
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() - 1);
        }
    }

    let alive = Rc::new(Cell::new(0_isize));
    let mut vec = OpaqueVec::builder().layout_of::<Tracked>().build();

    for _ in 0..10 {
        unsafe { vec.push(Tracked::new(&alive)) };
    }
    assert_eq!(alive.get(), 10);

    vec.erase(9);
    vec.erase(0);
    vec.erase(4);
    assert_eq!(alive.get(), 7);

    let taken = unsafe { vec.remove::<Tracked>(0) }.unwrap();
    assert_eq!(alive.get(), 7);
    drop(taken);
    assert_eq!(alive.get(), 6);

    vec.clear();
    assert_eq!(alive.get(), 0);

    unsafe { vec.push(Tracked::new(&alive)) };
    drop(vec);
    assert_eq!(alive.get(), 0);
}

#[test]
fn vec_can_be_rebuilt_after_must_not_drop_policy_is_satisfied() {
    let mut vec = OpaqueVec::builder()
        .layout_of::<String>()
        .drop_policy(DropPolicy::MustNotDropItems)
        .build();

    unsafe {
        vec.push("a".to_string());
        vec.push("b".to_string());
    }

    vec.clear();
    assert!(vec.is_empty());

    drop(vec);
}
