//! Basic benchmarks for the `opaque_vec` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::alloc::Layout;
use std::hint::black_box;
use std::iter;
use std::ptr::NonNull;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use opaque_vec::{Cleanup, OpaqueVec};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

type TestItem = usize;
const TEST_VALUE: TestItem = 1024;

unsafe fn noop_cleanup(element: NonNull<u8>) {
    black_box(element);
}

fn new_vecs(count: u64, capacity: usize) -> Vec<OpaqueVec> {
    let layout = Layout::new::<TestItem>();

    iter::repeat_with(|| OpaqueVec::with_capacity(capacity, layout, None))
        .take(usize::try_from(count).unwrap())
        .collect()
}

fn filled_vec(len: usize, cleanup: Option<Cleanup>) -> OpaqueVec {
    let mut vec = OpaqueVec::with_capacity(len, Layout::new::<TestItem>(), cleanup);

    for _ in 0..len {
        // SAFETY: The layout of TestItem matches the vector's layout.
        unsafe { vec.push(TEST_VALUE) };
    }

    vec
}

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("opaque_vec_basic");

    let allocs_op = allocs.operation("build_empty");
    group.bench_function("build_empty", |b| {
        b.iter_custom(|iters| {
            let layout = Layout::new::<TestItem>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(OpaqueVec::new(layout, None)));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("push_one");
    group.bench_function("push_one", |b| {
        b.iter_custom(|iters| {
            let mut vecs = new_vecs(iters, 1);

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for vec in &mut vecs {
                // SAFETY: The layout of TestItem matches the vector's layout.
                unsafe { vec.push(black_box(TEST_VALUE)) };
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("push_raw_one");
    group.bench_function("push_raw_one", |b| {
        b.iter_custom(|iters| {
            let mut vecs = new_vecs(iters, 1);
            let value = TEST_VALUE;

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for vec in &mut vecs {
                // SAFETY: The bytes of a TestItem are a valid element and it owns nothing.
                unsafe { vec.push_raw(black_box(NonNull::from(&value).cast())) };
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("read_one");
    group.bench_function("read_one", |b| {
        b.iter_custom(|iters| {
            let vec = filled_vec(1, None);

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                // SAFETY: The vector holds TestItem values.
                _ = black_box(unsafe { vec.get::<TestItem>(black_box(0)) });
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("erase_last");
    group.bench_function("erase_last", |b| {
        b.iter_custom(|iters| {
            let mut vecs = iter::repeat_with(|| filled_vec(1, None))
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for vec in &mut vecs {
                vec.erase(black_box(0));
            }

            start.elapsed()
        });
    });

    group.finish();

    let mut group = c.benchmark_group("opaque_vec_slow");

    let allocs_op = allocs.operation("push_10k_from_zero");
    group.bench_function("push_10k_from_zero", |b| {
        // Exercises every step of the doubling growth law up to 16384 slots.
        b.iter_custom(|iters| {
            let mut vecs = new_vecs(iters, 0);

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for vec in &mut vecs {
                for _ in 0..10_000 {
                    // SAFETY: The layout of TestItem matches the vector's layout.
                    unsafe { vec.push(black_box(TEST_VALUE)) };
                }
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("erase_front_1k");
    group.bench_function("erase_front_1k", |b| {
        // Worst case for compaction: every erase shifts all remaining elements.
        b.iter_custom(|iters| {
            let mut vecs = iter::repeat_with(|| filled_vec(1000, Some(Cleanup::new(noop_cleanup))))
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for vec in &mut vecs {
                for _ in 0..1000 {
                    vec.erase(0);
                }
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("drop_10k_with_cleanup");
    group.bench_function("drop_10k_with_cleanup", |b| {
        b.iter_custom(|iters| {
            let vecs = iter::repeat_with(|| filled_vec(10_000, Some(Cleanup::new(noop_cleanup))))
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for vec in vecs {
                drop(black_box(vec));
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
