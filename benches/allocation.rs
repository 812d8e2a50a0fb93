#![feature(test)]
extern crate test;
use test::Bencher;

use rtalloc::{Heap, ALIGNMENT, MIN_ARENA_SIZE};

use core::mem::MaybeUninit;

mod repeated_allocation_deallocation {
    use super::*;

    /// 256 minimum fragments worth of pool.
    const POOL: usize = 256 * 2 * ALIGNMENT;
    const ARENA_SIZE: usize = MIN_ARENA_SIZE - 2 * ALIGNMENT + POOL;

    #[repr(align(16))]
    struct Arena([MaybeUninit<u8>; ARENA_SIZE]);

    /// Run a benchmark, which repeatedly allocates and deallocates the same
    /// block. The benchmark will allocate the given amount of blocks
    /// beforehand (before running the actual benchmark) in order to fill up
    /// the heap with unrelated live allocations. A constant-time allocator
    /// has to show the same per-iteration cost in every variant, no matter
    /// how full the heap is.
    ///
    /// # Panics
    /// This will panic, if the requested pre-allocations fill up the whole
    /// heap (so the actual benchmark cannot allocate blocks anymore).
    fn benchmark_with_preallocation(b: &mut Bencher, pre_allocations: usize) {
        let mut arena = Box::new(Arena([MaybeUninit::uninit(); ARENA_SIZE]));
        let heap =
            unsafe { &mut *Heap::init(arena.0.as_mut_ptr().cast(), ARENA_SIZE).unwrap().as_ptr() };

        // Fill the heap with live allocations to expose any hidden
        // dependency of the hot path on the live-set size.
        for _ in 0..pre_allocations {
            heap.allocate(1).unwrap();
        }

        // Make sure, that there is enough room for the next allocation.
        let probe = heap.allocate(1).unwrap();
        unsafe { heap.free(probe.as_ptr()) };

        // Run actual benchmark: allocate & deallocate the same block
        // repeatedly.
        b.iter(|| {
            let p = heap.allocate(1);
            let p = test::black_box(p).unwrap();
            unsafe { heap.free(p.as_ptr()) };
        });
    }

    #[bench]
    fn no_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 0);
    }

    #[bench]
    fn low_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 8);
    }

    #[bench]
    fn medium_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 128);
    }

    #[bench]
    fn high_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 250);
    }
}
