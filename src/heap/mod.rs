//! The constant-time heap engine.
//!
//! The engine operates on a single caller-supplied arena and keeps every
//! piece of its state inside it:
//!
//! ```text
//! arena:  [ instance record | fragment | fragment | ... | fragment ] (trim)
//!           ^ arena base      ^ pool start                ^ arena end
//! ```
//!
//! The instance record ([`Heap`]) sits at the arena base, padded to the
//! fundamental alignment; the rest is the pool, a doubly linked list of
//! fragments in address order. Free fragments are additionally threaded
//! into power-of-two [bins](bins), which is what bounds every operation by
//! a constant independent of both the arena capacity and the number of
//! live allocations.

mod bins;
mod diagnostics;
mod fragment;

pub use diagnostics::Diagnostics;

use bins::{log2_floor, pow2, smallest_bin_at_least, BIN_COUNT};
use fragment::{interlink, Fragment};

use core::mem;
use core::ptr::{self, NonNull};

/// The guaranteed alignment of every pointer handed out by the allocator:
/// twice the platform pointer width. Every fragment boundary lies on a
/// multiple of this, which is also what frees the low bit of the packed
/// predecessor word in the fragment header.
pub const ALIGNMENT: usize = mem::size_of::<*mut ()>() * 2;

/// The smallest admissible fragment: the header plus enough payload to hold
/// the two intra-bin free-list links while the fragment is parked in a bin.
pub(crate) const FRAGMENT_SIZE_MIN: usize = ALIGNMENT * 2;

/// The largest admissible fragment: the largest power of two not exceeding
/// half of the address space. Rounding an allocation size up to a power of
/// two can therefore never overflow. Arenas offering more than this are
/// silently truncated.
pub(crate) const FRAGMENT_SIZE_MAX: usize = (usize::MAX >> 1) + 1;

const _: () = assert!(ALIGNMENT.is_power_of_two());
const _: () = assert!(FRAGMENT_SIZE_MIN.is_power_of_two());
const _: () = assert!(FRAGMENT_SIZE_MAX.is_power_of_two());

/// The arena space consumed by the instance record, padded so that the
/// first fragment starts on an [`ALIGNMENT`] boundary.
const INSTANCE_SIZE_PADDED: usize = (mem::size_of::<Heap>() + ALIGNMENT - 1) & !(ALIGNMENT - 1);

/// [`Heap::init`] fails unless the arena is at least this large: the padded
/// instance record plus one minimum fragment.
pub const MIN_ARENA_SIZE: usize = INSTANCE_SIZE_PADDED + FRAGMENT_SIZE_MIN;

/// A constant-time heap living inside a caller-supplied arena.
///
/// Every public operation completes in a bounded number of steps that
/// depends neither on the arena capacity nor on the number of live
/// allocations, making the heap suitable for hard real-time systems. The
/// price is internal fragmentation: allocation sizes are rounded up to the
/// next power of two (header included), so up to almost half of a fragment
/// can be padding.
///
/// The instance record is stored at the arena base itself; [`Heap::init`]
/// returns a pointer into the arena rather than a value. The heap holds no
/// resources besides the arena, so teardown is simply dropping the arena.
///
/// The heap is not thread-safe and deliberately performs no locking; if
/// multiple threads share one instance, the caller must serialize each
/// whole call (see [`Allocator`](crate::Allocator) for a ready-made
/// mutex-guarded facade).
pub struct Heap {
    /// Head of the free list per bin; the smallest fragments live in bin 0.
    bins: [*mut Fragment; BIN_COUNT],
    /// Bit `i` is set iff `bins[i]` is non-empty.
    nonempty_bin_mask: usize,
    /// One past the last pool byte; sizes the last fragment.
    arena_end: *mut u8,
    diagnostics: Diagnostics,
}

impl Heap {
    /// Initializes a heap instance inside the provided arena and returns a
    /// handle to it.
    ///
    /// The instance record is placed at the arena base and the remainder
    /// becomes the allocatable pool, trimmed down to a multiple of the
    /// minimum fragment size (and capped at half the address space; the
    /// excess is silently ignored). `None` is returned iff the base is
    /// null, the base is not [`ALIGNMENT`]-aligned, or `size` is below
    /// [`MIN_ARENA_SIZE`].
    ///
    /// # Safety
    /// `base` must either fail the checks above or be valid for reads and
    /// writes of `size` bytes for as long as the returned handle is used,
    /// and that memory must not be accessed except through the handle.
    pub unsafe fn init(base: *mut u8, size: usize) -> Option<NonNull<Self>> {
        if base.is_null() || base as usize % ALIGNMENT != 0 || size < MIN_ARENA_SIZE {
            return None;
        }

        let heap = base.cast::<Self>();
        heap.write(Self {
            bins: [ptr::null_mut(); BIN_COUNT],
            nonempty_bin_mask: 0,
            arena_end: ptr::null_mut(),
            diagnostics: Diagnostics::new(),
        });

        let mut capacity = size - INSTANCE_SIZE_PADDED;
        if capacity > FRAGMENT_SIZE_MAX {
            capacity = FRAGMENT_SIZE_MAX;
        }
        capacity &= !(FRAGMENT_SIZE_MIN - 1);
        debug_assert!(capacity >= FRAGMENT_SIZE_MIN && capacity <= FRAGMENT_SIZE_MAX);

        let pool = base.add(INSTANCE_SIZE_PADDED);
        (*heap).arena_end = pool.add(capacity);
        (*heap).diagnostics.capacity = capacity;

        // The pool starts out as one free root fragment spanning all of it.
        let root = pool.cast::<Fragment>();
        Fragment::write_header(root, ptr::null_mut(), ptr::null_mut(), false);
        debug_assert!((*heap).fragment_size(root) == capacity);
        (*heap).rebin(root, capacity);
        debug_assert!((*heap).nonempty_bin_mask != 0);

        Some(NonNull::new_unchecked(heap))
    }

    /// Allocates `amount` bytes and returns an [`ALIGNMENT`]-aligned
    /// pointer to them, or `None` if the request cannot be served.
    ///
    /// The allocated memory is not zeroed (zero-filling is a
    /// variable-complexity operation). A failed nonzero request increments
    /// the OOM counter; a request of zero returns `None` without counting
    /// as out-of-memory.
    pub fn allocate(&mut self, amount: usize) -> Option<NonNull<u8>> {
        debug_assert!(self.diagnostics.capacity <= FRAGMENT_SIZE_MAX);
        let mut out = None;

        // Requests approaching the address-space limit would overflow the
        // power-of-two rounding below; they cannot succeed anyway.
        if amount > 0 && amount <= self.diagnostics.capacity - ALIGNMENT {
            // The fragment must hold the header in front of the payload.
            let alloc_size = (amount + ALIGNMENT).next_power_of_two();
            debug_assert!(alloc_size >= FRAGMENT_SIZE_MIN);
            debug_assert!(alloc_size <= FRAGMENT_SIZE_MAX);

            // Both operands are powers of two, so the quotient is exact and
            // rounding down equals rounding up here.
            let optimal = log2_floor(alloc_size / FRAGMENT_SIZE_MIN);
            if let Some(bin) = smallest_bin_at_least(self.nonempty_bin_mask, optimal) {
                debug_assert!(bin >= optimal);
                let frag = self.bins[bin];
                debug_assert!(!frag.is_null());

                // SAFETY: the bin heads only ever hold live free fragments
                // of this pool; the arena is valid per the `init` contract.
                unsafe {
                    let frag_size = self.fragment_size(frag);
                    debug_assert!(frag_size >= alloc_size);
                    debug_assert!(!Fragment::is_used(frag));
                    self.unbin(frag, frag_size);

                    // Carve off the tail if it still makes a whole fragment.
                    let leftover = frag_size - alloc_size;
                    debug_assert!(leftover % FRAGMENT_SIZE_MIN == 0);
                    if leftover >= FRAGMENT_SIZE_MIN {
                        let tail = Fragment::emplace_free(
                            frag.cast::<u8>().add(alloc_size),
                            frag,
                            Fragment::next(frag),
                        );
                        debug_assert!(self.fragment_size(tail) == leftover);
                        self.rebin(tail, leftover);
                    }

                    debug_assert!(self.diagnostics.allocated % FRAGMENT_SIZE_MIN == 0);
                    self.diagnostics.allocated += alloc_size;
                    debug_assert!(self.diagnostics.allocated <= self.diagnostics.capacity);
                    self.diagnostics.peak_allocated = self
                        .diagnostics
                        .peak_allocated
                        .max(self.diagnostics.allocated);

                    Fragment::set_used(frag, true);
                    out = NonNull::new(frag.cast::<u8>().add(ALIGNMENT));
                }
            }
        }

        self.diagnostics.peak_request_size = self.diagnostics.peak_request_size.max(amount);
        if out.is_none() && amount > 0 {
            self.diagnostics.oom_count += 1;
        }
        out
    }

    /// Releases a fragment previously returned by this heap.
    ///
    /// A null `pointer` is a no-op. The freed fragment is eagerly coalesced
    /// with free address-order neighbors, so no two adjacent free fragments
    /// ever exist.
    ///
    /// # Safety
    /// `pointer` must be null or a pointer obtained from [`allocate`]
    /// (or [`reallocate`]) on this very instance and not freed since.
    /// Anything else is undefined behavior; debug builds assert on the
    /// detectable cases (misaligned address, double free, foreign pointer).
    ///
    /// [`allocate`]: Self::allocate
    /// [`reallocate`]: Self::reallocate
    pub unsafe fn free(&mut self, pointer: *mut u8) {
        debug_assert!(self.diagnostics.capacity <= FRAGMENT_SIZE_MAX);
        if pointer.is_null() {
            return;
        }

        let frag = pointer.sub(ALIGNMENT).cast::<Fragment>();
        self.check_owned(frag);
        debug_assert!(Fragment::is_used(frag));
        let frag_size = self.fragment_size(frag);

        // Clear the flag before any merging; a double free then trips the
        // assertion above even if this fragment is merged away below.
        Fragment::set_used(frag, false);

        // Accounting must happen before coalescing invalidates the size.
        debug_assert!(self.diagnostics.allocated >= frag_size);
        self.diagnostics.allocated -= frag_size;

        let prev = Fragment::prev(frag);
        let next = Fragment::next(frag);
        let join_left = !prev.is_null() && !Fragment::is_used(prev);
        let join_right = !next.is_null() && !Fragment::is_used(next);

        if join_left && join_right {
            // [ prev ][ this ][ next ] => [ ------- prev ------- ]
            let prev_size = self.fragment_size(prev);
            let next_size = self.fragment_size(next);
            self.unbin(prev, prev_size);
            self.unbin(next, next_size);
            interlink(prev, Fragment::next(next));
            self.rebin(prev, prev_size + frag_size + next_size);
        } else if join_left {
            // [ prev ][ this ][ next ] => [ --- prev --- ][ next ]
            let prev_size = self.fragment_size(prev);
            self.unbin(prev, prev_size);
            interlink(prev, next);
            self.rebin(prev, prev_size + frag_size);
        } else if join_right {
            // [ prev ][ this ][ next ] => [ prev ][ --- this --- ]
            let next_size = self.fragment_size(next);
            self.unbin(next, next_size);
            interlink(frag, Fragment::next(next));
            self.rebin(frag, frag_size + next_size);
        } else {
            self.rebin(frag, frag_size);
        }
    }

    /// Resizes a fragment previously returned by this heap, preserving its
    /// contents up to the smaller of the old and new usable sizes.
    ///
    /// The cheapest applicable strategy is chosen:
    /// 1. shrink (or keep) in place — same pointer, constant time;
    /// 2. grow forward into a free successor — same pointer, constant time;
    /// 3. grow backward into a free predecessor — new pointer, the payload
    ///    is moved down within the same contiguous span (linear in the old
    ///    fragment size);
    /// 4. allocate fresh, copy, free the old fragment.
    ///
    /// A null `pointer` makes this behave as [`allocate`](Self::allocate);
    /// a `new_amount` of zero behaves as [`free`](Self::free) and returns
    /// `None` without counting as out-of-memory. On failure `None` is
    /// returned and the original fragment stays valid and untouched.
    ///
    /// # Safety
    /// Same contract as [`free`](Self::free): `pointer` must be null or a
    /// live allocation of this instance.
    pub unsafe fn reallocate(&mut self, pointer: *mut u8, new_amount: usize) -> Option<NonNull<u8>> {
        debug_assert!(self.diagnostics.capacity <= FRAGMENT_SIZE_MAX);

        // Allocation delegation.
        if pointer.is_null() {
            return self.allocate(new_amount);
        }
        // Free delegation, mirroring the common `realloc(p, 0)` extension.
        if new_amount == 0 {
            self.free(pointer);
            return None;
        }

        // Oversized requests are rejected before any structural work so the
        // original allocation survives. The peak request is still recorded;
        // consumers can detect oversized requests this way.
        self.diagnostics.peak_request_size = self.diagnostics.peak_request_size.max(new_amount);
        if new_amount > self.diagnostics.capacity - ALIGNMENT {
            self.diagnostics.oom_count += 1;
            return None;
        }

        let frag = pointer.sub(ALIGNMENT).cast::<Fragment>();
        self.check_owned(frag);
        debug_assert!(Fragment::is_used(frag)); // catch use-after-free
        let frag_size = self.fragment_size(frag);
        let old_amount = frag_size - ALIGNMENT;
        let new_frag_size = (new_amount + ALIGNMENT).next_power_of_two();
        debug_assert!(new_frag_size >= FRAGMENT_SIZE_MIN);
        debug_assert!(new_frag_size <= FRAGMENT_SIZE_MAX);

        let prev = Fragment::prev(frag);
        let next = Fragment::next(frag);
        let prev_free = !prev.is_null() && !Fragment::is_used(prev);
        let next_free = !next.is_null() && !Fragment::is_used(next);
        let prev_size = if prev_free { self.fragment_size(prev) } else { 0 };
        let next_size = if next_free { self.fragment_size(next) } else { 0 };

        // Shrink or same size: the data stays put.
        if new_frag_size <= frag_size {
            let leftover = frag_size - new_frag_size;
            debug_assert!(leftover % FRAGMENT_SIZE_MIN == 0);
            if leftover >= FRAGMENT_SIZE_MIN {
                debug_assert!(self.diagnostics.allocated >= leftover);
                self.diagnostics.allocated -= leftover;
                if next_free {
                    // [ frag ][ tail ][ next ] => [ frag ][ --- tail --- ]
                    self.unbin(next, next_size);
                    let tail = Fragment::emplace_free(
                        frag.cast::<u8>().add(new_frag_size),
                        frag,
                        Fragment::next(next),
                    );
                    debug_assert!(self.fragment_size(tail) == leftover + next_size);
                    self.rebin(tail, leftover + next_size);
                } else {
                    // [ frag ][ tail ][ next ]
                    let tail = Fragment::emplace_free(
                        frag.cast::<u8>().add(new_frag_size),
                        frag,
                        next,
                    );
                    debug_assert!(self.fragment_size(tail) == leftover);
                    self.rebin(tail, leftover);
                }
                debug_assert!(self.fragment_size(frag) == new_frag_size);
            }
            return NonNull::new(pointer);
        }

        // Grow forward into a free successor: the data stays put.
        if next_free && frag_size + next_size >= new_frag_size {
            self.unbin(next, next_size);
            let leftover = (frag_size + next_size) - new_frag_size;
            debug_assert!(leftover % FRAGMENT_SIZE_MIN == 0);
            if leftover >= FRAGMENT_SIZE_MIN {
                // [ frag ][ --- next --- ] => [ --- frag --- ][ next ]
                let tail = Fragment::emplace_free(
                    frag.cast::<u8>().add(new_frag_size),
                    frag,
                    Fragment::next(next),
                );
                self.rebin(tail, leftover);
                self.diagnostics.allocated += new_frag_size - frag_size;
            } else {
                // [ frag ][ --- next --- ] => [ ------- frag ------- ]
                interlink(frag, Fragment::next(next));
                self.diagnostics.allocated += next_size;
            }
            self.diagnostics.peak_allocated = self
                .diagnostics
                .peak_allocated
                .max(self.diagnostics.allocated);
            return NonNull::new(pointer);
        }

        // Grow backward into a free predecessor (pulling in a free
        // successor as well if needed): there is not enough space ahead, so
        // the payload moves down within the same contiguous span.
        if prev_free && prev_size + frag_size + next_size >= new_frag_size {
            self.unbin(prev, prev_size);
            if next_free {
                self.unbin(next, next_size);
            }
            // Resolve the fragment beyond the grown span before the move
            // clobbers the old headers.
            let beyond = if next_free { Fragment::next(next) } else { next };
            let out = prev.cast::<u8>().add(ALIGNMENT);
            // The destination is left of the source inside one contiguous
            // span: the copy cannot reach the successor's header, though it
            // may overwrite the old fragment's own.
            ptr::copy(pointer, out, old_amount);
            Fragment::set_used(prev, true);
            let leftover = (prev_size + frag_size + next_size) - new_frag_size;
            debug_assert!(leftover % FRAGMENT_SIZE_MIN == 0);
            if leftover >= FRAGMENT_SIZE_MIN {
                let tail = Fragment::emplace_free(
                    prev.cast::<u8>().add(new_frag_size),
                    prev,
                    beyond,
                );
                self.rebin(tail, leftover);
                self.diagnostics.allocated += new_frag_size - frag_size;
            } else {
                interlink(prev, beyond);
                self.diagnostics.allocated += prev_size + next_size;
            }
            self.diagnostics.peak_allocated = self
                .diagnostics
                .peak_allocated
                .max(self.diagnostics.allocated);
            return NonNull::new(out);
        }

        // Last resort: fresh allocation, copy, free. `allocate` does the
        // OOM accounting if even that fails.
        let out = self.allocate(new_amount);
        if let Some(fresh) = out {
            ptr::copy_nonoverlapping(pointer, fresh.as_ptr(), old_amount);
            self.free(pointer);
        }
        out
    }

    /// The largest amount guaranteed to be allocatable from an empty heap:
    /// `2^floor(log2(capacity)) − ALIGNMENT`. Larger requests may still
    /// succeed but are not guaranteed to, due to the power-of-two rounding
    /// and the per-fragment overhead.
    #[must_use]
    pub fn max_allocation_size(&self) -> usize {
        pow2(log2_floor(self.diagnostics.capacity)) - ALIGNMENT
    }

    /// Samples the diagnostic counters. This merely copies the internally
    /// maintained struct, so it is cheap.
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    /// Performs a constant-time sanity check of the heap bookkeeping.
    ///
    /// This is a weak but fast corruption detector suited for periodic
    /// runtime self-testing: it validates the bin occupancy mask against
    /// the bin heads and the diagnostic counters against each other, not
    /// the fragment chain itself.
    #[must_use]
    pub fn invariants_hold(&self) -> bool {
        let mut valid = true;

        // Bin mask consistency.
        for (idx, head) in self.bins.iter().enumerate() {
            let mask_bit_set = self.nonempty_bin_mask & pow2(idx) != 0;
            valid = valid && mask_bit_set == !head.is_null();
        }

        let diag = self.diagnostics;

        // Capacity bounds.
        valid = valid
            && diag.capacity >= FRAGMENT_SIZE_MIN
            && diag.capacity <= FRAGMENT_SIZE_MAX
            && diag.capacity % FRAGMENT_SIZE_MIN == 0;

        // Allocation accounting.
        valid = valid
            && diag.allocated <= diag.capacity
            && diag.allocated % FRAGMENT_SIZE_MIN == 0
            && diag.peak_allocated <= diag.capacity
            && diag.peak_allocated >= diag.allocated
            && diag.peak_allocated % FRAGMENT_SIZE_MIN == 0;

        // Peak request coherence: every recorded request either fit (and
        // drove the peak allocation) or bumped the OOM counter.
        valid = valid && (diag.peak_request_size < diag.capacity || diag.oom_count > 0);
        if diag.peak_request_size == 0 {
            valid = valid && diag.peak_allocated == 0 && diag.allocated == 0 && diag.oom_count == 0;
        } else {
            // Overflow on the summation is possible but safe to ignore.
            valid = valid
                && (diag.peak_request_size + ALIGNMENT <= diag.peak_allocated
                    || diag.oom_count > 0);
        }

        valid
    }

    /// Computes a fragment's size from the distance to its successor, or to
    /// the arena end for the last fragment. The size is never stored.
    ///
    /// # Safety
    /// `frag` must point to a live fragment of this pool.
    unsafe fn fragment_size(&self, frag: *const Fragment) -> usize {
        debug_assert!(frag as usize % mem::size_of::<*mut Fragment>() == 0);
        let next = Fragment::next(frag);
        let size = if next.is_null() {
            self.arena_end as usize - frag as usize
        } else {
            next as usize - frag as usize
        };
        debug_assert!(size >= FRAGMENT_SIZE_MIN);
        debug_assert!(size <= self.diagnostics.capacity);
        debug_assert!(size % FRAGMENT_SIZE_MIN == 0);
        size
    }

    /// Debug-build check that a recovered fragment base lies within the
    /// pool of this very instance.
    fn check_owned(&self, frag: *const Fragment) {
        debug_assert!(frag as usize % mem::size_of::<*mut Fragment>() == 0);
        let pool = self as *const Self as usize + INSTANCE_SIZE_PADDED;
        debug_assert!(frag as usize >= pool);
        debug_assert!(frag as usize <= pool + self.diagnostics.capacity - FRAGMENT_SIZE_MIN);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Heap, ALIGNMENT, FRAGMENT_SIZE_MIN, INSTANCE_SIZE_PADDED, MIN_ARENA_SIZE,
    };

    use core::mem::MaybeUninit;
    use core::ptr;

    #[repr(align(16))]
    struct Arena<const N: usize>([MaybeUninit<u8>; N]);

    impl<const N: usize> Arena<N> {
        fn new() -> Self {
            Self([MaybeUninit::uninit(); N])
        }

        fn base(&mut self) -> *mut u8 {
            self.0.as_mut_ptr().cast()
        }
    }

    fn init<const N: usize>(arena: &mut Arena<N>) -> &mut Heap {
        unsafe { &mut *Heap::init(arena.base(), N).unwrap().as_ptr() }
    }

    const SMALL: usize = INSTANCE_SIZE_PADDED + 16 * FRAGMENT_SIZE_MIN;

    #[test]
    fn init_rejects_null_misaligned_and_undersized_arenas() {
        let mut arena = Arena::<SMALL>::new();
        unsafe {
            assert!(Heap::init(ptr::null_mut(), SMALL).is_none());
            assert!(Heap::init(arena.base().add(1), SMALL - 1).is_none());
            assert!(Heap::init(arena.base(), MIN_ARENA_SIZE - 1).is_none());
            assert!(Heap::init(arena.base(), MIN_ARENA_SIZE).is_some());
        }
    }

    #[test]
    fn init_trims_the_capacity_to_whole_fragments() {
        let mut arena = Arena::<{ MIN_ARENA_SIZE + FRAGMENT_SIZE_MIN - 1 }>::new();
        let size = arena.0.len();
        let heap = unsafe { &mut *Heap::init(arena.base(), size).unwrap().as_ptr() };
        // The extra tail bytes do not make a whole fragment and are ignored.
        assert_eq!(heap.diagnostics().capacity, FRAGMENT_SIZE_MIN);
    }

    #[test]
    fn init_bins_a_single_root_fragment() {
        let mut arena = Arena::<SMALL>::new();
        let heap = init(&mut arena);
        assert_eq!(heap.diagnostics().capacity, 16 * FRAGMENT_SIZE_MIN);
        assert_eq!(heap.nonempty_bin_mask.count_ones(), 1);
        assert!(heap.invariants_hold());
    }

    #[test]
    fn allocating_zero_returns_none_without_counting_oom() {
        let mut arena = Arena::<SMALL>::new();
        let heap = init(&mut arena);
        assert!(heap.allocate(0).is_none());
        assert_eq!(heap.diagnostics().oom_count, 0);
        assert_eq!(heap.diagnostics().peak_request_size, 0);
    }

    #[test]
    fn a_one_byte_allocation_consumes_one_minimum_fragment() {
        let mut arena = Arena::<SMALL>::new();
        let heap = init(&mut arena);
        let p = heap.allocate(1).unwrap();
        assert_eq!(p.as_ptr() as usize % ALIGNMENT, 0);
        assert_eq!(heap.diagnostics().allocated, FRAGMENT_SIZE_MIN);
        assert_eq!(heap.diagnostics().peak_request_size, 1);
        assert!(heap.invariants_hold());
    }

    #[test]
    fn an_oversized_allocation_fails_and_counts_oom() {
        let mut arena = Arena::<SMALL>::new();
        let heap = init(&mut arena);
        let too_much = heap.max_allocation_size() + 1;
        assert!(heap.allocate(too_much).is_none());
        assert_eq!(heap.diagnostics().oom_count, 1);
        assert_eq!(heap.diagnostics().peak_request_size, too_much);
        assert!(heap.invariants_hold());
    }

    #[test]
    fn allocate_free_restores_the_bin_mask() {
        let mut arena = Arena::<SMALL>::new();
        let heap = init(&mut arena);
        let mask_before = heap.nonempty_bin_mask;

        let p = heap.allocate(3 * ALIGNMENT).unwrap();
        assert_ne!(heap.nonempty_bin_mask, mask_before);
        unsafe { heap.free(p.as_ptr()) };

        assert_eq!(heap.nonempty_bin_mask, mask_before);
        assert_eq!(heap.diagnostics().allocated, 0);
        assert!(heap.invariants_hold());
    }

    #[test]
    fn freeing_null_is_a_no_op() {
        let mut arena = Arena::<SMALL>::new();
        let heap = init(&mut arena);
        unsafe { heap.free(ptr::null_mut()) };
        assert_eq!(heap.diagnostics().allocated, 0);
    }

    #[test]
    fn max_allocation_size_is_the_binary_floor_of_the_capacity() {
        let mut arena = Arena::<{ INSTANCE_SIZE_PADDED + 24 * FRAGMENT_SIZE_MIN }>::new();
        let heap = init(&mut arena);
        // 24 fragments round down to a 16-fragment power of two.
        assert_eq!(
            heap.max_allocation_size(),
            16 * FRAGMENT_SIZE_MIN - ALIGNMENT
        );
        assert!(heap.allocate(heap.max_allocation_size()).is_some());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn a_double_free_trips_the_debug_assertions() {
        let mut arena = Arena::<SMALL>::new();
        let heap = init(&mut arena);
        let p = heap.allocate(1).unwrap();
        unsafe {
            heap.free(p.as_ptr());
            heap.free(p.as_ptr()); // panics: the used flag is already clear
        }
    }
}
