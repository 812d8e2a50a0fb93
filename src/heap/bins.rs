//! Power-of-two bin bookkeeping.
//!
//! Free fragments are segregated by the binary order of their size: bin `i`
//! holds the fragments whose size `s` satisfies
//! `floor(log2(s / FRAGMENT_SIZE_MIN)) == i`, threaded on a doubly linked
//! list through their own bodies. An occupancy bitmask mirrors which bins
//! are non-empty, so the allocation path finds the smallest adequate bin
//! with two bit operations instead of any list or table scan. Both bit
//! scans compile to single instructions on every target with a
//! count-leading-zeros unit, which is what makes the whole allocation path
//! constant-time.

use super::fragment::Fragment;
use super::{Heap, FRAGMENT_SIZE_MIN};

use core::ptr;

/// One bin per bit of `usize`. The upper bins can never be populated (a
/// fragment of that size would not fit the address space), but the constant
/// width keeps the index math trivial and the array cheap.
pub(crate) const BIN_COUNT: usize = usize::BITS as usize;

/// `floor(log2(x))` of a positive argument.
pub(crate) fn log2_floor(x: usize) -> usize {
    debug_assert!(x > 0);
    (usize::BITS - 1 - x.leading_zeros()) as usize
}

/// `2^power`, spelled out so the shift operand cannot silently truncate.
pub(crate) const fn pow2(power: usize) -> usize {
    1 << power
}

/// The bin index for a fragment of the given size.
pub(crate) fn bin_index(size: usize) -> usize {
    debug_assert!(size % FRAGMENT_SIZE_MIN == 0);
    log2_floor(size / FRAGMENT_SIZE_MIN)
}

/// Picks the smallest non-empty bin with index at least `optimal` out of an
/// occupancy mask, by masking the too-small bins away and isolating the
/// lowest remaining set bit. Every fragment in such a bin is large enough by
/// construction, so the caller may take the head without inspecting sizes.
pub(crate) fn smallest_bin_at_least(nonempty_mask: usize, optimal: usize) -> Option<usize> {
    debug_assert!(optimal < BIN_COUNT);
    let candidates = nonempty_mask & !(pow2(optimal) - 1);
    let lowest = candidates & candidates.wrapping_neg();
    if lowest == 0 {
        None
    } else {
        Some(log2_floor(lowest))
    }
}

impl Heap {
    /// Pushes a free fragment onto the head of its bin and marks the bin
    /// occupied. LIFO order hands frequently recycled sizes back out while
    /// they are still warm in the cache.
    ///
    /// # Safety
    /// `fragment` must be a live free fragment of `size` bytes inside this
    /// heap's pool, not currently present in any bin.
    pub(crate) unsafe fn rebin(&mut self, fragment: *mut Fragment, size: usize) {
        debug_assert!(!fragment.is_null());
        debug_assert!(size % FRAGMENT_SIZE_MIN == 0);
        let idx = bin_index(size);
        debug_assert!(idx < BIN_COUNT);

        (*fragment).next_free = self.bins[idx];
        (*fragment).prev_free = ptr::null_mut();
        if !self.bins[idx].is_null() {
            (*self.bins[idx]).prev_free = fragment;
        }
        self.bins[idx] = fragment;
        self.nonempty_bin_mask |= pow2(idx);
    }

    /// Unlinks a free fragment from its bin, clearing the occupancy bit if
    /// it was the last one in there.
    ///
    /// # Safety
    /// `fragment` must be a live free fragment of `size` bytes currently
    /// present in the bin matching `size`.
    pub(crate) unsafe fn unbin(&mut self, fragment: *mut Fragment, size: usize) {
        debug_assert!(!fragment.is_null());
        debug_assert!(size % FRAGMENT_SIZE_MIN == 0);
        let idx = bin_index(size);
        debug_assert!(idx < BIN_COUNT);

        if !(*fragment).next_free.is_null() {
            (*(*fragment).next_free).prev_free = (*fragment).prev_free;
        }
        if !(*fragment).prev_free.is_null() {
            (*(*fragment).prev_free).next_free = (*fragment).next_free;
        }
        if self.bins[idx] == fragment {
            debug_assert!((*fragment).prev_free.is_null());
            self.bins[idx] = (*fragment).next_free;
            if self.bins[idx].is_null() {
                self.nonempty_bin_mask &= !pow2(idx);
            }
        }
    }
}
