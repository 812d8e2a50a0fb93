//! Fragment headers and the address-ordered fragment list.
//!
//! The pool is a contiguous run of fragments. Every fragment starts with a
//! header of exactly [`ALIGNMENT`] bytes naming its address-order neighbors
//! and carrying the used/free flag. A fragment's size is never stored: it is
//! the distance to the next fragment (or to the arena end for the last one),
//! so splitting and coalescing keep the layout canonical by construction and
//! a neighbor update is all it takes to resize.

use super::{ALIGNMENT, FRAGMENT_SIZE_MIN};

use core::mem;
use core::ptr;

/// The per-fragment bookkeeping record, two machine words in size.
#[repr(C)]
pub(crate) struct FragmentHeader {
    /// Address-order successor; null marks the last fragment of the pool.
    next: *mut Fragment,
    /// Address-order predecessor with the used flag packed into bit 0.
    ///
    /// Fragment addresses are multiples of [`ALIGNMENT`], so the low bits of
    /// the pointer value are zero and bit 0 is free to carry the flag.
    prev_used: usize,
}

/// A fragment of the pool.
///
/// The free-list links are meaningful only while the fragment is parked in a
/// bin. Once the fragment is handed out they are overwritten by user data;
/// [`Heap::rebin`](super::Heap::rebin) restores them on the way back.
#[repr(C)]
pub(crate) struct Fragment {
    header: FragmentHeader,
    /// Next free fragment in the same bin; null in the last one.
    pub next_free: *mut Fragment,
    /// Previous free fragment in the same bin; null in the first one.
    pub prev_free: *mut Fragment,
}

const _: () = assert!(mem::size_of::<FragmentHeader>() == ALIGNMENT);
const _: () = assert!(mem::size_of::<Fragment>() <= FRAGMENT_SIZE_MIN);

impl Fragment {
    /// Reads the address-order successor.
    ///
    /// # Safety
    /// `this` must point to a fragment with an initialized header.
    pub(crate) unsafe fn next(this: *const Self) -> *mut Self {
        debug_assert!(this as usize % mem::size_of::<*mut Self>() == 0);
        let out = (*this).header.next;
        debug_assert!(out as usize % mem::size_of::<*mut Self>() == 0);
        out
    }

    /// Reads the address-order predecessor, stripping the used flag.
    ///
    /// # Safety
    /// `this` must point to a fragment with an initialized header.
    pub(crate) unsafe fn prev(this: *const Self) -> *mut Self {
        debug_assert!(this as usize % mem::size_of::<*mut Self>() == 0);
        let out = ((*this).header.prev_used & !1) as *mut Self;
        debug_assert!(out as usize % mem::size_of::<*mut Self>() == 0);
        out
    }

    /// Reads the used flag.
    ///
    /// # Safety
    /// `this` must point to a fragment with an initialized header.
    pub(crate) unsafe fn is_used(this: *const Self) -> bool {
        debug_assert!(this as usize % mem::size_of::<*mut Self>() == 0);
        (*this).header.prev_used & 1 != 0
    }

    /// Overwrites the address-order successor.
    ///
    /// # Safety
    /// `this` must point to a fragment with an initialized header.
    pub(crate) unsafe fn set_next(this: *mut Self, value: *mut Self) {
        debug_assert!(this as usize % ALIGNMENT == 0);
        debug_assert!(value as usize % ALIGNMENT == 0);
        (*this).header.next = value;
    }

    /// Overwrites the address-order predecessor, preserving the used flag.
    ///
    /// # Safety
    /// `this` must point to a fragment with an initialized header.
    pub(crate) unsafe fn set_prev(this: *mut Self, value: *mut Self) {
        debug_assert!(this as usize % ALIGNMENT == 0);
        debug_assert!(value as usize % ALIGNMENT == 0);
        (*this).header.prev_used = ((*this).header.prev_used & 1) | value as usize;
    }

    /// Sets or clears the used flag, preserving the predecessor.
    ///
    /// # Safety
    /// `this` must point to a fragment with an initialized header.
    pub(crate) unsafe fn set_used(this: *mut Self, used: bool) {
        debug_assert!(this as usize % ALIGNMENT == 0);
        if used {
            (*this).header.prev_used |= 1;
        } else {
            (*this).header.prev_used &= !1;
        }
    }

    /// Writes a complete header in one go.
    ///
    /// The other setters read-modify-write and therefore require an already
    /// initialized header; this is the only way to bring a header into
    /// existence on fresh pool bytes.
    ///
    /// # Safety
    /// `this` must be valid for writes of a [`FragmentHeader`] and aligned
    /// to [`ALIGNMENT`].
    pub(crate) unsafe fn write_header(this: *mut Self, next: *mut Self, prev: *mut Self, used: bool) {
        debug_assert!(this as usize % ALIGNMENT == 0);
        debug_assert!(next as usize % ALIGNMENT == 0);
        debug_assert!(prev as usize % ALIGNMENT == 0);
        ptr::addr_of_mut!((*this).header).write(FragmentHeader {
            next,
            prev_used: prev as usize | used as usize,
        });
    }

    /// Carves a fresh free fragment at `at` and splices it into the
    /// address-order list between `prev` and `next`. Either neighbor may be
    /// null. Returns the new fragment; the caller is responsible for binning
    /// it.
    ///
    /// # Safety
    /// `at` must be an [`ALIGNMENT`]-aligned address inside the pool with at
    /// least [`FRAGMENT_SIZE_MIN`] bytes up to `next` (or the arena end),
    /// and `prev`/`next`, when non-null, must have initialized headers.
    pub(crate) unsafe fn emplace_free(at: *mut u8, prev: *mut Self, next: *mut Self) -> *mut Self {
        let frag = at.cast::<Self>();
        Self::write_header(frag, next, prev, false);
        if !next.is_null() {
            Self::set_prev(next, frag);
        }
        if !prev.is_null() {
            Self::set_next(prev, frag);
        }
        frag
    }
}

/// Links two fragments so that their neighbor pointers point at each other;
/// `left` goes before `right`. Either side may be null.
///
/// # Safety
/// Non-null arguments must point to fragments with initialized headers.
pub(crate) unsafe fn interlink(left: *mut Fragment, right: *mut Fragment) {
    if !left.is_null() {
        Fragment::set_next(left, right);
    }
    if !right.is_null() {
        Fragment::set_prev(right, left);
    }
}

#[cfg(test)]
mod tests {
    use super::{interlink, Fragment};

    use core::mem::MaybeUninit;
    use core::ptr;

    /// A properly aligned resting place for a single fragment header.
    #[repr(align(16))]
    struct Slot(MaybeUninit<Fragment>);

    fn slot() -> Slot {
        Slot(MaybeUninit::uninit())
    }

    #[test]
    fn used_flag_is_independent_of_the_neighbor_pointers() {
        let mut a = slot();
        let mut b = slot();
        let pa = a.0.as_mut_ptr();
        let pb = b.0.as_mut_ptr();

        unsafe {
            Fragment::write_header(pa, ptr::null_mut(), ptr::null_mut(), false);
            assert!(!Fragment::is_used(pa));
            assert!(Fragment::prev(pa).is_null());
            assert!(Fragment::next(pa).is_null());

            Fragment::set_used(pa, true);
            Fragment::set_prev(pa, pb);
            assert!(Fragment::is_used(pa));
            assert_eq!(Fragment::prev(pa), pb);

            Fragment::set_used(pa, false);
            assert_eq!(Fragment::prev(pa), pb);
            assert!(!Fragment::is_used(pa));
        }
    }

    #[test]
    fn write_header_packs_both_fields() {
        let mut a = slot();
        let mut b = slot();
        let mut c = slot();
        let pa = a.0.as_mut_ptr();
        let pb = b.0.as_mut_ptr();
        let pc = c.0.as_mut_ptr();

        unsafe {
            Fragment::write_header(pb, pc, pa, true);
            assert_eq!(Fragment::next(pb), pc);
            assert_eq!(Fragment::prev(pb), pa);
            assert!(Fragment::is_used(pb));
        }
    }

    #[test]
    fn interlink_connects_both_directions() {
        let mut a = slot();
        let mut b = slot();
        let pa = a.0.as_mut_ptr();
        let pb = b.0.as_mut_ptr();

        unsafe {
            Fragment::write_header(pa, ptr::null_mut(), ptr::null_mut(), true);
            Fragment::write_header(pb, ptr::null_mut(), ptr::null_mut(), false);

            interlink(pa, pb);
            assert_eq!(Fragment::next(pa), pb);
            assert_eq!(Fragment::prev(pb), pa);
            assert!(Fragment::is_used(pa), "flag must survive the relink");

            interlink(pa, ptr::null_mut());
            assert!(Fragment::next(pa).is_null());
        }
    }
}
