//! Constant-time memory allocator for hard real-time and embedded Rust
//!
//! This crate provides a dynamic memory allocator whose worst-case execution
//! time is bounded by a constant: it does not depend on the number of live
//! allocations and it does not depend on the heap size. That property makes
//! it suitable for hard real-time and safety-critical firmware, where a
//! heap is only admissible if its timing can be bounded. The trade-off is
//! internal fragmentation: allocation sizes are rounded up to the next
//! power of two, so a fragment can carry up to almost 50% padding.
//!
//! Two entry points are offered:
//! - [`Allocator`] — a self-contained [`core::alloc::GlobalAlloc`]
//!   implementation over an internal arena, ready to be registered with
//!   `#[global_allocator]` on `#![no_std]` targets;
//! - [`Heap`] — the underlying engine, initialized over any caller-supplied
//!   memory arena, for systems that manage their memory regions themselves
//!   or need several independent heaps.
//!
//! # Usage
//! For the common case, copy and paste the following into your binary crate
//! and adjust the arena size (here 64K):
//! ```no_run
//! #[global_allocator]
//! static ALLOCATOR: rtalloc::Allocator<65536> = rtalloc::Allocator::new();
//!
//! extern crate alloc;
//! ```
//! Afterwards every collection from the [`alloc`-crate][alloc] is available
//! as usual. The arena size must be a multiple of [`ALIGNMENT`] and at
//! least [`MIN_ARENA_SIZE`]; both are checked at compile time.
//!
//! Driving the engine directly over your own arena works like this:
//! ```
//! use rtalloc::{Heap, MIN_ARENA_SIZE};
//!
//! #[repr(align(16))]
//! struct Arena([u8; MIN_ARENA_SIZE + 1024]);
//! let mut arena = Arena([0; MIN_ARENA_SIZE + 1024]);
//!
//! // SAFETY: the arena is exclusively owned and outlives the handle.
//! let mut handle = unsafe { Heap::init(arena.0.as_mut_ptr(), arena.0.len()) }.unwrap();
//! let heap = unsafe { handle.as_mut() };
//!
//! let p = heap.allocate(64).unwrap();
//! // SAFETY: `p` came from this very heap and is freed exactly once.
//! unsafe { heap.free(p.as_ptr()) };
//! assert!(heap.invariants_hold());
//! ```
//!
//! # Implementation
//! The arena is laid out as the instance record followed by the pool, a
//! run of *fragments* forming a doubly linked list in address order:
//! ```text
//! [ record | hhhh pppp pppp pppp | hhhh pppp | hhhh pppp pppp pppp pppp ]
//!            ^--- used, 64 bytes  ^--- free    ^--- used, 80 bytes (last)
//! ```
//! Every fragment starts with a two-word header `h` naming its two
//! address-order neighbors and carrying a used/free flag packed into the
//! low bit of the predecessor pointer. A fragment's size is *never stored*:
//! it is the distance to the next fragment, or to the arena end for the
//! last one. Splitting and merging therefore amount to a couple of pointer
//! updates and can never disagree with the actual layout.
//!
//! Free fragments are additionally threaded into *bins* — one doubly linked
//! list per power-of-two size class, with the list links overlaid onto the
//! first payload bytes of the free fragment itself. A bitmask records which
//! bins are non-empty. An allocation request is served as follows:
//! 1.  The request is rounded up: a 100-byte request with a 16-byte header
//!     becomes a 128-byte fragment.
//! 2.  Bins too small for that size are masked off the bitmask; the lowest
//!     remaining set bit names the winning bin. Both steps are single bit
//!     operations, not scans — this is where the constant-time guarantee
//!     comes from. Every fragment in the winning bin is large enough by
//!     construction, so the head is detached without any size inspection.
//! 3.  If the detached fragment is larger than needed, its tail is carved
//!     off as a new free fragment and binned again.
//!
//! Freeing walks the other way: the fragment is merged with whichever of
//! its at most two address-order neighbors is free (each merge is a local
//! pointer operation thanks to the derived sizes) and the result is pushed
//! onto the head of its bin. Eager coalescing keeps the invariant that no
//! two free fragments are ever adjacent.
//!
//! Reallocation tries the cheapest strategy first: shrinking in place,
//! growing forward into a free successor, growing backward into a free
//! predecessor (moving the payload down within the merged span), and only
//! as a last resort allocate-copy-free.
//!
//! The heap never performs system calls and never touches memory outside
//! the arena, and the arena can be discarded without any teardown.
//!
//! [alloc]: https://doc.rust-lang.org/alloc/index.html
#![no_std]

mod heap;

pub use heap::{Diagnostics, Heap, ALIGNMENT, MIN_ARENA_SIZE};

use core::alloc::{GlobalAlloc, Layout};
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ptr::{self, NonNull};

use spin::Mutex;

/// The arena backing an [`Allocator`].
///
/// The wrapper guarantees the base address is aligned to [`ALIGNMENT`] on
/// every supported target (the alignment is pointer-width dependent, but
/// never exceeds 16 on 32- and 64-bit platforms).
#[repr(align(16))]
struct ArenaBuffer<const N: usize>(UnsafeCell<[MaybeUninit<u8>; N]>);

const _: () = assert!(ALIGNMENT <= 16);

/// The ready-made global allocator for embedded systems.
///
/// This type owns an arena of `N` bytes and implements
/// [`core::alloc::GlobalAlloc`] on top of [`Heap`], so it can be registered
/// with the `#[global_allocator]`-attribute on `#![no_std]` targets:
/// ```no_run
/// #[global_allocator]
/// static ALLOCATOR: rtalloc::Allocator<65536> = rtalloc::Allocator::new();
/// ```
/// The heap memory is part of the static itself, so its usage is bounded at
/// link time and the heap cannot grow into the stack.
///
/// The engine performs no locking of its own; this wrapper serializes every
/// call with a spinlock, which is exactly the external mutual exclusion the
/// engine requires of its callers.
///
/// Requests with an alignment above [`ALIGNMENT`] are refused with a null
/// pointer, as the engine cannot guarantee stricter alignments.
pub struct Allocator<const N: usize> {
    arena: ArenaBuffer<N>,
    heap: Mutex<Option<NonNull<Heap>>>,
}

impl<const N: usize> Allocator<N> {
    /// Create a new [`Allocator`].
    ///
    /// This function is a `const fn`, therefore you can call it directly
    /// when creating the allocator static.
    ///
    /// # Panics
    /// This function will panic if the arena size `N` is less than
    /// [`MIN_ARENA_SIZE`] or not a multiple of [`ALIGNMENT`]. Both checks
    /// happen at compile time when the allocator is created in a const
    /// context.
    #[must_use = "assign the allocator to a static variable and apply the `#[global_allocator]`-attribute to make it the global allocator"]
    pub const fn new() -> Self {
        assert!(
            N >= MIN_ARENA_SIZE,
            "too small heap memory: the arena must hold the instance record plus one fragment"
        );
        assert!(
            N % ALIGNMENT == 0,
            "memory size has to be a multiple of the fundamental alignment"
        );
        Self {
            arena: ArenaBuffer(UnsafeCell::new([MaybeUninit::uninit(); N])),
            heap: Mutex::new(None),
        }
    }

    /// Samples the diagnostic counters of the underlying heap.
    pub fn diagnostics(&self) -> Diagnostics {
        self.with_heap(|heap| heap.diagnostics()).unwrap_or_default()
    }

    /// Runs the constant-time sanity check of the underlying heap, see
    /// [`Heap::invariants_hold`].
    pub fn invariants_hold(&self) -> bool {
        self.with_heap(|heap| heap.invariants_hold()).unwrap_or(false)
    }

    /// Runs `f` on the heap, setting up the instance record inside the
    /// arena on first use.
    fn with_heap<T>(&self, f: impl FnOnce(&mut Heap) -> T) -> Option<T> {
        let mut guard = self.heap.lock();
        if guard.is_none() {
            // SAFETY: the buffer is aligned by `ArenaBuffer`'s repr and at
            // least `MIN_ARENA_SIZE` bytes large (checked in `new`), and it
            // is only ever accessed through this mutex.
            *guard = unsafe { Heap::init(self.arena.0.get().cast::<u8>(), N) };
        }
        let mut handle = (*guard)?;
        // SAFETY: the handle points into our own arena and the held lock
        // makes this the only live reference to it.
        Some(f(unsafe { handle.as_mut() }))
    }
}

// SAFETY: all arena state is only reachable through the spinlock, which
// serializes every access; the contained pointers never leave the instance.
unsafe impl<const N: usize> Send for Allocator<N> {}
unsafe impl<const N: usize> Sync for Allocator<N> {}

unsafe impl<const N: usize> GlobalAlloc for Allocator<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        self.with_heap(|heap| heap.allocate(layout.size()))
            .flatten()
            .map_or(ptr::null_mut(), |p| p.as_ptr())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // SAFETY: `ptr` was handed out by `alloc`, so it belongs to this
        // very heap; the `GlobalAlloc` contract rules out a double free.
        self.with_heap(|heap| unsafe { heap.free(ptr) });
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        // SAFETY: `ptr` was handed out by `alloc` per the `GlobalAlloc`
        // contract; the engine preserves the prefix on success and leaves
        // the allocation untouched on failure.
        self.with_heap(|heap| unsafe { heap.reallocate(ptr, new_size) })
            .flatten()
            .map_or(ptr::null_mut(), |p| p.as_ptr())
    }
}
