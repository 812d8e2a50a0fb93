//! Runtime self-diagnostic counters.

/// A snapshot of the heap's diagnostic counters.
///
/// The counters support runtime self-testing as required by some
/// safety-critical development guidelines: an application can sample them
/// periodically (via [`Heap::diagnostics`](super::Heap::diagnostics)) and
/// cross-check them with [`Heap::invariants_hold`](super::Heap::invariants_hold)
/// to detect heap corruption or undersized-heap conditions early.
///
/// All counters are maintained eagerly; sampling merely copies this struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Diagnostics {
    /// The total amount of memory available for serving allocation requests.
    ///
    /// This excludes the overhead used up by the instance record and any
    /// trimmed arena tail. The largest guaranteed allocation is
    /// [`Heap::max_allocation_size`](super::Heap::max_allocation_size),
    /// which is smaller than this. Constant after initialization.
    pub capacity: usize,

    /// The amount of memory currently allocated, including the per-fragment
    /// overhead and size rounding.
    ///
    /// A request for a single byte shows up here as one whole minimum-size
    /// fragment.
    pub allocated: usize,

    /// The high-water mark of [`allocated`](Self::allocated) since
    /// initialization. Never decreases.
    pub peak_allocated: usize,

    /// The largest amount ever requested, whether or not the request
    /// succeeded, excluding the rounding and the per-fragment overhead.
    /// Never decreases; zero until the first nonzero request.
    pub peak_request_size: usize,

    /// The number of requests that could not be completed due to the lack
    /// of memory or excessive fragmentation. Never decreases.
    pub oom_count: u64,
}

impl Diagnostics {
    pub(crate) const fn new() -> Self {
        Self {
            capacity: 0,
            allocated: 0,
            peak_allocated: 0,
            peak_request_size: 0,
            oom_count: 0,
        }
    }
}
