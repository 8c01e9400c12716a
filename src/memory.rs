//! Allocation contexts.
//!
//! Tables never allocate on their own. Every operation that may grow, shrink
//! or release a slot array takes a `&mut impl Memory` and performs all of its
//! allocation through it. The table keeps no reference to the context between
//! calls, so the same table may be driven by a runtime's tracking allocator,
//! a test budget, or the global heap.

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;

/// The allocation context failed to provide memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocError;

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("memory allocation failed")
    }
}

impl core::error::Error for AllocError {}

/// Error returned by the fallible `try_*` table operations.
///
/// When one of these is returned the table is left exactly as it was before
/// the call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TryReserveError {
    /// The requested slot count does not fit in the address space.
    CapacityOverflow,
    /// The allocation context refused the request.
    AllocError {
        /// Layout of the refused slot array.
        layout: Layout,
    },
}

impl fmt::Display for TryReserveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryReserveError::CapacityOverflow => {
                f.write_str("slot array capacity exceeds the address space")
            }
            TryReserveError::AllocError { layout } => write!(
                f,
                "failed to allocate {} bytes for a slot array",
                layout.size()
            ),
        }
    }
}

impl core::error::Error for TryReserveError {}

/// Source of slot-array storage.
///
/// # Safety
///
/// A successful `allocate(layout)` must return a pointer to a block that is
/// valid for reads and writes of `layout.size()` bytes, aligned to
/// `layout.align()`, and not aliased by anything else until it is passed back
/// to `release` with the same layout.
pub unsafe trait Memory {
    /// Allocates a block for `layout`. `layout.size()` is never zero.
    fn allocate(&mut self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Returns a block to the context.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this context with the
    /// same `layout`, and must not be used afterwards.
    unsafe fn release(&mut self, ptr: NonNull<u8>, layout: Layout);
}

// SAFETY: Forwarding to the referenced context preserves its guarantees.
unsafe impl<M: Memory + ?Sized> Memory for &mut M {
    #[inline]
    fn allocate(&mut self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        (**self).allocate(layout)
    }

    #[inline]
    unsafe fn release(&mut self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarded from the caller.
        unsafe { (**self).release(ptr, layout) }
    }
}

/// The global heap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Global;

// SAFETY: `alloc::alloc::alloc` upholds the block guarantees for non-zero
// layouts, and `dealloc` is only reached with blocks it returned.
unsafe impl Memory for Global {
    #[inline]
    fn allocate(&mut self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        debug_assert!(layout.size() != 0);
        // SAFETY: Callers never request zero-sized layouts.
        let raw = unsafe { alloc::alloc::alloc(layout) };
        NonNull::new(raw).ok_or(AllocError)
    }

    #[inline]
    unsafe fn release(&mut self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: The caller guarantees `ptr` came from `allocate` with
        // `layout`.
        unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

/// An allocation context that keeps books on another one.
///
/// Counts live and peak bytes plus allocation and release calls, and can be
/// given a byte budget past which allocation fails. A runtime uses the
/// counters to drive its collector; tests use the budget to exercise the
/// recoverable failure paths.
///
/// # Examples
///
/// ```rust
/// use home_hash::HashTable;
/// use home_hash::memory::Tracked;
///
/// let mut mem = Tracked::new();
/// let mut table: HashTable<u32, u32> = HashTable::new();
///
/// table.insert(&mut mem, 1, 10);
/// assert!(mem.live_bytes() > 0);
///
/// table.clear(&mut mem);
/// assert_eq!(mem.live_bytes(), 0);
/// assert_eq!(mem.allocations(), mem.releases());
/// ```
#[derive(Clone, Debug, Default)]
pub struct Tracked<M = Global> {
    inner: M,
    live_bytes: usize,
    peak_bytes: usize,
    allocations: usize,
    releases: usize,
    limit: Option<usize>,
}

impl Tracked<Global> {
    /// Tracks the global heap with no budget.
    pub const fn new() -> Self {
        Self::wrap(Global)
    }

    /// Tracks the global heap, refusing allocations that would take live
    /// bytes past `limit`.
    pub const fn with_limit(limit: usize) -> Self {
        let mut tracked = Self::wrap(Global);
        tracked.limit = Some(limit);
        tracked
    }
}

impl<M> Tracked<M> {
    /// Tracks `inner` with no budget.
    pub const fn wrap(inner: M) -> Self {
        Self {
            inner,
            live_bytes: 0,
            peak_bytes: 0,
            allocations: 0,
            releases: 0,
            limit: None,
        }
    }

    /// Bytes currently handed out and not yet released.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Highest value `live_bytes` has reached.
    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes
    }

    /// Successful allocations so far.
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    /// Releases so far.
    pub fn releases(&self) -> usize {
        self.releases
    }

    /// Changes the byte budget. `None` removes it.
    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    /// Returns the wrapped context.
    pub fn into_inner(self) -> M {
        self.inner
    }
}

// SAFETY: Blocks come from and go back to `inner` unchanged.
unsafe impl<M: Memory> Memory for Tracked<M> {
    fn allocate(&mut self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let live = self.live_bytes.checked_add(layout.size()).ok_or(AllocError)?;
        if self.limit.is_some_and(|limit| live > limit) {
            return Err(AllocError);
        }

        let ptr = self.inner.allocate(layout)?;
        self.live_bytes = live;
        self.peak_bytes = self.peak_bytes.max(live);
        self.allocations += 1;
        Ok(ptr)
    }

    unsafe fn release(&mut self, ptr: NonNull<u8>, layout: Layout) {
        debug_assert!(self.live_bytes >= layout.size());
        self.live_bytes -= layout.size();
        self.releases += 1;
        // SAFETY: Forwarded from the caller.
        unsafe { self.inner.release(ptr, layout) }
    }
}
