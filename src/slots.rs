use core::alloc::Layout;
use core::ptr::NonNull;

use crate::memory::Memory;
use crate::memory::TryReserveError;

/// Smallest non-empty slot array.
pub(crate) const MIN_SLOTS: usize = 4;

/// Rounds a requested slot count up to a valid array length.
///
/// Valid lengths are zero or a power of two no smaller than [`MIN_SLOTS`].
#[inline]
pub(crate) fn slots_for(count: usize) -> Result<usize, TryReserveError> {
    if count == 0 {
        return Ok(0);
    }
    count
        .max(MIN_SLOTS)
        .checked_next_power_of_two()
        .ok_or(TryReserveError::CapacityOverflow)
}

/// A slot array obtained from an allocation context.
///
/// Every element is an initialized node; the nodes themselves track whether
/// they hold an entry. This type does not drop entries and does not release
/// itself: the owning table drops live entries and hands the array back to a
/// context with [`release`](Self::release).
pub(crate) struct RawSlots<N> {
    ptr: NonNull<N>,
    len: usize,
}

impl<N> RawSlots<N> {
    pub(crate) const fn empty() -> Self {
        Self {
            ptr: NonNull::dangling(),
            len: 0,
        }
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Allocates `len` slots from `mem`, each initialized with `vacant()`.
    pub(crate) fn allocate<M: Memory + ?Sized>(
        mem: &mut M,
        len: usize,
        vacant: impl Fn() -> N,
    ) -> Result<Self, TryReserveError> {
        debug_assert!(len.is_power_of_two() && len >= MIN_SLOTS);
        debug_assert!(size_of::<N>() != 0);

        let layout = Layout::array::<N>(len).map_err(|_| TryReserveError::CapacityOverflow)?;
        let ptr = mem
            .allocate(layout)
            .map_err(|_| TryReserveError::AllocError { layout })?
            .cast::<N>();

        for i in 0..len {
            // SAFETY: The block holds `len` properly aligned `N`s per the
            // `Memory` contract, and `i < len`.
            unsafe {
                ptr.add(i).write(vacant());
            }
        }

        Ok(Self { ptr, len })
    }

    /// Hands the array back to `mem`. Entries must already have been dropped
    /// or moved out.
    pub(crate) fn release<M: Memory + ?Sized>(self, mem: &mut M) {
        if self.len == 0 {
            return;
        }

        // SAFETY: This layout was computed successfully in `allocate` for the
        // same `N` and `len`.
        let layout = unsafe {
            Layout::from_size_align_unchecked(size_of::<N>() * self.len, align_of::<N>())
        };
        // SAFETY: `ptr` came from `mem.allocate(layout)` and `self` is
        // consumed, so it is never used again. Nodes have no drop glue of
        // their own.
        unsafe {
            mem.release(self.ptr.cast(), layout);
        }
    }

    /// Size in bytes of the array.
    #[cfg_attr(not(feature = "stats"), allow(dead_code))]
    pub(crate) fn byte_size(&self) -> usize {
        size_of::<N>() * self.len
    }

    #[inline(always)]
    pub(crate) fn as_slice(&self) -> &[N] {
        // SAFETY: `ptr` is either dangling with `len == 0` or points to `len`
        // initialized nodes owned by `self`.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline(always)]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [N] {
        // SAFETY: As in `as_slice`, and `&mut self` guarantees exclusivity.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}
