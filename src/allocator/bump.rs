//! Bump pointer allocation - O(1) fast path
//!
//! Design: Branch-prediction optimized for sequential allocations.
//! Shared by arena blocks and GC heap segments.

use core::ptr::NonNull;

/// Bump allocator state - minimal overhead
#[derive(Debug)]
pub struct BumpAllocator {
    current: *mut u8,
    end: *mut u8,
}

impl BumpAllocator {
    /// Create empty allocator (every request fails until `reset`)
    #[inline]
    pub const fn new() -> Self {
        Self {
            current: core::ptr::null_mut(),
            end: core::ptr::null_mut(),
        }
    }

    /// Create allocator over `[start, end)`
    #[inline]
    pub fn with_bounds(start: *mut u8, end: *mut u8) -> Self {
        let mut bump = Self::new();
        bump.reset(start, end);
        bump
    }

    /// Fast path: bump pointer allocation
    ///
    /// Returns None if the region is exhausted (caller handles slow path).
    #[inline(always)]
    pub fn try_alloc(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        debug_assert!(align.is_power_of_two(), "alignment must be power of 2");

        if self.current.is_null() {
            return None;
        }

        let ptr = checked_align_up(self.current as usize, align)?;
        let new_current = ptr.checked_add(size)?;

        if new_current <= self.end as usize {
            self.current = new_current as *mut u8;
            NonNull::new(ptr as *mut u8)
        } else {
            None
        }
    }

    /// Reset to new region bounds
    #[inline]
    pub fn reset(&mut self, start: *mut u8, end: *mut u8) {
        debug_assert!(start <= end, "invalid region bounds");
        self.current = start;
        self.end = end;
    }

    /// Next address the allocator would hand out (before alignment)
    #[inline]
    pub fn cursor(&self) -> *mut u8 {
        self.current
    }

    /// Remaining capacity in current region
    #[inline]
    pub fn remaining(&self) -> usize {
        (self.end as usize).saturating_sub(self.current as usize)
    }
}

impl Default for BumpAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Align value upward to next multiple of alignment
///
/// Uses bit manipulation for branch-free execution:
/// - Add (align - 1) to round up
/// - Mask with !(align - 1) to align down
#[inline(always)]
pub const fn align_up(addr: usize, align: usize) -> usize {
    (addr.wrapping_add(align).wrapping_sub(1)) & !align.wrapping_sub(1)
}

/// `align_up` that reports overflow instead of wrapping
#[inline(always)]
pub fn checked_align_up(addr: usize, align: usize) -> Option<usize> {
    Some(addr.checked_add(align - 1)? & !(align - 1))
}
