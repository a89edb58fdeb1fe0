//! OS memory acquisition
//!
//! Design: every byte handed out by an arena or a GC heap comes from a
//! [`MemoryProvider`]. The default provider maps anonymous zeroed pages
//! directly (mmap / VirtualAlloc) instead of going through the global
//! allocator.

use crate::logging::{log_mapping, log_unmapping};
use core::ptr::NonNull;

/// Source of contiguous, zeroed, read-write memory
///
/// Implementations must return memory that is zero-filled and aligned to
/// at least 16 bytes.
pub trait MemoryProvider {
    /// Reserve `size` bytes, `None` on failure
    fn reserve(&self, size: usize) -> Option<NonNull<u8>>;

    /// Release a region previously returned by `reserve`
    ///
    /// # Safety
    /// `base` and `size` must match exactly one earlier `reserve` call on
    /// this provider, and the region must not be released twice.
    unsafe fn release(&self, base: NonNull<u8>, size: usize);
}

impl<P: MemoryProvider + ?Sized> MemoryProvider for &P {
    #[inline]
    fn reserve(&self, size: usize) -> Option<NonNull<u8>> {
        (**self).reserve(size)
    }

    #[inline]
    unsafe fn release(&self, base: NonNull<u8>, size: usize) {
        (**self).release(base, size)
    }
}

/// Anonymous page mappings straight from the operating system
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OsMemory;

impl MemoryProvider for OsMemory {
    fn reserve(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }

        let base = map_pages(size)?;
        log_mapping(size, base.as_ptr());
        Some(base)
    }

    unsafe fn release(&self, base: NonNull<u8>, size: usize) {
        log_unmapping(size, base.as_ptr());
        unmap_pages(base, size);
    }
}

#[cfg(unix)]
fn map_pages(size: usize) -> Option<NonNull<u8>> {
    // SAFETY: anonymous private mapping, no file descriptor involved
    let ptr = unsafe {
        libc::mmap(
            core::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return None;
    }
    NonNull::new(ptr.cast::<u8>())
}

#[cfg(unix)]
unsafe fn unmap_pages(base: NonNull<u8>, size: usize) {
    libc::munmap(base.as_ptr().cast::<libc::c_void>(), size);
}

#[cfg(windows)]
fn map_pages(size: usize) -> Option<NonNull<u8>> {
    use winapi::um::memoryapi::VirtualAlloc;
    use winapi::um::winnt::{MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE};

    // SAFETY: fresh reservation at an OS-chosen address
    let ptr = unsafe {
        VirtualAlloc(
            core::ptr::null_mut(),
            size,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        )
    };
    NonNull::new(ptr.cast::<u8>())
}

#[cfg(windows)]
unsafe fn unmap_pages(base: NonNull<u8>, _size: usize) {
    use winapi::um::memoryapi::VirtualFree;
    use winapi::um::winnt::MEM_RELEASE;

    VirtualFree(base.as_ptr().cast(), 0, MEM_RELEASE);
}
