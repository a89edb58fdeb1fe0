//! Heap segments - one mapped region each, filled by bump allocation
//!
//! Objects are packed back to back from the segment start up to the bump
//! cursor. Reading each header's size is the only way to step from one
//! object to the next. A start bitmap (one bit per 16-byte granule) records
//! where headers were written, so a payload address can be checked without
//! walking the segment.

use crate::allocator::{BumpAllocator, MemoryProvider, ObjectHeader, HEADER_SIZE, OBJECT_ALIGN};
use core::ptr::NonNull;

pub(crate) struct Segment {
    base: NonNull<u8>,
    len: usize,
    bump: BumpAllocator,
    starts: Vec<u64>,
}

impl Segment {
    /// Map a segment of `len` bytes
    pub(crate) fn map<P: MemoryProvider>(provider: &P, len: usize) -> Option<Self> {
        let base = provider.reserve(len)?;
        // SAFETY: the mapping spans `len` bytes
        let end = unsafe { base.as_ptr().add(len) };
        let granules = len / OBJECT_ALIGN;
        Some(Self {
            base,
            len,
            bump: BumpAllocator::with_bounds(base.as_ptr(), end),
            starts: vec![0; (granules + 63) / 64],
        })
    }

    /// Return the mapping to `provider`
    ///
    /// # Safety
    /// `provider` must be the one that mapped this segment, and the segment
    /// must not be used afterwards.
    pub(crate) unsafe fn release<P: MemoryProvider>(&self, provider: &P) {
        provider.release(self.base, self.len);
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn start(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Address of the next header to be written
    #[inline]
    pub(crate) fn end(&self) -> usize {
        self.bump.cursor() as usize
    }

    /// Bump-allocate a slot of `slot_size` bytes
    #[inline]
    pub(crate) fn bump(&mut self, slot_size: usize) -> Option<NonNull<ObjectHeader>> {
        let slot = self.bump.try_alloc(slot_size, OBJECT_ALIGN)?;
        let granule = (slot.as_ptr() as usize - self.start()) / OBJECT_ALIGN;
        self.starts[granule / 64] |= 1u64 << (granule % 64);
        Some(slot.cast::<ObjectHeader>())
    }

    /// Whether a header was ever written at `addr`
    #[inline]
    fn is_object_start(&self, addr: usize) -> bool {
        let granule = (addr - self.start()) / OBJECT_ALIGN;
        self.starts
            .get(granule / 64)
            .map_or(false, |&word| word & (1u64 << (granule % 64)) != 0)
    }

    /// Header of the object whose payload starts at `addr`
    ///
    /// Addresses inside a payload, past the cursor, or outside the segment
    /// give `None`.
    #[inline]
    pub(crate) fn header_for(&self, addr: usize) -> Option<NonNull<ObjectHeader>> {
        let start = self.start();
        if addr < start + HEADER_SIZE || addr >= self.end() || (addr - start) % OBJECT_ALIGN != 0 {
            return None;
        }
        let header = addr - HEADER_SIZE;
        if !self.is_object_start(header) {
            return None;
        }
        NonNull::new(header as *mut ObjectHeader)
    }

    /// Every header from the segment start to the cursor
    pub(crate) fn headers(&self) -> Headers {
        Headers {
            pos: self.start(),
            end: self.end(),
        }
    }
}

/// Linear walk over packed headers
pub(crate) struct Headers {
    pos: usize,
    end: usize,
}

impl Iterator for Headers {
    type Item = NonNull<ObjectHeader>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }

        let header = NonNull::new(self.pos as *mut ObjectHeader)?;
        // SAFETY: every slot below the cursor starts with a written header
        let slot = unsafe { header.as_ref().slot_size() };
        self.pos += slot;
        Some(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::OsMemory;

    #[test]
    fn only_written_headers_resolve() {
        let mut segment = Segment::map(&OsMemory, 4096).unwrap();
        let small = segment.bump(32).unwrap().as_ptr() as usize;
        let large = segment.bump(96).unwrap().as_ptr() as usize;
        assert_eq!(large - small, 32);

        assert_eq!(segment.header_for(small + HEADER_SIZE).map(|h| h.as_ptr() as usize), Some(small));
        assert_eq!(segment.header_for(large + HEADER_SIZE).map(|h| h.as_ptr() as usize), Some(large));

        for interior in [large + 32, large + 48, large + 80] {
            assert!(segment.header_for(interior).is_none(), "{:#x}", interior - large);
        }
        assert!(segment.header_for(segment.end() + HEADER_SIZE).is_none());
        assert!(segment.header_for(small).is_none());

        // SAFETY: mapped above, not used again
        unsafe { segment.release(&OsMemory) };
    }
}
