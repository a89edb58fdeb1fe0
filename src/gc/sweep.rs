//! Sweep phase - linear walk reclaiming unmarked objects in place
//!
//! Reclaimed slots keep their header (and therefore their size) so the
//! walk can still step over them. Slots are never coalesced; small ones are
//! threaded onto exact-size free lists for reuse.

use super::segment::Segment;
use super::types::TypeRegistry;
use crate::allocator::{HeaderFlags, ObjectHeader, OBJECT_ALIGN};
use crate::logging::trace;
use core::ptr::NonNull;

/// Largest slot kept for reuse
pub(crate) const MAX_RECYCLED_SLOT: usize = 1024;

const CLASS_COUNT: usize = MAX_RECYCLED_SLOT / OBJECT_ALIGN;

/// Exact-size free lists, linked through the first payload word
pub(crate) struct FreeLists {
    heads: [Option<NonNull<ObjectHeader>>; CLASS_COUNT],
    len: usize,
}

impl FreeLists {
    pub(crate) const fn new() -> Self {
        Self {
            heads: [None; CLASS_COUNT],
            len: 0,
        }
    }

    /// Class index for a slot size, `None` when the slot is not recycled
    #[inline]
    fn class(slot_size: usize) -> Option<usize> {
        // 16-byte slots have no payload room for the link
        (slot_size > OBJECT_ALIGN && slot_size <= MAX_RECYCLED_SLOT).then(|| slot_size / OBJECT_ALIGN - 1)
    }

    /// Thread a reclaimed slot onto its list
    ///
    /// # Safety
    /// `header` must be a reclaimed slot of `slot_size` bytes that is not
    /// already on a list.
    pub(crate) unsafe fn push(&mut self, header: NonNull<ObjectHeader>, slot_size: usize) -> bool {
        let Some(class) = Self::class(slot_size) else {
            return false;
        };
        let link = ObjectHeader::payload_of(header).cast::<Option<NonNull<ObjectHeader>>>();
        link.as_ptr().write(self.heads[class]);
        self.heads[class] = Some(header);
        self.len += 1;
        true
    }

    /// Take a reclaimed slot of exactly `slot_size` bytes
    pub(crate) fn pop(&mut self, slot_size: usize) -> Option<NonNull<ObjectHeader>> {
        let class = Self::class(slot_size)?;
        let header = self.heads[class]?;
        // SAFETY: list members are reclaimed slots whose first payload word is the link
        unsafe {
            let link = ObjectHeader::payload_of(header).cast::<Option<NonNull<ObjectHeader>>>();
            self.heads[class] = link.as_ptr().read();
        }
        self.len -= 1;
        Some(header)
    }

    /// Slots currently available for reuse
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

/// Outcome of a sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SweepResult {
    pub objects: usize,
    pub bytes: usize,
    pub finalized: usize,
}

/// Sweep every segment, clearing marks on survivors
pub(crate) fn sweep(segments: &[Segment], mut free: Option<&mut FreeLists>, types: &TypeRegistry) -> SweepResult {
    let mut result = SweepResult::default();

    for mut header in segments.iter().flat_map(Segment::headers) {
        // SAFETY: heap walk yields written headers
        let h = unsafe { header.as_mut() };
        if !h.is_gc_managed() {
            continue;
        }

        if h.is_marked() {
            h.remove(HeaderFlags::MARKED | HeaderFlags::ROOT);
            continue;
        }

        if h.contains(HeaderFlags::HAS_FINALIZER) && !h.contains(HeaderFlags::FINALIZED) {
            if let Some(finalizer) = types.get(h.type_id()).and_then(|d| d.finalizer) {
                trace!(type_id = h.type_id(), "running finalizer");
                // SAFETY: payload is intact until the slot is recycled below
                unsafe { finalizer(ObjectHeader::payload_of(header), h.size()) };
                result.finalized += 1;
            }
            h.insert(HeaderFlags::FINALIZED);
        }

        h.remove(HeaderFlags::GC_MANAGED | HeaderFlags::ROOT | HeaderFlags::PINNED);
        let slot_size = h.slot_size();
        result.objects += 1;
        result.bytes += slot_size;

        if let Some(free) = free.as_deref_mut() {
            // SAFETY: the slot was just reclaimed and was gc-managed, so not listed
            unsafe { free.push(header, slot_size) };
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_classes() {
        assert_eq!(FreeLists::class(16), None);
        assert_eq!(FreeLists::class(32), Some(1));
        assert_eq!(FreeLists::class(1024), Some(63));
        assert_eq!(FreeLists::class(1040), None);
    }

    #[test]
    fn free_list_is_lifo_per_class() {
        let mut slots = [[0u64; 4]; 3];
        let headers: Vec<NonNull<ObjectHeader>> = slots
            .iter_mut()
            .map(|slot| NonNull::from(slot).cast::<ObjectHeader>())
            .collect();

        let mut free = FreeLists::new();
        unsafe {
            assert!(free.push(headers[0], 32));
            assert!(free.push(headers[1], 32));
            assert!(!free.push(headers[2], 16 * 80)); // too large, ignored
        }
        assert_eq!(free.len(), 2);
        assert_eq!(free.pop(48), None);
        assert_eq!(free.pop(32), Some(headers[1]));
        assert_eq!(free.pop(32), Some(headers[0]));
        assert_eq!(free.pop(32), None);
    }
}
