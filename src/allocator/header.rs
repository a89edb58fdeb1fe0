//! Object metadata - layout primitives for runtime
//!
//! Design: one 16-byte header immediately precedes every managed payload.
//! The header's payload size is the only navigation aid during a heap walk,
//! so it must always describe the full slot the object occupies.

use super::{align_up, HEADER_SIZE, OBJECT_ALIGN};
use bitflags::bitflags;
use core::ptr::NonNull;

/// Largest payload the 48-bit size field can describe
pub const MAX_PAYLOAD_SIZE: usize = (1 << 48) - 1;

bitflags! {
    /// Lifecycle flags stored in the header's flag byte
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HeaderFlags: u8 {
        /// Reached during the current mark phase
        const MARKED = 1 << 0;
        /// Reached directly from a registered root frame
        const ROOT = 1 << 1;
        /// Owned by a GC heap and not yet reclaimed
        const GC_MANAGED = 1 << 2;
        /// Carved out of an arena, never traced or swept
        const ARENA_MANAGED = 1 << 3;
        /// Treated as a root until unpinned
        const PINNED = 1 << 4;
        /// Finalizer already ran
        const FINALIZED = 1 << 5;
        /// Type registered a finalizer for this object
        const HAS_FINALIZER = 1 << 6;
    }
}

/// Object header (16 bytes) - prefixed before every managed object
///
/// Layout:
/// - bytes 0..8: type identifier
/// - byte 8: lifecycle flags
/// - byte 9: generation (reserved)
/// - bytes 10..16: 48-bit payload size
#[repr(C, align(8))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    type_id: u64,
    flags: HeaderFlags,
    generation: u8,
    size_hi: u16,
    size_lo: u32,
}

const _: () = assert!(core::mem::size_of::<ObjectHeader>() == HEADER_SIZE);

impl ObjectHeader {
    /// Create header for a payload of `size` bytes
    ///
    /// `size` is truncated to 48 bits; callers validate against
    /// [`MAX_PAYLOAD_SIZE`] first.
    #[inline]
    pub const fn new(type_id: u64, size: usize, flags: HeaderFlags) -> Self {
        Self {
            type_id,
            flags,
            generation: 0,
            size_hi: ((size >> 32) & 0xFFFF) as u16,
            size_lo: (size & 0xFFFF_FFFF) as u32,
        }
    }

    #[inline]
    pub fn type_id(&self) -> u64 {
        self.type_id
    }

    /// Payload size in bytes (header excluded)
    #[inline]
    pub fn size(&self) -> usize {
        ((self.size_hi as usize) << 32) | self.size_lo as usize
    }

    #[inline]
    pub fn generation(&self) -> u8 {
        self.generation
    }

    /// Bytes from this header to the next one in a packed region
    #[inline]
    pub fn slot_size(&self) -> usize {
        slot_size_for(self.size())
    }

    #[inline]
    pub fn flags(&self) -> HeaderFlags {
        self.flags
    }

    #[inline]
    pub fn contains(&self, flags: HeaderFlags) -> bool {
        self.flags.contains(flags)
    }

    #[inline]
    pub fn insert(&mut self, flags: HeaderFlags) {
        self.flags.insert(flags);
    }

    #[inline]
    pub fn remove(&mut self, flags: HeaderFlags) {
        self.flags.remove(flags);
    }

    #[inline]
    pub fn set_flags(&mut self, flags: HeaderFlags) {
        self.flags = flags;
    }

    #[inline]
    pub fn is_marked(&self) -> bool {
        self.flags.contains(HeaderFlags::MARKED)
    }

    #[inline]
    pub fn is_gc_managed(&self) -> bool {
        self.flags.contains(HeaderFlags::GC_MANAGED)
    }

    /// Payload address for the header at `header`
    #[inline]
    pub(crate) fn payload_of(header: NonNull<Self>) -> NonNull<u8> {
        // SAFETY: headers are always followed by their payload in the same mapping
        unsafe { NonNull::new_unchecked(header.as_ptr().cast::<u8>().add(HEADER_SIZE)) }
    }
}

/// Slot size (header plus aligned payload) for a payload of `size` bytes
#[inline]
pub const fn slot_size_for(size: usize) -> usize {
    align_up(HEADER_SIZE + size, OBJECT_ALIGN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_sixteen_bytes() {
        assert_eq!(core::mem::size_of::<ObjectHeader>(), 16);
        assert_eq!(core::mem::align_of::<ObjectHeader>(), 8);
    }

    #[test]
    fn size_round_trips_through_48_bits() {
        let header = ObjectHeader::new(7, MAX_PAYLOAD_SIZE, HeaderFlags::empty());
        assert_eq!(header.size(), MAX_PAYLOAD_SIZE);

        let header = ObjectHeader::new(7, 0x1_2345_6789, HeaderFlags::empty());
        assert_eq!(header.size(), 0x1_2345_6789);
    }

    #[test]
    fn slot_size_packs_to_sixteen() {
        assert_eq!(slot_size_for(0), 16);
        assert_eq!(slot_size_for(1), 32);
        assert_eq!(slot_size_for(8), 32);
        assert_eq!(slot_size_for(16), 32);
        assert_eq!(slot_size_for(17), 48);
    }

    #[test]
    fn flag_accessors() {
        let mut header = ObjectHeader::new(1, 8, HeaderFlags::GC_MANAGED);
        assert!(header.is_gc_managed());
        assert!(!header.is_marked());

        header.insert(HeaderFlags::MARKED | HeaderFlags::ROOT);
        assert!(header.is_marked());
        assert!(header.contains(HeaderFlags::ROOT));

        header.remove(HeaderFlags::MARKED | HeaderFlags::ROOT);
        assert_eq!(header.flags(), HeaderFlags::GC_MANAGED);
    }
}
