//! Typed handle to a GC object

use crate::allocator::{HeaderFlags, ObjectHeader};
use core::marker::PhantomData;
use core::ptr::NonNull;

const WORD: usize = core::mem::size_of::<usize>();

/// Handle to an object on a [`Heap`](super::Heap)
///
/// Borrows the heap, so the memory behind it stays mapped for as long as
/// the handle exists. A handle to an object that has since been reclaimed
/// still reads valid (stale) memory; check [`Heap::is_live`](super::Heap::is_live)
/// when that matters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcRef<'h> {
    header: NonNull<ObjectHeader>,
    _heap: PhantomData<&'h ()>,
}

impl<'h> GcRef<'h> {
    #[inline]
    pub(crate) fn from_header(header: NonNull<ObjectHeader>) -> Self {
        Self {
            header,
            _heap: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn header_ptr(self) -> NonNull<ObjectHeader> {
        self.header
    }

    /// Copy of the object's header
    #[inline]
    pub fn header(self) -> ObjectHeader {
        // SAFETY: the heap borrowed for 'h keeps the header mapped
        unsafe { self.header.as_ptr().read() }
    }

    /// Start of the payload
    #[inline]
    pub fn payload(self) -> NonNull<u8> {
        ObjectHeader::payload_of(self.header)
    }

    /// Payload address as the raw pointer compiled code stores in root slots
    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.payload().as_ptr()
    }

    #[inline]
    pub fn size(self) -> usize {
        self.header().size()
    }

    #[inline]
    pub fn type_id(self) -> u64 {
        self.header().type_id()
    }

    #[inline]
    pub fn flags(self) -> HeaderFlags {
        self.header().flags()
    }

    /// Payload bytes
    ///
    /// # Safety
    /// No other reference to the payload may be live, and the object must
    /// not have been reclaimed.
    #[inline]
    pub unsafe fn bytes_mut(self) -> &'h mut [u8] {
        core::slice::from_raw_parts_mut(self.as_ptr(), self.size())
    }

    /// Store a reference to `target` at word-aligned `offset` in the payload
    ///
    /// Panics if the slot does not fit in the payload or is misaligned.
    pub fn write_ref(self, offset: usize, target: Option<GcRef<'h>>) {
        self.check_slot(offset);

        let value = target.map_or(core::ptr::null_mut(), |t| t.as_ptr());
        // SAFETY: bounds and alignment checked above; payloads are 16-byte aligned
        unsafe { self.as_ptr().add(offset).cast::<*mut u8>().write(value) };
    }

    /// Read the raw pointer stored at word-aligned `offset` in the payload
    pub fn read_ref(self, offset: usize) -> *mut u8 {
        self.check_slot(offset);

        // SAFETY: as in `write_ref`
        unsafe { self.as_ptr().add(offset).cast::<*mut u8>().read() }
    }

    fn check_slot(self, offset: usize) {
        assert!(offset % WORD == 0, "misaligned reference slot");
        assert!(
            offset.checked_add(WORD).map_or(false, |end| end <= self.size()),
            "reference slot out of bounds"
        );
    }
}

impl core::fmt::Debug for GcRef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let header = self.header();
        f.debug_struct("GcRef")
            .field("payload", &self.as_ptr())
            .field("type_id", &header.type_id())
            .field("size", &header.size())
            .field("flags", &header.flags())
            .finish()
    }
}
