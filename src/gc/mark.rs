//! Mark phase - roots first, then transitive tracing
//!
//! The mark stack has a fixed capacity. When a push does not fit the object
//! stays marked but untraced, and the heap is rescanned for marked objects
//! once the stack drains, until a full pass completes without overflow.

use super::roots::RootRegistry;
use super::segment::Segment;
use super::types::TypeRegistry;
use crate::allocator::{HeaderFlags, MemoryProvider, ObjectHeader};
use crate::logging::trace;
use core::mem::size_of;
use core::ptr::NonNull;

/// Bounded stack of headers awaiting trace, backed by provider memory
pub(crate) struct MarkStack {
    base: NonNull<NonNull<ObjectHeader>>,
    capacity: usize,
    len: usize,
    overflowed: bool,
}

impl MarkStack {
    pub(crate) fn map<P: MemoryProvider>(provider: &P, capacity: usize) -> Option<Self> {
        let capacity = capacity.max(1);
        let base = provider.reserve(capacity.checked_mul(size_of::<usize>())?)?;
        Some(Self {
            base: base.cast(),
            capacity,
            len: 0,
            overflowed: false,
        })
    }

    /// # Safety
    /// `provider` must be the one that mapped this stack.
    pub(crate) unsafe fn release<P: MemoryProvider>(&self, provider: &P) {
        provider.release(self.base.cast(), self.capacity * size_of::<usize>());
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.len = 0;
        self.overflowed = false;
    }

    /// Push `header`, recording an overflow when full
    #[inline]
    fn push(&mut self, header: NonNull<ObjectHeader>) {
        if self.len == self.capacity {
            self.overflowed = true;
            return;
        }
        // SAFETY: len < capacity
        unsafe { self.base.as_ptr().add(self.len).write(header) };
        self.len += 1;
    }

    #[inline]
    fn pop(&mut self) -> Option<NonNull<ObjectHeader>> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        // SAFETY: slot `len` was written by `push`
        Some(unsafe { self.base.as_ptr().add(self.len).read() })
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Outcome of a mark phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct MarkResult {
    pub marked: usize,
    pub overflow_rescans: usize,
}

pub(crate) struct Marker<'a> {
    segments: &'a [Segment],
    stack: &'a mut MarkStack,
    types: &'a TypeRegistry,
    marked: usize,
}

impl<'a> Marker<'a> {
    pub(crate) fn new(segments: &'a [Segment], stack: &'a mut MarkStack, types: &'a TypeRegistry) -> Self {
        stack.reset();
        Self {
            segments,
            stack,
            types,
            marked: 0,
        }
    }

    /// Run the whole phase
    pub(crate) fn run(mut self, roots: &RootRegistry, pinned: usize) -> MarkResult {
        self.mark_roots(roots);
        if pinned > 0 {
            self.mark_pinned();
        }
        let overflow_rescans = self.drain_with_rescans();

        MarkResult {
            marked: self.marked,
            overflow_rescans,
        }
    }

    /// GC-managed header for a payload pointer, skipping anything else
    fn lookup(&self, ptr: *mut u8) -> Option<NonNull<ObjectHeader>> {
        if ptr.is_null() {
            return None;
        }
        let addr = ptr as usize;
        let header = self.segments.iter().find_map(|seg| seg.header_for(addr))?;
        // SAFETY: `header_for` only returns headers written by `bump`
        unsafe { header.as_ref() }.is_gc_managed().then_some(header)
    }

    fn mark(&mut self, mut header: NonNull<ObjectHeader>, extra: HeaderFlags) {
        // SAFETY: only called with headers from `lookup` or a heap walk
        let h = unsafe { header.as_mut() };
        h.insert(extra);
        if h.is_marked() {
            return;
        }
        h.insert(HeaderFlags::MARKED);
        self.marked += 1;
        self.stack.push(header);
    }

    fn mark_roots(&mut self, roots: &RootRegistry) {
        for frame in roots.frames() {
            // SAFETY: registered frames are valid until unregistered
            for ptr in unsafe { frame.roots() } {
                if let Some(header) = self.lookup(ptr) {
                    self.mark(header, HeaderFlags::ROOT);
                }
            }
        }
    }

    fn mark_pinned(&mut self) {
        let segments = self.segments;
        for header in segments.iter().flat_map(Segment::headers) {
            // SAFETY: heap walk yields written headers
            let flags = unsafe { header.as_ref() }.flags();
            if flags.contains(HeaderFlags::GC_MANAGED | HeaderFlags::PINNED) {
                self.mark(header, HeaderFlags::empty());
            }
        }
    }

    /// Mark every GC object referenced from `header`'s payload
    fn trace(&mut self, header: NonNull<ObjectHeader>) {
        // SAFETY: `header` is a marked, live object
        let h = unsafe { *header.as_ref() };
        let types = self.types;
        let Some(descriptor) = types.get(h.type_id()) else {
            return;
        };

        let payload = ObjectHeader::payload_of(header);
        // SAFETY: payload spans `size` bytes and is 16-byte aligned
        unsafe {
            descriptor.for_each_reference(payload, h.size(), |child| {
                if let Some(child) = self.lookup(child) {
                    self.mark(child, HeaderFlags::empty());
                }
            });
        }
    }

    fn drain(&mut self) {
        while let Some(header) = self.stack.pop() {
            self.trace(header);
        }
    }

    fn drain_with_rescans(&mut self) -> usize {
        let mut rescans = 0;
        self.drain();

        while self.stack.overflowed {
            self.stack.overflowed = false;
            rescans += 1;
            trace!(rescans, capacity = self.stack.capacity(), "mark stack overflowed, rescanning heap");

            let segments = self.segments;
            for header in segments.iter().flat_map(Segment::headers) {
                // SAFETY: heap walk yields written headers
                let h = unsafe { header.as_ref() };
                if h.is_gc_managed() && h.is_marked() {
                    self.trace(header);
                    self.drain();
                }
            }
        }
        rescans
    }
}
