//! Garbage collector - stop-the-world, non-moving mark-sweep
//!
//! Design: Bump allocation into OS-mapped segments, reclamation in place:
//! 1. Threshold check before each allocation (collection runs inline)
//! 2. Mark from registered root frames and pinned objects, tracing through
//!    type descriptors
//! 3. Linear sweep driven by header sizes; small dead slots are recycled

mod mark;
mod object;
mod roots;
mod segment;
mod sweep;
mod types;

#[cfg(test)]
mod tests;

pub use object::GcRef;
pub use roots::{FrameScope, RawFrame, RootFrame, RootRegistry};
pub use types::{Finalizer, TypeDescriptor, TypeLayout, TypeRegistry};

use crate::allocator::{slot_size_for, HeaderFlags, MemoryProvider, ObjectHeader, OsMemory, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::config::GcConfig;
use crate::logging::{debug, log_allocation, log_misuse, log_gc_complete, log_gc_mark, log_gc_start, log_gc_sweep, log_heap_growth, warn};
use core::cell::RefCell;
use core::ptr::NonNull;
use mark::{MarkStack, Marker};
use segment::Segment;
use std::time::Instant;
use sweep::{sweep, FreeLists};

/// Lifetime counters of a heap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counters {
    allocated_bytes: usize,
    object_count: usize,
    collections: usize,
    total_freed: usize,
    total_allocated: usize,
}

/// Mutable heap state, only touched by one operation at a time
struct HeapState {
    segments: Vec<Segment>,
    mark_stack: Option<MarkStack>,
    free_lists: FreeLists,
    threshold: usize,
    pinned: usize,
    counters: Counters,
}

impl HeapState {
    fn mapped(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    fn lookup(&self, addr: usize) -> Option<NonNull<ObjectHeader>> {
        let header = self.segments.iter().find_map(|seg| seg.header_for(addr))?;
        // SAFETY: `header_for` only returns headers written by `bump`
        unsafe { header.as_ref() }.is_gc_managed().then_some(header)
    }
}

/// A garbage-collected heap
///
/// Heaps are independent: each has its own segments, roots, type
/// registry and counters. A heap is single-threaded; it is neither `Send`
/// nor `Sync`.
pub struct Heap<P: MemoryProvider = OsMemory> {
    provider: P,
    config: GcConfig,
    state: RefCell<HeapState>,
    roots: RootRegistry,
    types: RefCell<TypeRegistry>,
}

impl Heap {
    /// Create heap with default configuration (no memory mapped yet)
    pub fn new() -> Self {
        Self::with_config(GcConfig::default())
    }

    pub fn with_config(config: GcConfig) -> Self {
        Self::with_provider(config, OsMemory)
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: MemoryProvider> Heap<P> {
    pub fn with_provider(config: GcConfig, provider: P) -> Self {
        let threshold = config.threshold;
        Self {
            provider,
            config,
            state: RefCell::new(HeapState {
                segments: Vec::new(),
                mark_stack: None,
                free_lists: FreeLists::new(),
                threshold,
                pinned: 0,
                counters: Counters::default(),
            }),
            roots: RootRegistry::new(),
            types: RefCell::new(TypeRegistry::new()),
        }
    }

    /// Map the first segment and the mark stack (idempotent)
    pub fn init(&self) -> Result<(), GcError> {
        let mut state = self.state.borrow_mut();
        self.init_state(&mut state)
    }

    fn init_state(&self, state: &mut HeapState) -> Result<(), GcError> {
        if state.mark_stack.is_none() {
            let capacity = self.config.mark_stack_capacity;
            let stack = MarkStack::map(&self.provider, capacity).ok_or(GcError::MapFailed {
                size: capacity * core::mem::size_of::<usize>(),
            })?;
            state.mark_stack = Some(stack);
        }

        if state.segments.is_empty() {
            let size = self.config.initial_heap_size;
            let segment = Segment::map(&self.provider, size).ok_or(GcError::MapFailed { size })?;
            debug!(heap_size = size, base = ?segment.start(), "GC heap initialized");
            state.segments.push(segment);
        }
        Ok(())
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        !self.state.borrow().segments.is_empty()
    }

    #[inline]
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    #[inline]
    pub fn roots(&self) -> &RootRegistry {
        &self.roots
    }

    /// Allocate a zeroed payload of `size` bytes tagged with `type_id`
    ///
    /// Runs a collection first when the allocation would push outstanding
    /// bytes past the threshold. Zero-sized requests are served as one byte.
    pub fn allocate(&self, size: usize, type_id: u64) -> Result<GcRef<'_>, GcError> {
        if size > MAX_PAYLOAD_SIZE {
            return Err(GcError::ObjectTooLarge(size));
        }
        let size = size.max(1);
        let slot_size = slot_size_for(size);

        let needs_collection = {
            let mut state = self.state.borrow_mut();
            self.init_state(&mut state)?;
            state.counters.allocated_bytes + slot_size > state.threshold
        };
        if needs_collection {
            self.collect();
        }

        let mut state = self.state.borrow_mut();
        let header = self.take_slot(&mut state, slot_size)?;

        let mut flags = HeaderFlags::GC_MANAGED;
        if self.types.borrow().has_finalizer(type_id) {
            flags.insert(HeaderFlags::HAS_FINALIZER);
        }

        // SAFETY: `take_slot` returned a slot of `slot_size` bytes owned by this heap
        unsafe {
            header.as_ptr().write(ObjectHeader::new(type_id, size, flags));
        }

        let counters = &mut state.counters;
        counters.allocated_bytes += slot_size;
        counters.object_count += 1;
        counters.total_allocated += slot_size;

        let obj = GcRef::from_header(header);
        log_allocation(size, type_id, obj.as_ptr());
        Ok(obj)
    }

    /// Find room for a slot: free list, then any segment, then a new segment
    fn take_slot(&self, state: &mut HeapState, slot_size: usize) -> Result<NonNull<ObjectHeader>, GcError> {
        if self.config.recycle_slots {
            if let Some(header) = state.free_lists.pop(slot_size) {
                // SAFETY: recycled slots span `slot_size` bytes; stale payload is cleared
                unsafe {
                    ObjectHeader::payload_of(header)
                        .as_ptr()
                        .write_bytes(0, slot_size - HEADER_SIZE);
                }
                return Ok(header);
            }
        }

        if let Some(header) = state.segments.iter_mut().rev().find_map(|seg| seg.bump(slot_size)) {
            return Ok(header);
        }

        let mapped = state.mapped();
        let segment_size = self.config.initial_heap_size.max(slot_size);
        if mapped + segment_size > self.config.max_heap_size {
            warn!(requested = slot_size, heap_size = mapped, "GC heap exhausted");
            return Err(GcError::HeapExhausted {
                requested: slot_size,
                heap_size: mapped,
            });
        }

        let mut segment = Segment::map(&self.provider, segment_size).ok_or(GcError::MapFailed { size: segment_size })?;
        log_heap_growth(segment_size, mapped + segment_size);
        let header = segment.bump(slot_size).ok_or(GcError::HeapExhausted {
            requested: slot_size,
            heap_size: mapped + segment_size,
        })?;
        state.segments.push(segment);
        Ok(header)
    }

    /// Run a full mark-sweep cycle, returning the number of objects reclaimed
    ///
    /// Does nothing on a heap that has not been initialized.
    pub fn collect(&self) -> usize {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let Some(stack) = state.mark_stack.as_mut() else {
            return 0;
        };
        if state.segments.is_empty() {
            return 0;
        }

        let start = Instant::now();
        let types = self.types.borrow();
        log_gc_start(state.counters.allocated_bytes, state.counters.object_count);

        let marked = Marker::new(&state.segments, stack, &types).run(&self.roots, state.pinned);
        log_gc_mark(marked.marked, marked.overflow_rescans);

        let free_lists = self.config.recycle_slots.then_some(&mut state.free_lists);
        let swept = sweep(&state.segments, free_lists, &types);
        log_gc_sweep(swept.objects, swept.bytes);

        let counters = &mut state.counters;
        counters.collections += 1;
        counters.total_freed += swept.bytes;
        counters.allocated_bytes -= swept.bytes;
        counters.object_count -= swept.objects;

        log_gc_complete(start.elapsed().as_micros() as u64, swept.objects, counters.object_count);
        swept.objects
    }

    /// Register `frame` as a source of roots
    ///
    /// # Safety
    /// `frame` must stay valid, and its slots must hold either null, payload
    /// pointers, or pointers the collector will skip, until it is passed to
    /// [`Heap::unregister_frame`].
    pub unsafe fn register_frame(&self, frame: RawFrame) -> Result<(), GcError> {
        if self.roots.frames().any(|registered| registered == frame) {
            log_misuse("register_frame", "frame is already registered");
            return Err(GcError::FrameAlreadyRegistered);
        }
        self.roots.register(frame);
        Ok(())
    }

    /// Unregister a frame previously passed to [`Heap::register_frame`]
    ///
    /// # Safety
    /// Every registered frame must still be valid.
    pub unsafe fn unregister_frame(&self, frame: RawFrame) -> Result<(), GcError> {
        self.roots.unregister(frame)
    }

    /// Describe the reference layout of `type_id`
    pub fn register_type(&self, type_id: u64, descriptor: TypeDescriptor) -> Result<(), GcError> {
        self.types.borrow_mut().register(type_id, descriptor)
    }

    /// Keep `obj` alive regardless of roots until unpinned
    pub fn pin(&self, obj: GcRef<'_>) -> Result<(), GcError> {
        let mut state = self.state.borrow_mut();
        let mut header = self.checked_header(&state, obj)?;
        // SAFETY: validated as a live object of this heap
        let h = unsafe { header.as_mut() };
        if !h.contains(HeaderFlags::PINNED) {
            h.insert(HeaderFlags::PINNED);
            state.pinned += 1;
        }
        Ok(())
    }

    pub fn unpin(&self, obj: GcRef<'_>) -> Result<(), GcError> {
        let mut state = self.state.borrow_mut();
        let mut header = self.checked_header(&state, obj)?;
        // SAFETY: validated as a live object of this heap
        let h = unsafe { header.as_mut() };
        if h.contains(HeaderFlags::PINNED) {
            h.remove(HeaderFlags::PINNED);
            state.pinned -= 1;
        }
        Ok(())
    }

    fn checked_header(&self, state: &HeapState, obj: GcRef<'_>) -> Result<NonNull<ObjectHeader>, GcError> {
        state
            .lookup(obj.as_ptr() as usize)
            .filter(|&header| header == obj.header_ptr())
            .ok_or(GcError::NotAnObject)
    }

    /// Live object whose payload starts at `ptr`
    ///
    /// Returns `None` for null, arena, foreign or reclaimed pointers.
    pub fn lookup(&self, ptr: *const u8) -> Option<GcRef<'_>> {
        self.state.borrow().lookup(ptr as usize).map(GcRef::from_header)
    }

    /// Whether `obj` has not been reclaimed
    pub fn is_live(&self, obj: GcRef<'_>) -> bool {
        self.checked_header(&self.state.borrow(), obj).is_ok()
    }

    #[inline]
    pub fn threshold(&self) -> usize {
        self.state.borrow().threshold
    }

    pub fn set_threshold(&self, threshold: usize) {
        self.state.borrow_mut().threshold = threshold;
    }

    /// Total bytes mapped for objects
    pub fn heap_size(&self) -> usize {
        self.state.borrow().mapped()
    }

    pub fn segment_count(&self) -> usize {
        self.state.borrow().segments.len()
    }

    /// Get GC statistics
    pub fn stats(&self) -> GcStats {
        let state = self.state.borrow();
        let c = state.counters;
        GcStats {
            allocated_bytes: c.allocated_bytes,
            object_count: c.object_count,
            collections: c.collections,
            total_freed: c.total_freed,
            total_allocated: c.total_allocated,
            heap_size: state.mapped(),
            free_slots: state.free_lists.len(),
        }
    }
}

impl<P: MemoryProvider> Drop for Heap<P> {
    fn drop(&mut self) {
        if !self.roots.is_empty() {
            warn!(frames = self.roots.len(), "GC heap dropped with registered root frames");
        }

        let state = self.state.get_mut();
        // SAFETY: every segment and the mark stack were mapped by `self.provider`
        unsafe {
            for segment in state.segments.drain(..) {
                segment.release(&self.provider);
            }
            if let Some(stack) = state.mark_stack.take() {
                stack.release(&self.provider);
            }
        }
    }
}

/// GC statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub allocated_bytes: usize,
    pub object_count: usize,
    pub collections: usize,
    pub total_freed: usize,
    pub total_allocated: usize,
    pub heap_size: usize,
    pub free_slots: usize,
}

impl GcStats {
    /// Fixed-order counter block: allocated bytes, object count,
    /// collections, total freed, total allocated
    pub fn to_array(&self) -> [u64; 5] {
        [
            self.allocated_bytes as u64,
            self.object_count as u64,
            self.collections as u64,
            self.total_freed as u64,
            self.total_allocated as u64,
        ]
    }
}

/// Garbage collector errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcError {
    MapFailed { size: usize },
    HeapExhausted { requested: usize, heap_size: usize },
    ObjectTooLarge(usize),
    NotAnObject,
    FrameNotRegistered,
    FrameAlreadyRegistered,
    TypeAlreadyRegistered(u64),
    InvalidDescriptor { type_id: u64, offset: usize },
}

impl core::fmt::Display for GcError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MapFailed { size } => write!(f, "Failed to map {} bytes for GC heap", size),
            Self::HeapExhausted { requested, heap_size } => {
                write!(f, "GC heap exhausted: {} bytes requested, heap is {} bytes", requested, heap_size)
            }
            Self::ObjectTooLarge(size) => write!(f, "Object of {} bytes exceeds the 48-bit size field", size),
            Self::NotAnObject => write!(f, "Pointer does not name a live GC object"),
            Self::FrameNotRegistered => write!(f, "Root frame is not registered"),
            Self::FrameAlreadyRegistered => write!(f, "Root frame is already registered"),
            Self::TypeAlreadyRegistered(id) => write!(f, "Type {} already has a descriptor", id),
            Self::InvalidDescriptor { type_id, offset } => {
                write!(f, "Type {} has a misaligned reference offset {}", type_id, offset)
            }
        }
    }
}

impl std::error::Error for GcError {}
