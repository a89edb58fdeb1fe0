//! Arena management - bump allocation over OS mappings
//!
//! Design: the arena header lives at the start of its own mapping, so an
//! arena needs no memory beyond what its provider hands out. Growth chains
//! additional mappings (blocks) and never moves earlier allocations.

use super::bump::{align_up, checked_align_up};
use super::header::{HeaderFlags, ObjectHeader, MAX_PAYLOAD_SIZE};
use super::os::{MemoryProvider, OsMemory};
use super::{HEADER_SIZE, OBJECT_ALIGN};
use crate::config::ArenaConfig;
use crate::logging::{debug, log_arena_growth, warn};
use bitflags::bitflags;
use core::mem::size_of;
use core::ptr::NonNull;

/// Room reserved in front of the first block's data
const ARENA_HEADER_SIZE: usize = align_up(size_of::<ArenaHeader>(), 64);

/// Room reserved in front of every chained block's data
const BLOCK_HEADER_SIZE: usize = align_up(size_of::<Block>(), 64);

bitflags! {
    /// Arena behaviour and lifecycle flags
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ArenaFlags: u32 {
        const CAN_GROW = 1 << 0;
        const WARN_ON_GROWTH = 1 << 1;
        const GROWTH_WARNED = 1 << 2;
        const FINALIZED = 1 << 3;
    }
}

/// One contiguous data region of an arena
#[repr(C)]
struct Block {
    data: *mut u8,
    capacity: usize,
    cursor: usize,
    mapped_len: usize,
    next: Option<NonNull<Block>>,
}

/// Arena metadata, stored at the start of the first mapping
#[repr(C)]
pub struct ArenaHeader {
    base: *mut u8,
    current: *mut u8,
    capacity: usize,
    original_capacity: usize,
    offset: usize,
    block_count: usize,
    flags: ArenaFlags,
    alignment: usize,
    growth_count: usize,
    growth_warnings: usize,
    /// Sum of the capacities of every block before `active`
    retired: usize,
    active: NonNull<Block>,
    first: Block,
}

/// Bump-pointer arena with reset-all and free-all semantics
pub struct Arena<P: MemoryProvider = OsMemory> {
    header: NonNull<ArenaHeader>,
    provider: P,
}

impl Arena {
    /// Create arena with default configuration on OS memory
    pub fn new(capacity: usize) -> Result<Self, ArenaError> {
        Self::with_config(capacity, ArenaConfig::default())
    }

    /// Create arena with custom configuration on OS memory
    pub fn with_config(capacity: usize, config: ArenaConfig) -> Result<Self, ArenaError> {
        Self::with_provider(capacity, config, OsMemory)
    }
}

impl<P: MemoryProvider> Arena<P> {
    /// Create arena backed by `provider`
    ///
    /// Capacity is rounded up to the configured alignment; one mapping of
    /// `capacity + header` bytes is reserved up front.
    pub fn with_provider(capacity: usize, config: ArenaConfig, provider: P) -> Result<Self, ArenaError> {
        let alignment = config.alignment;
        if !alignment.is_power_of_two() {
            return Err(ArenaError::InvalidAlignment(alignment));
        }

        let capacity = checked_align_up(capacity, alignment).ok_or(ArenaError::SizeOverflow(capacity))?;
        let mapped_len = capacity
            .checked_add(ARENA_HEADER_SIZE)
            .ok_or(ArenaError::SizeOverflow(capacity))?;

        let mapping = provider
            .reserve(mapped_len)
            .ok_or(ArenaError::MapFailed { size: mapped_len })?;

        let mut flags = ArenaFlags::empty();
        flags.set(ArenaFlags::CAN_GROW, config.can_grow);
        flags.set(ArenaFlags::WARN_ON_GROWTH, config.warn_on_growth);

        let header = mapping.cast::<ArenaHeader>();
        // SAFETY: fresh mapping, large enough for the header plus `capacity`
        unsafe {
            let base = mapping.as_ptr().add(ARENA_HEADER_SIZE);
            let first = core::ptr::addr_of_mut!((*header.as_ptr()).first);
            header.as_ptr().write(ArenaHeader {
                base,
                current: base,
                capacity,
                original_capacity: capacity,
                offset: 0,
                block_count: 1,
                flags,
                alignment,
                growth_count: 0,
                growth_warnings: 0,
                retired: 0,
                active: NonNull::new_unchecked(first),
                first: Block {
                    data: base,
                    capacity,
                    cursor: 0,
                    mapped_len,
                    next: None,
                },
            });
        }

        debug!(capacity, alignment, base = ?mapping.as_ptr(), "arena created");
        Ok(Self { header, provider })
    }

    #[inline]
    fn header(&self) -> &ArenaHeader {
        // SAFETY: the header stays mapped for the lifetime of `self`
        unsafe { self.header.as_ref() }
    }

    #[inline]
    fn header_mut(&mut self) -> &mut ArenaHeader {
        // SAFETY: as above, and `&mut self` guarantees exclusive access
        unsafe { self.header.as_mut() }
    }

    /// Allocate `size` bytes at the arena's default alignment
    #[inline]
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, ArenaError> {
        let alignment = self.header().alignment;
        self.allocate_aligned(size, alignment)
    }

    /// Allocate `size` bytes aligned to `align`
    ///
    /// Zero-sized requests are served as one byte so every call yields a
    /// distinct address. Memory is not zeroed. On failure the cursor is
    /// left untouched.
    pub fn allocate_aligned(&mut self, size: usize, align: usize) -> Result<NonNull<u8>, ArenaError> {
        if !align.is_power_of_two() {
            return Err(ArenaError::InvalidAlignment(align));
        }
        let size = size.max(1);

        let mut block = self.header().active;
        let mut retired = self.header().retired;
        let mut fresh = false;

        loop {
            // SAFETY: every block in the chain stays mapped until drop
            let found = fit(unsafe { block.as_ref() }, fresh, size, align);
            if let Some(end) = found {
                return Ok(self.commit(block, retired, end, size));
            }

            // Blocks after the active one are empty leftovers from a reset
            let next = unsafe { block.as_ref().next };
            match next {
                Some(next) => {
                    retired += unsafe { block.as_ref().capacity };
                    block = next;
                    fresh = true;
                }
                None => break,
            }
        }

        if !self.header().flags.contains(ArenaFlags::CAN_GROW) {
            return Err(ArenaError::OutOfCapacity {
                requested: size,
                available: self.available(),
            });
        }

        self.warn_growth_once(size);
        let grown = self.grow(block, size, align)?;
        retired += unsafe { block.as_ref().capacity };

        // SAFETY: the new block was sized to hold `size` at `align`
        let end = fit(unsafe { grown.as_ref() }, true, size, align).ok_or(ArenaError::OutOfCapacity {
            requested: size,
            available: 0,
        })?;
        Ok(self.commit(grown, retired, end, size))
    }

    /// Commit an allocation ending at `end` within `block`
    fn commit(&mut self, mut block: NonNull<Block>, retired: usize, end: usize, size: usize) -> NonNull<u8> {
        // SAFETY: `block` belongs to this arena's chain
        let (data, start) = unsafe {
            let b = block.as_mut();
            b.cursor = end;
            (b.data, end - size)
        };

        let header = self.header_mut();
        header.active = block;
        header.retired = retired;
        header.offset = retired + end;
        // SAFETY: `end <= capacity` of the block
        header.current = unsafe { data.add(end) };

        unsafe { NonNull::new_unchecked(data.add(start)) }
    }

    fn warn_growth_once(&mut self, size: usize) {
        let header = self.header_mut();
        if header.flags.contains(ArenaFlags::WARN_ON_GROWTH) && !header.flags.contains(ArenaFlags::GROWTH_WARNED) {
            header.flags.insert(ArenaFlags::GROWTH_WARNED);
            header.growth_warnings += 1;
            let (base, capacity) = (header.base, header.capacity);

            warn!(base = ?base, capacity, requested = size, "arena capacity exceeded");
            eprintln!(
                "manv: arena at {:p} exceeded its capacity of {} bytes (request of {} bytes); chaining a new block",
                base, capacity, size
            );
        }
    }

    /// Map a new block large enough for `size` at `align` and link it after `last`
    fn grow(&mut self, mut last: NonNull<Block>, size: usize, align: usize) -> Result<NonNull<Block>, ArenaError> {
        let (original, alignment) = (self.header().original_capacity, self.header().alignment);

        let needed = size
            .checked_add(align)
            .and_then(|n| checked_align_up(n, alignment))
            .ok_or(ArenaError::SizeOverflow(size))?;
        let capacity = original.max(needed);
        let mapped_len = capacity
            .checked_add(BLOCK_HEADER_SIZE)
            .ok_or(ArenaError::SizeOverflow(size))?;

        let mapping = self
            .provider
            .reserve(mapped_len)
            .ok_or(ArenaError::MapFailed { size: mapped_len })?;

        let block = mapping.cast::<Block>();
        // SAFETY: fresh mapping with room for the block header and data
        unsafe {
            block.as_ptr().write(Block {
                data: mapping.as_ptr().add(BLOCK_HEADER_SIZE),
                capacity,
                cursor: 0,
                mapped_len,
                next: None,
            });
            last.as_mut().next = Some(block);
        }

        let header = self.header_mut();
        header.capacity += capacity;
        header.block_count += 1;
        header.growth_count += 1;
        let (total, growth_count) = (header.capacity, header.growth_count);

        log_arena_growth(capacity, total, growth_count);
        Ok(block)
    }

    /// Allocate a payload tagged with an arena-managed object header
    pub fn alloc_object(&mut self, type_id: u64, size: usize) -> Result<NonNull<u8>, ArenaError> {
        if size > MAX_PAYLOAD_SIZE {
            return Err(ArenaError::SizeOverflow(size));
        }

        let slot = self.allocate_aligned(HEADER_SIZE + size, OBJECT_ALIGN)?;
        let header = slot.cast::<ObjectHeader>();
        // SAFETY: `slot` spans header plus payload and is 16-byte aligned
        unsafe {
            header.as_ptr().write(ObjectHeader::new(type_id, size, HeaderFlags::ARENA_MANAGED));
        }
        Ok(ObjectHeader::payload_of(header))
    }

    /// Rewind to the first block, keeping every mapping
    ///
    /// Previously returned pointers become dangling in the logical sense:
    /// their memory is handed out again by later allocations.
    pub fn reset(&mut self) {
        let header = self.header_mut();
        let first = core::ptr::addr_of_mut!(header.first);
        header.first.cursor = 0;
        header.offset = 0;
        header.retired = 0;
        header.current = header.base;
        // SAFETY: points into the header itself
        header.active = unsafe { NonNull::new_unchecked(first) };
    }

    /// Release every mapping owned by the arena
    pub fn free(self) {
        debug!(base = ?self.header().base, "arena freed");
        drop(self);
    }

    /// Enable or disable growth past the current capacity
    pub fn set_growth(&mut self, can_grow: bool, warn_on_growth: bool) {
        let flags = &mut self.header_mut().flags;
        flags.set(ArenaFlags::CAN_GROW, can_grow);
        flags.set(ArenaFlags::WARN_ON_GROWTH, warn_on_growth);
    }

    /// Bytes still available without growing
    #[inline]
    pub fn available(&self) -> usize {
        let header = self.header();
        header.capacity - header.offset
    }

    /// Start of the first block
    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        // SAFETY: base always points into the first mapping
        unsafe { NonNull::new_unchecked(self.header().base) }
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.header().offset
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.header().capacity
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        self.header().alignment
    }

    #[inline]
    pub fn flags(&self) -> ArenaFlags {
        self.header().flags
    }

    /// Number of times the growth diagnostic was emitted (0 or 1)
    #[inline]
    pub fn growth_warnings(&self) -> usize {
        self.header().growth_warnings
    }

    /// Address one past the last allocated byte
    #[inline]
    pub fn current(&self) -> *mut u8 {
        self.header().current
    }

    /// Whether `ptr` falls inside any block of this arena
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        self.blocks().any(|block| {
            // SAFETY: blocks yielded by `blocks` are mapped
            let b = unsafe { block.as_ref() };
            let start = b.data as usize;
            addr >= start && addr < start + b.capacity
        })
    }

    fn blocks(&self) -> impl Iterator<Item = NonNull<Block>> + '_ {
        let first = NonNull::from(&self.header().first);
        core::iter::successors(Some(first), |block| unsafe { block.as_ref().next })
    }

    /// Snapshot of the arena's counters
    pub fn stats(&self) -> ArenaStats {
        let header = self.header();
        ArenaStats {
            capacity: header.capacity,
            used: header.offset,
            available: header.capacity - header.offset,
            growth_count: header.growth_count,
            block_count: header.block_count,
        }
    }

    /// Give up ownership, returning the header address as an opaque handle
    pub fn into_raw(self) -> NonNull<ArenaHeader> {
        let header = self.header;
        core::mem::forget(self);
        header
    }

    /// Rebuild an arena from a handle produced by [`Arena::into_raw`]
    ///
    /// # Safety
    /// `header` must come from `into_raw` on an arena created with an
    /// equivalent provider, and must not be used again afterwards except
    /// through the returned value.
    pub unsafe fn from_raw(header: NonNull<ArenaHeader>, provider: P) -> Self {
        Self { header, provider }
    }
}

/// End offset of a `size`/`align` request within `block`, if it fits
///
/// `fresh` blocks are treated as empty regardless of their stale cursor.
fn fit(block: &Block, fresh: bool, size: usize, align: usize) -> Option<usize> {
    let cursor = if fresh { 0 } else { block.cursor };
    let data = block.data as usize;
    let aligned = checked_align_up(data.checked_add(cursor)?, align)? - data;
    let end = aligned.checked_add(size)?;
    (end <= block.capacity).then_some(end)
}

impl<P: MemoryProvider> Drop for Arena<P> {
    fn drop(&mut self) {
        self.header_mut().flags.insert(ArenaFlags::FINALIZED);

        // SAFETY: each block was mapped by `self.provider` and is released once
        unsafe {
            let mut next = self.header().first.next;
            while let Some(block) = next {
                let (mapped_len, following) = (block.as_ref().mapped_len, block.as_ref().next);
                self.provider.release(block.cast::<u8>(), mapped_len);
                next = following;
            }

            let mapped_len = self.header().first.mapped_len;
            self.provider.release(self.header.cast::<u8>(), mapped_len);
        }
    }
}

impl<P: MemoryProvider> core::fmt::Debug for Arena<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Arena")
            .field("base", &self.header().base)
            .field("stats", &self.stats())
            .field("flags", &self.flags())
            .finish()
    }
}

/// Arena statistics for monitoring and debugging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    pub capacity: usize,
    pub used: usize,
    pub available: usize,
    pub growth_count: usize,
    pub block_count: usize,
}

impl ArenaStats {
    /// Fixed-order counter block: capacity, used, available, growth count
    pub fn to_array(&self) -> [u64; 4] {
        [
            self.capacity as u64,
            self.used as u64,
            self.available as u64,
            self.growth_count as u64,
        ]
    }
}

/// Arena errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    MapFailed { size: usize },
    OutOfCapacity { requested: usize, available: usize },
    InvalidAlignment(usize),
    SizeOverflow(usize),
}

impl core::fmt::Display for ArenaError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MapFailed { size } => write!(f, "Failed to map {} bytes for arena", size),
            Self::OutOfCapacity { requested, available } => {
                write!(f, "Arena exhausted: requested {} bytes, {} available", requested, available)
            }
            Self::InvalidAlignment(align) => write!(f, "Alignment {} is not a power of two", align),
            Self::SizeOverflow(size) => write!(f, "Size {} overflows arena bookkeeping", size),
        }
    }
}

impl std::error::Error for ArenaError {}
