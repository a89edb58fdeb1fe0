//! Memory allocator - bump allocation over OS mappings
//!
//! Design: Three-layer architecture:
//! 1. Bump allocation (fast path)
//! 2. Arena / segment management (slow path, block chaining)
//! 3. OS memory (rare, bulk acquisition through a `MemoryProvider`)

mod arena;
mod bump;
mod header;
mod os;


pub use arena::{Arena, ArenaError, ArenaFlags, ArenaHeader, ArenaStats};
pub use bump::{align_up, checked_align_up, BumpAllocator};
pub use header::{slot_size_for, HeaderFlags, ObjectHeader, MAX_PAYLOAD_SIZE};
pub use os::{MemoryProvider, OsMemory};

/// Size of the header preceding every managed payload
pub const HEADER_SIZE: usize = 16;

/// Alignment of every managed object slot
pub const OBJECT_ALIGN: usize = 16;

/// Default arena alignment
pub const DEFAULT_ALIGNMENT: usize = 16;
