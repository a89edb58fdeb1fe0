//! ManV Runtime - memory subsystem for compiled ManV programs
//!
//! This crate provides the memory management statically linked into
//! compiled programs: bump arenas for region-scoped data and a
//! non-moving mark-sweep collector for everything else.
//!
//! Both sit on raw OS mappings obtained through a [`MemoryProvider`];
//! every managed payload is preceded by a 16-byte [`ObjectHeader`].

pub mod allocator;
pub mod config;
pub mod ffi;
pub mod gc;
pub mod logging;

// Re-export core types
pub use allocator::{Arena, ArenaError, ArenaStats, HeaderFlags, MemoryProvider, ObjectHeader, OsMemory};
pub use config::{ArenaConfig, GcConfig};
pub use gc::{GcError, GcRef, GcStats, Heap, RawFrame, RootFrame, TypeDescriptor, TypeLayout};

/// Runtime initialization
///
/// Sets up logging from the environment and maps the calling thread's
/// default heap. Returns 0 on success, -1 if the heap could not be mapped.
#[no_mangle]
pub extern "C" fn manv_runtime_init() -> i32 {
    logging::init();
    logging::log_runtime_init();
    ffi::manv_gc_init()
}

/// Runtime cleanup
///
/// Runs a final collection so finalizers of unreachable objects get to run.
#[no_mangle]
pub extern "C" fn manv_runtime_cleanup() {
    let collected = ffi::with_default_heap(gc::Heap::collect).unwrap_or(0);
    logging::debug!(collected, "final collection");
    logging::log_runtime_shutdown();
}
