//! C FFI - Stable ABI for generated code
//!
//! Design: thin `extern "C"` bindings over the safe API with:
//! 1. Arena lifecycle through opaque handles (create, alloc, reset, free)
//! 2. A per-thread default GC heap (alloc, collect, roots, types, pinning)
//! 3. Fixed-order statistics written into caller buffers
//! 4. Error propagation via null pointers and negative status codes

mod arena;
mod gc;

pub use arena::{
    manv_arena_alloc, manv_arena_alloc_aligned, manv_arena_available, manv_arena_create, manv_arena_free,
    manv_arena_reset, manv_arena_set_growth, manv_arena_stats,
};
pub use gc::{
    manv_gc_alloc, manv_gc_collect, manv_gc_init, manv_gc_pin, manv_gc_register_frame, manv_gc_register_type,
    manv_gc_set_threshold, manv_gc_stats, manv_gc_unpin, manv_gc_unregister_frame,
};

pub(crate) use gc::with_default_heap;

/// Status code for success
pub const MANV_OK: i32 = 0;

/// Status code for any rejected call
pub const MANV_ERR: i32 = -1;

/// Convert a unit result into a status code, logging the failure
#[inline]
pub(crate) fn status<E: core::fmt::Display>(op: &str, result: Result<(), E>) -> i32 {
    match result {
        Ok(()) => MANV_OK,
        Err(e) => {
            crate::logging::debug!(operation = op, error = %e, "FFI call failed");
            MANV_ERR
        }
    }
}

/// Copy `counters` into the caller's buffer
///
/// # Safety
/// `out` must be null or valid for `N` consecutive `u64` writes.
#[inline]
pub(crate) unsafe fn write_counters<const N: usize>(out: *mut u64, counters: [u64; N]) -> i32 {
    if out.is_null() {
        return MANV_ERR;
    }
    core::ptr::copy_nonoverlapping(counters.as_ptr(), out, N);
    MANV_OK
}
