//! Arena lifecycle - C API over opaque arena handles
//!
//! A handle is the arena header's address. Live handles are tracked in a
//! concurrent set so stale or foreign handles are rejected instead of
//! dereferenced.

use super::{write_counters, MANV_ERR, MANV_OK};
use crate::allocator::{Arena, ArenaHeader, OsMemory};
use crate::config::ArenaConfig;
use crate::logging::{log_misuse, trace, warn};
use core::mem::ManuallyDrop;
use core::ptr::NonNull;
use dashmap::DashSet;
use once_cell::sync::Lazy;

/// Handles returned by `manv_arena_create` and not yet freed
static LIVE_ARENAS: Lazy<DashSet<usize>> = Lazy::new(|| DashSet::with_capacity(16));

/// Run `f` on the arena behind `handle`, if it is live
fn with_arena<R>(op: &str, handle: *mut ArenaHeader, f: impl FnOnce(&mut Arena) -> R) -> Option<R> {
    let Some(header) = NonNull::new(handle) else {
        log_misuse(op, "null arena handle");
        return None;
    };
    if !LIVE_ARENAS.contains(&(handle as usize)) {
        log_misuse(op, "unknown or freed arena handle");
        return None;
    }

    // SAFETY: live handles come from `Arena::into_raw` and stay owned by the registry
    let mut arena = ManuallyDrop::new(unsafe { Arena::from_raw(header, OsMemory) });
    Some(f(&mut arena))
}

/// Create arena of at least `capacity` bytes
///
/// Returns null if the mapping fails.
#[no_mangle]
pub extern "C" fn manv_arena_create(capacity: usize) -> *mut ArenaHeader {
    match Arena::with_config(capacity, ArenaConfig::from_env()) {
        Ok(arena) => {
            let handle = arena.into_raw().as_ptr();
            LIVE_ARENAS.insert(handle as usize);
            trace!(event = "arena_create", capacity, handle = ?handle);
            handle
        }
        Err(e) => {
            warn!(capacity, error = %e, "arena creation failed");
            core::ptr::null_mut()
        }
    }
}

/// Allocate `size` bytes at the arena's default alignment
///
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn manv_arena_alloc(handle: *mut ArenaHeader, size: usize) -> *mut u8 {
    with_arena("manv_arena_alloc", handle, |arena| arena.allocate(size))
        .and_then(Result::ok)
        .map_or(core::ptr::null_mut(), NonNull::as_ptr)
}

/// Allocate `size` bytes aligned to `align`
///
/// Returns null on failure, including non-power-of-two alignments.
#[no_mangle]
pub extern "C" fn manv_arena_alloc_aligned(handle: *mut ArenaHeader, size: usize, align: usize) -> *mut u8 {
    with_arena("manv_arena_alloc_aligned", handle, |arena| arena.allocate_aligned(size, align))
        .and_then(Result::ok)
        .map_or(core::ptr::null_mut(), NonNull::as_ptr)
}

/// Rewind the arena; previous allocations are handed out again
#[no_mangle]
pub extern "C" fn manv_arena_reset(handle: *mut ArenaHeader) -> i32 {
    with_arena("manv_arena_reset", handle, Arena::reset).map_or(MANV_ERR, |()| MANV_OK)
}

/// Release every mapping of the arena and invalidate the handle
///
/// Freeing an unknown or already freed handle returns an error and
/// touches nothing.
#[no_mangle]
pub extern "C" fn manv_arena_free(handle: *mut ArenaHeader) -> i32 {
    let Some(header) = NonNull::new(handle) else {
        log_misuse("manv_arena_free", "null arena handle");
        return MANV_ERR;
    };
    if LIVE_ARENAS.remove(&(handle as usize)).is_none() {
        log_misuse("manv_arena_free", "double free or unknown arena handle");
        return MANV_ERR;
    }

    // SAFETY: the handle was live and is now unregistered, so this is its only owner
    unsafe { Arena::from_raw(header, OsMemory) }.free();
    MANV_OK
}

/// Bytes left before the arena has to grow, or 0 for an invalid handle
#[no_mangle]
pub extern "C" fn manv_arena_available(handle: *mut ArenaHeader) -> usize {
    with_arena("manv_arena_available", handle, |arena| arena.available()).unwrap_or(0)
}

/// Write `[capacity, used, available, growth_count]` into `out`
///
/// # Safety
/// `out` must be valid for four `u64` writes.
#[no_mangle]
pub unsafe extern "C" fn manv_arena_stats(handle: *mut ArenaHeader, out: *mut u64) -> i32 {
    match with_arena("manv_arena_stats", handle, |arena| arena.stats()) {
        Some(stats) => write_counters(out, stats.to_array()),
        None => MANV_ERR,
    }
}

/// Enable or disable growth and the one-time growth diagnostic
#[no_mangle]
pub extern "C" fn manv_arena_set_growth(handle: *mut ArenaHeader, can_grow: bool, warn_on_growth: bool) -> i32 {
    with_arena("manv_arena_set_growth", handle, |arena| arena.set_growth(can_grow, warn_on_growth))
        .map_or(MANV_ERR, |()| MANV_OK)
}
