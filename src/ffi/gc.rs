//! GC bindings - C API over the calling thread's default heap
//!
//! Each thread lazily gets its own heap configured from the environment;
//! compiled programs run on one thread, so in practice there is one heap.

use super::{status, write_counters, MANV_ERR};
use crate::config::GcConfig;
use crate::gc::{Heap, RawFrame, TypeDescriptor};
use crate::logging::{log_misuse, warn};

thread_local! {
    static DEFAULT_HEAP: Heap = Heap::with_config(GcConfig::from_env());
}

/// Run `f` on the calling thread's default heap
///
/// Returns `None` while the thread is being torn down.
pub(crate) fn with_default_heap<R>(f: impl FnOnce(&Heap) -> R) -> Option<R> {
    DEFAULT_HEAP.try_with(f).ok()
}

/// Map the default heap (idempotent)
#[no_mangle]
pub extern "C" fn manv_gc_init() -> i32 {
    with_default_heap(|heap| status("manv_gc_init", heap.init())).unwrap_or(MANV_ERR)
}

/// Allocate a zeroed object of `size` payload bytes tagged `type_id`
///
/// May run a collection first. Returns null on failure.
#[no_mangle]
pub extern "C" fn manv_gc_alloc(size: usize, type_id: u64) -> *mut u8 {
    with_default_heap(|heap| match heap.allocate(size, type_id) {
        Ok(obj) => obj.as_ptr(),
        Err(e) => {
            warn!(size, type_id, error = %e, "GC allocation failed");
            core::ptr::null_mut()
        }
    })
    .unwrap_or(core::ptr::null_mut())
}

/// Run a full collection, returning the number of objects reclaimed
#[no_mangle]
pub extern "C" fn manv_gc_collect() -> usize {
    with_default_heap(Heap::collect).unwrap_or(0)
}

/// Register a root frame laid out as `[count][count slots][link]`
///
/// # Safety
/// `frame` must stay valid, and hold only null or payload-like pointers,
/// until it is unregistered.
#[no_mangle]
pub unsafe extern "C" fn manv_gc_register_frame(frame: *mut usize) -> i32 {
    let Some(frame) = RawFrame::from_ptr(frame) else {
        log_misuse("manv_gc_register_frame", "null frame");
        return MANV_ERR;
    };
    with_default_heap(|heap| status("manv_gc_register_frame", heap.register_frame(frame))).unwrap_or(MANV_ERR)
}

/// Unregister a frame; unknown frames are rejected
///
/// # Safety
/// Every registered frame must still be valid.
#[no_mangle]
pub unsafe extern "C" fn manv_gc_unregister_frame(frame: *mut usize) -> i32 {
    let Some(frame) = RawFrame::from_ptr(frame) else {
        log_misuse("manv_gc_unregister_frame", "null frame");
        return MANV_ERR;
    };
    with_default_heap(|heap| status("manv_gc_unregister_frame", heap.unregister_frame(frame))).unwrap_or(MANV_ERR)
}

/// Describe where `type_id` objects store references
///
/// `offsets` lists `count` payload byte offsets of reference slots. A null
/// `offsets` with `count == usize::MAX` marks every payload word as a
/// reference; null with any other count registers an opaque type.
///
/// # Safety
/// A non-null `offsets` must be valid for `count` reads.
#[no_mangle]
pub unsafe extern "C" fn manv_gc_register_type(type_id: u64, offsets: *const usize, count: usize) -> i32 {
    let descriptor = match (offsets.is_null(), count) {
        (true, usize::MAX) => TypeDescriptor::all_references(),
        (true, _) | (false, 0) => TypeDescriptor::opaque(),
        (false, _) => TypeDescriptor::with_offsets(core::slice::from_raw_parts(offsets, count)),
    };
    with_default_heap(|heap| status("manv_gc_register_type", heap.register_type(type_id, descriptor)))
        .unwrap_or(MANV_ERR)
}

/// Set the outstanding-bytes threshold that triggers collection
#[no_mangle]
pub extern "C" fn manv_gc_set_threshold(threshold: usize) {
    with_default_heap(|heap| heap.set_threshold(threshold));
}

/// Write `[allocated_bytes, object_count, collections, total_freed,
/// total_allocated]` into `out`
///
/// # Safety
/// `out` must be valid for five `u64` writes.
#[no_mangle]
pub unsafe extern "C" fn manv_gc_stats(out: *mut u64) -> i32 {
    match with_default_heap(|heap| heap.stats()) {
        Some(stats) => write_counters(out, stats.to_array()),
        None => MANV_ERR,
    }
}

/// Keep the object at `obj` alive until unpinned
#[no_mangle]
pub extern "C" fn manv_gc_pin(obj: *mut u8) -> i32 {
    with_default_heap(|heap| match heap.lookup(obj) {
        Some(obj) => status("manv_gc_pin", heap.pin(obj)),
        None => {
            log_misuse("manv_gc_pin", "not a live GC object");
            MANV_ERR
        }
    })
    .unwrap_or(MANV_ERR)
}

#[no_mangle]
pub extern "C" fn manv_gc_unpin(obj: *mut u8) -> i32 {
    with_default_heap(|heap| match heap.lookup(obj) {
        Some(obj) => status("manv_gc_unpin", heap.unpin(obj)),
        None => {
            log_misuse("manv_gc_unpin", "not a live GC object");
            MANV_ERR
        }
    })
    .unwrap_or(MANV_ERR)
}
