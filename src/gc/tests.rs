use super::*;
use crate::allocator::Arena;
use crate::config::ArenaConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn heap_with(threshold: usize) -> Heap {
    Heap::with_config(GcConfig {
        threshold,
        ..GcConfig::default()
    })
}

struct NoMemory;

impl MemoryProvider for NoMemory {
    fn reserve(&self, _size: usize) -> Option<NonNull<u8>> {
        None
    }

    unsafe fn release(&self, _base: NonNull<u8>, _size: usize) {}
}

#[test]
fn unrooted_object_is_reclaimed() {
    let heap = Heap::new();
    heap.init().unwrap();

    let before = heap.stats();
    heap.allocate(8, 1).unwrap();
    assert_eq!(heap.collect(), 1);

    let after = heap.stats();
    assert_eq!(after.total_freed - before.total_freed, 32);
    assert_eq!(after.object_count, 0);
    assert_eq!(after.allocated_bytes, 0);
    assert_eq!(after.collections, 1);
}

#[test]
fn rooted_object_survives() {
    let heap = Heap::new();
    let frame = RootFrame::<1>::new();
    let _scope = heap.enter(&frame).unwrap();

    let obj = heap.allocate(24, 7).unwrap();
    frame.set(0, Some(obj));

    assert_eq!(heap.collect(), 0);
    assert!(heap.is_live(obj));
    assert_eq!(obj.type_id(), 7);
    assert_eq!(obj.size(), 24);
    assert!(!obj.flags().contains(HeaderFlags::MARKED));

    frame.set(0, None);
    assert_eq!(heap.collect(), 1);
    assert!(!heap.is_live(obj));
}

#[test]
fn second_collection_frees_nothing() {
    let heap = Heap::new();
    for _ in 0..10 {
        heap.allocate(40, 1).unwrap();
    }
    assert_eq!(heap.collect(), 10);
    assert_eq!(heap.collect(), 0);
    assert_eq!(heap.stats().collections, 2);
}

#[test]
fn collect_before_init_is_a_no_op() {
    let heap = Heap::new();
    assert_eq!(heap.collect(), 0);
    assert_eq!(heap.stats(), GcStats::default());
    assert!(!heap.is_initialized());
}

#[test]
fn zero_sized_allocation_uses_one_byte() {
    let heap = Heap::new();
    let obj = heap.allocate(0, 3).unwrap();
    assert_eq!(obj.size(), 1);
    assert_eq!(heap.stats().allocated_bytes, 32);
}

#[test]
fn oversized_request_is_rejected() {
    let heap = Heap::new();
    assert_eq!(
        heap.allocate(MAX_PAYLOAD_SIZE + 1, 1).unwrap_err(),
        GcError::ObjectTooLarge(MAX_PAYLOAD_SIZE + 1)
    );
}

#[test]
fn payloads_are_aligned_zeroed_and_disjoint() {
    let heap = heap_with(usize::MAX);
    let mut objects: Vec<_> = (0..64).map(|i| heap.allocate(1 + i * 7, i as u64).unwrap()).collect();

    for obj in &objects {
        assert_eq!(obj.as_ptr() as usize % 16, 0);
        assert!(unsafe { obj.bytes_mut() }.iter().all(|&b| b == 0));
    }

    objects.sort_by_key(|obj| obj.as_ptr() as usize);
    for pair in objects.windows(2) {
        let end = pair[0].as_ptr() as usize + pair[0].size();
        assert!(end + HEADER_SIZE <= pair[1].as_ptr() as usize);
    }
}

#[test]
fn reachable_objects_survive_through_descriptors() {
    let heap = Heap::new();
    heap.register_type(2, TypeDescriptor::with_offsets(vec![0, 8])).unwrap();

    let frame = RootFrame::<1>::new();
    let _scope = heap.enter(&frame).unwrap();

    let parent = heap.allocate(16, 2).unwrap();
    let left = heap.allocate(8, 1).unwrap();
    let right = heap.allocate(8, 1).unwrap();
    heap.allocate(8, 1).unwrap(); // garbage

    parent.write_ref(0, Some(left));
    parent.write_ref(8, Some(right));
    frame.set(0, Some(parent));

    assert_eq!(heap.collect(), 1);
    assert!(heap.is_live(left) && heap.is_live(right));

    parent.write_ref(8, None);
    assert_eq!(heap.collect(), 1);
    assert!(!heap.is_live(right));
    assert_eq!(parent.read_ref(0), left.as_ptr());
}

#[test]
fn last_reference_slot_is_in_bounds() {
    let heap = Heap::new();
    let obj = heap.allocate(16, 1).unwrap();
    let other = heap.allocate(8, 1).unwrap();

    obj.write_ref(8, Some(other));
    assert_eq!(obj.read_ref(8), other.as_ptr());
    assert_eq!(obj.size(), 16);
}

#[test]
#[should_panic(expected = "reference slot out of bounds")]
fn wrapping_write_offset_is_rejected() {
    let heap = Heap::new();
    let obj = heap.allocate(16, 5).unwrap();
    let other = heap.allocate(8, 1).unwrap();
    obj.write_ref(usize::MAX - 7, Some(other));
}

#[test]
#[should_panic(expected = "reference slot out of bounds")]
fn wrapping_read_offset_is_rejected() {
    let heap = Heap::new();
    let obj = heap.allocate(16, 5).unwrap();
    obj.read_ref(usize::MAX - 7);
}

#[test]
#[should_panic(expected = "reference slot out of bounds")]
fn slot_past_payload_is_rejected() {
    let heap = Heap::new();
    let obj = heap.allocate(16, 1).unwrap();
    obj.write_ref(16, None);
}

#[test]
fn untyped_payloads_are_not_traced() {
    let heap = Heap::new();
    let frame = RootFrame::<1>::new();
    let _scope = heap.enter(&frame).unwrap();

    let holder = heap.allocate(8, 99).unwrap();
    let child = heap.allocate(8, 1).unwrap();
    holder.write_ref(0, Some(child));
    frame.set(0, Some(holder));

    assert_eq!(heap.collect(), 1);
    assert!(!heap.is_live(child));
}

#[test]
fn cycles_are_collected() {
    let heap = Heap::new();
    heap.register_type(4, TypeDescriptor::all_references()).unwrap();

    let a = heap.allocate(8, 4).unwrap();
    let b = heap.allocate(8, 4).unwrap();
    a.write_ref(0, Some(b));
    b.write_ref(0, Some(a));

    assert_eq!(heap.collect(), 2);
}

#[test]
fn mark_stack_overflow_rescans_heap() {
    let heap = Heap::with_config(GcConfig {
        mark_stack_capacity: 2,
        ..GcConfig::default()
    });
    heap.register_type(10, TypeDescriptor::all_references()).unwrap();
    heap.register_type(11, TypeDescriptor::with_offsets(vec![0])).unwrap();

    let frame = RootFrame::<1>::new();
    let _scope = heap.enter(&frame).unwrap();

    const FANOUT: usize = 32;
    let hub = heap.allocate(FANOUT * 8, 10).unwrap();
    frame.set(0, Some(hub));

    let mut leaves = Vec::new();
    for i in 0..FANOUT {
        let child = heap.allocate(8, 11).unwrap();
        let leaf = heap.allocate(8, 1).unwrap();
        child.write_ref(0, Some(leaf));
        hub.write_ref(i * 8, Some(child));
        leaves.push(leaf);
    }
    heap.allocate(8, 1).unwrap(); // garbage

    assert_eq!(heap.collect(), 1);
    assert!(leaves.iter().all(|leaf| heap.is_live(*leaf)));
}

#[test]
fn threshold_triggers_collection() {
    let heap = heap_with(64);
    heap.allocate(8, 1).unwrap();
    heap.allocate(8, 1).unwrap();
    assert_eq!(heap.stats().collections, 0);

    // 64 + 32 > 64
    heap.allocate(8, 1).unwrap();
    let stats = heap.stats();
    assert_eq!(stats.collections, 1);
    assert_eq!(stats.object_count, 1);
    assert_eq!(stats.total_freed, 64);
}

#[test]
fn threshold_can_be_adjusted() {
    let heap = Heap::new();
    assert_eq!(heap.threshold(), GcConfig::DEFAULT_THRESHOLD);
    heap.set_threshold(0);
    assert_eq!(heap.threshold(), 0);

    heap.allocate(8, 1).unwrap();
    heap.allocate(8, 1).unwrap();
    assert_eq!(heap.stats().collections, 2);
}

#[test]
fn reclaimed_slot_is_reused_zeroed() {
    let heap = Heap::new();
    let first = heap.allocate(40, 1).unwrap();
    unsafe { first.bytes_mut() }.fill(0xAB);
    let addr = first.as_ptr();

    assert_eq!(heap.collect(), 1);
    assert_eq!(heap.stats().free_slots, 1);

    let second = heap.allocate(40, 2).unwrap();
    assert_eq!(second.as_ptr(), addr);
    assert_eq!(second.type_id(), 2);
    assert!(unsafe { second.bytes_mut() }.iter().all(|&b| b == 0));
    assert_eq!(heap.stats().free_slots, 0);
}

#[test]
fn recycling_can_be_disabled() {
    let heap = Heap::with_config(GcConfig {
        recycle_slots: false,
        ..GcConfig::default()
    });
    let addr = heap.allocate(40, 1).unwrap().as_ptr();
    heap.collect();

    assert_ne!(heap.allocate(40, 1).unwrap().as_ptr(), addr);
    assert_eq!(heap.stats().free_slots, 0);
}

#[test]
fn pinned_objects_survive_without_roots() {
    let heap = Heap::new();
    let obj = heap.allocate(8, 1).unwrap();
    heap.pin(obj).unwrap();
    heap.pin(obj).unwrap();

    assert_eq!(heap.collect(), 0);
    assert!(obj.flags().contains(HeaderFlags::PINNED));

    heap.unpin(obj).unwrap();
    assert_eq!(heap.collect(), 1);
    assert_eq!(heap.pin(obj), Err(GcError::NotAnObject));
}

static FINALIZED: AtomicUsize = AtomicUsize::new(0);

unsafe fn count_finalized(_payload: NonNull<u8>, size: usize) {
    assert_eq!(size, 24);
    FINALIZED.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn finalizer_runs_once() {
    let heap = Heap::new();
    heap.register_type(20, TypeDescriptor::opaque().finalized_by(count_finalized))
        .unwrap();

    let obj = heap.allocate(24, 20).unwrap();
    assert!(obj.flags().contains(HeaderFlags::HAS_FINALIZER));

    assert_eq!(heap.collect(), 1);
    assert_eq!(heap.collect(), 0);
    assert_eq!(FINALIZED.load(Ordering::SeqCst), 1);
}

#[test]
fn heap_grows_by_segments() {
    let heap = Heap::with_config(GcConfig {
        initial_heap_size: 4096,
        max_heap_size: 3 * 4096,
        threshold: usize::MAX,
        ..GcConfig::default()
    });

    // 1008-byte payloads fill 1024-byte slots, four per segment
    for _ in 0..12 {
        heap.allocate(1008, 1).unwrap();
    }
    assert_eq!(heap.segment_count(), 3);
    assert_eq!(heap.heap_size(), 3 * 4096);

    assert!(matches!(heap.allocate(1008, 1), Err(GcError::HeapExhausted { .. })));
}

#[test]
fn large_objects_get_a_dedicated_segment() {
    let heap = Heap::with_config(GcConfig {
        initial_heap_size: 4096,
        ..GcConfig::default()
    });
    let obj = heap.allocate(10_000, 1).unwrap();
    assert_eq!(obj.size(), 10_000);
    assert_eq!(heap.segment_count(), 2);
    assert_eq!(heap.heap_size(), 4096 + slot_size_for(10_000));
}

#[test]
fn fixed_heap_collects_before_failing() {
    let heap = Heap::with_config(GcConfig {
        threshold: 4096,
        ..GcConfig::fixed(4096)
    });

    for _ in 0..16 {
        heap.allocate(1008, 1).unwrap();
    }
    assert_eq!(heap.segment_count(), 1);
    assert!(heap.stats().collections > 0);
}

#[test]
fn fixed_heap_exhaustion_is_an_error() {
    let heap = Heap::with_config(GcConfig::fixed(4096));
    let frame = RootFrame::<4>::new();
    let _scope = heap.enter(&frame).unwrap();

    for i in 0..4 {
        frame.set(i, Some(heap.allocate(1008, 1).unwrap()));
    }
    assert_eq!(
        heap.allocate(1008, 1).unwrap_err(),
        GcError::HeapExhausted {
            requested: 1024,
            heap_size: 4096
        }
    );
}

#[test]
fn failed_mapping_is_reported() {
    let heap = Heap::with_provider(GcConfig::default(), NoMemory);
    assert!(matches!(heap.init(), Err(GcError::MapFailed { .. })));
    assert!(matches!(heap.allocate(8, 1), Err(GcError::MapFailed { .. })));
    assert_eq!(heap.collect(), 0);
}

#[test]
fn foreign_pointers_in_roots_are_ignored() {
    let heap = Heap::new();
    let mut arena = Arena::with_config(256, ArenaConfig::fixed()).unwrap();
    let in_arena = arena.alloc_object(1, 8).unwrap();
    let mut local = 0u64;

    let frame = RootFrame::<4>::new();
    let _scope = heap.enter(&frame).unwrap();
    let obj = heap.allocate(8, 1).unwrap();
    frame.set_raw(0, in_arena.as_ptr());
    frame.set_raw(1, (&mut local as *mut u64).cast());
    frame.set_raw(2, unsafe { obj.as_ptr().add(8) }); // interior
    frame.set_raw(3, 0x10 as *mut u8);

    assert_eq!(heap.collect(), 1);
    assert!(heap.lookup(in_arena.as_ptr()).is_none());
    assert!(heap.lookup(core::ptr::null()).is_none());
}

#[test]
fn interior_pointers_are_not_objects() {
    let heap = heap_with(usize::MAX);
    let frame = RootFrame::<4>::new();
    let _scope = heap.enter(&frame).unwrap();

    let obj = heap.allocate(64, 1).unwrap();
    let unrooted = heap.allocate(64, 1).unwrap();
    for target in [obj, unrooted] {
        // flag bytes of would-be headers at +16 and +32
        let bytes = unsafe { target.bytes_mut() };
        bytes[8] = HeaderFlags::GC_MANAGED.bits();
        bytes[24] = HeaderFlags::GC_MANAGED.bits();
    }

    let interior = [unsafe { obj.as_ptr().add(16) }, unsafe { obj.as_ptr().add(32) }];
    frame.set(0, Some(obj));
    frame.set_raw(1, interior[0]);
    frame.set_raw(2, interior[1]);
    frame.set_raw(3, unsafe { unrooted.as_ptr().add(16) });

    for ptr in interior {
        assert!(heap.lookup(ptr).is_none());
    }

    assert_eq!(heap.collect(), 1);
    assert!(heap.is_live(obj));
    assert!(!heap.is_live(unrooted));

    let bytes = unsafe { obj.bytes_mut() };
    assert_eq!(bytes[8], HeaderFlags::GC_MANAGED.bits());
    assert_eq!(bytes[24], HeaderFlags::GC_MANAGED.bits());
}

#[test]
fn lookup_finds_live_objects() {
    let heap = Heap::new();
    let obj = heap.allocate(8, 5).unwrap();
    assert_eq!(heap.lookup(obj.as_ptr()), Some(obj));

    heap.collect();
    assert_eq!(heap.lookup(obj.as_ptr()), None);
}

#[test]
fn raw_frames_follow_the_protocol() {
    let heap = Heap::new();
    let obj = heap.allocate(8, 1).unwrap();

    let mut words = [1usize, obj.as_ptr() as usize, 0];
    let frame = unsafe { RawFrame::from_ptr(words.as_mut_ptr()) }.unwrap();
    unsafe { heap.register_frame(frame) }.unwrap();
    assert_eq!(
        unsafe { heap.register_frame(frame) },
        Err(GcError::FrameAlreadyRegistered)
    );
    assert_eq!(heap.collect(), 0);

    unsafe { heap.unregister_frame(frame) }.unwrap();
    assert_eq!(heap.collect(), 1);
}

#[test]
fn frame_misuse_is_reported() {
    let heap = Heap::new();
    let mut words = [0usize, 0];
    let frame = unsafe { RawFrame::from_ptr(words.as_mut_ptr()) }.unwrap();
    assert_eq!(
        unsafe { heap.unregister_frame(frame) },
        Err(GcError::FrameNotRegistered)
    );

    let typed = RootFrame::<1>::new();
    let _scope = heap.enter(&typed).unwrap();
    assert!(matches!(heap.enter(&typed), Err(GcError::FrameAlreadyRegistered)));
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn scope_over_unregistered_frame_logs_on_drop() {
    let captured = Captured::default();
    let sink = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || sink.clone())
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let heap = Heap::new();
        let frame = RootFrame::<1>::new();
        let scope = heap.enter(&frame).unwrap();

        unsafe { heap.unregister_frame(scope.frame()) }.unwrap();
        assert!(heap.roots().is_empty());
        drop(scope);

        assert!(!frame.is_registered());
        assert!(heap.roots().is_empty());
    });

    let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("frame_scope_drop"), "{logs}");
    assert!(logs.contains("Root frame is not registered"), "{logs}");
}

#[test]
fn nested_scopes_unwind_in_order() {
    let heap = Heap::new();
    let outer = RootFrame::<1>::new();
    let outer_scope = heap.enter(&outer).unwrap();
    let kept = heap.allocate(8, 1).unwrap();
    outer.set(0, Some(kept));

    {
        let inner = RootFrame::<1>::new();
        let _inner_scope = heap.enter(&inner).unwrap();
        inner.set(0, Some(heap.allocate(8, 1).unwrap()));
        assert_eq!(heap.roots().len(), 2);
        assert_eq!(heap.collect(), 0);
    }

    assert_eq!(heap.roots().len(), 1);
    assert_eq!(heap.collect(), 1);
    drop(outer_scope);
    assert!(!outer.is_registered());
    assert!(heap.roots().is_empty());
}

#[test]
fn duplicate_type_registration_fails() {
    let heap = Heap::new();
    heap.register_type(1, TypeDescriptor::opaque()).unwrap();
    assert_eq!(
        heap.register_type(1, TypeDescriptor::all_references()),
        Err(GcError::TypeAlreadyRegistered(1))
    );
}

#[test]
fn heaps_are_independent() {
    let a = Heap::new();
    let b = Heap::new();
    let obj = a.allocate(8, 1).unwrap();

    assert!(b.lookup(obj.as_ptr()).is_none());
    assert_eq!(b.collect(), 0);
    assert_eq!(a.stats().object_count, 1);
}

#[test]
fn stats_array_order() {
    let heap = Heap::new();
    heap.allocate(8, 1).unwrap();
    heap.allocate(8, 1).unwrap();
    heap.collect();
    heap.allocate(8, 1).unwrap();

    let stats = heap.stats();
    assert_eq!(stats.to_array(), [32, 1, 1, 64, 96]);
}
