use manv_runtime::allocator::align_up;
use manv_runtime::{Arena, ArenaConfig, GcConfig, Heap, RootFrame, TypeDescriptor};
use proptest::prelude::*;

fn request() -> impl Strategy<Value = (usize, usize)> {
    (0usize..200, prop::sample::select(vec![1usize, 2, 4, 8, 16, 32, 64]))
}

proptest! {
    #[test]
    fn arena_allocations_are_aligned_disjoint_and_in_bounds(requests in prop::collection::vec(request(), 1..64)) {
        let mut arena = Arena::with_config(4096, ArenaConfig::fixed()).unwrap();
        let base = arena.base().as_ptr() as usize;
        let capacity = arena.capacity();
        let mut spans: Vec<(usize, usize)> = Vec::new();

        for (size, align) in requests {
            let before = arena.offset();
            match arena.allocate_aligned(size, align) {
                Ok(ptr) => {
                    let addr = ptr.as_ptr() as usize;
                    let len = size.max(1);
                    prop_assert_eq!(addr % align, 0);
                    prop_assert!(addr >= base && addr + len <= base + capacity);
                    spans.push((addr, addr + len));
                }
                Err(_) => {
                    prop_assert_eq!(arena.offset(), before);
                    prop_assert!(align_up(base + before, align) + size.max(1) > base + capacity);
                }
            }
            prop_assert_eq!(arena.available(), arena.capacity() - arena.offset());
        }

        spans.sort_unstable();
        for pair in spans.windows(2) {
            prop_assert!(pair[0].1 <= pair[1].0);
        }
    }

    #[test]
    fn reset_replays_address_sequence(sizes in prop::collection::vec(0usize..300, 1..40)) {
        let mut arena = Arena::with_config(1024, ArenaConfig { warn_on_growth: false, ..ArenaConfig::default() }).unwrap();
        let first: Vec<_> = sizes.iter().map(|&size| arena.allocate(size).unwrap()).collect();
        let stats = arena.stats();

        arena.reset();
        let second: Vec<_> = sizes.iter().map(|&size| arena.allocate(size).unwrap()).collect();

        prop_assert_eq!(first, second);
        prop_assert_eq!(arena.stats(), stats);
    }

    #[test]
    fn rooted_objects_survive_and_others_are_reclaimed(keep in prop::collection::vec(any::<bool>(), 1..48)) {
        let heap = Heap::with_config(GcConfig { threshold: usize::MAX, ..GcConfig::default() });
        heap.register_type(1, TypeDescriptor::opaque()).unwrap();

        let frame = RootFrame::<48>::new();
        let _scope = heap.enter(&frame).unwrap();

        let objects: Vec<_> = keep.iter().map(|_| heap.allocate(24, 1).unwrap()).collect();
        for (slot, (obj, &kept)) in objects.iter().zip(&keep).enumerate() {
            if kept {
                frame.set(slot, Some(*obj));
            }
        }

        let garbage = keep.iter().filter(|&&kept| !kept).count();
        prop_assert_eq!(heap.collect(), garbage);
        prop_assert_eq!(heap.collect(), 0);
        for (obj, &kept) in objects.iter().zip(&keep) {
            prop_assert_eq!(heap.is_live(*obj), kept);
        }
        prop_assert_eq!(heap.stats().object_count, keep.len() - garbage);
    }
}
