//! Integration tests for `object_allocator`, exercising the public API end to end.

#![allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]

use std::collections::HashSet;
use std::ptr::NonNull;

use new_zealand::nz;
use object_allocator::{
    ALIGN_PATTERN, DropPolicy, Error, GuardSide, ObjectAllocator, PAD_PATTERN,
};

fn debug_allocator(pad_bytes: usize, header_bytes: usize) -> ObjectAllocator {
    ObjectAllocator::builder()
        .object_size(16)
        .objects_per_page(nz!(4))
        .max_pages(0)
        .debug(true)
        .pad_bytes(pad_bytes)
        .header_bytes(header_bytes)
        .build()
        .unwrap()
}

#[test]
fn allocation_beyond_capacity_fails() {
    for (max_pages, objects_per_page) in [(1, nz!(1)), (3, nz!(4)), (2, nz!(7))] {
        let mut allocator = ObjectAllocator::builder()
            .object_size(8)
            .objects_per_page(objects_per_page)
            .max_pages(max_pages)
            .build()
            .unwrap();

        for _ in 0..max_pages * objects_per_page.get() {
            allocator.allocate().unwrap();
        }

        assert_eq!(
            allocator.allocate(),
            Err(Error::PageLimitReached { max_pages })
        );
        assert_eq!(allocator.stats().pages_in_use(), max_pages);
        assert_eq!(allocator.stats().free_objects(), 0);
    }
}

#[test]
fn released_blocks_make_room_at_page_limit() {
    let mut allocator = ObjectAllocator::builder()
        .object_size(8)
        .objects_per_page(nz!(2))
        .max_pages(1)
        .build()
        .unwrap();

    let a = allocator.allocate().unwrap();
    _ = allocator.allocate().unwrap();
    assert!(allocator.allocate().is_err());

    unsafe { allocator.release(a) }.unwrap();
    assert_eq!(allocator.allocate(), Ok(a));
}

#[test]
fn counters_are_conserved() {
    let mut allocator = ObjectAllocator::builder()
        .object_size(8)
        .objects_per_page(nz!(3))
        .max_pages(0)
        .build()
        .unwrap();

    let mut held = Vec::new();
    let mut allocations = 0;
    let mut releases = 0;

    // An irregular mix of allocations and releases.
    for round in 0..20 {
        for _ in 0..(round % 4) + 1 {
            held.push(allocator.allocate().unwrap());
            allocations += 1;
        }

        if round % 3 == 0 {
            // Release the older half of the blocks currently held.
            let keep = held.split_off(held.len() / 2);
            for block in held.drain(..) {
                unsafe { allocator.release(block) }.unwrap();
                releases += 1;
            }
            held = keep;
        }
    }

    let stats = allocator.stats();
    let total_blocks = stats.pages_in_use() * 3;

    assert_eq!(stats.allocations(), allocations);
    assert_eq!(stats.deallocations(), releases);
    assert_eq!(stats.objects_in_use(), allocations - releases);
    assert_eq!(stats.free_objects(), total_blocks - (allocations - releases));
    assert!(stats.most_objects() >= stats.objects_in_use());
}

#[test]
fn double_release_is_detected() {
    for header_bytes in [0, 1, 4] {
        let mut allocator = debug_allocator(2, header_bytes);

        let block = allocator.allocate().unwrap();
        let address = block.addr().get();

        unsafe { allocator.release(block) }.unwrap();
        assert_eq!(
            unsafe { allocator.release(block) },
            Err(Error::MultipleFree { address })
        );

        assert_eq!(allocator.stats().deallocations(), 1);
    }
}

#[test]
fn release_off_block_boundary_is_detected() {
    let mut allocator = debug_allocator(2, 1);

    let block = allocator.allocate().unwrap();
    let inside = unsafe { block.add(1) };

    assert_eq!(
        unsafe { allocator.release(inside) },
        Err(Error::BadBoundary {
            address: inside.addr().get()
        })
    );

    // The block itself is unaffected.
    unsafe { allocator.release(block) }.unwrap();
}

#[test]
fn release_of_foreign_pointer_is_detected() {
    let mut allocator = debug_allocator(2, 1);
    _ = allocator.allocate().unwrap();

    let foreign = Box::into_raw(Box::new(0_u128));
    let ptr = NonNull::new(foreign.cast::<u8>()).unwrap();

    assert_eq!(
        unsafe { allocator.release(ptr) },
        Err(Error::BadAddress {
            address: ptr.addr().get()
        })
    );

    drop(unsafe { Box::from_raw(foreign) });
}

#[test]
fn guard_overwrite_is_detected_by_scan_and_release() {
    for side in [GuardSide::Before, GuardSide::After] {
        let mut allocator = debug_allocator(3, 1);

        let block = allocator.allocate().unwrap();
        let healthy = allocator.allocate().unwrap();

        let guard_byte = match side {
            GuardSide::Before => unsafe { block.sub(2) },
            GuardSide::After => unsafe { block.add(16 + 2) },
            _ => unreachable!(),
        };
        unsafe { guard_byte.write(0x42) };

        let mut corrupted = Vec::new();
        assert_eq!(
            allocator.scan_all_pages(|ptr, size| corrupted.push((ptr, size))),
            1
        );
        assert_eq!(corrupted, vec![(block, 16)]);

        assert_eq!(
            unsafe { allocator.release(block) },
            Err(Error::CorruptedBlock {
                address: block.addr().get(),
                side
            })
        );

        unsafe { allocator.release(healthy) }.unwrap();
    }
}

#[test]
fn release_without_debug_mode_skips_validation() {
    let mut allocator = ObjectAllocator::builder()
        .object_size(16)
        .pad_bytes(2)
        .header_bytes(1)
        .build()
        .unwrap();

    let block = allocator.allocate().unwrap();
    unsafe { block.add(16).write(0) };

    // The damaged guard goes unnoticed and the block is taken back as usual.
    assert_eq!(unsafe { allocator.release(block) }, Ok(()));
    assert_eq!(allocator.free_list_head(), Some(block));

    let stats = allocator.stats();
    assert_eq!(stats.objects_in_use(), 0);
    assert_eq!(stats.deallocations(), 1);
    assert_eq!(stats.free_objects(), 4);

    // The damage is still there for a scan to find.
    let mut corrupted = Vec::new();
    assert_eq!(allocator.scan_all_pages(|ptr, _| corrupted.push(ptr)), 1);
    assert_eq!(corrupted, vec![block]);
}

#[test]
fn oversized_objects_are_out_of_memory_rather_than_panics() {
    let pooled = ObjectAllocator::builder().object_size(1 << 62).build();
    assert!(matches!(pooled, Err(Error::OutOfMemory { .. })));

    let mut pass_through = ObjectAllocator::builder()
        .object_size(1 << 62)
        .pass_through(true)
        .build()
        .unwrap();
    assert_eq!(
        pass_through.allocate(),
        Err(Error::OutOfMemory { size: 1 << 62 })
    );
}

#[test]
fn scan_finds_corruption_of_free_blocks() {
    let allocator = debug_allocator(1, 0);

    // The next block to be allocated is free and untouched.
    let free_block = allocator.free_list_head().unwrap();
    unsafe { free_block.add(16).write(0) };

    assert_eq!(allocator.scan_all_pages(|_, _| {}), 1);
}

#[test]
fn scan_without_guard_bytes_finds_nothing() {
    let mut allocator = debug_allocator(0, 0);
    let block = allocator.allocate().unwrap();

    unsafe { block.cast::<[u8; 16]>().write_unaligned([0; 16]) };

    assert_eq!(allocator.scan_all_pages(|_, _| {}), 0);
}

#[test]
fn released_block_is_reused_first() {
    let mut allocator = ObjectAllocator::builder().object_size(32).build().unwrap();

    let _keep = allocator.allocate().unwrap();
    let block = allocator.allocate().unwrap();

    unsafe { allocator.release(block) }.unwrap();
    assert_eq!(allocator.free_list_head(), Some(block));
    assert_eq!(allocator.allocate().unwrap(), block);
}

#[test]
fn dump_visits_exactly_the_blocks_in_use() {
    let mut allocator = ObjectAllocator::builder()
        .object_size(16)
        .objects_per_page(nz!(2))
        .max_pages(0)
        .build()
        .unwrap();

    let blocks = (0..5)
        .map(|_| allocator.allocate().unwrap())
        .collect::<Vec<_>>();

    unsafe { allocator.release(blocks[1]) }.unwrap();
    unsafe { allocator.release(blocks[3]) }.unwrap();

    let mut visited = HashSet::new();
    let count = allocator.dump_in_use(|ptr, size| {
        assert_eq!(size, 16);
        assert!(visited.insert(ptr), "block visited twice");
    });

    assert_eq!(count, 3);
    assert_eq!(
        visited,
        HashSet::from([blocks[0], blocks[2], blocks[4]])
    );
}

#[test]
fn pass_through_tracks_counts_without_pages() {
    let mut allocator = ObjectAllocator::builder()
        .object_size(48)
        .objects_per_page(nz!(2))
        .max_pages(1)
        .debug(true)
        .pad_bytes(4)
        .pass_through(true)
        .build()
        .unwrap();

    // The page limit does not apply, as no pages are ever created.
    let blocks = (0..5)
        .map(|_| allocator.allocate().unwrap())
        .collect::<Vec<_>>();

    let stats = allocator.stats();
    assert_eq!(stats.pages_in_use(), 0);
    assert_eq!(stats.free_objects(), 0);
    assert_eq!(stats.objects_in_use(), 5);
    assert_eq!(stats.allocations(), 5);
    assert!(allocator.page_list_head().is_none());
    assert!(allocator.free_list_head().is_none());

    for block in blocks {
        unsafe { block.cast::<[u8; 48]>().write_unaligned([7; 48]) };
        unsafe { allocator.release(block) }.unwrap();
    }

    let stats = allocator.stats();
    assert_eq!(stats.objects_in_use(), 0);
    assert_eq!(stats.free_objects(), 0);
    assert_eq!(stats.deallocations(), 5);
    assert_eq!(stats.most_objects(), 5);
    assert_eq!(allocator.scan_all_pages(|_, _| {}), 0);
}

#[test]
fn page_bytes_follow_layout() {
    let allocator = ObjectAllocator::builder()
        .object_size(8)
        .objects_per_page(nz!(2))
        .pad_bytes(2)
        .header_bytes(1)
        .alignment(3)
        .build()
        .unwrap();

    let link_size = size_of::<usize>();
    let stride = 8 + 2 * 2 + 1 + 3;
    assert_eq!(allocator.stats().page_size(), link_size + 2 * stride);

    let page = allocator.page_list_head().unwrap();
    let read = |offset: usize| unsafe { page.add(offset).read() };

    // Only one page, so the link field is null.
    assert_eq!(unsafe { page.cast::<usize>().read_unaligned() }, 0);

    let mut offset = link_size;
    for block in 0..2 {
        if block == 0 {
            for _ in 0..3 {
                assert_eq!(read(offset), ALIGN_PATTERN);
                offset += 1;
            }
        }

        assert_eq!(read(offset), 0, "usage header of block {block}");
        offset += 1;

        for _ in 0..2 {
            assert_eq!(read(offset), PAD_PATTERN);
            offset += 1;
        }

        offset += 8;

        for _ in 0..2 {
            assert_eq!(read(offset), PAD_PATTERN);
            offset += 1;
        }

        if block == 0 {
            for _ in 0..3 {
                assert_eq!(read(offset), ALIGN_PATTERN);
                offset += 1;
            }
        }
    }

    assert_eq!(offset, allocator.stats().page_size());
}

#[test]
#[should_panic]
fn strict_drop_policy_detects_leaks() {
    let mut allocator = ObjectAllocator::builder()
        .object_size(8)
        .drop_policy(DropPolicy::MustNotDropBlocks)
        .build()
        .unwrap();

    _ = allocator.allocate().unwrap();
}

#[test]
fn error_messages_describe_the_problem() {
    let error = Error::CorruptedBlock {
        address: 0x1000,
        side: GuardSide::After,
    };
    assert!(error.to_string().contains("after"));
    assert!(error.to_string().contains("0x1000"));

    let error = Error::PageLimitReached { max_pages: 3 };
    assert!(error.to_string().contains('3'));
}
