//! Demonstrates the debugging aids of `ObjectAllocator`: guard bytes, usage headers, byte
//! patterns and release validation.
//!
//! Run with `RUST_LOG=object_allocator=trace` to see every allocator event.

use new_zealand::nz;
use object_allocator::{Error, ObjectAllocator};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::DEBUG.into()),
        )
        .init();

    println!("=== ObjectAllocator Debugging Example ===");
    println!();

    let mut allocator = ObjectAllocator::builder()
        .object_size(24)
        .objects_per_page(nz!(4))
        .max_pages(2)
        .debug(true)
        .pad_bytes(4)
        .header_bytes(1)
        .alignment(2)
        .build()
        .expect("the first page fits in memory");

    let stats = allocator.stats();
    println!("Object size: {} bytes", stats.object_size());
    println!("Page size: {} bytes", stats.page_size());
    println!("Free blocks: {}", stats.free_objects());
    println!();

    // Fill both pages.
    let blocks = (0..8)
        .map(|_| allocator.allocate().expect("two pages hold eight blocks"))
        .collect::<Vec<_>>();

    println!("Allocated {} blocks", blocks.len());

    match allocator.allocate() {
        Err(Error::PageLimitReached { max_pages }) => {
            println!("Ninth allocation refused: page limit of {max_pages} reached");
        }
        other => println!("Unexpected result: {other:?}"),
    }
    println!();

    // Release every other block.
    for block in blocks.iter().step_by(2) {
        // SAFETY: The block came from this allocator and is released only once.
        unsafe { allocator.release(*block) }.expect("block is valid");
    }

    println!("Blocks still in use:");
    let in_use = allocator.dump_in_use(|ptr, size| {
        println!("  {:#x} ({size} bytes)", ptr.addr().get());
    });
    println!("Total: {in_use}");
    println!();

    // Releasing a block twice is caught in debug mode.
    let first = blocks.first().copied().expect("eight blocks were allocated");

    // SAFETY: Debug mode validates the release before touching any memory.
    match unsafe { allocator.release(first) } {
        Err(error) => println!("Second release rejected: {error}"),
        Ok(()) => println!("Second release unexpectedly accepted"),
    }

    // Overrun a block by one byte.
    let victim = blocks.get(1).copied().expect("eight blocks were allocated");

    // SAFETY: The guard bytes after the payload belong to the allocator's page.
    unsafe { victim.add(24).write(0) };

    let corrupted = allocator.scan_all_pages(|ptr, _| {
        println!("Corrupted block at {:#x}", ptr.addr().get());
    });
    println!("Corrupted blocks found: {corrupted}");

    // SAFETY: Debug mode validates the release before touching any memory.
    match unsafe { allocator.release(victim) } {
        Err(error) => println!("Release of corrupted block rejected: {error}"),
        Ok(()) => println!("Release of corrupted block unexpectedly accepted"),
    }
    println!();

    let stats = allocator.stats();
    println!("Final statistics:");
    println!("  Pages in use: {}", stats.pages_in_use());
    println!("  Objects in use: {}", stats.objects_in_use());
    println!("  Most objects in use: {}", stats.most_objects());
    println!("  Allocations: {}", stats.allocations());
    println!("  Deallocations: {}", stats.deallocations());
}
