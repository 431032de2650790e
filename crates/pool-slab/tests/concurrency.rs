#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]
#![cfg(test)]

use std::{slice, thread};

use pool_slab::{PoolAllocator, SlabAllocator};

const THREADS: usize = 8;
const ROUNDS: usize = 2_000;

/// Each thread stamps its allocations with its own byte, so two threads
/// receiving overlapping memory shows up as a corrupted stamp.
fn stamp(thread: usize) -> u8 {
    u8::try_from(thread).unwrap() + 1
}

fn check_stamp(ptr: *const u8, size: usize, stamp: u8) {
    let bytes = unsafe { slice::from_raw_parts(ptr, size) };
    assert!(bytes.iter().all(|&b| b == stamp));
}

#[test]
fn pool_survives_concurrent_alloc_free() {
    let pool = PoolAllocator::init(16 * 1024).unwrap();

    thread::scope(|s| {
        for t in 0..THREADS {
            let pool = &pool;
            s.spawn(move || {
                let mut live = Vec::new();
                for round in 0..ROUNDS {
                    let size = 8 + (round * 37 + t * 11) % 500;
                    let align = 1 << (round % 7);
                    let ptr = pool.alloc(size, align).unwrap();
                    assert_eq!(ptr.as_ptr().addr() % align, 0);
                    unsafe { ptr.write_bytes(stamp(t), size) };
                    live.push((ptr, size));

                    if round % 3 == 2 {
                        let (ptr, size) = live.swap_remove(round % live.len());
                        check_stamp(ptr.as_ptr(), size, stamp(t));
                        unsafe { pool.free(ptr.as_ptr()).unwrap() };
                    }
                }
                for (ptr, size) in live {
                    check_stamp(ptr.as_ptr(), size, stamp(t));
                    unsafe { pool.free(ptr.as_ptr()).unwrap() };
                }
            });
        }
    });

    let stats = pool.stats().unwrap();
    assert_eq!(stats.live_allocations, 0);
    assert_eq!(stats.live_bytes, 0);
    assert_eq!(stats.padding_bytes, 0);
    assert_eq!(
        stats.capacity,
        stats.free_bytes + stats.header_bytes + stats.unused_bytes
    );
    // every block's used prefix has coalesced back into one entry
    assert!(stats.free_entries <= stats.blocks);
}

#[test]
fn slab_hands_out_each_slot_once() {
    const TOTAL: usize = THREADS * 16;
    let slab = SlabAllocator::init(TOTAL, 24).unwrap();

    thread::scope(|s| {
        for t in 0..THREADS {
            let slab = &slab;
            s.spawn(move || {
                for _ in 0..ROUNDS {
                    let objects = (0..16)
                        .map(|_| slab.alloc().unwrap())
                        .collect::<Vec<_>>();
                    for ptr in &objects {
                        unsafe { ptr.write_bytes(stamp(t), slab.object_size()) };
                    }
                    for ptr in objects {
                        check_stamp(ptr.as_ptr(), slab.object_size(), stamp(t));
                        unsafe { slab.free(ptr.as_ptr()).unwrap() };
                    }
                }
            });
        }
    });

    let stats = slab.stats().unwrap();
    assert_eq!(stats.live, 0);
    assert_eq!(stats.free, TOTAL);
}

#[test]
fn slab_exhaustion_under_contention() {
    const TOTAL: usize = 64;
    let slab = SlabAllocator::init(TOTAL, 16).unwrap();

    let granted = thread::scope(|s| {
        let handles = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    let mut mine = Vec::new();
                    while let Ok(ptr) = slab.alloc() {
                        mine.push(ptr);
                    }
                    mine.len()
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .sum::<usize>()
    });

    assert_eq!(granted, TOTAL);
    assert!(slab.alloc().unwrap_err().is_exhausted_pool());
    slab.reset().unwrap();
    assert_eq!(slab.stats().unwrap().free, TOTAL);
}
