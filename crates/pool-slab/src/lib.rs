//! Pool and slab allocators over memory acquired in bulk.
//!
//! Both allocators obtain whole regions from a
//! [`MemoryProvider`](memory_provider::MemoryProvider), carve them up
//! themselves, and zero them through a
//! [`BulkFill`](memory_provider::BulkFill) on `reset`. Every allocation is
//! preceded by a [`HEADER_SIZE`]-byte header that doubles as the free-list
//! node once the allocation is returned.
//!
//! # Available Allocators
//!
//! ## [`PoolAllocator`]
//!
//! Variable-sized allocations with any power-of-two alignment. Best suited
//! for:
//!
//! - Arenas whose allocation sizes are not known in advance
//! - Workloads that free in roughly allocation order, which keeps the free
//!   list short through coalescing
//!
//! **Performance**: O(n) allocation in the number of free entries before
//! falling back to bump allocation; O(n log n) free because of the
//! coalescing pass.
//!
//! ## [`SlabAllocator`]
//!
//! Objects of one fixed size, handed out in LIFO order.
//!
//! **Performance**: O(1) allocation and free.
//!
//! # Usage
//!
//! ```rust
//! use pool_slab::{PoolAllocator, SlabAllocator};
//!
//! let pool = PoolAllocator::init(64 * 1024)?;
//! let a = pool.alloc(100, 16)?;
//! let b = pool.alloc(4000, 64)?;
//! unsafe {
//!     pool.free(a.as_ptr())?;
//!     pool.free(b.as_ptr())?;
//! }
//! assert_eq!(pool.stats()?.live_allocations, 0);
//!
//! let slab = SlabAllocator::init(128, 48)?;
//! let obj = slab.alloc()?;
//! unsafe { slab.free(obj.as_ptr())? };
//! # Ok::<(), pool_slab::AllocError>(())
//! ```
//!
//! # Thread Safety
//!
//! Both allocators are `Sync` when their collaborators are and take `&self`
//! everywhere. The slab serializes every call on one lock. The pool holds a
//! coarse lock for the whole call and a bounded lock around its free list;
//! a call that cannot get the latter fails with
//! [`AllocError::LockTimeout`] instead of hanging.
//!
//! | Allocator | Allocation | Free | Overhead |
//! |-----------|------------|------|----------|
//! | `PoolAllocator` | O(n) | O(n log n) | 32-byte header + alignment gap |
//! | `SlabAllocator` | O(1) | O(1) | 32-byte header, size rounded to 16 |

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

mod error;
mod header;
mod pool;
mod slab;
mod state;
mod sync;

pub use self::{
    error::{AllocError, Misuse},
    header::HEADER_SIZE,
    pool::{FREE_LIST_SPIN_LIMIT, FreeEntry, MIN_SPLIT_THRESHOLD, PoolAllocator, PoolStats},
    slab::{SLOT_ALIGN, SlabAllocator, SlabStats},
    state::State,
};
