//! Bulk memory acquisition and fill primitives for the pool and slab
//! allocators.
//!
//! The allocators in `pool-slab` never talk to the system directly. They
//! reserve whole regions through a [`MemoryProvider`] and clear them through a
//! [`BulkFill`], and everything they hand out is an offset inside one of those
//! regions.
//!
//! # Collaborators
//!
//! | Item | Role |
//! |------|------|
//! | [`SystemProvider`] | Page-aligned, zero-filled regions from the global allocator |
//! | [`BudgetProvider`] | Wraps another provider and caps the bytes it may hand out |
//! | [`WideFill`] | Byte fill using 16-byte lane stores |
//!
//! # Example
//!
//! ```rust
//! use memory_provider::{BulkFill as _, MemoryProvider as _, SystemProvider, WideFill};
//!
//! let provider = SystemProvider::new();
//! let mut region = provider.reserve(10_000).unwrap();
//! assert!(region.len() >= 10_000);
//! assert_eq!(region.addr() % memory_provider::PAGE_SIZE, 0);
//!
//! unsafe {
//!     WideFill.fill(region.bytes_mut(3..1003), 0xa5);
//!     provider.release(region);
//! }
//! ```

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

mod align;
mod budget;
mod error;
mod fill;
mod provider;
mod region;

pub use self::{
    align::{Align, PAGE_SIZE},
    budget::BudgetProvider,
    error::{BudgetExceededSnafu, ExhaustedSnafu, LayoutSnafu, ReserveError, ZeroSizeSnafu},
    fill::{BulkFill, WideFill},
    provider::{MemoryProvider, SystemProvider},
    region::Region,
};
