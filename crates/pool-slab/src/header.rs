//! Metadata record shared by both allocators.
//!
//! Every allocation is preceded by [`HEADER_SIZE`] bytes of metadata. While
//! the allocation is live the record describes it; once it is freed the same
//! bytes become a free-list node. Only the owner changes, not the shape.
//!
//! ```text
//! ┌──────────────────────────────── HEADER_SIZE ───────────────────────────┐
//! │ size: usize │ padding: usize │ next_block: usize │ next_offset: usize  │ payload ...
//! └────────────────────────────────────────────────────────────────────────┘
//!                                                                           ^ user pointer
//! ```
//!
//! Links are stored as a [`Cursor`] (block index + offset), never as a raw
//! address, so the free list stays valid no matter where the provider put a
//! region.

use core::ptr;

use memory_provider::Region;

/// Size of the record in front of every allocation.
pub const HEADER_SIZE: usize = 32;
const _: () = assert!(size_of::<Header>() <= HEADER_SIZE);
const _: () = assert!(HEADER_SIZE.is_multiple_of(16));

const NIL: usize = usize::MAX;

/// Position of a header: which block, and the byte offset inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Cursor {
    pub(crate) block: usize,
    pub(crate) offset: usize,
}

impl Cursor {
    pub(crate) const fn new(block: usize, offset: usize) -> Self {
        Self { block, offset }
    }

    /// Offset of the first payload byte.
    pub(crate) const fn user_offset(self) -> usize {
        self.offset + HEADER_SIZE
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    /// Payload bytes owned by this record.
    pub(crate) size: usize,
    /// Alignment gap left in front of the record when it was placed.
    pub(crate) padding: usize,
    next_block: usize,
    next_offset: usize,
}

impl Header {
    pub(crate) const fn new(size: usize, padding: usize) -> Self {
        Self {
            size,
            padding,
            next_block: NIL,
            next_offset: NIL,
        }
    }

    pub(crate) const fn next(&self) -> Option<Cursor> {
        if self.next_block == NIL {
            None
        } else {
            Some(Cursor::new(self.next_block, self.next_offset))
        }
    }

    pub(crate) const fn with_next(mut self, next: Option<Cursor>) -> Self {
        match next {
            Some(cursor) => {
                self.next_block = cursor.block;
                self.next_offset = cursor.offset;
            }
            None => {
                self.next_block = NIL;
                self.next_offset = NIL;
            }
        }
        self
    }

    /// Offset one past the last payload byte, for a header stored at `offset`.
    pub(crate) const fn end(&self, offset: usize) -> usize {
        offset + HEADER_SIZE + self.size
    }

    /// Reads the record stored at `offset` in `region`.
    ///
    /// Headers of allocations with small alignment need not be aligned, so
    /// the access is unaligned.
    ///
    /// # Panics
    ///
    /// Panics if the record would extend past the end of the region.
    pub(crate) fn read(region: &Region, offset: usize) -> Self {
        assert!(
            offset
                .checked_add(HEADER_SIZE)
                .is_some_and(|end| end <= region.len()),
            "header at {offset:#x} is outside the region"
        );
        let src = region.ptr_at(offset).cast::<Self>();
        unsafe { ptr::read_unaligned(src.as_ptr()) }
    }

    /// Writes the record at `offset` in `region`.
    ///
    /// # Panics
    ///
    /// Panics if the record would extend past the end of the region.
    pub(crate) fn write(self, region: &Region, offset: usize) {
        assert!(
            offset
                .checked_add(HEADER_SIZE)
                .is_some_and(|end| end <= region.len()),
            "header at {offset:#x} is outside the region"
        );
        let dst = region.ptr_at(offset).cast::<Self>();
        unsafe { ptr::write_unaligned(dst.as_ptr(), self) }
    }
}
