use core::ptr::NonNull;

use memory_provider::{Align as _, BulkFill, Region};

use crate::header::{HEADER_SIZE, Header};

/// A header placed by bump allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Bumped {
    pub(super) offset: usize,
    pub(super) header: Header,
}

/// One region acquired from the provider, bump allocated from the front.
#[derive(Debug)]
pub(super) struct Block {
    region: Region,
    capacity: usize,
    bump: usize,
}

impl Block {
    /// Wraps a freshly reserved region.
    ///
    /// # Panics
    ///
    /// Panics if the region is smaller than `capacity` or not page aligned.
    pub(super) fn new(region: Region, capacity: usize) -> Self {
        assert!(capacity <= region.len());
        assert!(region.addr().is_page_aligned());
        Self {
            region,
            capacity,
            bump: 0,
        }
    }

    pub(super) const fn region(&self) -> &Region {
        &self.region
    }

    pub(super) const fn capacity(&self) -> usize {
        self.capacity
    }

    pub(super) const fn bump(&self) -> usize {
        self.bump
    }

    /// Bytes never handed out since the block was acquired or last reset.
    pub(super) const fn unused(&self) -> usize {
        self.capacity - self.bump
    }

    pub(super) fn into_region(self) -> Region {
        self.region
    }

    /// Address of the payload for the header at `offset`.
    pub(super) fn user_addr(&self, offset: usize) -> usize {
        self.region.addr() + offset + HEADER_SIZE
    }

    pub(super) fn user_ptr(&self, offset: usize) -> NonNull<u8> {
        self.region.ptr_at(offset + HEADER_SIZE)
    }

    /// Carves `size` bytes aligned to `align` out of the untouched tail.
    ///
    /// The header is written only once the whole span is known to fit.
    pub(super) fn try_bump(&mut self, size: usize, align: usize) -> Option<Bumped> {
        let base = self.region.addr();
        let unaligned = base.checked_add(self.bump)?.checked_add(HEADER_SIZE)?;
        let user = unaligned.checked_next_multiple_of(align)?;
        let user_offset = user - base;
        let end = user_offset.checked_add(size)?;
        if end > self.capacity {
            return None;
        }

        let offset = user_offset - HEADER_SIZE;
        let header = Header::new(size, user - unaligned);
        header.write(&self.region, offset);
        self.bump = end;
        Some(Bumped { offset, header })
    }

    /// Header offset of the allocation whose payload starts at `ptr`.
    ///
    /// Returns `None` if `ptr` cannot be a payload handed out from this block.
    pub(super) fn header_offset_of(&self, ptr: *const u8) -> Option<usize> {
        let user_offset = self.region.offset_of(ptr)?;
        (HEADER_SIZE..self.bump)
            .contains(&user_offset)
            .then(|| user_offset - HEADER_SIZE)
    }

    /// Rewinds the bump mark and zero-fills the usable span.
    pub(super) fn reset<F>(&mut self, fill: &F)
    where
        F: BulkFill,
    {
        self.bump = 0;
        let bytes = unsafe { self.region.bytes_mut(0..self.capacity) };
        fill.fill(bytes, 0);
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use memory_provider::{MemoryProvider as _, SystemProvider, WideFill};

    use super::*;

    fn with_test_block<F>(capacity: usize, test_fn: F)
    where
        F: FnOnce(&mut Block),
    {
        let provider = SystemProvider::new();
        let region = provider.reserve(capacity).unwrap();
        let mut block = Block::new(region, capacity);
        test_fn(&mut block);
        unsafe { provider.release(block.into_region()) };
    }

    #[test]
    fn test_bump_sequence() {
        with_test_block(1024, |block| {
            let a = block.try_bump(100, 16).unwrap();
            assert_eq!(a.offset, 0);
            assert_eq!(a.header, Header::new(100, 0));
            assert_eq!(block.bump(), HEADER_SIZE + 100);

            // 132 + 32 = 164 rounds up to 176
            let b = block.try_bump(100, 16).unwrap();
            assert_eq!(b.offset, 144);
            assert_eq!(b.header.padding, 12);
            assert_eq!(block.user_addr(b.offset) % 16, 0);
            assert_eq!(Header::read(block.region(), b.offset), b.header);
            assert_eq!(block.unused(), 1024 - 276);
        });
    }

    #[test]
    fn test_bump_large_alignment() {
        with_test_block(8192, |block| {
            let a = block.try_bump(8, 4096).unwrap();
            assert_eq!(block.user_addr(a.offset) % 4096, 0);
            assert_eq!(a.offset, 4096 - HEADER_SIZE);
            assert_eq!(a.header.padding, 4096 - HEADER_SIZE);
        });
    }

    #[test]
    fn test_bump_does_not_write_when_full() {
        with_test_block(128, |block| {
            assert!(block.try_bump(HEADER_SIZE * 3 + 1, 16).is_none());
            assert_eq!(block.bump(), 0);
            let head = unsafe { core::slice::from_raw_parts(block.region().as_ptr(), 128) };
            assert!(head.iter().all(|&b| b == 0));

            let exact = block.try_bump(128 - HEADER_SIZE, 16).unwrap();
            assert_eq!(exact.offset, 0);
            assert_eq!(block.unused(), 0);
            assert!(block.try_bump(1, 1).is_none());
        });
    }

    #[test]
    fn test_header_offset_of() {
        with_test_block(512, |block| {
            let a = block.try_bump(40, 8).unwrap();
            let ptr = block.user_ptr(a.offset).as_ptr();
            assert_eq!(block.header_offset_of(ptr), Some(a.offset));
            assert_eq!(block.header_offset_of(block.region().as_ptr()), None);
            assert_eq!(
                block.header_offset_of(block.user_ptr(block.bump()).as_ptr()),
                None
            );
            assert_eq!(block.header_offset_of(core::ptr::null()), None);
        });
    }

    #[test]
    fn test_reset_rewinds_and_zeroes() {
        with_test_block(256, |block| {
            let a = block.try_bump(64, 16).unwrap();
            unsafe { block.user_ptr(a.offset).write_bytes(0x55, 64) };

            block.reset(&WideFill);
            assert_eq!(block.bump(), 0);
            let bytes = unsafe { core::slice::from_raw_parts(block.region().as_ptr(), 256) };
            assert!(bytes.iter().all(|&b| b == 0));
        });
    }
}
