use alloc::alloc::{self as global, Layout};
use core::ptr::NonNull;

use snafu::{OptionExt as _, ensure};

use crate::{
    align::{Align as _, PAGE_SIZE},
    error::{ExhaustedSnafu, LayoutSnafu, ReserveError, ZeroSizeSnafu},
    region::Region,
};

/// Source of bulk memory for the allocators.
///
/// Implementations must hand out regions that are
///
/// - at least the requested size,
/// - aligned to [`PAGE_SIZE`],
/// - zero-filled, readable and writable,
/// - exclusively owned by the returned [`Region`] until it is released.
///
/// A region is released all at once; there is no partial release.
pub trait MemoryProvider {
    /// Reserves a region of at least `size` bytes.
    fn reserve(&self, size: usize) -> Result<Region, ReserveError>;

    /// Returns a region to the provider.
    ///
    /// # Safety
    ///
    /// `region` must have been produced by `reserve` on this provider, and no
    /// pointer into it may be used afterwards.
    unsafe fn release(&self, region: Region);
}

impl<P> MemoryProvider for &P
where
    P: MemoryProvider + ?Sized,
{
    fn reserve(&self, size: usize) -> Result<Region, ReserveError> {
        (**self).reserve(size)
    }

    unsafe fn release(&self, region: Region) {
        unsafe { (**self).release(region) }
    }
}

/// Provider backed by the global allocator.
///
/// Requests are rounded up to whole pages and allocated with page alignment
/// through `alloc_zeroed`, so every region starts on a page boundary and reads
/// as zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider;

impl SystemProvider {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn layout(size: usize) -> Option<Layout> {
        let size = size.checked_next_multiple_of(PAGE_SIZE)?;
        Layout::from_size_align(size, PAGE_SIZE).ok()
    }
}

impl MemoryProvider for SystemProvider {
    fn reserve(&self, size: usize) -> Result<Region, ReserveError> {
        ensure!(size > 0, ZeroSizeSnafu);
        let layout = Self::layout(size).context(LayoutSnafu { size })?;

        let base = unsafe { global::alloc_zeroed(layout) };
        let base = NonNull::new(base).context(ExhaustedSnafu { size })?;
        log::trace!(
            "reserved {:#x} bytes at {:#x}",
            layout.size(),
            base.addr().get()
        );

        Ok(unsafe { Region::from_raw_parts(base, layout.size()) })
    }

    unsafe fn release(&self, region: Region) {
        assert!(!region.is_empty());
        assert!(region.addr().is_page_aligned());
        assert!(region.len().is_page_aligned());
        let Some(layout) = Self::layout(region.len()) else {
            unreachable!("region of {:#x} bytes did not come from reserve", region.len());
        };
        log::trace!("releasing {:#x} bytes at {:#x}", region.len(), region.addr());
        unsafe { global::dealloc(region.as_ptr(), layout) }
    }
}
