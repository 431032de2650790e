//! Fixed-size slab allocator.
//!
//! One region is divided into `total` slots of identical stride. Free slots
//! form a LIFO list threaded through their headers, so both `alloc` and
//! `free` are constant time.

use core::ptr::NonNull;

use memory_provider::{BulkFill, MemoryProvider, Region, SystemProvider, WideFill};
use snafu::{OptionExt as _, ResultExt as _, ensure};

use crate::{
    error::{AllocError, ExhaustedPoolSnafu, InvalidArgumentSnafu, Misuse, OutOfMemorySnafu},
    header::{Cursor, HEADER_SIZE, Header},
    state::State,
};

/// Granularity of slab object sizes.
pub const SLOT_ALIGN: usize = 16;

// Slots have no alignment gap, so the header's padding field marks a slot
// that is handed out.
const LIVE_MARK: usize = usize::MAX;

/// Point-in-time accounting of a slab. `live + free == total` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlabStats {
    pub total: usize,
    pub live: usize,
    pub free: usize,
    /// Usable bytes per object, after rounding.
    pub object_size: usize,
    /// Distance between consecutive slots, header included.
    pub slot_size: usize,
}

#[derive(Debug, Clone, Copy)]
struct Geometry {
    total: usize,
    object_size: usize,
    slot_size: usize,
}

impl Geometry {
    fn new(total: usize, object_size: usize) -> Result<Self, AllocError> {
        ensure!(
            total > 0,
            InvalidArgumentSnafu {
                misuse: Misuse::ZeroObjects,
            }
        );
        ensure!(
            object_size >= size_of::<usize>(),
            InvalidArgumentSnafu {
                misuse: Misuse::ObjectTooSmall { size: object_size },
            }
        );

        let too_large = || InvalidArgumentSnafu {
            misuse: Misuse::SlabTooLarge { total, object_size },
        };
        let rounded = object_size
            .checked_next_multiple_of(SLOT_ALIGN)
            .with_context(too_large)?;
        let slot_size = rounded.checked_add(HEADER_SIZE).with_context(too_large)?;
        ensure!(total.checked_mul(slot_size).is_some(), too_large());
        Ok(Self {
            total,
            object_size: rounded,
            slot_size,
        })
    }

    const fn region_size(self) -> usize {
        self.total * self.slot_size
    }

    /// Slot header offset for a pointer handed out from `region`.
    fn slot_of(self, region: &Region, ptr: *const u8) -> Option<Cursor> {
        let offset = region.offset_of(ptr)?.checked_sub(HEADER_SIZE)?;
        let index = offset / self.slot_size;
        (offset % self.slot_size == 0 && index < self.total).then_some(Cursor::new(0, offset))
    }
}

#[derive(Debug)]
struct Slab {
    region: Option<Region>,
    free_head: Option<Cursor>,
    live: usize,
}

impl Slab {
    fn region(&self) -> Result<&Region, AllocError> {
        self.region.as_ref().context(InvalidArgumentSnafu {
            misuse: Misuse::UseAfterDestroy,
        })
    }

    /// Links every slot in address order and forgets all live objects.
    fn thread(&mut self, geometry: Geometry) -> Result<(), AllocError> {
        let region = self.region()?;
        for index in 0..geometry.total {
            let next = index + 1;
            let next = (next < geometry.total).then(|| Cursor::new(0, next * geometry.slot_size));
            Header::new(geometry.object_size, 0)
                .with_next(next)
                .write(region, index * geometry.slot_size);
        }
        self.free_head = Some(Cursor::new(0, 0));
        self.live = 0;
        Ok(())
    }
}

/// A thread-safe allocator of fixed-size objects.
///
/// # Examples
///
/// ```rust
/// use pool_slab::SlabAllocator;
///
/// let slab = SlabAllocator::init(4, 64)?;
/// let a = slab.alloc()?;
/// unsafe { slab.free(a.as_ptr())? };
/// assert_eq!(slab.alloc()?, a);
/// # Ok::<(), pool_slab::AllocError>(())
/// ```
#[derive(Debug)]
pub struct SlabAllocator<P = SystemProvider, F = WideFill>
where
    P: MemoryProvider,
{
    provider: P,
    fill: F,
    geometry: Geometry,
    inner: spin::Mutex<Slab>,
}

impl SlabAllocator {
    /// Creates a slab of `total` objects backed by the global allocator.
    ///
    /// # Errors
    ///
    /// See [`with_collaborators`](Self::with_collaborators).
    pub fn init(total: usize, object_size: usize) -> Result<Self, AllocError> {
        Self::with_collaborators(SystemProvider::new(), WideFill, total, object_size)
    }
}

impl<P, F> SlabAllocator<P, F>
where
    P: MemoryProvider,
    F: BulkFill,
{
    /// Creates a slab of `total` objects of at least `object_size` bytes.
    ///
    /// `object_size` is rounded up to a multiple of [`SLOT_ALIGN`].
    ///
    /// # Errors
    ///
    /// - [`AllocError::InvalidArgument`] if `total` is zero, `object_size` is
    ///   smaller than a pointer, or the slab would not fit in the address
    ///   space.
    /// - [`AllocError::OutOfMemory`] if `provider` cannot reserve the region.
    pub fn with_collaborators(
        provider: P,
        fill: F,
        total: usize,
        object_size: usize,
    ) -> Result<Self, AllocError> {
        let geometry = Geometry::new(total, object_size)?;
        let size = geometry.region_size();
        let region = provider
            .reserve(size)
            .context(OutOfMemorySnafu { size })?;
        log::info!(
            "slab created with {total} slots of {} bytes at {region:?}",
            geometry.slot_size
        );

        let mut slab = Slab {
            region: Some(region),
            free_head: None,
            live: 0,
        };
        slab.thread(geometry)?;
        Ok(Self {
            provider,
            fill,
            geometry,
            inner: spin::Mutex::new(slab),
        })
    }

    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Usable bytes per object.
    #[must_use]
    pub const fn object_size(&self) -> usize {
        self.geometry.object_size
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.geometry.total
    }

    #[must_use]
    pub fn state(&self) -> State {
        if self.inner.lock().region.is_some() {
            State::Initialized
        } else {
            State::Destroyed
        }
    }

    /// Pops the most recently freed slot.
    ///
    /// # Errors
    ///
    /// - [`AllocError::ExhaustedPool`] if every slot is in use.
    /// - [`AllocError::InvalidArgument`] if the slab has been destroyed.
    pub fn alloc(&self) -> Result<NonNull<u8>, AllocError> {
        let mut slab = self.inner.lock();
        let Slab {
            region,
            free_head,
            live,
        } = &mut *slab;
        let region = region.as_ref().context(InvalidArgumentSnafu {
            misuse: Misuse::UseAfterDestroy,
        })?;
        let Some(head) = *free_head else {
            return ExhaustedPoolSnafu {
                total: self.geometry.total,
            }
            .fail();
        };

        *free_head = Header::read(region, head.offset).next();
        Header::new(self.geometry.object_size, LIVE_MARK).write(region, head.offset);
        *live += 1;
        let ptr = region.ptr_at(head.user_offset());
        log::trace!("slab alloc -> {ptr:p}");
        Ok(ptr)
    }

    /// Pushes the slot owning `ptr` back onto the free list.
    ///
    /// Freeing a null pointer does nothing.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidArgument`] if `ptr` is not the start of a slot in
    /// this slab, its slot is already free, or the slab has been destroyed.
    ///
    /// # Safety
    ///
    /// `ptr` must not be used after this call returns `Ok`.
    pub unsafe fn free(&self, ptr: *mut u8) -> Result<(), AllocError> {
        if ptr.is_null() {
            return Ok(());
        }

        let mut slab = self.inner.lock();
        let Slab {
            region,
            free_head,
            live,
        } = &mut *slab;
        let region = region.as_ref().context(InvalidArgumentSnafu {
            misuse: Misuse::UseAfterDestroy,
        })?;
        let addr = ptr.addr();
        let slot = self
            .geometry
            .slot_of(region, ptr)
            .context(InvalidArgumentSnafu {
                misuse: Misuse::ForeignPointer { addr },
            })?;
        ensure!(
            Header::read(region, slot.offset).padding == LIVE_MARK,
            InvalidArgumentSnafu {
                misuse: Misuse::DoubleFree { addr },
            }
        );

        Header::new(self.geometry.object_size, 0)
            .with_next(*free_head)
            .write(region, slot.offset);
        *free_head = Some(slot);
        *live -= 1;
        log::trace!("slab free({ptr:p})");
        Ok(())
    }

    /// Zero-fills the region and threads every slot back onto the free list.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidArgument`] if the slab has been destroyed.
    pub fn reset(&self) -> Result<(), AllocError> {
        let mut slab = self.inner.lock();
        let region = slab.region.as_mut().context(InvalidArgumentSnafu {
            misuse: Misuse::UseAfterDestroy,
        })?;
        let bytes = unsafe { region.bytes_mut(0..self.geometry.region_size()) };
        self.fill.fill(bytes, 0);
        slab.thread(self.geometry)?;
        log::debug!("slab reset");
        Ok(())
    }

    /// Releases the region to the provider.
    ///
    /// Every later call fails with [`AllocError::InvalidArgument`].
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidArgument`] if the slab was already destroyed.
    pub fn destroy(&self) -> Result<(), AllocError> {
        let mut slab = self.inner.lock();
        let region = slab.region.take().context(InvalidArgumentSnafu {
            misuse: Misuse::UseAfterDestroy,
        })?;
        slab.free_head = None;
        slab.live = 0;
        unsafe { self.provider.release(region) };
        log::info!("slab destroyed");
        Ok(())
    }

    /// # Errors
    ///
    /// [`AllocError::InvalidArgument`] if the slab has been destroyed.
    pub fn stats(&self) -> Result<SlabStats, AllocError> {
        let slab = self.inner.lock();
        let region = slab.region()?;
        let free = core::iter::successors(slab.free_head, |cursor| {
            Header::read(region, cursor.offset).next()
        })
        .count();
        Ok(SlabStats {
            total: self.geometry.total,
            live: slab.live,
            free,
            object_size: self.geometry.object_size,
            slot_size: self.geometry.slot_size,
        })
    }
}

impl<P, F> Drop for SlabAllocator<P, F>
where
    P: MemoryProvider,
{
    fn drop(&mut self) {
        if let Some(region) = self.inner.get_mut().region.take() {
            unsafe { self.provider.release(region) };
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use memory_provider::BudgetProvider;

    use super::*;

    type TestSlab<'a> = SlabAllocator<&'a BudgetProvider<SystemProvider>, WideFill>;

    fn with_test_slab<F>(total: usize, object_size: usize, test_fn: F)
    where
        F: FnOnce(&TestSlab<'_>),
    {
        let provider = BudgetProvider::new(SystemProvider::new(), usize::MAX);
        let slab = SlabAllocator::with_collaborators(&provider, WideFill, total, object_size).unwrap();
        test_fn(&slab);
        slab.destroy().unwrap();
        assert_eq!(provider.live_regions(), 0);
    }

    fn check_accounting(slab: &TestSlab<'_>) -> SlabStats {
        let stats = slab.stats().unwrap();
        assert_eq!(stats.live + stats.free, stats.total, "{stats:?}");
        stats
    }

    #[test]
    fn test_lifo_scenario() {
        with_test_slab(4, 64, |slab| {
            let ptrs = (0..4).map(|_| slab.alloc().unwrap()).collect::<Vec<_>>();
            let distinct = ptrs.iter().collect::<HashSet<_>>();
            assert_eq!(distinct.len(), 4);
            assert!(slab.alloc().unwrap_err().is_exhausted_pool());
            check_accounting(slab);

            unsafe { slab.free(ptrs[2].as_ptr()).unwrap() };
            assert_eq!(slab.alloc().unwrap(), ptrs[2]);
            check_accounting(slab);
        });
    }

    #[test]
    fn test_slots_in_address_order() {
        with_test_slab(3, 20, |slab| {
            assert_eq!(slab.object_size(), 32);
            let stats = check_accounting(slab);
            assert_eq!(stats.slot_size, 32 + HEADER_SIZE);

            let a = slab.alloc().unwrap();
            let b = slab.alloc().unwrap();
            let c = slab.alloc().unwrap();
            assert_eq!(b, unsafe { a.add(stats.slot_size) });
            assert_eq!(c, unsafe { b.add(stats.slot_size) });
            for ptr in [a, b, c] {
                assert!(ptr.as_ptr().addr().is_multiple_of(SLOT_ALIGN));
                // objects do not overlap the next slot's header
                unsafe { ptr.write_bytes(0xff, 32) };
            }
            unsafe {
                slab.free(a.as_ptr()).unwrap();
                slab.free(c.as_ptr()).unwrap();
            }
            assert_eq!(slab.alloc().unwrap(), c);
            assert_eq!(slab.alloc().unwrap(), a);
        });
    }

    #[test]
    fn test_invalid_init() {
        let err = SlabAllocator::init(0, 64).unwrap_err();
        assert_eq!(err.misuse(), Some(Misuse::ZeroObjects));

        let err = SlabAllocator::init(4, size_of::<usize>() - 1).unwrap_err();
        assert!(matches!(err.misuse(), Some(Misuse::ObjectTooSmall { .. })));

        let err = SlabAllocator::init(usize::MAX / 2, 64).unwrap_err();
        assert!(matches!(err.misuse(), Some(Misuse::SlabTooLarge { .. })));

        let err = SlabAllocator::init(1, usize::MAX - 4).unwrap_err();
        assert!(matches!(err.misuse(), Some(Misuse::SlabTooLarge { .. })));
    }

    #[test]
    fn test_out_of_memory() {
        let provider = BudgetProvider::new(SystemProvider::new(), 4096);
        let err = SlabAllocator::with_collaborators(&provider, WideFill, 1024, 64).unwrap_err();
        assert!(err.is_out_of_memory());
        assert_eq!(provider.live_regions(), 0);
    }

    #[test]
    fn test_free_validation() {
        with_test_slab(2, 64, |slab| {
            let a = slab.alloc().unwrap();
            unsafe {
                slab.free(core::ptr::null_mut()).unwrap();

                let err = slab.free(a.as_ptr().add(1)).unwrap_err();
                assert!(matches!(err.misuse(), Some(Misuse::ForeignPointer { .. })));

                let mut local = 0_u64;
                let err = slab.free((&raw mut local).cast()).unwrap_err();
                assert!(matches!(err.misuse(), Some(Misuse::ForeignPointer { .. })));

                // one slot past the end lies in the same page but not in the slab
                let stride = slab.stats().unwrap().slot_size;
                let err = slab.free(a.as_ptr().add(2 * stride)).unwrap_err();
                assert!(matches!(err.misuse(), Some(Misuse::ForeignPointer { .. })));

                slab.free(a.as_ptr()).unwrap();
                let err = slab.free(a.as_ptr()).unwrap_err();
                assert!(matches!(err.misuse(), Some(Misuse::DoubleFree { .. })));
            }
            check_accounting(slab);
        });
    }

    #[test]
    fn test_double_free_with_live_objects() {
        with_test_slab(4, 32, |slab| {
            let a = slab.alloc().unwrap();
            let b = slab.alloc().unwrap();
            let c = slab.alloc().unwrap();
            unsafe {
                slab.free(a.as_ptr()).unwrap();
                slab.free(c.as_ptr()).unwrap();

                // neither the head nor the slot behind it may be pushed again
                for ptr in [c, a] {
                    let err = slab.free(ptr.as_ptr()).unwrap_err();
                    assert_eq!(
                        err.misuse(),
                        Some(Misuse::DoubleFree {
                            addr: ptr.as_ptr().addr()
                        })
                    );
                }
                // never handed out since the last reset
                let untouched = c.add(slab.stats().unwrap().slot_size);
                let err = slab.free(untouched.as_ptr()).unwrap_err();
                assert!(matches!(err.misuse(), Some(Misuse::DoubleFree { .. })));
            }
            let stats = check_accounting(slab);
            assert_eq!(stats.live, 1);

            let x = slab.alloc().unwrap();
            let y = slab.alloc().unwrap();
            assert_eq!((x, y), (c, a));
            assert_ne!(x, b);
            unsafe { slab.free(b.as_ptr()).unwrap() };
        });
    }

    #[test]
    fn test_reset_rebuilds_list_and_zeroes() {
        with_test_slab(4, 64, |slab| {
            let first = slab.alloc().unwrap();
            let second = slab.alloc().unwrap();
            unsafe {
                first.write_bytes(0x33, 64);
                second.write_bytes(0x55, 64);
                slab.free(first.as_ptr()).unwrap();
            }

            slab.reset().unwrap();
            let stats = check_accounting(slab);
            assert_eq!(stats.free, 4);

            let again = slab.alloc().unwrap();
            assert_eq!(again, first);
            let bytes = unsafe { core::slice::from_raw_parts(second.as_ptr(), 64) };
            assert!(bytes.iter().all(|&b| b == 0));
            assert_eq!(slab.alloc().unwrap(), second);
        });
    }

    #[test]
    fn test_use_after_destroy() {
        let provider = BudgetProvider::new(SystemProvider::new(), usize::MAX);
        let slab = SlabAllocator::with_collaborators(&provider, WideFill, 2, 16).unwrap();
        let a = slab.alloc().unwrap();
        slab.destroy().unwrap();
        assert!(slab.state().is_destroyed());
        assert_eq!(provider.live_regions(), 0);

        let misuse = Some(Misuse::UseAfterDestroy);
        assert_eq!(slab.alloc().unwrap_err().misuse(), misuse);
        assert_eq!(unsafe { slab.free(a.as_ptr()) }.unwrap_err().misuse(), misuse);
        assert_eq!(slab.reset().unwrap_err().misuse(), misuse);
        assert_eq!(slab.destroy().unwrap_err().misuse(), misuse);
        assert_eq!(slab.stats().unwrap_err().misuse(), misuse);
    }

    #[test]
    fn test_drop_releases_region() {
        let provider = BudgetProvider::new(SystemProvider::new(), usize::MAX);
        {
            let slab = SlabAllocator::with_collaborators(&provider, WideFill, 8, 32).unwrap();
            slab.alloc().unwrap();
            assert_eq!(provider.live_regions(), 1);
        }
        assert_eq!(provider.live_regions(), 0);
    }
}
