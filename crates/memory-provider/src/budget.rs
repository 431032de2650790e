use core::sync::atomic::{AtomicUsize, Ordering};

use snafu::ensure;

use crate::{
    error::{BudgetExceededSnafu, ReserveError},
    provider::MemoryProvider,
    region::Region,
};

/// A provider that refuses to have more than `budget` bytes outstanding.
///
/// The byte count is taken from the regions actually returned by the inner
/// provider, so page rounding counts against the budget.
#[derive(Debug)]
pub struct BudgetProvider<P> {
    inner: P,
    budget: usize,
    in_use: AtomicUsize,
    live_regions: AtomicUsize,
}

impl<P> BudgetProvider<P> {
    #[must_use]
    pub const fn new(inner: P, budget: usize) -> Self {
        Self {
            inner,
            budget,
            in_use: AtomicUsize::new(0),
            live_regions: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn budget(&self) -> usize {
        self.budget
    }

    /// Bytes currently reserved and not yet released.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Number of regions currently reserved and not yet released.
    #[must_use]
    pub fn live_regions(&self) -> usize {
        self.live_regions.load(Ordering::Acquire)
    }
}

impl<P> MemoryProvider for BudgetProvider<P>
where
    P: MemoryProvider,
{
    fn reserve(&self, size: usize) -> Result<Region, ReserveError> {
        let in_use = self.in_use();
        let fits = in_use
            .checked_add(size)
            .is_some_and(|total| total <= self.budget);
        ensure!(
            fits,
            BudgetExceededSnafu {
                size,
                in_use,
                budget: self.budget,
            }
        );

        let region = self.inner.reserve(size)?;
        let prev = self.in_use.fetch_add(region.len(), Ordering::AcqRel);
        if prev + region.len() > self.budget {
            // Lost a race with another reservation.
            self.in_use.fetch_sub(region.len(), Ordering::AcqRel);
            let len = region.len();
            unsafe { self.inner.release(region) };
            return BudgetExceededSnafu {
                size: len,
                in_use: prev,
                budget: self.budget,
            }
            .fail();
        }
        self.live_regions.fetch_add(1, Ordering::AcqRel);
        Ok(region)
    }

    unsafe fn release(&self, region: Region) {
        self.in_use.fetch_sub(region.len(), Ordering::AcqRel);
        self.live_regions.fetch_sub(1, Ordering::AcqRel);
        unsafe { self.inner.release(region) }
    }
}
