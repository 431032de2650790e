use core::{
    cell::UnsafeCell,
    fmt, hint,
    ops::{Deref, DerefMut},
    panic::Location,
    ptr,
    sync::atomic::{AtomicBool, AtomicPtr, Ordering},
};

use crate::error::{AllocError, LockTimeoutSnafu};

/// A spin lock whose acquisition gives up after a bounded number of spins.
///
/// The last place that took the lock is remembered so a timeout can say who
/// was holding it.
pub(crate) struct SpinLock<T> {
    locked: AtomicBool,
    holder: AtomicPtr<Location<'static>>,
    data: UnsafeCell<T>,
}

unsafe impl<T> Send for SpinLock<T> where T: Send {}
unsafe impl<T> Sync for SpinLock<T> where T: Send {}

impl<T> fmt::Debug for SpinLock<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("SpinLock");
        match self.try_lock() {
            Some(guard) => d.field("data", &&*guard),
            None => d.field("data", &"<locked>"),
        };
        d.finish()
    }
}

impl<T> SpinLock<T> {
    pub(crate) const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            holder: AtomicPtr::new(ptr::null_mut()),
            data: UnsafeCell::new(data),
        }
    }

    #[track_caller]
    pub(crate) fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.locked.swap(true, Ordering::Acquire) {
            return None;
        }
        self.remember_holder(Location::caller());
        Some(SpinLockGuard { lock: self })
    }

    /// Acquires the lock, spinning at most `max_spins` times.
    #[track_caller]
    pub(crate) fn lock_bounded(&self, max_spins: usize) -> Result<SpinLockGuard<'_, T>, AllocError> {
        let caller = Location::caller();
        let mut spins = 0;
        while self.locked.swap(true, Ordering::Acquire) {
            if spins == max_spins {
                let holder = self.holder();
                log::warn!("lock not acquired after {spins} spins at {caller}, holder: {holder:?}");
                return LockTimeoutSnafu { spins, holder }.fail();
            }
            spins += 1;
            hint::spin_loop();
        }
        self.remember_holder(caller);
        Ok(SpinLockGuard { lock: self })
    }

    fn remember_holder(&self, location: &'static Location<'static>) {
        self.holder
            .store(ptr::from_ref(location).cast_mut(), Ordering::Relaxed);
    }

    fn holder(&self) -> Option<&'static Location<'static>> {
        let holder = self.holder.load(Ordering::Relaxed);
        // only ever set from a `&'static Location`
        unsafe { holder.as_ref() }
    }
}

pub(crate) struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

unsafe impl<T> Sync for SpinLockGuard<'_, T> where T: Sync {}

impl<T> fmt::Debug for SpinLockGuard<'_, T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}
