use core::{fmt, ops::Range, ptr::NonNull, slice};

/// One contiguous span handed out by a [`MemoryProvider`].
///
/// A `Region` is the only place where raw addresses and allocator offsets
/// meet: [`offset_of`](Self::offset_of) turns a caller's pointer into an
/// offset, [`ptr_at`](Self::ptr_at) turns an offset back into a pointer that
/// carries the region's provenance.
///
/// The handle is deliberately not `Clone`; it has to be given back to the
/// provider that produced it exactly once.
///
/// [`MemoryProvider`]: crate::MemoryProvider
pub struct Region {
    base: NonNull<u8>,
    len: usize,
}

unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("base", &format_args!("{:#x}", self.addr()))
            .field("len", &self.len)
            .finish()
    }
}

impl Region {
    /// Wraps a span produced by a provider.
    ///
    /// # Safety
    ///
    /// `base..base + len` must be valid for reads and writes, exclusively
    /// owned by the returned handle, and must stay valid until the region is
    /// released.
    #[must_use]
    pub const unsafe fn from_raw_parts(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    /// Address of the first byte.
    #[must_use]
    pub fn addr(&self) -> usize {
        self.base.addr().get()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Converts an address inside the region into an offset from its base.
    #[must_use]
    pub fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        ptr.addr()
            .checked_sub(self.addr())
            .filter(|offset| *offset < self.len)
    }

    /// Converts an offset back into a pointer.
    ///
    /// `offset == len()` is allowed and yields the one-past-the-end pointer.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is past the end of the region.
    #[must_use]
    pub fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(
            offset <= self.len,
            "offset {offset:#x} is outside region of {:#x} bytes",
            self.len
        );
        unsafe { self.base.add(offset) }
    }

    /// Borrows `range` of the region as a byte slice.
    ///
    /// # Safety
    ///
    /// No pointer previously handed out for the bytes in `range` may be used
    /// while the returned slice is alive.
    ///
    /// # Panics
    ///
    /// Panics if `range` is not inside the region.
    pub unsafe fn bytes_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        assert!(
            range.start <= range.end && range.end <= self.len,
            "range {range:?} is outside region of {:#x} bytes",
            self.len
        );
        unsafe { slice::from_raw_parts_mut(self.ptr_at(range.start).as_ptr(), range.len()) }
    }
}
