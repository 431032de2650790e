pub const PAGE_SIZE: usize = 4096;

/// Power-of-two alignment checks.
///
/// `align` must be a power of two. Rounding goes through
/// [`usize::checked_next_multiple_of`] so caller-supplied sizes cannot
/// overflow.
pub trait Align: Sized {
    fn is_aligned(&self, align: usize) -> bool;

    fn is_page_aligned(&self) -> bool {
        self.is_aligned(PAGE_SIZE)
    }
}

impl Align for usize {
    fn is_aligned(&self, align: usize) -> bool {
        debug_assert!(align.is_power_of_two());
        self & (align - 1) == 0
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_aligned() {
        assert!(0_usize.is_aligned(16));
        assert!(48_usize.is_aligned(16));
        assert!(!40_usize.is_aligned(16));
        assert!(40_usize.is_aligned(8));
    }

    #[test]
    fn test_page_alignment() {
        assert!((3 * PAGE_SIZE).is_page_aligned());
        assert!(!(3 * PAGE_SIZE + 8).is_page_aligned());
    }
}
