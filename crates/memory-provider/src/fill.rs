/// Fills byte ranges with a single value.
///
/// Implementations must write exactly `bytes.len()` bytes and must accept
/// slices of any alignment and length.
pub trait BulkFill {
    fn fill(&self, bytes: &mut [u8], value: u8);
}

impl<F> BulkFill for &F
where
    F: BulkFill + ?Sized,
{
    fn fill(&self, bytes: &mut [u8], value: u8) {
        (**self).fill(bytes, value);
    }
}

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "x86_64", target_feature = "sse2"))] {
        type Lane = core::arch::x86_64::__m128i;

        fn splat(value: u8) -> Lane {
            unsafe { core::mem::transmute::<[u8; LANE_BYTES], Lane>([value; LANE_BYTES]) }
        }
    } else {
        type Lane = u128;

        fn splat(value: u8) -> Lane {
            u128::from_ne_bytes([value; LANE_BYTES])
        }
    }
}

const LANE_BYTES: usize = 16;
const _: () = assert!(size_of::<Lane>() == LANE_BYTES);

/// Fill that writes the aligned middle of the range sixteen bytes at a time.
///
/// The unaligned head and the short tail are filled byte by byte.
#[derive(Debug, Default, Clone, Copy)]
pub struct WideFill;

impl BulkFill for WideFill {
    fn fill(&self, bytes: &mut [u8], value: u8) {
        // every bit pattern is a valid lane
        let (head, body, tail) = unsafe { bytes.align_to_mut::<Lane>() };
        head.fill(value);
        body.fill(splat(value));
        tail.fill(value);
    }
}
