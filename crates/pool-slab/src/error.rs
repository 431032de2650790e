use core::panic::Location as CallerLocation;

use memory_provider::ReserveError;
use snafu::{Location, Snafu};

/// The ways a call can be rejected before it touches allocator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Misuse {
    #[display("allocation size is zero")]
    ZeroSize,
    #[display("alignment {align} is not a power of two")]
    BadAlignment { align: usize },
    #[display("slab must hold at least one object")]
    ZeroObjects,
    #[display("object size {size} is smaller than a pointer")]
    ObjectTooSmall { size: usize },
    #[display("{total} objects of {object_size} bytes do not fit in the address space")]
    SlabTooLarge { total: usize, object_size: usize },
    #[display("pointer {addr:#x} was not handed out by this allocator")]
    ForeignPointer { addr: usize },
    #[display("pointer {addr:#x} is already free")]
    DoubleFree { addr: usize },
    #[display("allocator has been destroyed")]
    UseAfterDestroy,
}

#[derive(Debug, Snafu, derive_more::IsVariant)]
#[snafu(visibility(pub(crate)))]
pub enum AllocError {
    #[snafu(display("invalid argument: {misuse}"))]
    InvalidArgument {
        misuse: Misuse,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("memory provider could not supply {size} bytes"))]
    OutOfMemory {
        size: usize,
        #[snafu(source)]
        source: ReserveError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("all {total} slab slots are in use"))]
    ExhaustedPool {
        total: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free-list lock not acquired after {spins} spins"))]
    LockTimeout {
        spins: usize,
        /// Where the lock was last taken, if it was ever taken.
        holder: Option<&'static CallerLocation<'static>>,
        #[snafu(implicit)]
        location: Location,
    },
}

impl AllocError {
    /// The rejected argument, for [`AllocError::InvalidArgument`].
    #[must_use]
    pub const fn misuse(&self) -> Option<Misuse> {
        match self {
            Self::InvalidArgument { misuse, .. } => Some(*misuse),
            _ => None,
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use snafu::IntoError as _;

    use super::*;

    #[test]
    fn test_display() {
        let err = InvalidArgumentSnafu {
            misuse: Misuse::BadAlignment { align: 3 },
        }
        .build();
        assert_eq!(
            err.to_string(),
            "invalid argument: alignment 3 is not a power of two"
        );
        assert!(err.is_invalid_argument());
        assert_eq!(err.misuse(), Some(Misuse::BadAlignment { align: 3 }));

        let err = ExhaustedPoolSnafu { total: 4_usize }.build();
        assert_eq!(err.to_string(), "all 4 slab slots are in use");
        assert_eq!(err.misuse(), None);
    }

    #[test]
    fn test_out_of_memory_keeps_source() {
        let source = memory_provider::MemoryProvider::reserve(
            &memory_provider::SystemProvider::new(),
            0,
        )
        .unwrap_err();
        let err = OutOfMemorySnafu { size: 0_usize }.into_error(source);
        assert!(err.is_out_of_memory());
        let source = core::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "cannot reserve a zero-sized region");
    }
}
