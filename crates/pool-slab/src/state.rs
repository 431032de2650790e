use snafu::ensure;

use crate::error::{AllocError, InvalidArgumentSnafu, Misuse};

/// Lifecycle of an allocator.
///
/// There is no uninitialized state: constructors either return an
/// initialized allocator or an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::IsVariant)]
pub enum State {
    #[display("initialized")]
    Initialized,
    #[display("destroyed")]
    Destroyed,
}

impl State {
    #[track_caller]
    pub(crate) fn ensure_initialized(self) -> Result<(), AllocError> {
        ensure!(
            self.is_initialized(),
            InvalidArgumentSnafu {
                misuse: Misuse::UseAfterDestroy,
            }
        );
        Ok(())
    }
}
