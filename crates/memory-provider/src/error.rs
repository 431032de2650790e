use snafu::{Location, Snafu};

/// Reasons a [`MemoryProvider`](crate::MemoryProvider) can refuse a
/// reservation.
///
/// The context selectors are public so that providers outside this crate
/// report failures with the same variants.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReserveError {
    #[snafu(display("cannot reserve a zero-sized region"))]
    ZeroSize {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("reservation of {size} bytes has no page-aligned layout"))]
    Layout {
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("system allocator refused {size} bytes"))]
    Exhausted {
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "reservation of {size} bytes exceeds budget ({in_use} of {budget} bytes in use)"
    ))]
    BudgetExceeded {
        size: usize,
        in_use: usize,
        budget: usize,
        #[snafu(implicit)]
        location: Location,
    },
}
