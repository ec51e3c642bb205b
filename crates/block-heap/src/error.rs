use snafu::Snafu;
use snafu_utils::Location;

/// Why an allocation request could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::IsVariant)]
pub enum FailureReason {
    /// The request is larger than the whole arena.
    #[display("request exceeds arena capacity")]
    ExceedsCapacity,
    /// The request is larger than the free space currently left.
    #[display("not enough free memory")]
    Exhausted,
    /// Enough memory is free, but no contiguous run fits even after compaction.
    #[display("no contiguous free run after compaction")]
    Fragmented,
}

/// Errors returned by [`Heap`](crate::Heap) operations.
///
/// Every variant leaves the heap in a consistent state, so callers can keep
/// using the heap after handling the error.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HeapError {
    #[snafu(display("failed to allocate {size} bytes: {reason}"))]
    AllocationFailed {
        size: usize,
        reason: FailureReason,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("no block starts at offset {offset:#x}"))]
    InvalidPointer {
        offset: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block at offset {offset:#x} is already free"))]
    DoubleFree {
        offset: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("stale handle for offset {offset:#x}, generation={generation}"))]
    StaleHandle {
        offset: usize,
        generation: u32,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("ledger invariant violated: {detail}"))]
    LedgerInvariantViolation {
        detail: String,
        #[snafu(implicit)]
        location: Location,
    },
}

impl HeapError {
    /// Returns the location where this error was raised.
    #[must_use]
    pub fn location(&self) -> Location {
        match self {
            Self::AllocationFailed { location, .. }
            | Self::InvalidPointer { location, .. }
            | Self::DoubleFree { location, .. }
            | Self::StaleHandle { location, .. }
            | Self::LedgerInvariantViolation { location, .. } => *location,
        }
    }
}

/// Errors returned when validating a [`HeapConfig`](crate::HeapConfig).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("unit size must be greater than zero"))]
    ZeroUnitSize {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("arena capacity must be greater than zero"))]
    ZeroCapacity {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("arena capacity {capacity} is not a multiple of unit size {unit}"))]
    CapacityNotMultipleOfUnit {
        capacity: usize,
        unit: usize,
        #[snafu(implicit)]
        location: Location,
    },
}
