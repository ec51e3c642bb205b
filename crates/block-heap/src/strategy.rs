//! Placement strategies.
//!
//! A strategy answers two questions for a request of `n` units: which free
//! record to use ([`Strategy::select`]) and how to cut it down
//! ([`Strategy::carve`]).
//!
//! ```text
//! free runs:        [ 5 ]  [ 3 ]  [ 4 ]        request: 3 units
//!
//! first-fit  ──▶    [ 5 ]                      first run that is large enough
//! best-fit   ──▶           [ 3 ]               smallest run that is large enough
//! buddy-fit  ──▶    [ 5 ]                      first run >= 4 (3 rounded up),
//!                                              halved down towards 4 units
//! ```

use core::str::FromStr;

use snafu::Snafu;
use tracing::trace;

use crate::{
    error::HeapError,
    ledger::{Ledger, SlotId},
};

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display, derive_more::IsVariant,
)]
pub enum Strategy {
    /// Take the lowest-addressed free record that is large enough.
    #[default]
    #[display("first-fit")]
    FirstFit,
    /// Take the free record that leaves the fewest units over, preferring the
    /// lowest address on ties.
    #[display("best-fit")]
    BestFit,
    /// Round the request up to a power of two, then halve the first large
    /// enough free record until it matches.
    ///
    /// Split halves are only reunited by the regular coalescing of adjacent
    /// free records; no buddy pairs are tracked.
    #[display("buddy-fit")]
    BuddyFit,
}

impl Strategy {
    pub const ALL: [Self; 3] = [Self::FirstFit, Self::BestFit, Self::BuddyFit];

    /// Number of units a request for `units` units actually occupies.
    ///
    /// Returns `None` if the rounded size does not fit in `usize`.
    #[must_use]
    pub fn footprint(self, units: usize) -> Option<usize> {
        match self {
            Self::FirstFit | Self::BestFit => Some(units),
            Self::BuddyFit => units.checked_next_power_of_two(),
        }
    }

    /// Picks a free record able to hold `units` units.
    pub(crate) fn select(self, ledger: &Ledger, units: usize) -> Option<SlotId> {
        let footprint = self.footprint(units)?;
        match self {
            Self::FirstFit | Self::BuddyFit => first_fit(ledger, footprint),
            Self::BestFit => best_fit(ledger, footprint),
        }
    }

    /// Cuts the selected free record down to the footprint of `units`.
    pub(crate) fn carve(
        self,
        ledger: &mut Ledger,
        slot: SlotId,
        units: usize,
    ) -> Result<(), HeapError> {
        match self {
            Self::FirstFit | Self::BestFit => {
                ledger.split(slot, units)?;
            }
            Self::BuddyFit => {
                let rounded = units.next_power_of_two();
                while ledger.record(slot).units / 2 >= rounded {
                    let half = ledger.record(slot).units / 2;
                    trace!(%slot, half, "halving buddy block");
                    ledger.split(slot, half)?;
                }
                // records that are not a power of two stop halving above `rounded`
                ledger.split(slot, rounded)?;
            }
        }
        Ok(())
    }
}

fn first_fit(ledger: &Ledger, units: usize) -> Option<SlotId> {
    ledger
        .iter()
        .find(|(_, record)| record.is_free() && record.units >= units)
        .map(|(slot, _)| slot)
}

fn best_fit(ledger: &Ledger, units: usize) -> Option<SlotId> {
    ledger
        .iter()
        .filter(|(_, record)| record.is_free() && record.units >= units)
        .min_by_key(|(_, record)| record.units - units)
        .map(|(slot, _)| slot)
}

#[derive(Debug, Snafu)]
#[snafu(display("unknown strategy `{name}`, expected first-fit, best-fit or buddy-fit"))]
pub struct ParseStrategyError {
    name: String,
}

impl FromStr for Strategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first-fit" | "first" | "ff" => Ok(Self::FirstFit),
            "best-fit" | "best" | "bf" => Ok(Self::BestFit),
            "buddy-fit" | "buddy" => Ok(Self::BuddyFit),
            _ => ParseStrategySnafu { name: s }.fail(),
        }
    }
}
