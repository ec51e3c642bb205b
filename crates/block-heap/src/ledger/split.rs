//! Splitting and coalescing of ledger records.

use snafu::ensure;
use tracing::trace;

use super::{BlockState, Ledger, Record, SlotId};
use crate::error::{HeapError, LedgerInvariantViolationSnafu};

impl Ledger {
    /// Shrinks the free record in `slot` to `needed` units.
    ///
    /// The remaining units become a new free record linked right after
    /// `slot`, which is returned. Nothing is split when the record already
    /// has exactly `needed` units.
    ///
    /// The ledger is left untouched when the split would produce a record
    /// outside the arena.
    pub(crate) fn split(
        &mut self,
        slot: SlotId,
        needed: usize,
    ) -> Result<Option<SlotId>, HeapError> {
        let record = self.record(slot);
        ensure!(
            needed > 0 && needed <= record.units,
            LedgerInvariantViolationSnafu {
                detail: format!(
                    "cannot carve {needed} units out of {slot} holding {}",
                    record.units
                ),
            }
        );
        if needed == record.units {
            return Ok(None);
        }

        let (start, end) = (record.start, record.end());
        ensure!(
            end <= self.unit_count(),
            LedgerInvariantViolationSnafu {
                detail: format!(
                    "remainder of {slot} would end at unit {end}, past arena end {}",
                    self.unit_count()
                ),
            }
        );

        let remainder = Record::new(start + needed, end - start - needed, BlockState::Free);
        self.record_mut(slot).units = needed;
        let remainder = self.insert_after(slot, remainder);
        trace!(%slot, %remainder, start, needed, "split record");
        Ok(Some(remainder))
    }

    /// Folds the record after `slot` into `slot` when both are free.
    ///
    /// Returns `true` if a merge happened.
    pub(crate) fn merge_with_next(&mut self, slot: SlotId) -> bool {
        let record = self.record(slot);
        let Some(next) = record.next else {
            return false;
        };
        if !record.is_free() || !self.record(next).is_free() {
            return false;
        }
        let absorbed = self.record(next).units;
        self.record_mut(slot).units += absorbed;
        self.remove(next);
        trace!(%slot, absorbed, "merged free neighbour");
        true
    }

    /// Merges every run of address-adjacent free records into one record.
    ///
    /// Returns the number of merges performed. Afterwards no two adjacent
    /// records are both free.
    pub(crate) fn coalesce(&mut self) -> usize {
        let mut merges = 0;
        loop {
            let mut pass_merges = 0;
            let mut cursor = Some(self.head());
            while let Some(slot) = cursor {
                if self.merge_with_next(slot) {
                    // stay on `slot`; its new neighbour may be free as well
                    pass_merges += 1;
                } else {
                    cursor = self.record(slot).next;
                }
            }
            if pass_merges == 0 {
                break;
            }
            merges += pass_merges;
        }
        merges
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use crate::ledger::tests::{ledger_of, shape};

    use super::*;

    #[test]
    fn split_carves_front_and_links_remainder() {
        let mut ledger = Ledger::new(8);
        let head = ledger.head();
        let remainder = ledger.split(head, 3).unwrap().unwrap();
        assert_eq!(shape(&ledger), [(0, 3, true), (3, 5, true)]);
        assert_eq!(ledger.record(head).next, Some(remainder));
        assert_eq!(ledger.record(remainder).prev, Some(head));
        ledger.check_invariants().unwrap();
    }

    #[test]
    fn split_exact_fit_is_noop() {
        let mut ledger = Ledger::new(4);
        let head = ledger.head();
        assert_eq!(ledger.split(head, 4).unwrap(), None);
        assert_eq!(shape(&ledger), [(0, 4, true)]);
    }

    #[test]
    fn split_rejects_oversized_request_without_mutation() {
        let mut ledger = Ledger::new(4);
        let head = ledger.head();
        assert!(matches!(
            ledger.split(head, 5),
            Err(HeapError::LedgerInvariantViolation { .. })
        ));
        assert!(ledger.split(head, 0).is_err());
        assert_eq!(shape(&ledger), [(0, 4, true)]);
    }

    #[test]
    fn split_rejects_record_past_arena_end() {
        let mut ledger = Ledger::new(4);
        let head = ledger.head();
        ledger.record_mut(head).units = 6;
        assert!(ledger.split(head, 2).is_err());
        assert_eq!(ledger.record(head).units, 6);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn merge_with_next_needs_two_free_records() {
        let mut ledger = ledger_of(&[(2, true), (2, false), (2, true), (2, true)]);
        let head = ledger.head();
        assert!(!ledger.merge_with_next(head));

        let third = ledger.find_start(4).unwrap();
        assert!(ledger.merge_with_next(third));
        assert_eq!(shape(&ledger), [(0, 2, true), (2, 2, false), (4, 4, true)]);
        assert!(!ledger.merge_with_next(third));
        ledger.check_invariants().unwrap();
    }

    #[test]
    fn coalesce_reaches_fixed_point() {
        let mut ledger = ledger_of(&[
            (1, true),
            (1, true),
            (1, true),
            (2, false),
            (1, true),
            (3, true),
        ]);
        assert_eq!(ledger.coalesce(), 3);
        assert_eq!(shape(&ledger), [(0, 3, true), (3, 2, false), (5, 4, true)]);
        assert_eq!(ledger.coalesce(), 0);
        ledger.check_invariants().unwrap();

        let pairs = shape(&ledger);
        assert!(pairs.windows(2).all(|w| !(w[0].2 && w[1].2)));
    }
}
