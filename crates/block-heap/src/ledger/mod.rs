//! Block ledger.
//!
//! The ledger is an address-ordered chain of records that covers the whole
//! arena without gaps or overlaps. Records live in a slot table separate from
//! the arena bytes, and the chain links are slot indices.
//!
//! ```text
//! Ledger over an 8-unit arena:
//!
//!   head
//!    │
//!    ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ start 0      │──▶│ start 3      │──▶│ start 5      │──▶ None
//! │ units 3      │◀──│ units 2      │◀──│ units 3      │
//! │ Allocated #1 │   │ Allocated #2 │   │ Free         │
//! └──────────────┘   └──────────────┘   └──────────────┘
//! ```

use core::{fmt, num::NonZeroU64};
use std::time::Instant;

use snafu::ensure;

use crate::error::{HeapError, LedgerInvariantViolationSnafu};

mod split;

/// Index of a record in the ledger's slot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("slot#{_0}")]
pub(crate) struct SlotId(usize);

/// Identifier assigned to each successful allocation.
///
/// Ids increase monotonically over the lifetime of a heap and are never
/// reused, even after the allocation is freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("#{_0}")]
pub struct AllocationId(NonZeroU64);

impl AllocationId {
    pub(crate) const FIRST: Self = Self(NonZeroU64::MIN);

    #[must_use]
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Returns the next id, or `None` once the id space is used up.
    pub(crate) fn successor(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

/// Reporting bucket for an allocation, by the number of units it occupies.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    derive_more::Display,
    derive_more::IsVariant,
)]
pub enum SizeClass {
    /// A single unit.
    #[display("small")]
    Small,
    /// Up to [`SizeClass::MEDIUM_MAX_UNITS`] units.
    #[display("medium")]
    Medium,
    /// More than [`SizeClass::MEDIUM_MAX_UNITS`] units.
    #[display("large")]
    Large,
}

impl SizeClass {
    /// Largest block, in units, still classified as [`SizeClass::Medium`].
    pub const MEDIUM_MAX_UNITS: usize = 16;

    #[must_use]
    pub fn of_units(units: usize) -> Self {
        match units {
            0 | 1 => Self::Small,
            2..=Self::MEDIUM_MAX_UNITS => Self::Medium,
            _ => Self::Large,
        }
    }
}

/// Bookkeeping stamped on a block when it is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationMeta {
    pub id: AllocationId,
    pub allocated_at: Instant,
    /// Bytes asked for by the caller; at most the block's byte size.
    pub requested_size: usize,
    pub size_class: SizeClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::IsVariant)]
pub(crate) enum BlockState {
    Free,
    Allocated(AllocationMeta),
}

impl BlockState {
    pub(crate) fn allocation(&self) -> Option<&AllocationMeta> {
        match self {
            Self::Free => None,
            Self::Allocated(meta) => Some(meta),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Record {
    /// First unit covered by this record.
    pub(crate) start: usize,
    pub(crate) units: usize,
    pub(crate) prev: Option<SlotId>,
    pub(crate) next: Option<SlotId>,
    pub(crate) state: BlockState,
}

impl Record {
    pub(crate) fn new(start: usize, units: usize, state: BlockState) -> Self {
        Self {
            start,
            units,
            prev: None,
            next: None,
            state,
        }
    }

    pub(crate) fn end(&self) -> usize {
        self.start + self.units
    }

    pub(crate) fn is_free(&self) -> bool {
        self.state.is_free()
    }
}

pub(crate) struct Ledger {
    slots: Vec<Option<Record>>,
    vacant: Vec<SlotId>,
    head: SlotId,
    unit_count: usize,
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|(_, record)| record))
            .finish()
    }
}

impl Ledger {
    /// Creates a ledger holding one free record that spans all `unit_count`
    /// units.
    pub(crate) fn new(unit_count: usize) -> Self {
        assert!(unit_count > 0, "ledger must cover at least one unit");
        Self {
            slots: vec![Some(Record::new(0, unit_count, BlockState::Free))],
            vacant: Vec::new(),
            head: SlotId(0),
            unit_count,
        }
    }

    pub(crate) fn unit_count(&self) -> usize {
        self.unit_count
    }

    pub(crate) fn head(&self) -> SlotId {
        self.head
    }

    pub(crate) fn set_head(&mut self, slot: SlotId) {
        self.head = slot;
    }

    #[track_caller]
    pub(crate) fn record(&self, slot: SlotId) -> &Record {
        match self.slots.get(slot.0) {
            Some(Some(record)) => record,
            _ => panic!("{slot} is not a live ledger record"),
        }
    }

    #[track_caller]
    pub(crate) fn record_mut(&mut self, slot: SlotId) -> &mut Record {
        match self.slots.get_mut(slot.0) {
            Some(Some(record)) => record,
            _ => panic!("{slot} is not a live ledger record"),
        }
    }

    /// Stores `record` in a vacant slot without linking it into the chain.
    pub(crate) fn alloc_slot(&mut self, record: Record) -> SlotId {
        if let Some(slot) = self.vacant.pop() {
            self.slots[slot.0] = Some(record);
            return slot;
        }
        self.slots.push(Some(record));
        SlotId(self.slots.len() - 1)
    }

    /// Drops the record in `slot`. The caller must have unlinked it.
    pub(crate) fn release_slot(&mut self, slot: SlotId) {
        let released = self.slots[slot.0].take();
        assert!(released.is_some(), "{slot} released twice");
        self.vacant.push(slot);
    }

    /// Links a new record directly after `slot`.
    pub(crate) fn insert_after(&mut self, slot: SlotId, mut record: Record) -> SlotId {
        let next = self.record(slot).next;
        record.prev = Some(slot);
        record.next = next;
        let new_slot = self.alloc_slot(record);
        self.record_mut(slot).next = Some(new_slot);
        if let Some(next) = next {
            self.record_mut(next).prev = Some(new_slot);
        }
        new_slot
    }

    /// Unlinks `slot` from the chain and releases it.
    ///
    /// The head record is never removed this way; merges always fold a record
    /// into its predecessor.
    pub(crate) fn remove(&mut self, slot: SlotId) {
        let Record { prev, next, .. } = *self.record(slot);
        let prev = prev.unwrap_or_else(|| panic!("cannot remove head record {slot}"));
        self.record_mut(prev).next = next;
        if let Some(next) = next {
            self.record_mut(next).prev = Some(prev);
        }
        self.release_slot(slot);
    }

    /// Iterates over records in address order.
    pub(crate) fn iter(&self) -> Iter<'_> {
        Iter {
            ledger: self,
            cursor: Some(self.head),
        }
    }

    /// Returns the record that starts exactly at `unit`.
    pub(crate) fn find_start(&self, unit: usize) -> Option<SlotId> {
        self.iter()
            .take_while(|(_, record)| record.start <= unit)
            .find(|(_, record)| record.start == unit)
            .map(|(slot, _)| slot)
    }

    pub(crate) fn free_units(&self) -> usize {
        self.iter()
            .filter(|(_, record)| record.is_free())
            .map(|(_, record)| record.units)
            .sum()
    }

    pub(crate) fn largest_free_units(&self) -> usize {
        self.iter()
            .filter(|(_, record)| record.is_free())
            .map(|(_, record)| record.units)
            .max()
            .unwrap_or(0)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.vacant.len()
    }

    /// Walks the chain and checks that it tiles `0..unit_count` exactly.
    pub(crate) fn check_invariants(&self) -> Result<(), HeapError> {
        let mut expected_start = 0;
        let mut expected_prev = None;
        let mut seen = 0;
        for (slot, record) in self.iter() {
            ensure!(
                seen < self.len(),
                LedgerInvariantViolationSnafu {
                    detail: format!("chain longer than {} live records", self.len()),
                }
            );
            ensure!(
                record.start == expected_start,
                LedgerInvariantViolationSnafu {
                    detail: format!(
                        "{slot} starts at unit {}, expected {expected_start}",
                        record.start
                    ),
                }
            );
            ensure!(
                record.units > 0,
                LedgerInvariantViolationSnafu {
                    detail: format!("{slot} is empty"),
                }
            );
            ensure!(
                record.prev == expected_prev,
                LedgerInvariantViolationSnafu {
                    detail: format!("{slot} has a broken back link"),
                }
            );
            if let BlockState::Allocated(meta) = &record.state {
                ensure!(
                    meta.requested_size > 0,
                    LedgerInvariantViolationSnafu {
                        detail: format!("{slot} is allocated for zero bytes"),
                    }
                );
            }
            expected_start = record.end();
            expected_prev = Some(slot);
            seen += 1;
        }
        ensure!(
            expected_start == self.unit_count,
            LedgerInvariantViolationSnafu {
                detail: format!(
                    "records cover {expected_start} units, arena has {}",
                    self.unit_count
                ),
            }
        );
        ensure!(
            seen == self.len(),
            LedgerInvariantViolationSnafu {
                detail: format!("{} live records are not linked", self.len() - seen),
            }
        );
        Ok(())
    }
}

pub(crate) struct Iter<'a> {
    ledger: &'a Ledger,
    cursor: Option<SlotId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (SlotId, &'a Record);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor?;
        let record = self.ledger.record(slot);
        self.cursor = record.next;
        Some((slot, record))
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn allocated(id: u64, units: usize) -> BlockState {
        BlockState::Allocated(AllocationMeta {
            id: AllocationId(NonZeroU64::new(id).unwrap()),
            allocated_at: Instant::now(),
            requested_size: 1,
            size_class: SizeClass::of_units(units),
        })
    }

    /// Builds a ledger whose records have the given sizes and free flags.
    pub(crate) fn ledger_of(layout: &[(usize, bool)]) -> Ledger {
        let unit_count = layout.iter().map(|&(units, _)| units).sum();
        let mut ledger = Ledger::new(unit_count);
        let mut slot = ledger.head();
        let mut start = 0;
        for (i, &(units, free)) in layout.iter().enumerate() {
            let state = if free {
                BlockState::Free
            } else {
                allocated(u64::try_from(i).unwrap() + 1, units)
            };
            if i == 0 {
                let head = ledger.record_mut(slot);
                head.units = units;
                head.state = state;
            } else {
                slot = ledger.insert_after(slot, Record::new(start, units, state));
            }
            start += units;
        }
        ledger.check_invariants().unwrap();
        ledger
    }

    pub(crate) fn shape(ledger: &Ledger) -> Vec<(usize, usize, bool)> {
        ledger
            .iter()
            .map(|(_, r)| (r.start, r.units, r.is_free()))
            .collect()
    }

    #[test]
    fn new_ledger_spans_arena() {
        let ledger = Ledger::new(16);
        assert_eq!(shape(&ledger), [(0, 16, true)]);
        assert_eq!(ledger.free_units(), 16);
        assert_eq!(ledger.largest_free_units(), 16);
        ledger.check_invariants().unwrap();
    }

    #[test]
    fn find_start_only_matches_record_starts() {
        let ledger = ledger_of(&[(3, false), (2, true), (3, false)]);
        assert!(ledger.find_start(0).is_some());
        assert!(ledger.find_start(3).is_some());
        assert!(ledger.find_start(5).is_some());
        assert!(ledger.find_start(1).is_none());
        assert!(ledger.find_start(8).is_none());
    }

    #[test]
    fn remove_relinks_and_recycles_slot() {
        let mut ledger = ledger_of(&[(2, false), (2, true), (4, false)]);
        let second = ledger.find_start(2).unwrap();
        ledger.record_mut(ledger.head()).units = 4;
        ledger.remove(second);
        assert_eq!(shape(&ledger), [(0, 4, false), (4, 4, false)]);
        ledger.check_invariants().unwrap();

        let head = ledger.head();
        ledger.record_mut(head).units = 1;
        let reused = ledger.insert_after(head, Record::new(1, 3, BlockState::Free));
        assert_eq!(reused, second);
        ledger.check_invariants().unwrap();
    }

    #[test]
    fn detects_gap() {
        let mut ledger = ledger_of(&[(2, false), (2, true)]);
        let second = ledger.find_start(2).unwrap();
        ledger.record_mut(second).start = 3;
        assert!(matches!(
            ledger.check_invariants(),
            Err(HeapError::LedgerInvariantViolation { .. })
        ));
    }

    #[test]
    fn detects_short_cover() {
        let mut ledger = ledger_of(&[(2, false), (2, true)]);
        let second = ledger.find_start(2).unwrap();
        ledger.record_mut(second).units = 1;
        assert!(ledger.check_invariants().is_err());
    }

    #[test]
    fn allocation_ids_end_instead_of_repeating() {
        assert_eq!(AllocationId::FIRST.successor().map(AllocationId::get), Some(2));
        let last = AllocationId(NonZeroU64::MAX);
        assert_eq!(last.successor(), None);
    }
}
