//! Sliding compaction.
//!
//! Allocated records are slid towards the start of the arena in address
//! order, and all free space is gathered into one trailing free record.
//!
//! ```text
//! before:  [ A ][ free ][ B ][ free ][ C ][ free ]
//! after:   [ A ][ B ][ C ][         free          ]
//! ```

use tracing::trace;

use crate::{
    AllocationId,
    arena::Arena,
    ledger::{BlockState, Ledger, Record, SlotId},
};

/// One allocated record that changed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Move {
    pub(crate) id: AllocationId,
    pub(crate) from: usize,
    pub(crate) to: usize,
}

/// Compacts `ledger`, moving payload bytes in `arena` along with the records.
///
/// Returns the moves in address order. Records that were already in place
/// are not reported.
pub(crate) fn compact(ledger: &mut Ledger, arena: &mut Arena) -> Vec<Move> {
    let mut moves = Vec::new();
    let mut stale_free = Vec::new();
    let mut frontier = 0;
    let mut last_allocated: Option<SlotId> = None;

    let mut cursor = Some(ledger.head());
    while let Some(slot) = cursor {
        let record = ledger.record(slot);
        cursor = record.next;

        let BlockState::Allocated(meta) = record.state else {
            stale_free.push(slot);
            continue;
        };
        let (start, units) = (record.start, record.units);

        if start != frontier {
            trace!(id = %meta.id, from = start, to = frontier, units, "relocating block");
            arena.relocate(start, frontier, units);
            moves.push(Move {
                id: meta.id,
                from: start,
                to: frontier,
            });
        }

        let record = ledger.record_mut(slot);
        record.start = frontier;
        record.prev = last_allocated;
        match last_allocated {
            Some(prev) => ledger.record_mut(prev).next = Some(slot),
            None => ledger.set_head(slot),
        }
        frontier += units;
        last_allocated = Some(slot);
    }

    for slot in stale_free {
        ledger.release_slot(slot);
    }

    let unit_count = ledger.unit_count();
    let tail = (frontier < unit_count).then(|| {
        let mut tail = Record::new(frontier, unit_count - frontier, BlockState::Free);
        tail.prev = last_allocated;
        ledger.alloc_slot(tail)
    });
    match (last_allocated, tail) {
        (Some(last), tail) => ledger.record_mut(last).next = tail,
        (None, Some(tail)) => ledger.set_head(tail),
        (None, None) => unreachable!("ledger with neither allocated nor free records"),
    }

    moves
}
