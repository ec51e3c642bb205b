use std::time::Instant;

use snafu::{OptionExt as _, ensure};
use tracing::{debug, error, info, trace, warn};

use crate::{
    AllocationId, AllocationMeta, HeapConfig, SizeClass, Strategy,
    arena::Arena,
    compact,
    error::{
        AllocationFailedSnafu, ConfigError, DoubleFreeSnafu, FailureReason, HeapError,
        InvalidPointerSnafu, LedgerInvariantViolationSnafu, StaleHandleSnafu,
    },
    handle::{Generations, Handle},
    ledger::{BlockState, Ledger, Record, SlotId},
    stats::{HeapStats, LeakEntry, LeakReport},
};

/// Snapshot of one ledger record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Byte offset of the block in the arena.
    pub offset: usize,
    pub units: usize,
    pub size_bytes: usize,
    /// `None` if and only if the block is free.
    pub allocation: Option<AllocationMeta>,
    /// Current handle of an allocated block.
    pub handle: Option<Handle>,
}

impl BlockInfo {
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.allocation.is_none()
    }
}

/// A block moved by compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub id: AllocationId,
    /// Handle the block had before compaction; it is stale afterwards.
    pub from: Handle,
    pub to: Handle,
}

/// Outcome of [`Heap::compact`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub relocations: Vec<Relocation>,
    /// Size of the single trailing free block, in bytes.
    pub free_bytes: usize,
}

/// A fixed-capacity simulated heap.
///
/// The heap owns an arena of `capacity` bytes cut into equal units, and a
/// ledger of records that tiles the arena. Allocation picks a free record with
/// the active [`Strategy`], splits off the unused tail and stamps the record
/// with a fresh [`AllocationId`]. When fragmentation is the only reason a
/// request cannot be placed, the heap compacts once and retries.
///
/// # Stale handles
///
/// Compaction moves allocated blocks. Every handle issued for a moved block
/// becomes stale, and so does the handle of a freed block once its unit is
/// allocated again. Stale handles are rejected with
/// [`HeapError::StaleHandle`]; use the relocations returned by
/// [`Heap::compact`] or [`Heap::handle_of`] to obtain current handles.
///
/// # Examples
///
/// ```
/// use block_heap::{Heap, HeapError, Strategy};
///
/// let mut heap = Heap::init(8 * 16, 16).unwrap();
/// heap.set_strategy(Strategy::BestFit);
///
/// let handle = heap.allocate(40).unwrap().unwrap();
/// heap.payload_mut(handle).unwrap().copy_from_slice(&[7; 40]);
/// assert_eq!(heap.stats().total_allocated_bytes, 48);
///
/// heap.free(handle).unwrap();
/// assert!(matches!(heap.free(handle), Err(HeapError::DoubleFree { .. })));
/// assert!(heap.leak_report().is_empty());
/// ```
#[derive(Debug)]
pub struct Heap {
    arena: Arena,
    ledger: Ledger,
    generations: Generations,
    strategy: Strategy,
    next_id: Option<AllocationId>,
    stats: HeapStats,
    leaks_reported: bool,
}

impl Heap {
    /// Creates a heap whose whole arena is one free block.
    pub fn new(config: HeapConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let unit_count = config.unit_count();
        debug!(
            capacity = config.capacity_bytes,
            unit = config.unit_bytes,
            strategy = %config.strategy,
            "heap initialized"
        );
        Ok(Self {
            arena: Arena::new(unit_count, config.unit_bytes),
            ledger: Ledger::new(unit_count),
            generations: Generations::new(unit_count),
            strategy: config.strategy,
            next_id: Some(AllocationId::FIRST),
            stats: HeapStats::default(),
            leaks_reported: false,
        })
    }

    /// Creates a first-fit heap of `capacity_bytes` bytes in units of
    /// `unit_bytes` bytes.
    pub fn init(capacity_bytes: usize, unit_bytes: usize) -> Result<Self, ConfigError> {
        Self::new(HeapConfig::new(capacity_bytes, unit_bytes))
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    #[must_use]
    pub fn unit_bytes(&self) -> usize {
        self.arena.unit_bytes()
    }

    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.ledger.unit_count()
    }

    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: Strategy) {
        debug!(from = %self.strategy, to = %strategy, "strategy changed");
        self.strategy = strategy;
    }

    /// Allocates a block of at least `size` bytes.
    ///
    /// Returns `Ok(None)` for a zero-size request, which leaves the heap
    /// untouched. A request larger than the free space fails at once; a
    /// request that fits in the free space but not in any single free block
    /// triggers one compaction and one retry.
    pub fn allocate(&mut self, size: usize) -> Result<Option<Handle>, HeapError> {
        if size == 0 {
            trace!("zero-size allocation ignored");
            return Ok(None);
        }
        match self.try_allocate(size) {
            Ok(handle) => Ok(Some(handle)),
            Err(err) => {
                self.stats.failed_allocations += 1;
                debug!(size, %err, "allocation failed");
                Err(err)
            }
        }
    }

    fn try_allocate(&mut self, size: usize) -> Result<Handle, HeapError> {
        let id = self.next_id.context(LedgerInvariantViolationSnafu {
            detail: "allocation ids exhausted",
        })?;
        let units = size.div_ceil(self.unit_bytes());
        let footprint = self
            .strategy
            .footprint(units)
            .filter(|&footprint| footprint <= self.unit_count())
            .context(AllocationFailedSnafu {
                size,
                reason: FailureReason::ExceedsCapacity,
            })?;
        let free_units = self.ledger.free_units();
        ensure!(
            footprint <= free_units,
            AllocationFailedSnafu {
                size,
                reason: FailureReason::Exhausted,
            }
        );

        let slot = match self.strategy.select(&self.ledger, units) {
            Some(slot) => slot,
            None => {
                debug!(size, footprint, free_units, "no free block fits, compacting");
                self.compact();
                self.strategy
                    .select(&self.ledger, units)
                    .context(AllocationFailedSnafu {
                        size,
                        reason: FailureReason::Fragmented,
                    })?
            }
        };

        self.strategy.carve(&mut self.ledger, slot, units)?;
        Ok(self.stamp(slot, size, id))
    }

    fn stamp(&mut self, slot: SlotId, size: usize, id: AllocationId) -> Handle {
        self.next_id = id.successor();

        let unit_bytes = self.unit_bytes();
        let record = self.ledger.record_mut(slot);
        record.state = BlockState::Allocated(AllocationMeta {
            id,
            allocated_at: Instant::now(),
            requested_size: size,
            size_class: SizeClass::of_units(record.units),
        });
        let (start, block_bytes) = (record.start, record.units * unit_bytes);

        self.stats.record_allocation(block_bytes, size);
        let handle = self.generations.renew(start);
        debug!(%id, size, offset = self.arena.offset_of(start), block_bytes, "allocated");
        handle
    }

    /// Frees the block referenced by `handle`.
    ///
    /// Passing `None` is a no-op. The freed block is merged with the block
    /// right after it if that one is free too.
    pub fn free(&mut self, handle: impl Into<Option<Handle>>) -> Result<(), HeapError> {
        let Some(handle) = handle.into() else {
            return Ok(());
        };
        let unit = handle.unit_index();
        let offset = self.arena.offset_of(unit);

        let Some(slot) = self.ledger.find_start(unit) else {
            warn!(offset, "free of unknown pointer");
            return InvalidPointerSnafu { offset }.fail();
        };
        if self.generations.current(unit) != handle.generation() {
            warn!(offset, generation = handle.generation(), "free of stale handle");
            return StaleHandleSnafu {
                offset,
                generation: handle.generation(),
            }
            .fail();
        }
        let record = self.ledger.record(slot);
        let BlockState::Allocated(meta) = record.state else {
            warn!(offset, "double free");
            return DoubleFreeSnafu { offset }.fail();
        };

        let block_bytes = record.units * self.unit_bytes();
        self.ledger.record_mut(slot).state = BlockState::Free;
        self.stats.record_free(block_bytes, meta.requested_size);
        let merged = self.ledger.merge_with_next(slot);
        debug!(id = %meta.id, offset, block_bytes, merged, "freed");
        Ok(())
    }

    /// Merges all adjacent free blocks.
    ///
    /// Returns the number of merges; zero means the ledger was already fully
    /// coalesced.
    pub fn defragment(&mut self) -> usize {
        let merges = self.ledger.coalesce();
        debug!(merges, "defragmented");
        merges
    }

    /// Slides every allocated block towards the start of the arena so that
    /// all free space forms one trailing block.
    ///
    /// Handles of moved blocks become stale; the report maps each of them to
    /// its replacement.
    pub fn compact(&mut self) -> CompactionReport {
        let moves = compact::compact(&mut self.ledger, &mut self.arena);
        let relocations = moves
            .into_iter()
            .map(|mv| {
                let from = self.generations.issue(mv.from);
                self.generations.bump(mv.from);
                self.generations.bump(mv.to);
                Relocation {
                    id: mv.id,
                    from,
                    to: self.generations.issue(mv.to),
                }
            })
            .collect::<Vec<_>>();
        let free_bytes = self.free_bytes();
        self.stats.compactions += 1;
        info!(moved = relocations.len(), free_bytes, "compacted");
        CompactionReport {
            relocations,
            free_bytes,
        }
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    /// Total free bytes, regardless of fragmentation.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.ledger.free_units() * self.unit_bytes()
    }

    /// Size in bytes of the largest free block.
    #[must_use]
    pub fn largest_free_block(&self) -> usize {
        self.ledger.largest_free_units() * self.unit_bytes()
    }

    /// Iterates over all blocks in address order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.ledger.iter().map(|(_, record)| self.info(record))
    }

    /// Looks up the block a handle refers to.
    ///
    /// Returns `None` if no block starts at the handle's unit, or if the handle
    /// is stale. The handle of a freed block finds the free block it left.
    #[must_use]
    pub fn find(&self, handle: Handle) -> Option<BlockInfo> {
        let unit = handle.unit_index();
        let record = self.ledger.record(self.ledger.find_start(unit)?);
        if self.generations.current(unit) != handle.generation() {
            return None;
        }
        Some(self.info(record))
    }

    /// Looks up the block starting at byte `offset`.
    #[must_use]
    pub fn find_by_offset(&self, offset: usize) -> Option<BlockInfo> {
        if !offset.is_multiple_of(self.unit_bytes()) {
            return None;
        }
        let slot = self.ledger.find_start(offset / self.unit_bytes())?;
        Some(self.info(self.ledger.record(slot)))
    }

    /// Returns the current handle of a live allocation.
    #[must_use]
    pub fn handle_of(&self, id: AllocationId) -> Option<Handle> {
        self.ledger
            .iter()
            .find(|(_, record)| record.state.allocation().is_some_and(|meta| meta.id == id))
            .map(|(_, record)| self.generations.issue(record.start))
    }

    /// Lists every block that is still allocated.
    #[must_use]
    pub fn leak_report(&self) -> LeakReport {
        let entries = self
            .ledger
            .iter()
            .filter_map(|(_, record)| {
                let meta = record.state.allocation()?;
                Some(LeakEntry {
                    id: meta.id,
                    offset: self.arena.offset_of(record.start),
                    block_bytes: record.units * self.unit_bytes(),
                    requested_size: meta.requested_size,
                    size_class: meta.size_class,
                    allocated_at: meta.allocated_at,
                })
            })
            .collect();
        LeakReport::new(entries)
    }

    /// Consumes the heap and returns its final leak report.
    ///
    /// The caller takes over reporting, so the teardown warnings are skipped.
    #[must_use]
    pub fn finish(mut self) -> LeakReport {
        self.leaks_reported = true;
        self.leak_report()
    }

    /// Borrows the requested bytes of a live block.
    pub fn payload(&self, handle: Handle) -> Result<&[u8], HeapError> {
        let (record, meta) = self.resolve(handle)?;
        Ok(&self.arena.bytes(record.start, record.units)[..meta.requested_size])
    }

    /// Mutably borrows the requested bytes of a live block.
    pub fn payload_mut(&mut self, handle: Handle) -> Result<&mut [u8], HeapError> {
        let (start, units, requested) = {
            let (record, meta) = self.resolve(handle)?;
            (record.start, record.units, meta.requested_size)
        };
        Ok(&mut self.arena.bytes_mut(start, units)[..requested])
    }

    /// Checks the ledger structure and that the usage counters agree with it.
    pub fn check_invariants(&self) -> Result<(), HeapError> {
        let result = self.check_invariants_inner();
        if let Err(err) = &result {
            error!(%err, "heap invariant violated");
        }
        result
    }

    fn check_invariants_inner(&self) -> Result<(), HeapError> {
        self.ledger.check_invariants()?;
        let (allocated_bytes, requested_bytes, live) = self
            .ledger
            .iter()
            .filter_map(|(_, record)| Some((record, record.state.allocation()?)))
            .fold((0, 0, 0), |(bytes, requested, live), (record, meta)| {
                (
                    bytes + record.units * self.unit_bytes(),
                    requested + meta.requested_size,
                    live + 1,
                )
            });
        ensure!(
            allocated_bytes == self.stats.total_allocated_bytes
                && requested_bytes == self.stats.requested_bytes
                && live == self.stats.live_allocations,
            LedgerInvariantViolationSnafu {
                detail: format!(
                    "ledger holds {live} blocks / {allocated_bytes} bytes, stats say {} / {}",
                    self.stats.live_allocations, self.stats.total_allocated_bytes
                ),
            }
        );
        Ok(())
    }

    fn resolve(&self, handle: Handle) -> Result<(&Record, &AllocationMeta), HeapError> {
        let unit = handle.unit_index();
        let offset = self.arena.offset_of(unit);
        let slot = self
            .ledger
            .find_start(unit)
            .context(InvalidPointerSnafu { offset })?;
        let record = self.ledger.record(slot);
        let meta = record
            .state
            .allocation()
            .filter(|_| self.generations.current(unit) == handle.generation())
            .context(StaleHandleSnafu {
                offset,
                generation: handle.generation(),
            })?;
        Ok((record, meta))
    }

    fn info(&self, record: &Record) -> BlockInfo {
        let allocation = record.state.allocation().copied();
        BlockInfo {
            offset: self.arena.offset_of(record.start),
            units: record.units,
            size_bytes: record.units * self.unit_bytes(),
            allocation,
            handle: allocation.map(|_| self.generations.issue(record.start)),
        }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        if self.leaks_reported {
            return;
        }
        let report = self.leak_report();
        for entry in &report {
            warn!(
                id = %entry.id,
                offset = entry.offset,
                bytes = entry.block_bytes,
                "block still allocated at heap teardown"
            );
        }
    }
}
