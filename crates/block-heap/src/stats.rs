use core::fmt;
use std::time::Instant;

use crate::{AllocationId, SizeClass};

/// Usage counters of a heap.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes currently occupied by allocated blocks, whole units included.
    pub total_allocated_bytes: usize,
    /// Bytes currently requested by callers.
    pub requested_bytes: usize,
    /// Highest value `total_allocated_bytes` has reached.
    pub peak_usage_bytes: usize,
    /// Number of successful allocations so far, never decremented.
    pub allocation_count: u64,
    pub live_allocations: usize,
    pub failed_allocations: u64,
    pub compactions: u64,
}

impl HeapStats {
    pub(crate) fn record_allocation(&mut self, block_bytes: usize, requested: usize) {
        self.total_allocated_bytes += block_bytes;
        self.requested_bytes += requested;
        self.peak_usage_bytes = self.peak_usage_bytes.max(self.total_allocated_bytes);
        self.allocation_count += 1;
        self.live_allocations += 1;
    }

    pub(crate) fn record_free(&mut self, block_bytes: usize, requested: usize) {
        self.total_allocated_bytes -= block_bytes;
        self.requested_bytes -= requested;
        self.live_allocations -= 1;
    }
}

/// A block that is still allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakEntry {
    pub id: AllocationId,
    /// Byte offset of the block in the arena.
    pub offset: usize,
    pub block_bytes: usize,
    pub requested_size: usize,
    pub size_class: SizeClass,
    pub allocated_at: Instant,
}

/// Every allocated block of a heap, in address order.
///
/// An empty report means nothing leaked.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LeakReport {
    entries: Vec<LeakEntry>,
}

impl LeakReport {
    pub(crate) fn new(entries: Vec<LeakEntry>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn entries(&self) -> &[LeakEntry] {
        &self.entries
    }

    /// Total bytes held by leaked blocks.
    #[must_use]
    pub fn leaked_bytes(&self) -> usize {
        self.entries.iter().map(|entry| entry.block_bytes).sum()
    }
}

impl<'a> IntoIterator for &'a LeakReport {
    type Item = &'a LeakEntry;
    type IntoIter = core::slice::Iter<'a, LeakEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "no leaks detected");
        }
        for entry in self {
            writeln!(
                f,
                "leaked block {} at {:#x}: {} bytes ({} requested, {})",
                entry.id, entry.offset, entry.block_bytes, entry.requested_size, entry.size_class
            )?;
        }
        writeln!(
            f,
            "{} blocks, {} bytes leaked",
            self.len(),
            self.leaked_bytes()
        )
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_tracks_historical_maximum() {
        let mut stats = HeapStats::default();
        stats.record_allocation(256, 200);
        stats.record_allocation(128, 100);
        stats.record_free(256, 200);
        stats.record_allocation(64, 10);

        assert_eq!(stats.total_allocated_bytes, 192);
        assert_eq!(stats.requested_bytes, 110);
        assert_eq!(stats.peak_usage_bytes, 384);
        assert_eq!(stats.allocation_count, 3);
        assert_eq!(stats.live_allocations, 2);
    }

    #[test]
    fn empty_report_display() {
        assert_eq!(LeakReport::default().to_string(), "no leaks detected\n");
    }

    #[test]
    fn report_display_lists_blocks() {
        let report = LeakReport::new(vec![LeakEntry {
            id: AllocationId::FIRST,
            offset: 0x400,
            block_bytes: 2048,
            requested_size: 1500,
            size_class: SizeClass::Medium,
            allocated_at: Instant::now(),
        }]);
        assert_eq!(
            report.to_string(),
            "leaked block #1 at 0x400: 2048 bytes (1500 requested, medium)\n\
             1 blocks, 2048 bytes leaked\n"
        );
    }
}
