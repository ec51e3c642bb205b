//! Terminal rendering of heap state.

use std::fmt;

use ansi_term::{Color, WithFg};
use block_heap::{BlockInfo, Heap};

fn status(block: &BlockInfo) -> WithFg<&'static str> {
    if block.is_free() {
        WithFg::new(Color::Green, "free")
    } else {
        WithFg::new(Color::Yellow, "allocated")
    }
}

/// Every block of a heap in address order, one row each.
pub(crate) struct StateTable<'a>(pub(crate) &'a Heap);

impl fmt::Display for StateTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let heap = self.0;
        writeln!(
            f,
            "{:>10} {:>6} {:>10}  {:<9} {:>6} {:>10}  class",
            "offset", "units", "bytes", "status", "id", "requested"
        )?;
        for block in heap.blocks() {
            write!(
                f,
                "{:>10} {:>6} {:>10}  {:<9}",
                format!("{:#x}", block.offset),
                block.units,
                block.size_bytes,
                status(&block)
            )?;
            match block.allocation {
                Some(meta) => writeln!(
                    f,
                    " {:>6} {:>10}  {}",
                    meta.id.to_string(),
                    meta.requested_size,
                    meta.size_class
                )?,
                None => writeln!(f)?,
            }
        }
        writeln!(
            f,
            "{} blocks, {} bytes free, largest free block {} bytes",
            heap.blocks().count(),
            WithFg::new(Color::Cyan, heap.free_bytes()),
            WithFg::new(Color::Cyan, heap.largest_free_block())
        )
    }
}

/// Usage counters of a heap.
pub(crate) struct StatsView<'a>(pub(crate) &'a Heap);

impl fmt::Display for StatsView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let heap = self.0;
        let stats = heap.stats();
        let rows: [(&str, &dyn fmt::Display); 10] = [
            ("strategy", &heap.strategy()),
            ("capacity", &heap.capacity()),
            ("allocated bytes", &stats.total_allocated_bytes),
            ("requested bytes", &stats.requested_bytes),
            ("peak usage", &stats.peak_usage_bytes),
            ("allocations", &stats.allocation_count),
            ("live allocations", &stats.live_allocations),
            ("failed allocations", &stats.failed_allocations),
            ("compactions", &stats.compactions),
            ("free bytes", &heap.free_bytes()),
        ];
        for (name, value) in rows {
            writeln!(f, "{:<20}{}", WithFg::new(Color::DarkGray, name), value)?;
        }
        Ok(())
    }
}

/// One block found by a lookup.
pub(crate) struct BlockView(pub(crate) BlockInfo);

impl fmt::Display for BlockView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let block = &self.0;
        write!(
            f,
            "block at {:#x}: {} units, {} bytes, {}",
            block.offset,
            block.units,
            block.size_bytes,
            status(block)
        )?;
        if let Some(meta) = block.allocation {
            write!(
                f,
                " {} ({} requested, {}, age {:?})",
                meta.id,
                meta.requested_size,
                meta.size_class,
                meta.allocated_at.elapsed()
            )?;
        }
        Ok(())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use block_heap::Strategy;

    use super::*;

    fn heap() -> Heap {
        ansi_term::set_enabled(false);
        let mut heap = Heap::init(4 * 16, 16).unwrap();
        let handle = heap.allocate(20).unwrap().unwrap();
        heap.free(handle).unwrap();
        heap
    }

    #[test]
    fn state_table_lists_blocks() {
        let mut heap = heap();
        let _handle = heap.allocate(20).unwrap().unwrap();
        let table = StateTable(&heap).to_string();
        let lines = table.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[1],
            "       0x0      2         32  allocated     #2         20  medium"
        );
        assert_eq!(lines[2], "      0x20      2         32  free     ");
        assert_eq!(
            lines[3],
            "2 blocks, 32 bytes free, largest free block 32 bytes"
        );
    }

    #[test]
    fn stats_view_lists_counters() {
        let mut heap = heap();
        heap.set_strategy(Strategy::BuddyFit);
        let text = StatsView(&heap).to_string();
        assert!(text.starts_with("strategy            buddy-fit\n"));
        assert!(text.contains("allocations         1\n"));
        assert!(text.contains("free bytes          64\n"));
    }

    #[test]
    fn block_view_describes_free_block() {
        let heap = heap();
        let block = heap.find_by_offset(0).unwrap();
        assert_eq!(
            BlockView(block).to_string(),
            "block at 0x0: 4 units, 64 bytes, free"
        );
    }
}
