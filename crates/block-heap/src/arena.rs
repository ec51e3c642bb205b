//! The byte buffer backing a heap.
//!
//! The arena knows nothing about blocks. It is addressed in units of
//! `unit_bytes`, and the ledger decides which unit ranges are in use.

use core::ops::Range;

#[derive(derive_more::Debug)]
pub(crate) struct Arena {
    #[debug("[u8; {}]", bytes.len())]
    bytes: Box<[u8]>,
    unit_bytes: usize,
}

impl Arena {
    /// Creates a zero-filled arena of `unit_count` units.
    pub(crate) fn new(unit_count: usize, unit_bytes: usize) -> Self {
        assert!(unit_bytes > 0, "unit size must be greater than zero");
        Self {
            bytes: vec![0; unit_count * unit_bytes].into_boxed_slice(),
            unit_bytes,
        }
    }

    pub(crate) fn unit_bytes(&self) -> usize {
        self.unit_bytes
    }

    pub(crate) fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Converts a unit index into a byte offset.
    pub(crate) fn offset_of(&self, unit: usize) -> usize {
        unit * self.unit_bytes
    }

    fn span(&self, start: usize, units: usize) -> Range<usize> {
        let start = self.offset_of(start);
        start..start + units * self.unit_bytes
    }

    pub(crate) fn bytes(&self, start: usize, units: usize) -> &[u8] {
        &self.bytes[self.span(start, units)]
    }

    pub(crate) fn bytes_mut(&mut self, start: usize, units: usize) -> &mut [u8] {
        let span = self.span(start, units);
        &mut self.bytes[span]
    }

    /// Moves the contents of `units` units starting at `from` so that they
    /// start at `to`. The ranges may overlap.
    pub(crate) fn relocate(&mut self, from: usize, to: usize, units: usize) {
        let src = self.span(from, units);
        let dest = self.offset_of(to);
        self.bytes.copy_within(src, dest);
    }
}
