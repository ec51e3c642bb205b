use core::fmt;

/// Opaque reference to an allocated block.
///
/// A handle names the unit a block starts at together with the generation of
/// that unit when the handle was issued. Allocating a new block at a unit, or
/// moving a block to or away from it during compaction, bumps the generation,
/// so a handle kept past either event is detected as stale instead of
/// silently aliasing another block. Freeing leaves the generation alone, which
/// lets a repeated free of the same handle be told apart as a double free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    unit: usize,
    generation: u32,
}

impl Handle {
    pub(crate) const fn new(unit: usize, generation: u32) -> Self {
        Self { unit, generation }
    }

    /// Index of the first unit of the block.
    #[must_use]
    pub const fn unit_index(self) -> usize {
        self.unit
    }

    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit {}/gen {}", self.unit, self.generation)
    }
}

/// Per-unit generation counters.
#[derive(Debug)]
pub(crate) struct Generations(Box<[u32]>);

impl Generations {
    pub(crate) fn new(unit_count: usize) -> Self {
        Self(vec![0; unit_count].into_boxed_slice())
    }

    pub(crate) fn current(&self, unit: usize) -> u32 {
        self.0[unit]
    }

    pub(crate) fn issue(&self, unit: usize) -> Handle {
        Handle::new(unit, self.current(unit))
    }

    pub(crate) fn bump(&mut self, unit: usize) {
        self.0[unit] = self.0[unit].wrapping_add(1);
    }

    /// Starts a new generation at `unit` and returns its handle.
    pub(crate) fn renew(&mut self, unit: usize) -> Handle {
        self.bump(unit);
        self.issue(unit)
    }
}
