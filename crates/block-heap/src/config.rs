use snafu::ensure;

use crate::{
    Strategy,
    error::{CapacityNotMultipleOfUnitSnafu, ConfigError, ZeroCapacitySnafu, ZeroUnitSizeSnafu},
};

/// Default allocation unit, in bytes.
pub const DEFAULT_UNIT_BYTES: usize = 1024;

/// Default number of units in the arena.
pub const DEFAULT_UNIT_COUNT: usize = 2048;

/// Default arena capacity (2 MiB), in bytes.
pub const DEFAULT_CAPACITY_BYTES: usize = DEFAULT_UNIT_BYTES * DEFAULT_UNIT_COUNT;

/// Parameters fixed for the lifetime of a [`Heap`](crate::Heap).
///
/// # Examples
///
/// ```
/// use block_heap::{HeapConfig, Strategy};
///
/// let config = HeapConfig::new(8 * 64, 64).with_strategy(Strategy::BestFit);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.unit_count(), 8);
///
/// assert!(HeapConfig::new(100, 64).validate().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Total size of the arena in bytes.
    pub capacity_bytes: usize,
    /// Allocation granularity in bytes.
    pub unit_bytes: usize,
    /// Placement strategy used until changed with
    /// [`Heap::set_strategy`](crate::Heap::set_strategy).
    pub strategy: Strategy,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY_BYTES, DEFAULT_UNIT_BYTES)
    }
}

impl HeapConfig {
    #[must_use]
    pub const fn new(capacity_bytes: usize, unit_bytes: usize) -> Self {
        Self {
            capacity_bytes,
            unit_bytes,
            strategy: Strategy::FirstFit,
        }
    }

    #[must_use]
    pub const fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Returns the number of units in the arena.
    ///
    /// Only meaningful for a configuration that passes [`Self::validate`].
    #[must_use]
    pub const fn unit_count(&self) -> usize {
        match self.capacity_bytes.checked_div(self.unit_bytes) {
            Some(count) => count,
            None => 0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(self.unit_bytes > 0, ZeroUnitSizeSnafu);
        ensure!(self.capacity_bytes > 0, ZeroCapacitySnafu);
        ensure!(
            self.capacity_bytes.is_multiple_of(self.unit_bytes),
            CapacityNotMultipleOfUnitSnafu {
                capacity: self.capacity_bytes,
                unit: self.unit_bytes,
            }
        );
        Ok(())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_two_mebibytes_of_kilobyte_units() {
        let config = HeapConfig::default();
        assert_eq!(config.capacity_bytes, 2 * 1024 * 1024);
        assert_eq!(config.unit_count(), 2048);
        assert_eq!(config.strategy, Strategy::FirstFit);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_bad_geometry() {
        assert!(matches!(
            HeapConfig::new(1024, 0).validate(),
            Err(ConfigError::ZeroUnitSize { .. })
        ));
        assert!(matches!(
            HeapConfig::new(0, 16).validate(),
            Err(ConfigError::ZeroCapacity { .. })
        ));
        assert!(matches!(
            HeapConfig::new(100, 16).validate(),
            Err(ConfigError::CapacityNotMultipleOfUnit {
                capacity: 100,
                unit: 16,
                ..
            })
        ));
    }

    #[test]
    fn unit_count_of_zero_unit_is_zero() {
        assert_eq!(HeapConfig::new(1024, 0).unit_count(), 0);
    }
}
