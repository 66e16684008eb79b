//! Region allocation.
//!
//! An [`Arena`] owns a chain of system-allocated blocks and serves typed
//! allocations by bumping a cursor through the newest block. Individual
//! allocations are never freed; the arena is reclaimed wholesale with
//! [`Arena::clear`] (all but the head block) or [`Arena::free`] (everything).
//!
//! Basic usage:
//!
//! ```
//! use strata_memory::Arena;
//!
//! let arena = Arena::new();
//! let value = arena.alloc(42u32);
//! assert_eq!(*value, 42);
//!
//! let greeting = arena.alloc_str("hello");
//! assert_eq!(greeting, "hello");
//! ```

mod block;
#[allow(clippy::module_inception)]
mod arena;
pub(crate) mod fmt;
mod stats;

pub use self::arena::Arena;
pub use self::stats::ArenaFootprint;

use crate::error::{MemoryError, MemoryResult};

/// Arena construction knobs.
///
/// The defaults match production use; [`ArenaConfig::small_blocks`] exists so
/// tests can force block growth with a handful of allocations.
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Floor for the size of a newly allocated block, header included.
    /// Must be a power of two.
    pub min_block_size: usize,
    /// Minimum speculative reservation taken by the formatted-print paths.
    pub fmt_reserve_floor: usize,
    /// List capacity used when the caller passes 0 at creation.
    pub list_default_capacity: usize,
}

impl ArenaConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self {
            min_block_size: 4096,
            fmt_reserve_floor: 16,
            list_default_capacity: 16,
        }
    }

    /// Tiny first block, for exercising the growth policy.
    pub fn small_blocks() -> Self {
        Self { min_block_size: 64, ..Self::new() }
    }

    /// Sets the minimum block size (must be a power of two).
    #[must_use = "builder methods must be chained or built"]
    pub fn with_min_block_size(mut self, size: usize) -> Self {
        self.min_block_size = size;
        self
    }

    /// Sets the formatted-print reservation floor.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_fmt_reserve_floor(mut self, bytes: usize) -> Self {
        self.fmt_reserve_floor = bytes;
        self
    }

    /// Sets the default list capacity.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_list_default_capacity(mut self, items: usize) -> Self {
        self.list_default_capacity = items;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> MemoryResult<()> {
        if !self.min_block_size.is_power_of_two() {
            return Err(MemoryError::InvalidConfig {
                reason: "min_block_size must be a power of two",
            });
        }
        if self.min_block_size <= block::BLOCK_OVERHEAD {
            return Err(MemoryError::InvalidConfig {
                reason: "min_block_size must exceed the block overhead",
            });
        }
        if self.fmt_reserve_floor == 0 {
            return Err(MemoryError::InvalidConfig {
                reason: "fmt_reserve_floor must be greater than 0",
            });
        }
        if self.list_default_capacity == 0 {
            return Err(MemoryError::InvalidConfig {
                reason: "list_default_capacity must be greater than 0",
            });
        }
        Ok(())
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder_chains() {
        let config = ArenaConfig::new()
            .with_min_block_size(8192)
            .with_fmt_reserve_floor(32)
            .with_list_default_capacity(4);

        assert_eq!(config.min_block_size, 8192);
        assert_eq!(config.fmt_reserve_floor, 32);
        assert_eq!(config.list_default_capacity, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_rejects_non_power_of_two_blocks() {
        let config = ArenaConfig::new().with_min_block_size(100);
        assert!(matches!(
            config.validate(),
            Err(MemoryError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn config_rejects_degenerate_floors() {
        assert!(ArenaConfig::new().with_fmt_reserve_floor(0).validate().is_err());
        assert!(ArenaConfig::new().with_list_default_capacity(0).validate().is_err());
    }
}
