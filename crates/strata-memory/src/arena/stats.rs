//! Footprint reporting for arenas.

use std::fmt;

/// Snapshot of an arena's memory footprint.
///
/// Produced by [`Arena::footprint`](crate::Arena::footprint); plain data,
/// valid only for the instant it was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaFootprint {
    /// Blocks currently in the chain.
    pub blocks: usize,
    /// Total bytes held from the system allocator, headers included.
    pub held_bytes: usize,
    /// Bytes bumped off the current block so far.
    pub current_block_used: usize,
    /// Packed-size estimate of all finalised allocations.
    pub size_estimate: usize,
    /// High-water mark of the size estimate.
    pub size_estimate_high: usize,
}

impl fmt::Display for ArenaFootprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Arena footprint:")?;
        writeln!(f, "  Blocks: {}", self.blocks)?;
        writeln!(f, "  Held: {} bytes", self.held_bytes)?;
        writeln!(f, "  Current block used: {} bytes", self.current_block_used)?;
        writeln!(f, "  Size estimate: {} bytes", self.size_estimate)?;
        writeln!(f, "  Size estimate high-water: {} bytes", self.size_estimate_high)?;
        Ok(())
    }
}
