//! Sector chain loop detection

use crate::error::{CfbError, Result};
use fixedbitset::FixedBitSet;

/// Tracks the sectors a single chain walk has visited.
///
/// A damaged allocation table can link a chain back onto itself; claiming
/// a sector twice reports that instead of looping forever.
#[derive(Debug, Clone)]
pub struct ChainLoopDetector {
    claimed: FixedBitSet,
}

impl ChainLoopDetector {
    /// Track sectors `0..sector_count`
    pub fn new(sector_count: usize) -> Self {
        Self {
            claimed: FixedBitSet::with_capacity(sector_count),
        }
    }

    /// Mark `sector` as visited.
    ///
    /// Fails if it already was, or if it lies past the tracked range.
    pub fn claim(&mut self, sector: u32) -> Result<()> {
        let slot = sector as usize;
        if slot >= self.claimed.len() {
            return Err(CfbError::Corrupted(format!(
                "Sector {} lies past the last of {} sectors",
                sector,
                self.claimed.len()
            )));
        }
        if self.claimed.put(slot) {
            return Err(CfbError::Corrupted(format!(
                "Sector {} appears twice in one chain",
                sector
            )));
        }
        Ok(())
    }

    /// Number of sectors claimed so far
    pub fn claimed(&self) -> usize {
        self.claimed.count_ones(..)
    }
}
