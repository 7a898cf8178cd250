//! Primitive value types shared across the pipeline.

use std::fmt;

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// BLOCK NUMBER
// ═══════════════════════════════════════════════════════════════════════════════

/// A block height, wrapped so it cannot be confused with a log index or a
/// confirmation depth at the type level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockNumber(u64);

impl BlockNumber {
    /// Create a new block number.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Block zero, i.e. "genesis".
    pub const GENESIS: Self = Self(0);

    /// Get the raw `u64` value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Alias for [`Self::value`], matching the reference service's naming.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The next block number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The previous block number, saturating at zero.
    #[must_use]
    pub const fn prev(self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BlockNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<BlockNumber> for u64 {
    fn from(value: BlockNumber) -> Self {
        value.0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BLOCK REF
// ═══════════════════════════════════════════════════════════════════════════════

/// A block header reduced to the two fields the pipeline cares about.
///
/// Equality of two `BlockRef`s with the same `number` but different `hash`
/// is exactly what a reorg looks like from the core's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// Block height.
    pub number: BlockNumber,
    /// Block hash at that height.
    pub hash: B256,
}

impl BlockRef {
    /// Create a new block reference.
    #[must_use]
    pub const fn new(number: BlockNumber, hash: B256) -> Self {
        Self { number, hash }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.number, self.hash)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_number_next_prev() {
        let n = BlockNumber::new(10);
        assert_eq!(n.next().value(), 11);
        assert_eq!(n.prev().value(), 9);
        assert_eq!(BlockNumber::GENESIS.prev().value(), 0);
    }

    #[test]
    fn block_number_ordering() {
        assert!(BlockNumber::new(5) < BlockNumber::new(6));
    }

    #[test]
    fn block_ref_display() {
        let r = BlockRef::new(BlockNumber::new(42), B256::from([0xAB; 32]));
        assert!(r.to_string().starts_with("42@0x"));
    }
}
