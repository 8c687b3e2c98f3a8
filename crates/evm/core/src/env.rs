use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

/// The block values a test can observe and manipulate with `warp`, `roll` and `prevrandao`.
///
/// Every environment keeps its own clock. Selecting an environment makes its clock the active
/// one; the outgoing environment keeps whatever values it had.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainClock {
    /// `block.timestamp`
    pub timestamp: u64,
    /// `block.number`
    pub number: u64,
    /// `block.prevrandao`
    pub prevrandao: B256,
}

impl ChainClock {
    /// Creates a clock at the given block.
    pub fn new(number: u64, timestamp: u64) -> Self {
        Self { number, timestamp, prevrandao: B256::ZERO }
    }

    /// The clock a fresh in-memory environment starts with.
    pub fn genesis() -> Self {
        Self::new(1, 1)
    }
}
