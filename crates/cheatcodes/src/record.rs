use alloy_primitives::{Address, U256};
use std::collections::HashMap;

/// Records storage slots reads and writes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordAccess {
    /// Storage slots reads.
    pub reads: HashMap<Address, Vec<U256>>,
    /// Storage slots writes.
    pub writes: HashMap<Address, Vec<U256>>,
}

impl RecordAccess {
    /// Records a read access to a storage slot.
    pub fn record_read(&mut self, target: Address, slot: U256) {
        self.reads.entry(target).or_default().push(slot);
    }

    /// Records a write access to a storage slot.
    ///
    /// This also records a read internally as `SSTORE` does an implicit `SLOAD`.
    pub fn record_write(&mut self, target: Address, slot: U256) {
        self.record_read(target, slot);
        self.writes.entry(target).or_default().push(slot);
    }

    /// Returns the slots `target` read and wrote, in access order.
    pub fn accesses(&self, target: &Address) -> (Vec<U256>, Vec<U256>) {
        (
            self.reads.get(target).cloned().unwrap_or_default(),
            self.writes.get(target).cloned().unwrap_or_default(),
        )
    }

    pub fn clear(&mut self) {
        self.reads.clear();
        self.writes.clear();
    }
}
