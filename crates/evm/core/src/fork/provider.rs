//! The seam through which remote chain state is fetched.

use crate::{backend::AccountInfo, env::ChainClock};
use alloy_primitives::{
    Address, B256, U256,
    map::{AddressHashMap, B256HashMap, HashMap},
};
use auto_impl::auto_impl;
use std::{
    collections::BTreeMap,
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Read access to the state of a chain at a given block.
///
/// Implementations are expected to be pure with respect to `(block, key)`: the same query
/// always yields the same answer. Results are cached per fork and never re-fetched.
#[auto_impl(&, Box, Arc)]
pub trait StateProvider: fmt::Debug + Send + Sync {
    /// Returns the number of the most recent block.
    fn latest_block(&self) -> eyre::Result<u64>;

    /// Returns the account at `address`, or `None` if it does not exist.
    fn basic(&self, address: Address, block: u64) -> eyre::Result<Option<AccountInfo>>;

    /// Returns the value of `slot` of `address`.
    fn storage(&self, address: Address, slot: U256, block: u64) -> eyre::Result<U256>;

    /// Returns the block values of `block`.
    fn block_clock(&self, block: u64) -> eyre::Result<ChainClock>;

    /// Returns the number of the block that includes transaction `tx`.
    fn transaction_block(&self, tx: B256) -> eyre::Result<u64>;
}

/// A [`StateProvider`] backed by in-memory block history.
///
/// Every value is recorded at the block it changed in, and a query at block `n` sees the most
/// recent change at or before `n`.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    accounts: AddressHashMap<BTreeMap<u64, AccountInfo>>,
    storage: HashMap<(Address, U256), BTreeMap<u64, U256>>,
    clocks: BTreeMap<u64, ChainClock>,
    transactions: B256HashMap<u64>,
    requests: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the account at `address` from `block` on.
    pub fn with_account(mut self, block: u64, address: Address, info: AccountInfo) -> Self {
        self.accounts.entry(address).or_default().insert(block, info);
        self.touch(block);
        self
    }

    /// Sets `slot` of `address` from `block` on.
    pub fn with_storage(mut self, block: u64, address: Address, slot: U256, value: U256) -> Self {
        self.storage.entry((address, slot)).or_default().insert(block, value);
        self.touch(block);
        self
    }

    /// Sets the block values of `block`.
    pub fn with_clock(mut self, clock: ChainClock) -> Self {
        self.clocks.insert(clock.number, clock);
        self
    }

    /// Records that transaction `tx` was included in `block`.
    pub fn with_transaction(mut self, tx: B256, block: u64) -> Self {
        self.transactions.insert(tx, block);
        self.touch(block);
        self
    }

    /// Returns the number of state queries served so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    fn touch(&mut self, block: u64) {
        self.clocks.entry(block).or_insert_with(|| ChainClock::new(block, block.saturating_mul(12)));
    }

    fn count(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }
}

impl StateProvider for MemoryProvider {
    fn latest_block(&self) -> eyre::Result<u64> {
        Ok(self.clocks.keys().next_back().copied().unwrap_or_default())
    }

    fn basic(&self, address: Address, block: u64) -> eyre::Result<Option<AccountInfo>> {
        self.count();
        Ok(self
            .accounts
            .get(&address)
            .and_then(|history| history.range(..=block).next_back())
            .map(|(_, info)| info.clone()))
    }

    fn storage(&self, address: Address, slot: U256, block: u64) -> eyre::Result<U256> {
        self.count();
        Ok(self
            .storage
            .get(&(address, slot))
            .and_then(|history| history.range(..=block).next_back())
            .map(|(_, value)| *value)
            .unwrap_or_default())
    }

    fn block_clock(&self, block: u64) -> eyre::Result<ChainClock> {
        Ok(self.clocks.get(&block).copied().unwrap_or_else(|| ChainClock::new(block, block * 12)))
    }

    fn transaction_block(&self, tx: B256) -> eyre::Result<u64> {
        match self.transactions.get(&tx) {
            Some(block) => Ok(*block),
            None => eyre::bail!("transaction {tx} not found"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn queries_see_the_latest_change_at_or_before_the_block() {
        let target = address!("00000000000000000000000000000000000000aa");
        let provider = MemoryProvider::new()
            .with_storage(10, target, U256::ZERO, U256::from(1))
            .with_storage(20, target, U256::ZERO, U256::from(2));

        assert_eq!(provider.storage(target, U256::ZERO, 9).unwrap(), U256::ZERO);
        assert_eq!(provider.storage(target, U256::ZERO, 15).unwrap(), U256::from(1));
        assert_eq!(provider.storage(target, U256::ZERO, 25).unwrap(), U256::from(2));
        assert_eq!(provider.latest_block().unwrap(), 20);
        assert_eq!(provider.requests(), 3);
        assert!(provider.transaction_block(B256::ZERO).is_err());
    }

    #[test]
    fn far_blocks_get_saturated_timestamps() {
        let provider = MemoryProvider::new().with_transaction(B256::ZERO, u64::MAX);
        assert_eq!(provider.latest_block().unwrap(), u64::MAX);
        assert_eq!(provider.clocks[&u64::MAX].timestamp, u64::MAX);
    }
}
