//! Read-only remote half of a forked environment.

use super::{ForkId, StateProvider};
use crate::backend::{AccountInfo, StorageMap};
use alloy_primitives::{Address, U256, map::AddressHashMap};
use parking_lot::RwLock;
use std::sync::Arc;

/// A fork cache shared by every environment pinned to the same [`ForkId`].
pub type SharedForkCache = Arc<RwLock<ForkCache>>;

/// Everything fetched from a [`StateProvider`] at one block.
///
/// Only ever holds remote truth; local writes never end up here.
#[derive(Clone, Debug, Default)]
pub struct ForkCache {
    accounts: AddressHashMap<Option<AccountInfo>>,
    storage: AddressHashMap<StorageMap>,
}

impl ForkCache {
    /// Returns the number of cached accounts and storage slots.
    pub fn len(&self) -> usize {
        self.accounts.len() + self.storage.values().map(|slots| slots.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads remote state at a pinned block through the shared cache.
#[derive(Clone, Debug)]
pub struct RemoteState {
    fork_id: ForkId,
    block: u64,
    provider: Arc<dyn StateProvider>,
    cache: SharedForkCache,
}

impl RemoteState {
    pub fn new(
        fork_id: ForkId,
        block: u64,
        provider: Arc<dyn StateProvider>,
        cache: SharedForkCache,
    ) -> Self {
        Self { fork_id, block, provider, cache }
    }

    pub fn fork_id(&self) -> &ForkId {
        &self.fork_id
    }

    /// The block this state is pinned to.
    pub fn block(&self) -> u64 {
        self.block
    }

    pub fn provider(&self) -> &Arc<dyn StateProvider> {
        &self.provider
    }

    pub fn cache(&self) -> &SharedForkCache {
        &self.cache
    }

    /// Returns the account at `address`, fetching it on a cache miss.
    pub fn basic(&self, address: Address) -> eyre::Result<Option<AccountInfo>> {
        if let Some(info) = self.cache.read().accounts.get(&address) {
            return Ok(info.clone());
        }
        trace!(target: "backend::fork", fork=%self.fork_id, %address, "fetching account");
        let info = self.provider.basic(address, self.block)?;
        self.cache.write().accounts.insert(address, info.clone());
        Ok(info)
    }

    /// Returns the value of `slot`, fetching it on a cache miss.
    pub fn storage(&self, address: Address, slot: U256) -> eyre::Result<U256> {
        if let Some(value) = self.cache.read().storage.get(&address).and_then(|s| s.get(&slot)) {
            return Ok(*value);
        }
        trace!(target: "backend::fork", fork=%self.fork_id, %address, %slot, "fetching storage");
        let value = self.provider.storage(address, slot, self.block)?;
        self.cache.write().storage.entry(address).or_default().insert(slot, value);
        Ok(value)
    }

    /// Returns every slot of `address` fetched so far.
    pub fn cached_storage(&self, address: &Address) -> Vec<(U256, U256)> {
        self.cache
            .read()
            .storage
            .get(address)
            .map(|slots| slots.iter().map(|(slot, value)| (*slot, *value)).collect())
            .unwrap_or_default()
    }

    /// Returns true if the account at `address` has code on the remote.
    ///
    /// Fetch failures count as "no code".
    pub fn is_contract(&self, address: Address) -> bool {
        matches!(self.basic(address), Ok(Some(info)) if info.has_code())
    }
}
