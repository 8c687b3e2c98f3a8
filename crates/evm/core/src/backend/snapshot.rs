use super::{Fork, LocalForkId, store::{AccountStore, ArbitraryStorage}};
use crate::env::ChainClock;
use alloy_primitives::map::AddressHashSet;

/// Everything a [`Backend`](super::Backend) restores when a state snapshot is reverted.
///
/// Local layers are deep copies; remote caches are shared since they only hold remote truth.
#[derive(Clone, Debug)]
pub struct BackendStateSnapshot {
    pub(super) mem_db: AccountStore,
    pub(super) mem_clock: ChainClock,
    pub(super) persistent: AccountStore,
    pub(super) persistent_accounts: AddressHashSet,
    pub(super) forks: Vec<Fork>,
    pub(super) active_fork_ids: Option<(LocalForkId, usize)>,
    pub(super) clock: ChainClock,
    pub(super) arbitrary: ArbitraryStorage,
}

/// What to do when reverting a state snapshot.
///
/// Whether to remove the state snapshot or keep it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RevertStateSnapshotAction {
    /// Remove the state snapshot after reverting.
    #[default]
    RevertRemove,
    /// Keep the state snapshot after reverting.
    RevertKeep,
}

impl RevertStateSnapshotAction {
    /// Returns `true` if the action is to keep the state snapshot.
    pub fn is_keep(&self) -> bool {
        matches!(self, Self::RevertKeep)
    }
}
