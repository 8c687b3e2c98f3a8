//! The sandbox state: in-memory and forked environments, persistent accounts and snapshots.

use crate::{
    constants::DEFAULT_PERSISTENT_ACCOUNTS,
    env::ChainClock,
    fork::{CreateFork, ForkId, ForkSources, RemoteState},
    snapshot::StateSnapshots,
};
use alloy_primitives::{
    Address, B256, Bytes, U256,
    map::{AddressHashSet, HashMap},
};
use itertools::Itertools;
use rand::{Rng, SeedableRng, rngs::StdRng};

mod diagnostic;
pub use diagnostic::RevertDiagnostic;

mod error;
pub use error::{BackendError, BackendResult};

mod snapshot;
pub use snapshot::{BackendStateSnapshot, RevertStateSnapshotAction};

mod store;
pub use store::{
    AccountInfo, AccountStore, ArbitraryStorage, DbAccount, StorageMap, delegation_designator,
};

/// A numeric identifier of an environment, as returned by `createFork`.
///
/// Stays the same for the lifetime of the environment, even when it is rolled to another block.
pub type LocalForkId = U256;

/// Position of a fork in the fork arena.
type ForkLookupIndex = usize;

/// A forked environment.
///
/// Writes land in `db`; unwritten state is read from `remote`, which is shared with every other
/// environment pinned to the same block of the same source.
#[derive(Clone, Debug)]
pub struct Fork {
    db: AccountStore,
    remote: RemoteState,
    clock: ChainClock,
}

impl Fork {
    pub fn fork_id(&self) -> &ForkId {
        self.remote.fork_id()
    }

    /// The block the remote state is pinned to.
    pub fn block(&self) -> u64 {
        self.remote.block()
    }

    /// The block values of this environment as of the last time it was active.
    pub fn clock(&self) -> &ChainClock {
        &self.clock
    }

    /// Returns true if the account is a contract
    pub fn is_contract(&self, acc: Address) -> bool {
        match self.db.get(&acc) {
            Some(account) => account.info.has_code(),
            None => self.remote.is_contract(acc),
        }
    }
}

/// Provides the state every cheatcode operates on.
///
/// # Environments
///
/// Without a selected fork all state lives in an in-memory store. Forks can be created on the
/// fly; each one is identified by a [`LocalForkId`] and uses completely separate storage for
/// local writes, on top of read-only remote state fetched lazily through a
/// [`StateProvider`](crate::fork::StateProvider).
///
/// # Persistent accounts
///
/// Persistent accounts don't use a separate storage section per environment. They live in one
/// store shared by all environments, so data can cross fork boundaries through them. Their
/// unwritten slots are read from whichever environment is active.
///
/// # Snapshotting
///
/// A snapshot of the overall state can be taken at any point in time and is identified by a
/// unique, monotonically increasing id. Reverting replaces every environment's local state,
/// the persistent store, the active environment and the chain clock with the snapshot's.
/// Other snapshots are never affected by a revert.
#[derive(Clone, Debug)]
#[must_use]
pub struct Backend {
    /// The sources forks are created from
    sources: ForkSources,
    /// The in-memory environment
    mem_db: AccountStore,
    /// Clock of the in-memory environment while a fork is active
    mem_clock: ChainClock,
    /// The canonical store of persistent accounts
    persistent: AccountStore,
    /// The currently active fork, if any
    active_fork_ids: Option<(LocalForkId, ForkLookupIndex)>,
    /// The clock of the active environment
    clock: ChainClock,
    arbitrary: ArbitraryStorage,
    rng: StdRng,
    inner: BackendInner,
}

impl Backend {
    /// Creates a new in-memory backend.
    ///
    /// `seed` makes the values handed out for arbitrary storage reproducible.
    pub fn new(sources: ForkSources, seed: Option<U256>) -> Self {
        trace!(target: "backend", seeded = seed.is_some(), "creating backend");
        let rng = match seed {
            Some(seed) => StdRng::from_seed(seed.to_be_bytes()),
            None => StdRng::from_os_rng(),
        };
        Self {
            sources,
            mem_db: AccountStore::default(),
            mem_clock: ChainClock::genesis(),
            persistent: AccountStore::default(),
            active_fork_ids: None,
            clock: ChainClock::genesis(),
            arbitrary: ArbitraryStorage::default(),
            rng,
            inner: BackendInner::default(),
        }
    }

    /// Creates a new backend that starts on a fork.
    pub fn forked(sources: ForkSources, fork: CreateFork, seed: Option<U256>) -> BackendResult<Self> {
        let mut backend = Self::new(sources, seed);
        backend.create_select_fork(fork)?;
        Ok(backend)
    }

    pub fn sources(&self) -> &ForkSources {
        &self.sources
    }

    pub fn sources_mut(&mut self) -> &mut ForkSources {
        &mut self.sources
    }

    /// The block values of the active environment.
    pub fn clock(&self) -> &ChainClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut ChainClock {
        &mut self.clock
    }

    // === accounts ===

    /// Returns the account at `address`, or an empty account if it does not exist.
    pub fn basic(&self, address: Address) -> BackendResult<AccountInfo> {
        if let Some(account) = self.layer(&address).get(&address) {
            return Ok(account.info.clone());
        }
        Ok(self.remote_basic(address)?.unwrap_or_default())
    }

    /// Replaces the account info of `address`, keeping its storage.
    pub fn insert_account_info(&mut self, address: Address, info: AccountInfo) -> BackendResult<()> {
        self.account_mut(address)?.info = info;
        Ok(())
    }

    pub fn set_balance(&mut self, address: Address, balance: U256) -> BackendResult<()> {
        self.account_mut(address)?.info.balance = balance;
        Ok(())
    }

    /// Deploys `code` at `address` (`etch`).
    pub fn set_code(&mut self, address: Address, code: Bytes) -> BackendResult<()> {
        self.account_mut(address)?.info.set_code(code);
        Ok(())
    }

    pub fn code(&self, address: Address) -> BackendResult<Bytes> {
        Ok(self.basic(address)?.code)
    }

    pub fn read_nonce(&self, address: Address) -> BackendResult<u64> {
        Ok(self.basic(address)?.nonce)
    }

    /// Sets the nonce of `address`.
    ///
    /// Fails with [`BackendError::InvalidNonce`] if `nonce` is lower than the current one.
    pub fn set_nonce(&mut self, address: Address, nonce: u64) -> BackendResult<()> {
        let account = self.account_mut(address)?;
        let current = account.info.nonce;
        if nonce < current {
            return Err(BackendError::InvalidNonce { address, current, requested: nonce });
        }
        account.info.nonce = nonce;
        Ok(())
    }

    /// Sets the nonce of `address` to any value.
    pub fn set_nonce_unsafe(&mut self, address: Address, nonce: u64) -> BackendResult<()> {
        self.account_mut(address)?.info.nonce = nonce;
        Ok(())
    }

    /// Makes `authority` delegate to `implementation` by writing the EIP-7702 designator as its
    /// code. Delegating to the zero address clears the delegation.
    pub fn set_delegation(&mut self, authority: Address, implementation: Address) -> BackendResult<()> {
        if implementation.is_zero() {
            return self.clear_delegation(authority);
        }
        trace!(target: "backend", %authority, %implementation, "set delegation");
        self.account_mut(authority)?.info.set_code(delegation_designator(implementation));
        Ok(())
    }

    /// Removes the delegation designator of `authority`, if any.
    pub fn clear_delegation(&mut self, authority: Address) -> BackendResult<()> {
        let account = self.account_mut(authority)?;
        if account.info.delegation().is_some() {
            account.info.set_code(Bytes::new());
        }
        Ok(())
    }

    // === storage ===

    /// Reads `slot` of `address`.
    ///
    /// Unwritten slots of accounts with arbitrary storage resolve to a random value that is
    /// remembered for subsequent reads.
    pub fn read_storage(&mut self, address: Address, slot: U256) -> BackendResult<U256> {
        if self.arbitrary.is_arbitrary(&address) {
            if let Some(value) = self.arbitrary.value(&address, &slot) {
                return Ok(value);
            }
            if !self.arbitrary.is_overwrite(&address)
                && let Some(value) = self.layer(&address).slot(&address, &slot)
            {
                return Ok(value);
            }
            let value = self.random_word();
            trace!(target: "backend", %address, %slot, %value, "arbitrary storage value");
            self.arbitrary.save(address, slot, value);
            self.account_mut(address)?.storage.insert(slot, value);
            return Ok(value);
        }

        if let Some(value) = self.layer(&address).slot(&address, &slot) {
            return Ok(value);
        }

        if let Some(source) = self.arbitrary.source_of(&address) {
            let value = self.read_storage(source, slot)?;
            self.account_mut(address)?.storage.insert(slot, value);
            return Ok(value);
        }

        self.remote_storage(address, slot)
    }

    /// Writes `value` to `slot` of `address`.
    pub fn write_storage(&mut self, address: Address, slot: U256, value: U256) -> BackendResult<()> {
        self.account_mut(address)?.storage.insert(slot, value);
        self.arbitrary.save(address, slot, value);
        Ok(())
    }

    /// Copies every known slot of `from` into `to`, overwriting slots `to` already has.
    ///
    /// If `from` has arbitrary storage, slots neither account has seen yet keep resolving to the
    /// same value for both.
    pub fn copy_storage(&mut self, from: Address, to: Address) -> BackendResult<()> {
        if from == to {
            return Ok(());
        }

        let mut slots = self.active_fork().map(|fork| fork.remote.cached_storage(&from)).unwrap_or_default();
        if let Some(account) = self.layer(&from).get(&from) {
            slots.extend(account.storage.iter().map(|(slot, value)| (*slot, *value)));
        }
        slots.extend(self.arbitrary.values_of(&from));

        trace!(target: "backend", %from, %to, slots = slots.len(), "copy storage");
        for &(slot, value) in &slots {
            self.arbitrary.save(to, slot, value);
        }
        self.account_mut(to)?.storage.extend(slots);
        self.arbitrary.mark_copy(from, to);
        Ok(())
    }

    /// Gives `address` arbitrary storage.
    pub fn set_arbitrary_storage(&mut self, address: Address, overwrite: bool) {
        trace!(target: "backend", %address, overwrite, "set arbitrary storage");
        self.arbitrary.mark_arbitrary(address, overwrite);
    }

    pub fn has_arbitrary_storage(&self, address: &Address) -> bool {
        self.arbitrary.is_arbitrary(address)
    }

    // === forks ===

    /// Creates a new fork and returns its id. The active environment does not change.
    ///
    /// Fails with [`BackendError::UnknownSource`] if the URL or alias is not registered.
    pub fn create_fork(&mut self, fork: CreateFork) -> BackendResult<LocalForkId> {
        trace!(target: "backend", url = %fork.url, block = ?fork.block, "create fork");
        let (remote, clock) = self.sources.create_fork(&fork)?;
        let id = self.inner.insert_new_fork(Fork { db: AccountStore::default(), remote, clock });
        debug!(target: "backend", %id, "created fork");
        Ok(id)
    }

    /// Creates a new fork and selects it.
    pub fn create_select_fork(&mut self, fork: CreateFork) -> BackendResult<LocalForkId> {
        let id = self.create_fork(fork)?;
        self.select_fork(id)?;
        Ok(id)
    }

    /// Makes `id` the active environment.
    ///
    /// The outgoing environment keeps its clock and the clock of `id` becomes the active one.
    /// Persistent accounts are unaffected.
    pub fn select_fork(&mut self, id: LocalForkId) -> BackendResult<()> {
        trace!(target: "backend", %id, "select fork");
        let idx = self.inner.ensure_fork_index(id)?;
        if self.is_active_fork(id) {
            return Ok(());
        }

        match self.active_fork_ids {
            Some((_, active_idx)) => self.inner.forks[active_idx].clock = self.clock,
            None => self.mem_clock = self.clock,
        }
        self.clock = self.inner.forks[idx].clock;
        self.active_fork_ids = Some((id, idx));
        Ok(())
    }

    /// Re-points fork `id`, or the active fork, at `block`.
    ///
    /// Local writes of the fork are discarded and every unwritten slot is read from the new
    /// block. Persistent accounts are untouched.
    pub fn roll_fork(&mut self, id: Option<LocalForkId>, block: u64) -> BackendResult<()> {
        let id = self.ensure_fork(id)?;
        trace!(target: "backend", %id, block, "roll fork");
        let idx = self.inner.ensure_fork_index(id)?;
        let fork_id = self.inner.forks[idx].fork_id().clone();
        let (remote, clock) = self.sources.roll_fork(&fork_id, block)?;

        let fork = &mut self.inner.forks[idx];
        fork.db.clear();
        fork.remote = remote;
        fork.clock = clock;
        if self.is_active_fork(id) {
            self.clock = clock;
        }
        Ok(())
    }

    /// Rolls fork `id`, or the active fork, to the state right before transaction `tx`.
    ///
    /// The state is that of the parent block of the one including `tx`; the clock is that of the
    /// including block.
    pub fn roll_fork_to_transaction(&mut self, id: Option<LocalForkId>, tx: B256) -> BackendResult<()> {
        let id = self.ensure_fork(id)?;
        trace!(target: "backend", %id, %tx, "roll fork to transaction");
        let idx = self.inner.ensure_fork_index(id)?;
        let provider = self.inner.forks[idx].remote.provider().clone();
        let block = provider.transaction_block(tx)?;
        let clock = provider.block_clock(block)?;

        self.roll_fork(Some(id), block.saturating_sub(1))?;
        self.inner.forks[idx].clock = clock;
        if self.is_active_fork(id) {
            self.clock = clock;
        }
        Ok(())
    }

    /// Returns `id`, or the active fork's id if `None`.
    pub fn ensure_fork(&self, id: Option<LocalForkId>) -> BackendResult<LocalForkId> {
        match id.or_else(|| self.active_fork_id()) {
            Some(id) => Ok(id),
            None => Err(BackendError::msg("no active fork")),
        }
    }

    pub fn active_fork_id(&self) -> Option<LocalForkId> {
        self.active_fork_ids.map(|(id, _)| id)
    }

    /// Returns the URL of the active fork's source.
    pub fn active_fork_url(&self) -> Option<String> {
        self.active_fork().map(|fork| fork.fork_id().url().to_string())
    }

    pub fn active_fork(&self) -> Option<&Fork> {
        self.active_fork_ids.map(|(_, idx)| &self.inner.forks[idx])
    }

    pub fn is_active_fork(&self, id: LocalForkId) -> bool {
        self.active_fork_id() == Some(id)
    }

    pub fn is_forked_mode(&self) -> bool {
        self.active_fork_ids.is_some()
    }

    /// Returns the fork with the given id.
    pub fn fork(&self, id: LocalForkId) -> BackendResult<&Fork> {
        Ok(&self.inner.forks[self.inner.ensure_fork_index(id)?])
    }

    /// Returns the number of forks created so far.
    pub fn forks_len(&self) -> usize {
        self.inner.forks.len()
    }

    // === persistent accounts ===

    /// Shares `address` across every environment from now on.
    ///
    /// The account's current state moves into the persistent store. Returns false if the
    /// account was already persistent.
    pub fn add_persistent_account(&mut self, address: Address) -> BackendResult<bool> {
        if self.is_persistent(&address) {
            return Ok(false);
        }
        trace!(target: "backend", %address, "add persistent account");

        let local = match self.active_fork_ids {
            Some((_, idx)) => self.inner.forks[idx].db.remove(&address),
            None => self.mem_db.remove(&address),
        };
        let account = match local {
            Some(account) => Some(account),
            None => match self.active_fork() {
                Some(fork) => fork.remote.basic(address)?.map(|info| DbAccount {
                    info,
                    storage: fork.remote.cached_storage(&address).into_iter().collect(),
                }),
                None => None,
            },
        };
        if let Some(account) = account {
            self.persistent.insert(address, account);
        }
        Ok(self.inner.persistent_accounts.insert(address))
    }

    /// Stops sharing `address`. Its state moves into the active environment.
    ///
    /// Returns false if the account was not persistent.
    pub fn remove_persistent_account(&mut self, address: &Address) -> bool {
        if !self.inner.persistent_accounts.remove(address) {
            return false;
        }
        trace!(target: "backend", %address, "remove persistent account");
        if let Some(account) = self.persistent.remove(address) {
            match self.active_fork_ids {
                Some((_, idx)) => self.inner.forks[idx].db.insert(*address, account),
                None => self.mem_db.insert(*address, account),
            };
        }
        true
    }

    pub fn is_persistent(&self, address: &Address) -> bool {
        self.inner.persistent_accounts.contains(address)
    }

    pub fn persistent_accounts(&self) -> impl Iterator<Item = &Address> + '_ {
        self.inner.persistent_accounts.iter()
    }

    // === snapshots ===

    /// Captures the current state and returns the snapshot id.
    pub fn snapshot_state(&mut self) -> U256 {
        let snapshot = BackendStateSnapshot {
            mem_db: self.mem_db.clone(),
            mem_clock: self.mem_clock,
            persistent: self.persistent.clone(),
            persistent_accounts: self.inner.persistent_accounts.clone(),
            forks: self.inner.forks.clone(),
            active_fork_ids: self.active_fork_ids,
            clock: self.clock,
            arbitrary: self.arbitrary.clone(),
        };
        let id = self.inner.state_snapshots.insert(snapshot);
        trace!(target: "backend", "Created new snapshot {}", id);
        id
    }

    /// Reverts to the snapshot `id`.
    ///
    /// Returns false if there is no such snapshot. Forks created after the snapshot was taken
    /// keep their current state.
    pub fn revert_state(&mut self, id: U256, action: RevertStateSnapshotAction) -> bool {
        let Some(snapshot) = self.inner.state_snapshots.remove_at(id) else {
            warn!(target: "backend", "No snapshot to revert for {}", id);
            return false;
        };
        if action.is_keep() {
            self.inner.state_snapshots.insert_at(snapshot.clone(), id);
        }

        let BackendStateSnapshot {
            mem_db,
            mem_clock,
            persistent,
            persistent_accounts,
            forks,
            active_fork_ids,
            clock,
            arbitrary,
        } = snapshot;
        self.mem_db = mem_db;
        self.mem_clock = mem_clock;
        self.persistent = persistent;
        self.inner.persistent_accounts = persistent_accounts;
        for (idx, fork) in forks.into_iter().enumerate() {
            self.inner.forks[idx] = fork;
        }
        self.active_fork_ids = active_fork_ids;
        self.clock = clock;
        self.arbitrary = arbitrary;

        trace!(target: "backend", "Reverted snapshot {}", id);
        true
    }

    pub fn delete_state_snapshot(&mut self, id: U256) -> bool {
        self.inner.state_snapshots.remove_at(id).is_some()
    }

    pub fn delete_state_snapshots(&mut self) {
        self.inner.state_snapshots.clear()
    }

    /// Returns the number of live snapshots.
    pub fn state_snapshots_len(&self) -> usize {
        self.inner.state_snapshots.len()
    }

    // === diagnostics ===

    /// Explains why a call to `callee` may have reverted: the account has no code on the active
    /// fork.
    ///
    /// Returns `None` outside of forking mode or if `callee` is a contract.
    pub fn diagnose_revert(&self, callee: Address) -> Option<RevertDiagnostic> {
        let (active_id, active_idx) = self.active_fork_ids?;
        let persistent = self.is_persistent(&callee);
        let has_code = if persistent {
            self.persistent.get(&callee).is_some_and(|account| account.info.has_code())
                || self.inner.forks[active_idx].remote.is_contract(callee)
        } else {
            self.inner.forks[active_idx].is_contract(callee)
        };
        if has_code {
            return None;
        }

        // no contract for `callee` available on current fork, check if available on other forks
        let available_on = self
            .inner
            .forks_iter()
            .filter(|(id, _)| *id != active_id)
            .filter(|(id, fork)| {
                trace!(target: "backend", %id, address=%callee, "checking if account exists");
                fork.is_contract(callee)
            })
            .map(|(id, _)| id)
            .sorted()
            .collect::<Vec<_>>();

        Some(if available_on.is_empty() {
            RevertDiagnostic::ContractDoesNotExist { contract: callee, active: active_id, persistent }
        } else {
            RevertDiagnostic::ContractExistsOnOtherForks {
                contract: callee,
                active: active_id,
                available_on,
            }
        })
    }

    // === internals ===

    /// Returns the store that holds `address`: the persistent store or the active environment's.
    fn layer(&self, address: &Address) -> &AccountStore {
        if self.is_persistent(address) {
            return &self.persistent;
        }
        match self.active_fork_ids {
            Some((_, idx)) => &self.inner.forks[idx].db,
            None => &self.mem_db,
        }
    }

    fn layer_mut(&mut self, address: &Address) -> &mut AccountStore {
        if self.inner.persistent_accounts.contains(address) {
            return &mut self.persistent;
        }
        match self.active_fork_ids {
            Some((_, idx)) => &mut self.inner.forks[idx].db,
            None => &mut self.mem_db,
        }
    }

    /// Returns the account at `address` for writing, loading it from the remote first.
    fn account_mut(&mut self, address: Address) -> BackendResult<&mut DbAccount> {
        let info = if self.layer(&address).contains(&address) {
            None
        } else {
            self.remote_basic(address)?
        };
        Ok(self
            .layer_mut(&address)
            .get_or_insert_with(address, || DbAccount::new(info.unwrap_or_default())))
    }

    fn remote_basic(&self, address: Address) -> BackendResult<Option<AccountInfo>> {
        match self.active_fork() {
            Some(fork) => Ok(fork.remote.basic(address)?),
            None => Ok(None),
        }
    }

    fn remote_storage(&self, address: Address, slot: U256) -> BackendResult<U256> {
        match self.active_fork() {
            Some(fork) => Ok(fork.remote.storage(address, slot)?),
            None => Ok(U256::ZERO),
        }
    }

    fn random_word(&mut self) -> U256 {
        let mut word = [0u8; 32];
        self.rng.fill(&mut word);
        U256::from_be_bytes(word)
    }
}

/// Container type for the fork arena and snapshots.
#[derive(Clone, Debug)]
struct BackendInner {
    /// Maps issued local ids to their slot in `forks`.
    issued_local_fork_ids: HashMap<LocalForkId, ForkLookupIndex>,
    /// Holds all created forks. Forks are never removed.
    forks: Vec<Fork>,
    next_fork_id: LocalForkId,
    state_snapshots: StateSnapshots<BackendStateSnapshot>,
    /// All accounts that are shared across environments.
    persistent_accounts: AddressHashSet,
}

impl BackendInner {
    fn ensure_fork_index(&self, id: LocalForkId) -> BackendResult<ForkLookupIndex> {
        self.issued_local_fork_ids
            .get(&id)
            .copied()
            .ok_or(BackendError::UnknownEnvironment(id))
    }

    /// Returns an iterator over forks and their ids
    fn forks_iter(&self) -> impl Iterator<Item = (LocalForkId, &Fork)> + '_ {
        self.issued_local_fork_ids.iter().map(|(id, idx)| (*id, &self.forks[*idx]))
    }

    /// Inserts a new fork and issues a new local fork identifier.
    fn insert_new_fork(&mut self, fork: Fork) -> LocalForkId {
        let idx = self.forks.len();
        self.forks.push(fork);
        let id = self.next_id();
        self.issued_local_fork_ids.insert(id, idx);
        id
    }

    fn next_id(&mut self) -> U256 {
        let id = self.next_fork_id;
        self.next_fork_id += U256::from(1);
        id
    }
}

impl Default for BackendInner {
    fn default() -> Self {
        Self {
            issued_local_fork_ids: Default::default(),
            forks: Default::default(),
            next_fork_id: Default::default(),
            state_snapshots: Default::default(),
            persistent_accounts: DEFAULT_PERSISTENT_ACCOUNTS.into_iter().collect(),
        }
    }
}
