//! Recording, labels and state snapshots.

use crate::{
    Cheatcodes, CheatsCtxt, Error, Result,
    record::RecordAccess,
    state_diff::{self, AccountAccess, AccountStateDiffs},
};
use alloy_primitives::{Address, B256, Bytes, U256};
use sandbox_common::{SlotIdentifier, StorageLayout};
use sandbox_evm_core::backend::RevertStateSnapshotAction;
use std::{collections::BTreeMap, sync::Arc};

pub(crate) mod fork;
pub(crate) mod mapping;
pub(crate) mod mock;
pub(crate) mod prank;

/// Records `deal` cheatcodes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DealRecord {
    /// Target of the deal.
    pub address: Address,
    /// The balance of the address before deal was applied
    pub old_balance: U256,
    /// Balance after deal was applied
    pub new_balance: U256,
}

impl Cheatcodes {
    /// Starts recording storage reads and writes, discarding earlier recordings.
    pub fn record(&mut self) {
        self.accesses = Some(Default::default());
    }

    /// Returns the slots `target` read and wrote since [`record`](Self::record).
    pub fn accesses(&self, target: Address) -> (Vec<U256>, Vec<U256>) {
        self.accesses.as_ref().map(|accesses| accesses.accesses(&target)).unwrap_or_default()
    }

    /// Stops recording storage accesses and returns the recording.
    pub fn stop_record(&mut self) -> Result<RecordAccess> {
        self.accesses.take().ok_or(Error::NoActiveRecordingWindow)
    }

    /// Starts recording account and storage accesses, discarding earlier recordings.
    ///
    /// Keccak preimages are tracked too, so that mapping entries can be decoded.
    pub fn start_state_diff_recording(&mut self) {
        self.recorded_account_diffs = Some(Default::default());
        self.last_state_diff = None;
        self.mapping_slots.get_or_insert_default();
    }

    /// Stops recording and returns the recorded accesses in the order they happened.
    ///
    /// Recordings of frames still executing are included. The window stays available to the
    /// rendered views until the next one is opened.
    pub fn stop_and_return_state_diff(&mut self) -> Result<Vec<AccountAccess>> {
        let accesses = self
            .recorded_account_diffs
            .take()
            .map(|recorder| recorder.into_accesses())
            .ok_or(Error::NoActiveRecordingWindow)?;
        self.last_state_diff = Some(accesses.clone());
        Ok(accesses)
    }

    /// Returns the per-account diffs of the open window, or of the most recently closed one.
    pub fn state_diffs(&self) -> BTreeMap<Address, AccountStateDiffs> {
        let render = |accesses: Vec<&AccountAccess>| {
            state_diff::state_diffs(
                accesses,
                &self.labels,
                &self.slot_identifiers,
                self.mapping_slots.as_ref(),
            )
        };
        match (&self.recorded_account_diffs, &self.last_state_diff) {
            (Some(recorder), _) => render(recorder.accesses().collect()),
            (None, Some(accesses)) => render(accesses.iter().collect()),
            (None, None) => BTreeMap::new(),
        }
    }

    /// Renders [`state_diffs`](Self::state_diffs) as text.
    pub fn get_state_diff(&self) -> String {
        state_diff::format_state_diffs(&self.state_diffs())
    }

    /// Renders [`state_diffs`](Self::state_diffs) as JSON, keyed by account.
    pub fn get_state_diff_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.state_diffs())?)
    }

    /// Registers the storage layout of the contract at `address`, used to decode its slots.
    pub fn register_storage_layout(&mut self, address: Address, layout: Arc<StorageLayout>) {
        trace!(target: "cheatcodes", %address, variables = layout.storage.len(), "registered storage layout");
        self.slot_identifiers.insert(address, SlotIdentifier::new(layout));
    }

    /// Sets the label of `account`.
    pub fn label(&mut self, account: Address, new_label: impl Into<String>) -> Result {
        let new_label = new_label.into();
        ensure!(!new_label.is_empty(), "label cannot be empty");
        self.labels.insert(account, new_label);
        Ok(())
    }

    /// Returns the label of `account`.
    pub fn get_label(&self, account: Address) -> String {
        match self.labels.get(&account) {
            Some(label) => label.clone(),
            None => format!("unlabeled:{account}"),
        }
    }
}

impl CheatsCtxt<'_> {
    /// Sets `block.timestamp`.
    pub fn warp(&mut self, new_timestamp: u64) {
        self.backend.clock_mut().timestamp = new_timestamp;
    }

    /// Sets `block.number`.
    pub fn roll(&mut self, new_height: u64) {
        self.backend.clock_mut().number = new_height;
    }

    /// Sets `block.prevrandao`.
    pub fn prevrandao(&mut self, new_prevrandao: B256) {
        self.backend.clock_mut().prevrandao = new_prevrandao;
    }

    /// Sets the balance of `address`.
    pub fn deal(&mut self, address: Address, new_balance: U256) -> Result {
        let old_balance = self.backend.basic(address)?.balance;
        self.backend.set_balance(address, new_balance)?;
        self.state.eth_deals.push(DealRecord { address, old_balance, new_balance });
        Ok(())
    }

    /// Sets the code of `target`.
    pub fn etch(&mut self, target: Address, new_runtime_bytecode: impl Into<Bytes>) -> Result {
        Ok(self.backend.set_code(target, new_runtime_bytecode.into())?)
    }

    /// Writes a storage slot of `target` directly, without recording the write.
    pub fn store(&mut self, target: Address, slot: U256, value: U256) -> Result {
        Ok(self.backend.write_storage(target, slot, value)?)
    }

    /// Reads a storage slot of `target` directly, without recording the read.
    pub fn load(&mut self, target: Address, slot: U256) -> Result<U256> {
        Ok(self.backend.read_storage(target, slot)?)
    }

    pub fn get_nonce(&self, account: Address) -> Result<u64> {
        Ok(self.backend.read_nonce(account)?)
    }

    /// Sets the nonce of `account`, which may only increase.
    pub fn set_nonce(&mut self, account: Address, new_nonce: u64) -> Result {
        Ok(self.backend.set_nonce(account, new_nonce)?)
    }

    pub fn set_nonce_unsafe(&mut self, account: Address, new_nonce: u64) -> Result {
        Ok(self.backend.set_nonce_unsafe(account, new_nonce)?)
    }

    /// Copies every storage slot of `from` into `to`.
    pub fn copy_storage(&mut self, from: Address, to: Address) -> Result {
        Ok(self.backend.copy_storage(from, to)?)
    }

    /// Makes unwritten slots of `target` read as random values. With `overwrite`, slots
    /// written before also read as random values until written again.
    pub fn set_arbitrary_storage(&mut self, target: Address, overwrite: bool) {
        self.backend.set_arbitrary_storage(target, overwrite);
    }

    /// Captures the state and returns the snapshot id.
    pub fn snapshot_state(&mut self) -> U256 {
        self.backend.snapshot_state()
    }

    /// Reverts to snapshot `id`, keeping it. Returns false if there is no such snapshot.
    pub fn revert_to_state(&mut self, id: U256) -> bool {
        self.backend.revert_state(id, RevertStateSnapshotAction::RevertKeep)
    }

    /// Reverts to snapshot `id` and deletes it.
    pub fn revert_to_state_and_delete(&mut self, id: U256) -> bool {
        self.backend.revert_state(id, RevertStateSnapshotAction::RevertRemove)
    }

    pub fn delete_state_snapshot(&mut self, id: U256) -> bool {
        self.backend.delete_state_snapshot(id)
    }

    pub fn delete_state_snapshots(&mut self) {
        self.backend.delete_state_snapshots()
    }
}
