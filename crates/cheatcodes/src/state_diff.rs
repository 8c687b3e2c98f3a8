//! Ordered account and storage access recording, and the per-account state diffs built from it.

use alloy_primitives::{Address, B256, Bytes, U256, map::AddressHashMap};
use derive_more::Display;
use sandbox_common::{MappingSlots, SlotIdentifier, SlotInfo, fmt::format_token_raw};
use serde::Serialize;
use std::{collections::BTreeMap, fmt};

/// The kind of account access.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize)]
pub enum AccountAccessKind {
    /// The account was called.
    Call,
    /// The account was called via delegatecall.
    DelegateCall,
    /// The account was called via callcode.
    CallCode,
    /// The account was called via staticcall.
    StaticCall,
    /// The account was created.
    Create,
    /// The account was selfdestructed.
    SelfDestruct,
    /// Synthetic access indicating the current context has resumed after a previous sub-context
    /// (AccountAccess) ended.
    Resume,
    /// The account's balance was read.
    Balance,
    /// The account's codesize was read.
    Extcodesize,
    /// The account's codehash was read.
    Extcodehash,
    /// The account's code was copied.
    Extcodecopy,
}

impl AccountAccessKind {
    /// Returns true if the kind of account access is a call.
    pub fn is_call(self) -> bool {
        matches!(self, Self::Call | Self::StaticCall | Self::CallCode | Self::DelegateCall)
    }
}

/// The environment an access happened in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    /// The local id of the active fork, zero outside of forking mode.
    pub fork_id: U256,
    pub chain_id: u64,
}

/// An access of a storage slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageAccess {
    /// The account whose storage was accessed.
    pub account: Address,
    pub slot: B256,
    pub is_write: bool,
    /// The value before the access.
    pub previous_value: B256,
    /// The value after the access.
    pub new_value: B256,
    /// Whether the frame the access happened in reverted.
    pub reverted: bool,
}

/// An account access, together with the storage accesses made in its context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountAccess {
    pub chain_info: ChainInfo,
    /// The account accessing `account`.
    pub accessor: Address,
    /// The account accessed.
    pub account: Address,
    pub kind: AccountAccessKind,
    /// Whether the account had a balance, a nonce or code before the access.
    pub initialized: bool,
    pub old_balance: U256,
    /// Balance after the access. Stamped when the frame ends, `old_balance` until then.
    pub new_balance: U256,
    /// Code deployed by a creation.
    pub deployed_code: Bytes,
    /// Value transferred.
    pub value: U256,
    /// Call data, or init code of a creation.
    pub data: Bytes,
    pub reverted: bool,
    /// Storage accesses made in the context of this access, in order.
    pub storage_accesses: Vec<StorageAccess>,
    /// The call depth the account was accessed at.
    pub depth: u64,
}

/// Recorded account accesses, one pending group per open call frame.
///
/// Each group starts with the access that opened the frame, followed by every access made by
/// its sub-frames once they ended. Groups of ended frames merge into their parent, so the
/// recording keeps the order the accesses happened in.
#[derive(Clone, Debug, Default)]
pub struct StateDiffRecorder {
    groups: Vec<Vec<AccountAccess>>,
}

impl StateDiffRecorder {
    /// Opens a group for a call or creation frame.
    pub fn start_frame(&mut self, access: AccountAccess) {
        trace!(target: "cheatcodes", kind = %access.kind, account = %access.account, depth = access.depth, "recording frame");
        self.groups.push(vec![access]);
    }

    /// Closes the innermost group once the frame that ended at `depth` returns.
    ///
    /// On revert, the group and its storage accesses are marked reverted. `finish` updates the
    /// access that opened the frame with its post-call state. Windows opened inside a frame
    /// that has since ended keep their recordings.
    pub fn end_frame(&mut self, depth: u64, reverted: bool, finish: impl FnOnce(&mut AccountAccess)) {
        let Some(mut group) = self.groups.pop() else { return };
        if reverted {
            for access in &mut group {
                access.reverted = true;
                for storage_access in &mut access.storage_accesses {
                    storage_access.reverted = true;
                }
            }
        }
        if let Some(first) = group.first_mut()
            && first.depth == depth
        {
            finish(first);
        }
        match self.groups.last_mut() {
            Some(parent) => parent.append(&mut group),
            None => self.groups.push(group),
        }
    }

    /// Adds an access that does not open a frame, such as a balance read or a selfdestruct, to
    /// the innermost group.
    pub fn record_access(&mut self, access: AccountAccess) {
        if let Some(group) = self.groups.last_mut() {
            group.push(access);
        }
    }

    /// Records a storage access made at `storage_depth`.
    ///
    /// Accesses made after a sub-frame returned go to a `Resume` record, so that they stay
    /// ordered after the accesses of the sub-frame.
    pub fn record_storage(&mut self, storage_access: StorageAccess, storage_depth: u64) {
        let Some(group) = self.groups.last_mut() else { return };
        // Only accesses made inside the frame of the group belong to it.
        if group.first().is_none_or(|entry| entry.depth >= storage_depth) {
            return;
        }

        if group.len() > 1 && group.last().is_some_and(|last| last.kind != AccountAccessKind::Resume)
        {
            let entry = &group[0];
            let resume = AccountAccess {
                chain_info: entry.chain_info,
                accessor: entry.accessor,
                account: entry.account,
                kind: AccountAccessKind::Resume,
                initialized: entry.initialized,
                old_balance: U256::ZERO,
                new_balance: U256::ZERO,
                deployed_code: Bytes::new(),
                value: U256::ZERO,
                data: Bytes::new(),
                reverted: entry.reverted,
                storage_accesses: Vec::new(),
                depth: entry.depth,
            };
            group.push(resume);
        }
        if let Some(last) = group.last_mut() {
            last.storage_accesses.push(storage_access);
        }
    }

    /// Returns every recorded access in order.
    pub fn accesses(&self) -> impl Iterator<Item = &AccountAccess> + '_ {
        self.groups.iter().flatten()
    }

    /// Consumes the recorder and returns every recorded access in order.
    pub fn into_accesses(self) -> Vec<AccountAccess> {
        self.groups.into_iter().flatten().collect()
    }
}

/// Storage slot diff info.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotStateDiff {
    /// Value before the first write.
    pub previous_value: B256,
    /// Value after the last write.
    pub new_value: B256,
    /// Variable the slot belongs to, if the account's storage layout is known.
    #[serde(flatten)]
    pub slot_info: Option<SlotInfo>,
}

/// Balance diff info.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceDiff {
    pub previous_value: U256,
    pub new_value: U256,
}

/// Account state diff info.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStateDiffs {
    /// Address label, if any set.
    pub label: Option<String>,
    /// Account balance changes.
    pub balance_diff: Option<BalanceDiff>,
    /// State changes, per slot.
    pub state_diff: BTreeMap<B256, SlotStateDiff>,
}

impl fmt::Display for AccountStateDiffs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = &self.label {
            writeln!(f, "label: {label}")?;
        }
        if let Some(balance_diff) = &self.balance_diff
            && balance_diff.previous_value != balance_diff.new_value
        {
            writeln!(f, "- balance diff: {} → {}", balance_diff.previous_value, balance_diff.new_value)?;
        }
        if !self.state_diff.is_empty() {
            writeln!(f, "- state diff:")?;
            for (slot, diff) in &self.state_diff {
                match &diff.slot_info {
                    Some(info) => match &info.decoded {
                        Some(decoded) => writeln!(
                            f,
                            "@ {slot} ({}, {}): {} → {}",
                            info.label,
                            info.slot_type.label,
                            format_token_raw(&decoded.previous_value),
                            format_token_raw(&decoded.new_value)
                        )?,
                        None => writeln!(
                            f,
                            "@ {slot} ({}, {}): {} → {}",
                            info.label, info.slot_type.label, diff.previous_value, diff.new_value
                        )?,
                    },
                    None => writeln!(f, "@ {slot}: {} → {}", diff.previous_value, diff.new_value)?,
                }
            }
        }
        Ok(())
    }
}

/// Aggregates recorded accesses into per-account state diffs.
///
/// Only writes of frames that did not revert count, attributed to the account whose storage
/// they changed. The first previous value and the last new value of each slot are kept. Slots
/// of accounts with a known storage layout are decoded.
pub fn state_diffs<'a>(
    accesses: impl IntoIterator<Item = &'a AccountAccess>,
    labels: &AddressHashMap<String>,
    identifiers: &AddressHashMap<SlotIdentifier>,
    mapping_slots: Option<&AddressHashMap<MappingSlots>>,
) -> BTreeMap<Address, AccountStateDiffs> {
    let mut diffs = BTreeMap::<Address, AccountStateDiffs>::new();
    let new_diff = |address: &Address| AccountStateDiffs {
        label: labels.get(address).cloned(),
        ..Default::default()
    };

    for access in accesses {
        // Do not overwrite the initial balance if already set.
        if access.old_balance != access.new_balance {
            let account_diff =
                diffs.entry(access.account).or_insert_with(|| new_diff(&access.account));
            match &mut account_diff.balance_diff {
                Some(diff) => diff.new_value = access.new_balance,
                None => {
                    account_diff.balance_diff = Some(BalanceDiff {
                        previous_value: access.old_balance,
                        new_value: access.new_balance,
                    })
                }
            }
        }

        for storage_access in &access.storage_accesses {
            if !storage_access.is_write || storage_access.reverted {
                continue;
            }
            diffs
                .entry(storage_access.account)
                .or_insert_with(|| new_diff(&storage_access.account))
                .state_diff
                .entry(storage_access.slot)
                .and_modify(|diff| diff.new_value = storage_access.new_value)
                .or_insert(SlotStateDiff {
                    previous_value: storage_access.previous_value,
                    new_value: storage_access.new_value,
                    slot_info: None,
                });
        }
    }

    for (address, account_diff) in &mut diffs {
        let Some(identifier) = identifiers.get(address) else { continue };
        let values = account_diff
            .state_diff
            .iter()
            .map(|(slot, diff)| (*slot, (diff.previous_value, diff.new_value)))
            .collect::<BTreeMap<_, _>>();
        let mapping_slots = mapping_slots.and_then(|slots| slots.get(address));
        for (slot, diff) in &mut account_diff.state_diff {
            diff.slot_info = identifier.identify_with_values(slot, mapping_slots, &values);
        }
    }
    diffs
}

/// Renders state diffs as text: the address, then the account diff, per changed account.
pub fn format_state_diffs(diffs: &BTreeMap<Address, AccountStateDiffs>) -> String {
    diffs.iter().map(|(address, diff)| format!("{address}\n{diff}\n")).collect()
}
