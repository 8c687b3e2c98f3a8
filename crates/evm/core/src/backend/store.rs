//! The account and storage layer of a single environment.

use crate::constants::{EIP7702_DELEGATION_LENGTH, EIP7702_DELEGATION_PREFIX};
use alloy_primitives::{
    Address, B256, Bytes, KECCAK256_EMPTY, U256, keccak256,
    map::{AddressHashMap, AddressHashSet, HashMap},
};
use serde::{Deserialize, Serialize};

/// Storage of a single account, `slot => value`.
pub type StorageMap = HashMap<U256, U256>;

/// Basic account information.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub balance: U256,
    pub nonce: u64,
    pub code_hash: B256,
    pub code: Bytes,
}

impl Default for AccountInfo {
    fn default() -> Self {
        Self { balance: U256::ZERO, nonce: 0, code_hash: KECCAK256_EMPTY, code: Bytes::new() }
    }
}

impl AccountInfo {
    /// Creates a new account with the given balance and nonce and no code.
    pub fn new(balance: U256, nonce: u64) -> Self {
        Self { balance, nonce, ..Default::default() }
    }

    /// Returns the account with `code` deployed.
    pub fn with_code(mut self, code: impl Into<Bytes>) -> Self {
        self.set_code(code.into());
        self
    }

    /// Replaces the code and recomputes the code hash.
    pub fn set_code(&mut self, code: Bytes) {
        self.code_hash = if code.is_empty() { KECCAK256_EMPTY } else { keccak256(&code) };
        self.code = code;
    }

    /// Returns true if the account has a balance, a nonce or code.
    pub fn exists(&self) -> bool {
        !self.balance.is_zero() || self.nonce != 0 || self.has_code()
    }

    /// Returns true if the account has code, including a delegation designator.
    pub fn has_code(&self) -> bool {
        !self.code.is_empty()
    }

    /// Returns the delegation target if the code is an EIP-7702 designator.
    pub fn delegation(&self) -> Option<Address> {
        let code = self.code.as_ref();
        (code.len() == EIP7702_DELEGATION_LENGTH && code.starts_with(&EIP7702_DELEGATION_PREFIX))
            .then(|| Address::from_slice(&code[EIP7702_DELEGATION_PREFIX.len()..]))
    }
}

/// Encodes the EIP-7702 delegation designator pointing at `implementation`.
pub fn delegation_designator(implementation: Address) -> Bytes {
    [&EIP7702_DELEGATION_PREFIX[..], implementation.as_slice()].concat().into()
}

/// An account together with the storage slots written locally.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DbAccount {
    pub info: AccountInfo,
    /// Slots written locally, or fetched and cached into the layer.
    pub storage: StorageMap,
}

impl DbAccount {
    /// An account with no local storage.
    pub fn new(info: AccountInfo) -> Self {
        Self { info, storage: Default::default() }
    }
}

/// Locally written accounts.
///
/// Cloning a store deep copies every account, which is what state snapshots rely on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountStore {
    accounts: AddressHashMap<DbAccount>,
}

impl AccountStore {
    pub fn get(&self, address: &Address) -> Option<&DbAccount> {
        self.accounts.get(address)
    }

    pub fn get_mut(&mut self, address: &Address) -> Option<&mut DbAccount> {
        self.accounts.get_mut(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    pub fn insert(&mut self, address: Address, account: DbAccount) -> Option<DbAccount> {
        self.accounts.insert(address, account)
    }

    /// Returns the account at `address`, inserting the one `f` builds if there is none.
    pub fn get_or_insert_with(
        &mut self,
        address: Address,
        f: impl FnOnce() -> DbAccount,
    ) -> &mut DbAccount {
        self.accounts.entry(address).or_insert_with(f)
    }

    pub fn remove(&mut self, address: &Address) -> Option<DbAccount> {
        self.accounts.remove(address)
    }

    /// Returns the locally written value of `slot`, if any.
    pub fn slot(&self, address: &Address, slot: &U256) -> Option<U256> {
        self.accounts.get(address)?.storage.get(slot).copied()
    }

    pub fn clear(&mut self) {
        self.accounts.clear();
    }

    /// Number of accounts in the store.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

/// Accounts whose unwritten slots resolve to random values.
///
/// `values` holds every slot value handed out (or written) for an arbitrary account, so that a
/// slot read twice returns the same value. Accounts in `copies` had their storage copied from an
/// arbitrary account and share its values for slots neither of them has seen yet.
#[derive(Clone, Debug, Default)]
pub struct ArbitraryStorage {
    values: AddressHashMap<StorageMap>,
    copies: AddressHashMap<Address>,
    overwrites: AddressHashSet,
}

impl ArbitraryStorage {
    /// Marks an address with arbitrary storage.
    ///
    /// With `overwrite`, slots written before the mark resolve to a random value on their
    /// next read as well.
    pub fn mark_arbitrary(&mut self, address: Address, overwrite: bool) {
        self.values.insert(address, Default::default());
        self.copies.remove(&address);
        if overwrite {
            self.overwrites.insert(address);
        } else {
            self.overwrites.remove(&address);
        }
    }

    /// Records that `to` copied its storage from `from`.
    ///
    /// Copies of copies point straight at the arbitrary source.
    pub fn mark_copy(&mut self, from: Address, to: Address) {
        let source = self.copies.get(&from).copied().unwrap_or(from);
        if source != to && self.values.contains_key(&source) {
            self.copies.insert(to, source);
        }
    }

    pub fn is_arbitrary(&self, address: &Address) -> bool {
        self.values.contains_key(address)
    }

    /// Returns the arbitrary account `address` copied its storage from.
    pub fn source_of(&self, address: &Address) -> Option<Address> {
        self.copies.get(address).copied()
    }

    pub fn is_overwrite(&self, address: &Address) -> bool {
        self.overwrites.contains(address)
    }

    /// Returns the value already assigned to `slot` of an arbitrary account.
    pub fn value(&self, address: &Address, slot: &U256) -> Option<U256> {
        self.values.get(address)?.get(slot).copied()
    }

    /// Remembers `value` for `slot` if `address` is arbitrary.
    pub fn save(&mut self, address: Address, slot: U256, value: U256) {
        if let Some(values) = self.values.get_mut(&address) {
            values.insert(slot, value);
        }
    }

    /// Returns all values handed out for `address`.
    pub fn values_of(&self, address: &Address) -> impl Iterator<Item = (U256, U256)> + '_ {
        self.values.get(address).into_iter().flatten().map(|(slot, value)| (*slot, *value))
    }
}
