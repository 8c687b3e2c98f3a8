//! Tracking of mapping slots through the keccak preimages that derive them.

use alloy_primitives::{
    Address, B256, keccak256,
    map::{AddressHashMap, B256HashMap},
};

/// Recorded mapping slots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MappingSlots {
    /// Holds mapping parent (slots => slots)
    pub parent_slots: B256HashMap<B256>,

    /// Holds mapping key (slots => key)
    pub keys: B256HashMap<B256>,

    /// Holds mapping child (slots => slots[])
    pub children: B256HashMap<Vec<B256>>,

    /// Holds the last keccak256 results `hash => (data_low, data_high)`. Only 64-byte preimages
    /// are recorded, the first word being the key and the second the parent slot.
    pub seen_sha3: B256HashMap<(B256, B256)>,
}

impl MappingSlots {
    /// Tries to insert a mapping slot. Returns true if it was inserted.
    pub fn insert(&mut self, slot: B256) -> bool {
        match self.seen_sha3.get(&slot).copied() {
            Some((key, parent)) => {
                if self.keys.insert(slot, key).is_some() {
                    return false;
                }
                self.parent_slots.insert(slot, parent);
                self.children.entry(parent).or_default().push(slot);
                self.insert(parent);
                true
            }
            None => false,
        }
    }

    /// Remembers a hashed preimage if it has the `key . slot` shape of a mapping lookup.
    ///
    /// Returns the hash.
    pub fn record_keccak(&mut self, preimage: &[u8]) -> B256 {
        let hash = keccak256(preimage);
        if preimage.len() == 0x40 {
            let low = B256::from_slice(&preimage[..0x20]);
            let high = B256::from_slice(&preimage[0x20..]);
            self.seen_sha3.insert(hash, (low, high));
        }
        hash
    }

    /// Returns the `(key, parent)` pair of a mapping entry, falling back to unconfirmed hashes.
    pub fn key_and_parent_of(&self, slot: &B256) -> Option<(B256, B256)> {
        match (self.keys.get(slot), self.parent_slots.get(slot)) {
            (Some(key), Some(parent)) => Some((*key, *parent)),
            _ => self.seen_sha3.get(slot).copied(),
        }
    }

    /// Walks the parent chain of `slot` up to `root`.
    ///
    /// Returns the keys from the outermost mapping inwards, or `None` if `slot` is not a
    /// (possibly nested) entry of the mapping at `root`.
    pub fn keys_from(&self, root: &B256, slot: &B256) -> Option<Vec<B256>> {
        let mut keys = Vec::new();
        let mut current = *slot;
        while let (Some(key), Some(parent)) =
            (self.keys.get(&current), self.parent_slots.get(&current))
        {
            keys.push(*key);
            if parent == root {
                keys.reverse();
                return Some(keys);
            }
            current = *parent;
        }
        None
    }
}

/// Records a keccak256 computation performed by `address` while mapping recording is active.
pub fn on_keccak(
    mapping_slots: &mut AddressHashMap<MappingSlots>,
    address: Address,
    preimage: &[u8],
) {
    if preimage.len() == 0x40 {
        mapping_slots.entry(address).or_default().record_keccak(preimage);
    }
}

/// Records a storage write performed by `address` while mapping recording is active.
pub fn on_sstore(mapping_slots: &mut AddressHashMap<MappingSlots>, address: Address, slot: B256) {
    if let Some(mapping_slots) = mapping_slots.get_mut(&address) {
        mapping_slots.insert(slot);
    }
}
