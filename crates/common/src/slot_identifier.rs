//! Storage slot identification and decoding.
//!
//! Given the [`StorageLayout`] of a contract, a [`SlotIdentifier`] maps a raw slot back to the
//! variable path it stores (`balances[0x..]`, `matrix[1][2]`, `config.owner`), the declared type
//! and the byte offset inside the slot, and decodes the values written to it.

use crate::{
    fmt::format_token_raw,
    layout::{Located, SlotLeaf, StorageLayout, TypeLayout},
    mapping_slots::MappingSlots,
};
use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{B256, U256, hex, keccak256, map::B256HashMap};
use serde::{Serialize, ser::SerializeMap};
use std::{collections::BTreeMap, sync::Arc};

/// Upper bound on the number of data slots expanded for a long `bytes`/`string`.
const MAX_BYTES_SLOTS: usize = 256;

/// Information about a storage slot: where it belongs, its type and the decoded values.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotInfo {
    /// The variable path, e.g. `owner`, `config.limits.max`, `matrix[1][2]` or
    /// `balances[0x..][7]`.
    pub label: String,
    /// The declared type.
    pub slot_type: StorageTypeInfo,
    /// Byte offset inside the slot, for packed values.
    pub offset: i64,
    /// Decimal slot number.
    pub slot: String,
    /// Values packed together in this slot, or the data slots of a long `bytes`/`string`.
    pub members: Option<Vec<Self>>,
    /// Decoded previous and new values, when the type is known.
    pub decoded: Option<DecodedSlotValues>,
    /// Decoded mapping keys, outermost first.
    pub keys: Option<Vec<String>>,
}

/// The declared type of a slot together with the layout used to decode it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageTypeInfo {
    /// The type label from the layout, e.g. `uint256` or `mapping(address => uint256)`.
    pub label: String,
    /// The layout values in this slot are decoded with.
    pub layout: TypeLayout,
}

impl StorageTypeInfo {
    /// Returns the ABI type of the decoded value.
    pub fn dyn_sol_type(&self) -> Option<DynSolType> {
        self.layout.dyn_sol_type()
    }
}

/// Decoded storage slot values.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedSlotValues {
    /// Value before the first recorded write.
    pub previous_value: DynSolValue,
    /// Value after the last recorded write.
    pub new_value: DynSolValue,
}

impl Serialize for DecodedSlotValues {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("previousValue", &format_token_raw(&self.previous_value))?;
        map.serialize_entry("newValue", &format_token_raw(&self.new_value))?;
        map.end()
    }
}

impl Serialize for SlotInfo {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("label", &self.label)?;
        map.serialize_entry("type", &self.slot_type.label)?;
        map.serialize_entry("offset", &self.offset)?;
        map.serialize_entry("slot", &self.slot)?;
        if let Some(members) = &self.members {
            map.serialize_entry("members", members)?;
        }
        if let Some(decoded) = &self.decoded {
            map.serialize_entry("decoded", decoded)?;
        }
        match self.keys.as_deref() {
            Some([key]) => map.serialize_entry("key", key)?,
            Some(keys) if !keys.is_empty() => map.serialize_entry("keys", keys)?,
            _ => {}
        }
        map.end()
    }
}

impl SlotInfo {
    fn new(label: String, type_label: String, layout: TypeLayout, offset: usize, slot: U256) -> Self {
        Self {
            label,
            slot_type: StorageTypeInfo { label: type_label, layout },
            offset: offset as i64,
            slot: slot.to_string(),
            members: None,
            decoded: None,
            keys: None,
        }
    }

    fn from_leaf(leaf: SlotLeaf<'_>, slot: U256) -> Self {
        let type_label = leaf.layout.label().to_string();
        Self::new(leaf.label, type_label, leaf.layout.clone(), leaf.offset, slot)
    }

    fn from_located(located: Located<'_>, slot: U256) -> Self {
        match located {
            Located::Leaf(leaf) => Self::from_leaf(leaf, slot),
            Located::Packed { label, layout, leaves } => {
                let mut info = Self::new(label, layout.label().to_string(), layout.clone(), 0, slot);
                info.members =
                    Some(leaves.into_iter().map(|leaf| Self::from_leaf(leaf, slot)).collect());
                info
            }
        }
    }

    /// Returns true if this slot holds the header of a `bytes` or `string`.
    pub fn is_bytes_or_string(&self) -> bool {
        matches!(self.slot_type.layout, TypeLayout::Bytes { .. })
    }

    /// Decodes the previous and new word of this slot.
    ///
    /// Packed slots decode every member instead of the slot as a whole.
    pub fn decode_values(&mut self, previous_value: B256, new_value: B256) {
        if let Some(members) = &mut self.members {
            for member in members.iter_mut() {
                member.decode_values(previous_value, new_value);
            }
            return;
        }

        let offset = self.offset.max(0) as usize;
        let layout = &self.slot_type.layout;
        if let (Some(previous_value), Some(new_value)) =
            (layout.decode(previous_value, offset), layout.decode(new_value, offset))
        {
            self.decoded = Some(DecodedSlotValues { previous_value, new_value });
        }
    }

    /// Decodes a `bytes` or `string` header slot whose data may span multiple slots, reading
    /// the data slots from `storage_accesses` (`slot => (previous, new)`).
    pub fn decode_bytes_or_string_values(
        &mut self,
        base_slot: &B256,
        storage_accesses: &BTreeMap<B256, (B256, B256)>,
    ) {
        let TypeLayout::Bytes { is_string, .. } = self.slot_type.layout else { return };
        let Some((previous_header, new_header)) = storage_accesses.get(base_slot).copied() else {
            return;
        };

        let decode_side = |header: B256, pick: fn(&(B256, B256)) -> B256| {
            if header[31] & 1 == 0 {
                return self.slot_type.layout.decode(header, 0);
            }
            let length = long_bytes_length(header);
            // Every data slot must have been accessed, so a corrupt header cannot claim more.
            if length.div_ceil(32) > storage_accesses.len() {
                return None;
            }
            let data_start = U256::from_be_bytes::<32>(keccak256(base_slot).0);
            let mut data = Vec::with_capacity(length);
            for index in 0..length.div_ceil(32) {
                let word = pick(storage_accesses.get(&B256::from(data_start + U256::from(index)))?);
                let take = (length - data.len()).min(32);
                data.extend_from_slice(&word[..take]);
            }
            Some(if is_string {
                DynSolValue::String(String::from_utf8_lossy(&data).into_owned())
            } else {
                DynSolValue::Bytes(data)
            })
        };

        let previous_value = decode_side(previous_header, |(previous, _)| *previous);
        let new_value = decode_side(new_header, |(_, new)| *new);

        // List the data slots of whichever side is in long form.
        let long_header = [new_header, previous_header].into_iter().find(|header| header[31] & 1 == 1);
        if let Some(header) = long_header {
            let length = long_bytes_length(header);
            let data_start = U256::from_be_bytes::<32>(keccak256(base_slot).0);
            let members = (0..length.div_ceil(32).min(MAX_BYTES_SLOTS))
                .map(|index| {
                    Self::new(
                        format!("{}[{index}]", self.label),
                        self.slot_type.label.clone(),
                        bytes32(),
                        0,
                        data_start + U256::from(index),
                    )
                })
                .collect::<Vec<_>>();
            if !members.is_empty() {
                self.members = Some(members);
            }
        }

        if let (Some(previous_value), Some(new_value)) = (previous_value, new_value) {
            self.decoded = Some(DecodedSlotValues { previous_value, new_value });
        }
    }
}

/// The byte length stored in the header slot of a long-form `bytes` or `string`.
fn long_bytes_length(header: B256) -> usize {
    (U256::from_be_bytes::<32>(header.0) >> 1usize).saturating_to::<usize>()
}

/// A state variable resolved against the layout.
#[derive(Clone, Debug)]
struct Variable {
    name: String,
    slot: U256,
    offset: usize,
    layout: TypeLayout,
}

/// Storage slot identifier that uses a Solidity [`StorageLayout`] to identify storage slots.
#[derive(Clone, Debug)]
pub struct SlotIdentifier {
    storage_layout: Arc<StorageLayout>,
    variables: Vec<Variable>,
}

impl SlotIdentifier {
    /// Creates a new identifier, resolving every state variable of the layout once.
    pub fn new(storage_layout: Arc<StorageLayout>) -> Self {
        let variables = storage_layout
            .variables()
            .map(|(storage, slot, layout)| Variable {
                name: storage.label.clone(),
                slot,
                offset: storage.offset.max(0) as usize,
                layout,
            })
            .collect();
        Self { storage_layout, variables }
    }

    /// The layout this identifier was built from.
    pub fn storage_layout(&self) -> &StorageLayout {
        &self.storage_layout
    }

    /// Identifies a slot from the in-place layout, or as a mapping entry if `mapping_slots`
    /// recorded the hashes that led to it.
    pub fn identify(&self, slot: &B256, mapping_slots: Option<&MappingSlots>) -> Option<SlotInfo> {
        trace!(?slot, "identifying slot");
        let target = U256::from_be_bytes(slot.0);

        let mut located = self
            .variables
            .iter()
            .filter_map(|var| var.layout.locate(var.name.clone(), var.slot, var.offset, target))
            .collect::<Vec<_>>();
        match located.len() {
            0 => {}
            1 => return located.pop().map(|located| SlotInfo::from_located(located, target)),
            _ => {
                // Several top-level variables packed in one slot.
                let members = located
                    .into_iter()
                    .map(|located| SlotInfo::from_located(located, target))
                    .collect::<Vec<_>>();
                let label = members.iter().map(|member| member.label.as_str()).collect::<Vec<_>>();
                let mut info = SlotInfo::new(
                    label.join(", "),
                    "packed".to_string(),
                    TypeLayout::Opaque { label: "packed".to_string(), size: U256::from(32) },
                    0,
                    target,
                );
                info.members = Some(members);
                return Some(info);
            }
        }

        let mapping_slots = mapping_slots?;
        self.variables.iter().find_map(|var| self.identify_mapping_entry(var, slot, mapping_slots))
    }

    fn identify_mapping_entry(
        &self,
        var: &Variable,
        slot: &B256,
        mapping_slots: &MappingSlots,
    ) -> Option<SlotInfo> {
        if !matches!(var.layout, TypeLayout::Mapping { .. }) {
            return None;
        }
        let keys = mapping_slots.keys_from(&B256::from(var.slot), slot)?;
        trace!(variable = %var.name, depth = keys.len(), "matched mapping entry");

        let mut label = var.name.clone();
        let mut decoded_keys = Vec::with_capacity(keys.len());
        let mut layout = &var.layout;
        for key in &keys {
            let TypeLayout::Mapping { key: key_layout, value, .. } = layout else { return None };
            let decoded = key_layout
                .dyn_sol_type()
                .and_then(|ty| ty.abi_decode(key.as_slice()).ok())
                .map(|value| format_token_raw(&value))
                .unwrap_or_else(|| hex::encode_prefixed(key));
            label = format!("{label}[{decoded}]");
            decoded_keys.push(decoded);
            layout = value.as_ref();
        }

        let target = U256::from_be_bytes(slot.0);
        let mut info = match layout {
            TypeLayout::Struct { .. } | TypeLayout::FixedArray { .. } => {
                SlotInfo::from_located(layout.locate(label, target, 0, target)?, target)
            }
            _ => SlotInfo::new(label, var.layout.label().to_string(), layout.clone(), 0, target),
        };
        info.keys = Some(decoded_keys);
        Some(info)
    }

    /// Identifies the data slots of dynamic arrays and long `bytes`/`string` values, using the
    /// current header values in `storage_values` to learn their lengths.
    pub fn identify_dynamic(
        &self,
        slot: &B256,
        storage_values: &B256HashMap<B256>,
    ) -> Option<SlotInfo> {
        let target = U256::from_be_bytes(slot.0);
        self.variables.iter().find_map(|var| {
            let header = storage_values.get(&B256::from(var.slot))?;
            let data_start = U256::from_be_bytes(keccak256(B256::from(var.slot)).0);
            match &var.layout {
                TypeLayout::Bytes { label, .. } => {
                    if header[31] & 1 == 0 || target < data_start {
                        return None;
                    }
                    let length = U256::from_be_bytes::<32>(header.0) >> 1usize;
                    let index = target - data_start;
                    if index >= (length + U256::from(31)) / U256::from(32) {
                        return None;
                    }
                    Some(SlotInfo::new(
                        format!("{}[{index}]", var.name),
                        label.clone(),
                        bytes32(),
                        0,
                        target,
                    ))
                }
                TypeLayout::DynamicArray { base, .. } => {
                    let length = U256::from_be_bytes(header.0);
                    let located = var.layout.locate_element(
                        base,
                        length,
                        var.name.clone(),
                        data_start,
                        target,
                        0,
                    )?;
                    Some(SlotInfo::from_located(located, target))
                }
                _ => None,
            }
        })
    }

    /// Identifies `slot` and decodes its recorded values.
    ///
    /// `storage_accesses` holds every written slot of the account as `slot => (previous, new)`.
    /// Headers of dynamic values are looked up there, preferring the new value.
    pub fn identify_with_values(
        &self,
        slot: &B256,
        mapping_slots: Option<&MappingSlots>,
        storage_accesses: &BTreeMap<B256, (B256, B256)>,
    ) -> Option<SlotInfo> {
        let mut info = self.identify(slot, mapping_slots).or_else(|| {
            let new_values =
                storage_accesses.iter().map(|(slot, (_, new))| (*slot, *new)).collect();
            let previous_values = storage_accesses
                .iter()
                .map(|(slot, (previous, _))| (*slot, *previous))
                .collect();
            self.identify_dynamic(slot, &new_values)
                .or_else(|| self.identify_dynamic(slot, &previous_values))
        })?;

        let (previous_value, new_value) = storage_accesses.get(slot).copied().unwrap_or_default();
        if info.is_bytes_or_string() {
            info.decode_bytes_or_string_values(slot, storage_accesses);
        } else {
            info.decode_values(previous_value, new_value);
        }
        Some(info)
    }
}

fn bytes32() -> TypeLayout {
    TypeLayout::Scalar { label: "bytes32".to_string(), ty: DynSolType::FixedBytes(32), size: 32 }
}
