//! Solidity storage layouts and the recursive [`TypeLayout`] model resolved from them.
//!
//! A [`StorageLayout`] is the `storageLayout` JSON emitted by `solc`. Every declared type is
//! resolved into a [`TypeLayout`] tree which knows how many slots a value occupies, where its
//! children live, and how a raw 32-byte word decodes into a [`DynSolValue`].
//!
//! See <https://docs.soliditylang.org/en/latest/internals/layout_in_storage.html>.

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{Address, B256, I256, U256};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, str::FromStr};

/// "inplace" encoding: the value lives directly in one or more consecutive slots.
pub const ENCODING_INPLACE: &str = "inplace";
/// "mapping" encoding: entries live at `keccak256(key . slot)`.
pub const ENCODING_MAPPING: &str = "mapping";
/// "bytes" encoding: short values in place, long values at `keccak256(slot)`.
pub const ENCODING_BYTES: &str = "bytes";
/// "dynamic_array" encoding: the length in place, elements at `keccak256(slot)`.
pub const ENCODING_DYN_ARRAY: &str = "dynamic_array";

/// Nesting limit for composite types. Anything deeper resolves to [`TypeLayout::Opaque`].
pub const MAX_DEPTH: usize = 10;

/// The `storageLayout` output of the Solidity compiler.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLayout {
    /// Top-level state variables, in declaration order.
    #[serde(default)]
    pub storage: Vec<Storage>,
    /// Type definitions, keyed by type identifier (e.g. `t_uint256`).
    #[serde(default)]
    pub types: BTreeMap<String, StorageType>,
}

/// A state variable or struct member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    /// Id of the declaration in the compiler's AST.
    #[serde(default)]
    pub ast_id: u64,
    /// `path:Name` of the declaring contract.
    #[serde(default)]
    pub contract: String,
    /// Name of the variable or member.
    pub label: String,
    /// Byte offset inside the slot, counted from the least significant end.
    #[serde(default)]
    pub offset: i64,
    /// Decimal slot number, relative to the enclosing struct for members.
    pub slot: String,
    /// Identifier of the type, a key of [`StorageLayout::types`].
    #[serde(rename = "type")]
    pub storage_type: String,
}

/// A type definition inside a [`StorageLayout`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageType {
    /// `inplace`, `mapping`, `dynamic_array` or `bytes`.
    pub encoding: String,
    /// Key type of a mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Solidity spelling of the type.
    pub label: String,
    /// Decimal size in place.
    pub number_of_bytes: String,
    /// Value type of a mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Element type of an array.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    /// Members of a struct.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<Storage>>,
}

impl StorageLayout {
    /// Returns the state variable with the given name.
    pub fn variable(&self, label: &str) -> Option<&Storage> {
        self.storage.iter().find(|storage| storage.label == label)
    }

    /// Resolves every state variable into its base slot and [`TypeLayout`].
    ///
    /// Variables with an unparsable slot are skipped.
    pub fn variables(&self) -> impl Iterator<Item = (&Storage, U256, TypeLayout)> + '_ {
        self.storage.iter().filter_map(|storage| {
            let slot = U256::from_str(&storage.slot).ok()?;
            Some((storage, slot, self.resolve(&storage.storage_type)))
        })
    }

    /// Resolves the type with the given identifier.
    ///
    /// Never fails: unknown, unsupported or too deeply nested types become
    /// [`TypeLayout::Opaque`].
    pub fn resolve(&self, type_id: &str) -> TypeLayout {
        self.resolve_at_depth(type_id, 0)
    }

    fn resolve_at_depth(&self, type_id: &str, depth: usize) -> TypeLayout {
        let Some(ty) = self.types.get(type_id) else {
            return TypeLayout::Opaque { label: type_id.to_string(), size: U256::from(32) };
        };
        let size = U256::from_str(&ty.number_of_bytes).unwrap_or(U256::from(32));
        let label = ty.label.clone();
        if depth > MAX_DEPTH {
            return TypeLayout::Opaque { label, size };
        }

        match ty.encoding.as_str() {
            ENCODING_MAPPING => match (&ty.key, &ty.value) {
                (Some(key), Some(value)) => TypeLayout::Mapping {
                    label,
                    key: Box::new(self.resolve_at_depth(key, depth + 1)),
                    value: Box::new(self.resolve_at_depth(value, depth + 1)),
                },
                _ => TypeLayout::Opaque { label, size },
            },
            ENCODING_BYTES => {
                let is_string = label == "string";
                TypeLayout::Bytes { label, is_string }
            }
            ENCODING_DYN_ARRAY => match &ty.base {
                Some(base) => TypeLayout::DynamicArray {
                    label,
                    base: Box::new(self.resolve_at_depth(base, depth + 1)),
                },
                None => TypeLayout::Opaque { label, size },
            },
            ENCODING_INPLACE => {
                if let Some(members) = &ty.members {
                    let members = members
                        .iter()
                        .map(|member| MemberLayout {
                            name: member.label.clone(),
                            slot: U256::from_str(&member.slot).unwrap_or_default(),
                            offset: member.offset.max(0) as usize,
                            layout: self.resolve_at_depth(&member.storage_type, depth + 1),
                        })
                        .collect();
                    TypeLayout::Struct { label, members, size }
                } else if let Some(base) = &ty.base {
                    match array_len(&label) {
                        Some(len) => TypeLayout::FixedArray {
                            label,
                            base: Box::new(self.resolve_at_depth(base, depth + 1)),
                            len,
                            size,
                        },
                        None => TypeLayout::Opaque { label, size },
                    }
                } else {
                    let bytes = size.saturating_to::<usize>();
                    match scalar_type(&label, bytes) {
                        Some(ty) if (1..=32).contains(&bytes) => {
                            TypeLayout::Scalar { label, ty, size: bytes }
                        }
                        _ => TypeLayout::Opaque { label, size },
                    }
                }
            }
            _ => TypeLayout::Opaque { label, size },
        }
    }
}

/// The resolved shape of a storage type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeLayout {
    /// A value type that fits in a single slot, possibly sharing it with neighbours.
    Scalar {
        /// Type label.
        label: String,
        /// ABI type the value decodes as.
        ty: DynSolType,
        /// Bytes in place.
        size: usize,
    },
    /// `T[N]`, laid out in place.
    FixedArray {
        /// Type label.
        label: String,
        /// Element type.
        base: Box<Self>,
        /// Number of elements.
        len: usize,
        /// Bytes in place.
        size: U256,
    },
    /// `T[]`: the length in place, elements from `keccak256(slot)`.
    DynamicArray {
        /// Type label.
        label: String,
        /// Element type.
        base: Box<Self>,
    },
    /// `bytes` or `string`.
    Bytes {
        /// Type label.
        label: String,
        /// Whether the data is UTF-8 text.
        is_string: bool,
    },
    /// `mapping(K => V)`: the slot itself stays empty.
    Mapping {
        /// Type label.
        label: String,
        /// Key type.
        key: Box<Self>,
        /// Value type.
        value: Box<Self>,
    },
    /// A struct laid out in place.
    Struct {
        /// Type label.
        label: String,
        /// Members in declaration order.
        members: Vec<MemberLayout>,
        /// Bytes in place.
        size: U256,
    },
    /// Anything the decoder does not understand.
    Opaque {
        /// Type label, or the type identifier if the type is unknown.
        label: String,
        /// Bytes in place.
        size: U256,
    },
}

/// A struct member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberLayout {
    /// Member name.
    pub name: String,
    /// Slot relative to the start of the struct.
    pub slot: U256,
    /// Byte offset inside the slot.
    pub offset: usize,
    /// Member type.
    pub layout: TypeLayout,
}

/// A value located by [`TypeLayout::locate`] which starts in the requested slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotLeaf<'a> {
    /// Access path of the value, e.g. `config.limits[2]`.
    pub label: String,
    /// Byte offset inside the slot.
    pub offset: usize,
    /// Type of the value.
    pub layout: &'a TypeLayout,
}

/// Result of locating a slot inside a [`TypeLayout`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Located<'a> {
    /// One value occupies the slot.
    Leaf(SlotLeaf<'a>),
    /// Several sub-word values of `layout` share the slot.
    Packed {
        /// Access path of the enclosing value.
        label: String,
        /// Type of the enclosing value.
        layout: &'a TypeLayout,
        /// The values sharing the slot, by offset.
        leaves: Vec<SlotLeaf<'a>>,
    },
}

impl TypeLayout {
    /// The type label as printed by the compiler, e.g. `mapping(address => uint256)`.
    pub fn label(&self) -> &str {
        match self {
            Self::Scalar { label, .. } |
            Self::FixedArray { label, .. } |
            Self::DynamicArray { label, .. } |
            Self::Bytes { label, .. } |
            Self::Mapping { label, .. } |
            Self::Struct { label, .. } |
            Self::Opaque { label, .. } => label,
        }
    }

    /// Number of bytes the value occupies in place.
    pub fn size(&self) -> U256 {
        match self {
            Self::Scalar { size, .. } => U256::from(*size),
            Self::FixedArray { size, .. } | Self::Struct { size, .. } | Self::Opaque { size, .. } => {
                *size
            }
            Self::DynamicArray { .. } | Self::Bytes { .. } | Self::Mapping { .. } => U256::from(32),
        }
    }

    /// Number of consecutive slots the value occupies in place, at least one.
    pub fn slot_count(&self) -> U256 {
        let slots = (self.size() + U256::from(31)) / U256::from(32);
        slots.max(U256::from(1))
    }

    /// How many consecutive array elements of this type share a slot.
    pub fn elements_per_slot(&self) -> usize {
        match self {
            Self::Scalar { size, .. } if *size < 32 => 32 / *size,
            _ => 1,
        }
    }

    /// The ABI type used to decode values of this type, if it has one.
    pub fn dyn_sol_type(&self) -> Option<DynSolType> {
        match self {
            Self::Scalar { ty, .. } => Some(ty.clone()),
            Self::FixedArray { base, len, .. } => {
                Some(DynSolType::FixedArray(Box::new(base.dyn_sol_type()?), *len))
            }
            Self::DynamicArray { base, .. } => Some(DynSolType::Array(Box::new(base.dyn_sol_type()?))),
            Self::Bytes { is_string: true, .. } => Some(DynSolType::String),
            Self::Bytes { is_string: false, .. } => Some(DynSolType::Bytes),
            Self::Struct { label, members, .. } => {
                let tuple = members
                    .iter()
                    .map(|member| member.layout.dyn_sol_type())
                    .collect::<Option<Vec<_>>>()?;
                Some(DynSolType::CustomStruct {
                    name: struct_name(label).to_string(),
                    prop_names: members.iter().map(|member| member.name.clone()).collect(),
                    tuple,
                })
            }
            Self::Mapping { .. } | Self::Opaque { .. } => None,
        }
    }

    /// Finds the value(s) of a variable named `label`, rooted at `base`, that start in `target`.
    ///
    /// This only walks the in-place part of the layout. Mapping entries and dynamic data are
    /// resolved by the slot identifier.
    pub fn locate(&self, label: String, base: U256, offset: usize, target: U256) -> Option<Located<'_>> {
        self.locate_at_depth(label, base, offset, target, 0)
    }

    fn locate_at_depth(
        &self,
        label: String,
        base: U256,
        offset: usize,
        target: U256,
        depth: usize,
    ) -> Option<Located<'_>> {
        if depth > MAX_DEPTH || target < base || target - base >= self.slot_count() {
            return None;
        }

        match self {
            Self::FixedArray { base: element, len, .. } => {
                self.locate_element(element, U256::from(*len), label, base, target, depth)
            }
            Self::Struct { members, .. } => {
                let relative = target - base;
                let occupants = members
                    .iter()
                    .filter(|member| {
                        member.slot <= relative && relative - member.slot < member.layout.slot_count()
                    })
                    .collect::<Vec<_>>();
                match occupants.as_slice() {
                    [] => None,
                    [member] => member.layout.locate_at_depth(
                        format!("{label}.{}", member.name),
                        base + member.slot,
                        member.offset,
                        target,
                        depth + 1,
                    ),
                    _ => Some(Located::Packed {
                        label,
                        layout: self,
                        leaves: occupants
                            .into_iter()
                            .map(|member| SlotLeaf {
                                label: member.name.clone(),
                                offset: member.offset,
                                layout: &member.layout,
                            })
                            .collect(),
                    }),
                }
            }
            _ => Some(Located::Leaf(SlotLeaf { label, offset, layout: self })),
        }
    }

    /// Locates `target` among the elements of an array of `len` elements starting at `start`.
    ///
    /// `self` is the enclosing array, reported when several elements share the slot.
    pub fn locate_element<'a>(
        &'a self,
        element: &'a Self,
        len: U256,
        label: String,
        start: U256,
        target: U256,
        depth: usize,
    ) -> Option<Located<'a>> {
        if target < start {
            return None;
        }
        let relative = target - start;
        let per_slot = element.elements_per_slot();
        if per_slot > 1 {
            let first = relative.checked_mul(U256::from(per_slot))?;
            if first >= len {
                return None;
            }
            let end = (first + U256::from(per_slot)).min(len);
            let first = first.saturating_to::<usize>();
            let end = end.saturating_to::<usize>();
            let element_size = element.size().saturating_to::<usize>();
            let mut leaves = (first..end)
                .map(|index| SlotLeaf {
                    label: format!("{label}[{index}]"),
                    offset: (index - first) * element_size,
                    layout: element,
                })
                .collect::<Vec<_>>();
            return if leaves.len() == 1 {
                leaves.pop().map(Located::Leaf)
            } else {
                Some(Located::Packed { label, layout: self, leaves })
            };
        }

        let element_slots = element.slot_count();
        let index = relative / element_slots;
        if index >= len {
            return None;
        }
        element.locate_at_depth(
            format!("{label}[{index}]"),
            start + index * element_slots,
            0,
            target,
            depth + 1,
        )
    }

    /// Decodes the value of this type stored at byte `offset` of `word`.
    ///
    /// Returns `None` for values that do not fit in the word, such as long `bytes`, or for types
    /// without a decoder.
    pub fn decode(&self, word: B256, offset: usize) -> Option<DynSolValue> {
        match self {
            Self::Scalar { ty, size, .. } => {
                let end = 32usize.checked_sub(offset)?;
                let start = end.checked_sub(*size)?;
                decode_scalar(ty, &word[start..end])
            }
            Self::Bytes { is_string, .. } => {
                let length_byte = word[31];
                if length_byte & 1 == 1 {
                    return None;
                }
                let data = word[..(length_byte >> 1).min(31) as usize].to_vec();
                Some(if *is_string {
                    DynSolValue::String(String::from_utf8_lossy(&data).into_owned())
                } else {
                    DynSolValue::Bytes(data)
                })
            }
            Self::Struct { label, members, .. } if self.slot_count() == U256::from(1) => {
                let tuple = members
                    .iter()
                    .map(|member| member.layout.decode(word, member.offset))
                    .collect::<Option<Vec<_>>>()?;
                Some(DynSolValue::CustomStruct {
                    name: struct_name(label).to_string(),
                    prop_names: members.iter().map(|member| member.name.clone()).collect(),
                    tuple,
                })
            }
            Self::FixedArray { base, len, .. } if self.slot_count() == U256::from(1) => {
                let element_size = base.size().saturating_to::<usize>();
                let values = (0..*len)
                    .map(|index| base.decode(word, index * element_size))
                    .collect::<Option<Vec<_>>>()?;
                Some(DynSolValue::FixedArray(values))
            }
            _ => None,
        }
    }
}

/// Decodes a value type from its packed big-endian storage bytes.
fn decode_scalar(ty: &DynSolType, bytes: &[u8]) -> Option<DynSolValue> {
    let mut padded = [0u8; 32];
    padded[32 - bytes.len()..].copy_from_slice(bytes);
    let value = match ty {
        DynSolType::Bool => DynSolValue::Bool(bytes.iter().any(|byte| *byte != 0)),
        DynSolType::Address => DynSolValue::Address(Address::from_slice(&padded[12..])),
        DynSolType::Uint(bits) => DynSolValue::Uint(U256::from_be_bytes(padded), *bits),
        DynSolType::Int(bits) => {
            if bytes.first().is_some_and(|byte| byte & 0x80 != 0) {
                padded[..32 - bytes.len()].fill(0xff);
            }
            DynSolValue::Int(I256::from_be_bytes(padded), *bits)
        }
        DynSolType::FixedBytes(size) => {
            let mut word = B256::ZERO;
            let size = (*size).min(bytes.len());
            word[..size].copy_from_slice(&bytes[..size]);
            DynSolValue::FixedBytes(word, size)
        }
        _ => ty.abi_decode(&padded).ok()?,
    };
    Some(value)
}

/// Maps a value-type label to its ABI type.
fn scalar_type(label: &str, size: usize) -> Option<DynSolType> {
    if label.starts_with("enum ") {
        return Some(DynSolType::Uint(size * 8));
    }
    if label.starts_with("contract ") || label.starts_with("address") {
        return Some(DynSolType::Address);
    }
    match DynSolType::parse(label).ok()? {
        ty @ (DynSolType::Bool |
        DynSolType::Int(_) |
        DynSolType::Uint(_) |
        DynSolType::FixedBytes(_) |
        DynSolType::Address |
        DynSolType::Function) => Some(ty),
        _ => None,
    }
}

/// Returns the outermost length of a fixed array label, e.g. `2` for `uint256[3][2]`.
fn array_len(label: &str) -> Option<usize> {
    let (_, last) = label.rsplit_once('[')?;
    last.strip_suffix(']')?.parse().ok()
}

/// `struct Contract.Name` -> `Contract.Name`.
fn struct_name(label: &str) -> &str {
    label.strip_prefix("struct ").unwrap_or(label)
}
