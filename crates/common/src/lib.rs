//! # sandbox-common
//!
//! Storage layout modelling, mapping slot tracking and typed slot decoding shared by the
//! sandbox crates.

#![warn(missing_docs, unused_crate_dependencies)]

#[macro_use]
extern crate tracing;

pub mod fmt;
pub mod layout;
pub mod mapping_slots;
pub mod slot_identifier;

pub use layout::{StorageLayout, TypeLayout};
pub use mapping_slots::MappingSlots;
pub use slot_identifier::{DecodedSlotValues, SlotIdentifier, SlotInfo};
