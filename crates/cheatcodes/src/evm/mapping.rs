use crate::Cheatcodes;
use alloy_primitives::{Address, B256};
use sandbox_common::MappingSlots;

impl Cheatcodes {
    /// Starts tracking keccak preimages and writes of mapping entries.
    pub fn start_mapping_recording(&mut self) {
        self.mapping_slots.get_or_insert_default();
    }

    pub fn stop_mapping_recording(&mut self) {
        self.mapping_slots = None;
    }

    /// Returns the number of written entries of the mapping at `mapping_slot` of `target`.
    pub fn get_mapping_length(&self, target: Address, mapping_slot: B256) -> u64 {
        self.slot_children(&target, &mapping_slot).map_or(0, |children| children.len() as u64)
    }

    /// Returns the slot of the `idx`-th written entry of the mapping, or zero.
    pub fn get_mapping_slot_at(&self, target: Address, mapping_slot: B256, idx: usize) -> B256 {
        self.slot_children(&target, &mapping_slot)
            .and_then(|children| children.get(idx))
            .copied()
            .unwrap_or_default()
    }

    /// Returns the key and the parent slot of a mapping entry slot, if known.
    pub fn get_mapping_key_and_parent_of(
        &self,
        target: Address,
        element_slot: B256,
    ) -> Option<(B256, B256)> {
        self.mapping_slots_of(&target)?.key_and_parent_of(&element_slot)
    }

    fn mapping_slots_of(&self, target: &Address) -> Option<&MappingSlots> {
        self.mapping_slots.as_ref()?.get(target)
    }

    fn slot_children(&self, target: &Address, slot: &B256) -> Option<&Vec<B256>> {
        self.mapping_slots_of(target)?.children.get(slot)
    }
}
