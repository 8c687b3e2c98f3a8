//! Support for snapshotting different states

use alloy_primitives::{U256, map::HashMap};

/// Represents all state snapshots
///
/// Ids are handed out in increasing order and are never reused, even after the snapshot they
/// pointed to was removed.
#[derive(Clone, Debug)]
pub struct StateSnapshots<T> {
    id: U256,
    state_snapshots: HashMap<U256, T>,
}

impl<T> StateSnapshots<T> {
    fn next_id(&mut self) -> U256 {
        let id = self.id;
        self.id = id.saturating_add(U256::from(1));
        id
    }

    /// Returns the state snapshot with the given id `id`
    pub fn get(&self, id: U256) -> Option<&T> {
        self.state_snapshots.get(&id)
    }

    /// Removes the state snapshot with the given `id`.
    ///
    /// Does not touch any other snapshot.
    pub fn remove_at(&mut self, id: U256) -> Option<T> {
        self.state_snapshots.remove(&id)
    }

    /// Removes all state snapshots.
    pub fn clear(&mut self) {
        self.state_snapshots.clear();
    }

    /// Inserts the new state snapshot and returns the id.
    pub fn insert(&mut self, state_snapshot: T) -> U256 {
        let id = self.next_id();
        self.state_snapshots.insert(id, state_snapshot);
        id
    }

    /// Inserts the new state snapshot at the given `id`.
    ///
    /// Does not auto-increment the next `id`.
    pub fn insert_at(&mut self, state_snapshot: T, id: U256) {
        self.state_snapshots.insert(id, state_snapshot);
    }

    /// Returns the number of live state snapshots.
    pub fn len(&self) -> usize {
        self.state_snapshots.len()
    }

    /// Returns true if there are no live state snapshots.
    pub fn is_empty(&self) -> bool {
        self.state_snapshots.is_empty()
    }
}

impl<T> Default for StateSnapshots<T> {
    fn default() -> Self {
        Self { id: U256::ZERO, state_snapshots: HashMap::default() }
    }
}
