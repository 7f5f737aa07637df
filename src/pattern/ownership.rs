//! Ownership metadata for local entities.
//!
//! [`LocalOwnership`] records, for every local index, the owning rank and
//! whether the entity is a ghost on the current rank. `is_updatable` is simply
//! the negation of `is_ghost`.

use serde::{Deserialize, Serialize};

use crate::pattern_error::CommPatternError;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OwnershipEntry {
    pub owner: usize,
    pub is_ghost: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LocalOwnership {
    entries: Vec<OwnershipEntry>,
}

impl LocalOwnership {
    /// Number of local entities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entity owned by `owner`, deciding ghostness against `my_rank`.
    pub fn push_from_owner(&mut self, owner: usize, my_rank: usize) {
        self.entries.push(OwnershipEntry {
            owner,
            is_ghost: owner != my_rank,
        });
    }

    /// Update the owner of `lid`.
    pub fn set_from_owner(
        &mut self,
        lid: usize,
        owner: usize,
        my_rank: usize,
    ) -> Result<(), CommPatternError> {
        let len = self.entries.len();
        let entry = self
            .entries
            .get_mut(lid)
            .ok_or(CommPatternError::IndexOutOfBounds { index: lid, len })?;
        *entry = OwnershipEntry {
            owner,
            is_ghost: owner != my_rank,
        };
        Ok(())
    }

    pub fn entry(&self, lid: usize) -> Option<OwnershipEntry> {
        self.entries.get(lid).copied()
    }

    pub fn owner(&self, lid: usize) -> Option<usize> {
        self.entry(lid).map(|entry| entry.owner)
    }

    pub fn is_ghost(&self, lid: usize) -> Option<bool> {
        self.entry(lid).map(|entry| entry.is_ghost)
    }

    pub fn is_owned_by(&self, lid: usize, rank: usize) -> bool {
        self.owner(lid).is_some_and(|owner| owner == rank)
    }

    /// Local indices of owned (updatable) entities, ascending.
    pub fn owned_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(lid, entry)| (!entry.is_ghost).then_some(lid))
    }

    /// Local indices of ghosts, ascending.
    pub fn ghost_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(lid, entry)| entry.is_ghost.then_some(lid))
    }

    /// `is_updatable` flag per local index.
    pub fn updatable_flags(&self) -> Vec<bool> {
        self.entries.iter().map(|entry| !entry.is_ghost).collect()
    }

    /// Keep entries whose flag is set, preserving order.
    pub fn retain(&mut self, keep: &[bool]) {
        let mut flags = keep.iter();
        self.entries
            .retain(|_| flags.next().copied().unwrap_or(true));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ghostness_follows_owner() {
        let mut own = LocalOwnership::default();
        own.push_from_owner(1, 1);
        own.push_from_owner(0, 1);
        assert_eq!(own.owned_indices().collect::<Vec<_>>(), vec![0]);
        assert_eq!(own.ghost_indices().collect::<Vec<_>>(), vec![1]);
        own.set_from_owner(1, 1, 1).unwrap();
        assert_eq!(own.updatable_flags(), vec![true, true]);
        assert!(own.set_from_owner(5, 0, 1).is_err());
    }

    #[test]
    fn retain_compacts() {
        let mut own = LocalOwnership::default();
        for owner in [0, 1, 2] {
            own.push_from_owner(owner, 0);
        }
        own.retain(&[false, true, true]);
        assert_eq!(own.len(), 2);
        assert_eq!(own.owner(0), Some(1));
    }
}
