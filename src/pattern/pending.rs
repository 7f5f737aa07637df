//! Structural mutations queued between two resolutions.

use hashbrown::HashSet;

use crate::algs::wire::{EVENT_MOVE, EVENT_REMOVE_ALL, WireEvent};
use crate::pattern_error::CommPatternError;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AddRequest {
    pub gid: u64,
    pub rank: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MoveRequest {
    pub gid: u64,
    pub rank: usize,
    pub keep_as_ghost: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RemoveRequest {
    pub gid: u64,
    pub rank: usize,
    pub on_all_ranks: bool,
}

/// Sizes of the three pending buffers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub adds: usize,
    pub moves: usize,
    pub removes: usize,
}

#[derive(Clone, Debug, Default)]
pub struct PendingMutations {
    pub(crate) adds: Vec<AddRequest>,
    pub(crate) moves: Vec<MoveRequest>,
    pub(crate) removes: Vec<RemoveRequest>,
}

impl PendingMutations {
    pub fn counts(&self) -> PendingCounts {
        PendingCounts {
            adds: self.adds.len(),
            moves: self.moves.len(),
            removes: self.removes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.moves.is_empty() && self.removes.is_empty()
    }

    pub fn clear(&mut self) {
        self.adds.clear();
        self.moves.clear();
        self.removes.clear();
    }

    /// Reject a buffer that adds the same gid twice.
    pub fn check_duplicate_adds(&self) -> Result<(), CommPatternError> {
        let mut seen = HashSet::with_capacity(self.adds.len());
        for add in &self.adds {
            if !seen.insert(add.gid) {
                return Err(CommPatternError::DuplicateGlobalId(add.gid));
            }
        }
        Ok(())
    }

    /// Mutations every rank has to learn about: moves and removals flagged
    /// `on_all_ranks`, in queue order.
    pub fn global_events(&self) -> Vec<WireEvent> {
        let moves = self
            .moves
            .iter()
            .map(|m| WireEvent::new(EVENT_MOVE, m.gid, m.rank, m.keep_as_ghost));
        let removes = self
            .removes
            .iter()
            .filter(|r| r.on_all_ranks)
            .map(|r| WireEvent::new(EVENT_REMOVE_ALL, r.gid, r.rank, true));
        moves.chain(removes).collect()
    }

    /// Removals that only drop this rank's copy.
    pub fn local_removes(&self) -> impl Iterator<Item = &RemoveRequest> + '_ {
        self.removes.iter().filter(|r| !r.on_all_ranks)
    }
}
