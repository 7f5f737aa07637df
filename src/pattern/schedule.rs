//! Exchange schedule produced by pattern resolution.
//!
//! `send_map` and `recv_map` hold local indices grouped by peer rank in
//! increasing rank order; `send_counts[p]`/`recv_counts[p]` give the length of
//! the block for rank `p`. Within a block, the order is the order in which the
//! receiving rank requested the gids, so sender and receiver agree on position
//! without re-sending indices.

use itertools::Itertools;

use crate::algs::exchange::data_exchange::displacements;
use crate::debug_invariants::{DebugInvariants, ensure};
use crate::pattern_error::CommPatternError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommSchedule {
    send_map: Vec<usize>,
    send_counts: Vec<usize>,
    recv_map: Vec<usize>,
    recv_counts: Vec<usize>,
    send_displs: Vec<usize>,
    recv_displs: Vec<usize>,
}

impl CommSchedule {
    /// Empty schedule for a communicator of `size` ranks.
    pub fn empty(size: usize) -> Self {
        Self::new(Vec::new(), vec![0; size], Vec::new(), vec![0; size])
    }

    pub fn new(
        send_map: Vec<usize>,
        send_counts: Vec<usize>,
        recv_map: Vec<usize>,
        recv_counts: Vec<usize>,
    ) -> Self {
        let send_displs = displacements(&send_counts);
        let recv_displs = displacements(&recv_counts);
        Self {
            send_map,
            send_counts,
            recv_map,
            recv_counts,
            send_displs,
            recv_displs,
        }
    }

    pub fn send_map(&self) -> &[usize] {
        &self.send_map
    }

    pub fn recv_map(&self) -> &[usize] {
        &self.recv_map
    }

    pub fn send_counts(&self) -> &[usize] {
        &self.send_counts
    }

    pub fn recv_counts(&self) -> &[usize] {
        &self.recv_counts
    }

    /// Local indices whose rows go to `rank`.
    pub fn send_to(&self, rank: usize) -> &[usize] {
        match (self.send_displs.get(rank), self.send_counts.get(rank)) {
            (Some(&start), Some(&n)) => &self.send_map[start..start + n],
            _ => &[],
        }
    }

    /// Local (ghost) indices filled from `rank`.
    pub fn recv_from(&self, rank: usize) -> &[usize] {
        match (self.recv_displs.get(rank), self.recv_counts.get(rank)) {
            (Some(&start), Some(&n)) => &self.recv_map[start..start + n],
            _ => &[],
        }
    }

    /// Ranks this rank exchanges anything with, ascending.
    pub fn neighbors(&self) -> Vec<usize> {
        self.send_counts
            .iter()
            .zip(&self.recv_counts)
            .positions(|(&s, &r)| s > 0 || r > 0)
            .collect()
    }

    /// Per-rank byte counts for rows of `row_bytes` bytes.
    pub fn send_bytes(&self, row_bytes: usize) -> Vec<usize> {
        self.send_counts.iter().map(|&n| n * row_bytes).collect()
    }

    pub fn recv_bytes(&self, row_bytes: usize) -> Vec<usize> {
        self.recv_counts.iter().map(|&n| n * row_bytes).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.send_map.is_empty() && self.recv_map.is_empty()
    }

    /// Check that every entry indexes into `n_local` local entities.
    pub fn validate_bounds(&self, n_local: usize) -> Result<(), CommPatternError> {
        if let Some(&bad) = self
            .send_map
            .iter()
            .chain(&self.recv_map)
            .find(|&&lid| lid >= n_local)
        {
            return Err(CommPatternError::IndexOutOfBounds {
                index: bad,
                len: n_local,
            });
        }
        Ok(())
    }
}

impl DebugInvariants for CommSchedule {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "CommSchedule");
    }

    fn validate_invariants(&self) -> Result<(), CommPatternError> {
        ensure(self.send_counts.len() == self.recv_counts.len(), || {
            "send/recv count vectors differ in length".to_string()
        })?;
        ensure(self.send_counts.iter().sum::<usize>() == self.send_map.len(), || {
            format!(
                "send counts sum to {}, send map has {}",
                self.send_counts.iter().sum::<usize>(),
                self.send_map.len()
            )
        })?;
        ensure(self.recv_counts.iter().sum::<usize>() == self.recv_map.len(), || {
            format!(
                "recv counts sum to {}, recv map has {}",
                self.recv_counts.iter().sum::<usize>(),
                self.recv_map.len()
            )
        })?;
        ensure(self.recv_map.iter().all_unique(), || {
            "a ghost slot is filled twice".to_string()
        })
    }
}
