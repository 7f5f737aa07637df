//! Collective resolution of queued mutations.
//!
//! Order of operations, identical on every rank:
//! 1. gather moves and global removals from every rank (rank order, then
//!    queue order; the first request for a gid wins), and agree that no rank
//!    removes locally an entity moving onto it,
//! 2. current owners ship the rows of moved entities to their new owners,
//! 3. apply ownership changes, then removals, compacting storage stably,
//! 4. append queued adds,
//! 5. group ghosts by owner, request their gids from the owners, and turn the
//!    requests each rank receives into its send map.

use hashbrown::hash_map::Entry;
use hashbrown::{HashMap, HashSet};

use crate::algs::communicator::Communicator;
use crate::algs::synchronizer::Synchronizer;
use crate::algs::exchange::size_exchange::exchange_counts;
use crate::algs::wire::{
    EVENT_MOVE, EVENT_REMOVE_ALL, WIRE_VERSION, WireCount, WireEvent, WireGid, cast_slice,
    decode_vec,
};
use crate::data::typed_buffer::TypedBuffer;
use crate::debug_invariants::DebugInvariants;
use crate::pattern::comm_pattern::{CommPattern, PatternState, gid_values};
use crate::pattern::pending::{MoveRequest, RemoveRequest};
use crate::pattern::schedule::CommSchedule;
use crate::pattern_error::CommPatternError;

/// Moves and global removals agreed on by every rank.
#[derive(Debug, Default)]
struct GlobalEvents {
    moves: Vec<MoveRequest>,
    removes: Vec<RemoveRequest>,
}

impl GlobalEvents {
    fn from_wire(events: &[WireEvent], size: usize) -> Result<Self, CommPatternError> {
        let mut moves: Vec<MoveRequest> = Vec::new();
        let mut move_at: HashMap<u64, usize> = HashMap::new();
        let mut removes = Vec::new();
        let mut removed = HashSet::new();
        for ev in events {
            if ev.version() != WIRE_VERSION {
                return Err(CommPatternError::CorruptBuffer(format!(
                    "event wire version {} (expected {})",
                    ev.version(),
                    WIRE_VERSION
                )));
            }
            let rank = ev.rank();
            if rank >= size {
                return Err(CommPatternError::InvalidRank { rank, size });
            }
            match ev.kind {
                EVENT_MOVE => {
                    let req = MoveRequest {
                        gid: ev.gid(),
                        rank,
                        keep_as_ghost: ev.flag(),
                    };
                    match move_at.entry(req.gid) {
                        Entry::Occupied(at) => {
                            let kept = moves[*at.get()];
                            if kept != req {
                                log::warn!(
                                    "conflicting moves of gid {}: keeping {:?}, ignoring {:?}",
                                    req.gid,
                                    kept,
                                    req
                                );
                            }
                        }
                        Entry::Vacant(slot) => {
                            slot.insert(moves.len());
                            moves.push(req);
                        }
                    }
                }
                EVENT_REMOVE_ALL => {
                    if removed.insert(ev.gid()) {
                        removes.push(RemoveRequest {
                            gid: ev.gid(),
                            rank,
                            on_all_ranks: true,
                        });
                    }
                }
                other => {
                    return Err(CommPatternError::CorruptBuffer(format!(
                        "unknown event kind {other}"
                    )));
                }
            }
        }
        // removal wins over a move of the same gid
        moves.retain(|m| !removed.contains(&m.gid));
        Ok(Self { moves, removes })
    }
}

fn scale(counts: &[usize], k: usize) -> Vec<usize> {
    counts.iter().map(|&n| n * k).collect()
}

impl<C: Communicator> CommPattern<'_, C> {
    /// Apply every queued mutation and rebuild the schedule. Collective.
    ///
    /// State checks and local bookkeeping errors (duplicate adds, removals of
    /// unknown entities or with the wrong owner) fail before any communication.
    /// A failure detected after communication started leaves the pattern
    /// `Dirty`, and peers may block in the next collective of this call.
    pub fn setup(&mut self) -> Result<(), CommPatternError> {
        if self.gids.is_none() {
            return Err(CommPatternError::illegal(
                "setup",
                "no global-id field registered",
            ));
        }
        self.validate_queued()?;

        let me = self.comm.rank();
        let queued = self.pending.counts();
        log::debug!(
            "[rank {}] resolving pattern: {} entities, {} adds, {} moves, {} removes queued",
            me,
            self.size(),
            queued.adds,
            queued.moves,
            queued.removes
        );
        self.state = PatternState::Dirty;

        let events = self.gather_events()?;
        self.check_moved_removals(&events.moves)?;
        self.migrate(&events.moves)?;
        let mut keep = vec![true; self.size()];
        self.apply_moves(&events.moves, &mut keep)?;
        self.apply_removals(&events.removes, &mut keep);
        self.compact(&keep)?;
        self.apply_adds()?;
        self.schedule = self.resolve_schedule()?;

        self.pending.clear();
        if let Some(gids) = self.gids.as_mut() {
            gids.clear_update();
        }
        if self.config.barrier_after_setup {
            self.comm.barrier()?;
        }
        self.state = PatternState::Ready;

        if self.config.validate_after_setup {
            self.validate_invariants()?;
        } else {
            self.debug_assert_invariants();
        }
        log::debug!(
            "[rank {}] pattern ready: {} owned, {} ghosts, {} neighbors",
            me,
            self.ownership.owned_indices().count(),
            self.ownership.ghost_indices().count(),
            self.schedule.neighbors().len()
        );
        Ok(())
    }

    /// Checks that need no communication: duplicate adds, and removals naming
    /// an entity or owner this rank does not hold.
    fn validate_queued(&self) -> Result<(), CommPatternError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.pending.check_duplicate_adds()?;
        let me = self.comm.rank();
        let removed: HashSet<u64> = self.pending.removes.iter().map(|r| r.gid).collect();
        for r in &self.pending.removes {
            match self.local_index(r.gid) {
                Some(lid) => {
                    let recorded = self.owner(lid)?;
                    if recorded != r.rank {
                        return Err(CommPatternError::OwnerMismatch {
                            gid: r.gid,
                            expected: r.rank,
                            found: recorded,
                        });
                    }
                }
                None if r.on_all_ranks => {}
                None => {
                    return Err(CommPatternError::NotFound {
                        gid: r.gid,
                        rank: me,
                    });
                }
            }
        }
        if let Some(add) = self
            .pending
            .adds
            .iter()
            .find(|a| self.local_index(a.gid).is_some() && !removed.contains(&a.gid))
        {
            return Err(CommPatternError::DuplicateGlobalId(add.gid));
        }
        Ok(())
    }

    /// Reject a local removal of an entity that a gathered move hands to this
    /// rank. Every rank sees the same moves, so either all ranks run the
    /// agreement or none does, and all of them fail together.
    fn check_moved_removals(&self, moves: &[MoveRequest]) -> Result<(), CommPatternError> {
        if moves.is_empty() {
            return Ok(());
        }
        let me = self.comm.rank();
        let incoming: HashSet<u64> = moves
            .iter()
            .filter(|m| m.rank == me)
            .map(|m| m.gid)
            .collect();
        let conflict = self
            .pending
            .local_removes()
            .find(|r| incoming.contains(&r.gid))
            .map(|r| r.gid);
        let agreed = Synchronizer::agree_dirty(self.comm, &[conflict.is_some()])?;
        match conflict {
            Some(gid) => Err(CommPatternError::illegal(
                "setup",
                format!("gid {gid} is queued for local removal on rank {me}, which it is moving to"),
            )),
            None if agreed.iter().any(|&d| d) => Err(CommPatternError::illegal(
                "setup",
                "another rank removes an entity that is moving to it",
            )),
            None => Ok(()),
        }
    }

    /// Every rank receives every rank's moves and global removals.
    fn gather_events(&self) -> Result<GlobalEvents, CommPatternError> {
        let size = self.comm.size();
        let local = self.pending.global_events();
        let counts = exchange_counts(self.comm, &vec![local.len(); size])?;
        if counts.iter().all(|&n| n == 0) {
            return Ok(GlobalEvents::default());
        }
        let block = cast_slice(&local);
        let send = block.repeat(size);
        let raw = self.comm.all_to_all_v(
            &send,
            &vec![block.len(); size],
            &scale(&counts, WireEvent::SIZE),
        )?;
        let events: Vec<WireEvent> = decode_vec(&raw)?;
        log::trace!(
            "[rank {}] gathered {} structural events",
            self.comm.rank(),
            events.len()
        );
        GlobalEvents::from_wire(&events, size)
    }

    /// Ship the rows of every registered field for each moved entity from its
    /// current owner to its new owner. A new owner that did not hold the
    /// entity gets a fresh slot; one holding it as a ghost has it overwritten.
    fn migrate(&mut self, moves: &[MoveRequest]) -> Result<(), CommPatternError> {
        if moves.is_empty() {
            return Ok(());
        }
        let (me, size) = (self.comm.rank(), self.comm.size());
        let mut outgoing = vec![TypedBuffer::new(); size];
        for m in moves.iter().filter(|m| m.rank != me) {
            let Some(lid) = self.local_index(m.gid) else {
                continue;
            };
            if !self.ownership.is_owned_by(lid, me) {
                continue;
            }
            let buf = &mut outgoing[m.rank];
            buf.pack(WireGid::of(m.gid));
            buf.pack(WireCount::new(self.fields.len()));
            for field in &self.fields {
                field.pack_rows(&[lid], buf)?;
            }
        }

        let send_counts: Vec<usize> = outgoing.iter().map(TypedBuffer::packed_size).collect();
        let recv_counts = exchange_counts(self.comm, &send_counts)?;
        let send: Vec<u8> = outgoing
            .iter()
            .flat_map(|b| b.as_bytes())
            .copied()
            .collect();
        let raw = self.comm.all_to_all_v(&send, &send_counts, &recv_counts)?;

        let mut incoming = TypedBuffer::from_bytes(raw);
        let mut arrived = 0usize;
        while incoming.remaining() > 0 {
            let gid = incoming.unpack::<WireGid>()?.get();
            let n_fields = incoming.unpack::<WireCount>()?.get();
            if n_fields != self.fields.len() {
                return Err(CommPatternError::CorruptBuffer(format!(
                    "gid {gid} arrived with {n_fields} fields, {} registered here",
                    self.fields.len()
                )));
            }
            let lid = match self.local_index(gid) {
                Some(lid) => lid,
                None => self.push_entity(gid, me)?,
            };
            for field in &mut self.fields {
                field.unpack_rows(&mut incoming, &[lid])?;
            }
            arrived += 1;
        }
        log::trace!(
            "[rank {}] migration: {} bytes out, {} entities in",
            me,
            send.len(),
            arrived
        );
        Ok(())
    }

    fn apply_moves(
        &mut self,
        moves: &[MoveRequest],
        keep: &mut [bool],
    ) -> Result<(), CommPatternError> {
        let me = self.comm.rank();
        for m in moves {
            match self.local_index(m.gid) {
                Some(lid) => {
                    let previous = self.owner(lid)?;
                    self.ownership.set_from_owner(lid, m.rank, me)?;
                    if previous == me && m.rank != me && !m.keep_as_ghost {
                        keep[lid] = false;
                    }
                }
                // the owner never shipped it
                None if m.rank == me => {
                    return Err(CommPatternError::NotFound {
                        gid: m.gid,
                        rank: me,
                    });
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Owners were checked against the pre-resolution state in
    /// `validate_queued`; entities already gone (moved away, or never held
    /// for a global removal) are skipped.
    fn apply_removals(&mut self, global: &[RemoveRequest], keep: &mut [bool]) {
        let local: Vec<RemoveRequest> = self.pending.local_removes().copied().collect();
        for r in global.iter().chain(&local) {
            if let Some(lid) = self.local_index(r.gid) {
                keep[lid] = false;
            }
        }
    }

    /// Drop entities whose `keep` flag is cleared from the gid field, the
    /// ownership table and every registered field, preserving order.
    fn compact(&mut self, keep: &[bool]) -> Result<(), CommPatternError> {
        let dropped = keep.iter().filter(|&&k| !k).count();
        if dropped == 0 {
            return Ok(());
        }
        if let Some(gids) = self.gids.as_mut() {
            gids.retain_rows(keep)?;
        }
        self.ownership.retain(keep);
        for field in &mut self.fields {
            field.retain_rows(keep)?;
        }
        self.index
            .rebuild(gid_values(&self.gids))
            .map_err(CommPatternError::DuplicateGlobalId)?;
        log::trace!(
            "[rank {}] dropped {} local entities",
            self.comm.rank(),
            dropped
        );
        Ok(())
    }

    fn apply_adds(&mut self) -> Result<(), CommPatternError> {
        for i in 0..self.pending.adds.len() {
            let add = self.pending.adds[i];
            if self.local_index(add.gid).is_some() {
                return Err(CommPatternError::DuplicateGlobalId(add.gid));
            }
            self.push_entity(add.gid, add.rank)?;
        }
        Ok(())
    }

    /// Append one entity; registered fields grow by a zero row.
    fn push_entity(&mut self, gid: u64, owner: usize) -> Result<usize, CommPatternError> {
        let lid = self.ownership.len();
        let gids = self
            .gids
            .as_mut()
            .ok_or_else(|| CommPatternError::illegal("setup", "no global-id field registered"))?;
        gids.resize(lid + 1);
        gids.as_mut_slice::<u64>()?[lid] = gid;
        self.ownership.push_from_owner(owner, self.comm.rank());
        for field in &mut self.fields {
            field.resize(lid + 1);
        }
        self.index.insert(gid, lid);
        Ok(lid)
    }

    fn resolve_schedule(&self) -> Result<CommSchedule, CommPatternError> {
        let (me, size) = (self.comm.rank(), self.comm.size());
        let gids = gid_values(&self.gids);

        let mut by_owner: Vec<Vec<usize>> = vec![Vec::new(); size];
        for lid in self.ownership.ghost_indices() {
            let owner = self.owner(lid)?;
            by_owner
                .get_mut(owner)
                .ok_or(CommPatternError::InvalidRank { rank: owner, size })?
                .push(lid);
        }
        let recv_counts: Vec<usize> = by_owner.iter().map(Vec::len).collect();
        let recv_map: Vec<usize> = by_owner.concat();

        let send_counts = exchange_counts(self.comm, &recv_counts)?;
        let requests: Vec<WireGid> = recv_map.iter().map(|&lid| WireGid::of(gids[lid])).collect();
        let gid_bytes = std::mem::size_of::<WireGid>();
        let raw = self.comm.all_to_all_v(
            cast_slice(&requests),
            &scale(&recv_counts, gid_bytes),
            &scale(&send_counts, gid_bytes),
        )?;
        let asked: Vec<WireGid> = decode_vec(&raw)?;

        let send_map = asked
            .iter()
            .map(|w| {
                let gid = w.get();
                let lid = self
                    .index
                    .find(gids, gid)
                    .ok_or(CommPatternError::NotFound { gid, rank: me })?;
                let owner = self.owner(lid)?;
                if owner != me {
                    return Err(CommPatternError::NotOwner {
                        gid,
                        rank: me,
                        owner,
                    });
                }
                Ok(lid)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CommSchedule::new(send_map, send_counts, recv_map, recv_counts))
    }
}
