//! [`CommPattern`]: who owns which entity, who ghosts it, and the resulting
//! exchange schedule.
//!
//! Structural changes (`add`, `move_entity`, `remove`) are only queued; they
//! take effect when every rank calls the collective [`CommPattern::setup`].
//! Between two resolutions the local indices, ownership and schedule stay
//! exactly as the last `setup` left them.
//!
//! Registered fields are owned by the pattern so that resolution can resize
//! and compact them in lock-step with the global-id field.

use itertools::Itertools;

use crate::algs::communicator::Communicator;
use crate::algs::synchronizer::{SyncReport, Synchronizer};
use crate::data::field::{DataType, WrappedField};
use crate::debug_invariants::{DebugInvariants, ensure};
use crate::pattern::config::CommPatternConfig;
use crate::pattern::gid_index::GidIndex;
use crate::pattern::ownership::{LocalOwnership, OwnershipEntry};
use crate::pattern::pending::{
    AddRequest, MoveRequest, PendingCounts, PendingMutations, RemoveRequest,
};
use crate::pattern::schedule::CommSchedule;
use crate::pattern_error::CommPatternError;

/// Lifecycle of a pattern.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PatternState {
    /// No global-id field registered yet.
    Uninitialized,
    /// Mutations are queued (or the gid field was just registered) and the
    /// schedule is stale.
    Dirty,
    /// The schedule matches the current ownership; synchronization is allowed.
    Ready,
}

pub struct CommPattern<'a, C: Communicator> {
    pub(super) comm: &'a C,
    pub(super) config: CommPatternConfig,
    pub(super) state: PatternState,
    pub(super) frozen: bool,
    pub(super) gids: Option<WrappedField>,
    pub(super) ownership: LocalOwnership,
    pub(super) index: GidIndex,
    pub(super) schedule: CommSchedule,
    pub(super) pending: PendingMutations,
    pub(super) fields: Vec<WrappedField>,
    pub(super) sync: Synchronizer,
}

/// Values of the gid field, empty before registration.
pub(super) fn gid_values(gids: &Option<WrappedField>) -> &[u64] {
    gids.as_ref()
        .and_then(|f| f.as_slice::<u64>().ok())
        .unwrap_or(&[])
}

impl<'a, C: Communicator> CommPattern<'a, C> {
    pub fn new(comm: &'a C, config: CommPatternConfig) -> Self {
        let index = GidIndex::new(config.lookup);
        let sync = Synchronizer::with_capacity(config.initial_buffer_capacity);
        Self {
            comm,
            schedule: CommSchedule::empty(comm.size()),
            config,
            state: PatternState::Uninitialized,
            frozen: false,
            gids: None,
            ownership: LocalOwnership::default(),
            index,
            pending: PendingMutations::default(),
            fields: Vec::new(),
            sync,
        }
    }

    /// Install `gid_field` as the set of local entities, `owner_ranks[i]`
    /// owning entity `i`, and resolve. Collective.
    ///
    /// Local indices are the positions in `gid_field`. Fields already
    /// registered must have one row per entry of `gid_field`.
    pub fn setup_with(
        &mut self,
        gid_field: WrappedField,
        owner_ranks: &[usize],
    ) -> Result<(), CommPatternError> {
        self.register_gid_field(gid_field, owner_ranks)?;
        self.setup()
    }

    /// Local half of [`setup_with`](Self::setup_with): validate and install the
    /// gid field, leaving the pattern `Dirty`.
    pub fn register_gid_field(
        &mut self,
        gid_field: WrappedField,
        owner_ranks: &[usize],
    ) -> Result<(), CommPatternError> {
        self.ensure_mutable("setup_with")?;
        if gid_field.data_type() != DataType::Uint {
            return Err(CommPatternError::TypeMismatch {
                field: gid_field.name().to_owned(),
                expected: DataType::Uint,
                found: gid_field.data_type(),
            });
        }
        if gid_field.stride() != 1 {
            return Err(CommPatternError::StrideMismatch {
                field: gid_field.name().to_owned(),
                expected: 1,
                found: gid_field.stride(),
            });
        }
        let n = gid_field.size();
        if owner_ranks.len() != n {
            return Err(CommPatternError::FieldSizeMismatch {
                field: gid_field.name().to_owned(),
                expected: n,
                found: owner_ranks.len(),
            });
        }
        if let Some(&bad) = owner_ranks.iter().find(|&&r| r >= self.comm.size()) {
            return Err(CommPatternError::InvalidRank {
                rank: bad,
                size: self.comm.size(),
            });
        }
        if self.fields.iter().any(|f| f.name() == gid_field.name()) {
            return Err(CommPatternError::DuplicateField(gid_field.name().to_owned()));
        }
        if let Some(f) = self.fields.iter().find(|f| f.size() != n) {
            return Err(CommPatternError::FieldSizeMismatch {
                field: f.name().to_owned(),
                expected: n,
                found: f.size(),
            });
        }

        let mut index = GidIndex::new(self.config.lookup);
        index
            .rebuild(gid_field.as_slice::<u64>()?)
            .map_err(CommPatternError::DuplicateGlobalId)?;

        let me = self.comm.rank();
        let mut ownership = LocalOwnership::default();
        for &owner in owner_ranks {
            ownership.push_from_owner(owner, me);
        }

        let mut gid_field = gid_field;
        gid_field.clear_update();
        self.gids = Some(gid_field);
        self.ownership = ownership;
        self.index = index;
        self.schedule = CommSchedule::empty(self.comm.size());
        self.state = PatternState::Dirty;
        log::debug!(
            "[rank {}] registered gid field with {} entities",
            me,
            n
        );
        Ok(())
    }

    // ----- queued mutations ------------------------------------------------

    fn ensure_mutable(&self, op: &'static str) -> Result<(), CommPatternError> {
        if self.frozen {
            Err(CommPatternError::illegal(op, "pattern is frozen"))
        } else {
            Ok(())
        }
    }

    fn check_rank(&self, rank: usize) -> Result<(), CommPatternError> {
        if rank < self.comm.size() {
            Ok(())
        } else {
            Err(CommPatternError::InvalidRank {
                rank,
                size: self.comm.size(),
            })
        }
    }

    fn mark_dirty(&mut self) {
        if self.state == PatternState::Ready {
            self.state = PatternState::Dirty;
        }
    }

    /// Queue a new local entity `gid` owned by `rank`.
    ///
    /// Ranks other than the owner that should ghost the entity queue the
    /// same add with the same owner.
    pub fn add(&mut self, gid: u64, rank: usize) -> Result<(), CommPatternError> {
        self.ensure_mutable("add")?;
        self.check_rank(rank)?;
        self.pending.adds.push(AddRequest { gid, rank });
        self.mark_dirty();
        Ok(())
    }

    /// Queue a transfer of ownership of `gid` to `rank`. Queuing on a single
    /// rank is enough; the current owner ships the entity's rows to `rank`
    /// during resolution and drops its copy unless `keep_as_ghost` is set.
    pub fn move_entity(
        &mut self,
        gid: u64,
        rank: usize,
        keep_as_ghost: bool,
    ) -> Result<(), CommPatternError> {
        self.ensure_mutable("move")?;
        self.check_rank(rank)?;
        self.pending.moves.push(MoveRequest {
            gid,
            rank,
            keep_as_ghost,
        });
        self.mark_dirty();
        Ok(())
    }

    /// Queue the removal of `gid`, whose owner is expected to be `rank`.
    ///
    /// With `on_all_ranks` every rank drops its copy (queuing on one rank is
    /// enough); otherwise only this rank's copy goes.
    pub fn remove(
        &mut self,
        gid: u64,
        rank: usize,
        on_all_ranks: bool,
    ) -> Result<(), CommPatternError> {
        self.ensure_mutable("remove")?;
        self.check_rank(rank)?;
        self.pending.removes.push(RemoveRequest {
            gid,
            rank,
            on_all_ranks,
        });
        self.mark_dirty();
        Ok(())
    }

    /// Reject structural mutations until [`unfreeze`](Self::unfreeze).
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }

    // ----- queries ---------------------------------------------------------

    pub fn state(&self) -> PatternState {
        self.state
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn is_ready(&self) -> bool {
        self.state == PatternState::Ready
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn comm_size(&self) -> usize {
        self.comm.size()
    }

    pub fn comm(&self) -> &'a C {
        self.comm
    }

    pub fn config(&self) -> &CommPatternConfig {
        &self.config
    }

    /// Number of local entities (owned and ghost).
    pub fn size(&self) -> usize {
        self.ownership.len()
    }

    pub fn gid_field(&self) -> Option<&WrappedField> {
        self.gids.as_ref()
    }

    pub fn gids(&self) -> &[u64] {
        gid_values(&self.gids)
    }

    pub fn gid(&self, lid: usize) -> Result<u64, CommPatternError> {
        let gids = self.gids();
        gids.get(lid)
            .copied()
            .ok_or(CommPatternError::IndexOutOfBounds {
                index: lid,
                len: gids.len(),
            })
    }

    pub fn local_index(&self, gid: u64) -> Option<usize> {
        self.index.find(self.gids(), gid)
    }

    fn entry(&self, lid: usize) -> Result<OwnershipEntry, CommPatternError> {
        self.ownership
            .entry(lid)
            .ok_or(CommPatternError::IndexOutOfBounds {
                index: lid,
                len: self.ownership.len(),
            })
    }

    pub fn owner(&self, lid: usize) -> Result<usize, CommPatternError> {
        Ok(self.entry(lid)?.owner)
    }

    /// True iff this rank owns `lid`.
    pub fn is_updatable(&self, lid: usize) -> Result<bool, CommPatternError> {
        Ok(!self.entry(lid)?.is_ghost)
    }

    pub fn is_ghost(&self, lid: usize) -> Result<bool, CommPatternError> {
        Ok(self.entry(lid)?.is_ghost)
    }

    pub fn updatable_flags(&self) -> Vec<bool> {
        self.ownership.updatable_flags()
    }

    pub fn owned_indices(&self) -> Vec<usize> {
        self.ownership.owned_indices().collect()
    }

    pub fn ghost_indices(&self) -> Vec<usize> {
        self.ownership.ghost_indices().collect()
    }

    /// Schedule produced by the last resolution.
    pub fn schedule(&self) -> &CommSchedule {
        &self.schedule
    }

    pub fn pending(&self) -> PendingCounts {
        self.pending.counts()
    }

    // ----- field registry --------------------------------------------------

    /// Hand `field` to the pattern. It must have one row per local entity
    /// and a name distinct from every registered field and the gid field.
    pub fn register_field(&mut self, field: WrappedField) -> Result<(), CommPatternError> {
        let clashes_gid = self.gids.as_ref().is_some_and(|g| g.name() == field.name());
        if clashes_gid || self.fields.iter().any(|f| f.name() == field.name()) {
            return Err(CommPatternError::DuplicateField(field.name().to_owned()));
        }
        if field.size() != self.size() {
            return Err(CommPatternError::FieldSizeMismatch {
                field: field.name().to_owned(),
                expected: self.size(),
                found: field.size(),
            });
        }
        log::debug!(
            "[rank {}] registered field `{}` ({:?} x {})",
            self.comm.rank(),
            field.name(),
            field.data_type(),
            field.stride()
        );
        self.fields.push(field);
        Ok(())
    }

    /// Take a field back out of the pattern.
    pub fn remove_field(&mut self, name: &str) -> Result<WrappedField, CommPatternError> {
        let pos = self.field_position(name)?;
        Ok(self.fields.remove(pos))
    }

    fn field_position(&self, name: &str) -> Result<usize, CommPatternError> {
        self.fields
            .iter()
            .position(|f| f.name() == name)
            .ok_or_else(|| CommPatternError::UnknownField(name.to_owned()))
    }

    pub fn field(&self, name: &str) -> Result<&WrappedField, CommPatternError> {
        Ok(&self.fields[self.field_position(name)?])
    }

    pub fn field_mut(&mut self, name: &str) -> Result<&mut WrappedField, CommPatternError> {
        let pos = self.field_position(name)?;
        Ok(&mut self.fields[pos])
    }

    /// Registered fields in registration order.
    pub fn fields(&self) -> impl Iterator<Item = &WrappedField> + '_ {
        self.fields.iter()
    }

    // ----- synchronization -------------------------------------------------

    fn ensure_ready(&self, op: &'static str) -> Result<(), CommPatternError> {
        if self.state == PatternState::Ready {
            Ok(())
        } else {
            Err(CommPatternError::illegal(
                op,
                format!("pattern is {:?}; call setup() first", self.state),
            ))
        }
    }

    /// Refresh the ghosts of one field from their owners. Collective; every
    /// rank must name the same field.
    pub fn synchronize(&mut self, name: &str) -> Result<SyncReport, CommPatternError> {
        self.ensure_ready("synchronize")?;
        let pos = self.field_position(name)?;
        let field = &mut self.fields[pos];
        self.sync
            .synchronize(self.comm, &self.schedule, &mut [field])
    }

    /// Synchronize every registered field, in registration order.
    pub fn synchronize_all(&mut self) -> Result<SyncReport, CommPatternError> {
        self.ensure_ready("synchronize_all")?;
        let mut refs: Vec<&mut WrappedField> = self.fields.iter_mut().collect();
        self.sync.synchronize(self.comm, &self.schedule, &mut refs)
    }

    /// Synchronize the named fields, in registration order.
    pub fn synchronize_fields(&mut self, names: &[&str]) -> Result<SyncReport, CommPatternError> {
        self.ensure_ready("synchronize_fields")?;
        for name in names {
            self.field_position(name)?;
        }
        let mut refs: Vec<&mut WrappedField> = self
            .fields
            .iter_mut()
            .filter(|f| names.iter().any(|n| *n == f.name()))
            .collect();
        self.sync.synchronize(self.comm, &self.schedule, &mut refs)
    }

    pub fn last_sync_report(&self) -> SyncReport {
        self.sync.last_report()
    }
}

impl<C: Communicator> DebugInvariants for CommPattern<'_, C> {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "CommPattern");
    }

    fn validate_invariants(&self) -> Result<(), CommPatternError> {
        let n = self.ownership.len();
        let gids = self.gids();
        ensure(gids.len() == n, || {
            format!("{} gids but {} ownership entries", gids.len(), n)
        })?;
        ensure(gids.iter().all_unique(), || "duplicate gid in local storage".to_string())?;
        for f in &self.fields {
            f.validate_invariants()?;
            ensure(f.size() == n, || {
                format!("field `{}` has {} rows, expected {}", f.name(), f.size(), n)
            })?;
        }
        if self.state != PatternState::Ready {
            return Ok(());
        }

        let me = self.comm.rank();
        let s = &self.schedule;
        s.validate_invariants()?;
        s.validate_bounds(n)?;
        ensure(s.send_counts().len() == self.comm.size(), || {
            format!(
                "schedule has {} rank blocks for {} ranks",
                s.send_counts().len(),
                self.comm.size()
            )
        })?;
        ensure(s.send_to(me).is_empty() && s.recv_from(me).is_empty(), || {
            "schedule exchanges with its own rank".to_string()
        })?;
        ensure(s.send_map().iter().all(|&lid| self.ownership.is_owned_by(lid, me)), || {
            "send map names an entity this rank does not own".to_string()
        })?;
        ensure(
            s.recv_map().iter().all(|&lid| self.ownership.is_ghost(lid) == Some(true)),
            || "recv map names an owned entity".to_string(),
        )?;
        ensure(s.recv_map().len() == self.ownership.ghost_indices().count(), || {
            "not every ghost is filled by the schedule".to_string()
        })
    }
}
