//! Ghost synchronization over a resolved [`CommSchedule`].
//!
//! Every call is collective. Ranks first agree on which fields are dirty
//! anywhere (one fixed-size all-to-all of flag bytes); a field is exchanged
//! only if at least one rank modified it, so a field that is clean everywhere
//! moves no data at all. Exchanged fields are packed along `send_map`,
//! shipped with one `all_to_all_v`, and scattered into `recv_map`.

use crate::algs::communicator::Communicator;
use crate::data::field::WrappedField;
use crate::data::typed_buffer::TypedBuffer;
use crate::pattern::schedule::CommSchedule;
use crate::pattern_error::CommPatternError;

/// Outcome of one synchronization call on this rank.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub fields_exchanged: usize,
    pub bytes_sent: usize,
    pub bytes_received: usize,
}

impl SyncReport {
    fn merge(&mut self, other: SyncReport) {
        self.fields_exchanged += other.fields_exchanged;
        self.bytes_sent += other.bytes_sent;
        self.bytes_received += other.bytes_received;
    }
}

/// Scratch buffers reused across synchronization calls.
#[derive(Debug, Default)]
pub struct Synchronizer {
    send_buf: TypedBuffer,
    last: SyncReport,
}

impl Synchronizer {
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            send_buf: TypedBuffer::with_capacity(bytes),
            last: SyncReport::default(),
        }
    }

    /// Report of the most recent call.
    pub fn last_report(&self) -> SyncReport {
        self.last
    }

    /// OR-reduce per-field dirty flags across all ranks.
    ///
    /// Every rank must pass the same number of flags.
    pub fn agree_dirty<C>(comm: &C, local: &[bool]) -> Result<Vec<bool>, CommPatternError>
    where
        C: Communicator + ?Sized,
    {
        if local.is_empty() || comm.is_no_comm() {
            return Ok(local.to_vec());
        }
        let chunk: Vec<u8> = local.iter().map(|&d| u8::from(d)).collect();
        let send = chunk.repeat(comm.size());
        let recv = comm.all_to_all(&send, chunk.len())?;
        let mut agreed = vec![false; local.len()];
        for block in recv.chunks_exact(chunk.len()) {
            for (flag, &b) in agreed.iter_mut().zip(block) {
                *flag |= b != 0;
            }
        }
        Ok(agreed)
    }

    /// Push owned rows of `field` to every rank ghosting them and clear its
    /// dirty flag. Collective; does not consult the flag.
    pub fn exchange_field<C>(
        &mut self,
        comm: &C,
        schedule: &CommSchedule,
        field: &mut WrappedField,
    ) -> Result<SyncReport, CommPatternError>
    where
        C: Communicator + ?Sized,
    {
        let rb = field.row_bytes();
        self.send_buf.reset();
        field.pack_rows(schedule.send_map(), &mut self.send_buf)?;
        let recv = comm.all_to_all_v(
            self.send_buf.as_bytes(),
            &schedule.send_bytes(rb),
            &schedule.recv_bytes(rb),
        )?;
        let received = recv.len();
        let mut recv_buf = TypedBuffer::from_bytes(recv);
        field.unpack_rows(&mut recv_buf, schedule.recv_map())?;
        if recv_buf.remaining() != 0 {
            return Err(CommPatternError::CorruptBuffer(format!(
                "{} trailing bytes after unpacking field `{}`",
                recv_buf.remaining(),
                field.name()
            )));
        }
        field.clear_update();
        log::trace!(
            "[rank {}] synchronized `{}`: {} rows out, {} rows in",
            comm.rank(),
            field.name(),
            schedule.send_map().len(),
            schedule.recv_map().len()
        );
        Ok(SyncReport {
            fields_exchanged: 1,
            bytes_sent: self.send_buf.packed_size(),
            bytes_received: received,
        })
    }

    /// Synchronize `fields` in order, skipping those clean on every rank.
    pub fn synchronize<C>(
        &mut self,
        comm: &C,
        schedule: &CommSchedule,
        fields: &mut [&mut WrappedField],
    ) -> Result<SyncReport, CommPatternError>
    where
        C: Communicator + ?Sized,
    {
        let local: Vec<bool> = fields.iter().map(|f| f.needs_update()).collect();
        let agreed = Self::agree_dirty(comm, &local)?;
        let mut report = SyncReport::default();
        for (field, dirty) in fields.iter_mut().zip(agreed) {
            if dirty {
                report.merge(self.exchange_field(comm, schedule, field)?);
            }
        }
        self.last = report;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    #[test]
    fn serial_exchange_is_a_no_op() {
        let mut field = WrappedField::new("u", 1, vec![1.0f64, 2.0]).unwrap();
        field.mark_dirty();
        let mut sync = Synchronizer::default();
        let report = sync
            .synchronize(&NoComm, &CommSchedule::empty(1), &mut [&mut field])
            .unwrap();
        assert_eq!(report.fields_exchanged, 1);
        assert_eq!(report.bytes_sent, 0);
        assert!(!field.needs_update());
        assert_eq!(field.as_slice::<f64>().unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn clean_field_is_skipped() {
        let mut field = WrappedField::zeros::<i64>("c", 2, 3).unwrap();
        let mut sync = Synchronizer::default();
        let report = sync
            .synchronize(&NoComm, &CommSchedule::empty(1), &mut [&mut field])
            .unwrap();
        assert_eq!(report, SyncReport::default());
        assert_eq!(sync.last_report(), report);
    }

    #[test]
    fn agreement_of_nothing_is_empty() {
        assert!(Synchronizer::agree_dirty(&NoComm, &[]).unwrap().is_empty());
    }
}
