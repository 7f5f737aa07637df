//! Thin façade over intra-process (threaded) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! Point-to-point handles are **waitable** but non-blocking; the collectives
//! (`barrier`, `all_to_all`, `all_to_all_v`, `broadcast`) block until every
//! rank of the communicator has entered the matching call.
//!
//! Backends that only provide `isend`/`irecv` get the collectives for free
//! through the sizes-then-data protocols in [`crate::algs::exchange`]. Native
//! backends (MPI) override them.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

use crate::algs::exchange::{data_exchange, size_exchange};
use crate::pattern_error::CommPatternError;

/// Message tag wrapper so tag arithmetic stays explicit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        CommTag(tag)
    }
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    pub const fn base(self) -> u16 {
        self.0
    }
    /// Tag `k` steps after this one (wrapping).
    pub const fn offset(self, k: u16) -> Self {
        CommTag(self.0.wrapping_add(k))
    }
}

/// Tags used by the point-to-point implementations of the collectives.
///
/// Collectives are matched purely by call order, and every backend delivers
/// messages between a fixed `(src, dst, tag)` triple in FIFO order, so one
/// reserved block is enough for all of them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CollectiveTags {
    pub counts: CommTag,
    pub data: CommTag,
    pub broadcast: CommTag,
    pub barrier: CommTag,
}

impl CollectiveTags {
    pub const RESERVED: CollectiveTags = CollectiveTags::from_base(CommTag(0xC000));

    pub const fn from_base(base: CommTag) -> Self {
        Self {
            counts: base,
            data: base.offset(1),
            broadcast: base.offset(2),
            barrier: base.offset(3),
        }
    }
}

/// Communication interface: point-to-point primitives plus the collectives the
/// pattern consumes.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Rank of the calling process.
    fn rank(&self) -> usize;
    /// Number of processes in the communicator.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// True for the serial no-op backend.
    fn is_no_comm(&self) -> bool {
        false
    }

    /// Block until every rank has entered the barrier.
    fn barrier(&self) -> Result<(), CommPatternError> {
        size_exchange::barrier(self, CollectiveTags::RESERVED.barrier)
    }

    /// Fixed-size all-to-all: chunk `p` of `send` (each `chunk` bytes) goes to
    /// rank `p`; chunk `p` of the result came from rank `p`.
    fn all_to_all(&self, send: &[u8], chunk: usize) -> Result<Vec<u8>, CommPatternError> {
        size_exchange::all_to_all_fixed(self, send, chunk, CollectiveTags::RESERVED.counts)
    }

    /// Variable-size all-to-all. `send_counts[p]` bytes starting at the
    /// running offset go to rank `p`; `recv_counts[p]` bytes are expected from
    /// rank `p`. Received blocks are concatenated in rank order.
    fn all_to_all_v(
        &self,
        send: &[u8],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Result<Vec<u8>, CommPatternError> {
        data_exchange::all_to_all_v(
            self,
            send,
            send_counts,
            recv_counts,
            CollectiveTags::RESERVED.data,
        )
    }

    /// Replace `buf` on every rank with `root`'s contents. All ranks must pass
    /// buffers of the same length.
    fn broadcast(&self, root: usize, buf: &mut [u8]) -> Result<(), CommPatternError> {
        data_exchange::broadcast(self, root, buf, CollectiveTags::RESERVED.broadcast)
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for pure serial runs: one rank, every collective is
/// a local copy.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- RayonComm: thread-per-rank inside one process ---
type Key = (usize, usize, u16); // (src, dst, tag)
type Mailbox = DashMap<Key, VecDeque<Bytes>>;

/// Pending receive on a [`RayonComm`] mailbox. Yields the whole message as
/// sent; the caller checks its length.
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            let popped = self
                .mailbox
                .get_mut(&self.key)
                .and_then(|mut queue| queue.pop_front());
            if let Some(bytes) = popped {
                return Some(bytes.to_vec());
            }
            std::thread::yield_now();
        }
    }
}

/// In-process communicator: every rank is a thread, messages travel through a
/// shared mailbox. Messages between one `(src, dst, tag)` triple are FIFO.
#[derive(Clone, Debug)]
pub struct RayonComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl RayonComm {
    /// Create the `size` connected endpoints of one communicator, indexed by rank.
    pub fn world(size: usize) -> Vec<RayonComm> {
        let mailbox = Arc::new(Mailbox::new());
        (0..size)
            .map(|rank| RayonComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }

    /// Number of undelivered messages (all keys).
    pub fn pending_messages(&self) -> usize {
        self.mailbox.iter().map(|entry| entry.value().len()).sum()
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.rank, peer, tag);
        self.mailbox
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use itertools::Itertools;
    use mpi::datatype::{Partition, PartitionMut};
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use mpi::Count;

    /// MPI world communicator. Collectives map onto the native MPI calls.
    ///
    /// Point-to-point sends are blocking standard-mode sends and receives are
    /// deferred to `wait()`; the pattern itself only uses the collectives.
    pub struct MpiComm {
        world: Arc<SimpleCommunicator>,
        rank: usize,
        size: usize,
        _universe: Universe,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, CommPatternError> {
            let universe = mpi::initialize().ok_or_else(|| CommPatternError::CommError {
                neighbor: 0,
                source: "MPI is already initialized".into(),
            })?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world: Arc::new(world),
                rank,
                size,
                _universe: universe,
            })
        }
    }

    pub struct MpiRecvHandle {
        world: Arc<SimpleCommunicator>,
        peer: i32,
        tag: i32,
    }

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            let (data, _status) = self
                .world
                .process_at_rank(self.peer)
                .receive_vec_with_tag::<u8>(self.tag);
            Some(data)
        }
    }

    fn displacements(counts: &[Count]) -> Vec<Count> {
        counts
            .iter()
            .scan(0, |acc, &x| {
                let old = *acc;
                *acc += x;
                Some(old)
            })
            .collect_vec()
    }

    impl Communicator for MpiComm {
        type SendHandle = ();
        type RecvHandle = MpiRecvHandle;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(buf, tag as i32);
        }

        fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> MpiRecvHandle {
            MpiRecvHandle {
                world: Arc::clone(&self.world),
                peer: peer as i32,
                tag: tag as i32,
            }
        }

        fn barrier(&self) -> Result<(), CommPatternError> {
            self.world.barrier();
            Ok(())
        }

        fn all_to_all(&self, send: &[u8], chunk: usize) -> Result<Vec<u8>, CommPatternError> {
            size_exchange::check_fixed_len(send.len(), chunk, self.size, self.rank)?;
            let mut recv = vec![0u8; send.len()];
            self.world.all_to_all_into(send, &mut recv[..]);
            Ok(recv)
        }

        fn all_to_all_v(
            &self,
            send: &[u8],
            send_counts: &[usize],
            recv_counts: &[usize],
        ) -> Result<Vec<u8>, CommPatternError> {
            data_exchange::check_counts(send.len(), send_counts, recv_counts, self.size, self.rank)?;
            let counts = send_counts.iter().map(|&c| c as Count).collect_vec();
            let rcounts = recv_counts.iter().map(|&c| c as Count).collect_vec();
            let displs = displacements(&counts);
            let rdispls = displacements(&rcounts);
            let mut recv = vec![0u8; recv_counts.iter().sum()];
            let send_partition = Partition::new(send, &counts[..], &displs[..]);
            let mut recv_partition = PartitionMut::new(&mut recv[..], &rcounts[..], &rdispls[..]);
            self.world
                .all_to_all_varcount_into(&send_partition, &mut recv_partition);
            Ok(recv)
        }

        fn broadcast(&self, root: usize, buf: &mut [u8]) -> Result<(), CommPatternError> {
            if root >= self.size {
                return Err(CommPatternError::InvalidRank {
                    rank: root,
                    size: self.size,
                });
            }
            self.world.process_at_rank(root as i32).broadcast_into(buf);
            Ok(())
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rayon_roundtrip_two_ranks() {
        let world = RayonComm::world(2);
        let (comm0, comm1) = (&world[0], &world[1]);

        let mut recv_buf = [0u8; 4];
        let recv_handle = comm1.irecv(0, 7, &mut recv_buf);

        let send_handle = comm0.isend(1, 7, &[1, 2, 3, 4]);
        send_handle.wait();

        let data = recv_handle
            .wait()
            .expect("Expected to receive data from rank 0");
        recv_buf.copy_from_slice(&data);

        assert_eq!(&recv_buf, &[1, 2, 3, 4]);
        assert_eq!(comm0.pending_messages(), 0);
    }

    #[test]
    fn separate_worlds_do_not_share_mailboxes() {
        let a = RayonComm::world(2);
        let b = RayonComm::world(2);
        a[0].isend(1, 3, &[9]);
        assert_eq!(a[1].pending_messages(), 1);
        assert_eq!(b[1].pending_messages(), 0);
    }

    #[test]
    fn no_comm_collectives_are_local() {
        let comm = NoComm;
        comm.barrier().unwrap();
        assert_eq!(comm.all_to_all(&[5, 6], 2).unwrap(), vec![5, 6]);
        assert_eq!(comm.all_to_all_v(&[1, 2, 3], &[3], &[3]).unwrap(), vec![1, 2, 3]);
        let mut buf = [4u8, 2];
        comm.broadcast(0, &mut buf).unwrap();
        assert_eq!(buf, [4, 2]);
    }

    #[test]
    fn collective_tags_are_distinct() {
        let t = CollectiveTags::RESERVED;
        let all = [t.counts, t.data, t.broadcast, t.barrier];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
