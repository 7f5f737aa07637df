//! Stage 2 of every exchange: variable-size payloads whose lengths were agreed
//! in stage 1.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::expect_exact_len;
use crate::pattern_error::CommPatternError;

/// Validate an `all_to_all_v` call before any message is posted.
pub fn check_counts(
    send_len: usize,
    send_counts: &[usize],
    recv_counts: &[usize],
    size: usize,
    rank: usize,
) -> Result<(), CommPatternError> {
    let bad = |msg: String| CommPatternError::CommError {
        neighbor: rank,
        source: msg.into(),
    };
    if send_counts.len() != size || recv_counts.len() != size {
        return Err(bad(format!(
            "count vectors have {}/{} entries for {size} ranks",
            send_counts.len(),
            recv_counts.len()
        )));
    }
    let total: usize = send_counts.iter().sum();
    expect_exact_len(send_len, total).map_err(bad)?;
    expect_exact_len(recv_counts[rank], send_counts[rank])
        .map_err(|e| bad(format!("self block mismatch: {e}")))
}

/// Running offsets of `counts` (exclusive prefix sum).
pub fn displacements(counts: &[usize]) -> Vec<usize> {
    counts
        .iter()
        .scan(0usize, |acc, &x| {
            let old = *acc;
            *acc += x;
            Some(old)
        })
        .collect()
}

/// Variable-size all-to-all over point-to-point messages. Zero-length blocks
/// are not sent.
pub fn all_to_all_v<C>(
    comm: &C,
    send: &[u8],
    send_counts: &[usize],
    recv_counts: &[usize],
    tag: CommTag,
) -> Result<Vec<u8>, CommPatternError>
where
    C: Communicator + ?Sized,
{
    let (me, size) = (comm.rank(), comm.size());
    check_counts(send.len(), send_counts, recv_counts, size, me)?;

    let sdispl = displacements(send_counts);
    let rdispl = displacements(recv_counts);
    let mut out = vec![0u8; recv_counts.iter().sum()];
    out[rdispl[me]..rdispl[me] + recv_counts[me]]
        .copy_from_slice(&send[sdispl[me]..sdispl[me] + send_counts[me]]);

    // 1) post receives for every non-empty incoming block
    let mut pending_recvs = Vec::new();
    for nbr in (0..size).filter(|&p| p != me && recv_counts[p] > 0) {
        let range = rdispl[nbr]..rdispl[nbr] + recv_counts[nbr];
        let h = comm.irecv(nbr, tag.as_u16(), &mut out[range]);
        pending_recvs.push((nbr, h));
    }

    // 2) post sends
    let mut pending_sends = Vec::new();
    for nbr in (0..size).filter(|&p| p != me && send_counts[p] > 0) {
        let block = &send[sdispl[nbr]..sdispl[nbr] + send_counts[nbr]];
        pending_sends.push(comm.isend(nbr, tag.as_u16(), block));
    }

    // 3) wait + copy into place
    let mut maybe_err = None;
    for (nbr, h) in pending_recvs {
        let want = recv_counts[nbr];
        match h.wait() {
            Some(raw) if raw.len() == want => {
                if maybe_err.is_none() {
                    out[rdispl[nbr]..rdispl[nbr] + want].copy_from_slice(&raw);
                }
            }
            Some(raw) if maybe_err.is_none() => {
                maybe_err = Some(CommPatternError::CommError {
                    neighbor: nbr,
                    source: format!("expected {want} bytes, got {}", raw.len()).into(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(CommPatternError::CommError {
                    neighbor: nbr,
                    source: format!("failed to receive payload from rank {nbr}").into(),
                });
            }
            _ => {}
        }
    }

    // 4) drain sends
    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => {
            log::trace!(
                "rank {me}: all_to_all_v sent {} bytes, received {} bytes",
                send.len(),
                out.len()
            );
            Ok(out)
        }
    }
}

/// Root sends `buf` to every other rank; the others overwrite their `buf`.
pub fn broadcast<C>(
    comm: &C,
    root: usize,
    buf: &mut [u8],
    tag: CommTag,
) -> Result<(), CommPatternError>
where
    C: Communicator + ?Sized,
{
    let (me, size) = (comm.rank(), comm.size());
    if root >= size {
        return Err(CommPatternError::InvalidRank { rank: root, size });
    }
    if size == 1 || buf.is_empty() {
        return Ok(());
    }
    if me == root {
        let data: &[u8] = buf;
        let pending: Vec<_> = (0..size)
            .filter(|&p| p != root)
            .map(|nbr| comm.isend(nbr, tag.as_u16(), data))
            .collect();
        for send in pending {
            let _ = send.wait();
        }
        return Ok(());
    }
    let want = buf.len();
    let h = comm.irecv(root, tag.as_u16(), buf);
    match h.wait() {
        Some(raw) if raw.len() == want => {
            buf.copy_from_slice(&raw);
            Ok(())
        }
        Some(raw) => Err(CommPatternError::CommError {
            neighbor: root,
            source: format!("broadcast expected {want} bytes, got {}", raw.len()).into(),
        }),
        None => Err(CommPatternError::CommError {
            neighbor: root,
            source: "broadcast payload lost".into(),
        }),
    }
}
