//! Stage 1 of every exchange: fixed-size blocks, one per rank.
//!
//! This module provides the point-to-point fixed-size all-to-all used by
//! backends without a native one, the typed count exchange built on top of
//! [`Communicator::all_to_all`], and a message-based barrier. Every function
//! guarantees that all send/receive handles are drained before returning,
//! even if an error occurs.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireCount, cast_slice, decode_vec};
use crate::pattern_error::CommPatternError;

/// Reject buffers whose length is not `chunk * size`.
pub fn check_fixed_len(
    len: usize,
    chunk: usize,
    size: usize,
    rank: usize,
) -> Result<(), CommPatternError> {
    if chunk.checked_mul(size) == Some(len) {
        Ok(())
    } else {
        Err(CommPatternError::CommError {
            neighbor: rank,
            source: format!("all_to_all buffer of {len} bytes is not {size} chunks of {chunk}")
                .into(),
        })
    }
}

/// Fixed-size all-to-all over point-to-point messages.
pub fn all_to_all_fixed<C>(
    comm: &C,
    send: &[u8],
    chunk: usize,
    tag: CommTag,
) -> Result<Vec<u8>, CommPatternError>
where
    C: Communicator + ?Sized,
{
    let (me, size) = (comm.rank(), comm.size());
    check_fixed_len(send.len(), chunk, size, me)?;

    let mut out = vec![0u8; send.len()];
    out[me * chunk..(me + 1) * chunk].copy_from_slice(&send[me * chunk..(me + 1) * chunk]);
    if size == 1 || chunk == 0 {
        return Ok(out);
    }

    // 1) post all receives
    let mut pending_recvs = Vec::with_capacity(size - 1);
    for nbr in (0..size).filter(|&p| p != me) {
        let h = comm.irecv(nbr, tag.as_u16(), &mut out[nbr * chunk..(nbr + 1) * chunk]);
        pending_recvs.push((nbr, h));
    }

    // 2) post all sends
    let mut pending_sends = Vec::with_capacity(size - 1);
    for nbr in (0..size).filter(|&p| p != me) {
        pending_sends.push(comm.isend(nbr, tag.as_u16(), &send[nbr * chunk..(nbr + 1) * chunk]));
    }

    // 3) wait for all recvs (but do not early-return)
    let mut maybe_err = None;
    for (nbr, h) in pending_recvs {
        match h.wait() {
            Some(data) if data.len() == chunk => {
                if maybe_err.is_none() {
                    out[nbr * chunk..(nbr + 1) * chunk].copy_from_slice(&data);
                }
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(CommPatternError::CommError {
                    neighbor: nbr,
                    source: format!("expected {chunk} bytes, got {}", data.len()).into(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(CommPatternError::CommError {
                    neighbor: nbr,
                    source: format!("failed to receive block from rank {nbr}").into(),
                });
            }
            _ => {} // already have an error; just drain
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(out),
    }
}

/// Tell every rank how many items it will receive from us; learn how many we
/// will receive from each rank. `counts[p]` is what this rank sends to `p`.
pub fn exchange_counts<C>(comm: &C, counts: &[usize]) -> Result<Vec<usize>, CommPatternError>
where
    C: Communicator + ?Sized,
{
    if counts.len() != comm.size() {
        return Err(CommPatternError::CommError {
            neighbor: comm.rank(),
            source: format!(
                "count vector has {} entries for {} ranks",
                counts.len(),
                comm.size()
            )
            .into(),
        });
    }
    let wire: Vec<WireCount> = counts.iter().map(|&n| WireCount::new(n)).collect();
    let raw = comm.all_to_all(cast_slice(&wire), std::mem::size_of::<WireCount>())?;
    let received: Vec<WireCount> = decode_vec(&raw)?;
    Ok(received.iter().map(WireCount::get).collect())
}

/// Message-based barrier: every rank sends an empty message to every other
/// rank and waits for all of theirs.
pub fn barrier<C>(comm: &C, tag: CommTag) -> Result<(), CommPatternError>
where
    C: Communicator + ?Sized,
{
    let (me, size) = (comm.rank(), comm.size());
    if size == 1 {
        return Ok(());
    }
    let mut token = [0u8; 0];
    let pending_recvs: Vec<_> = (0..size)
        .filter(|&p| p != me)
        .map(|nbr| (nbr, comm.irecv(nbr, tag.as_u16(), &mut token)))
        .collect();
    let pending_sends: Vec<_> = (0..size)
        .filter(|&p| p != me)
        .map(|nbr| comm.isend(nbr, tag.as_u16(), &[]))
        .collect();

    let mut maybe_err = None;
    for (nbr, h) in pending_recvs {
        if h.wait().is_none() && maybe_err.is_none() {
            maybe_err = Some(CommPatternError::CommError {
                neighbor: nbr,
                source: "barrier token lost".into(),
            });
        }
    }
    for send in pending_sends {
        let _ = send.wait();
    }
    maybe_err.map_or(Ok(()), Err)
}
