//! TypedBuffer: growable, append-only pack buffer with sequential unpack.
//!
//! Scalars and arrays of any [`Pod`] type are stored as their raw bytes.
//! Booleans travel as a single tagged byte and strings as a little-endian
//! `u64` length followed by UTF-8 bytes, so neither depends on in-memory
//! representation. The packed region is a plain byte span that can be handed
//! to any transport primitive as-is.
//!
//! Checkpoints created with [`TypedBuffer::new_index`] let a consumer jump back
//! to a previously packed record with [`TypedBuffer::seek_record`].

use bytemuck::Pod;

use crate::algs::communicator::Communicator;
use crate::algs::wire::WireCount;
use crate::debug_invariants::{DebugInvariants, ensure};
use crate::pattern_error::CommPatternError;

const BOOL_FALSE: u8 = 0;
const BOOL_TRUE: u8 = 1;

/// Heterogeneous pack/unpack buffer.
#[derive(Clone, Debug, Default)]
pub struct TypedBuffer {
    /// `data.len()` is the packed size; spare capacity is reused across rounds.
    data: Vec<u8>,
    /// Unpack cursor.
    unpacked: usize,
    /// Packed-size offsets recorded by `new_index`.
    records: Vec<usize>,
}

impl TypedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            data: Vec::with_capacity(bytes),
            ..Self::default()
        }
    }

    /// Treat `bytes` as freshly packed content (cursor at zero).
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: bytes,
            ..Self::default()
        }
    }

    #[inline]
    pub fn packed_size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn unpacked_size(&self) -> usize {
        self.unpacked
    }

    /// Bytes still available to unpack.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.unpacked
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The packed byte span.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of checkpoints created so far.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Grow storage so at least `extra` more bytes fit, at least doubling.
    fn grow_for(&mut self, extra: usize) {
        let needed = self.data.len() + extra;
        let cap = self.data.capacity();
        if needed > cap {
            let target = needed.max(cap.saturating_mul(2));
            self.data.reserve_exact(target - self.data.len());
        }
    }

    /// Reserve capacity for `bytes` total bytes. Never shrinks below the
    /// packed content (or at all).
    pub fn resize(&mut self, bytes: usize) {
        let target = bytes.max(self.data.len());
        if target > self.data.capacity() {
            self.data.reserve_exact(target - self.data.len());
        }
    }

    /// Zero packed/unpacked counters and drop checkpoints; keeps the allocation.
    pub fn reset(&mut self) {
        self.data.clear();
        self.unpacked = 0;
        self.records.clear();
    }

    /// Rewind the unpack cursor to the start.
    pub fn rewind(&mut self) {
        self.unpacked = 0;
    }

    // ----- packing ---------------------------------------------------------

    pub fn pack<T: Pod>(&mut self, value: T) {
        self.pack_slice(std::slice::from_ref(&value));
    }

    pub fn pack_slice<T: Pod>(&mut self, values: &[T]) {
        self.extend_from_bytes(bytemuck::cast_slice(values));
    }

    pub fn pack_bool(&mut self, value: bool) {
        self.extend_from_bytes(&[if value { BOOL_TRUE } else { BOOL_FALSE }]);
    }

    pub fn pack_str(&mut self, value: &str) {
        self.pack(WireCount::new(value.len()));
        self.extend_from_bytes(value.as_bytes());
    }

    /// Append raw bytes (already in wire form).
    pub fn extend_from_bytes(&mut self, bytes: &[u8]) {
        self.grow_for(bytes.len());
        self.data.extend_from_slice(bytes);
    }

    /// Checkpoint the current packed size; returns the checkpoint ordinal.
    pub fn new_index(&mut self) -> usize {
        self.records.push(self.data.len());
        self.records.len() - 1
    }

    // ----- unpacking -------------------------------------------------------

    /// Consume `n` bytes from the cursor.
    pub fn take_bytes(&mut self, n: usize) -> Result<&[u8], CommPatternError> {
        if n > self.remaining() {
            return Err(CommPatternError::BufferUnderrun {
                requested: n,
                remaining: self.remaining(),
            });
        }
        let start = self.unpacked;
        self.unpacked += n;
        Ok(&self.data[start..start + n])
    }

    pub fn unpack<T: Pod>(&mut self) -> Result<T, CommPatternError> {
        let bytes = self.take_bytes(std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn unpack_into<T: Pod>(&mut self, out: &mut [T]) -> Result<(), CommPatternError> {
        let bytes = self.take_bytes(std::mem::size_of_val(out))?;
        bytemuck::cast_slice_mut::<T, u8>(out).copy_from_slice(bytes);
        Ok(())
    }

    pub fn unpack_vec<T: Pod>(&mut self, count: usize) -> Result<Vec<T>, CommPatternError> {
        let mut out = vec![T::zeroed(); count];
        self.unpack_into(&mut out)?;
        Ok(out)
    }

    pub fn unpack_bool(&mut self) -> Result<bool, CommPatternError> {
        let at = self.unpacked;
        let tag = self.take_bytes(1)?[0];
        match tag {
            BOOL_FALSE => Ok(false),
            BOOL_TRUE => Ok(true),
            other => {
                self.unpacked = at;
                Err(CommPatternError::CorruptBuffer(format!(
                    "invalid bool tag {other:#04x} at offset {at}"
                )))
            }
        }
    }

    pub fn unpack_string(&mut self) -> Result<String, CommPatternError> {
        let at = self.unpacked;
        let len = self.unpack::<WireCount>()?.get();
        let decoded = self
            .take_bytes(len)
            .map(|bytes| String::from_utf8(bytes.to_vec()));
        match decoded {
            Ok(Ok(s)) => Ok(s),
            Ok(Err(e)) => {
                self.unpacked = at;
                Err(CommPatternError::CorruptBuffer(format!(
                    "string at offset {at} is not UTF-8: {e}"
                )))
            }
            Err(e) => {
                self.unpacked = at;
                Err(e)
            }
        }
    }

    /// Move the unpack cursor to checkpoint `ordinal`.
    pub fn seek_record(&mut self, ordinal: usize) -> Result<&mut Self, CommPatternError> {
        let offset = *self
            .records
            .get(ordinal)
            .ok_or(CommPatternError::UnknownRecord {
                ordinal,
                count: self.records.len(),
            })?;
        self.unpacked = offset;
        Ok(self)
    }

    // ----- collectives -----------------------------------------------------

    /// Collective: every rank ends up with `root`'s packed bytes, unpack
    /// cursor at zero. Checkpoints on non-root ranks are cleared.
    pub fn broadcast<C>(&mut self, root: usize, comm: &C) -> Result<(), CommPatternError>
    where
        C: Communicator + ?Sized,
    {
        let mut len = [WireCount::new(self.data.len())];
        comm.broadcast(root, bytemuck::cast_slice_mut(&mut len))?;
        let len = len[0].get();
        if comm.rank() != root {
            self.reset();
            self.resize(len);
            self.data.resize(len, 0);
        }
        comm.broadcast(root, &mut self.data)?;
        self.unpacked = 0;
        Ok(())
    }
}

impl DebugInvariants for TypedBuffer {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "TypedBuffer");
    }

    fn validate_invariants(&self) -> Result<(), CommPatternError> {
        ensure(self.unpacked <= self.data.len(), || {
            format!(
                "unpack cursor {} beyond packed size {}",
                self.unpacked,
                self.data.len()
            )
        })?;
        ensure(
            self.records.windows(2).all(|w| w[0] <= w[1]),
            || "record offsets are not monotone".to_string(),
        )?;
        ensure(
            self.records.last().is_none_or(|&r| r <= self.data.len()),
            || "record offset beyond packed size".to_string(),
        )
    }
}
