//! Fixed, versioned, little-endian wire types for pattern resolution.

use bytemuck::{Pod, Zeroable};
use static_assertions::{assert_eq_align, assert_eq_size};

use crate::pattern_error::CommPatternError;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

/// Decode a packed run of records from a byte slice of arbitrary alignment.
pub fn decode_vec<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, CommPatternError> {
    let width = std::mem::size_of::<T>();
    if width == 0 || bytes.len() % width != 0 {
        return Err(CommPatternError::CorruptBuffer(format!(
            "{} bytes is not a whole number of {width}-byte records",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(width)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

// All multi-byte integers in these structs are little-endian on the wire:
// stored with `.to_le()`, read back with `.from_le()`.

// ===== Counts and ids ======================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u64,
}
impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// A global id carried on the wire.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireGid {
    pub gid_le: u64,
}
impl WireGid {
    pub fn of(gid: u64) -> Self {
        Self { gid_le: gid.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
}

// ===== Structural events ===================================================

pub const EVENT_MOVE: u8 = 1;
pub const EVENT_REMOVE_ALL: u8 = 2;

/// A move or global removal, gathered from every rank during resolution.
/// NOTE: `rank_le` is u32 (never usize) on the wire.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireEvent {
    pub gid_le: u64,
    pub rank_le: u32,
    pub kind: u8,
    pub flag: u8,
    pub version_le: u16,
}
impl WireEvent {
    pub const SIZE: usize = 16; // 8 + 4 + 1 + 1 + 2
    pub fn new(kind: u8, gid: u64, rank: usize, flag: bool) -> Self {
        Self {
            gid_le: gid.to_le(),
            rank_le: (rank as u32).to_le(),
            kind,
            flag: flag as u8,
            version_le: WIRE_VERSION.to_le(),
        }
    }
    pub fn gid(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
    pub fn rank(&self) -> usize {
        u32::from_le(self.rank_le) as usize
    }
    pub fn flag(&self) -> bool {
        self.flag != 0
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
}

// ===== Compile-time sanity checks =========================================

assert_eq_size!(WireCount, u64);
assert_eq_size!(WireGid, u64);
assert_eq_size!(WireEvent, [u8; WireEvent::SIZE]);
assert_eq_align!(WireEvent, u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_event() {
        let e = WireEvent::new(EVENT_MOVE, 77, 3, true);
        let bytes: Vec<u8> = cast_slice(&[e]).to_vec();
        let out: Vec<WireEvent> = decode_vec(&bytes).unwrap();
        assert_eq!(out[0].gid(), 77);
        assert_eq!(out[0].rank(), 3);
        assert!(out[0].flag());
        assert_eq!(out[0].kind, EVENT_MOVE);
        assert_eq!(out[0].version(), WIRE_VERSION);
    }

    #[test]
    fn decode_from_unaligned_offset() {
        let ids = [WireGid::of(5), WireGid::of(9)];
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(cast_slice(&ids));
        let out: Vec<WireGid> = decode_vec(&bytes[1..]).unwrap();
        assert_eq!(out.iter().map(WireGid::get).collect::<Vec<_>>(), vec![5, 9]);
    }

    #[test]
    fn decode_rejects_partial_record() {
        assert!(matches!(
            decode_vec::<WireCount>(&[0u8; 12]),
            Err(CommPatternError::CorruptBuffer(_))
        ));
    }
}
