#![cfg_attr(docsrs, feature(doc_cfg))]
//! # comm-pattern
//!
//! comm-pattern keeps distributed per-entity arrays consistent across the
//! ranks of a parallel PDE code. Each rank stores some entities it owns and
//! some ghost copies of entities owned elsewhere; a [`CommPattern`] records
//! who owns what and derives the send/receive schedule that refreshes every
//! ghost from its owner.
//!
//! ## Features
//! - [`TypedBuffer`] for heterogeneous, little-endian pack/unpack with
//!   record checkpoints and broadcast
//! - [`WrappedField`] for type-erased, strided, dirty-tracked entity arrays
//! - Queued `add` / `move_entity` / `remove`, resolved collectively by
//!   [`CommPattern::setup`], including migration of field rows on moves
//! - Dirty-aware ghost synchronization with per-call [`SyncReport`]s
//! - Pluggable communication backends: serial [`NoComm`], thread-per-rank
//!   [`RayonComm`], and MPI (`mpi-support` feature)
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! comm-pattern = "0.3"
//! # features = ["mpi-support"]
//! ```
//!
//! ```
//! use comm_pattern::prelude::*;
//!
//! let comm = NoComm;
//! let mut pattern = CommPattern::new(&comm, CommPatternConfig::default());
//! let gids = WrappedField::new("gid", 1, vec![10u64, 11]).unwrap();
//! pattern.setup_with(gids, &[0, 0]).unwrap();
//! pattern
//!     .register_field(WrappedField::new("u", 1, vec![1.0f64, 2.0]).unwrap())
//!     .unwrap();
//! pattern.field_mut("u").unwrap().row_mut::<f64>(0).unwrap()[0] = 5.0;
//! pattern.synchronize("u").unwrap();
//! ```

pub mod algs;
pub mod data;
pub mod debug_invariants;
pub mod pattern;
pub mod pattern_error;

pub use algs::communicator::{Communicator, NoComm, RayonComm};
#[cfg(feature = "mpi-support")]
pub use algs::communicator::MpiComm;
pub use algs::synchronizer::SyncReport;
pub use data::{DataType, TypedBuffer, WrappedField};
pub use debug_invariants::DebugInvariants;
pub use pattern::{CommPattern, CommPatternConfig, PatternState};
pub use pattern_error::CommPatternError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{CollectiveTags, CommTag, Communicator, NoComm, RayonComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::synchronizer::SyncReport;
    pub use crate::data::field::{DataType, FieldScalar, WrappedField};
    pub use crate::data::typed_buffer::TypedBuffer;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::pattern::{CommPattern, CommPatternConfig, GidLookup, PatternState};
    pub use crate::pattern_error::CommPatternError;
}
