//! Communication algorithms: the communicator abstraction, the collective
//! protocols built on it, wire records and ghost synchronization.

pub mod communicator;
pub mod exchange;
pub mod synchronizer;
pub mod wire;

pub use synchronizer::{SyncReport, Synchronizer};
