//! Tunables for a [`CommPattern`](crate::pattern::CommPattern).

use serde::{Deserialize, Serialize};

/// How global ids are resolved to local indices during setup.
///
/// Both strategies give identical results; `LinearScan` is the reference
/// behaviour and `Hashed` the production default.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GidLookup {
    LinearScan,
    #[default]
    Hashed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommPatternConfig {
    pub lookup: GidLookup,
    /// Close every `setup()` with a barrier.
    pub barrier_after_setup: bool,
    /// Run the full invariant check after every `setup()`, also in release builds.
    pub validate_after_setup: bool,
    /// Initial capacity (bytes) of the synchronizer's scratch buffers.
    pub initial_buffer_capacity: usize,
}

impl Default for CommPatternConfig {
    fn default() -> Self {
        Self {
            lookup: GidLookup::Hashed,
            barrier_after_setup: true,
            validate_after_setup: false,
            initial_buffer_capacity: 4096,
        }
    }
}
