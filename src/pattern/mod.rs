//! Communication patterns: entity ownership, queued structural mutations and
//! the exchange schedule resolved from them.

pub mod comm_pattern;
pub mod config;
pub mod gid_index;
pub mod ownership;
pub mod pending;
mod resolve;
pub mod schedule;

pub use comm_pattern::{CommPattern, PatternState};
pub use config::{CommPatternConfig, GidLookup};
pub use pending::PendingCounts;
pub use schedule::CommSchedule;
