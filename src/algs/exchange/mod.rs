//! Point-to-point implementations of the collectives.
//!
//! Both stages follow the same discipline: post every receive, post every
//! send, wait for all receives without returning early, drain the send
//! handles, then report the first error.

pub mod data_exchange;
pub mod size_exchange;
