//! Stream resolution and QC aggregation.
//!
//! Submodules:
//! - `patterns`: expands a user selection into concrete streams.
//! - `averages`: per-station averages over a reference station set.

pub mod averages;
pub mod patterns;
