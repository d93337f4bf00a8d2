//! Seismic waveform QC monitoring.
//!
//! Resolves station selections into concrete streams, runs `scqueryqc` for
//! them, parses the returned quality parameters and aggregates per-station
//! averages over the stations that should have reported.

pub mod alert;
pub mod analysis;
pub mod config;
pub mod db;
pub mod dev_mode;
pub mod export;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod session;
pub mod stations;
