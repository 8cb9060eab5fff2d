//! # TOROS calibration pipeline
//!
//! Nightly calibration of raw CCD exposures: catalogue a night directory,
//! stack dark and flat masters, and calibrate every science (light) frame
//! with them, recording the provenance of every derived frame.
//!
//! ## Architecture
//!
//! - [`models`]: night bundles, exposures, combinations and their kind enums
//! - [`db`]: repository traits with in-memory and Postgres implementations
//! - [`frames`]: FITS codec, frame stacking and calibration arithmetic
//! - [`pipeline`]: the four stages (ingest, dark master, flat master,
//!   correction) and their reports
//! - [`config`]: the `toros.toml` settings file
//!
//! The `toros-pipeline` binary (feature `cli`) exposes each stage as a
//! subcommand for an external DAG scheduler.

// Allow large error types - RepositoryError contains rich context for debugging
#![allow(clippy::result_large_err)]

pub mod config;
pub mod db;
pub mod frames;
pub mod models;
pub mod pipeline;
