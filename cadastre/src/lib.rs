//! EDIGEO cadastre ingest into a spatially-indexed PostGIS store.
//!
//! One archive is one cadastral sheet. The [`Orchestrator`] walks a
//! source tree, dispatches archives across a worker pool, and for each
//! archive runs the full pipeline: decode with [`edigeo`], resolve the
//! department code, transform features through the table config and
//! bulk-insert into the target schema. Re-runs are incremental: archives
//! whose content checksum is already journaled are skipped.

pub mod coerce;
pub mod config;
pub mod departments;
mod error;
pub mod geomhash;
pub mod orchestrator;
pub mod proj;
pub mod sink;
pub mod transform;

pub use crate::config::Config;
pub use crate::departments::DepPolicy;
pub use crate::error::{CadastreError, Result};
pub use crate::orchestrator::{IngestOptions, IngestReport, Orchestrator};
pub use crate::sink::PgParams;

// Re-export the decoder to help avoid version conflicts
pub use edigeo;
