//! tidewater: scheduled batch ETL into Redshift.
//!
//! This crate handles:
//! - Incremental reads from PostgreSQL tables and single-container reads from
//!   MongoDB collections
//! - Flattening, column cleaning and type coercion into Arrow record batches
//! - Run-scoped staging of Parquet, CSV or NDJSON files plus a COPY manifest
//! - Transactional COPY-and-merge into Redshift, with optional reconciliation
//!   of deleted keys
//! - Persistent per-pipeline watermarks that only move after a committed load

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod error;
pub mod load;
pub mod pipeline;
pub mod source;
pub mod staging;
pub mod transform;

pub use cli::CliArgs;
pub use config::Config;
pub use error::PipelineError;
pub use pipeline::{Pipeline, RunId, RunReport, RunSummary, Runner};

pub use tidewater_core::{
    CursorValue, MetricsConfig, StorageProvider, StorageProviderRef, Watermark, init_metrics,
    init_tracing, run_schedule, shutdown_token,
};
