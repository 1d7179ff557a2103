//! Error types for the tidewater pipeline.

use snafu::prelude::*;

pub use tidewater_core::error::{ConfigError, StorageError};

use crate::pipeline::RunPhase;

/// Errors raised while reading from a source system.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// Relational source query or connection failed.
    #[snafu(display("PostgreSQL source error: {source}"))]
    Postgres { source: sqlx::Error },

    /// Document store query or connection failed.
    #[snafu(display("MongoDB source error: {source}"))]
    Mongo { source: mongodb::error::Error },

    /// The configured document filter cannot be converted to BSON.
    #[snafu(display("Invalid document filter: {source}"))]
    InvalidFilter { source: mongodb::bson::ser::Error },

    /// The source is not reachable for a reason other than a driver error.
    #[snafu(display("Source unavailable: {message}"))]
    Unavailable { message: String },

    /// The source cannot list its keys for reconciliation.
    #[snafu(display("{source_type} source does not support key listing"))]
    KeysUnsupported { source_type: &'static str },
}

impl SourceError {
    /// Whether the failure means the source could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        match self {
            SourceError::Postgres { source } => is_sqlx_connectivity(source),
            SourceError::Mongo { source } => matches!(
                *source.kind,
                mongodb::error::ErrorKind::ServerSelection { .. }
                    | mongodb::error::ErrorKind::Io(_)
                    | mongodb::error::ErrorKind::ConnectionPoolCleared { .. }
                    | mongodb::error::ErrorKind::DnsResolve { .. }
            ),
            SourceError::Unavailable { .. } => true,
            SourceError::InvalidFilter { .. } | SourceError::KeysUnsupported { .. } => false,
        }
    }
}

pub(crate) fn is_sqlx_connectivity(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_)
    )
}

/// Errors raised when records do not fit the declared schema.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransformError {
    /// A record is not a JSON object.
    #[snafu(display("Record {row} is not an object"))]
    NotAnObject { row: usize },

    /// The document has nothing usable at the configured records path.
    #[snafu(display("Document has no record list at '{path}'"))]
    RecordsPath { path: String },

    /// Two source columns clean to the same identifier.
    #[snafu(display("Columns '{first}' and '{second}' both map to '{column}'"))]
    ColumnCollision {
        column: String,
        first: String,
        second: String,
    },

    /// A non-nullable field is absent or null.
    #[snafu(display("Record {row} is missing required field '{column}'"))]
    MissingField { row: usize, column: String },

    /// A pre-computed derived column is absent or null.
    #[snafu(display("Record {row} is missing derived column '{column}'"))]
    MissingDerived { row: usize, column: String },

    /// A value cannot be converted to the declared type.
    #[snafu(display("Record {row}, field '{column}': {message}"))]
    Coerce {
        row: usize,
        column: String,
        message: String,
    },

    /// Arrow rejected the coerced records.
    #[snafu(display("Failed to build record batch: {source}"))]
    Decode { source: arrow::error::ArrowError },
}

/// Errors raised while writing files to the staging area.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StagingError {
    /// CSV or JSON encoding failed.
    #[snafu(display("Failed to encode staged file: {source}"))]
    Encode { source: arrow::error::ArrowError },

    /// Parquet encoding failed.
    #[snafu(display("Failed to encode Parquet file: {source}"))]
    Parquet {
        source: parquet::errors::ParquetError,
    },

    /// Gzip compression failed.
    #[snafu(display("Failed to compress staged file: {source}"))]
    Compress { source: std::io::Error },

    /// Manifest serialization failed.
    #[snafu(display("Failed to serialize manifest: {source}"))]
    Manifest { source: serde_json::Error },

    /// The object store rejected a write.
    #[snafu(display("Failed to write {path}: {source}"))]
    Write { path: String, source: StorageError },
}

/// Errors raised by the warehouse during COPY or merge.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoadError {
    /// The warehouse could not be reached or a transaction not opened.
    #[snafu(display("Warehouse connection failed: {source}"))]
    Connect { source: sqlx::Error },

    /// A statement inside the load transaction failed.
    #[snafu(display("Warehouse rejected {step}: {source}"))]
    Statement { step: String, source: sqlx::Error },

    /// The merge transaction could not be committed.
    #[snafu(display("Failed to commit load transaction: {source}"))]
    Commit { source: sqlx::Error },

    /// The warehouse refused the load for a non-driver reason.
    #[snafu(display("Load rejected: {message}"))]
    Rejected { message: String },
}

impl LoadError {
    pub fn is_connectivity(&self) -> bool {
        match self {
            LoadError::Connect { .. } => true,
            LoadError::Statement { source, .. } | LoadError::Commit { source } => {
                is_sqlx_connectivity(source)
            }
            LoadError::Rejected { .. } => false,
        }
    }
}

/// Failure classes used for metric labels and operator triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A source or the warehouse is unreachable.
    Connectivity,
    /// Records do not match the declared schema.
    SchemaMismatch,
    /// The staging area rejected a write.
    Staging,
    /// The warehouse rejected the COPY or merge.
    Load,
    /// The watermark store could not be read or written.
    State,
    /// A bug: e.g. an illegal phase transition.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::SchemaMismatch => "schema_mismatch",
            ErrorKind::Staging => "staging",
            ErrorKind::Load => "load",
            ErrorKind::State => "state",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Top-level errors for one pipeline run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    #[snafu(display("Extraction failed: {source}"))]
    Extract { source: SourceError },

    #[snafu(display("Transform failed: {source}"))]
    Transform { source: TransformError },

    #[snafu(display("Staging failed: {source}"))]
    Stage { source: StagingError },

    #[snafu(display("Load failed: {source}"))]
    Load { source: LoadError },

    #[snafu(display("Reconciliation failed to list source keys: {source}"))]
    SourceKeys { source: SourceError },

    #[snafu(display("Watermark store error: {source}"))]
    WatermarkStore { source: StorageError },

    #[snafu(display("Failed to serialize watermark: {source}"))]
    WatermarkEncode { source: serde_json::Error },

    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    #[snafu(display("Storage setup failed: {source}"))]
    StorageSetup { source: StorageError },

    #[snafu(display("Illegal run transition {from} -> {to}"))]
    InvalidTransition { from: RunPhase, to: RunPhase },
}

impl PipelineError {
    /// Classify this error for metrics and logs.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Extract { source } | PipelineError::SourceKeys { source } => {
                match source {
                    _ if source.is_connectivity() => ErrorKind::Connectivity,
                    SourceError::KeysUnsupported { .. } => ErrorKind::Internal,
                    // Missing tables or columns surface as query errors.
                    _ => ErrorKind::SchemaMismatch,
                }
            }
            PipelineError::Transform { .. } => ErrorKind::SchemaMismatch,
            PipelineError::Stage { .. } | PipelineError::StorageSetup { .. } => ErrorKind::Staging,
            PipelineError::Load { source } => {
                if source.is_connectivity() {
                    ErrorKind::Connectivity
                } else {
                    ErrorKind::Load
                }
            }
            PipelineError::WatermarkStore { .. } | PipelineError::WatermarkEncode { .. } => {
                ErrorKind::State
            }
            PipelineError::Config { .. } | PipelineError::InvalidTransition { .. } => {
                ErrorKind::Internal
            }
        }
    }
}
