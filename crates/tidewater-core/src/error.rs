//! Error types shared across tidewater crates.
//!
//! Storage, configuration and metrics failures live here because both the
//! core primitives and the pipeline crate produce them.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during object storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error: {source}"))]
    S3Config { source: object_store::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file {path}: {source}"))]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// A required URI or URL is empty.
    #[snafu(display("'{field}' cannot be empty"))]
    EmptyField { field: String },

    /// No pipelines are configured.
    #[snafu(display("At least one pipeline must be configured"))]
    NoPipelines,

    /// A pipeline key is not usable as a storage path segment.
    #[snafu(display(
        "Invalid pipeline key '{key}': only letters, digits, '_' and '-' are allowed"
    ))]
    InvalidPipelineKey { key: String },

    /// A user-supplied run id would not make a safe path segment.
    #[snafu(display(
        "Invalid run id '{run_id}': only letters, digits, '.', '_' and '-' are allowed"
    ))]
    InvalidRunId { run_id: String },

    /// The requested pipeline does not exist.
    #[snafu(display("Unknown pipeline '{key}' (configured: {})", known.join(", ")))]
    UnknownPipeline { key: String, known: Vec<String> },

    /// Schema is empty for a specific pipeline.
    #[snafu(display("Pipeline '{pipeline}' has an empty schema"))]
    EmptySchema { pipeline: String },

    /// Two schema fields share a name.
    #[snafu(display("Pipeline '{pipeline}' declares field '{field}' more than once"))]
    DuplicateField { pipeline: String, field: String },

    /// A column referenced by the pipeline is not declared in its schema.
    #[snafu(display(
        "Pipeline '{pipeline}' references {role} column '{column}' which is not in the schema"
    ))]
    UnknownColumn {
        pipeline: String,
        role: String,
        column: String,
    },

    /// A column exists but has a type that cannot serve its role.
    #[snafu(display("Pipeline '{pipeline}': {role} column '{column}' {message}"))]
    InvalidColumn {
        pipeline: String,
        role: String,
        column: String,
        message: String,
    },

    /// Numeric setting out of range.
    #[snafu(display("'{field}' must be greater than zero"))]
    ZeroValue { field: String },

    /// Invalid address for a listener.
    #[snafu(display("Invalid address '{address}': {source}"))]
    AddressParse {
        address: String,
        source: std::net::AddrParseError,
    },

    /// Multiple configuration errors occurred.
    #[snafu(display("Multiple config errors:\n{}", errors.join("\n")))]
    MultipleErrors { errors: Vec<String> },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Metrics server already initialized (double-init attempted).
    #[snafu(display("Metrics server already initialized"))]
    AlreadyInitialized,

    /// Metrics server not initialized (controller accessed before init).
    #[snafu(display("Metrics server not initialized"))]
    NotInitialized,
}
