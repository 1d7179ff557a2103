//! tidewater-core: shared building blocks for the tidewater ETL job.
//!
//! - `storage/` - object storage abstraction (S3, local filesystem)
//! - `config/` - YAML loading with environment variable interpolation
//! - `metrics/` - internal events and the Prometheus endpoint
//! - `watermark/` - cursor values persisted between runs
//! - `schedule` - fixed-delay loop for running without cron
//! - `signal` - shutdown signal handling
//! - `error` - error types shared by every crate

pub mod config;
pub mod error;
pub mod metrics;
pub mod schedule;
pub mod signal;
pub mod storage;
pub mod tracing;
pub mod watermark;

pub use config::{MetricsConfig, ScheduleConfig, StorageLocation};
pub use error::{ConfigError, MetricsError, StorageError};
pub use metrics::{MetricsController, init_global as init_metrics, init_test as init_metrics_test};
pub use schedule::{ScheduledJob, random_jitter, run_schedule};
pub use signal::{shutdown_signal, shutdown_token};
pub use storage::{StorageProvider, StorageProviderRef};
pub use crate::tracing::init_tracing;
pub use watermark::{Advance, CursorValue, Watermark};
