//! Persistent per-pipeline watermarks.
//!
//! Watermarks live in the state storage at
//! `_tidewater/{pipeline}_watermark.json`. Updates use the atomic write
//! pattern (temp file, then rename) so a crash never leaves a half-written
//! watermark behind.

use chrono::{DateTime, Utc};
use object_store::path::Path;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tidewater_core::{StorageProviderRef, Watermark};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, StorageError, WatermarkEncodeSnafu, WatermarkStoreSnafu};
use crate::pipeline::RunId;

/// Directory for watermark files within the state URI.
pub const STATE_DIR: &str = "_tidewater";

/// What is persisted for one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkRecord {
    pub watermark: Watermark,
    /// Run that moved the watermark here.
    pub run_id: String,
    pub updated_at: DateTime<Utc>,
}

/// Loads and saves watermarks.
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    storage: StorageProviderRef,
}

impl WatermarkStore {
    pub fn new(storage: StorageProviderRef) -> Self {
        Self { storage }
    }

    fn path(pipeline: &str) -> Path {
        Path::from(format!("{STATE_DIR}/{pipeline}_watermark.json"))
    }

    /// Current watermark; [`Watermark::Initial`] when none is stored.
    ///
    /// An unreadable file is logged and treated as initial: the next run
    /// re-reads everything and the upsert makes that safe.
    pub async fn load(&self, pipeline: &str) -> Result<Watermark, StorageError> {
        match self.storage.get(&Self::path(pipeline)).await {
            Ok(bytes) => match serde_json::from_slice::<WatermarkRecord>(&bytes) {
                Ok(record) => {
                    debug!(
                        target = %pipeline,
                        watermark = %record.watermark,
                        run_id = %record.run_id,
                        "Loaded watermark"
                    );
                    Ok(record.watermark)
                }
                Err(e) => {
                    warn!(
                        target = %pipeline,
                        error = %e,
                        "Failed to parse watermark file, starting from the beginning"
                    );
                    Ok(Watermark::Initial)
                }
            },
            Err(e) if e.is_not_found() => {
                debug!(target = %pipeline, "No watermark stored, starting from the beginning");
                Ok(Watermark::Initial)
            }
            Err(e) => Err(e),
        }
    }

    /// Persist `watermark` as the result of `run_id`.
    pub async fn save(
        &self,
        pipeline: &str,
        watermark: &Watermark,
        run_id: &RunId,
    ) -> Result<(), PipelineError> {
        let record = WatermarkRecord {
            watermark: *watermark,
            run_id: run_id.to_string(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&record).context(WatermarkEncodeSnafu)?;
        self.storage
            .atomic_write(&Self::path(pipeline), json)
            .await
            .context(WatermarkStoreSnafu)?;

        info!(target = %pipeline, watermark = %watermark, %run_id, "Saved watermark");
        Ok(())
    }

    /// Forget the watermark so the next run reads everything again.
    pub async fn reset(&self, pipeline: &str) -> Result<(), StorageError> {
        match self.storage.delete(&Self::path(pipeline)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        info!(target = %pipeline, "Reset watermark");
        Ok(())
    }
}
