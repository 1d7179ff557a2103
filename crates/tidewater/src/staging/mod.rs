//! Run-scoped staging of transformed batches in object storage.
//!
//! Every run writes to its own prefix, `{pipeline}/run={run_id}/`. Data files
//! are written first and the COPY manifest last, so a loader that finds the
//! manifest finds every file it names. Staging the same run id again first
//! clears the prefix, then writes a fresh set of files.

pub mod format;
pub mod manifest;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use object_store::path::Path;
use snafu::prelude::*;
use std::sync::Arc;
use tidewater_core::emit;
use tidewater_core::metrics::events::FilesStaged;
use tidewater_core::{StorageProvider, StorageProviderRef};
use tracing::{debug, info};

use crate::config::{Compression, StagingConfig, StagingFormat};
use crate::error::{ManifestSnafu, StagingError, StorageError, WriteSnafu};
use crate::pipeline::RunId;
use manifest::Manifest;

pub const MANIFEST_FILE: &str = "manifest.json";

/// One data file written for a run.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub path: Path,
    pub url: String,
    pub rows: usize,
    pub bytes: u64,
}

/// Everything a run staged, as the loader needs it.
#[derive(Debug, Clone)]
pub struct StagedBatch {
    pub prefix: Path,
    pub files: Vec<StagedFile>,
    pub manifest_path: Path,
    pub manifest_url: String,
    pub format: StagingFormat,
    /// Compression actually applied to the files.
    pub compression: Compression,
}

impl StagedBatch {
    pub fn rows(&self) -> usize {
        self.files.iter().map(|f| f.rows).sum()
    }

    pub fn bytes(&self) -> u64 {
        self.files.iter().map(|f| f.bytes).sum()
    }
}

/// Writes staged files for one staging location.
#[derive(Debug, Clone)]
pub struct Stager {
    storage: StorageProviderRef,
    format: StagingFormat,
    compression: Compression,
    max_rows_per_file: usize,
    cleanup: bool,
}

impl Stager {
    pub async fn new(config: &StagingConfig) -> Result<Self, StorageError> {
        let storage =
            StorageProvider::for_url_with_options(&config.uri, config.storage_options.clone())
                .await?;
        Ok(Self::with_storage(Arc::new(storage), config))
    }

    pub fn with_storage(storage: StorageProviderRef, config: &StagingConfig) -> Self {
        Self {
            storage,
            format: config.format,
            compression: config.compression,
            max_rows_per_file: config.max_rows_per_file.max(1),
            cleanup: config.cleanup,
        }
    }

    pub fn storage(&self) -> &StorageProviderRef {
        &self.storage
    }

    pub fn cleanup_enabled(&self) -> bool {
        self.cleanup
    }

    /// Prefix holding every file of one run.
    pub fn run_prefix(pipeline: &str, run_id: &RunId) -> Path {
        Path::from(format!("{pipeline}/run={run_id}"))
    }

    /// Write `batches` as data files plus a manifest under the run prefix.
    pub async fn stage(
        &self,
        pipeline: &str,
        run_id: &RunId,
        schema: &SchemaRef,
        batches: &[RecordBatch],
    ) -> Result<StagedBatch, StagingError> {
        let prefix = Self::run_prefix(pipeline, run_id);
        let stale = self
            .storage
            .delete_prefix(&prefix)
            .await
            .context(WriteSnafu {
                path: prefix.to_string(),
            })?;
        if stale > 0 {
            debug!(target = %pipeline, %run_id, stale, "Cleared files from an earlier attempt");
        }

        let extension = format::file_extension(self.format, self.compression);
        let mut manifest = Manifest::default();
        let mut files = Vec::new();

        for (index, chunk) in split_rows(batches, self.max_rows_per_file)
            .into_iter()
            .enumerate()
        {
            let body = format::encode(schema, &chunk, self.format, self.compression)?;
            let path = prefix.child(format!("part-{index:05}.{extension}"));
            let bytes = body.len() as u64;
            self.storage.put(&path, body).await.context(WriteSnafu {
                path: path.to_string(),
            })?;

            let url = self.storage.object_url(&path);
            manifest.push(url.clone(), bytes);
            files.push(StagedFile {
                path,
                url,
                rows: chunk.iter().map(RecordBatch::num_rows).sum(),
                bytes,
            });
        }

        let manifest_path = prefix.child(MANIFEST_FILE);
        let body = serde_json::to_vec(&manifest).context(ManifestSnafu)?;
        self.storage
            .put(&manifest_path, body)
            .await
            .context(WriteSnafu {
                path: manifest_path.to_string(),
            })?;

        let staged = StagedBatch {
            manifest_url: self.storage.object_url(&manifest_path),
            manifest_path,
            prefix,
            files,
            format: self.format,
            compression: format::effective_compression(self.format, self.compression),
        };

        emit!(FilesStaged {
            pipeline: pipeline.to_string(),
            files: staged.files.len() as u64,
            bytes: staged.bytes(),
        });
        info!(
            target = %pipeline,
            %run_id,
            files = staged.files.len(),
            rows = staged.rows(),
            bytes = staged.bytes(),
            manifest = %staged.manifest_url,
            "Staged batch"
        );

        Ok(staged)
    }

    /// Delete every file under a run prefix. Returns the number deleted.
    pub async fn cleanup(&self, prefix: &Path) -> Result<usize, StagingError> {
        let deleted = self
            .storage
            .delete_prefix(prefix)
            .await
            .context(WriteSnafu {
                path: prefix.to_string(),
            })?;
        debug!(prefix = %prefix, deleted, "Removed staged files");
        Ok(deleted)
    }
}

/// Regroup batches so no group holds more than `max_rows` rows.
fn split_rows(batches: &[RecordBatch], max_rows: usize) -> Vec<Vec<RecordBatch>> {
    let mut groups = Vec::new();
    let mut current = Vec::new();
    let mut current_rows = 0;

    for batch in batches {
        let mut offset = 0;
        while offset < batch.num_rows() {
            let take = (max_rows - current_rows).min(batch.num_rows() - offset);
            current.push(batch.slice(offset, take));
            current_rows += take;
            offset += take;
            if current_rows == max_rows {
                groups.push(std::mem::take(&mut current));
                current_rows = 0;
            }
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}
