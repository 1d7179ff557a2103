//! Internal events emitted as Prometheus metrics.
//!
//! Every struct is one measurable occurrence. Pipeline-scoped events carry a
//! `pipeline` label so one deployment running several datasets can be
//! observed per dataset.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    fn emit(self);
}

// ============================================================================
// Run lifecycle
// ============================================================================

/// A pipeline run has started.
pub struct RunStarted {
    pub pipeline: String,
}

impl InternalEvent for RunStarted {
    fn emit(self) {
        trace!(pipeline = %self.pipeline, "Run started");
        counter!("tidewater_runs_started_total", "pipeline" => self.pipeline).increment(1);
    }
}

/// Final status of a run. Failures carry the error kind label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed(&'static str),
}

impl RunStatus {
    fn status(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed(_) => "failed",
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "none",
            RunStatus::Failed(kind) => kind,
        }
    }
}

/// A pipeline run has finished.
pub struct RunCompleted {
    pub pipeline: String,
    pub status: RunStatus,
}

impl InternalEvent for RunCompleted {
    fn emit(self) {
        trace!(
            pipeline = %self.pipeline,
            status = self.status.status(),
            error_kind = self.status.kind(),
            "Run completed"
        );
        counter!(
            "tidewater_runs_completed_total",
            "pipeline" => self.pipeline,
            "status" => self.status.status(),
            "error_kind" => self.status.kind()
        )
        .increment(1);
    }
}

/// Wall-clock duration of one phase of a run.
pub struct PhaseDuration {
    pub pipeline: String,
    pub phase: &'static str,
    pub duration: Duration,
}

impl InternalEvent for PhaseDuration {
    fn emit(self) {
        trace!(
            pipeline = %self.pipeline,
            phase = self.phase,
            duration_ms = self.duration.as_millis(),
            "Phase finished"
        );
        histogram!(
            "tidewater_phase_duration_seconds",
            "pipeline" => self.pipeline,
            "phase" => self.phase
        )
        .record(self.duration.as_secs_f64());
    }
}

/// Timestamp of the last successful run, for staleness alerts.
pub struct LastSuccess {
    pub pipeline: String,
    pub unix_seconds: i64,
}

impl InternalEvent for LastSuccess {
    fn emit(self) {
        gauge!("tidewater_last_success_timestamp_seconds", "pipeline" => self.pipeline)
            .set(self.unix_seconds as f64);
    }
}

// ============================================================================
// Data volume
// ============================================================================

/// Records read from a source.
pub struct RecordsExtracted {
    pub pipeline: String,
    pub count: u64,
}

impl InternalEvent for RecordsExtracted {
    fn emit(self) {
        trace!(pipeline = %self.pipeline, count = self.count, "Records extracted");
        counter!("tidewater_records_extracted_total", "pipeline" => self.pipeline)
            .increment(self.count);
    }
}

/// Records dropped because a later record in the same batch had the same key.
pub struct DuplicateKeysDropped {
    pub pipeline: String,
    pub count: u64,
}

impl InternalEvent for DuplicateKeysDropped {
    fn emit(self) {
        trace!(pipeline = %self.pipeline, count = self.count, "Duplicate keys dropped");
        counter!("tidewater_duplicate_keys_dropped_total", "pipeline" => self.pipeline)
            .increment(self.count);
    }
}

/// Files written to the staging area.
pub struct FilesStaged {
    pub pipeline: String,
    pub files: u64,
    pub bytes: u64,
}

impl InternalEvent for FilesStaged {
    fn emit(self) {
        trace!(
            pipeline = %self.pipeline,
            files = self.files,
            bytes = self.bytes,
            "Files staged"
        );
        counter!("tidewater_staged_files_total", "pipeline" => self.pipeline.clone())
            .increment(self.files);
        counter!("tidewater_staged_bytes_total", "pipeline" => self.pipeline).increment(self.bytes);
    }
}

/// Rows merged into the target table.
pub struct RecordsLoaded {
    pub pipeline: String,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl InternalEvent for RecordsLoaded {
    fn emit(self) {
        trace!(
            pipeline = %self.pipeline,
            inserted = self.inserted,
            updated = self.updated,
            deleted = self.deleted,
            "Records loaded"
        );
        counter!("tidewater_records_loaded_total", "pipeline" => self.pipeline.clone(), "action" => "insert")
            .increment(self.inserted);
        counter!("tidewater_records_loaded_total", "pipeline" => self.pipeline.clone(), "action" => "update")
            .increment(self.updated);
        counter!("tidewater_records_loaded_total", "pipeline" => self.pipeline, "action" => "delete")
            .increment(self.deleted);
    }
}

/// Number of document containers that matched the configured filter.
///
/// Anything above one means the container choice depends on the selection
/// rule, and with the default rule on the store's natural order.
pub struct DocumentCandidates {
    pub pipeline: String,
    pub count: u64,
}

impl InternalEvent for DocumentCandidates {
    fn emit(self) {
        trace!(pipeline = %self.pipeline, count = self.count, "Document candidates");
        gauge!("tidewater_document_candidates", "pipeline" => self.pipeline.clone())
            .set(self.count as f64);
        if self.count > 1 {
            counter!("tidewater_ambiguous_document_selections_total", "pipeline" => self.pipeline)
                .increment(1);
        }
    }
}

/// The persisted watermark moved forward.
pub struct WatermarkAdvanced {
    pub pipeline: String,
}

impl InternalEvent for WatermarkAdvanced {
    fn emit(self) {
        trace!(pipeline = %self.pipeline, "Watermark advanced");
        counter!("tidewater_watermark_advances_total", "pipeline" => self.pipeline).increment(1);
    }
}

// ============================================================================
// Scheduling
// ============================================================================

/// One scheduled tick finished.
pub struct TickCompleted {
    pub name: String,
    pub duration: Duration,
}

impl InternalEvent for TickCompleted {
    fn emit(self) {
        trace!(
            name = %self.name,
            duration_ms = self.duration.as_millis(),
            "Tick completed"
        );
        counter!("tidewater_ticks_total", "name" => self.name.clone()).increment(1);
        histogram!("tidewater_tick_duration_seconds", "name" => self.name)
            .record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Type of storage operation.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
    Delete,
    List,
    Rename,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::Delete => "delete",
            StorageOperation::List => "list",
            StorageOperation::Rename => "rename",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    pub fn from_result<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            RequestStatus::Success
        } else {
            RequestStatus::Error
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// A storage request completed.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
    pub duration: Duration,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            "Storage request"
        );
        counter!(
            "tidewater_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
        histogram!(
            "tidewater_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}
