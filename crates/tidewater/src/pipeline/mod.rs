//! One extract-transform-stage-load run of a single pipeline.
//!
//! A run takes the stored watermark as an explicit input and reports the
//! watermark it reached; persisting that watermark is the caller's job and
//! happens only after the load committed. A failed run therefore leaves
//! both the target table and the watermark exactly as they were.

pub mod phase;
mod runner;

pub use phase::RunPhase;
pub use runner::{RunSummary, Runner};

use object_store::path::Path;
use snafu::prelude::*;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tidewater_core::emit;
use tidewater_core::metrics::events::{
    DuplicateKeysDropped, PhaseDuration, RecordsExtracted, RecordsLoaded,
};
use tidewater_core::{Advance, Watermark};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{PipelineConfig, PipelineKey};
use crate::error::{
    ConfigError, ExtractSnafu, LoadSnafu, PipelineError, SourceKeysSnafu, StageSnafu,
    TransformSnafu,
};
use crate::load::{LoadOutcome, UpsertRequest, Warehouse, reconcile};
use crate::source::Source;
use crate::staging::Stager;
use crate::transform::{TransformOutput, Transformer};

/// Identifier of one run; names the run's staging prefix.
///
/// ```
/// use tidewater::pipeline::RunId;
///
/// assert!(RunId::new("2024-06-01.retry_1").is_ok());
/// assert!(RunId::new("../other").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    /// A fresh time-ordered id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// A user-supplied id, e.g. to retry a specific staging location.
    pub fn new(id: impl Into<String>) -> Result<Self, ConfigError> {
        let id = id.into();
        let valid = !id.is_empty()
            && !id.contains("..")
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if valid {
            Ok(Self(id))
        } else {
            Err(ConfigError::InvalidRunId { run_id: id })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a successful run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub extracted: usize,
    /// Rows staged and merged, after de-duplication.
    pub rows: usize,
    pub outcome: LoadOutcome,
    /// Watermark to persist; equal to the input when nothing moved it.
    pub next_watermark: Watermark,
}

/// Tracks the phase of a run and times each phase.
struct RunState<'a> {
    pipeline: &'a str,
    phase: RunPhase,
    entered: Instant,
}

impl<'a> RunState<'a> {
    fn new(pipeline: &'a str) -> Self {
        Self {
            pipeline,
            phase: RunPhase::Idle,
            entered: Instant::now(),
        }
    }

    fn enter(&mut self, next: RunPhase) -> Result<(), PipelineError> {
        if !self.phase.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.finish_phase();
        debug!(target = %self.pipeline, from = %self.phase, to = %next, "Phase change");
        self.phase = next;
        self.entered = Instant::now();
        Ok(())
    }

    fn fail(&mut self) {
        if !self.phase.is_terminal() {
            self.finish_phase();
            self.phase = RunPhase::Failed;
        }
    }

    fn finish_phase(&self) {
        if self.phase != RunPhase::Idle {
            emit!(PhaseDuration {
                pipeline: self.pipeline.to_string(),
                phase: self.phase.as_str(),
                duration: self.entered.elapsed(),
            });
        }
    }
}

/// A configured pipeline with its connectors.
pub struct Pipeline {
    key: PipelineKey,
    config: PipelineConfig,
    source: Box<dyn Source>,
    transformer: Transformer,
    stager: Stager,
    warehouse: Arc<dyn Warehouse>,
}

impl Pipeline {
    pub fn new(
        key: PipelineKey,
        config: PipelineConfig,
        source: Box<dyn Source>,
        stager: Stager,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        let transformer = Transformer::new(&config);
        Self {
            key,
            config,
            source,
            transformer,
            stager,
            warehouse,
        }
    }

    pub fn key(&self) -> &PipelineKey {
        &self.key
    }

    /// Run once from `watermark`.
    ///
    /// Staged files are removed afterwards, whether the run succeeded or
    /// not, when cleanup is enabled.
    pub async fn run(
        &self,
        run_id: &RunId,
        watermark: &Watermark,
    ) -> Result<RunReport, PipelineError> {
        let mut state = RunState::new(self.key.id());
        let mut staged_prefix = None;

        let result = self
            .execute(run_id, watermark, &mut state, &mut staged_prefix)
            .await;
        if result.is_err() {
            state.fail();
        }

        if let Some(prefix) = staged_prefix.filter(|_| self.stager.cleanup_enabled()) {
            if let Err(e) = self.stager.cleanup(&prefix).await {
                warn!(
                    target = %self.key,
                    %run_id,
                    error = %e,
                    "Failed to remove staged files"
                );
            }
        }

        result
    }

    async fn execute(
        &self,
        run_id: &RunId,
        watermark: &Watermark,
        state: &mut RunState<'_>,
        staged_prefix: &mut Option<Path>,
    ) -> Result<RunReport, PipelineError> {
        let pipeline = self.key.id();

        state.enter(RunPhase::Extracting)?;
        let extracted = self.source.extract(watermark).await.context(ExtractSnafu)?;
        let extracted_count = extracted.len();
        let full_snapshot = watermark.is_initial() || !self.source.is_incremental();
        emit!(RecordsExtracted {
            pipeline: pipeline.to_string(),
            count: extracted_count as u64,
        });
        info!(
            target = %self.key,
            %run_id,
            %watermark,
            records = extracted_count,
            full_snapshot,
            "Extracted"
        );

        state.enter(RunPhase::Transforming)?;
        let output = self.transformer.transform(extracted).context(TransformSnafu)?;
        if output.duplicates > 0 {
            emit!(DuplicateKeysDropped {
                pipeline: pipeline.to_string(),
                count: output.duplicates as u64,
            });
        }
        let next_watermark = self.next_watermark(watermark, &output);

        let mut report = RunReport {
            run_id: run_id.clone(),
            extracted: extracted_count,
            rows: output.rows,
            outcome: LoadOutcome::default(),
            next_watermark,
        };

        if output.rows == 0 && !self.config.target.delete_missing {
            info!(target = %self.key, %run_id, "Nothing new to load");
            state.enter(RunPhase::Done)?;
            return Ok(report);
        }

        state.enter(RunPhase::Staging)?;
        let staged = if output.rows > 0 {
            *staged_prefix = Some(Stager::run_prefix(pipeline, run_id));
            let schema = self.transformer.arrow_schema();
            Some(
                self.stager
                    .stage(pipeline, run_id, schema, &output.batches)
                    .await
                    .context(StageSnafu)?,
            )
        } else {
            None
        };

        state.enter(RunPhase::Loading)?;
        let delete_keys = if self.config.target.delete_missing {
            self.plan_deletions(&output, full_snapshot).await?
        } else {
            Vec::new()
        };

        if staged.is_some() || !delete_keys.is_empty() {
            let request = UpsertRequest {
                pipeline,
                run_id,
                target: &self.config.target,
                schema: &self.config.schema,
                staged: staged.as_ref(),
                delete_keys: &delete_keys,
            };
            report.outcome = self.warehouse.upsert(&request).await.context(LoadSnafu)?;
            emit!(RecordsLoaded {
                pipeline: pipeline.to_string(),
                inserted: report.outcome.inserted,
                updated: report.outcome.updated,
                deleted: report.outcome.deleted,
            });
        }

        state.enter(RunPhase::Done)?;
        info!(
            target = %self.key,
            %run_id,
            rows = report.rows,
            inserted = report.outcome.inserted,
            updated = report.outcome.updated,
            deleted = report.outcome.deleted,
            "Loaded"
        );
        Ok(report)
    }

    fn next_watermark(&self, watermark: &Watermark, output: &TransformOutput) -> Watermark {
        let mut next = *watermark;
        if let Some(candidate) = output.max_cursor {
            match next.advance(candidate) {
                Advance::Moved | Advance::Unchanged => {}
                Advance::KindMismatch => warn!(
                    target = %self.key,
                    %watermark,
                    %candidate,
                    "Cursor kind changed; keeping the stored watermark"
                ),
            }
        }
        next
    }

    /// Target keys no longer present in the source.
    async fn plan_deletions(
        &self,
        output: &TransformOutput,
        full_snapshot: bool,
    ) -> Result<Vec<String>, PipelineError> {
        let source_keys = if full_snapshot {
            output.keys.clone()
        } else {
            let column = self.transformer.mapper().source_name(&self.config.target.key);
            self.source
                .fetch_keys(&column)
                .await
                .context(SourceKeysSnafu)?
        };
        if source_keys.is_empty() {
            warn!(target = %self.key, "Source has no keys, skipping reconciliation");
            return Ok(Vec::new());
        }

        let target_keys = self
            .warehouse
            .target_keys(&self.config.target)
            .await
            .context(LoadSnafu)?;
        let planned = reconcile::plan_deletions(&source_keys, &target_keys);
        info!(
            target = %self.key,
            source_keys = source_keys.len(),
            target_keys = target_keys.len(),
            deletions = planned.len(),
            "Reconciled keys"
        );
        Ok(planned)
    }
}
