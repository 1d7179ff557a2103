//! Sequential execution of every configured pipeline.

use async_trait::async_trait;
use chrono::Utc;
use snafu::prelude::*;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tidewater_core::emit;
use tidewater_core::metrics::events::{
    LastSuccess, RunCompleted, RunStarted, RunStatus, WatermarkAdvanced,
};
use tidewater_core::{ScheduledJob, StorageProvider};
use tracing::{error, info};

use super::{Pipeline, RunId, RunReport};
use crate::checkpoint::WatermarkStore;
use crate::config::{Config, PipelineKey};
use crate::error::{
    ConfigSnafu, ErrorKind, ExtractSnafu, LoadSnafu, PipelineError, StorageSetupSnafu,
    WatermarkStoreSnafu,
};
use crate::load::{RedshiftWarehouse, Warehouse};
use crate::source::build_source;
use crate::staging::Stager;

/// Outcome of running every selected pipeline once.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub succeeded: Vec<PipelineKey>,
    pub failed: Vec<(PipelineKey, ErrorKind)>,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs pipelines one after another in configuration order.
///
/// A failing pipeline does not stop the ones after it.
pub struct Runner {
    pipelines: Vec<Pipeline>,
    store: WatermarkStore,
    /// Fixed run id for retries; a fresh one per run otherwise.
    run_id: Option<RunId>,
}

impl Runner {
    pub fn new(pipelines: Vec<Pipeline>, store: WatermarkStore, run_id: Option<RunId>) -> Self {
        Self {
            pipelines,
            store,
            run_id,
        }
    }

    /// Build the runner for `config`, optionally restricted to one pipeline.
    ///
    /// Nothing here connects to a source or the warehouse; those connections
    /// are opened by the first run that needs them.
    pub async fn from_config(
        config: &Config,
        only: Option<&str>,
        run_id: Option<RunId>,
    ) -> Result<Self, PipelineError> {
        let selected = config.select(only).context(ConfigSnafu)?;

        let stager = Stager::new(&config.staging)
            .await
            .context(StorageSetupSnafu)?;
        let state = StorageProvider::for_url_with_options(
            &config.state.uri,
            config.state.storage_options.clone(),
        )
        .await
        .context(StorageSetupSnafu)?;
        let warehouse: Arc<dyn Warehouse> =
            Arc::new(RedshiftWarehouse::new(&config.warehouse).context(LoadSnafu)?);

        let mut pipelines = Vec::with_capacity(selected.len());
        for (key, pipeline) in selected {
            let source = build_source(key.id(), &pipeline.source).context(ExtractSnafu)?;
            pipelines.push(Pipeline::new(
                key.clone(),
                pipeline.clone(),
                source,
                stager.clone(),
                warehouse.clone(),
            ));
        }

        Ok(Self::new(
            pipelines,
            WatermarkStore::new(Arc::new(state)),
            run_id,
        ))
    }

    pub fn store(&self) -> &WatermarkStore {
        &self.store
    }

    /// Run every pipeline once.
    pub async fn run_once(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for pipeline in &self.pipelines {
            let key = pipeline.key().clone();
            match self.run_pipeline(pipeline).await {
                Ok(_) => summary.succeeded.push(key),
                Err(e) => summary.failed.push((key, e.kind())),
            }
        }
        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            "All pipelines complete"
        );
        summary
    }

    async fn run_pipeline(&self, pipeline: &Pipeline) -> Result<RunReport, PipelineError> {
        let key = pipeline.key().id();
        let run_id = self.run_id.clone().unwrap_or_else(RunId::generate);
        let started = Instant::now();

        emit!(RunStarted {
            pipeline: key.to_string(),
        });
        info!(target = %key, %run_id, "Run started");

        let result = self.load_run_save(pipeline, &run_id).await;
        match &result {
            Ok(report) => {
                emit!(RunCompleted {
                    pipeline: key.to_string(),
                    status: RunStatus::Succeeded,
                });
                emit!(LastSuccess {
                    pipeline: key.to_string(),
                    unix_seconds: Utc::now().timestamp(),
                });
                info!(
                    target = %key,
                    %run_id,
                    rows = report.rows,
                    watermark = %report.next_watermark,
                    elapsed_ms = started.elapsed().as_millis(),
                    "Run succeeded"
                );
            }
            Err(e) => {
                let kind = e.kind();
                emit!(RunCompleted {
                    pipeline: key.to_string(),
                    status: RunStatus::Failed(kind.as_str()),
                });
                error!(
                    target = %key,
                    %run_id,
                    error = %e,
                    error_kind = kind.as_str(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "Run failed"
                );
            }
        }
        result
    }

    async fn load_run_save(
        &self,
        pipeline: &Pipeline,
        run_id: &RunId,
    ) -> Result<RunReport, PipelineError> {
        let key = pipeline.key().id();
        let watermark = self.store.load(key).await.context(WatermarkStoreSnafu)?;
        let report = pipeline.run(run_id, &watermark).await?;

        if report.next_watermark != watermark {
            self.store
                .save(key, &report.next_watermark, run_id)
                .await?;
            emit!(WatermarkAdvanced {
                pipeline: key.to_string(),
            });
        }
        Ok(report)
    }
}

#[async_trait]
impl ScheduledJob for Runner {
    type Error = Infallible;

    /// Failures are per pipeline and already reported; the schedule keeps
    /// going.
    async fn tick(&mut self, tick: u64) -> Result<(), Self::Error> {
        info!(tick, pipelines = self.pipelines.len(), "Scheduled tick");
        self.run_once().await;
        Ok(())
    }
}
