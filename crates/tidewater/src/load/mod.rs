//! Loading staged batches into the warehouse.

pub mod reconcile;
pub mod redshift;

pub use redshift::RedshiftWarehouse;

use async_trait::async_trait;

use crate::config::{SchemaConfig, TargetConfig};
use crate::error::LoadError;
use crate::pipeline::RunId;
use crate::staging::StagedBatch;

/// Everything one merge needs.
#[derive(Debug, Clone, Copy)]
pub struct UpsertRequest<'a> {
    pub pipeline: &'a str,
    pub run_id: &'a RunId,
    pub target: &'a TargetConfig,
    pub schema: &'a SchemaConfig,
    /// Files to merge; `None` when the run only deletes.
    pub staged: Option<&'a StagedBatch>,
    /// Target keys to delete in the same transaction, as text.
    pub delete_keys: &'a [String],
}

/// Row counts reported by a committed merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

/// A warehouse that can merge staged files into a target table.
///
/// An `upsert` either commits completely or leaves the target untouched.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Every key currently in the target table, as text.
    async fn target_keys(&self, target: &TargetConfig) -> Result<Vec<String>, LoadError>;

    /// Insert new keys, overwrite existing ones and delete `delete_keys`.
    async fn upsert(&self, request: &UpsertRequest<'_>) -> Result<LoadOutcome, LoadError>;
}
