//! Source connectors.
//!
//! A [`Source`] turns a watermark into raw records. Relational sources return
//! rows newer than the watermark; document sources return one nested
//! container and ignore the watermark.

mod mongo;
mod postgres;

pub use mongo::MongoSource;
pub use postgres::PostgresSource;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tidewater_core::Watermark;

use crate::config::SourceConfig;
use crate::error::SourceError;

/// One untyped source row, keyed by source column name.
pub type RawRecord = Map<String, Value>;

/// A document container plus how many containers matched the filter.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentBatch {
    /// The selected container, `None` when nothing matched.
    pub container: Option<Value>,
    pub candidates: u64,
}

/// Output of one extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Rows(Vec<RawRecord>),
    Document(DocumentBatch),
}

impl Extracted {
    /// Rows returned, or 1 when a document source selected a container.
    pub fn len(&self) -> usize {
        match self {
            Extracted::Rows(rows) => rows.len(),
            Extracted::Document(batch) => usize::from(batch.container.is_some()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A system records are read from.
#[async_trait]
pub trait Source: Send + Sync {
    /// Read everything newer than `watermark`.
    ///
    /// With [`Watermark::Initial`], or when the source has no cursor, this is
    /// a full snapshot.
    async fn extract(&self, watermark: &Watermark) -> Result<Extracted, SourceError>;

    /// Every key currently present in `column`, as text.
    ///
    /// Only used by reconciliation when the last extraction was incremental.
    async fn fetch_keys(&self, column: &str) -> Result<Vec<String>, SourceError> {
        let _ = column;
        Err(SourceError::KeysUnsupported {
            source_type: self.kind(),
        })
    }

    /// Whether [`Source::extract`] honours the watermark.
    fn is_incremental(&self) -> bool;

    fn kind(&self) -> &'static str;
}

/// Build the connector for a configured source.
///
/// Connections are opened lazily, so an unreachable source fails the run
/// that first needs it rather than startup.
pub fn build_source(pipeline: &str, config: &SourceConfig) -> Result<Box<dyn Source>, SourceError> {
    match config {
        SourceConfig::Postgres(pg) => Ok(Box::new(PostgresSource::new(pg)?)),
        SourceConfig::Mongodb(mongo) => Ok(Box::new(MongoSource::new(pipeline, mongo))),
    }
}
