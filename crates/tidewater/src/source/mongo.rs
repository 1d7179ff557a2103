//! Single-container reads from a MongoDB collection.

use async_trait::async_trait;
use mongodb::bson::{self, Bson, Document};
use mongodb::options::ClientOptions;
use mongodb::Client;
use snafu::prelude::*;
use std::time::Duration;
use tidewater_core::emit;
use tidewater_core::metrics::events::DocumentCandidates;
use tidewater_core::Watermark;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::{DocumentBatch, Extracted, Source};
use crate::config::{DocumentSelection, MongoSourceConfig};
use crate::error::{InvalidFilterSnafu, MongoSnafu, SourceError};

pub struct MongoSource {
    pipeline: String,
    config: MongoSourceConfig,
    client: OnceCell<Client>,
}

impl MongoSource {
    pub fn new(pipeline: &str, config: &MongoSourceConfig) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            config: config.clone(),
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&Client, SourceError> {
        self.client
            .get_or_try_init(|| async {
                let timeout = Duration::from_secs(self.config.connect_timeout_secs);
                let mut options = ClientOptions::parse(&self.config.url)
                    .await
                    .context(MongoSnafu)?;
                options.app_name = Some("tidewater".to_string());
                options.connect_timeout = Some(timeout);
                options.server_selection_timeout = Some(timeout);
                Client::with_options(options).context(MongoSnafu)
            })
            .await
    }
}

fn filter_document(filter: &serde_json::Map<String, serde_json::Value>) -> Result<Document, SourceError> {
    bson::to_document(filter).context(InvalidFilterSnafu)
}

/// Sort order for the configured selection; `None` keeps natural order.
fn sort_document(selection: &DocumentSelection) -> Option<Document> {
    match selection {
        DocumentSelection::First => None,
        DocumentSelection::LatestBy(field) => {
            let mut sort = Document::new();
            sort.insert(field.clone(), -1);
            Some(sort)
        }
    }
}

#[async_trait]
impl Source for MongoSource {
    async fn extract(&self, _watermark: &Watermark) -> Result<Extracted, SourceError> {
        let collection = self
            .client()
            .await?
            .database(&self.config.database)
            .collection::<Document>(&self.config.collection);
        let filter = filter_document(&self.config.filter)?;

        let candidates = collection
            .count_documents(filter.clone())
            .await
            .context(MongoSnafu)?;
        emit!(DocumentCandidates {
            pipeline: self.pipeline.clone(),
            count: candidates,
        });
        if candidates == 0 {
            debug!(target = %self.pipeline, "No document matched the filter");
            return Ok(Extracted::Document(DocumentBatch {
                container: None,
                candidates,
            }));
        }

        let sort = sort_document(&self.config.selection);
        if candidates > 1 && sort.is_none() {
            warn!(
                target = %self.pipeline,
                candidates,
                collection = %self.config.collection,
                "Several documents match; taking the first in natural order"
            );
        }

        let found = match sort {
            Some(sort) => collection.find_one(filter).sort(sort).await,
            None => collection.find_one(filter).await,
        }
        .context(MongoSnafu)?;

        Ok(Extracted::Document(DocumentBatch {
            container: found.map(|doc| Bson::Document(doc).into_relaxed_extjson()),
            candidates,
        }))
    }

    fn is_incremental(&self) -> bool {
        false
    }

    fn kind(&self) -> &'static str {
        "mongodb"
    }
}
