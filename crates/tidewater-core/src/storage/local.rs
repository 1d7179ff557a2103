//! Local directory backend, used for dry runs, tests and on-disk watermark state.

use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use snafu::prelude::*;
use std::sync::Arc;
use tracing::debug;

use crate::error::{IoSnafu, ObjectStoreSnafu, StorageError};

use super::{BackendConfig, StorageProvider};

/// Root directory of a local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    /// Absolute path, without a trailing slash.
    pub path: String,
}

impl LocalConfig {
    fn url(&self) -> String {
        format!("file://{}", self.path)
    }
}

impl StorageProvider {
    pub(super) async fn construct_local(config: LocalConfig) -> Result<Self, StorageError> {
        // Staging and state directories may not exist before the first run.
        tokio::fs::create_dir_all(&config.path)
            .await
            .context(IoSnafu)?;

        // Removing a run's staged files also removes its emptied directories.
        let store = LocalFileSystem::new_with_prefix(&config.path)
            .context(ObjectStoreSnafu)?
            .with_automatic_cleanup(true);
        debug!(root = %config.path, "Opened local store");

        Ok(Self {
            canonical_url: config.url(),
            object_store: Arc::new(store) as Arc<dyn ObjectStore>,
            config: BackendConfig::Local(config),
        })
    }
}
