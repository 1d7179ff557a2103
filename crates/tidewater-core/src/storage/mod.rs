//! Object storage abstraction over S3 and the local filesystem.
//!
//! Every path passed to [`StorageProvider`] is relative to the key prefix of
//! the URL the provider was built from. `s3://bucket/staging` plus
//! `trades/run=1/part-00000.parquet` addresses
//! `s3://bucket/staging/trades/run=1/part-00000.parquet`.

mod local;
mod s3;
mod url_parser;

pub use local::LocalConfig;
pub use s3::S3Config;
pub use url_parser::BackendConfig;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use snafu::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::emit;
use crate::error::{ObjectStoreSnafu, StorageError};
use crate::metrics::events::{RequestStatus, StorageOperation, StorageRequest};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Storage provider bound to one bucket/prefix or local directory.
#[derive(Clone)]
pub struct StorageProvider {
    config: BackendConfig,
    object_store: Arc<dyn ObjectStore>,
    canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

fn record<T, E>(operation: StorageOperation, start: Instant, result: &Result<T, E>) {
    emit!(StorageRequest {
        operation,
        status: RequestStatus::from_result(result),
        duration: start.elapsed(),
    });
}

impl StorageProvider {
    /// Create a storage provider for `url` with backend options.
    ///
    /// For S3 the options are `object_store` AWS config keys such as
    /// `aws_access_key_id` or `aws_region`; they override the environment.
    pub async fn for_url_with_options(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(url)? {
            BackendConfig::S3(config) => Self::construct_s3(config, &options),
            BackendConfig::Local(config) => Self::construct_local(config).await,
        }
    }

    /// Get the backend configuration.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// The URL this provider is rooted at.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// Absolute URL of a relative path, as an external reader such as the
    /// warehouse COPY command must see it.
    pub fn object_url(&self, path: &Path) -> String {
        let qualified = self.qualify_path(path);
        match &self.config {
            BackendConfig::S3(s3) => format!("{}/{qualified}", s3.bucket_url()),
            BackendConfig::Local(local) => format!("file://{}/{qualified}", local.path),
        }
    }

    /// Get the contents of an object.
    pub async fn get(&self, path: &Path) -> Result<Bytes, StorageError> {
        let start = Instant::now();
        let result = match self.object_store.get(&self.qualify_path(path)).await {
            Ok(response) => response.bytes().await,
            Err(e) => Err(e),
        };
        record(StorageOperation::Get, start, &result);
        result.context(ObjectStoreSnafu)
    }

    /// Write a payload, replacing any existing object.
    pub async fn put_payload(&self, path: &Path, payload: PutPayload) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.object_store.put(&self.qualify_path(path), payload).await;
        record(StorageOperation::Put, start, &result);
        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Write bytes, replacing any existing object.
    pub async fn put(&self, path: &Path, bytes: impl Into<Bytes>) -> Result<(), StorageError> {
        self.put_payload(path, PutPayload::from(bytes.into())).await
    }

    /// Delete one object.
    pub async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.object_store.delete(&self.qualify_path(path)).await;
        record(StorageOperation::Delete, start, &result);
        result.context(ObjectStoreSnafu)
    }

    /// List every object under `prefix`, returning paths relative to the
    /// provider root.
    pub async fn list_with_prefix(&self, prefix: &Path) -> Result<Vec<Path>, StorageError> {
        let full_prefix = self.qualify_path(prefix);
        let skip = self.config.key().map_or(0, |key| key.parts().count());

        let start = Instant::now();
        let result: Result<Vec<_>, _> = self
            .object_store
            .list(Some(&full_prefix))
            .try_collect()
            .await;
        record(StorageOperation::List, start, &result);

        let mut paths: Vec<Path> = result
            .context(ObjectStoreSnafu)?
            .into_iter()
            .map(|meta| meta.location.parts().skip(skip).collect())
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Delete every object under `prefix`. Returns the number removed.
    pub async fn delete_prefix(&self, prefix: &Path) -> Result<usize, StorageError> {
        let paths = self.list_with_prefix(prefix).await?;
        for path in &paths {
            match self.delete(path).await {
                Ok(()) => {}
                // Concurrent cleanup already removed it.
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        debug!(prefix = %prefix, count = paths.len(), "Deleted prefix");
        Ok(paths.len())
    }

    /// Atomically write content to a path using temp file + rename.
    ///
    /// Readers see either the previous object or the complete new one.
    pub async fn atomic_write(&self, path: &Path, content: Vec<u8>) -> Result<(), StorageError> {
        let temp_path = Path::from(format!("{path}.tmp"));
        self.put(&temp_path, content).await?;
        self.rename(&temp_path, path).await
    }

    /// Server-side rename (copy + delete on S3, `rename(2)` locally).
    pub async fn rename(&self, from: &Path, to: &Path) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self
            .object_store
            .rename(&self.qualify_path(from), &self.qualify_path(to))
            .await;
        record(StorageOperation::Rename, start, &result);
        result.context(ObjectStoreSnafu)
    }
}
