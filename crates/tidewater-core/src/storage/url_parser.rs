//! URL parsing for storage backends.
//!
//! Redshift COPY reads from S3 only, so S3 is the production backend. Local
//! paths exist for tests and dry runs against a filesystem staging area.

use object_store::path::Path;
use regex::Regex;
use std::sync::LazyLock;

use crate::error::{InvalidUrlSnafu, StorageError};

use super::{LocalConfig, S3Config};

const S3_PATH: &str =
    r"^https://s3\.(?P<region>[\w\-]+)\.amazonaws\.com/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+?))?/?$";
const S3_VIRTUAL: &str =
    r"^https://(?P<bucket>[a-z0-9\-\.]+)\.s3\.(?P<region>[\w\-]+)\.amazonaws\.com(/(?P<key>.+?))?/?$";
const S3_URL: &str = r"^[sS]3[aA]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+?))?/?$";
const S3_ENDPOINT_URL: &str = r"^[sS]3[aA]?::(?P<protocol>https?)://(?P<endpoint>[^:/]+):(?P<port>\d+)/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+?))?/?$";

const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_PATH: &str = r"^/(?P<path>.*)$";

static S3_MATCHERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [S3_PATH, S3_VIRTUAL, S3_ENDPOINT_URL, S3_URL]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("S3 url pattern is valid"))
        .collect()
});

static LOCAL_MATCHERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [FILE_URI, FILE_PATH]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("file url pattern is valid"))
        .collect()
});

/// Backend configuration parsed from a storage URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Local(LocalConfig),
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        if let Some(caps) = S3_MATCHERS.iter().find_map(|r| r.captures(url)) {
            return Ok(Self::parse_s3(&caps));
        }
        if let Some(caps) = LOCAL_MATCHERS.iter().find_map(|r| r.captures(url)) {
            return Ok(Self::parse_local(&caps));
        }
        InvalidUrlSnafu { url }.fail()
    }

    fn parse_s3(caps: &regex::Captures) -> Self {
        let bucket = caps["bucket"].to_string();

        let region = std::env::var("AWS_DEFAULT_REGION")
            .ok()
            .or_else(|| caps.name("region").map(|m| m.as_str().to_string()));

        let endpoint = std::env::var("AWS_ENDPOINT").ok().or_else(|| {
            caps.name("endpoint").map(|endpoint| {
                let port = caps
                    .name("port")
                    .and_then(|p| p.as_str().parse::<u16>().ok())
                    .unwrap_or(443);
                let protocol = caps.name("protocol").map_or("https", |p| p.as_str());
                format!("{protocol}://{}:{port}", endpoint.as_str())
            })
        });

        let key = caps.name("key").map(|m| Path::from(m.as_str()));

        BackendConfig::S3(S3Config {
            endpoint,
            region,
            bucket,
            key,
        })
    }

    fn parse_local(caps: &regex::Captures) -> Self {
        let raw = caps["path"].trim_end_matches('/');
        let path = if raw.starts_with('/') {
            raw.to_string()
        } else {
            format!("/{raw}")
        };
        BackendConfig::Local(LocalConfig { path })
    }

    /// Key prefix applied to every relative path.
    pub(crate) fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3(s3) => s3.key.as_ref(),
            BackendConfig::Local(_) => None,
        }
    }
}
