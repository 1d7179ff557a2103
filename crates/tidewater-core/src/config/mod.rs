//! Configuration building blocks shared by every tidewater binary.

mod vars;

pub use vars::{interpolate, interpolate_with};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{AddressParseSnafu, ConfigError, ReadFileSnafu, YamlParseSnafu};

/// Read a YAML file, interpolate environment variables and deserialize it.
pub fn load_yaml_file<T: DeserializeOwned>(path: &str) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
    parse_yaml(&contents)
}

/// Interpolate environment variables in `contents` and deserialize it.
pub fn parse_yaml<T: DeserializeOwned>(contents: &str) -> Result<T, ConfigError> {
    let text = interpolate(contents)?;
    serde_yaml::from_str(&text).context(YamlParseSnafu)
}

/// An object storage location plus backend options (credentials, region, endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageLocation {
    /// `s3://bucket/prefix`, `file:///path` or an absolute local path.
    pub uri: String,
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

/// Metrics configuration for the Prometheus endpoint.
///
/// The endpoint is only served in scheduled mode; a one-shot run exits
/// before anything could scrape it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP server, e.g. "0.0.0.0:9090".
    #[serde(default)]
    pub address: Option<String>,
}

impl MetricsConfig {
    /// Parse the configured address, if any.
    pub fn socket_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        self.address
            .as_deref()
            .map(|address| address.parse().context(AddressParseSnafu { address }))
            .transpose()
    }
}

/// In-process scheduling settings used by `--schedule`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Delay between the end of one tick and the start of the next.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Random jitter (0 to N seconds) added to every delay.
    #[serde(default)]
    pub jitter_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            jitter_secs: 0,
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_interval_secs() -> u64 {
    20 * 60
}
