//! Pipeline identifier.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigError;

/// Identifier of one dataset pipeline, e.g. `transactions` or `trades`.
///
/// Keys become path segments in the staging area and the watermark store,
/// so they are restricted to letters, digits, `_` and `-`.
///
/// ```
/// use tidewater::config::PipelineKey;
///
/// let key = PipelineKey::new("trades").unwrap();
/// assert_eq!(key.id(), "trades");
/// assert!(PipelineKey::new("../etc").is_err());
/// ```
#[derive(Debug, Clone, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PipelineKey(String);

impl PipelineKey {
    pub fn new(id: impl Into<String>) -> Result<Self, ConfigError> {
        let id = id.into();
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(Self(id))
        } else {
            Err(ConfigError::InvalidPipelineKey { key: id })
        }
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PipelineKey {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PipelineKey> for String {
    fn from(key: PipelineKey) -> Self {
        key.0
    }
}

impl fmt::Display for PipelineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PipelineKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
