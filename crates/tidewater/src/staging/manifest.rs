//! COPY manifest listing exactly the files of one staged run.

use serde::{Deserialize, Serialize};

/// Manifest in the shape the warehouse COPY command reads.
///
/// ```json
/// {"entries": [{"url": "s3://bucket/trades/run=1/part-00000.parquet",
///               "mandatory": true, "meta": {"content_length": 1024}}]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub url: String,
    /// COPY fails if a mandatory file is missing.
    pub mandatory: bool,
    pub meta: ManifestMeta,
}

/// Columnar formats require the object size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMeta {
    pub content_length: u64,
}

impl Manifest {
    pub fn push(&mut self, url: String, content_length: u64) {
        self.entries.push(ManifestEntry {
            url,
            mandatory: true,
            meta: ManifestMeta { content_length },
        });
    }
}
