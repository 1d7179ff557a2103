//! Shaping of extracted records into typed Arrow batches.
//!
//! The transformer flattens document containers, maps column names, drops
//! undeclared columns, coerces every declared field and removes duplicate
//! keys. Any record that does not fit the declared schema aborts the whole
//! batch: nothing is staged from a run whose input is schema-incompatible.

pub mod coerce;
pub mod columns;
pub mod flatten;

use arrow::datatypes::SchemaRef;
use arrow::json::ReaderBuilder;
use arrow::record_batch::RecordBatch;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use snafu::prelude::*;
use std::collections::HashMap;
use tidewater_core::CursorValue;
use tracing::{debug, warn};

use crate::config::{FieldType, PipelineConfig, SchemaConfig};
use crate::error::{CoerceSnafu, DecodeSnafu, TransformError};
use crate::source::{Extracted, RawRecord};
use columns::ColumnMapper;

/// Result of transforming one extraction.
#[derive(Debug, Default)]
pub struct TransformOutput {
    pub batches: Vec<RecordBatch>,
    pub rows: usize,
    /// Upsert keys in output order, one per row.
    pub keys: Vec<String>,
    /// Greatest cursor value in the output, if the pipeline has a cursor.
    pub max_cursor: Option<CursorValue>,
    /// Records dropped because a later record had the same key.
    pub duplicates: usize,
}

/// Column and type rules for one pipeline.
#[derive(Debug, Clone)]
pub struct Transformer {
    mapper: ColumnMapper,
    schema: SchemaConfig,
    arrow_schema: SchemaRef,
    key: String,
    derived: Vec<String>,
    cursor: Option<(String, FieldType)>,
    records_path: String,
    batch_size: usize,
}

impl Transformer {
    pub fn new(config: &PipelineConfig) -> Self {
        let cursor = config.cursor_target_column().and_then(|name| {
            config
                .schema
                .field(&name)
                .map(|field| (name.clone(), field.field_type))
        });

        Self {
            mapper: ColumnMapper::new(&config.transform.rename),
            schema: config.schema.clone(),
            arrow_schema: config.schema.to_arrow_schema(),
            key: config.target.key.clone(),
            derived: config.transform.derived_columns.clone(),
            cursor,
            records_path: config.transform.records_path.clone(),
            batch_size: config.transform.batch_size.max(1),
        }
    }

    pub fn arrow_schema(&self) -> &SchemaRef {
        &self.arrow_schema
    }

    pub fn mapper(&self) -> &ColumnMapper {
        &self.mapper
    }

    /// Transform an extraction into typed batches.
    pub fn transform(&self, extracted: Extracted) -> Result<TransformOutput, TransformError> {
        let records = match extracted {
            Extracted::Rows(rows) => rows,
            Extracted::Document(batch) => match batch.container {
                Some(container) => flatten::records_at(&container, &self.records_path)?
                    .iter()
                    .map(flatten::flatten)
                    .collect(),
                None => Vec::new(),
            },
        };

        let mut by_key: IndexMap<String, Map<String, Value>> = IndexMap::new();
        let mut duplicates = 0;
        for (row, record) in records.into_iter().enumerate() {
            let shaped = self.shape(row, record)?;
            let key = coerce::as_text(&shaped[&self.key]);
            if by_key.insert(key, shaped).is_some() {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            warn!(
                duplicates,
                key = %self.key,
                "Duplicate keys in batch, keeping the last occurrence"
            );
        }

        let max_cursor = self.cursor.as_ref().and_then(|(column, field_type)| {
            by_key
                .values()
                .filter_map(|record| coerce::cursor_value(&record[column], *field_type))
                .reduce(|a, b| if b > a { b } else { a })
        });

        let keys: Vec<String> = by_key.keys().cloned().collect();
        let rows: Vec<Map<String, Value>> = by_key.into_values().collect();
        let batches = self.decode(&rows)?;

        debug!(rows = rows.len(), batches = batches.len(), "Transformed records");

        Ok(TransformOutput {
            batches,
            rows: rows.len(),
            keys,
            max_cursor,
            duplicates,
        })
    }

    /// Map, filter and coerce one record to exactly the declared fields.
    fn shape(&self, row: usize, record: RawRecord) -> Result<Map<String, Value>, TransformError> {
        let mut mapped: HashMap<String, (String, Value)> = HashMap::new();
        for (raw_name, value) in record {
            let target = self.mapper.target_name(&raw_name);
            if self.schema.field(&target).is_none() {
                continue;
            }
            if let Some((first, _)) = mapped.get(&target) {
                return Err(TransformError::ColumnCollision {
                    column: target,
                    first: first.clone(),
                    second: raw_name,
                });
            }
            mapped.insert(target, (raw_name, value));
        }

        let mut shaped = Map::with_capacity(self.schema.fields.len());
        for field in &self.schema.fields {
            let raw = mapped
                .remove(&field.name)
                .map(|(_, value)| value)
                .unwrap_or(Value::Null);
            let value = coerce::coerce(&raw, field).map_err(|message| {
                CoerceSnafu {
                    row,
                    column: field.name.clone(),
                    message,
                }
                .build()
            })?;

            if value.is_null() {
                if self.derived.contains(&field.name) {
                    return Err(TransformError::MissingDerived {
                        row,
                        column: field.name.clone(),
                    });
                }
                if !field.nullable || field.name == self.key {
                    return Err(TransformError::MissingField {
                        row,
                        column: field.name.clone(),
                    });
                }
            }
            shaped.insert(field.name.clone(), value);
        }
        Ok(shaped)
    }

    fn decode(&self, rows: &[Map<String, Value>]) -> Result<Vec<RecordBatch>, TransformError> {
        let mut decoder = ReaderBuilder::new(self.arrow_schema.clone())
            .with_batch_size(self.batch_size)
            .build_decoder()
            .context(DecodeSnafu)?;

        let mut batches = Vec::with_capacity(rows.len().div_ceil(self.batch_size));
        for chunk in rows.chunks(self.batch_size) {
            decoder.serialize(chunk).context(DecodeSnafu)?;
            if let Some(batch) = decoder.flush().context(DecodeSnafu)? {
                batches.push(batch);
            }
        }
        Ok(batches)
    }
}
