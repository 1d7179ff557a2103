//! Flattening of nested document records into single-level rows.

use serde_json::{Map, Value};

use crate::error::TransformError;

/// Locate the record list inside a document container.
///
/// `path` is dotted (`payload.data`); an empty path means the container is
/// itself the record list or a single record. An array yields one record per
/// element, an object yields one record.
pub fn records_at(document: &Value, path: &str) -> Result<Vec<Map<String, Value>>, TransformError> {
    let mut current = document;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = current
            .get(segment)
            .ok_or_else(|| TransformError::RecordsPath {
                path: path.to_string(),
            })?;
    }

    match current {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(row, item)| match item {
                Value::Object(map) => Ok(map.clone()),
                _ => Err(TransformError::NotAnObject { row }),
            })
            .collect(),
        Value::Object(map) => Ok(vec![map.clone()]),
        _ => Err(TransformError::RecordsPath {
            path: path.to_string(),
        }),
    }
}

/// Flatten nested objects, joining keys with `.`. Arrays are kept as values.
///
/// ```
/// use serde_json::json;
/// use tidewater::transform::flatten::flatten;
///
/// let record = json!({"id": 1, "price": {"amount": 9.5, "ccy": "USD"}});
/// let flat = flatten(record.as_object().unwrap());
/// assert_eq!(flat["price.amount"], json!(9.5));
/// assert_eq!(flat["price.ccy"], json!("USD"));
/// ```
pub fn flatten(record: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into(&mut out, None, record);
    out
}

fn flatten_into(out: &mut Map<String, Value>, prefix: Option<&str>, record: &Map<String, Value>) {
    for (key, value) in record {
        let name = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(nested) => flatten_into(out, Some(&name), nested),
            other => {
                out.insert(name, other.clone());
            }
        }
    }
}
