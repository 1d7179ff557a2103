//! Value coercion to declared field types.
//!
//! Coerced values are canonical JSON that the Arrow JSON decoder accepts for
//! the field's Arrow type: integers and floats as numbers, timestamps as
//! RFC 3339 UTC strings with microseconds, dates as `YYYY-MM-DD`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Number, Value};
use tidewater_core::CursorValue;

use crate::config::{FieldConfig, FieldType};

const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Coerce `value` to the type of `field`. Returns `Value::Null` for null and
/// for blank strings in non-text fields.
pub fn coerce(value: &Value, field: &FieldConfig) -> Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let text_field = matches!(field.field_type, FieldType::String | FieldType::Json);
    if !text_field && value.as_str().is_some_and(|s| s.trim().is_empty()) {
        return Ok(Value::Null);
    }

    match field.field_type {
        FieldType::String => Ok(Value::String(as_text(value))),
        FieldType::Json => Ok(Value::String(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })),
        FieldType::Int32 => {
            let v = to_i64(value)?;
            i32::try_from(v)
                .map(Value::from)
                .map_err(|_| format!("{v} is out of range for int32"))
        }
        FieldType::Int64 => to_i64(value).map(Value::from),
        FieldType::Float32 | FieldType::Float64 => {
            let v = to_f64(value)?;
            Number::from_f64(v)
                .map(Value::Number)
                .ok_or_else(|| format!("{v} is not a finite number"))
        }
        FieldType::Boolean => to_bool(value).map(Value::Bool),
        FieldType::Timestamp => to_timestamp(value, field.format.as_deref())
            .map(|ts| Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true))),
        FieldType::Date => to_date(value, field.format.as_deref())
            .map(|d| Value::String(d.format(DATE_FORMAT).to_string())),
    }
}

/// Read a cursor position back out of a coerced value.
pub fn cursor_value(value: &Value, field_type: FieldType) -> Option<CursorValue> {
    match field_type {
        FieldType::Int32 | FieldType::Int64 => value.as_i64().map(CursorValue::Integer),
        FieldType::Timestamp => value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| CursorValue::Timestamp(ts.with_timezone(&Utc))),
        _ => None,
    }
}

/// Text form used for keys and string columns.
pub fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn describe(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() > 64 {
        let head: String = text.chars().take(61).collect();
        format!("{head}...")
    } else {
        text
    }
}

/// Strip padding and thousands separators: `" 1,234.50 "` -> `"1234.50"`.
fn normalize_numeric(s: &str) -> String {
    s.trim().chars().filter(|c| *c != ',').collect()
}

fn to_i64(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                return Ok(v);
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                    Ok(f as i64)
                }
                _ => Err(format!("{n} is not an integer")),
            }
        }
        Value::String(s) => {
            let cleaned = normalize_numeric(s);
            cleaned
                .parse::<i64>()
                .or_else(|_| match cleaned.parse::<f64>() {
                    Ok(f) if f.fract() == 0.0 => Ok(f as i64),
                    _ => Err(()),
                })
                .map_err(|_| format!("cannot parse {} as an integer", describe(value)))
        }
        Value::Object(map) => match map.get("$numberLong").or_else(|| map.get("$numberInt")) {
            Some(inner) => to_i64(inner),
            None => Err(format!("cannot convert {} to an integer", describe(value))),
        },
        _ => Err(format!("cannot convert {} to an integer", describe(value))),
    }
}

fn to_f64(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("{n} is not representable as a float")),
        Value::String(s) => normalize_numeric(s)
            .parse::<f64>()
            .map_err(|_| format!("cannot parse {} as a number", describe(value))),
        Value::Object(map) => match map
            .get("$numberDouble")
            .or_else(|| map.get("$numberDecimal"))
            .or_else(|| map.get("$numberLong"))
        {
            Some(inner) => to_f64(inner),
            None => Err(format!("cannot convert {} to a number", describe(value))),
        },
        _ => Err(format!("cannot convert {} to a number", describe(value))),
    }
}

fn to_bool(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(format!("{n} is not a boolean")),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Ok(true),
            "false" | "f" | "no" | "n" | "0" => Ok(false),
            _ => Err(format!("cannot parse {} as a boolean", describe(value))),
        },
        _ => Err(format!("cannot convert {} to a boolean", describe(value))),
    }
}

fn to_timestamp(value: &Value, format: Option<&str>) -> Result<DateTime<Utc>, String> {
    match value {
        Value::String(s) => parse_timestamp(s.trim(), format)
            .ok_or_else(|| format!("cannot parse {} as a timestamp", describe(value))),
        // Epoch milliseconds, the document store's native date encoding.
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| format!("{n} is not a valid epoch-millisecond timestamp")),
        Value::Object(map) => match map.get("$date") {
            Some(inner) => to_timestamp(inner, None),
            None => match map.get("$numberLong") {
                Some(inner) => to_i64(inner).and_then(|ms| {
                    Utc.timestamp_millis_opt(ms)
                        .single()
                        .ok_or_else(|| format!("{ms} is not a valid epoch-millisecond timestamp"))
                }),
                None => Err(format!("cannot convert {} to a timestamp", describe(value))),
            },
        },
        _ => Err(format!("cannot convert {} to a timestamp", describe(value))),
    }
}

fn parse_timestamp(s: &str, format: Option<&str>) -> Option<DateTime<Utc>> {
    if let Some(format) = format {
        if format.contains("%z") || format.contains("%:z") || format.contains("%#z") {
            return DateTime::parse_from_str(s, format)
                .ok()
                .map(|ts| ts.with_timezone(&Utc));
        }
        return NaiveDateTime::parse_from_str(s, format)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, format)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
            .map(|naive| naive.and_utc());
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

fn to_date(value: &Value, format: Option<&str>) -> Result<NaiveDate, String> {
    let Value::String(s) = value else {
        return to_timestamp(value, None).map(|ts| ts.date_naive());
    };
    let s = s.trim();

    let parsed = match format {
        Some(format) => NaiveDate::parse_from_str(s, format)
            .ok()
            .or_else(|| parse_timestamp(s, Some(format)).map(|ts| ts.date_naive())),
        None => NaiveDate::parse_from_str(s, DATE_FORMAT)
            .ok()
            .or_else(|| parse_timestamp(s, None).map(|ts| ts.date_naive())),
    };
    parsed.ok_or_else(|| format!("cannot parse {} as a date", describe(value)))
}
