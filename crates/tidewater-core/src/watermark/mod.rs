//! Watermark cursor values.
//!
//! A watermark marks the last successfully loaded point of a source's change
//! history. It is persisted outside the process, handed to every run as an
//! explicit value, and only ever moves forward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A single cursor position: an integer sequence or a UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CursorValue {
    Integer(i64),
    Timestamp(DateTime<Utc>),
}

impl PartialOrd for CursorValue {
    /// Values of different kinds are incomparable.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (CursorValue::Integer(a), CursorValue::Integer(b)) => Some(a.cmp(b)),
            (CursorValue::Timestamp(a), CursorValue::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for CursorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorValue::Integer(v) => write!(f, "{v}"),
            CursorValue::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

/// Persisted watermark state.
///
/// ```json
/// {"state": "At", "value": {"kind": "integer", "value": 1042}}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "value")]
pub enum Watermark {
    /// Nothing loaded yet; the next run reads everything.
    #[default]
    Initial,
    /// Everything up to and including this cursor value has been loaded.
    At(CursorValue),
}

/// Result of offering a candidate to [`Watermark::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The candidate was strictly greater and replaced the watermark.
    Moved,
    /// The candidate was not greater; the watermark is unchanged.
    Unchanged,
    /// The candidate has a different kind than the stored cursor.
    KindMismatch,
}

impl Watermark {
    pub fn cursor(&self) -> Option<&CursorValue> {
        match self {
            Watermark::Initial => None,
            Watermark::At(cursor) => Some(cursor),
        }
    }

    pub fn is_initial(&self) -> bool {
        matches!(self, Watermark::Initial)
    }

    /// Move to `candidate` only if it is strictly greater than the current
    /// position.
    pub fn advance(&mut self, candidate: CursorValue) -> Advance {
        match self {
            Watermark::Initial => {
                *self = Watermark::At(candidate);
                Advance::Moved
            }
            Watermark::At(current) => match candidate.partial_cmp(current) {
                Some(Ordering::Greater) => {
                    *current = candidate;
                    Advance::Moved
                }
                Some(_) => Advance::Unchanged,
                None => Advance::KindMismatch,
            },
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Initial => write!(f, "initial"),
            Watermark::At(cursor) => write!(f, "{cursor}"),
        }
    }
}
