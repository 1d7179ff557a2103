//! Incremental reads from a PostgreSQL table.

use async_trait::async_trait;
use serde_json::Value;
use snafu::prelude::*;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tidewater_core::{CursorValue, Watermark};
use tracing::debug;

use super::{Extracted, Source};
use crate::config::PostgresSourceConfig;
use crate::error::{PostgresSnafu, SourceError};
use crate::load::redshift::quote_ident;

/// Reads rows as JSON objects so column types need not be known up front.
pub struct PostgresSource {
    pool: PgPool,
    schema: String,
    table: String,
    cursor_column: Option<String>,
}

impl PostgresSource {
    pub fn new(config: &PostgresSourceConfig) -> Result<Self, SourceError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_lazy_with(connect_options(&config.url).context(PostgresSnafu)?);

        Ok(Self {
            pool,
            schema: config.schema.clone(),
            table: config.table.clone(),
            cursor_column: config.cursor_column.clone(),
        })
    }

    fn relation(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

/// Connection settings for `url` with the session zone pinned to UTC.
///
/// `to_jsonb` renders `timestamp` columns without an offset and they are read
/// back as UTC, so the `timestamptz` watermark comparison must also convert
/// them as UTC.
fn connect_options(url: &str) -> Result<PgConnectOptions, sqlx::Error> {
    Ok(PgConnectOptions::from_str(url)?.options([("timezone", "UTC")]))
}

/// `SELECT` for rows past `watermark`; `None` cursor means a full scan.
fn extract_query(relation: &str, cursor_column: Option<&str>, watermark: &Watermark) -> String {
    let select = format!("SELECT to_jsonb(t) FROM {relation} AS t");
    match (cursor_column, watermark.cursor()) {
        (Some(column), Some(cursor)) => {
            let cast = match cursor {
                CursorValue::Integer(_) => "bigint",
                CursorValue::Timestamp(_) => "timestamptz",
            };
            format!("{select} WHERE t.{} > $1::{cast}", quote_ident(column))
        }
        _ => select,
    }
}

fn keys_query(relation: &str, column: &str) -> String {
    format!(
        "SELECT CAST(t.{} AS TEXT) FROM {relation} AS t",
        quote_ident(column)
    )
}

#[async_trait]
impl Source for PostgresSource {
    async fn extract(&self, watermark: &Watermark) -> Result<Extracted, SourceError> {
        let sql = extract_query(&self.relation(), self.cursor_column.as_deref(), watermark);
        debug!(sql = %sql, watermark = %watermark, "Querying source table");

        let query = sqlx::query_scalar::<_, Value>(&sql);
        let query = match (self.cursor_column.as_ref(), watermark.cursor()) {
            (Some(_), Some(CursorValue::Integer(value))) => query.bind(*value),
            (Some(_), Some(CursorValue::Timestamp(value))) => query.bind(*value),
            _ => query,
        };

        let values = query.fetch_all(&self.pool).await.context(PostgresSnafu)?;
        let rows = values
            .into_iter()
            .filter_map(|value| match value {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        Ok(Extracted::Rows(rows))
    }

    async fn fetch_keys(&self, column: &str) -> Result<Vec<String>, SourceError> {
        let sql = keys_query(&self.relation(), column);
        let keys = sqlx::query_scalar::<_, Option<String>>(&sql)
            .fetch_all(&self.pool)
            .await
            .context(PostgresSnafu)?;
        Ok(keys.into_iter().flatten().collect())
    }

    fn is_incremental(&self) -> bool {
        self.cursor_column.is_some()
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }
}
