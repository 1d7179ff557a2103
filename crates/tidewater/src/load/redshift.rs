//! Redshift COPY-and-merge.
//!
//! A load is one transaction on one connection:
//!
//! 1. create a session temp table shaped like the declared schema,
//! 2. `COPY` the staged files into it through the run manifest,
//! 3. `UPDATE` existing target rows from it (skipped for insert-only targets),
//! 4. `INSERT` rows whose key is not in the target yet,
//! 5. `DELETE` reconciled keys, when any were planned,
//! 6. drop the temp table and commit.
//!
//! Any failure drops the transaction, which rolls the whole merge back.

use async_trait::async_trait;
use snafu::prelude::*;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use super::{LoadOutcome, UpsertRequest, Warehouse};
use crate::config::{
    Compression, CopyCredentials, SchemaConfig, StagingFormat, TargetConfig, WarehouseConfig,
};
use crate::error::{CommitSnafu, ConnectSnafu, LoadError, StatementSnafu};
use crate::staging::StagedBatch;
use crate::staging::format::CSV_NULL;

/// Keys per `DELETE ... IN (...)` statement.
const DELETE_CHUNK: usize = 1000;

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal for Redshift, which treats `\` as an escape.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// One merge step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    CreateStage,
    Copy,
    Update,
    Insert,
    Delete,
    DropStage,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::CreateStage => "create staging table",
            Step::Copy => "copy",
            Step::Update => "update",
            Step::Insert => "insert",
            Step::Delete => "delete",
            Step::DropStage => "drop staging table",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub step: Step,
    pub sql: String,
}

/// COPY settings shared by every load.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub credentials: CopyCredentials,
    pub region: Option<String>,
}

fn stage_table(target: &TargetConfig) -> String {
    quote_ident(&format!("tidewater_stage_{}", target.table))
}

fn qualified_target(target: &TargetConfig) -> String {
    format!("{}.{}", quote_ident(&target.schema), quote_ident(&target.table))
}

fn credentials_clause(credentials: &CopyCredentials) -> String {
    match credentials {
        CopyCredentials::IamRole { iam_role } => format!("IAM_ROLE {}", quote_literal(iam_role)),
        CopyCredentials::AccessKey {
            access_key_id,
            secret_access_key,
            session_token,
        } => {
            let mut clause = format!(
                "ACCESS_KEY_ID {} SECRET_ACCESS_KEY {}",
                quote_literal(access_key_id),
                quote_literal(secret_access_key)
            );
            if let Some(token) = session_token {
                clause.push_str(&format!(" SESSION_TOKEN {}", quote_literal(token)));
            }
            clause
        }
    }
}

fn format_clause(format: StagingFormat, compression: Compression) -> String {
    let mut clause = match format {
        StagingFormat::Parquet => return "FORMAT AS PARQUET".to_string(),
        StagingFormat::Csv => format!("FORMAT AS CSV IGNOREHEADER 1 NULL AS '{CSV_NULL}'"),
        StagingFormat::Json => "FORMAT AS JSON 'auto'".to_string(),
    };
    if compression == Compression::Gzip {
        clause.push_str(" GZIP");
    }
    clause.push_str(" TIMEFORMAT 'auto' DATEFORMAT 'auto'");
    clause
}

/// Every statement of one merge, in execution order.
///
/// Without a staged batch only the planned deletes run.
pub fn plan_statements(request: &UpsertRequest<'_>, copy: &CopyOptions) -> Vec<Statement> {
    let target = request.target;
    let table = qualified_target(target);
    let key = quote_ident(&target.key);
    let stage = stage_table(target);

    let mut statements = Vec::new();
    if let Some(staged) = request.staged {
        merge_statements(&mut statements, request.schema, target, staged, copy);
    }

    for chunk in request.delete_keys.chunks(DELETE_CHUNK) {
        let keys: Vec<String> = chunk.iter().map(|k| quote_literal(k)).collect();
        statements.push(Statement {
            step: Step::Delete,
            sql: format!(
                "DELETE FROM {table} WHERE CAST({key} AS VARCHAR) IN ({})",
                keys.join(", ")
            ),
        });
    }

    if request.staged.is_some() {
        statements.push(Statement {
            step: Step::DropStage,
            sql: format!("DROP TABLE {stage}"),
        });
    }
    statements
}

fn merge_statements(
    statements: &mut Vec<Statement>,
    schema: &SchemaConfig,
    target: &TargetConfig,
    staged: &StagedBatch,
    copy: &CopyOptions,
) {
    let stage = stage_table(target);
    let table = qualified_target(target);
    let key = quote_ident(&target.key);

    let columns: Vec<String> = schema.fields.iter().map(|f| quote_ident(&f.name)).collect();
    let definitions = schema
        .fields
        .iter()
        .map(|f| format!("{} {}", quote_ident(&f.name), f.field_type.to_redshift_type()))
        .collect::<Vec<_>>()
        .join(", ");
    statements.push(Statement {
        step: Step::CreateStage,
        sql: format!("CREATE TEMP TABLE {stage} ({definitions})"),
    });

    let mut copy_sql = format!(
        "COPY {stage} FROM {} {} MANIFEST {}",
        quote_literal(&staged.manifest_url),
        credentials_clause(&copy.credentials),
        format_clause(staged.format, staged.compression),
    );
    if let Some(region) = &copy.region {
        copy_sql.push_str(&format!(" REGION {}", quote_literal(region)));
    }
    statements.push(Statement {
        step: Step::Copy,
        sql: copy_sql,
    });

    let assignments: Vec<String> = schema
        .fields
        .iter()
        .filter(|f| f.name != target.key)
        .map(|f| {
            let column = quote_ident(&f.name);
            format!("{column} = s.{column}")
        })
        .collect();
    if !target.insert_only && !assignments.is_empty() {
        statements.push(Statement {
            step: Step::Update,
            sql: format!(
                "UPDATE {table} AS t SET {} FROM {stage} AS s WHERE t.{key} = s.{key}",
                assignments.join(", ")
            ),
        });
    }

    let selected: Vec<String> = columns.iter().map(|c| format!("s.{c}")).collect();
    statements.push(Statement {
        step: Step::Insert,
        sql: format!(
            "INSERT INTO {table} ({}) SELECT {} FROM {stage} AS s \
             LEFT JOIN {table} AS t ON t.{key} = s.{key} WHERE t.{key} IS NULL",
            columns.join(", "),
            selected.join(", ")
        ),
    });
}

/// Redshift reached over the PostgreSQL wire protocol.
pub struct RedshiftWarehouse {
    pool: PgPool,
    copy: CopyOptions,
}

impl RedshiftWarehouse {
    /// Create the pool without connecting.
    pub fn new(config: &WarehouseConfig) -> Result<Self, LoadError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(config.connect_timeout())
            .connect_lazy(&config.url)
            .context(ConnectSnafu)?;

        Ok(Self {
            pool,
            copy: CopyOptions {
                credentials: config.copy_credentials.clone(),
                region: config.region.clone(),
            },
        })
    }
}

#[async_trait]
impl Warehouse for RedshiftWarehouse {
    async fn target_keys(&self, target: &TargetConfig) -> Result<Vec<String>, LoadError> {
        let sql = format!(
            "SELECT CAST({} AS VARCHAR) FROM {}",
            quote_ident(&target.key),
            qualified_target(target)
        );
        let keys = sqlx::query_scalar::<_, Option<String>>(&sql)
            .fetch_all(&self.pool)
            .await
            .context(StatementSnafu {
                step: "list target keys",
            })?;
        Ok(keys.into_iter().flatten().collect())
    }

    async fn upsert(&self, request: &UpsertRequest<'_>) -> Result<LoadOutcome, LoadError> {
        let statements = plan_statements(request, &self.copy);
        let mut tx = self.pool.begin().await.context(ConnectSnafu)?;
        let mut outcome = LoadOutcome::default();

        for statement in &statements {
            // COPY carries credentials; only the step is logged.
            debug!(target = %request.pipeline, step = statement.step.as_str(), "Executing");
            let result = sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(&statement.sql))
                .await
                .context(StatementSnafu {
                    step: statement.step.as_str(),
                })?;
            match statement.step {
                Step::Update => outcome.updated += result.rows_affected(),
                Step::Insert => outcome.inserted += result.rows_affected(),
                Step::Delete => outcome.deleted += result.rows_affected(),
                Step::CreateStage | Step::Copy | Step::DropStage => {}
            }
        }

        tx.commit().await.context(CommitSnafu)?;
        info!(
            target = %request.pipeline,
            run_id = %request.run_id,
            table = %request.target.qualified_name(),
            inserted = outcome.inserted,
            updated = outcome.updated,
            deleted = outcome.deleted,
            "Merge committed"
        );
        Ok(outcome)
    }
}
