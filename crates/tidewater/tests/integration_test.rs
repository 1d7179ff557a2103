//! Integration tests for tidewater
//!
//! Sources and the warehouse are in-memory fakes; staging and the watermark
//! store use the local filesystem.

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use flate2::read::GzDecoder;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use regex::Regex;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::io::{BufReader, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use tidewater::checkpoint::WatermarkStore;
use tidewater::config::{Compression, Config, StagingFormat, TargetConfig};
use tidewater::error::{ErrorKind, LoadError, SourceError};
use tidewater::load::{LoadOutcome, UpsertRequest, Warehouse};
use tidewater::source::{DocumentBatch, Extracted, RawRecord, Source};
use tidewater::staging::{StagedBatch, Stager};
use tidewater::{CursorValue, Pipeline, RunId, Runner, StorageProvider, Watermark};

// ============================================================================
// Fakes
// ============================================================================

/// A table keyed by `id` and read past the watermark on `cursor`.
#[derive(Clone)]
struct FakeTable {
    cursor: &'static str,
    rows: Arc<Mutex<Vec<RawRecord>>>,
    down: Arc<AtomicBool>,
}

impl FakeTable {
    fn new(cursor: &'static str) -> Self {
        Self {
            cursor,
            rows: Arc::default(),
            down: Arc::default(),
        }
    }

    fn insert(&self, row: Value) {
        let Value::Object(map) = row else {
            panic!("rows must be objects")
        };
        self.rows.lock().unwrap().push(map);
    }

    fn delete(&self, id: i64) {
        self.rows
            .lock()
            .unwrap()
            .retain(|row| row["id"].as_i64() != Some(id));
    }

    fn replace(&self, row: Value) {
        self.delete(row["id"].as_i64().unwrap());
        self.insert(row);
    }

    fn is_past(&self, row: &RawRecord, watermark: &Watermark) -> bool {
        let value = &row[self.cursor];
        match watermark.cursor() {
            None => true,
            Some(CursorValue::Integer(after)) => value.as_i64().is_some_and(|v| v > *after),
            Some(CursorValue::Timestamp(after)) => {
                value.as_str().and_then(parse_utc).is_some_and(|ts| ts > *after)
            }
        }
    }
}

/// Offset timestamps, or naive ones read in a UTC session.
fn parse_utc(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[async_trait]
impl Source for FakeTable {
    async fn extract(&self, watermark: &Watermark) -> Result<Extracted, SourceError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable {
                message: "connection refused".into(),
            });
        }
        let rows = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| self.is_past(row, watermark))
            .cloned()
            .collect();
        Ok(Extracted::Rows(rows))
    }

    async fn fetch_keys(&self, column: &str) -> Result<Vec<String>, SourceError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .map(|row| row[column].to_string())
            .collect())
    }

    fn is_incremental(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "fake-table"
    }
}

/// A collection of containers; the first one wins.
#[derive(Clone, Default)]
struct FakeCollection {
    containers: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl Source for FakeCollection {
    async fn extract(&self, _watermark: &Watermark) -> Result<Extracted, SourceError> {
        let containers = self.containers.lock().unwrap();
        Ok(Extracted::Document(DocumentBatch {
            container: containers.first().cloned(),
            candidates: containers.len() as u64,
        }))
    }

    fn is_incremental(&self) -> bool {
        false
    }

    fn kind(&self) -> &'static str {
        "fake-collection"
    }
}

type Table = BTreeMap<String, Map<String, Value>>;

/// Applies staged files to in-memory tables, all or nothing.
///
/// Files are read back the way COPY reads them: CSV fields equal to `\N`
/// are NULL and empty fields are empty strings.
struct InMemoryWarehouse {
    staging: Arc<StorageProvider>,
    tables: Mutex<HashMap<String, Table>>,
    fail_next: AtomicBool,
    loads: AtomicUsize,
}

impl InMemoryWarehouse {
    fn new(staging: Arc<StorageProvider>) -> Self {
        Self {
            staging,
            tables: Mutex::new(HashMap::new()),
            fail_next: AtomicBool::new(false),
            loads: AtomicUsize::new(0),
        }
    }

    fn table(&self, name: &str) -> Table {
        self.tables
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    async fn staged_rows(&self, request: &UpsertRequest<'_>) -> Vec<Map<String, Value>> {
        let Some(staged) = request.staged else {
            return Vec::new();
        };
        let schema = request.schema.to_arrow_schema();
        let mut rows = Vec::new();
        for file in &staged.files {
            let bytes: Bytes = self.staging.get(&file.path).await.unwrap();
            for batch in decode(bytes, staged, &schema) {
                let mut writer = arrow::json::ArrayWriter::new(Vec::new());
                writer.write(&batch).unwrap();
                writer.finish().unwrap();
                let decoded: Vec<Map<String, Value>> =
                    serde_json::from_slice(&writer.into_inner()).unwrap();
                rows.extend(decoded);
            }
        }
        rows
    }
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    async fn target_keys(&self, target: &TargetConfig) -> Result<Vec<String>, LoadError> {
        Ok(self.table(&target.qualified_name()).into_keys().collect())
    }

    async fn upsert(&self, request: &UpsertRequest<'_>) -> Result<LoadOutcome, LoadError> {
        let rows = self.staged_rows(request).await;
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(LoadError::Rejected {
                message: "injected COPY failure".into(),
            });
        }

        let name = request.target.qualified_name();
        let mut table = self.table(&name);
        let mut outcome = LoadOutcome::default();
        for row in rows {
            let key = match &row[&request.target.key] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            match table.get_mut(&key) {
                Some(_) if request.target.insert_only => {}
                Some(existing) => {
                    *existing = row;
                    outcome.updated += 1;
                }
                None => {
                    table.insert(key, row);
                    outcome.inserted += 1;
                }
            }
        }
        for key in request.delete_keys {
            if table.remove(key).is_some() {
                outcome.deleted += 1;
            }
        }

        self.tables.lock().unwrap().insert(name, table);
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(outcome)
    }
}

fn decode(bytes: Bytes, staged: &StagedBatch, schema: &SchemaRef) -> Vec<RecordBatch> {
    if staged.format == StagingFormat::Parquet {
        return ParquetRecordBatchReaderBuilder::try_new(bytes)
            .unwrap()
            .build()
            .unwrap()
            .map(Result::unwrap)
            .collect();
    }

    let body: Box<dyn Read> = match staged.compression {
        Compression::Gzip => Box::new(GzDecoder::new(std::io::Cursor::new(bytes))),
        Compression::None => Box::new(std::io::Cursor::new(bytes)),
    };
    let body = BufReader::new(body);
    match staged.format {
        StagingFormat::Csv => arrow::csv::ReaderBuilder::new(schema.clone())
            .with_header(true)
            .with_null_regex(Regex::new(r"^\\N$").unwrap())
            .build(body)
            .unwrap()
            .map(Result::unwrap)
            .collect(),
        StagingFormat::Json => arrow::json::ReaderBuilder::new(schema.clone())
            .build(body)
            .unwrap()
            .map(Result::unwrap)
            .collect(),
        StagingFormat::Parquet => unreachable!(),
    }
}

// ============================================================================
// Harness
// ============================================================================

const CONFIG: &str = r#"
warehouse:
  url: postgres://etl@localhost:5439/dev
  copy_credentials: { iam_role: "arn:aws:iam::1:role/copy" }
staging: { uri: "STAGING", format: FORMAT, compression: COMPRESSION }
state: { uri: "STATE" }
pipelines:
  transactions:
    source: { type: postgres, url: "postgres://bank@localhost/bank", table: bank, cursor_column: id }
    transform:
      rename: { "Account No": account_no }
      derived_columns: [balance_amt]
    schema:
      fields:
        - { name: id, type: int64, nullable: false }
        - { name: account_no, type: string }
        - { name: withdrawal_amt, type: float64 }
        - { name: balance_amt, type: float64 }
    target: { table: transactions, key: id, delete_missing: DELETE_MISSING }
  trades:
    source: { type: mongodb, url: "mongodb://localhost:27017", database: finance, collection: trades }
    schema:
      fields:
        - { name: id, type: int64, nullable: false }
        - { name: symbol, type: string }
        - { name: price_amount, type: float64 }
    target: { table: trades, key: id }
  events:
    source: { type: postgres, url: "postgres://app@localhost/app", table: events, cursor_column: updated_at }
    schema:
      fields:
        - { name: id, type: int64, nullable: false }
        - { name: note, type: string }
        - { name: updated_at, type: timestamp, nullable: false }
    target: { table: events, key: id }
"#;

fn render_config(dir: &std::path::Path, delete_missing: bool, format: &str, compression: &str) -> String {
    CONFIG
        .replace("STAGING", dir.join("staging").to_str().unwrap())
        .replace("STATE", dir.join("state").to_str().unwrap())
        .replace("DELETE_MISSING", &delete_missing.to_string())
        .replace("FORMAT", format)
        .replace("COMPRESSION", compression)
}

struct Harness {
    config: Config,
    runner: Runner,
    warehouse: Arc<InMemoryWarehouse>,
    table: FakeTable,
    events: FakeTable,
    collection: FakeCollection,
    dir: TempDir,
}

impl Harness {
    async fn new(delete_missing: bool) -> Self {
        Self::build(delete_missing, "parquet", "none").await
    }

    async fn with_staging(format: &str, compression: &str) -> Self {
        Self::build(false, format, compression).await
    }

    async fn build(delete_missing: bool, format: &str, compression: &str) -> Self {
        tidewater_core::init_metrics_test();
        let dir = TempDir::new().unwrap();
        let state_uri = dir.path().join("state");
        let yaml = render_config(dir.path(), delete_missing, format, compression);
        let config = Config::parse(&yaml).unwrap();

        let stager = Stager::new(&config.staging).await.unwrap();
        let warehouse = Arc::new(InMemoryWarehouse::new(stager.storage().clone()));
        let state = StorageProvider::for_url_with_options(
            state_uri.to_str().unwrap(),
            HashMap::new(),
        )
        .await
        .unwrap();

        let table = FakeTable::new("id");
        let events = FakeTable::new("updated_at");
        let collection = FakeCollection::default();
        let pipelines = config
            .pipelines
            .iter()
            .map(|(key, pipeline)| {
                let source: Box<dyn Source> = match key.id() {
                    "transactions" => Box::new(table.clone()),
                    "events" => Box::new(events.clone()),
                    _ => Box::new(collection.clone()),
                };
                Pipeline::new(
                    key.clone(),
                    pipeline.clone(),
                    source,
                    stager.clone(),
                    warehouse.clone(),
                )
            })
            .collect();

        Self {
            config,
            runner: Runner::new(pipelines, WatermarkStore::new(Arc::new(state)), None),
            warehouse,
            table,
            events,
            collection,
            dir,
        }
    }

    fn transactions(&self) -> Table {
        self.warehouse.table("public.transactions")
    }

    fn events_table(&self) -> Table {
        self.warehouse.table("public.events")
    }

    fn trades(&self) -> Table {
        self.warehouse.table("public.trades")
    }

    async fn watermark(&self) -> Watermark {
        self.watermark_of("transactions").await
    }

    async fn watermark_of(&self, pipeline: &str) -> Watermark {
        self.runner.store().load(pipeline).await.unwrap()
    }

    fn staged_files(&self) -> usize {
        walk(&self.dir.path().join("staging"))
    }
}

fn walk(dir: &std::path::Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| {
            if entry.path().is_dir() {
                walk(&entry.path())
            } else {
                1
            }
        })
        .sum()
}

fn bank_row(id: i64, account: &str, withdrawal: Option<f64>, balance: f64) -> Value {
    json!({
        "id": id,
        "Account No": account,
        " WITHDRAWAL AMT ": withdrawal,
        "BALANCE AMT": balance,
        "CHIP USED": "N",
    })
}

fn trades_container(ids: &[i64]) -> Value {
    let data: Vec<Value> = ids
        .iter()
        .map(|id| json!({"id": id, "symbol": format!("SYM{id}"), "price": {"amount": *id as f64 / 10.0}}))
        .collect();
    json!({"_id": {"$oid": "65f0c0ffee65f0c0ffee65f0"}, "data": data})
}

// ============================================================================
// Tests
// ============================================================================

mod config_tests {
    use super::*;
    use tidewater::config::SourceConfig;

    #[test]
    fn test_config_yaml_parsing() {
        let yaml = r#"
warehouse:
  url: "postgres://etl:${TIDEWATER_TEST_UNSET_PASSWORD:-pw}@cluster:5439/dev"
  copy_credentials: { iam_role: "arn:aws:iam::1:role/copy" }
staging:
  uri: s3://etl-staging/tidewater
  format: csv
state:
  uri: s3://etl-staging/state
schedule:
  interval_secs: 600
pipelines:
  trades:
    source:
      type: mongodb
      url: mongodb://localhost:27017
      database: finance
      collection: trades
      selection: { latest_by: created_at }
    schema:
      fields:
        - { name: id, type: int64, nullable: false }
    target: { table: trades, key: id, insert_only: true }
"#;
        let config = Config::parse(yaml).unwrap();

        assert!(config.warehouse.url.contains(":pw@"));
        assert_eq!(config.staging.format, StagingFormat::Csv);
        assert_eq!(config.schedule.interval_secs, 600);
        let (key, pipeline) = config.pipelines.get_index(0).unwrap();
        assert_eq!(key.id(), "trades");
        assert!(matches!(pipeline.source, SourceConfig::Mongodb(_)));
        assert!(pipeline.target.insert_only);
        assert_eq!(pipeline.target.qualified_name(), "public.trades");
    }

    #[test]
    fn test_harness_config_is_valid() {
        let yaml = render_config(std::path::Path::new("/tmp"), true, "csv", "gzip");
        let config = Config::parse(&yaml).unwrap();
        assert_eq!(config.select(None).unwrap().len(), 3);
        assert_eq!(config.staging.format, StagingFormat::Csv);
        assert_eq!(config.staging.compression, Compression::Gzip);
        assert!(config.select(Some("missing")).is_err());
    }
}

mod relational_tests {
    use super::*;

    #[tokio::test]
    async fn test_rows_past_watermark_land_unchanged() {
        let h = Harness::new(false).await;
        h.table.insert(bank_row(1, "409000611074", Some(1000.0), 9000.0));
        h.table.insert(bank_row(2, "409000611074", None, 8000.5));

        let summary = h.runner.run_once().await;
        assert!(summary.all_succeeded(), "{summary:?}");

        let target = h.transactions();
        assert_eq!(target.len(), 2);
        assert_eq!(target["1"]["account_no"], json!("409000611074"));
        assert_eq!(target["1"]["withdrawal_amt"].as_f64(), Some(1000.0));
        assert_eq!(target["2"]["balance_amt"].as_f64(), Some(8000.5));
        assert!(!target["2"].contains_key("withdrawal_amt"));
        assert!(!target["1"].contains_key("chip_used"));
        assert_eq!(h.watermark().await, Watermark::At(CursorValue::Integer(2)));

        h.table.insert(bank_row(3, "409000438611", Some(5.0), 7995.5));
        assert!(h.runner.run_once().await.all_succeeded());
        assert_eq!(h.transactions().len(), 3);
        assert_eq!(h.watermark().await, Watermark::At(CursorValue::Integer(3)));
    }

    #[tokio::test]
    async fn test_successful_run_is_reported_in_metrics() {
        let h = Harness::new(false).await;
        h.table.insert(bank_row(1, "a", None, 1.0));
        assert!(h.runner.run_once().await.all_succeeded());

        let output = tidewater_core::MetricsController::get().unwrap().render();
        assert!(output.contains("tidewater_runs_completed_total"));
        assert!(output.contains("tidewater_watermark_advances_total"));
        assert!(output.contains("pipeline=\"transactions\""));
    }

    #[tokio::test]
    async fn test_staged_files_are_cleaned_up() {
        let h = Harness::new(false).await;
        h.table.insert(bank_row(1, "a", None, 1.0));

        assert!(h.runner.run_once().await.all_succeeded());
        assert_eq!(h.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_no_new_rows_loads_nothing() {
        let h = Harness::new(false).await;
        h.table.insert(bank_row(1, "a", None, 1.0));
        assert!(h.runner.run_once().await.all_succeeded());
        let loads = h.warehouse.loads.load(Ordering::SeqCst);

        assert!(h.runner.run_once().await.all_succeeded());
        assert_eq!(h.warehouse.loads.load(Ordering::SeqCst), loads);
        assert_eq!(h.watermark().await, Watermark::At(CursorValue::Integer(1)));
    }

    #[tokio::test]
    async fn test_same_batch_twice_is_idempotent() {
        let h = Harness::new(false).await;
        h.table.insert(bank_row(1, "a", Some(1.0), 10.0));
        h.table.insert(bank_row(2, "b", Some(2.0), 20.0));

        assert!(h.runner.run_once().await.all_succeeded());
        let first = h.transactions();

        h.runner.store().reset("transactions").await.unwrap();
        assert!(h.runner.run_once().await.all_succeeded());

        assert_eq!(h.transactions(), first);
        assert_eq!(h.watermark().await, Watermark::At(CursorValue::Integer(2)));
    }

    #[tokio::test]
    async fn test_reset_watermark_replays_history() {
        let h = Harness::new(false).await;
        for id in 1..=3 {
            h.table.insert(bank_row(id, "a", None, id as f64));
        }
        assert!(h.runner.run_once().await.all_succeeded());

        // Corrupt row 2 downstream, then replay from the beginning.
        h.warehouse
            .tables
            .lock()
            .unwrap()
            .get_mut("public.transactions")
            .unwrap()
            .get_mut("2")
            .unwrap()
            .insert("balance_amt".into(), json!(-1.0));

        h.runner.store().reset("transactions").await.unwrap();
        assert_eq!(h.watermark().await, Watermark::Initial);
        assert!(h.runner.run_once().await.all_succeeded());

        assert_eq!(h.transactions()["2"]["balance_amt"].as_f64(), Some(2.0));
        assert_eq!(h.watermark().await, Watermark::At(CursorValue::Integer(3)));
    }

    #[tokio::test]
    async fn test_source_delete_leaves_target_row_by_default() {
        let h = Harness::new(false).await;
        h.table.insert(bank_row(1, "a", None, 1.0));
        h.table.insert(bank_row(2, "b", None, 2.0));
        assert!(h.runner.run_once().await.all_succeeded());

        h.table.delete(2);
        h.table.insert(bank_row(3, "c", None, 3.0));
        assert!(h.runner.run_once().await.all_succeeded());

        let target = h.transactions();
        assert_eq!(target.len(), 3);
        assert!(target.contains_key("2"));
    }

    #[tokio::test]
    async fn test_reconciliation_deletes_missing_keys() {
        let h = Harness::new(true).await;
        h.table.insert(bank_row(1, "a", None, 1.0));
        h.table.insert(bank_row(2, "b", None, 2.0));
        assert!(h.runner.run_once().await.all_succeeded());

        h.table.delete(2);
        assert!(h.runner.run_once().await.all_succeeded());

        let target = h.transactions();
        assert_eq!(target.keys().collect::<Vec<_>>(), vec!["1"]);
        assert_eq!(h.watermark().await, Watermark::At(CursorValue::Integer(2)));
    }

    #[tokio::test]
    async fn test_load_failure_changes_nothing() {
        let h = Harness::new(false).await;
        h.table.insert(bank_row(1, "a", None, 1.0));
        assert!(h.runner.run_once().await.all_succeeded());
        let before = h.transactions();

        h.table.insert(bank_row(2, "b", None, 2.0));
        h.warehouse.fail_next.store(true, Ordering::SeqCst);
        let summary = h.runner.run_once().await;

        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0.id(), "transactions");
        assert_eq!(summary.failed[0].1, ErrorKind::Load);
        assert_eq!(h.transactions(), before);
        assert_eq!(h.watermark().await, Watermark::At(CursorValue::Integer(1)));
        assert_eq!(h.staged_files(), 0);

        // The next tick retries from the unmoved watermark.
        assert!(h.runner.run_once().await.all_succeeded());
        assert_eq!(h.transactions().len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_source_does_not_stop_other_pipelines() {
        let h = Harness::new(false).await;
        h.table.down.store(true, Ordering::SeqCst);
        h.collection
            .containers
            .lock()
            .unwrap()
            .push(trades_container(&[1]));

        let summary = h.runner.run_once().await;

        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0.id(), "transactions");
        assert_eq!(summary.failed[0].1, ErrorKind::Connectivity);
        assert!(summary.succeeded.iter().any(|key| key.id() == "trades"));
        assert_eq!(h.trades().len(), 1);
        assert_eq!(h.watermark().await, Watermark::Initial);
    }

    #[tokio::test]
    async fn test_schema_mismatch_aborts_before_staging() {
        let h = Harness::new(false).await;
        h.table.insert(bank_row(1, "a", None, 1.0));
        h.table.insert(json!({"id": 2, "Account No": "b"}));

        let summary = h.runner.run_once().await;

        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].1, ErrorKind::SchemaMismatch);
        assert!(h.transactions().is_empty());
        assert_eq!(h.watermark().await, Watermark::Initial);
        assert_eq!(h.staged_files(), 0);
    }
}

mod staging_format_tests {
    use super::*;

    async fn assert_lands_unchanged(format: &str, compression: &str) {
        let h = Harness::with_staging(format, compression).await;
        h.table.insert(bank_row(1, "409000611074", Some(1000.0), 9000.0));
        h.table.insert(bank_row(2, "", None, 8000.5));
        h.table.insert(json!({"id": 3, "Account No": null, "BALANCE AMT": 7000.25}));

        let summary = h.runner.run_once().await;
        assert!(summary.all_succeeded(), "{format}/{compression}: {summary:?}");

        let target = h.transactions();
        assert_eq!(target.len(), 3, "{format}/{compression}");
        assert_eq!(target["1"]["account_no"], json!("409000611074"));
        assert_eq!(target["1"]["withdrawal_amt"].as_f64(), Some(1000.0));
        assert_eq!(
            target["2"]["account_no"],
            json!(""),
            "{format}/{compression}: empty string did not survive"
        );
        assert!(!target["2"].contains_key("withdrawal_amt"));
        assert!(
            !target["3"].contains_key("account_no"),
            "{format}/{compression}: NULL was loaded as a value"
        );
        assert_eq!(target["3"]["balance_amt"].as_f64(), Some(7000.25));
        assert_eq!(h.watermark().await, Watermark::At(CursorValue::Integer(3)));
    }

    async fn assert_idempotent(format: &str, compression: &str) {
        let h = Harness::with_staging(format, compression).await;
        h.table.insert(bank_row(1, "", Some(1.0), 10.0));
        h.table.insert(json!({"id": 2, "Account No": null, "BALANCE AMT": 20.0}));

        assert!(h.runner.run_once().await.all_succeeded());
        let first = h.transactions();
        assert_eq!(first.len(), 2);

        h.runner.store().reset("transactions").await.unwrap();
        assert!(h.runner.run_once().await.all_succeeded());
        assert_eq!(h.transactions(), first, "{format}/{compression}");
    }

    #[tokio::test]
    async fn test_parquet_preserves_nulls_and_empty_strings() {
        assert_lands_unchanged("parquet", "none").await;
    }

    #[tokio::test]
    async fn test_csv_preserves_nulls_and_empty_strings() {
        assert_lands_unchanged("csv", "none").await;
    }

    #[tokio::test]
    async fn test_gzipped_csv_preserves_nulls_and_empty_strings() {
        assert_lands_unchanged("csv", "gzip").await;
    }

    #[tokio::test]
    async fn test_ndjson_preserves_nulls_and_empty_strings() {
        assert_lands_unchanged("json", "none").await;
    }

    #[tokio::test]
    async fn test_gzipped_ndjson_preserves_nulls_and_empty_strings() {
        assert_lands_unchanged("json", "gzip").await;
    }

    #[tokio::test]
    async fn test_csv_reload_is_idempotent() {
        assert_idempotent("csv", "gzip").await;
    }

    #[tokio::test]
    async fn test_ndjson_reload_is_idempotent() {
        assert_idempotent("json", "none").await;
    }
}

mod timestamp_cursor_tests {
    use super::*;

    fn event(id: i64, note: &str, updated_at: &str) -> Value {
        json!({"id": id, "note": note, "updated_at": updated_at})
    }

    fn at(hour: u32, minute: u32) -> Watermark {
        Watermark::At(CursorValue::Timestamp(
            Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap(),
        ))
    }

    async fn assert_advances_and_replays(format: &str) {
        let h = Harness::with_staging(format, "none").await;
        h.events.insert(event(1, "opened", "2024-03-01T10:00:00Z"));
        // `timestamp` columns arrive without an offset.
        h.events.insert(event(2, "", "2024-03-01 12:00:00"));

        assert!(h.runner.run_once().await.all_succeeded());
        assert_eq!(h.watermark_of("events").await, at(12, 0));
        assert_eq!(h.events_table().len(), 2);

        h.events.replace(event(1, "closed", "2024-03-01T13:00:00+00:00"));
        h.events.insert(event(3, "new", "2024-03-01 12:30:00"));
        assert!(h.runner.run_once().await.all_succeeded());

        let target = h.events_table();
        assert_eq!(target.len(), 3, "{format}");
        assert_eq!(target["1"]["note"], json!("closed"));
        assert_eq!(target["2"]["note"], json!(""));
        assert_eq!(target["3"]["note"], json!("new"));
        assert_eq!(h.watermark_of("events").await, at(13, 0));

        // Nothing past the watermark: no load, no movement.
        let loads = h.warehouse.loads.load(Ordering::SeqCst);
        assert!(h.runner.run_once().await.all_succeeded());
        assert_eq!(h.warehouse.loads.load(Ordering::SeqCst), loads);
        assert_eq!(h.watermark_of("events").await, at(13, 0));

        h.runner.store().reset("events").await.unwrap();
        assert!(h.runner.run_once().await.all_succeeded());
        assert_eq!(h.events_table(), target);
        assert_eq!(h.watermark_of("events").await, at(13, 0));
    }

    #[tokio::test]
    async fn test_timestamp_cursor_with_parquet() {
        assert_advances_and_replays("parquet").await;
    }

    #[tokio::test]
    async fn test_timestamp_cursor_with_csv() {
        assert_advances_and_replays("csv").await;
    }

    #[tokio::test]
    async fn test_timestamp_cursor_with_ndjson() {
        assert_advances_and_replays("json").await;
    }
}

mod document_tests {
    use super::*;

    #[tokio::test]
    async fn test_single_container_is_flattened() {
        let h = Harness::new(false).await;
        h.collection
            .containers
            .lock()
            .unwrap()
            .push(trades_container(&[10, 11]));

        assert!(h.runner.run_once().await.all_succeeded());

        let trades = h.trades();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades["10"]["symbol"], json!("SYM10"));
        assert_eq!(trades["11"]["price_amount"].as_f64(), Some(1.1));
        assert_eq!(
            h.runner.store().load("trades").await.unwrap(),
            Watermark::Initial
        );
    }

    #[tokio::test]
    async fn test_multiple_containers_load_one_without_corruption() {
        let h = Harness::new(false).await;
        {
            let mut containers = h.collection.containers.lock().unwrap();
            containers.push(trades_container(&[1, 2]));
            containers.push(trades_container(&[3]));
        }

        let summary = h.runner.run_once().await;
        assert!(summary.all_succeeded(), "{summary:?}");

        let trades = h.trades();
        assert!(!trades.is_empty());
        for (key, row) in &trades {
            assert_eq!(row["id"].to_string(), *key);
            assert_eq!(row["symbol"], json!(format!("SYM{key}")));
        }
    }

    #[tokio::test]
    async fn test_empty_collection_succeeds() {
        let h = Harness::new(false).await;
        assert!(h.runner.run_once().await.all_succeeded());
        assert!(h.trades().is_empty());
    }
}

mod run_id_tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_run_id_can_be_reused() {
        let h = Harness::new(false).await;
        let run_id = RunId::new("retry-7").unwrap();
        h.table.insert(bank_row(1, "a", None, 1.0));

        // Drive the pipeline directly with the same staging area.
        let (key, pipeline_config) = h.config.pipelines.get_index(0).unwrap();
        let stager = Stager::new(&h.config.staging).await.unwrap();
        let pipeline = Pipeline::new(
            key.clone(),
            pipeline_config.clone(),
            Box::new(h.table.clone()),
            stager,
            h.warehouse.clone(),
        );

        let first = pipeline.run(&run_id, &Watermark::Initial).await.unwrap();
        let second = pipeline.run(&run_id, &Watermark::Initial).await.unwrap();

        assert_eq!(first.outcome.inserted, 1);
        assert_eq!(second.outcome.updated, 1);
        assert_eq!(second.next_watermark, Watermark::At(CursorValue::Integer(1)));
    }
}
