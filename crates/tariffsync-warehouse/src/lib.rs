//! # Tariffsync Warehouse
//!
//! DuckDB-backed storage for box-tariff snapshots.
//!
//! ## Overview
//!
//! - **Upsert store**: one row per `(date, warehouse_name)`; a repeated key replaces
//!   every other column of the existing row.
//! - **Snapshot reads**: all rows of a date ordered by `box_delivery_coef_expr`.
//! - **Audit log**: each sync run appends to `ingest_log`.
//! - **Read-only SQL**: ad-hoc `SELECT` queries with row and time guardrails.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tariffsync_warehouse::{RateRecord, Warehouse, WarehouseConfig};
//!
//! let warehouse = Warehouse::open(WarehouseConfig::new("/tmp/tariffsync/warehouse.duckdb"))?;
//! let record = RateRecord {
//!     date: "2026-10-18".to_string(),
//!     warehouse_name: "Коледино".to_string(),
//!     geo_name: "Центральный федеральный округ".to_string(),
//!     dt_next_box: String::new(),
//!     dt_till_max: "2026-10-31".to_string(),
//!     box_delivery_base: 46.0,
//!     box_delivery_coef_expr: 1.05,
//!     box_delivery_liter: 14.0,
//!     box_delivery_marketplace_base: 46.0,
//!     box_delivery_marketplace_coef_expr: 1.05,
//!     box_delivery_marketplace_liter: 14.0,
//!     box_storage_base: 0.1,
//!     box_storage_coef_expr: 1.15,
//!     box_storage_liter: 0.1,
//! };
//! warehouse.upsert_rates(&[record])?;
//! let today = warehouse.rates_for_date("2026-10-18")?;
//! assert_eq!(today.len(), 1);
//! # Ok::<(), tariffsync_warehouse::WarehouseError>(())
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `warehouse_rates` | Tariff snapshot rows, unique on `(date, warehouse_name)` |
//! | `ingest_log` | One row per sync run |
//! | `schema_migrations` | Applied migration versions |

pub mod duckdb;
pub mod migrations;

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use ::duckdb::types::Value as DuckValue;
use ::duckdb::{Connection, ToSql};
use serde::Serialize;
use serde_json::{Number, Value};
use thiserror::Error;

pub use duckdb::{DuckDbConnectionManager, PooledConnection};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error while preparing the database directory.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A batch upsert stopped partway; rows before `written` are already committed.
    #[error("upsert stopped after {written} of {total} rows at '{warehouse_name}': {source}")]
    BatchInterrupted {
        written: usize,
        total: usize,
        warehouse_name: String,
        #[source]
        source: ::duckdb::Error,
    },

    /// Query was rejected due to policy violation.
    #[error("query rejected: {0}")]
    QueryRejected(String),

    /// Query execution timed out.
    #[error("query timed out after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept by the pool.
    pub max_pool_size: usize,
}

impl WarehouseConfig {
    /// Config for the database at `db_path` with the default pool size.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            max_pool_size: 4,
        }
    }
}

/// Guardrails for ad-hoc query execution.
#[derive(Debug, Clone, Copy)]
pub struct QueryGuardrails {
    /// Maximum number of rows to return.
    pub max_rows: usize,
    /// Query timeout in milliseconds.
    pub query_timeout_ms: u64,
}

impl Default for QueryGuardrails {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            query_timeout_ms: 5_000,
        }
    }
}

impl QueryGuardrails {
    fn timeout(self) -> Duration {
        Duration::from_millis(self.query_timeout_ms.max(1))
    }

    fn validate(self) -> Result<(), WarehouseError> {
        if self.max_rows == 0 {
            return Err(WarehouseError::QueryRejected(String::from(
                "--max-rows must be greater than zero",
            )));
        }
        if self.query_timeout_ms == 0 {
            return Err(WarehouseError::QueryRejected(String::from(
                "--query-timeout-ms must be greater than zero",
            )));
        }
        Ok(())
    }
}

/// Column metadata for query results.
#[derive(Debug, Clone, Serialize)]
pub struct SqlColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub r#type: String,
}

/// Result of a read-only SQL query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub columns: Vec<SqlColumn>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    /// Whether results were cut at `max_rows`.
    pub truncated: bool,
}

/// Flat row of the `warehouse_rates` table.
///
/// Rate columns may hold `NaN`; it is stored and read back as-is.
#[derive(Debug, Clone)]
pub struct RateRecord {
    /// Snapshot date, `YYYY-MM-DD`.
    pub date: String,
    pub warehouse_name: String,
    pub geo_name: String,
    pub dt_next_box: String,
    pub dt_till_max: String,
    pub box_delivery_base: f64,
    pub box_delivery_coef_expr: f64,
    pub box_delivery_liter: f64,
    pub box_delivery_marketplace_base: f64,
    pub box_delivery_marketplace_coef_expr: f64,
    pub box_delivery_marketplace_liter: f64,
    pub box_storage_base: f64,
    pub box_storage_coef_expr: f64,
    pub box_storage_liter: f64,
}

/// Outcome of one sync run, appended to `ingest_log`.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: String,
    /// `database` or `sheet`.
    pub flow: String,
    /// `YYYY-MM-DD`, when the run targeted a specific date.
    pub target_date: Option<String>,
    /// `ok` or `failed`.
    pub status: String,
    pub row_count: u64,
    pub latency_ms: u64,
    pub detail: Option<String>,
}

const RATE_COLUMNS: &str = "CAST(date AS VARCHAR), warehouse_name, geo_name, dt_next_box, dt_till_max, \
     box_delivery_base, box_delivery_coef_expr, box_delivery_liter, \
     box_delivery_marketplace_base, box_delivery_marketplace_coef_expr, box_delivery_marketplace_liter, \
     box_storage_base, box_storage_coef_expr, box_storage_liter";

/// The tariff snapshot store.
#[derive(Clone)]
pub struct Warehouse {
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open (creating if needed) the database file and apply pending migrations.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = DuckDbConnectionManager::open(config.db_path, config.max_pool_size)?;
        let warehouse = Self { manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Apply schema migrations.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    /// Insert or fully replace each record keyed by `(date, warehouse_name)`.
    ///
    /// Rows are written one statement at a time in autocommit mode: each row is atomic,
    /// the batch is not. On failure the rows before the failing one stay committed and
    /// the error reports how many were written. Returns the number of rows written.
    pub fn upsert_rates(&self, rows: &[RateRecord]) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            "INSERT OR REPLACE INTO warehouse_rates \
             (date, warehouse_name, geo_name, dt_next_box, dt_till_max, \
              box_delivery_base, box_delivery_coef_expr, box_delivery_liter, \
              box_delivery_marketplace_base, box_delivery_marketplace_coef_expr, box_delivery_marketplace_liter, \
              box_storage_base, box_storage_coef_expr, box_storage_liter, updated_at) \
             VALUES (CAST(? AS DATE), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
        )?;

        for (written, row) in rows.iter().enumerate() {
            let params: [&dyn ToSql; 14] = [
                &row.date,
                &row.warehouse_name,
                &row.geo_name,
                &row.dt_next_box,
                &row.dt_till_max,
                &row.box_delivery_base,
                &row.box_delivery_coef_expr,
                &row.box_delivery_liter,
                &row.box_delivery_marketplace_base,
                &row.box_delivery_marketplace_coef_expr,
                &row.box_delivery_marketplace_liter,
                &row.box_storage_base,
                &row.box_storage_coef_expr,
                &row.box_storage_liter,
            ];
            if let Err(source) = statement.execute(params.as_slice()) {
                return Err(WarehouseError::BatchInterrupted {
                    written,
                    total: rows.len(),
                    warehouse_name: row.warehouse_name.clone(),
                    source,
                });
            }
        }

        tracing::debug!(rows = rows.len(), "upserted warehouse rates");
        Ok(rows.len())
    }

    /// All rows for `date` (`YYYY-MM-DD`), ordered by `box_delivery_coef_expr` ascending.
    ///
    /// `NaN` coefficients sort after every number; ties break on warehouse name.
    pub fn rates_for_date(&self, date: &str) -> Result<Vec<RateRecord>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let sql = format!(
            "SELECT {RATE_COLUMNS} FROM warehouse_rates \
             WHERE date = CAST(? AS DATE) \
             ORDER BY box_delivery_coef_expr ASC, warehouse_name ASC"
        );
        let mut statement = connection.prepare(sql.as_str())?;
        let rows = statement.query_map([date], read_rate_record)?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(WarehouseError::from)
    }

    /// Number of rows stored for `date`.
    pub fn count_for_date(&self, date: &str) -> Result<u64, WarehouseError> {
        let connection = self.manager.acquire()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM warehouse_rates WHERE date = CAST(? AS DATE)",
            [date],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Append one sync run to `ingest_log`.
    pub fn record_run(&self, run: &RunRecord) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        let row_count = i64::try_from(run.row_count).unwrap_or(i64::MAX);
        let latency_ms = i64::try_from(run.latency_ms).unwrap_or(i64::MAX);
        let params: [&dyn ToSql; 7] = [
            &run.run_id,
            &run.flow,
            &run.target_date,
            &run.status,
            &row_count,
            &latency_ms,
            &run.detail,
        ];
        connection.execute(
            "INSERT INTO ingest_log \
             (run_id, flow, target_date, status, row_count, latency_ms, detail, timestamp) \
             VALUES (?, ?, CAST(? AS DATE), ?, ?, ?, ?, CURRENT_TIMESTAMP)",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Execute a read-only SQL query with guardrails.
    ///
    /// Only a single `SELECT`/`WITH`/`EXPLAIN`/`SHOW`/`DESCRIBE` statement is accepted.
    pub fn execute_query(
        &self,
        sql: &str,
        guardrails: QueryGuardrails,
    ) -> Result<QueryResult, WarehouseError> {
        guardrails.validate()?;
        let sql = normalize_sql(sql)?;
        enforce_read_only_query(sql)?;

        let connection = self.manager.acquire()?;
        execute_select_query(&connection, sql, guardrails, Instant::now())
    }
}

fn read_rate_record(row: &::duckdb::Row<'_>) -> Result<RateRecord, ::duckdb::Error> {
    let text = |index: usize| -> Result<String, ::duckdb::Error> {
        Ok(row.get::<_, Option<String>>(index)?.unwrap_or_default())
    };
    let rate = |index: usize| -> Result<f64, ::duckdb::Error> {
        Ok(row.get::<_, Option<f64>>(index)?.unwrap_or(f64::NAN))
    };

    Ok(RateRecord {
        date: text(0)?,
        warehouse_name: text(1)?,
        geo_name: text(2)?,
        dt_next_box: text(3)?,
        dt_till_max: text(4)?,
        box_delivery_base: rate(5)?,
        box_delivery_coef_expr: rate(6)?,
        box_delivery_liter: rate(7)?,
        box_delivery_marketplace_base: rate(8)?,
        box_delivery_marketplace_coef_expr: rate(9)?,
        box_delivery_marketplace_liter: rate(10)?,
        box_storage_base: rate(11)?,
        box_storage_coef_expr: rate(12)?,
        box_storage_liter: rate(13)?,
    })
}

fn execute_select_query(
    connection: &Connection,
    sql: &str,
    guardrails: QueryGuardrails,
    started: Instant,
) -> Result<QueryResult, WarehouseError> {
    let mut statement = connection.prepare(sql)?;
    let mut rows_cursor = statement.query([])?;
    // Column metadata is only populated once the statement has executed.
    let columns = rows_cursor.as_ref().map(describe_columns).unwrap_or_default();
    let column_count = columns.len();

    let mut rows = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows_cursor.next()? {
        ensure_timeout(started, guardrails.timeout())?;

        if rows.len() >= guardrails.max_rows {
            truncated = true;
            break;
        }

        rows.push(read_row(row, column_count)?);
    }

    ensure_timeout(started, guardrails.timeout())?;

    Ok(QueryResult {
        columns,
        row_count: rows.len(),
        rows,
        truncated,
    })
}

fn describe_columns(statement: &::duckdb::Statement<'_>) -> Vec<SqlColumn> {
    (0..statement.column_count())
        .map(|index| SqlColumn {
            name: statement
                .column_name(index)
                .map(|name| name.to_string())
                .unwrap_or_else(|_| format!("column_{index}")),
            r#type: statement.column_type(index).to_string(),
        })
        .collect()
}

fn read_row(row: &::duckdb::Row<'_>, column_count: usize) -> Result<Vec<Value>, ::duckdb::Error> {
    let mut output = Vec::with_capacity(column_count);
    for index in 0..column_count {
        let value: DuckValue = row.get(index)?;
        output.push(to_json_value(value));
    }
    Ok(output)
}

fn to_json_value(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(value) => Value::Bool(value),
        DuckValue::TinyInt(value) => Value::Number(Number::from(value)),
        DuckValue::SmallInt(value) => Value::Number(Number::from(value)),
        DuckValue::Int(value) => Value::Number(Number::from(value)),
        DuckValue::BigInt(value) => Value::Number(Number::from(value)),
        DuckValue::UTinyInt(value) => Value::Number(Number::from(value)),
        DuckValue::USmallInt(value) => Value::Number(Number::from(value)),
        DuckValue::UInt(value) => Value::Number(Number::from(value)),
        DuckValue::UBigInt(value) => Value::Number(Number::from(value)),
        DuckValue::Float(value) => number_from_f64(f64::from(value)),
        DuckValue::Double(value) => number_from_f64(value),
        DuckValue::Text(value) => Value::String(value),
        DuckValue::Blob(value) => Value::String(hex::encode(value)),
        other => Value::String(format!("{other:?}")),
    }
}

/// JSON has no NaN; non-finite values become `null`.
fn number_from_f64(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn normalize_sql(sql: &str) -> Result<&str, WarehouseError> {
    let normalized = sql.trim();
    if normalized.is_empty() {
        return Err(WarehouseError::QueryRejected(String::from(
            "query must not be empty",
        )));
    }
    Ok(normalized.trim_end_matches(';').trim())
}

fn enforce_read_only_query(sql: &str) -> Result<(), WarehouseError> {
    if !is_select_like(sql) {
        return Err(WarehouseError::QueryRejected(String::from(
            "only SELECT/CTE queries are accepted",
        )));
    }
    if sql.split(';').filter(|part| !part.trim().is_empty()).count() > 1 {
        return Err(WarehouseError::QueryRejected(String::from(
            "multiple SQL statements are not allowed",
        )));
    }
    Ok(())
}

fn is_select_like(sql: &str) -> bool {
    let first_keyword = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    matches!(
        first_keyword.as_str(),
        "SELECT" | "WITH" | "EXPLAIN" | "SHOW" | "DESCRIBE"
    )
}

fn ensure_timeout(started: Instant, timeout: Duration) -> Result<(), WarehouseError> {
    if started.elapsed() > timeout {
        return Err(WarehouseError::QueryTimeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        });
    }
    Ok(())
}
