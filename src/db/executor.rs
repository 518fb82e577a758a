use crate::db::db_pool::DuckDbPool;
use chrono::{DateTime, NaiveDate, TimeDelta};
use duckdb::types::{TimeUnit, Value};
use serde::Serialize;
use serde_json::{Map, Number, Value as JsonValue};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info};

/// A result row: column name to value, in the column order of the result set.
pub type Row = Map<String, JsonValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExecutionResult {
    Rows(Vec<Row>),
    /// The statement produced no result set.
    Completed { status: String },
}

impl ExecutionResult {
    pub fn row_count(&self) -> usize {
        match self {
            ExecutionResult::Rows(rows) => rows.len(),
            ExecutionResult::Completed { .. } => 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("database connection unavailable: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("database error: {0}")]
    Driver(#[from] duckdb::Error),
    #[error("database task failed: {0}")]
    Task(String),
}

/// Runs validated statements against the pooled database.
#[derive(Clone)]
pub struct QueryExecutor {
    pool: DuckDbPool,
}

impl QueryExecutor {
    pub fn new(pool: DuckDbPool) -> Self {
        Self { pool }
    }

    pub async fn execute(&self, sql: &str) -> Result<ExecutionResult, ExecutionError> {
        let pool = self.pool.clone();
        let sql = sql.to_string();

        let result = tokio::task::spawn_blocking(move || -> Result<ExecutionResult, ExecutionError> {
            let start_time = Instant::now();
            // The lease goes back to the pool when `conn` drops, on every path
            let conn = pool.get()?;
            let result = run_statement(&conn, &sql);
            if let Ok(result) = &result {
                info!(
                    "Query executed successfully. Row count: {}, Execution time: {}ms",
                    result.row_count(),
                    start_time.elapsed().as_millis()
                );
            }
            result
        })
        .await
        .map_err(|e| ExecutionError::Task(e.to_string()))?;

        if let Err(e) = &result {
            error!("Database query error: {}", e);
        }
        result
    }
}

/// Leading keywords of statements that produce a result set.
const READ_KEYWORDS: &[&str] = &[
    "SELECT", "SHOW", "WITH", "DESCRIBE", "SUMMARIZE", "EXPLAIN", "VALUES", "FROM", "TABLE", "PRAGMA",
];

// DuckDB reports a `Count` or `Success` column even for DDL and DML, so the
// statement kind decides whether there is a result set, not the column list.
fn returns_rows(sql: &str) -> bool {
    let keyword = sql
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default();
    READ_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(keyword))
}

fn run_statement(conn: &duckdb::Connection, sql: &str) -> Result<ExecutionResult, ExecutionError> {
    if !returns_rows(sql) {
        conn.execute_batch(sql)?;
        debug!("Statement returned no result set");
        return Ok(ExecutionResult::Completed {
            status: "ok".to_string(),
        });
    }

    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;

    let columns = rows
        .as_ref()
        .map(|stmt| stmt.column_names())
        .unwrap_or_default();

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Map::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            let value: Value = row.get(i)?;
            record.insert(name.clone(), to_json(value));
        }
        out.push(record);
    }

    Ok(ExecutionResult::Rows(out))
}

/// Maps a driver value onto JSON. Numbers and booleans stay native;
/// temporal, decimal and other non-primitive values become text.
fn to_json(value: Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(b),
        Value::TinyInt(n) => JsonValue::from(n),
        Value::SmallInt(n) => JsonValue::from(n),
        Value::Int(n) => JsonValue::from(n),
        Value::BigInt(n) => JsonValue::from(n),
        Value::UTinyInt(n) => JsonValue::from(n),
        Value::USmallInt(n) => JsonValue::from(n),
        Value::UInt(n) => JsonValue::from(n),
        Value::UBigInt(n) => JsonValue::from(n),
        Value::HugeInt(n) => JsonValue::String(n.to_string()),
        Value::Float(f) => float_to_json(f as f64),
        Value::Double(f) => float_to_json(f),
        Value::Decimal(d) => JsonValue::String(d.to_string()),
        Value::Text(s) => JsonValue::String(s),
        Value::Enum(s) => JsonValue::String(s),
        Value::Blob(bytes) => JsonValue::String(String::from_utf8_lossy(&bytes).into_owned()),
        Value::Date32(days) => JsonValue::String(format_date(days)),
        Value::Timestamp(unit, v) => JsonValue::String(format_timestamp(to_micros(unit, v))),
        Value::Time64(unit, v) => JsonValue::String(format_time(to_micros(unit, v))),
        Value::List(items) | Value::Array(items) => {
            JsonValue::Array(items.into_iter().map(to_json).collect())
        }
        other => JsonValue::String(format!("{:?}", other)),
    }
}

fn float_to_json(f: f64) -> JsonValue {
    Number::from_f64(f).map(JsonValue::Number).unwrap_or(JsonValue::Null)
}

fn to_micros(unit: TimeUnit, v: i64) -> i64 {
    match unit {
        TimeUnit::Second => v.saturating_mul(1_000_000),
        TimeUnit::Millisecond => v.saturating_mul(1_000),
        TimeUnit::Microsecond => v,
        TimeUnit::Nanosecond => v / 1_000,
    }
}

fn format_date(days: i32) -> String {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|epoch| epoch.checked_add_signed(TimeDelta::days(days as i64)))
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| days.to_string())
}

fn format_timestamp(micros: i64) -> String {
    DateTime::from_timestamp_micros(micros)
        .map(|ts| ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string())
        .unwrap_or_else(|| micros.to_string())
}

fn format_time(micros: i64) -> String {
    let secs = micros.div_euclid(1_000_000);
    let frac = micros.rem_euclid(1_000_000);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if frac == 0 {
        format!("{:02}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}:{:02}.{:06}", h, m, s, frac)
    }
}
