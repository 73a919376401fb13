//! TDengine store over the REST endpoint
//!
//! Every statement is sent as a plain-text body to `POST {url}/rest/sql` with
//! basic auth. The database uses microsecond precision, so timestamps are
//! rendered as integer microseconds in SQL and parsed back from whatever
//! format the server returns (RFC 3339, naive `YYYY-MM-DD HH:MM:SS.ffffff`,
//! or an integer epoch).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::ops::Bound;
use std::time::Duration;
use tracing::{debug, info};

use super::partition::{PartitionTags, DEFAULT_TABLE};
use super::row::{StoredRow, TableRow, IDENT_WIDTH, NUMBER_DEFAULT, STRING_WIDTH};
use super::{AggregateQuery, SeriesQuery, TimeBounds, TsStore, WindowValue};
use crate::error::StoreError;

/// Connection and schema settings for TDengine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TdengineConfig {
    /// Base URL of the REST service, e.g. `http://localhost:6041`
    pub url: String,
    /// User name
    pub username: String,
    /// Password
    pub password: String,
    /// Database name
    pub database: String,
    /// Logical (super) table name
    pub table: String,
    /// Data retention in days
    pub keep_days: u32,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for TdengineConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6041".to_string(),
            username: "root".to_string(),
            password: "taosdata".to_string(),
            database: "things".to_string(),
            table: DEFAULT_TABLE.to_string(),
            keep_days: 730,
            timeout_secs: 10,
        }
    }
}

/// Raw REST response
#[derive(Debug, Deserialize)]
struct SqlResponse {
    code: i64,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    data: Vec<Vec<serde_json::Value>>,
}

/// TDengine-backed [`TsStore`]
#[derive(Debug, Clone)]
pub struct TdengineStore {
    client: Client,
    endpoint: String,
    config: TdengineConfig,
}

impl TdengineStore {
    /// Create a store client
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidIdentifier` if the database or table name
    /// is not a bare identifier, or `StoreError::Transport` if the HTTP
    /// client cannot be built.
    pub fn new(config: TdengineConfig) -> Result<Self, StoreError> {
        validate_identifier(&config.database)?;
        validate_identifier(&config.table)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/rest/sql", config.url.trim_end_matches('/')),
            config,
        })
    }

    /// Configuration this store was built from
    pub fn config(&self) -> &TdengineConfig {
        &self.config
    }

    async fn execute(&self, sql: String) -> Result<Vec<Vec<serde_json::Value>>, StoreError> {
        debug!(sql = %sql, "Executing statement");
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .body(sql)
            .send()
            .await?;

        let status = response.status();
        let body: SqlResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("HTTP {}: {}", status, e)))?;

        if body.code != 0 {
            return Err(StoreError::Rejected {
                code: body.code,
                desc: body.desc.unwrap_or_default(),
            });
        }
        Ok(body.data)
    }

    fn qualified_table(&self) -> String {
        format!("{}.{}", self.config.database, self.config.table)
    }
}

#[async_trait]
impl TsStore for TdengineStore {
    fn store_id(&self) -> &str {
        "tdengine"
    }

    async fn initialize(&self) -> Result<(), StoreError> {
        self.execute(format!(
            "CREATE DATABASE IF NOT EXISTS {} PRECISION 'us' KEEP {}",
            self.config.database, self.config.keep_days
        ))
        .await?;
        self.execute(format!(
            "CREATE STABLE IF NOT EXISTS {table} (ts TIMESTAMP, device_id NCHAR({id}), \
             k NCHAR({id}), bool_v TINYINT, number_v DOUBLE, string_v NCHAR({text}), \
             tenant_id NCHAR({id})) TAGS (model_id BINARY(64), model_name BINARY(64))",
            table = self.qualified_table(),
            id = IDENT_WIDTH,
            text = STRING_WIDTH,
        ))
        .await?;
        info!(
            database = %self.config.database,
            table = %self.config.table,
            "Schema initialized"
        );
        Ok(())
    }

    async fn create_partition(
        &self,
        partition: &str,
        tags: &PartitionTags,
    ) -> Result<(), StoreError> {
        validate_identifier(partition)?;
        self.execute(format!(
            "CREATE TABLE IF NOT EXISTS {}.{} USING {} TAGS ({}, {})",
            self.config.database,
            partition,
            self.qualified_table(),
            quote(&tags.model_id),
            quote(&tags.model_name)
        ))
        .await?;
        Ok(())
    }

    async fn insert_rows(&self, rows: &[TableRow]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let sql = insert_statement(&self.config.database, rows)?;
        self.execute(sql).await?;
        Ok(rows.len())
    }

    async fn query_series(&self, query: &SeriesQuery) -> Result<Vec<StoredRow>, StoreError> {
        let mut sql = format!(
            "SELECT ts, device_id, k, bool_v, number_v, string_v, tenant_id FROM {} WHERE {} ORDER BY ts {}",
            self.qualified_table(),
            series_filter(&query.device_id, &query.key, &query.bounds),
            query.order.as_sql()
        );
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        self.execute(sql)
            .await?
            .iter()
            .map(|row| decode_row(row))
            .collect()
    }

    async fn count_series(
        &self,
        device_id: &str,
        key: &str,
        bounds: &TimeBounds,
    ) -> Result<u64, StoreError> {
        let data = self
            .execute(format!(
                "SELECT COUNT(*) FROM {} WHERE {}",
                self.qualified_table(),
                series_filter(device_id, key, bounds)
            ))
            .await?;
        // an empty super table answers with no rows at all
        Ok(data
            .first()
            .and_then(|row| row.first())
            .and_then(|v| v.as_u64())
            .unwrap_or(0))
    }

    async fn aggregate_windows(
        &self,
        query: &AggregateQuery,
    ) -> Result<Vec<WindowValue>, StoreError> {
        let sql = aggregate_statement(&self.qualified_table(), query)?;
        self.execute(sql)
            .await?
            .iter()
            .map(|row| {
                let window_start = row
                    .first()
                    .ok_or_else(|| StoreError::Decode("missing _wstart".to_string()))
                    .and_then(parse_timestamp)?;
                let value = row.get(1).and_then(|v| v.as_f64());
                Ok(WindowValue {
                    window_start,
                    value,
                })
            })
            .collect()
    }
}

// ============================================================================
// SQL rendering
// ============================================================================

/// Reject identifiers outside `[A-Za-z0-9_]`
pub fn validate_identifier(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StoreError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Render a string literal
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn series_filter(device_id: &str, key: &str, bounds: &TimeBounds) -> String {
    let mut filter = format!("device_id = {} AND k = {}", quote(device_id), quote(key));
    match bounds.lower {
        Bound::Included(ts) => filter.push_str(&format!(" AND ts >= {}", micros(&ts))),
        Bound::Excluded(ts) => filter.push_str(&format!(" AND ts > {}", micros(&ts))),
        Bound::Unbounded => {},
    }
    match bounds.upper {
        Bound::Included(ts) => filter.push_str(&format!(" AND ts <= {}", micros(&ts))),
        Bound::Excluded(ts) => filter.push_str(&format!(" AND ts < {}", micros(&ts))),
        Bound::Unbounded => {},
    }
    filter
}

/// One multi-table `INSERT` for a whole batch
///
/// Rows are grouped by partition in first-seen order so each sub-table
/// appears once in the statement.
fn insert_statement(database: &str, rows: &[TableRow]) -> Result<String, StoreError> {
    let mut groups: Vec<(&str, Vec<&StoredRow>)> = Vec::new();
    for table_row in rows {
        validate_identifier(&table_row.partition)?;
        match groups.iter_mut().find(|(p, _)| *p == table_row.partition) {
            Some((_, group)) => group.push(&table_row.row),
            None => groups.push((&table_row.partition, vec![&table_row.row])),
        }
    }

    let mut sql = String::from("INSERT INTO");
    for (partition, group) in groups {
        sql.push_str(&format!(" {}.{} VALUES", database, partition));
        for row in group {
            sql.push_str(&format!(
                " ({}, {}, {}, {}, {:?}, {}, {})",
                micros(&row.ts),
                quote(&row.device_id),
                quote(&row.k),
                row.bool_v,
                row.number_v,
                quote(&row.string_v),
                quote(&row.tenant_id)
            ));
        }
    }
    Ok(sql)
}

fn aggregate_statement(table: &str, query: &AggregateQuery) -> Result<String, StoreError> {
    validate_identifier(&query.function)
        .map_err(|_| StoreError::UnsupportedAggregate(query.function.clone()))?;
    if query.window_ms <= 0 {
        return Err(StoreError::Backend(format!(
            "window must be positive, got {}",
            query.window_ms
        )));
    }

    let bounds = TimeBounds::inclusive(query.start, query.end);
    let offset = query.start.timestamp_millis().rem_euclid(query.window_ms);
    let interval = if offset == 0 {
        format!("INTERVAL({}a)", query.window_ms)
    } else {
        format!("INTERVAL({}a, {}a)", query.window_ms, offset)
    };

    Ok(format!(
        "SELECT _wstart, {}(number_v) FROM {} WHERE {} AND number_v <> {:?} {}",
        query.function,
        table,
        series_filter(&query.device_id, &query.key, &bounds),
        NUMBER_DEFAULT,
        interval
    ))
}

// ============================================================================
// Response decoding
// ============================================================================

fn parse_timestamp(raw: &serde_json::Value) -> Result<DateTime<Utc>, StoreError> {
    if let Some(us) = raw.as_i64() {
        let nanos = (us.rem_euclid(1_000_000) * 1_000) as u32;
        return Utc
            .timestamp_opt(us.div_euclid(1_000_000), nanos)
            .single()
            .ok_or_else(|| StoreError::Decode(format!("timestamp out of range: {}", us)));
    }
    let text = raw
        .as_str()
        .ok_or_else(|| StoreError::Decode(format!("unexpected timestamp: {}", raw)))?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| StoreError::Decode(format!("bad timestamp {:?}: {}", text, e)))
}

fn decode_row(row: &[serde_json::Value]) -> Result<StoredRow, StoreError> {
    if row.len() < 7 {
        return Err(StoreError::Decode(format!(
            "expected 7 columns, got {}",
            row.len()
        )));
    }
    let text = |v: &serde_json::Value| v.as_str().unwrap_or_default().to_string();

    Ok(StoredRow {
        ts: parse_timestamp(&row[0])?,
        device_id: text(&row[1]),
        k: text(&row[2]),
        bool_v: row[3]
            .as_i64()
            .or_else(|| row[3].as_bool().map(i64::from))
            .and_then(|v| i8::try_from(v).ok())
            .ok_or_else(|| StoreError::Decode(format!("bad bool_v: {}", row[3])))?,
        number_v: row[4]
            .as_f64()
            .ok_or_else(|| StoreError::Decode(format!("bad number_v: {}", row[4])))?,
        string_v: text(&row[5]),
        tenant_id: text(&row[6]),
    })
}
