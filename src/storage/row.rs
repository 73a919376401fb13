//! Wide-row value model
//!
//! Every observation is stored in one physical schema with three typed
//! columns (`bool_v`, `number_v`, `string_v`). Exactly one column carries the
//! real value; the other two hold fixed sentinels so no column is ever null.
//!
//! ```text
//! | ts | device_id | k | bool_v | number_v  | string_v  | tenant_id |
//! |----|-----------|---|--------|-----------|-----------|-----------|
//! | t0 | sensor-1  | t |   -1   |   21.5    | "unknown" |           |
//! | t1 | sensor-1  | s |   -1   | -65535.0  |   "on"    |           |
//! | t2 | sensor-1  | b |    1   | -65535.0  | "unknown" |           |
//! ```

use chrono::{DateTime, Utc};

use crate::error::ValueError;
use crate::types::{Sample, Value};

/// Sentinel for "no boolean in this row"
pub const BOOL_DEFAULT: i8 = -1;

/// Sentinel for "no number in this row"
pub const NUMBER_DEFAULT: f64 = -65535.0;

/// Sentinel for "no string in this row"
pub const STRING_DEFAULT: &str = "unknown";

/// Width in characters of `device_id`, `k` and `tenant_id`
pub const IDENT_WIDTH: usize = 64;

/// Width in characters of `string_v`
pub const STRING_WIDTH: usize = 256;

/// Typed value column of the wide row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    /// `bool_v` (TINYINT, 0/1)
    Bool,
    /// `number_v` (DOUBLE)
    Number,
    /// `string_v` (NCHAR(256))
    String,
}

impl Column {
    /// Physical column name
    pub fn name(&self) -> &'static str {
        match self {
            Column::Bool => "bool_v",
            Column::Number => "number_v",
            Column::String => "string_v",
        }
    }
}

/// Physical representation of one sample
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    /// Observation instant
    pub ts: DateTime<Utc>,
    /// Device identifier
    pub device_id: String,
    /// Attribute key
    pub k: String,
    /// Boolean column (0/1, or `BOOL_DEFAULT`)
    pub bool_v: i8,
    /// Numeric column (or `NUMBER_DEFAULT`)
    pub number_v: f64,
    /// String column (or `STRING_DEFAULT`)
    pub string_v: String,
    /// Tenant identifier, empty when unknown
    pub tenant_id: String,
}

impl StoredRow {
    /// Encode a sample, sentinel-filling the columns it does not use
    pub fn encode(sample: &Sample) -> Self {
        let mut row = Self {
            ts: sample.timestamp,
            device_id: sample.device_id.clone(),
            k: sample.key.clone(),
            bool_v: BOOL_DEFAULT,
            number_v: NUMBER_DEFAULT,
            string_v: STRING_DEFAULT.to_string(),
            tenant_id: sample.tenant_id.clone().unwrap_or_default(),
        };
        match &sample.value {
            Value::String(s) => row.string_v = s.clone(),
            Value::Number(n) => row.number_v = *n,
            Value::Bool(b) => row.bool_v = i8::from(*b),
        }
        row
    }

    /// Build a row directly from a value, used by stores and tests
    pub fn from_value(
        ts: DateTime<Utc>,
        device_id: impl Into<String>,
        k: impl Into<String>,
        value: &Value,
    ) -> Self {
        let sample = Sample::new(device_id, k, ts, value.clone());
        Self::encode(&sample)
    }

    /// Whether the given column holds its sentinel
    pub fn is_default(&self, column: Column) -> bool {
        is_default(column, self)
    }

    /// Columns whose content differs from the sentinel
    pub fn populated_columns(&self) -> Vec<Column> {
        [Column::String, Column::Number, Column::Bool]
            .into_iter()
            .filter(|c| !self.is_default(*c))
            .collect()
    }

    /// Recover the typed value
    ///
    /// Returns `Ok(None)` when every typed column holds its sentinel; a real
    /// value equal to its sentinel cannot be told apart from "absent".
    ///
    /// # Errors
    ///
    /// Returns `ValueError::AmbiguousType` if more than one column differs
    /// from its sentinel. Rows written through [`StoredRow::encode`] never
    /// trigger this.
    pub fn decode(&self) -> Result<Option<Value>, ValueError> {
        let populated = self.populated_columns();
        match populated.as_slice() {
            [] => Ok(None),
            [column] => Ok(Some(self.column_value(*column))),
            many => Err(ValueError::AmbiguousType {
                populated: many.len(),
            }),
        }
    }

    /// Like [`decode`](Self::decode) but resolves ambiguity instead of failing
    ///
    /// The first populated column in string → number → bool order wins; the
    /// caller is expected to have logged the integrity warning.
    pub fn decode_lenient(&self) -> Option<Value> {
        self.populated_columns()
            .first()
            .map(|column| self.column_value(*column))
    }

    /// Read one column as a typed value, regardless of sentinels
    pub fn column_value(&self, column: Column) -> Value {
        match column {
            Column::Bool => Value::Bool(self.bool_v == 1),
            Column::Number => Value::Number(self.number_v),
            Column::String => Value::String(self.string_v.clone()),
        }
    }

    /// Timestamp as Unix milliseconds
    pub fn ts_millis(&self) -> i64 {
        self.ts.timestamp_millis()
    }
}

/// Test a column of `row` for sentinel equality
pub fn is_default(column: Column, row: &StoredRow) -> bool {
    match column {
        Column::Bool => row.bool_v == BOOL_DEFAULT,
        Column::Number => row.number_v == NUMBER_DEFAULT,
        Column::String => row.string_v == STRING_DEFAULT,
    }
}

/// Check a sample against the column widths of the physical schema
///
/// The store rejects a whole multi-row insert when one value overflows its
/// column, so oversize samples are refused before they are batched.
///
/// # Errors
///
/// Returns `ValueError::TooLong` naming the first column that overflows.
pub fn check_widths(sample: &Sample) -> Result<(), ValueError> {
    check_width("device_id", &sample.device_id, IDENT_WIDTH)?;
    check_width("k", &sample.key, IDENT_WIDTH)?;
    if let Some(tenant) = &sample.tenant_id {
        check_width("tenant_id", tenant, IDENT_WIDTH)?;
    }
    if let Value::String(s) = &sample.value {
        check_width("string_v", s, STRING_WIDTH)?;
    }
    Ok(())
}

fn check_width(column: &'static str, text: &str, max: usize) -> Result<(), ValueError> {
    let len = text.chars().count();
    if len > max {
        return Err(ValueError::TooLong { column, len, max });
    }
    Ok(())
}

/// A stored row addressed to a concrete partition
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    /// Partition (sub-table) name, e.g. `ts_kv_sensor`
    pub partition: String,
    /// Row content
    pub row: StoredRow,
}

impl TableRow {
    /// Encode a sample for a partition
    pub fn new(partition: impl Into<String>, sample: &Sample) -> Self {
        Self {
            partition: partition.into(),
            row: StoredRow::encode(sample),
        }
    }
}
