//! Result types shared by the database backends.
//!
//! Backends buffer every result a statement produces into [`StatementResult`]s
//! and hand them out through [`ResultQueue`], which gives them the
//! "current result / more results" cursor the executor walks.

use super::ResultSet;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Display size reported for columns whose type has no natural width.
pub const UNBOUNDED_DISPLAY_SIZE: usize = 2_147_483_647;

/// Metadata about a column in a result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column label as reported by the driver.
    pub label: String,

    /// Driver type name.
    pub type_name: String,

    /// Maximum width, in characters, of a rendered value.
    pub display_size: usize,
}

impl ColumnDescriptor {
    /// Creates a column descriptor with the display size implied by its type.
    pub fn new(label: impl Into<String>, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        let display_size = display_size_for(&type_name);
        Self {
            label: label.into(),
            type_name,
            display_size,
        }
    }

    /// Overrides the display size.
    pub fn with_display_size(mut self, display_size: usize) -> Self {
        self.display_size = display_size;
        self
    }
}

/// Returns the display size conventionally reported for a SQL type name.
pub fn display_size_for(type_name: &str) -> usize {
    match type_name.to_uppercase().as_str() {
        "NULL" => 4,
        "BOOL" | "BOOLEAN" => 5,
        "INT2" | "SMALLINT" => 6,
        "INT4" | "INT" | "INTEGER" => 11,
        "INT8" | "BIGINT" => 20,
        "FLOAT4" | "REAL" => 14,
        "FLOAT8" | "DOUBLE" | "DOUBLE PRECISION" => 24,
        "DATE" => 10,
        "TIME" => 15,
        "TIMESTAMP" | "TIMESTAMPTZ" => 29,
        "UUID" => 36,
        _ => UNBOUNDED_DISPLAY_SIZE,
    }
}

/// A warning attached to a statement by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Human-readable warning text.
    pub message: String,

    /// Vendor SQL state, if the driver reports one.
    pub sql_state: Option<String>,
}

impl Warning {
    /// Creates a warning with the given message and no SQL state.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql_state: None,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql_state {
            Some(state) => write!(f, "{} (SQLSTATE {state})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// A row of buffered values.
pub type Row = Vec<Value>;

/// Represents a single value from a database query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum Value {
    /// NULL value.
    #[default]
    Null,

    /// Boolean value.
    Bool(bool),

    /// Signed integer (up to i64).
    Int(i64),

    /// Floating point number.
    Float(f64),

    /// Text/string value.
    String(String),

    /// Binary data.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the string form of the value, or `None` for NULL.
    pub fn as_string(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::Bytes(b) => Some(b.iter().map(|byte| format!("{byte:02x}")).collect()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_string() {
            Some(s) => write!(f, "{s}"),
            None => write!(f, "NULL"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Buffered rows of one result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultData {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Row>,
}

impl ResultData {
    /// Creates result data from columns and rows.
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }
}

/// One result produced by a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    /// A result set.
    Rows(ResultData),
    /// Number of rows affected by a data-modifying statement.
    UpdateCount(u64),
}

/// Cursor over the results of one execution.
#[derive(Debug, Default)]
pub struct ResultQueue {
    current: Option<StatementResult>,
    pending: VecDeque<StatementResult>,
}

impl ResultQueue {
    /// Replaces the queue contents and positions on the first result.
    ///
    /// Returns true if the first result is a result set.
    pub fn load(&mut self, results: impl IntoIterator<Item = StatementResult>) -> bool {
        self.pending = results.into_iter().collect();
        self.advance()
    }

    /// Moves to the next result. Returns true if it is a result set.
    pub fn advance(&mut self) -> bool {
        self.current = self.pending.pop_front();
        matches!(self.current, Some(StatementResult::Rows(_)))
    }

    /// Update count of the current result; `None` once results are exhausted
    /// or while positioned on a result set.
    pub fn update_count(&self) -> Option<u64> {
        match self.current {
            Some(StatementResult::UpdateCount(count)) => Some(count),
            _ => None,
        }
    }

    /// The current result set, if positioned on one.
    pub fn rows(&self) -> Option<&ResultData> {
        match &self.current {
            Some(StatementResult::Rows(data)) => Some(data),
            _ => None,
        }
    }

    /// Drops every buffered result.
    pub fn clear(&mut self) {
        self.current = None;
        self.pending.clear();
    }
}

/// Forward-only result set over buffered rows.
#[derive(Debug)]
pub struct BufferedResultSet<'a> {
    data: &'a ResultData,
    position: Option<usize>,
}

impl<'a> BufferedResultSet<'a> {
    /// Creates a result set positioned before the first row.
    pub fn new(data: &'a ResultData) -> Self {
        Self {
            data,
            position: None,
        }
    }

    fn current_row(&self) -> Result<&'a Row> {
        self.position
            .and_then(|pos| self.data.rows.get(pos))
            .ok_or_else(|| crate::error::ScriptError::database("Result set is not positioned on a row"))
    }
}

#[async_trait]
impl<'a> ResultSet for BufferedResultSet<'a> {
    fn columns(&self) -> &[ColumnDescriptor] {
        &self.data.columns
    }

    async fn next(&mut self) -> Result<bool> {
        let next = self.position.map_or(0, |pos| pos + 1);
        self.position = Some(next.min(self.data.rows.len()));
        Ok(next < self.data.rows.len())
    }

    fn get_string(&self, index: usize) -> Result<Option<String>> {
        let row = self.current_row()?;
        let value = index
            .checked_sub(1)
            .and_then(|i| row.get(i))
            .ok_or_else(|| {
                crate::error::ScriptError::database(format!(
                    "Column index {index} out of range (1..={})",
                    row.len()
                ))
            })?;
        Ok(value.as_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data() -> ResultData {
        ResultData::new(
            vec![
                ColumnDescriptor::new("id", "INTEGER"),
                ColumnDescriptor::new("name", "TEXT"),
            ],
            vec![
                vec![Value::Int(1), Value::from("Alice")],
                vec![Value::Int(2), Value::Null],
            ],
        )
    }

    #[test]
    fn test_value_as_string() {
        assert_eq!(Value::Null.as_string(), None);
        assert_eq!(Value::Bool(true).as_string().as_deref(), Some("true"));
        assert_eq!(Value::Int(42).as_string().as_deref(), Some("42"));
        assert_eq!(Value::Float(2.5).as_string().as_deref(), Some("2.5"));
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).as_string().as_deref(), Some("dead"));
        assert_eq!(Value::Null.to_string(), "NULL");
    }

    #[test]
    fn test_value_from_conversions() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42i32), Value::Int(42));
        assert_eq!(Value::from("hello"), Value::String("hello".to_string()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert!(Value::from(None::<i64>).is_null());
    }

    #[test]
    fn test_display_size_for_types() {
        assert_eq!(display_size_for("INTEGER"), 11);
        assert_eq!(display_size_for("bigint"), 20);
        assert_eq!(display_size_for("BOOLEAN"), 5);
        assert_eq!(display_size_for("TEXT"), UNBOUNDED_DISPLAY_SIZE);
        assert_eq!(ColumnDescriptor::new("id", "INT4").display_size, 11);
    }

    #[test]
    fn test_warning_display() {
        let mut warning = Warning::new("procedure compiled with errors");
        assert_eq!(warning.to_string(), "procedure compiled with errors");
        warning.sql_state = Some("01000".to_string());
        assert_eq!(
            warning.to_string(),
            "procedure compiled with errors (SQLSTATE 01000)"
        );
    }

    #[test]
    fn test_result_queue_walks_results() {
        let mut queue = ResultQueue::default();
        let has_rows = queue.load(vec![
            StatementResult::UpdateCount(3),
            StatementResult::Rows(sample_data()),
        ]);

        assert!(!has_rows);
        assert_eq!(queue.update_count(), Some(3));
        assert!(queue.rows().is_none());

        assert!(queue.advance());
        assert_eq!(queue.update_count(), None);
        assert_eq!(queue.rows().map(|d| d.rows.len()), Some(2));

        assert!(!queue.advance());
        assert_eq!(queue.update_count(), None);
    }

    #[tokio::test]
    async fn test_buffered_result_set_reads_rows() {
        let data = sample_data();
        let mut rs = BufferedResultSet::new(&data);

        assert_eq!(rs.columns().len(), 2);
        assert!(rs.get_string(1).is_err());

        assert!(rs.next().await.unwrap());
        assert_eq!(rs.get_string(1).unwrap().as_deref(), Some("1"));
        assert_eq!(rs.get_string(2).unwrap().as_deref(), Some("Alice"));

        assert!(rs.next().await.unwrap());
        assert_eq!(rs.get_string(2).unwrap(), None);
        assert!(rs.get_string(0).is_err());
        assert!(rs.get_string(3).is_err());

        assert!(!rs.next().await.unwrap());
        assert!(!rs.next().await.unwrap());
    }
}
