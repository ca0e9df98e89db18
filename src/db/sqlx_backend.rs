//! sqlx-backed connection.
//!
//! Provides `SqlxConnection`, which implements the `Connection` trait on top
//! of `sqlx::AnyConnection` so the same code drives PostgreSQL and SQLite.
//! Every result of a statement is buffered at `execute` time.

use super::{
    BufferedResultSet, ColumnDescriptor, Connection, ResultData, ResultQueue, ResultSet, Row,
    Statement, StatementResult, Value, Warning,
};
use crate::error::{Result, ScriptError};
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::any::AnyRow;
use sqlx::{
    AnyConnection, Column as SqlxColumn, Connection as _, Either, Executor as _, Row as SqlxRow,
    TypeInfo,
};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Connection to a PostgreSQL or SQLite database.
///
/// Autocommit is emulated: with autocommit off, a `BEGIN` is issued lazily
/// before the first statement and closed by `commit`/`rollback`.
pub struct SqlxConnection {
    conn: Option<AnyConnection>,
    auto_commit: bool,
    in_transaction: bool,
}

impl SqlxConnection {
    /// Connects to the database at `url`, retrying transient failures.
    pub async fn connect(url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            match AnyConnection::connect(url).await {
                Ok(conn) => {
                    debug!("Successfully connected to database");
                    return Ok(Self::from_connection(conn));
                }
                Err(e) => {
                    let is_transient = is_transient_error(&e);
                    last_error = Some(e);

                    if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    } else {
                        break;
                    }
                }
            }
        }

        Err(match last_error {
            Some(e) => map_connection_error(e),
            None => ScriptError::connection("No connection attempt was made"),
        })
    }

    /// Wraps an already open connection. Starts in autocommit mode.
    pub fn from_connection(conn: AnyConnection) -> Self {
        Self {
            conn: Some(conn),
            auto_commit: true,
            in_transaction: false,
        }
    }

    /// Whether a transaction is currently open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn raw(&mut self) -> Result<&mut AnyConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| ScriptError::database("Connection is closed"))
    }

    async fn run_control(&mut self, sql: &str) -> Result<()> {
        trace!("{sql}");
        let conn: &mut AnyConnection = self.raw()?;
        conn.execute(sqlx::raw_sql(sql))
            .await
            .map_err(|e| ScriptError::database(format_database_error(e)))?;
        Ok(())
    }

    async fn begin_if_needed(&mut self) -> Result<()> {
        if !self.auto_commit && !self.in_transaction {
            self.run_control("BEGIN").await?;
            self.in_transaction = true;
        }
        Ok(())
    }

    async fn fetch_results(&mut self, sql: &str) -> Result<Vec<StatementResult>> {
        let conn = self.raw()?;
        let mut stream = sqlx::raw_sql(sql).fetch_many(&mut *conn);

        let mut results = Vec::new();
        let mut rows: Vec<AnyRow> = Vec::new();

        while let Some(item) = stream
            .try_next()
            .await
            .map_err(|e| ScriptError::database(format_database_error(e)))?
        {
            match item {
                Either::Left(done) => {
                    if rows.is_empty() {
                        results.push(StatementResult::UpdateCount(done.rows_affected()));
                    } else {
                        results.push(StatementResult::Rows(buffer_rows(std::mem::take(
                            &mut rows,
                        ))));
                    }
                }
                Either::Right(row) => rows.push(row),
            }
        }
        drop(stream);

        if !rows.is_empty() {
            results.push(StatementResult::Rows(buffer_rows(rows)));
        }

        // A query that matched no rows only yields its completion, so ask the
        // driver whether the statement has columns. Multi-statement texts are
        // left alone: a prepared statement holds a single command.
        if let [StatementResult::UpdateCount(_)] = results.as_slice() {
            if let Some(columns) = describe_columns(conn, sql).await {
                results = vec![StatementResult::Rows(ResultData::new(columns, Vec::new()))];
            }
        }

        Ok(results)
    }
}

/// Column metadata of a statement that produces a result set, or `None`
/// when it produces none or cannot be described.
async fn describe_columns(conn: &mut AnyConnection, sql: &str) -> Option<Vec<ColumnDescriptor>> {
    match conn.describe(sql).await {
        Ok(describe) if !describe.columns().is_empty() => Some(
            describe
                .columns()
                .iter()
                .map(|col| ColumnDescriptor::new(col.name(), col.type_info().name()))
                .collect(),
        ),
        Ok(_) => None,
        Err(e) => {
            debug!("Could not describe statement: {e}");
            None
        }
    }
}

#[async_trait]
impl Connection for SqlxConnection {
    fn auto_commit(&self) -> Result<bool> {
        if self.conn.is_none() {
            return Err(ScriptError::database("Connection is closed"));
        }
        Ok(self.auto_commit)
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        if enabled && self.in_transaction {
            self.run_control("COMMIT").await?;
            self.in_transaction = false;
        }
        self.auto_commit = enabled;
        Ok(())
    }

    fn create_statement(&mut self) -> Result<Box<dyn Statement + '_>> {
        self.raw()?;
        Ok(Box::new(SqlxStatement {
            conn: self,
            escape_processing: true,
            results: ResultQueue::default(),
        }))
    }

    async fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.run_control("COMMIT").await?;
            self.in_transaction = false;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.in_transaction {
            self.in_transaction = false;
            self.run_control("ROLLBACK").await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .await
                .map_err(|e| ScriptError::connection(e.to_string()))?;
        }
        Ok(())
    }
}

struct SqlxStatement<'c> {
    conn: &'c mut SqlxConnection,
    escape_processing: bool,
    results: ResultQueue,
}

#[async_trait]
impl<'c> Statement for SqlxStatement<'c> {
    fn set_escape_processing(&mut self, enabled: bool) -> Result<()> {
        // sqlx sends SQL text verbatim; the flag is kept for diagnostics only.
        self.escape_processing = enabled;
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<bool> {
        trace!(escape_processing = self.escape_processing, "executing statement");
        self.results.clear();
        self.conn.begin_if_needed().await?;
        let results = self.conn.fetch_results(sql).await?;
        Ok(self.results.load(results))
    }

    fn update_count(&self) -> Result<Option<u64>> {
        Ok(self.results.update_count())
    }

    async fn more_results(&mut self) -> Result<bool> {
        Ok(self.results.advance())
    }

    fn warnings(&self) -> Result<Option<Warning>> {
        Ok(None)
    }

    fn result_set(&mut self) -> Result<Option<Box<dyn ResultSet + '_>>> {
        Ok(self
            .results
            .rows()
            .map(|data| Box::new(BufferedResultSet::new(data)) as Box<dyn ResultSet + '_>))
    }

    async fn close(&mut self) -> Result<()> {
        self.results.clear();
        Ok(())
    }
}

/// Converts the rows of one result into buffered data.
fn buffer_rows(rows: Vec<AnyRow>) -> ResultData {
    let columns = rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|col| ColumnDescriptor::new(col.name(), col.type_info().name()))
                .collect()
        })
        .unwrap_or_default();

    let rows = rows.iter().map(convert_row).collect();
    ResultData::new(columns, rows)
}

/// Converts a sqlx AnyRow to our Row type.
fn convert_row(row: &AnyRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

/// Converts a single column value from an AnyRow to our Value type.
fn convert_value(row: &AnyRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "INT2" | "SMALLINT" | "INT4" | "INT" | "INTEGER" | "INT8" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .or_else(|| {
                row.try_get::<Option<i32>, _>(index)
                    .ok()
                    .flatten()
                    .map(i64::from)
            })
            .or_else(|| {
                row.try_get::<Option<i16>, _>(index)
                    .ok()
                    .flatten()
                    .map(i64::from)
            })
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "FLOAT4" | "REAL" | "FLOAT8" | "DOUBLE" | "DOUBLE PRECISION" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .or_else(|| {
                row.try_get::<Option<f32>, _>(index)
                    .ok()
                    .flatten()
                    .map(f64::from)
            })
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "BYTEA" | "BLOB" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),

        // Expression columns may carry no declared type, so fall back on the value
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .or_else(|| {
                row.try_get::<Option<i64>, _>(index)
                    .ok()
                    .flatten()
                    .map(Value::Int)
            })
            .or_else(|| {
                row.try_get::<Option<f64>, _>(index)
                    .ok()
                    .flatten()
                    .map(Value::Float)
            })
            .unwrap_or(Value::Null),
    }
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
        || error_str.contains("does not exist")
    {
        return false;
    }

    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error) -> ScriptError {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        ScriptError::connection("Cannot reach the database server. Check that it is running.")
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        ScriptError::connection("Authentication failed. Check your credentials.")
    } else if error_str.contains("no driver found") {
        ScriptError::connection(format!(
            "Unsupported database URL scheme. Expected postgres:// or sqlite:. ({error})"
        ))
    } else {
        ScriptError::connection(error.to_string())
    }
}

/// Formats a database error with detail and hint when the driver provides them.
fn format_database_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = String::from(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }
        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_connection() -> SqlxConnection {
        SqlxConnection::connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should open")
    }

    #[tokio::test]
    async fn test_select_is_buffered_as_result_set() {
        let mut conn = memory_connection().await;
        let mut statement = conn.create_statement().unwrap();

        assert!(statement.execute("SELECT 1 AS num, 'hi' AS greeting").await.unwrap());
        let mut rs = statement.result_set().unwrap().unwrap();
        assert_eq!(rs.columns().len(), 2);
        assert_eq!(rs.columns()[0].label, "num");
        assert!(rs.next().await.unwrap());
        assert_eq!(rs.get_string(1).unwrap().as_deref(), Some("1"));
        assert_eq!(rs.get_string(2).unwrap().as_deref(), Some("hi"));
        assert!(!rs.next().await.unwrap());
        drop(rs);

        assert!(!statement.more_results().await.unwrap());
        assert_eq!(statement.update_count().unwrap(), None);
    }

    #[tokio::test]
    async fn test_insert_reports_update_count() {
        let mut conn = memory_connection().await;
        let mut statement = conn.create_statement().unwrap();

        assert!(!statement
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap());
        assert!(!statement
            .execute("INSERT INTO t (name) VALUES ('a'), ('b')")
            .await
            .unwrap());
        assert_eq!(statement.update_count().unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_empty_select_is_still_a_result_set() {
        let mut conn = memory_connection().await;
        let mut statement = conn.create_statement().unwrap();

        statement.execute("CREATE TABLE t (id INTEGER)").await.unwrap();
        statement
            .execute("INSERT INTO t VALUES (1), (2)")
            .await
            .unwrap();

        assert!(statement
            .execute("SELECT id FROM t WHERE id > 5")
            .await
            .unwrap());
        assert_eq!(statement.update_count().unwrap(), None);
        let mut rs = statement.result_set().unwrap().unwrap();
        assert_eq!(rs.columns().len(), 1);
        assert_eq!(rs.columns()[0].label, "id");
        assert!(!rs.next().await.unwrap());
    }

    #[tokio::test]
    async fn test_autocommit_off_opens_transaction_lazily() {
        let mut conn = memory_connection().await;
        conn.set_auto_commit(false).await.unwrap();
        assert!(!conn.in_transaction());

        {
            let mut statement = conn.create_statement().unwrap();
            statement.execute("CREATE TABLE t (id INTEGER)").await.unwrap();
        }
        assert!(conn.in_transaction());

        conn.commit().await.unwrap();
        assert!(!conn.in_transaction());
        conn.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_error_is_database_error() {
        let mut conn = memory_connection().await;
        let mut statement = conn.create_statement().unwrap();
        let err = statement
            .execute("SELECT * FROM missing_table")
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::Database(_)));
        assert!(err.to_string().contains("missing_table"));
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_statements() {
        let mut conn = memory_connection().await;
        conn.close().await.unwrap();
        assert!(conn.create_statement().is_err());
        assert!(conn.auto_commit().is_err());
    }

    #[test]
    fn test_transient_error_detection() {
        let refused = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(is_transient_error(&refused));
        assert!(!is_transient_error(&sqlx::Error::RowNotFound));
    }
}
