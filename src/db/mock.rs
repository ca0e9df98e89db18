//! Mock database connection for testing.
//!
//! Responses are scripted per SQL text; everything the executor does to the
//! connection is recorded so tests can assert on it afterwards.

use super::{
    BufferedResultSet, ColumnDescriptor, Connection, ResultData, ResultQueue, ResultSet, Row,
    Statement, StatementResult, Value, Warning,
};
use crate::error::{Result, ScriptError};
use async_trait::async_trait;
use std::collections::HashMap;

/// Scripted outcome for one SQL text.
#[derive(Debug, Clone, Default)]
pub struct MockResponse {
    results: Vec<StatementResult>,
    warning: Option<Warning>,
    error: Option<String>,
    row_error_after: Option<usize>,
}

impl MockResponse {
    /// A statement that updates `count` rows.
    pub fn updated(count: u64) -> Self {
        Self {
            results: vec![StatementResult::UpdateCount(count)],
            ..Self::default()
        }
    }

    /// A statement producing one result set.
    pub fn rows(columns: Vec<ColumnDescriptor>, rows: Vec<Row>) -> Self {
        Self {
            results: vec![StatementResult::Rows(ResultData::new(columns, rows))],
            ..Self::default()
        }
    }

    /// A statement producing several results in order.
    pub fn results(results: Vec<StatementResult>) -> Self {
        Self {
            results,
            ..Self::default()
        }
    }

    /// A statement that fails to execute.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Attaches a driver warning to the statement.
    pub fn with_warning(mut self, warning: Warning) -> Self {
        self.warning = Some(warning);
        self
    }

    /// Makes result sets fail when advancing past `rows` rows.
    pub fn with_row_error_after(mut self, rows: usize) -> Self {
        self.row_error_after = Some(rows);
        self
    }
}

/// A mock connection that returns predefined results.
#[derive(Debug)]
pub struct MockConnection {
    responses: HashMap<String, MockResponse>,
    auto_commit: bool,
    executed: Vec<String>,
    escape_processing: Vec<bool>,
    commits: usize,
    rollbacks: usize,
    statements_opened: usize,
    statements_closed: usize,
    closed: bool,
    fail_auto_commit: bool,
    fail_commit: bool,
    fail_rollback: bool,
    fail_statement_close: bool,
}

impl MockConnection {
    /// Creates a mock connection in autocommit mode with no scripted responses.
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            auto_commit: true,
            executed: Vec::new(),
            escape_processing: Vec::new(),
            commits: 0,
            rollbacks: 0,
            statements_opened: 0,
            statements_closed: 0,
            closed: false,
            fail_auto_commit: false,
            fail_commit: false,
            fail_rollback: false,
            fail_statement_close: false,
        }
    }

    /// Scripts the response for an exact SQL text.
    pub fn with_response(mut self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.responses.insert(sql.into(), response);
        self
    }

    /// Sets the initial autocommit mode.
    pub fn with_auto_commit(mut self, enabled: bool) -> Self {
        self.auto_commit = enabled;
        self
    }

    /// Makes `set_auto_commit` fail.
    pub fn failing_auto_commit(mut self) -> Self {
        self.fail_auto_commit = true;
        self
    }

    /// Makes `commit` fail.
    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    /// Makes `rollback` fail.
    pub fn failing_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }

    /// Makes closing a statement fail.
    pub fn failing_statement_close(mut self) -> Self {
        self.fail_statement_close = true;
        self
    }

    /// SQL texts executed so far, in order.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Escape processing flag applied to each statement, in order.
    pub fn escape_processing(&self) -> &[bool] {
        &self.escape_processing
    }

    /// Number of successful commits.
    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Number of rollback attempts.
    pub fn rollbacks(&self) -> usize {
        self.rollbacks
    }

    /// Number of statements created.
    pub fn statements_opened(&self) -> usize {
        self.statements_opened
    }

    /// Number of statements closed (including failed closes).
    pub fn statements_closed(&self) -> usize {
        self.statements_closed
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn response_for(&self, sql: &str) -> MockResponse {
        if let Some(response) = self.responses.get(sql) {
            return response.clone();
        }

        if sql.trim_start().to_uppercase().starts_with("SELECT") {
            MockResponse::rows(
                vec![ColumnDescriptor::new("result", "TEXT")],
                vec![vec![Value::String(format!("Mock result for: {sql}"))]],
            )
        } else {
            MockResponse::updated(0)
        }
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn auto_commit(&self) -> Result<bool> {
        Ok(self.auto_commit)
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        if self.fail_auto_commit {
            return Err(ScriptError::database("autocommit mode is read-only"));
        }
        self.auto_commit = enabled;
        Ok(())
    }

    fn create_statement(&mut self) -> Result<Box<dyn Statement + '_>> {
        if self.closed {
            return Err(ScriptError::database("connection is closed"));
        }
        self.statements_opened += 1;
        Ok(Box::new(MockStatement {
            conn: self,
            results: ResultQueue::default(),
            warning: None,
            row_error_after: None,
        }))
    }

    async fn commit(&mut self) -> Result<()> {
        if self.fail_commit {
            return Err(ScriptError::database("commit rejected"));
        }
        self.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.rollbacks += 1;
        if self.fail_rollback {
            return Err(ScriptError::database("rollback rejected"));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

struct MockStatement<'c> {
    conn: &'c mut MockConnection,
    results: ResultQueue,
    warning: Option<Warning>,
    row_error_after: Option<usize>,
}

#[async_trait]
impl<'c> Statement for MockStatement<'c> {
    fn set_escape_processing(&mut self, enabled: bool) -> Result<()> {
        self.conn.escape_processing.push(enabled);
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<bool> {
        self.conn.executed.push(sql.to_string());
        let response = self.conn.response_for(sql);

        if let Some(message) = response.error {
            self.results.clear();
            return Err(ScriptError::database(message));
        }

        self.warning = response.warning;
        self.row_error_after = response.row_error_after;
        Ok(self.results.load(response.results))
    }

    fn update_count(&self) -> Result<Option<u64>> {
        Ok(self.results.update_count())
    }

    async fn more_results(&mut self) -> Result<bool> {
        Ok(self.results.advance())
    }

    fn warnings(&self) -> Result<Option<Warning>> {
        Ok(self.warning.clone())
    }

    fn result_set(&mut self) -> Result<Option<Box<dyn ResultSet + '_>>> {
        let fail_after = self.row_error_after;
        Ok(self.results.rows().map(|data| {
            Box::new(MockResultSet {
                inner: BufferedResultSet::new(data),
                fail_after,
                advanced: 0,
            }) as Box<dyn ResultSet + '_>
        }))
    }

    async fn close(&mut self) -> Result<()> {
        self.conn.statements_closed += 1;
        self.results.clear();
        if self.conn.fail_statement_close {
            return Err(ScriptError::database("statement already closed"));
        }
        Ok(())
    }
}

struct MockResultSet<'a> {
    inner: BufferedResultSet<'a>,
    fail_after: Option<usize>,
    advanced: usize,
}

#[async_trait]
impl<'a> ResultSet for MockResultSet<'a> {
    fn columns(&self) -> &[ColumnDescriptor] {
        self.inner.columns()
    }

    async fn next(&mut self) -> Result<bool> {
        if self.fail_after.is_some_and(|limit| self.advanced >= limit) {
            return Err(ScriptError::database("cursor lost while fetching rows"));
        }
        self.advanced += 1;
        self.inner.next().await
    }

    fn get_string(&self, index: usize) -> Result<Option<String>> {
        self.inner.get_string(index)
    }
}
