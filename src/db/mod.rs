//! Database abstraction layer for sql-scriptrun.
//!
//! The executor only talks to the database through the [`Connection`],
//! [`Statement`] and [`ResultSet`] traits, so any backend exposing the
//! classic "execute, then walk the results" protocol can be plugged in.

mod mock;
mod sqlx_backend;
mod types;

pub use mock::{MockConnection, MockResponse};
pub use sqlx_backend::SqlxConnection;
pub use types::{
    display_size_for, BufferedResultSet, ColumnDescriptor, ResultData, ResultQueue, Row,
    StatementResult, Value, Warning, UNBOUNDED_DISPLAY_SIZE,
};

use crate::error::Result;
use async_trait::async_trait;

/// Opens a connection for the given database URL.
///
/// This is the central factory function for database connections.
pub async fn connect(url: &str) -> Result<Box<dyn Connection>> {
    let connection = SqlxConnection::connect(url).await?;
    Ok(Box::new(connection))
}

/// A database connection as seen by the script executor.
#[async_trait]
pub trait Connection: Send {
    /// Returns whether the connection is in autocommit mode.
    fn auto_commit(&self) -> Result<bool>;

    /// Switches autocommit mode on or off.
    async fn set_auto_commit(&mut self, enabled: bool) -> Result<()>;

    /// Creates a statement bound to this connection.
    fn create_statement(&mut self) -> Result<Box<dyn Statement + '_>>;

    /// Commits the current transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Rolls back the current transaction.
    async fn rollback(&mut self) -> Result<()>;

    /// Closes the connection.
    async fn close(&mut self) -> Result<()>;
}

/// A statement handle, valid until closed.
#[async_trait]
pub trait Statement: Send {
    /// Enables or disables driver-side escape substitution.
    fn set_escape_processing(&mut self, enabled: bool) -> Result<()>;

    /// Executes SQL text. Returns true if the first result is a result set.
    async fn execute(&mut self, sql: &str) -> Result<bool>;

    /// Update count of the current result.
    ///
    /// `None` means the current result is a result set or there are no more
    /// results.
    fn update_count(&self) -> Result<Option<u64>>;

    /// Moves to the next result. Returns true if it is a result set.
    async fn more_results(&mut self) -> Result<bool>;

    /// Warning reported for the last execution, if any.
    fn warnings(&self) -> Result<Option<Warning>>;

    /// The current result set, if positioned on one.
    fn result_set(&mut self) -> Result<Option<Box<dyn ResultSet + '_>>>;

    /// Releases the statement.
    async fn close(&mut self) -> Result<()>;
}

/// Forward-only cursor over the rows of one result.
#[async_trait]
pub trait ResultSet: Send {
    /// Column metadata.
    fn columns(&self) -> &[ColumnDescriptor];

    /// Advances to the next row. Returns false once rows are exhausted.
    async fn next(&mut self) -> Result<bool>;

    /// String value of a column in the current row (1-based), `None` for NULL.
    fn get_string(&self, index: usize) -> Result<Option<String>>;
}

/// Read-only view of the current row, handed to observers.
#[derive(Clone, Copy)]
pub struct RowHandle<'a> {
    result_set: &'a dyn ResultSet,
}

impl<'a> RowHandle<'a> {
    /// Wraps a result set positioned on a row.
    pub fn new(result_set: &'a dyn ResultSet) -> Self {
        Self { result_set }
    }

    /// Column metadata of the row.
    pub fn columns(&self) -> &'a [ColumnDescriptor] {
        self.result_set.columns()
    }

    /// Number of columns in the row.
    pub fn column_count(&self) -> usize {
        self.result_set.columns().len()
    }

    /// String value of a column (1-based), `None` for NULL.
    pub fn get_string(&self, index: usize) -> Result<Option<String>> {
        self.result_set.get_string(index)
    }

    /// Every value of the row, in column order.
    pub fn values(&self) -> Result<Vec<Option<String>>> {
        (1..=self.column_count())
            .map(|index| self.get_string(index))
            .collect()
    }
}

impl std::fmt::Debug for RowHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowHandle")
            .field("columns", &self.columns())
            .finish()
    }
}
