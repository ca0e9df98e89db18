//! Error types for sql-scriptrun.
//!
//! Defines the error enum shared by the executor, the database backends and
//! the command-line front end.

use thiserror::Error;

/// Main error type for script runs.
#[derive(Error, Debug)]
pub enum ScriptError {
    /// Configuration errors (autocommit cannot be applied, invalid config file, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The script ended while a statement was still waiting for its delimiter.
    #[error("Line missing end-of-line terminator ({delimiter}) => {command}")]
    TerminatorMissing { delimiter: String, command: String },

    /// A statement failed to execute.
    #[error("Error executing: {command}. Cause: {message}")]
    Statement { command: String, message: String },

    /// A statement raised a driver warning while warnings are treated as failures.
    #[error("Warning executing: {command}. Cause: {message}")]
    Warning { command: String, message: String },

    /// Failure while draining or rendering a result set.
    #[error("Error printing results: {0}")]
    ResultPrinting(String),

    /// The transaction could not be committed after the script finished.
    #[error("Could not commit transaction. Cause: {0}")]
    Commit(String),

    /// Connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Errors reported by the database primitive itself.
    #[error("Database error: {0}")]
    Database(String),

    /// Reading the script source failed.
    #[error("I/O error: {0}")]
    Io(String),
}

impl ScriptError {
    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a terminator-missing error for the unterminated command.
    pub fn terminator_missing(delimiter: impl Into<String>, command: impl Into<String>) -> Self {
        Self::TerminatorMissing {
            delimiter: delimiter.into(),
            command: command.into(),
        }
    }

    /// Creates a statement execution error.
    pub fn statement(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Statement {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Creates a warning-as-failure error.
    pub fn warning(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Warning {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Creates a result printing error with the given message.
    pub fn result_printing(msg: impl Into<String>) -> Self {
        Self::ResultPrinting(msg.into())
    }

    /// Creates a commit error with the given message.
    pub fn commit(msg: impl Into<String>) -> Self {
        Self::Commit(msg.into())
    }

    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a database error with the given message.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Creates an I/O error with the given message.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "Configuration Error",
            Self::TerminatorMissing { .. } => "Script Error",
            Self::Statement { .. } => "Statement Error",
            Self::Warning { .. } => "Statement Warning",
            Self::ResultPrinting(_) => "Output Error",
            Self::Commit(_) => "Transaction Error",
            Self::Connection(_) => "Connection Error",
            Self::Database(_) => "Database Error",
            Self::Io(_) => "I/O Error",
        }
    }
}

impl From<std::io::Error> for ScriptError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type alias using ScriptError.
pub type Result<T> = std::result::Result<T, ScriptError>;
