//! sql-scriptrun - Run SQL scripts statement by statement.
//!
//! The library splits scripts on a configurable delimiter, executes each
//! statement through the [`db::Connection`] abstraction and reports progress
//! to [`script::ScriptObserver`]s.

pub mod config;
pub mod db;
pub mod error;
pub mod script;
