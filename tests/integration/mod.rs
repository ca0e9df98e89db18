//! Integration tests for sql-scriptrun.
//!
//! SQLite tests run against an in-memory database. PostgreSQL tests
//! require the DATABASE_URL environment variable.

pub mod config_test;
pub mod postgres_script_test;
pub mod sqlite_script_test;
