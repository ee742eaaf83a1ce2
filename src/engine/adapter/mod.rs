//! Database Adapter Layer
//!
//! The narrow storage interface the document store is written against.
//! SQLite is the only backend; the store never touches rusqlite directly.

pub mod sqlite;

pub use sqlite::SqliteAdapter;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Universal result type for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Storage collaborator consumed by the document store
pub trait StorageAdapter: Send + Sync {
    /// Execute a query that returns rows (SELECT, PRAGMA, etc.)
    fn query(&self, sql: &str, params: &[SqlValue]) -> AdapterResult<QueryResult>;

    /// Execute a statement that modifies data or schema
    fn execute(&self, sql: &str, params: &[SqlValue]) -> AdapterResult<ExecResult>;

    /// Open a transaction on the underlying connection
    fn begin(&self) -> AdapterResult<()>;

    /// Commit the open transaction
    fn commit(&self) -> AdapterResult<()>;

    /// Roll back the open transaction
    fn rollback(&self) -> AdapterResult<()>;

    /// Column names of a table, in declaration order
    fn list_columns(&self, table: &str) -> AdapterResult<Vec<String>>;
}

/// SQL value for parameterized queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<f64> for SqlValue {
    fn from(n: f64) -> Self {
        SqlValue::Real(n)
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        SqlValue::Integer(n)
    }
}

/// Result from a SELECT-type query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub execution_time_ms: u64,
}

/// Result from an INSERT/UPDATE/DELETE-type statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub affected_rows: u64,
    pub execution_time_ms: u64,
}

/// Database adapter errors
#[derive(Debug)]
pub enum AdapterError {
    Connection(String),
    Query(String),
    Schema(String),
    /// `ALTER TABLE ... ADD COLUMN` hit a column that is already there
    ColumnExists(String),
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::Connection(e) => write!(f, "Connection error: {}", e),
            AdapterError::Query(e) => write!(f, "Query error: {}", e),
            AdapterError::Schema(e) => write!(f, "Schema error: {}", e),
            AdapterError::ColumnExists(e) => write!(f, "Column already exists: {}", e),
        }
    }
}

impl std::error::Error for AdapterError {}
