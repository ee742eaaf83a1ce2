//! SQLite Adapter
//!
//! Implements StorageAdapter for SQLite using a single rusqlite connection.
//! The connection sits behind a mutex; transactions are plain BEGIN/COMMIT
//! statements on that one connection, so every statement issued between
//! `begin` and `commit` belongs to the transaction.

use parking_lot::Mutex;
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::{AdapterError, AdapterResult, ExecResult, QueryResult, SqlValue, StorageAdapter};
use crate::engine::config::StoreConfig;

pub struct SqliteAdapter {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteAdapter {
    pub fn open(config: &StoreConfig) -> AdapterResult<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(&config.path)
            .map_err(|e| AdapterError::Connection(e.to_string()))?;

        let adapter = Self {
            conn: Mutex::new(conn),
            db_path: config.path.clone(),
        };
        adapter.init_pragmas(&config.journal_mode, config.busy_timeout_ms)?;
        Ok(adapter)
    }

    pub fn in_memory() -> AdapterResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AdapterError::Connection(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn init_pragmas(&self, journal_mode: &str, busy_timeout_ms: u64) -> AdapterResult<()> {
        if journal_mode.is_empty() || !journal_mode.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(AdapterError::Connection(format!(
                "invalid journal mode: {}",
                journal_mode
            )));
        }

        let conn = self.conn.lock();
        let _: String = conn
            .query_row(&format!("PRAGMA journal_mode={}", journal_mode), [], |row| row.get(0))
            .map_err(|e| AdapterError::Schema(e.to_string()))?;
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))
            .map_err(|e| AdapterError::Connection(e.to_string()))?;

        Ok(())
    }

    /// Convert a rusqlite ValueRef to serde_json Value
    fn value_ref_to_json(val: rusqlite::types::ValueRef<'_>) -> Value {
        match val {
            rusqlite::types::ValueRef::Null => Value::Null,
            rusqlite::types::ValueRef::Integer(i) => json!(i),
            rusqlite::types::ValueRef::Real(f) => json!(f),
            rusqlite::types::ValueRef::Text(t) => {
                json!(String::from_utf8_lossy(t).to_string())
            }
            rusqlite::types::ValueRef::Blob(b) => {
                json!(format!("BLOB({} bytes)", b.len()))
            }
        }
    }

    fn to_sql_values(params: &[SqlValue]) -> Vec<rusqlite::types::Value> {
        params
            .iter()
            .map(|p| match p {
                SqlValue::Null => rusqlite::types::Value::Null,
                SqlValue::Integer(i) => rusqlite::types::Value::Integer(*i),
                SqlValue::Real(f) => rusqlite::types::Value::Real(*f),
                SqlValue::Text(s) => rusqlite::types::Value::Text(s.clone()),
            })
            .collect()
    }

    fn transaction_statement(&self, sql: &str) -> AdapterResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(sql)
            .map_err(|e| AdapterError::Query(e.to_string()))
    }
}

/// Map a statement failure, singling out SQLite's duplicate-column error
fn execute_err(e: rusqlite::Error) -> AdapterError {
    let message = e.to_string();
    if message.contains("duplicate column name") {
        AdapterError::ColumnExists(message)
    } else {
        AdapterError::Query(message)
    }
}

impl StorageAdapter for SqliteAdapter {
    fn query(&self, sql: &str, params: &[SqlValue]) -> AdapterResult<QueryResult> {
        let conn = self.conn.lock();
        let start = Instant::now();

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| AdapterError::Query(e.to_string()))?;

        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let values = Self::to_sql_values(params);

        let mut rows = stmt
            .query(params_from_iter(values.iter()))
            .map_err(|e| AdapterError::Query(e.to_string()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| AdapterError::Query(e.to_string()))? {
            let mut vals = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                let val = row
                    .get_ref(i)
                    .map_err(|e| AdapterError::Query(e.to_string()))?;
                vals.push(Self::value_ref_to_json(val));
            }
            out.push(vals);
        }

        Ok(QueryResult {
            columns,
            rows: out,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> AdapterResult<ExecResult> {
        let conn = self.conn.lock();
        let start = Instant::now();

        let values = Self::to_sql_values(params);
        let affected = conn
            .execute(sql, params_from_iter(values.iter()))
            .map_err(execute_err)?;

        Ok(ExecResult {
            affected_rows: affected as u64,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn begin(&self) -> AdapterResult<()> {
        self.transaction_statement("BEGIN")
    }

    fn commit(&self) -> AdapterResult<()> {
        self.transaction_statement("COMMIT")
    }

    fn rollback(&self) -> AdapterResult<()> {
        self.transaction_statement("ROLLBACK")
    }

    fn list_columns(&self, table: &str) -> AdapterResult<Vec<String>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info('{}')", table))
            .map_err(|e| AdapterError::Schema(e.to_string()))?;

        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(|e| AdapterError::Schema(e.to_string()))?
            .collect::<Result<Vec<String>, _>>()
            .map_err(|e| AdapterError::Schema(e.to_string()))?;

        Ok(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_and_query_with_params() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter
            .execute("CREATE TABLE t (id TEXT PRIMARY KEY, n REAL)", &[])
            .unwrap();

        let res = adapter
            .execute("INSERT INTO t (id, n) VALUES (?, ?)", &["a".into(), 1.5.into()])
            .unwrap();
        assert_eq!(res.affected_rows, 1);

        let rows = adapter
            .query("SELECT id, n FROM t WHERE n > ?", &[SqlValue::Real(1.0)])
            .unwrap();
        assert_eq!(rows.columns, vec!["id", "n"]);
        assert_eq!(rows.rows, vec![vec![json!("a"), json!(1.5)]]);
    }

    #[test]
    fn test_list_columns_in_order() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter
            .execute("CREATE TABLE t (id TEXT PRIMARY KEY, _json TEXT)", &[])
            .unwrap();
        adapter.execute("ALTER TABLE t ADD COLUMN name_TEXT TEXT", &[]).unwrap();

        assert_eq!(
            adapter.list_columns("t").unwrap(),
            vec!["id", "_json", "name_TEXT"]
        );
    }

    #[test]
    fn test_duplicate_column_is_reported_as_column_exists() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.execute("CREATE TABLE t (id TEXT)", &[]).unwrap();
        adapter.execute("ALTER TABLE t ADD COLUMN x TEXT", &[]).unwrap();

        let err = adapter.execute("ALTER TABLE t ADD COLUMN x TEXT", &[]).unwrap_err();
        assert!(matches!(err, AdapterError::ColumnExists(_)));
    }

    #[test]
    fn test_rollback_discards_writes() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.execute("CREATE TABLE t (id TEXT)", &[]).unwrap();

        adapter.begin().unwrap();
        adapter.execute("INSERT INTO t (id) VALUES (?)", &["a".into()]).unwrap();
        adapter.rollback().unwrap();

        let rows = adapter.query("SELECT COUNT(*) FROM t", &[]).unwrap();
        assert_eq!(rows.rows[0][0], json!(0));
    }

    #[test]
    fn test_rejects_bad_journal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::new(dir.path().join("db.sqlite"));
        config.journal_mode = "WAL; DROP TABLE x".to_string();

        assert!(SqliteAdapter::open(&config).is_err());
    }
}
