//! NoSQL Storage Engine
//!
//! Main entry point for the document store. Owns the column registry and
//! index catalog for the lifetime of the handle and is the only writer of
//! the `documents` table.

use std::cell::Cell;
use std::path::Path;

use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;
use tracing::{debug, warn};

use super::document::{self, Document, ID_FIELD};
use super::error::{NoSqlError, Result};
use super::index::IndexCatalog;
use super::query::{ColumnResolver, Query, QueryBuilder};
use super::schema::{self, ColumnRegistry, ColumnType, ShadowColumn, JSON_COLUMN, TABLE};
use crate::engine::adapter::{SqlValue, SqliteAdapter, StorageAdapter};
use crate::engine::config::StoreConfig;

/// Schema-flexible JSON document store over a single relational table
pub struct DocumentStore {
    adapter: Box<dyn StorageAdapter>,

    /// Serializes callers; the cell is the current batch nesting depth
    writer: ReentrantMutex<Cell<usize>>,

    registry: Mutex<ColumnRegistry>,
    indexes: Mutex<IndexCatalog>,
}

impl DocumentStore {
    /// Open (or create) the store described by `config`
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Self::with_adapter(SqliteAdapter::open(config)?)
    }

    /// Open the store configured by `docstore.config.json` in `dir`
    pub fn open_dir(dir: &Path) -> Result<Self> {
        Self::open(&StoreConfig::load(dir)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_adapter(SqliteAdapter::in_memory()?)
    }

    /// Wrap an arbitrary storage adapter. Creates the documents table if it
    /// is missing and loads the persisted shadow columns.
    pub fn with_adapter(adapter: impl StorageAdapter + 'static) -> Result<Self> {
        adapter.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY NOT NULL, {} TEXT NOT NULL)",
                TABLE, JSON_COLUMN
            ),
            &[],
        )?;

        let mut registry = ColumnRegistry::new();
        registry.hydrate(&adapter.list_columns(TABLE)?);
        debug!(
            shadow_columns = registry.shadow_columns().len(),
            "opened document store"
        );

        Ok(Self {
            adapter: Box::new(adapter),
            writer: ReentrantMutex::new(Cell::new(0)),
            registry: Mutex::new(registry),
            indexes: Mutex::new(IndexCatalog::new()),
        })
    }

    /// Start a query over all documents
    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(self)
    }

    /// Write a document, replacing any document with the same id. With
    /// `merge`, top-level fields of an existing document that `value` lacks
    /// are kept. Returns the document id, generated if `value` had none.
    pub fn put(&self, value: Value, merge: bool) -> Result<String> {
        let (id, doc) = document::prepare(value)?;

        self.batch(|store| {
            let doc = if merge {
                match store.get(&id)? {
                    Some(existing) => document::merge(existing, doc),
                    None => doc,
                }
            } else {
                doc
            };
            store.write(&id, &doc)
        })?;

        Ok(id)
    }

    /// Fetch a document by id
    pub fn get(&self, id: &str) -> Result<Option<Document>> {
        self.query().filter(ID_FIELD, "==", id)?.get()
    }

    /// Delete a document by id. Returns whether it existed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let _guard = self.writer.lock();
        let res = self.adapter.execute(
            &format!("DELETE FROM {} WHERE id = ?", TABLE),
            &[SqlValue::Text(id.to_string())],
        )?;
        Ok(res.affected_rows > 0)
    }

    /// Total number of stored documents
    pub fn len(&self) -> Result<u64> {
        self.query().count()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Shadow columns materialized so far, in creation order
    pub fn shadow_columns(&self) -> Vec<ShadowColumn> {
        self.registry.lock().shadow_columns().to_vec()
    }

    /// Run `work` in one transaction.
    ///
    /// Commits when `work` succeeds. On failure everything it did is rolled
    /// back and its error is returned as is. If `work` panics the transaction
    /// is rolled back while unwinding. Nested calls join the outer
    /// transaction.
    pub fn batch<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Self) -> std::result::Result<T, E>,
        E: From<NoSqlError>,
    {
        let guard = self.writer.lock();
        let depth = guard.get();
        if depth > 0 {
            return work(self);
        }

        self.adapter.begin().map_err(NoSqlError::from)?;
        let scope = TransactionScope::enter(self, &guard);
        let outcome = work(self);
        scope.finish();

        match outcome {
            Ok(value) => {
                if let Err(e) = self.adapter.commit() {
                    self.roll_back();
                    return Err(NoSqlError::from(e).into());
                }
                Ok(value)
            }
            Err(e) => {
                self.roll_back();
                Err(e)
            }
        }
    }

    /// Abort the open transaction and forget schema learned inside it
    fn roll_back(&self) {
        if let Err(e) = self.adapter.rollback() {
            warn!(error = %e, "rollback failed");
        }

        match self.adapter.list_columns(TABLE) {
            Ok(columns) => {
                let mut registry = ColumnRegistry::new();
                registry.hydrate(&columns);
                *self.registry.lock() = registry;
            }
            Err(e) => warn!(error = %e, "could not reload columns after rollback"),
        }
        *self.indexes.lock() = IndexCatalog::new();
    }

    /// Upsert `doc` together with every registered shadow column
    fn write(&self, id: &str, doc: &Document) -> Result<()> {
        let columns = self.shadow_columns();

        let mut names = vec!["id".to_string(), JSON_COLUMN.to_string()];
        let mut params = vec![
            SqlValue::Text(id.to_string()),
            SqlValue::Text(serde_json::to_string(doc)?),
        ];
        for column in &columns {
            names.push(format!("\"{}\"", column.name));
            params.push(document::column_value(doc, column));
        }

        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            TABLE,
            names.join(", "),
            placeholders
        );
        self.adapter.execute(&sql, &params)?;
        Ok(())
    }

    pub(crate) fn select(&self, query: &Query) -> Result<Vec<Value>> {
        let _guard = self.writer.lock();
        let compiled = query.compile(self)?;
        let sql = compiled.select_sql();
        debug!(%sql, "select");

        let result = self.adapter.query(&sql, &compiled.params)?;
        Ok(result
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect())
    }

    pub(crate) fn delete(&self, query: &Query) -> Result<u64> {
        let _guard = self.writer.lock();
        let compiled = query.compile(self)?;
        let sql = compiled.delete_sql();
        debug!(%sql, "delete");

        Ok(self.adapter.execute(&sql, &compiled.params)?.affected_rows)
    }

    pub(crate) fn count(&self, query: &Query) -> Result<u64> {
        let _guard = self.writer.lock();
        let compiled = query.compile(self)?;
        let result = self.adapter.query(&compiled.count_sql(), &compiled.params)?;

        Ok(result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }
}

/// Open transaction on a store. Dropping it without `finish` (a panic in
/// the unit of work) resets the batch depth and rolls back.
struct TransactionScope<'a> {
    store: &'a DocumentStore,
    depth: &'a Cell<usize>,
    finished: bool,
}

impl<'a> TransactionScope<'a> {
    fn enter(store: &'a DocumentStore, depth: &'a Cell<usize>) -> Self {
        depth.set(1);
        Self {
            store,
            depth,
            finished: false,
        }
    }

    fn finish(mut self) {
        self.finished = true;
        self.depth.set(0);
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.depth.set(0);
        warn!("batch unwound without finishing, rolling back");
        self.store.roll_back();
    }
}

impl ColumnResolver for DocumentStore {
    fn ensure_column(&self, field: &str, column_type: ColumnType) -> Result<String> {
        let name = ColumnRegistry::column_name(field, column_type);
        {
            let registry = self.registry.lock();
            if registry.contains(&name) {
                return Ok(name);
            }
            if let Some(existing) = registry.conflicting(&name) {
                return Err(NoSqlError::InvalidFilter(format!(
                    "field '{}' collides with column '{}'; column names ignore case",
                    field, existing
                )));
            }
        }

        let column = ShadowColumn::new(field, column_type);
        self.batch(|store| schema::add_column(store.adapter.as_ref(), &column))?;
        self.registry.lock().register(column);
        Ok(name)
    }

    fn ensure_index(&self, filter_columns: &[String], sort_column: Option<&str>) -> Result<()> {
        self.indexes
            .lock()
            .ensure_index(self.adapter.as_ref(), filter_columns, sort_column)
    }
}
