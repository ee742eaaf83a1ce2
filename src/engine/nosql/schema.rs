//! Shadow-column schema for the documents table
//!
//! Every JSON field that shows up in a filter or sort gets materialized as a
//! relational column named `<field>_<TEXT|REAL>`. The registry remembers which
//! of those exist; `add_column` creates and backfills a missing one.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::document::{self, ID_FIELD};
use super::error::{NoSqlError, Result};
use crate::engine::adapter::{AdapterError, SqlValue, StorageAdapter};

pub const TABLE: &str = "documents";
pub const JSON_COLUMN: &str = "_json";

/// Declared type of a shadow column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    Real,
}

impl ColumnType {
    pub fn from_numeric(numeric: bool) -> Self {
        if numeric {
            ColumnType::Real
        } else {
            ColumnType::Text
        }
    }

    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Real => "REAL",
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "TEXT" => Some(ColumnType::Text),
            "REAL" => Some(ColumnType::Real),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_type())
    }
}

/// One materialized (field, type) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowColumn {
    pub field: String,
    pub column_type: ColumnType,
    pub name: String,
}

impl ShadowColumn {
    pub fn new(field: &str, column_type: ColumnType) -> Self {
        Self {
            field: field.to_string(),
            column_type,
            name: format!("{}_{}", field, column_type),
        }
    }

    /// Recover a shadow column from a persisted column name
    pub fn parse(name: &str) -> Option<Self> {
        let (field, suffix) = name.rsplit_once('_')?;
        let column_type = ColumnType::from_suffix(suffix)?;
        if field.is_empty() {
            return None;
        }
        Some(Self::new(field, column_type))
    }
}

/// Check that `field` can be used as part of a column identifier
pub fn validate_field(field: &str) -> Result<()> {
    if field.is_empty() {
        return Err(NoSqlError::InvalidFilter("field cannot be empty".to_string()));
    }
    if !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(NoSqlError::InvalidFilter(format!(
            "field '{}' must contain only ASCII letters, digits and '_'",
            field
        )));
    }
    Ok(())
}

/// Known columns of the documents table, keyed by (field, declared type)
#[derive(Debug)]
pub struct ColumnRegistry {
    known: HashSet<String>,
    /// ASCII-lowercased name -> registered name; SQLite column names ignore case
    folded: HashMap<String, String>,
    shadows: Vec<ShadowColumn>,
}

impl Default for ColumnRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ColumnRegistry {
    pub fn new() -> Self {
        let mut known = HashSet::new();
        known.insert(ID_FIELD.to_string());
        let mut folded = HashMap::new();
        folded.insert(ID_FIELD.to_string(), ID_FIELD.to_string());
        Self {
            known,
            folded,
            shadows: Vec::new(),
        }
    }

    /// Seed the registry from the table's persisted columns
    pub fn hydrate(&mut self, columns: &[String]) {
        for name in columns {
            if name == ID_FIELD || name == JSON_COLUMN {
                continue;
            }
            match ShadowColumn::parse(name) {
                Some(column) => {
                    self.register(column);
                }
                None => warn!(column = %name, "ignoring column outside the shadow naming scheme"),
            }
        }
    }

    /// Canonical column name for a field used with the given type.
    /// The id field always maps to the primary key.
    pub fn column_name(field: &str, column_type: ColumnType) -> String {
        if field == ID_FIELD {
            ID_FIELD.to_string()
        } else {
            ShadowColumn::new(field, column_type).name
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.known.contains(name)
    }

    /// A registered column that SQLite would treat as the same column as
    /// `name` without being `name` itself
    pub fn conflicting(&self, name: &str) -> Option<&str> {
        self.folded
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|existing| *existing != name)
    }

    /// Returns false if the column, or one differing only in case, was
    /// already registered
    pub fn register(&mut self, column: ShadowColumn) -> bool {
        let folded = column.name.to_ascii_lowercase();
        if self.folded.contains_key(&folded) {
            return false;
        }
        self.folded.insert(folded, column.name.clone());
        self.known.insert(column.name.clone());
        self.shadows.push(column);
        true
    }

    /// Shadow columns in registration order
    pub fn shadow_columns(&self) -> &[ShadowColumn] {
        &self.shadows
    }
}

/// Add `column` to the documents table and backfill it from `_json`.
///
/// Must run inside a transaction. A column that already exists under the
/// exact same name is taken as created and backfilled by whoever won the
/// race. One that differs only in case belongs to another field and is an
/// `InvalidFilter`.
pub fn add_column(adapter: &dyn StorageAdapter, column: &ShadowColumn) -> Result<()> {
    let sql = format!(
        "ALTER TABLE {} ADD COLUMN \"{}\" {}",
        TABLE,
        column.name,
        column.column_type.sql_type()
    );

    match adapter.execute(&sql, &[]) {
        Ok(_) => {}
        Err(AdapterError::ColumnExists(msg)) => {
            let columns = adapter.list_columns(TABLE)?;
            if columns.iter().any(|c| *c == column.name) {
                debug!(column = %column.name, %msg, "column already present, skipping backfill");
                return Ok(());
            }
            return Err(NoSqlError::InvalidFilter(format!(
                "field '{}' collides with an existing column differing only in case",
                column.field
            )));
        }
        Err(e) => return Err(e.into()),
    }

    let filled = backfill(adapter, column)?;
    info!(column = %column.name, rows = filled, "added shadow column");
    Ok(())
}

/// Populate `column` for every existing row. Returns the number of rows
/// that received a non-NULL value.
fn backfill(adapter: &dyn StorageAdapter, column: &ShadowColumn) -> Result<usize> {
    let rows = adapter.query(&format!("SELECT id, {} FROM {}", JSON_COLUMN, TABLE), &[])?;
    let update = format!("UPDATE {} SET \"{}\" = ? WHERE id = ?", TABLE, column.name);

    let mut filled = 0;
    for row in rows.rows {
        let (Some(Value::String(id)), Some(Value::String(json))) = (row.first(), row.get(1)) else {
            continue;
        };
        let Value::Object(doc) = serde_json::from_str::<Value>(json)? else {
            continue;
        };

        let value = document::column_value(&doc, column);
        if value == SqlValue::Null {
            continue;
        }
        adapter.execute(&update, &[value, SqlValue::Text(id.clone())])?;
        filled += 1;
    }

    Ok(filled)
}
