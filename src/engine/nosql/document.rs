//! Document representation for NoSQL storage
//!
//! A document is a plain JSON object. Its `id` field is the primary key and
//! must be a string; everything else is free-form.

use serde_json::{Map, Value};
use uuid::Uuid;

use super::error::{NoSqlError, Result};
use super::schema::{ColumnType, ShadowColumn};
use crate::engine::adapter::SqlValue;

pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "id";

/// Turn an arbitrary JSON value into a storable document with a string id.
///
/// Generates an id when the object has none.
pub fn prepare(value: Value) -> Result<(String, Document)> {
    let mut doc = match value {
        Value::Object(map) => map,
        Value::Null => return Err(NoSqlError::InvalidDocument("document is null".to_string())),
        other => {
            return Err(NoSqlError::InvalidDocument(format!(
                "expected a JSON object, got {}",
                kind(&other)
            )))
        }
    };

    let id = match doc.get(ID_FIELD) {
        None => {
            let id = generate_id();
            doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            id
        }
        Some(Value::String(id)) => id.clone(),
        Some(other) => {
            return Err(NoSqlError::InvalidId(format!(
                "id must be a string, got {}",
                kind(other)
            )))
        }
    };

    Ok((id, doc))
}

/// Overlay `overlay`'s top-level fields onto `base`. Nested values are
/// replaced wholesale.
pub fn merge(mut base: Document, overlay: Document) -> Document {
    for (key, value) in overlay {
        base.insert(key, value);
    }
    base
}

/// Value of `column`'s field in `doc`, shaped for the column's type.
/// Absent and non-scalar values are NULL.
pub fn column_value(doc: &Document, column: &ShadowColumn) -> SqlValue {
    let Some(value) = doc.get(&column.field) else {
        return SqlValue::Null;
    };

    match (column.column_type, value) {
        (ColumnType::Text, Value::String(s)) => SqlValue::Text(s.clone()),
        (ColumnType::Text, Value::Number(n)) => SqlValue::Text(n.to_string()),
        (ColumnType::Text, Value::Bool(b)) => SqlValue::Text(b.to_string()),
        (ColumnType::Real, Value::Number(n)) => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        (ColumnType::Real, Value::String(s)) => {
            s.trim().parse::<f64>().map_or(SqlValue::Null, SqlValue::Real)
        }
        (ColumnType::Real, Value::Bool(b)) => SqlValue::Real(if *b { 1.0 } else { 0.0 }),
        _ => SqlValue::Null,
    }
}

/// Generate a globally unique document id
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
