//! Query engine for NoSQL documents
//!
//! A [`Query`] describes conjunctive filters, an optional sort key and
//! offset/limit pagination over document fields. Compiling it resolves each
//! field to its shadow column (creating the column on first use) and yields a
//! parameterized clause shared by the SELECT, DELETE and COUNT statements.

use serde_json::Value;

use super::document::{Document, ID_FIELD};
use super::error::{NoSqlError, Result};
use super::schema::{self, ColumnType, JSON_COLUMN, TABLE};
use super::storage::DocumentStore;
use crate::engine::adapter::SqlValue;

/// Comparison operators accepted by `filter`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl FilterOp {
    pub fn parse(op: &str) -> Result<Self> {
        match op {
            "==" => Ok(FilterOp::Eq),
            "!=" => Ok(FilterOp::Ne),
            "<" => Ok(FilterOp::Lt),
            "<=" => Ok(FilterOp::Lte),
            ">" => Ok(FilterOp::Gt),
            ">=" => Ok(FilterOp::Gte),
            "" => Err(NoSqlError::InvalidFilter("operator cannot be empty".to_string())),
            other => Err(NoSqlError::InvalidFilter(format!("unsupported operator '{}'", other))),
        }
    }

    pub fn to_sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
        }
    }
}

/// Filter operand. Its variant decides the declared column type.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Number(f64),
}

impl FilterValue {
    pub fn column_type(&self) -> ColumnType {
        match self {
            FilterValue::Text(_) => ColumnType::Text,
            FilterValue::Number(_) => ColumnType::Real,
        }
    }

    fn to_sql_value(&self) -> SqlValue {
        match self {
            FilterValue::Text(s) => SqlValue::Text(s.clone()),
            FilterValue::Number(n) => SqlValue::Real(*n),
        }
    }

    /// Bind as text; `5` becomes "5" and `2.5` becomes "2.5"
    fn to_text_sql_value(&self) -> SqlValue {
        match self {
            FilterValue::Text(s) => SqlValue::Text(s.clone()),
            FilterValue::Number(n) => SqlValue::Text(n.to_string()),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::Text(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        FilterValue::Text(s)
    }
}

impl From<&String> for FilterValue {
    fn from(s: &String) -> Self {
        FilterValue::Text(s.clone())
    }
}

impl From<f64> for FilterValue {
    fn from(n: f64) -> Self {
        FilterValue::Number(n)
    }
}

impl From<i64> for FilterValue {
    fn from(n: i64) -> Self {
        FilterValue::Number(n as f64)
    }
}

impl From<i32> for FilterValue {
    fn from(n: i32) -> Self {
        FilterValue::Number(n.into())
    }
}

/// A single filter condition
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub ascending: bool,
    pub column_type: ColumnType,
}

/// Query description: filters are ANDed, at most one sort key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub sort: Option<Sort>,
    /// `None` is unbounded
    pub limit: Option<u64>,
    pub offset: u64,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, field: &str, op: &str, value: impl Into<FilterValue>) -> Result<Self> {
        schema::validate_field(field)?;
        let op = FilterOp::parse(op)?;
        self.filters.push(Filter {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        Ok(self)
    }

    pub fn with_sort(mut self, field: &str, ascending: bool, numeric: bool) -> Result<Self> {
        schema::validate_field(field)?;
        self.sort = Some(Sort {
            field: field.to_string(),
            ascending,
            column_type: ColumnType::from_numeric(numeric),
        });
        Ok(self)
    }

    /// `-1` means unbounded; any other negative value is rejected
    pub fn with_limit(mut self, limit: i64) -> Result<Self> {
        self.limit = match limit {
            -1 => None,
            n if n < 0 => {
                return Err(NoSqlError::InvalidPagination(format!("limit cannot be {}", n)))
            }
            n => Some(n as u64),
        };
        Ok(self)
    }

    pub fn with_offset(mut self, offset: i64) -> Result<Self> {
        if offset < 0 {
            return Err(NoSqlError::InvalidPagination(format!("offset cannot be {}", offset)));
        }
        self.offset = offset as u64;
        Ok(self)
    }

    /// No filters and no sort: nothing to materialize or index
    pub fn is_clauseless(&self) -> bool {
        self.filters.is_empty() && self.sort.is_none()
    }

    /// Translate into a parameterized clause.
    ///
    /// Every filter and sort field is resolved through `columns`, which may
    /// add the column to the table. Values are never inlined into the SQL.
    pub fn compile(&self, columns: &impl ColumnResolver) -> Result<CompiledQuery> {
        let mut params = Vec::new();
        let mut where_clause = String::new();
        let mut tail = String::new();

        let mut filter_columns = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            let column = columns.ensure_column(&filter.field, filter.value.column_type())?;
            filter_columns.push(column);
            // ids are strings in a TEXT primary key
            params.push(if filter.field == ID_FIELD {
                filter.value.to_text_sql_value()
            } else {
                filter.value.to_sql_value()
            });
        }
        if !filter_columns.is_empty() {
            let parts: Vec<String> = filter_columns
                .iter()
                .zip(&self.filters)
                .map(|(column, filter)| format!("\"{}\" {} ?", column, filter.op.to_sql()))
                .collect();
            where_clause = format!(" WHERE {}", parts.join(" AND "));
        }

        let mut sort_column = None;
        if let Some(ref sort) = self.sort {
            let column = columns.ensure_column(&sort.field, sort.column_type)?;
            tail.push_str(&format!(
                " ORDER BY \"{}\" {}",
                column,
                if sort.ascending { "ASC" } else { "DESC" }
            ));
            sort_column = Some(column);
        }

        match (self.limit, self.offset) {
            (Some(limit), _) => {
                tail.push_str(" LIMIT ?");
                params.push(SqlValue::Integer(limit as i64));
            }
            // SQLite only accepts OFFSET after a LIMIT
            (None, offset) if offset > 0 => tail.push_str(" LIMIT -1"),
            _ => {}
        }
        if self.offset > 0 {
            tail.push_str(" OFFSET ?");
            params.push(SqlValue::Integer(self.offset as i64));
        }

        if !self.is_clauseless() {
            columns.ensure_index(&filter_columns, sort_column.as_deref())?;
        }

        Ok(CompiledQuery {
            where_clause,
            tail,
            params,
        })
    }
}

/// Resolves fields to columns and indexes while a query compiles
pub trait ColumnResolver {
    fn ensure_column(&self, field: &str, column_type: ColumnType) -> Result<String>;

    fn ensure_index(&self, filter_columns: &[String], sort_column: Option<&str>) -> Result<()>;
}

/// WHERE clause, ordering and pagination plus their bound values
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub where_clause: String,
    /// ORDER BY / LIMIT / OFFSET
    pub tail: String,
    pub params: Vec<SqlValue>,
}

impl CompiledQuery {
    pub fn select_sql(&self) -> String {
        format!("SELECT {} FROM {}{}{}", JSON_COLUMN, TABLE, self.where_clause, self.tail)
    }

    pub fn delete_sql(&self) -> String {
        if self.tail.is_empty() {
            format!("DELETE FROM {}{}", TABLE, self.where_clause)
        } else {
            format!(
                "DELETE FROM {} WHERE id IN (SELECT id FROM {}{}{})",
                TABLE, TABLE, self.where_clause, self.tail
            )
        }
    }

    pub fn count_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) FROM (SELECT 1 FROM {}{}{})",
            TABLE, self.where_clause, self.tail
        )
    }
}

/// Chainable query over a [`DocumentStore`].
///
/// Each step consumes the builder and returns a new one; nothing touches the
/// database until a terminal call. Every terminal call compiles afresh.
#[derive(Clone)]
pub struct QueryBuilder<'a> {
    store: &'a DocumentStore,
    query: Query,
}

impl<'a> QueryBuilder<'a> {
    pub(crate) fn new(store: &'a DocumentStore) -> Self {
        Self {
            store,
            query: Query::new(),
        }
    }

    pub fn filter(self, field: &str, op: &str, value: impl Into<FilterValue>) -> Result<Self> {
        let Self { store, query } = self;
        Ok(Self {
            store,
            query: query.with_filter(field, op, value)?,
        })
    }

    pub fn sort(self, field: &str, ascending: bool, numeric: bool) -> Result<Self> {
        let Self { store, query } = self;
        Ok(Self {
            store,
            query: query.with_sort(field, ascending, numeric)?,
        })
    }

    pub fn limit(self, limit: i64) -> Result<Self> {
        let Self { store, query } = self;
        Ok(Self {
            store,
            query: query.with_limit(limit)?,
        })
    }

    pub fn offset(self, offset: i64) -> Result<Self> {
        let Self { store, query } = self;
        Ok(Self {
            store,
            query: query.with_offset(offset)?,
        })
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// All matching documents
    pub fn list(&self) -> Result<Vec<Document>> {
        self.iter()?.collect()
    }

    /// Matching documents, decoded as they are consumed
    pub fn iter(&self) -> Result<Documents> {
        let rows = self.store.select(&self.query)?;
        Ok(Documents {
            rows: rows.into_iter(),
        })
    }

    /// First matching document, if any
    pub fn get(&self) -> Result<Option<Document>> {
        let query = self.query.clone().with_limit(1)?;
        let rows = self.store.select(&query)?;
        rows.into_iter().next().map(decode).transpose()
    }

    /// Delete every match, returning how many rows went away
    pub fn remove(&self) -> Result<u64> {
        self.store.delete(&self.query)
    }

    pub fn count(&self) -> Result<u64> {
        self.store.count(&self.query)
    }
}

/// Iterator over the `_json` payloads of a query result
pub struct Documents {
    rows: std::vec::IntoIter<Value>,
}

impl Iterator for Documents {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next().map(decode)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

fn decode(raw: Value) -> Result<Document> {
    let Value::String(json) = raw else {
        return Err(NoSqlError::InvalidDocument(format!(
            "stored payload is not text: {}",
            raw
        )));
    };
    match serde_json::from_str(&json)? {
        Value::Object(doc) => Ok(doc),
        other => Err(NoSqlError::InvalidDocument(format!(
            "stored payload is not an object: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Records resolutions without a database behind it
    #[derive(Default)]
    struct RecordingResolver {
        columns: RefCell<Vec<String>>,
        indexes: RefCell<Vec<(Vec<String>, Option<String>)>>,
    }

    impl ColumnResolver for RecordingResolver {
        fn ensure_column(&self, field: &str, column_type: ColumnType) -> Result<String> {
            let name = schema::ColumnRegistry::column_name(field, column_type);
            self.columns.borrow_mut().push(name.clone());
            Ok(name)
        }

        fn ensure_index(&self, filter_columns: &[String], sort_column: Option<&str>) -> Result<()> {
            self.indexes
                .borrow_mut()
                .push((filter_columns.to_vec(), sort_column.map(str::to_string)));
            Ok(())
        }
    }

    #[test]
    fn test_filter_validation() {
        assert!(matches!(
            Query::new().with_filter("", "==", "x"),
            Err(NoSqlError::InvalidFilter(_))
        ));
        assert!(matches!(
            Query::new().with_filter("a", "", "x"),
            Err(NoSqlError::InvalidFilter(_))
        ));
        assert!(matches!(
            Query::new().with_filter("a", "LIKE", "x"),
            Err(NoSqlError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_pagination_validation() {
        assert_eq!(Query::new().with_limit(-1).unwrap().limit, None);
        assert_eq!(Query::new().with_limit(0).unwrap().limit, Some(0));
        assert!(matches!(
            Query::new().with_limit(-2),
            Err(NoSqlError::InvalidPagination(_))
        ));
        assert!(matches!(
            Query::new().with_offset(-1),
            Err(NoSqlError::InvalidPagination(_))
        ));
    }

    #[test]
    fn test_compile_full_query() {
        let resolver = RecordingResolver::default();
        let compiled = Query::new()
            .with_filter("type", "==", "batched")
            .unwrap()
            .with_filter("index", ">=", 100)
            .unwrap()
            .with_sort("index", false, true)
            .unwrap()
            .with_limit(2)
            .unwrap()
            .with_offset(5)
            .unwrap()
            .compile(&resolver)
            .unwrap();

        assert_eq!(
            compiled.select_sql(),
            "SELECT _json FROM documents WHERE \"type_TEXT\" = ? AND \"index_REAL\" >= ? \
             ORDER BY \"index_REAL\" DESC LIMIT ? OFFSET ?"
        );
        assert_eq!(
            compiled.params,
            vec![
                SqlValue::Text("batched".into()),
                SqlValue::Real(100.0),
                SqlValue::Integer(2),
                SqlValue::Integer(5),
            ]
        );
        assert_eq!(
            resolver.indexes.borrow().as_slice(),
            &[(
                vec!["type_TEXT".to_string(), "index_REAL".to_string()],
                Some("index_REAL".to_string())
            )]
        );
    }

    #[test]
    fn test_clauseless_query_skips_columns_and_indexes() {
        let resolver = RecordingResolver::default();
        let compiled = Query::new().with_limit(10).unwrap().compile(&resolver).unwrap();

        assert_eq!(compiled.select_sql(), "SELECT _json FROM documents LIMIT ?");
        assert!(resolver.columns.borrow().is_empty());
        assert!(resolver.indexes.borrow().is_empty());
    }

    #[test]
    fn test_offset_without_limit() {
        let compiled = Query::new()
            .with_offset(3)
            .unwrap()
            .compile(&RecordingResolver::default())
            .unwrap();
        assert_eq!(compiled.select_sql(), "SELECT _json FROM documents LIMIT -1 OFFSET ?");
        assert_eq!(compiled.params, vec![SqlValue::Integer(3)]);
    }

    #[test]
    fn test_values_are_bound_not_inlined() {
        let hostile = "x'; DROP TABLE documents; --";
        let compiled = Query::new()
            .with_filter("name", "==", hostile)
            .unwrap()
            .compile(&RecordingResolver::default())
            .unwrap();

        assert!(!compiled.select_sql().contains("DROP"));
        assert_eq!(compiled.params, vec![SqlValue::Text(hostile.to_string())]);
    }

    #[test]
    fn test_numeric_id_filter_binds_text() {
        let compiled = Query::new()
            .with_filter("id", "==", 5)
            .unwrap()
            .with_filter("id", "!=", 2.5)
            .unwrap()
            .compile(&RecordingResolver::default())
            .unwrap();

        assert_eq!(
            compiled.select_sql(),
            "SELECT _json FROM documents WHERE \"id\" = ? AND \"id\" != ?"
        );
        assert_eq!(
            compiled.params,
            vec![SqlValue::Text("5".to_string()), SqlValue::Text("2.5".to_string())]
        );
    }

    #[test]
    fn test_delete_and_count_share_clause() {
        let plain = Query::new()
            .with_filter("type", "!=", "x")
            .unwrap()
            .compile(&RecordingResolver::default())
            .unwrap();
        assert_eq!(plain.delete_sql(), "DELETE FROM documents WHERE \"type_TEXT\" != ?");
        assert_eq!(
            plain.count_sql(),
            "SELECT COUNT(*) FROM (SELECT 1 FROM documents WHERE \"type_TEXT\" != ?)"
        );

        let paged = Query::new()
            .with_filter("type", "!=", "x")
            .unwrap()
            .with_limit(5)
            .unwrap()
            .compile(&RecordingResolver::default())
            .unwrap();
        assert_eq!(
            paged.delete_sql(),
            "DELETE FROM documents WHERE id IN (SELECT id FROM documents WHERE \"type_TEXT\" != ? LIMIT ?)"
        );
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        assert!(decode(Value::String("[1]".into())).is_err());
        assert!(decode(Value::Null).is_err());
        assert!(decode(Value::String("{\"id\":\"a\"}".into())).is_ok());
    }
}
