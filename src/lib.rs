//! AirDB DocStore - schema-flexible JSON document store on SQLite
//!
//! Documents live as JSON in a single table. Fields that queries filter or
//! sort on are materialized into typed shadow columns the first time they are
//! used, and indexed per query shape.

pub mod engine;

pub use engine::adapter::{AdapterError, SqlValue};
pub use engine::config::{ConfigError, StoreConfig};
pub use engine::nosql::{Document, DocumentStore, NoSqlError, QueryBuilder, Result};
