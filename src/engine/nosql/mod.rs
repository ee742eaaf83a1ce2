//! AirDB NoSQL Engine
//! 
//! JSON documents stored in one SQLite table:
//! - `_json` holds the full document and is the source of truth
//! - fields used in filters or sorts get shadow columns, added and
//!   backfilled on first use
//! - composite indexes are created per query shape and memoized
//! - writes, merges and schema changes share one transactional batch

pub mod storage;
pub mod schema;
pub mod index;
pub mod document;
pub mod query;
pub mod error;

pub use storage::DocumentStore;
pub use schema::{ColumnRegistry, ColumnType, ShadowColumn};
pub use index::IndexCatalog;
pub use document::Document;
pub use query::{CompiledQuery, Documents, Filter, FilterOp, FilterValue, Query, QueryBuilder, Sort};
pub use error::{NoSqlError, Result};
