//! Composite index memoization per query shape

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use tracing::info;

use super::document::ID_FIELD;
use super::error::Result;
use super::schema::TABLE;
use crate::engine::adapter::StorageAdapter;

/// Signatures of the indexes created through this store handle
#[derive(Debug, Default)]
pub struct IndexCatalog {
    created: HashSet<String>,
}

impl IndexCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure an index over `filter_columns` followed by `sort_column`
    /// exists. The primary key is already indexed and is left out, so a
    /// query touching only `id` (or nothing) needs no index.
    pub fn ensure_index(
        &mut self,
        adapter: &dyn StorageAdapter,
        filter_columns: &[String],
        sort_column: Option<&str>,
    ) -> Result<()> {
        let mut columns: Vec<&str> = Vec::with_capacity(filter_columns.len() + 1);
        for column in filter_columns.iter().map(String::as_str).chain(sort_column) {
            if column != ID_FIELD && !columns.contains(&column) {
                columns.push(column);
            }
        }
        if columns.is_empty() {
            return Ok(());
        }

        let signature = columns.join(",");
        if self.created.contains(&signature) {
            return Ok(());
        }

        let name = index_name(&signature);
        let quoted: Vec<String> = columns.iter().map(|c| format!("\"{}\"", c)).collect();
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            name,
            TABLE,
            quoted.join(", ")
        );
        adapter.execute(&sql, &[])?;

        info!(index = %name, %signature, "ensured index");
        self.created.insert(signature);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.created.len()
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
    }
}

/// Deterministic index name for a signature
pub fn index_name(signature: &str) -> String {
    let digest = Sha256::digest(signature.as_bytes());
    format!("idx_{}_{}", TABLE, &hex::encode(digest)[..16])
}
