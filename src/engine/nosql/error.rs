//! NoSQL Error Types

use thiserror::Error;

use crate::engine::adapter::AdapterError;
use crate::engine::config::ConfigError;

#[derive(Error, Debug)]
pub enum NoSqlError {
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Invalid document id: {0}")]
    InvalidId(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid pagination: {0}")]
    InvalidPagination(String),

    #[error("Storage failure: {0}")]
    Storage(#[from] AdapterError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, NoSqlError>;
