// AirDB DocStore Engine - Core module structure
pub mod adapter;
pub mod config;
pub mod nosql;

pub use adapter::{SqliteAdapter, StorageAdapter};
pub use config::StoreConfig;
pub use nosql::DocumentStore;
