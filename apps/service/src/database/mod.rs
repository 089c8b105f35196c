/// Storage collaborator
///
/// This module provides the `Store` trait consumed by the recorder and the
/// aggregate queries, with a LibSQL implementation for the binary and an
/// in-memory one for ephemeral runs and tests.

pub mod memory;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod repository;

pub use memory::MemoryStore;
pub use models::{Failure, FailureQuery, Hit, HitStats};
pub use repository::{LibsqlStore, Store};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database query failed: {0}")]
    Query(#[from] libsql::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] deadpool::managed::PoolError<libsql::Error>),

    #[error("Database setup failed: {0}")]
    Setup(String),

    #[error("Stored row is malformed: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
