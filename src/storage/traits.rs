//! Storage traits and error types
//!
//! This module defines the trait interface for the document store and the
//! error type shared by every persistence backend in the crate.

use crate::storage::{BulkWriteOutcome, CatalogRecord, SubRecord};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for document store implementations
///
/// Catalog records are matched on their slug; sub-records on
/// `(parent_id, sequence)`. Bulk writes commit every operation that does not
/// hit a unique constraint and count the ones that do as duplicates.
pub trait CatalogStore: Send {
    /// Loads every known natural key with the source update time stored for it
    ///
    /// This backs the per-session dedup cache.
    fn load_known_keys(&self) -> StorageResult<HashMap<String, Option<DateTime<Utc>>>>;

    /// Inserts or updates catalog records in one transaction
    fn bulk_upsert_records(&mut self, records: &[CatalogRecord]) -> StorageResult<BulkWriteOutcome>;

    /// Resolves the persisted id of a record by slug
    fn find_record_id(&self, slug: &str) -> StorageResult<Option<i64>>;

    /// Gets a record by slug
    fn get_record(&self, slug: &str) -> StorageResult<Option<CatalogRecord>>;

    /// Inserts or updates sub-records in one transaction
    fn bulk_upsert_sub_records(
        &mut self,
        sub_records: &[SubRecord],
    ) -> StorageResult<BulkWriteOutcome>;

    /// Gets the ordered sub-records of a parent
    fn get_sub_records(&self, parent_id: i64) -> StorageResult<Vec<SubRecord>>;

    /// Counts records, optionally restricted to one category
    fn count_records(&self, category: Option<&str>) -> StorageResult<u64>;

    /// Counts all sub-records
    fn count_sub_records(&self) -> StorageResult<u64>;
}
