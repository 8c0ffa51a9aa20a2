//! Storage module for persisting crawled catalog data
//!
//! This module owns the document store the pipeline writes into:
//! - SQLite database initialization and schema management
//! - Bulk upserts of catalog records keyed by slug
//! - Bulk upserts of sub-records keyed by parent and sequence
//! - Natural key loading for session-scoped deduplication

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteCatalogStore;
pub use traits::{CatalogStore, StorageError, StorageResult};

use chrono::{DateTime, Utc};
use std::path::Path;

/// Opens (or creates) the document store at the given path
pub fn open_catalog_store(path: &Path) -> StorageResult<SqliteCatalogStore> {
    SqliteCatalogStore::new(path)
}

/// A catalog record as persisted in the document store
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
    /// Natural key used for upsert matching
    pub slug: String,
    /// Identifier assigned by the source; may collide across categories
    pub source_id: String,
    pub category: String,
    pub name: String,
    pub origin_name: Option<String>,
    pub description: Option<String>,
    pub thumb_url: Option<String>,
    pub status: Option<String>,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    pub view_count: u64,
    pub rating: f64,
    pub source_updated_at: Option<DateTime<Utc>>,
    pub sub_record_count: u32,
}

/// One entry of a record's flattened sub-record list
#[derive(Debug, Clone, PartialEq)]
pub struct SubRecord {
    pub parent_id: i64,
    /// 1-based position in the flattened list
    pub sequence: u32,
    pub slug: String,
    pub name: String,
    pub title: Option<String>,
    /// Source group the entry was listed under
    pub group_name: Option<String>,
    pub source_url: Option<String>,
    /// Detail payload as JSON text, when fetched
    pub content: Option<String>,
}

/// Result of one bulk write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteOutcome {
    pub inserted: usize,
    pub updated: usize,
    /// Operations rejected by a unique constraint
    pub duplicates: usize,
    /// Operations rejected for any other constraint
    pub failed: usize,
}

impl BulkWriteOutcome {
    /// Operations that were committed
    pub fn committed(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn merge(&mut self, other: &BulkWriteOutcome) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.duplicates += other.duplicates;
        self.failed += other.failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_merge() {
        let mut total = BulkWriteOutcome::default();
        total.merge(&BulkWriteOutcome {
            inserted: 3,
            updated: 1,
            duplicates: 1,
            failed: 0,
        });
        total.merge(&BulkWriteOutcome {
            inserted: 2,
            updated: 0,
            duplicates: 0,
            failed: 1,
        });
        assert_eq!(total.committed(), 6);
        assert_eq!(total.duplicates, 1);
        assert_eq!(total.failed, 1);
    }
}
