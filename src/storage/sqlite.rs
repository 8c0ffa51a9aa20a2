//! SQLite document store implementation
//!
//! This module provides a SQLite-based implementation of the CatalogStore trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{CatalogStore, StorageError, StorageResult};
use crate::storage::{BulkWriteOutcome, CatalogRecord, SubRecord};
use chrono::{DateTime, Utc};
use rusqlite::{ffi, params, Connection, OptionalExtension, Row};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

/// How long a writer waits for another worker's transaction
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// SQLite document store
pub struct SqliteCatalogStore {
    conn: Connection,
}

/// How a single statement inside a bulk write ended
enum OperationResult {
    Committed,
    Duplicate,
    Rejected,
}

impl SqliteCatalogStore {
    /// Opens or creates the document store
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteCatalogStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Every worker holds its own connection to the same file
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

/// Sorts a statement error into duplicate, rejected, or fatal
fn classify_write_error(error: rusqlite::Error) -> StorageResult<OperationResult> {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            if failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            {
                Ok(OperationResult::Duplicate)
            } else {
                tracing::warn!("Rejected write: {}", error);
                Ok(OperationResult::Rejected)
            }
        }
        _ => Err(StorageError::Sqlite(error)),
    }
}

fn tally(outcome: &mut BulkWriteOutcome, existed: bool, result: OperationResult) {
    match result {
        OperationResult::Committed if existed => outcome.updated += 1,
        OperationResult::Committed => outcome.inserted += 1,
        OperationResult::Duplicate => outcome.duplicates += 1,
        OperationResult::Rejected => outcome.failed += 1,
    }
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|s| s.parse::<DateTime<Utc>>().ok())
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogRecord> {
    let genres: String = row.get(9)?;
    Ok(CatalogRecord {
        slug: row.get(0)?,
        source_id: row.get(1)?,
        category: row.get(2)?,
        name: row.get(3)?,
        origin_name: row.get(4)?,
        description: row.get(5)?,
        thumb_url: row.get(6)?,
        status: row.get(7)?,
        year: row.get(8)?,
        genres: serde_json::from_str(&genres).unwrap_or_default(),
        view_count: row.get::<_, i64>(10)? as u64,
        rating: row.get(11)?,
        source_updated_at: parse_timestamp(row.get(12)?),
        sub_record_count: row.get(13)?,
    })
}

impl CatalogStore for SqliteCatalogStore {
    fn load_known_keys(&self) -> StorageResult<HashMap<String, Option<DateTime<Utc>>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT slug, source_updated_at FROM records")?;

        let rows = stmt.query_map([], |row| {
            let slug: String = row.get(0)?;
            let updated: Option<String> = row.get(1)?;
            Ok((slug, parse_timestamp(updated)))
        })?;

        let mut keys = HashMap::new();
        for row in rows {
            let (slug, updated) = row?;
            keys.insert(slug, updated);
        }

        Ok(keys)
    }

    fn bulk_upsert_records(
        &mut self,
        records: &[CatalogRecord],
    ) -> StorageResult<BulkWriteOutcome> {
        let mut outcome = BulkWriteOutcome::default();
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        {
            let mut exists_stmt = tx.prepare("SELECT 1 FROM records WHERE slug = ?1")?;
            let mut upsert_stmt = tx.prepare(
                "INSERT INTO records (slug, source_id, category, name, origin_name, description,
                 thumb_url, status, year, genres, view_count, rating, source_updated_at,
                 sub_record_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
                 ON CONFLICT(slug) DO UPDATE SET
                    source_id = excluded.source_id,
                    category = excluded.category,
                    name = excluded.name,
                    origin_name = excluded.origin_name,
                    description = excluded.description,
                    thumb_url = excluded.thumb_url,
                    status = excluded.status,
                    year = excluded.year,
                    genres = excluded.genres,
                    view_count = MAX(records.view_count, excluded.view_count),
                    rating = excluded.rating,
                    source_updated_at = excluded.source_updated_at,
                    updated_at = excluded.updated_at",
            )?;

            for record in records {
                let existed = exists_stmt
                    .query_row(params![record.slug], |_| Ok(()))
                    .optional()?
                    .is_some();

                let genres = serde_json::to_string(&record.genres)?;
                let result = match upsert_stmt.execute(params![
                    record.slug,
                    record.source_id,
                    record.category,
                    record.name,
                    record.origin_name,
                    record.description,
                    record.thumb_url,
                    record.status,
                    record.year,
                    genres,
                    record.view_count as i64,
                    record.rating,
                    record.source_updated_at.map(|t| t.to_rfc3339()),
                    record.sub_record_count,
                    now,
                ]) {
                    Ok(_) => OperationResult::Committed,
                    Err(e) => {
                        tracing::debug!("Upsert of record '{}' failed: {}", record.slug, e);
                        classify_write_error(e)?
                    }
                };

                tally(&mut outcome, existed, result);
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn find_record_id(&self, slug: &str) -> StorageResult<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM records WHERE slug = ?1",
                params![slug],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn get_record(&self, slug: &str) -> StorageResult<Option<CatalogRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT slug, source_id, category, name, origin_name, description, thumb_url,
                 status, year, genres, view_count, rating, source_updated_at, sub_record_count
                 FROM records WHERE slug = ?1",
                params![slug],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn bulk_upsert_sub_records(
        &mut self,
        sub_records: &[SubRecord],
    ) -> StorageResult<BulkWriteOutcome> {
        let mut outcome = BulkWriteOutcome::default();
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        {
            let mut exists_stmt =
                tx.prepare("SELECT 1 FROM sub_records WHERE parent_id = ?1 AND sequence = ?2")?;
            let mut upsert_stmt = tx.prepare(
                "INSERT INTO sub_records (parent_id, sequence, slug, name, title, group_name,
                 source_url, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                 ON CONFLICT(parent_id, sequence) DO UPDATE SET
                    slug = excluded.slug,
                    name = excluded.name,
                    title = excluded.title,
                    group_name = excluded.group_name,
                    source_url = excluded.source_url,
                    content = COALESCE(excluded.content, sub_records.content),
                    updated_at = excluded.updated_at",
            )?;

            for sub in sub_records {
                let existed = exists_stmt
                    .query_row(params![sub.parent_id, sub.sequence], |_| Ok(()))
                    .optional()?
                    .is_some();

                let result = match upsert_stmt.execute(params![
                    sub.parent_id,
                    sub.sequence,
                    sub.slug,
                    sub.name,
                    sub.title,
                    sub.group_name,
                    sub.source_url,
                    sub.content,
                    now,
                ]) {
                    Ok(_) => OperationResult::Committed,
                    Err(e) => {
                        tracing::debug!(
                            "Upsert of sub-record {}#{} failed: {}",
                            sub.parent_id,
                            sub.sequence,
                            e
                        );
                        classify_write_error(e)?
                    }
                };

                tally(&mut outcome, existed, result);
            }

            let parents: BTreeSet<i64> = sub_records.iter().map(|s| s.parent_id).collect();
            let mut count_stmt = tx.prepare(
                "UPDATE records SET sub_record_count =
                 (SELECT COUNT(*) FROM sub_records WHERE parent_id = ?1) WHERE id = ?1",
            )?;
            for parent_id in parents {
                count_stmt.execute(params![parent_id])?;
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn get_sub_records(&self, parent_id: i64) -> StorageResult<Vec<SubRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT parent_id, sequence, slug, name, title, group_name, source_url, content
             FROM sub_records WHERE parent_id = ?1 ORDER BY sequence ASC",
        )?;

        let subs = stmt
            .query_map(params![parent_id], |row| {
                Ok(SubRecord {
                    parent_id: row.get(0)?,
                    sequence: row.get(1)?,
                    slug: row.get(2)?,
                    name: row.get(3)?,
                    title: row.get(4)?,
                    group_name: row.get(5)?,
                    source_url: row.get(6)?,
                    content: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(subs)
    }

    fn count_records(&self, category: Option<&str>) -> StorageResult<u64> {
        let count: i64 = match category {
            Some(category) => self.conn.query_row(
                "SELECT COUNT(*) FROM records WHERE category = ?1",
                params![category],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }

    fn count_sub_records(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sub_records", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(slug: &str, source_id: &str) -> CatalogRecord {
        CatalogRecord {
            slug: slug.to_string(),
            source_id: source_id.to_string(),
            category: "ongoing".to_string(),
            name: format!("Title {}", slug),
            origin_name: None,
            description: Some("A story".to_string()),
            thumb_url: None,
            status: Some("ongoing".to_string()),
            year: Some(2023),
            genres: vec!["action".to_string(), "drama".to_string()],
            view_count: 1_000,
            rating: 7.5,
            source_updated_at: Some("2024-05-01T10:00:00Z".parse().unwrap()),
            sub_record_count: 0,
        }
    }

    fn sub(parent_id: i64, sequence: u32, slug: &str) -> SubRecord {
        SubRecord {
            parent_id,
            sequence,
            slug: slug.to_string(),
            name: slug.to_string(),
            title: None,
            group_name: Some("Server 1".to_string()),
            source_url: None,
            content: None,
        }
    }

    #[test]
    fn test_create_in_memory() {
        assert!(SqliteCatalogStore::new_in_memory().is_ok());
    }

    #[test]
    fn test_insert_then_update() {
        let mut store = SqliteCatalogStore::new_in_memory().unwrap();

        let outcome = store.bulk_upsert_records(&[record("a", "1")]).unwrap();
        assert_eq!(outcome.inserted, 1);

        let mut changed = record("a", "1");
        changed.name = "Renamed".to_string();
        changed.view_count = 10;
        let outcome = store.bulk_upsert_records(&[changed]).unwrap();
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.inserted, 0);

        let stored = store.get_record("a").unwrap().unwrap();
        assert_eq!(stored.name, "Renamed");
        // View counts never go backwards
        assert_eq!(stored.view_count, 1_000);
        assert_eq!(stored.genres, vec!["action".to_string(), "drama".to_string()]);
    }

    #[test]
    fn test_bulk_upsert_tolerates_one_duplicate() {
        let mut store = SqliteCatalogStore::new_in_memory().unwrap();
        store.bulk_upsert_records(&[record("a", "1")]).unwrap();
        let parent = store.find_record_id("a").unwrap().unwrap();
        store
            .bulk_upsert_sub_records(&[sub(parent, 100, "ep-5")])
            .unwrap();

        let batch: Vec<SubRecord> = (0..10)
            .map(|i| sub(parent, i, &format!("ep-{}", i)))
            .collect();
        let outcome = store.bulk_upsert_sub_records(&batch).unwrap();

        assert_eq!(outcome.inserted, 9);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.failed, 0);
        assert_eq!(store.count_sub_records().unwrap(), 10);

        let subs = store.get_sub_records(parent).unwrap();
        assert!(subs.iter().all(|s| s.sequence != 5));
        assert_eq!(subs.last().unwrap().sequence, 100);
    }

    #[test]
    fn test_shared_source_id_keeps_both_records() {
        let mut store = SqliteCatalogStore::new_in_memory().unwrap();
        store.bulk_upsert_records(&[record("a", "42")]).unwrap();

        let mut other = record("b", "42");
        other.category = "completed".to_string();
        let outcome = store.bulk_upsert_records(&[other]).unwrap();

        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.duplicates, 0);
        assert!(store.find_record_id("a").unwrap().is_some());
        assert!(store.find_record_id("b").unwrap().is_some());
        assert_eq!(store.count_records(None).unwrap(), 2);
        assert_eq!(store.load_known_keys().unwrap().len(), 2);
    }

    #[test]
    fn test_load_known_keys() {
        let mut store = SqliteCatalogStore::new_in_memory().unwrap();
        store
            .bulk_upsert_records(&[record("a", "1"), record("b", "2")])
            .unwrap();

        let keys = store.load_known_keys().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(
            keys.get("a").unwrap().unwrap(),
            "2024-05-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn test_sub_record_upsert_and_count() {
        let mut store = SqliteCatalogStore::new_in_memory().unwrap();
        store.bulk_upsert_records(&[record("a", "1")]).unwrap();
        let parent = store.find_record_id("a").unwrap().unwrap();

        let outcome = store
            .bulk_upsert_sub_records(&[sub(parent, 1, "ep-1"), sub(parent, 2, "ep-2")])
            .unwrap();
        assert_eq!(outcome.inserted, 2);

        // Same slug at a new position conflicts with (parent_id, slug)
        let outcome = store
            .bulk_upsert_sub_records(&[sub(parent, 2, "ep-2"), sub(parent, 3, "ep-1")])
            .unwrap();
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.duplicates, 1);

        let subs = store.get_sub_records(parent).unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].sequence, 1);
        assert_eq!(store.get_record("a").unwrap().unwrap().sub_record_count, 2);
        assert_eq!(store.count_sub_records().unwrap(), 2);
    }

    #[test]
    fn test_sub_record_for_missing_parent_is_rejected() {
        let mut store = SqliteCatalogStore::new_in_memory().unwrap();
        let outcome = store.bulk_upsert_sub_records(&[sub(42, 1, "ep-1")]).unwrap();
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.committed(), 0);
    }
}
