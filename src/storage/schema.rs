//! Database schema definitions
//!
//! This module contains the SQL schema for the catalog document store.

/// Current schema version, stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 1;

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Catalog records, matched on their natural key
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    slug TEXT NOT NULL UNIQUE,
    source_id TEXT NOT NULL,
    category TEXT NOT NULL,
    name TEXT NOT NULL,
    origin_name TEXT,
    description TEXT,
    thumb_url TEXT,
    status TEXT,
    year INTEGER,
    genres TEXT NOT NULL DEFAULT '[]',
    view_count INTEGER NOT NULL DEFAULT 0,
    rating REAL NOT NULL DEFAULT 0,
    source_updated_at TEXT,
    sub_record_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_category ON records(category);
CREATE INDEX IF NOT EXISTS idx_records_source_id ON records(source_id);

-- Nested sub-records, one ordered list per parent
CREATE TABLE IF NOT EXISTS sub_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_id INTEGER NOT NULL REFERENCES records(id),
    sequence INTEGER NOT NULL,
    slug TEXT NOT NULL,
    name TEXT NOT NULL,
    title TEXT,
    group_name TEXT,
    source_url TEXT,
    content TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(parent_id, sequence),
    UNIQUE(parent_id, slug)
);

CREATE INDEX IF NOT EXISTS idx_sub_records_parent ON sub_records(parent_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
