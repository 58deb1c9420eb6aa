use rusqlite::Connection;

use crate::error::StoreError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS documents (
    doc_id BLOB PRIMARY KEY CHECK (length(doc_id) = 16),
    winning_rev BLOB NOT NULL CHECK (length(winning_rev) = 36),
    deleted INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS revisions (
    doc_id BLOB NOT NULL CHECK (length(doc_id) = 16),
    rev BLOB NOT NULL CHECK (length(rev) = 36),
    parent_rev BLOB CHECK (parent_rev IS NULL OR length(parent_rev) = 36),
    generation INTEGER NOT NULL,
    body BLOB,
    leaf INTEGER NOT NULL DEFAULT 1,
    deleted INTEGER NOT NULL DEFAULT 0,
    superseded INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (doc_id, rev)
);
CREATE INDEX IF NOT EXISTS idx_revisions_leaves ON revisions (doc_id) WHERE leaf = 1;

CREATE TABLE IF NOT EXISTS changes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    doc_id BLOB NOT NULL CHECK (length(doc_id) = 16),
    rev BLOB NOT NULL CHECK (length(rev) = 36),
    deleted INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_changes_doc ON changes (doc_id, seq);
";
