use rusqlite::Connection;

use crate::error::Result;

pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(())
}

pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS records (
            id              INTEGER PRIMARY KEY,
            name            TEXT NOT NULL,
            normalized_name TEXT,
            category        TEXT,
            created_at      TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id            INTEGER PRIMARY KEY,
            record_ref    INTEGER NOT NULL,
            original_name TEXT NOT NULL,
            current_name  TEXT NOT NULL,
            stage_count   INTEGER NOT NULL DEFAULT 0,
            status        TEXT NOT NULL DEFAULT 'active' CHECK(status IN ('active', 'reverted')),
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stages (
            id          INTEGER PRIMARY KEY,
            session_id  INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            ordinal     INTEGER NOT NULL,
            kind        TEXT NOT NULL,
            input_name  TEXT NOT NULL,
            output_name TEXT NOT NULL,
            confidence  REAL,
            category    TEXT,
            created_at  TEXT NOT NULL,
            UNIQUE(session_id, ordinal)
        );

        CREATE TABLE IF NOT EXISTS benchmarks (
            id               TEXT PRIMARY KEY,
            entity_type      TEXT NOT NULL,
            canonical_name   TEXT NOT NULL,
            variations       TEXT NOT NULL DEFAULT '[]',
            attributes       TEXT NOT NULL DEFAULT '{}',
            source_upload_id INTEGER,
            source_client_id INTEGER,
            is_active        INTEGER NOT NULL DEFAULT 1,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS quality_metrics (
            id          INTEGER PRIMARY KEY,
            name        TEXT NOT NULL,
            category    TEXT NOT NULL,
            value       REAL NOT NULL,
            measured_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS quality_issues (
            id          INTEGER PRIMARY KEY,
            entity_ref  INTEGER NOT NULL,
            description TEXT NOT NULL,
            severity    TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

pub fn create_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_sessions_record     ON sessions(record_ref);
        CREATE INDEX IF NOT EXISTS idx_stages_session      ON stages(session_id, ordinal);
        CREATE INDEX IF NOT EXISTS idx_benchmarks_type     ON benchmarks(entity_type, is_active);
        CREATE INDEX IF NOT EXISTS idx_quality_metrics_cat ON quality_metrics(category);
        CREATE INDEX IF NOT EXISTS idx_quality_issues_sev  ON quality_issues(severity);
        ",
    )?;
    Ok(())
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    create_tables(conn)?;
    create_indexes(conn)?;
    Ok(())
}
