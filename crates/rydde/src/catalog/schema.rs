use crate::error::Result;
use rusqlite::Connection;

pub const SCHEMA_VERSION: i32 = 1;

pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS folders (
            path            TEXT PRIMARY KEY,
            parent          TEXT,
            name            TEXT NOT NULL,
            depth           INTEGER NOT NULL,
            file_count      INTEGER DEFAULT 0,
            dir_count       INTEGER DEFAULT 0,
            modified_at     TEXT,
            agg_hash        TEXT,
            action          TEXT NOT NULL DEFAULT 'unknown',
            source          TEXT,
            category        TEXT,
            metadata        TEXT,
            is_root         BOOLEAN DEFAULT 0,
            duplicate_group INTEGER,
            scanned_at      TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS files (
            path            TEXT PRIMARY KEY,
            parent          TEXT NOT NULL,
            name            TEXT NOT NULL,
            size_bytes      INTEGER NOT NULL,
            modified_at     TEXT,
            mime            TEXT,
            content_hash    TEXT,
            metadata        TEXT,
            category        TEXT,
            class_source    TEXT,
            confidence      REAL,
            duplicate_group INTEGER,
            error           TEXT,
            scanned_at      TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS duplicate_groups (
            group_id        INTEGER PRIMARY KEY,
            kind            TEXT NOT NULL,
            hash            TEXT NOT NULL,
            member_count    INTEGER NOT NULL,
            canonical_path  TEXT NOT NULL,
            waste_bytes     INTEGER DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS plan_entries (
            source_path     TEXT PRIMARY KEY,
            target_path     TEXT NOT NULL,
            kind            TEXT NOT NULL,
            decided_by      TEXT NOT NULL,
            duplicate_of    TEXT
        );
        "#,
    )?;

    create_indexes(conn)?;
    set_schema_version(conn)?;

    Ok(())
}

fn create_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_folders_parent ON folders(parent);
        CREATE INDEX IF NOT EXISTS idx_folders_depth ON folders(depth);
        CREATE INDEX IF NOT EXISTS idx_folders_action ON folders(action);
        CREATE INDEX IF NOT EXISTS idx_folders_hash ON folders(agg_hash);
        CREATE INDEX IF NOT EXISTS idx_files_parent ON files(parent);
        CREATE INDEX IF NOT EXISTS idx_files_hash ON files(content_hash);
        CREATE INDEX IF NOT EXISTS idx_files_group ON files(duplicate_group);
        CREATE INDEX IF NOT EXISTS idx_groups_hash ON duplicate_groups(hash);
        CREATE INDEX IF NOT EXISTS idx_plan_kind ON plan_entries(kind);
        "#,
    )?;
    Ok(())
}

fn set_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;
    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let table_exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;
    if !table_exists {
        return Ok(None);
    }

    let mut stmt = conn.prepare("SELECT version FROM schema_version LIMIT 1")?;
    let mut rows = stmt.query([])?;

    if let Some(row) = rows.next()? {
        Ok(Some(row.get(0)?))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_initialization() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, Some(SCHEMA_VERSION));

        let table_count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();

        assert_eq!(table_count, 5);
    }

    #[test]
    fn test_indexes_created() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let index_count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();

        assert!(index_count >= 9);
    }
}
