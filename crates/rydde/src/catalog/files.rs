use crate::catalog::{DecisionSource, FileRecord};
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{named_params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;

const FILE_COLUMNS: &str = "path, parent, name, size_bytes, modified_at, mime, content_hash, \
     metadata, category, class_source, confidence, duplicate_group, error, scanned_at";

pub fn upsert_file(conn: &Connection, file: &FileRecord) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO files (
            path, parent, name, size_bytes, modified_at, mime, content_hash,
            metadata, category, class_source, confidence, duplicate_group, error, scanned_at
        ) VALUES (
            :path, :parent, :name, :size_bytes, :modified_at, :mime, :content_hash,
            :metadata, :category, :class_source, :confidence, :duplicate_group, :error, :scanned_at
        )",
        named_params! {
            ":path": &file.path,
            ":parent": &file.parent,
            ":name": &file.name,
            ":size_bytes": file.size_bytes,
            ":modified_at": file.modified_at.as_ref().map(|dt| dt.to_rfc3339()),
            ":mime": &file.mime,
            ":content_hash": &file.content_hash,
            ":metadata": serde_json::to_string(&file.metadata)?,
            ":category": &file.category,
            ":class_source": file.class_source.map(|s| s.as_str()),
            ":confidence": file.confidence,
            ":duplicate_group": file.duplicate_group,
            ":error": &file.error,
            ":scanned_at": file.scanned_at.to_rfc3339(),
        },
    )?;
    Ok(())
}

fn file_from_row(row: &Row) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        path: row.get(0)?,
        parent: row.get(1)?,
        name: row.get(2)?,
        size_bytes: row.get(3)?,
        modified_at: row
            .get::<_, Option<String>>(4)?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        mime: row.get(5)?,
        content_hash: row.get(6)?,
        metadata: row
            .get::<_, Option<String>>(7)?
            .and_then(|s| serde_json::from_str::<BTreeMap<String, String>>(&s).ok())
            .unwrap_or_default(),
        category: row.get(8)?,
        class_source: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| DecisionSource::from_str(&s).ok()),
        confidence: row.get(10)?,
        duplicate_group: row.get(11)?,
        error: row.get(12)?,
        scanned_at: row
            .get::<_, Option<String>>(13)?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
    })
}

pub fn get_file(conn: &Connection, path: &str) -> Result<Option<FileRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM files WHERE path = ?1", FILE_COLUMNS))?;
    stmt.query_row([path], file_from_row)
        .optional()
        .map_err(Into::into)
}

/// Files directly inside `parent`, path-ascending.
pub fn files_in_folder(conn: &Connection, parent: &str) -> Result<Vec<FileRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM files WHERE parent = ?1 ORDER BY path",
        FILE_COLUMNS
    ))?;
    let files = stmt
        .query_map([parent], file_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(files)
}

/// Range bounds covering exactly the paths under `prefix`. `'0'` is the
/// character after `'/'`, so `[prefix/, prefix0)` is the whole subtree;
/// unlike LIKE this is unconfused by `_` and `%` in real file names.
fn subtree_bounds(prefix: &str) -> (String, String) {
    let prefix = prefix.trim_end_matches('/');
    (format!("{}/", prefix), format!("{}0", prefix))
}

/// Files anywhere under `prefix` (inclusive of direct children),
/// path-ascending, optionally bounded.
pub fn files_under(conn: &Connection, prefix: &str, limit: Option<usize>) -> Result<Vec<FileRecord>> {
    let (low, high) = subtree_bounds(prefix);
    let mut sql = format!(
        "SELECT {} FROM files WHERE path >= ?1 AND path < ?2 ORDER BY path",
        FILE_COLUMNS
    );
    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {}", n));
    }
    let mut stmt = conn.prepare(&sql)?;
    let files = stmt
        .query_map([low, high], file_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(files)
}

pub fn list_all_files(conn: &Connection) -> Result<Vec<FileRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM files ORDER BY path", FILE_COLUMNS))?;
    let files = stmt
        .query_map([], file_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(files)
}

pub fn files_missing_hash(conn: &Connection) -> Result<Vec<FileRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM files WHERE content_hash IS NULL ORDER BY path",
        FILE_COLUMNS
    ))?;
    let files = stmt
        .query_map([], file_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(files)
}

pub fn update_file_hash(conn: &Connection, path: &str, hash: &str) -> Result<()> {
    conn.execute(
        "UPDATE files SET content_hash = ?1 WHERE path = ?2",
        (hash, path),
    )?;
    Ok(())
}

pub fn update_file_error(conn: &Connection, path: &str, error: &str) -> Result<()> {
    conn.execute("UPDATE files SET error = ?1 WHERE path = ?2", (error, path))?;
    Ok(())
}

pub fn update_file_classification(
    conn: &Connection,
    path: &str,
    category: &str,
    source: DecisionSource,
    confidence: Option<f64>,
) -> Result<()> {
    conn.execute(
        "UPDATE files SET category = ?1, class_source = ?2, confidence = ?3 WHERE path = ?4",
        (category, source.as_str(), confidence, path),
    )?;
    Ok(())
}

pub fn update_file_metadata(
    conn: &Connection,
    path: &str,
    metadata: &BTreeMap<String, String>,
) -> Result<()> {
    conn.execute(
        "UPDATE files SET metadata = ?1 WHERE path = ?2",
        (serde_json::to_string(metadata)?, path),
    )?;
    Ok(())
}

pub fn assign_file_duplicate_group(conn: &Connection, path: &str, group_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE files SET duplicate_group = ?1 WHERE path = ?2",
        (group_id, path),
    )?;
    Ok(())
}

/// Total bytes of files under `prefix`, for duplicate-group waste sizing.
pub fn total_size_under(conn: &Connection, prefix: &str) -> Result<i64> {
    let (low, high) = subtree_bounds(prefix);
    let total: Option<i64> = conn.query_row(
        "SELECT SUM(size_bytes) FROM files WHERE path >= ?1 AND path < ?2",
        [low, high],
        |row| row.get(0),
    )?;
    Ok(total.unwrap_or(0))
}

/// Hashes shared by more than one file, with their members, hash-ascending.
pub fn file_hash_groups(conn: &Connection) -> Result<Vec<(String, Vec<FileRecord>)>> {
    let mut stmt = conn.prepare(
        "SELECT content_hash FROM files
         WHERE content_hash IS NOT NULL
         GROUP BY content_hash HAVING COUNT(*) > 1
         ORDER BY content_hash",
    )?;
    let hashes = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut member_stmt = conn.prepare(&format!(
        "SELECT {} FROM files WHERE content_hash = ?1 ORDER BY path",
        FILE_COLUMNS
    ))?;
    let mut groups = Vec::with_capacity(hashes.len());
    for hash in hashes {
        let members = member_stmt
            .query_map([&hash], file_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        groups.push((hash, members));
    }
    Ok(groups)
}
