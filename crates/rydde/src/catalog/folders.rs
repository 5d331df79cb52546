use crate::catalog::{DecisionSource, FolderAction, FolderRecord};
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{named_params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;

const FOLDER_COLUMNS: &str = "path, parent, name, depth, file_count, dir_count, modified_at, \
     agg_hash, action, source, category, metadata, is_root, duplicate_group, scanned_at";

pub fn upsert_folder(conn: &Connection, folder: &FolderRecord) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO folders (
            path, parent, name, depth, file_count, dir_count, modified_at,
            agg_hash, action, source, category, metadata, is_root, duplicate_group, scanned_at
        ) VALUES (
            :path, :parent, :name, :depth, :file_count, :dir_count, :modified_at,
            :agg_hash, :action, :source, :category, :metadata, :is_root, :duplicate_group, :scanned_at
        )",
        named_params! {
            ":path": &folder.path,
            ":parent": &folder.parent,
            ":name": &folder.name,
            ":depth": folder.depth,
            ":file_count": folder.file_count,
            ":dir_count": folder.dir_count,
            ":modified_at": folder.modified_at.as_ref().map(|dt| dt.to_rfc3339()),
            ":agg_hash": &folder.agg_hash,
            ":action": folder.action.as_str(),
            ":source": folder.source.map(|s| s.as_str()),
            ":category": &folder.category,
            ":metadata": serde_json::to_string(&folder.metadata)?,
            ":is_root": folder.is_root,
            ":duplicate_group": folder.duplicate_group,
            ":scanned_at": folder.scanned_at.to_rfc3339(),
        },
    )?;
    Ok(())
}

fn folder_from_row(row: &Row) -> rusqlite::Result<FolderRecord> {
    Ok(FolderRecord {
        path: row.get(0)?,
        parent: row.get(1)?,
        name: row.get(2)?,
        depth: row.get(3)?,
        file_count: row.get(4)?,
        dir_count: row.get(5)?,
        modified_at: row
            .get::<_, Option<String>>(6)?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        agg_hash: row.get(7)?,
        action: FolderAction::from_str(&row.get::<_, String>(8)?).unwrap_or(FolderAction::Unknown),
        source: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| DecisionSource::from_str(&s).ok()),
        category: row.get(10)?,
        metadata: row
            .get::<_, Option<String>>(11)?
            .and_then(|s| serde_json::from_str::<BTreeMap<String, String>>(&s).ok())
            .unwrap_or_default(),
        is_root: row.get(12)?,
        duplicate_group: row.get(13)?,
        scanned_at: row
            .get::<_, Option<String>>(14)?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
    })
}

pub fn get_folder(conn: &Connection, path: &str) -> Result<Option<FolderRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM folders WHERE path = ?1",
        FOLDER_COLUMNS
    ))?;
    stmt.query_row([path], folder_from_row)
        .optional()
        .map_err(Into::into)
}

/// Folders at exactly `depth`, path-ascending. The classifier's depth bands.
pub fn folders_at_depth(conn: &Connection, depth: i64) -> Result<Vec<FolderRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM folders WHERE depth = ?1 ORDER BY path",
        FOLDER_COLUMNS
    ))?;
    let folders = stmt
        .query_map([depth], folder_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(folders)
}

pub fn depth_range(conn: &Connection) -> Result<Option<(i64, i64)>> {
    let mut stmt = conn.prepare("SELECT MIN(depth), MAX(depth) FROM folders")?;
    let range: (Option<i64>, Option<i64>) =
        stmt.query_row([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(match range {
        (Some(min), Some(max)) => Some((min, max)),
        _ => None,
    })
}

/// Folders sorted deepest-first; the aggregate hasher's processing order.
pub fn folders_depth_descending(conn: &Connection) -> Result<Vec<FolderRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM folders ORDER BY depth DESC, path",
        FOLDER_COLUMNS
    ))?;
    let folders = stmt
        .query_map([], folder_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(folders)
}

pub fn list_all_folders(conn: &Connection) -> Result<Vec<FolderRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM folders ORDER BY path", FOLDER_COLUMNS))?;
    let folders = stmt
        .query_map([], folder_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(folders)
}

pub fn subfolders_of(conn: &Connection, parent: &str) -> Result<Vec<FolderRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM folders WHERE parent = ?1 ORDER BY path",
        FOLDER_COLUMNS
    ))?;
    let folders = stmt
        .query_map([parent], folder_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(folders)
}

/// Paths of folders committed `keep`. The scanner prunes descent into these.
pub fn keep_folder_paths(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT path FROM folders WHERE action = 'keep' ORDER BY path")?;
    let paths = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(paths)
}

pub fn update_folder_counts(
    conn: &Connection,
    path: &str,
    file_count: i64,
    dir_count: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE folders SET file_count = ?1, dir_count = ?2 WHERE path = ?3",
        (file_count, dir_count, path),
    )?;
    Ok(())
}

pub fn update_folder_hash(conn: &Connection, path: &str, hash: &str) -> Result<()> {
    conn.execute(
        "UPDATE folders SET agg_hash = ?1 WHERE path = ?2",
        (hash, path),
    )?;
    Ok(())
}

pub fn update_folder_decision(
    conn: &Connection,
    path: &str,
    action: FolderAction,
    source: DecisionSource,
    category: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE folders SET action = ?1, source = ?2,
         category = COALESCE(?3, category) WHERE path = ?4",
        (action.as_str(), source.as_str(), category, path),
    )?;
    Ok(())
}

pub fn update_folder_metadata(
    conn: &Connection,
    path: &str,
    metadata: &BTreeMap<String, String>,
) -> Result<()> {
    conn.execute(
        "UPDATE folders SET metadata = ?1 WHERE path = ?2",
        (serde_json::to_string(metadata)?, path),
    )?;
    Ok(())
}

pub fn assign_folder_duplicate_group(conn: &Connection, path: &str, group_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE folders SET duplicate_group = ?1 WHERE path = ?2",
        (group_id, path),
    )?;
    Ok(())
}

/// Aggregate hashes shared by more than one folder, with members.
pub fn folder_hash_groups(conn: &Connection) -> Result<Vec<(String, Vec<FolderRecord>)>> {
    let mut stmt = conn.prepare(
        "SELECT agg_hash FROM folders
         WHERE agg_hash IS NOT NULL
         GROUP BY agg_hash HAVING COUNT(*) > 1
         ORDER BY agg_hash",
    )?;
    let hashes = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut member_stmt = conn.prepare(&format!(
        "SELECT {} FROM folders WHERE agg_hash = ?1 ORDER BY path",
        FOLDER_COLUMNS
    ))?;
    let mut groups = Vec::with_capacity(hashes.len());
    for hash in hashes {
        let members = member_stmt
            .query_map([&hash], folder_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        groups.push((hash, members));
    }
    Ok(groups)
}
