use crate::catalog::{DuplicateGroup, GroupKind};
use crate::error::Result;
use rusqlite::{named_params, Connection, OptionalExtension, Row};

pub fn insert_group(conn: &Connection, group: &DuplicateGroup) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO duplicate_groups (
            group_id, kind, hash, member_count, canonical_path, waste_bytes
        ) VALUES (:group_id, :kind, :hash, :member_count, :canonical_path, :waste_bytes)",
        named_params! {
            ":group_id": group.group_id,
            ":kind": group.kind.as_str(),
            ":hash": &group.hash,
            ":member_count": group.member_count,
            ":canonical_path": &group.canonical_path,
            ":waste_bytes": group.waste_bytes,
        },
    )?;
    Ok(())
}

fn group_from_row(row: &Row) -> rusqlite::Result<DuplicateGroup> {
    Ok(DuplicateGroup {
        group_id: row.get(0)?,
        kind: GroupKind::from_str(&row.get::<_, String>(1)?).unwrap_or(GroupKind::File),
        hash: row.get(2)?,
        member_count: row.get(3)?,
        canonical_path: row.get(4)?,
        waste_bytes: row.get(5)?,
    })
}

pub fn get_group(conn: &Connection, group_id: i64) -> Result<Option<DuplicateGroup>> {
    let mut stmt = conn.prepare(
        "SELECT group_id, kind, hash, member_count, canonical_path, waste_bytes
         FROM duplicate_groups WHERE group_id = ?1",
    )?;
    stmt.query_row([group_id], group_from_row)
        .optional()
        .map_err(Into::into)
}

pub fn get_group_by_hash(conn: &Connection, hash: &str) -> Result<Option<DuplicateGroup>> {
    let mut stmt = conn.prepare(
        "SELECT group_id, kind, hash, member_count, canonical_path, waste_bytes
         FROM duplicate_groups WHERE hash = ?1",
    )?;
    stmt.query_row([hash], group_from_row)
        .optional()
        .map_err(Into::into)
}

pub fn list_groups(conn: &Connection) -> Result<Vec<DuplicateGroup>> {
    let mut stmt = conn.prepare(
        "SELECT group_id, kind, hash, member_count, canonical_path, waste_bytes
         FROM duplicate_groups ORDER BY group_id",
    )?;
    let groups = stmt
        .query_map([], group_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(groups)
}

/// Drop all groups and group assignments. The dedup pass rebuilds from
/// scratch on every run.
pub fn clear_groups(conn: &Connection) -> Result<()> {
    conn.execute("UPDATE files SET duplicate_group = NULL", [])?;
    conn.execute("UPDATE folders SET duplicate_group = NULL", [])?;
    conn.execute("DELETE FROM duplicate_groups", [])?;
    Ok(())
}
