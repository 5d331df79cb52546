use crate::catalog::{PlanEntry, PlanKind};
use crate::error::Result;
use rusqlite::{named_params, Connection, Row};

pub fn upsert_entry(conn: &Connection, entry: &PlanEntry) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO plan_entries (
            source_path, target_path, kind, decided_by, duplicate_of
        ) VALUES (:source_path, :target_path, :kind, :decided_by, :duplicate_of)",
        named_params! {
            ":source_path": &entry.source_path,
            ":target_path": &entry.target_path,
            ":kind": entry.kind.as_str(),
            ":decided_by": &entry.decided_by,
            ":duplicate_of": &entry.duplicate_of,
        },
    )?;
    Ok(())
}

fn entry_from_row(row: &Row) -> rusqlite::Result<PlanEntry> {
    Ok(PlanEntry {
        source_path: row.get(0)?,
        target_path: row.get(1)?,
        kind: PlanKind::from_str(&row.get::<_, String>(2)?).unwrap_or(PlanKind::Place),
        decided_by: row.get(3)?,
        duplicate_of: row.get(4)?,
    })
}

/// The plan, source-path ascending. This order is the emission order.
pub fn list_entries(conn: &Connection) -> Result<Vec<PlanEntry>> {
    let mut stmt = conn.prepare(
        "SELECT source_path, target_path, kind, decided_by, duplicate_of
         FROM plan_entries ORDER BY source_path",
    )?;
    let entries = stmt
        .query_map([], entry_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entries)
}

pub fn clear_entries(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM plan_entries", [])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::initialize_schema;

    #[test]
    fn test_plan_entries_sorted_by_source() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for path in ["/z/file", "/a/file", "/m/file"] {
            upsert_entry(
                &conn,
                &PlanEntry {
                    source_path: path.to_string(),
                    target_path: format!("Other/Unsorted/{}", path.rsplit('/').next().unwrap()),
                    kind: PlanKind::Place,
                    decided_by: "default".to_string(),
                    duplicate_of: None,
                },
            )
            .unwrap();
        }

        let entries = list_entries(&conn).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].source_path, "/a/file");
        assert_eq!(entries[2].source_path, "/z/file");

        clear_entries(&conn).unwrap();
        assert!(list_entries(&conn).unwrap().is_empty());
    }
}
