use crate::catalog::{files, folders, Catalog, CatalogWriter, DuplicateGroup, GroupKind, WriteOp};
use crate::config::HashAlgorithm;
use crate::error::Result;
use crate::index::hasher::empty_digest;

#[derive(Debug, Default, Clone)]
pub struct DedupStats {
    pub file_groups: usize,
    pub folder_groups: usize,
    pub duplicate_files: usize,
    pub duplicate_folders: usize,
    pub waste_bytes: i64,
}

/// Canonical member of a duplicate group: lowest path, then shortest.
pub fn canonical_path<'a>(paths: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    paths.min_by(|a, b| a.cmp(b).then(a.len().cmp(&b.len())))
}

/// Rebuild all duplicate groups from the hashed catalog.
///
/// Group ids are assigned hash-ascending (files first, then folders), so the
/// same catalog state always produces the same groups. Empty-folder
/// sentinel hashes are not grouped; two empty folders are not duplicates
/// worth suppressing.
pub fn refresh_duplicate_groups(catalog: &Catalog, writer: &CatalogWriter) -> Result<DedupStats> {
    let reader = catalog.reader()?;
    let mut stats = DedupStats::default();
    let mut next_group_id = 1i64;

    writer.submit(WriteOp::ClearDuplicateGroups)?;

    for (hash, members) in files::file_hash_groups(&reader)? {
        let canonical = match canonical_path(members.iter().map(|f| f.path.as_str())) {
            Some(p) => p.to_string(),
            None => continue,
        };

        let waste_bytes: i64 = members
            .iter()
            .filter(|f| f.path != canonical)
            .map(|f| f.size_bytes)
            .sum();

        writer.submit(WriteOp::InsertDuplicateGroup(DuplicateGroup {
            group_id: next_group_id,
            kind: GroupKind::File,
            hash,
            member_count: members.len() as i64,
            canonical_path: canonical,
            waste_bytes,
        }))?;

        for member in &members {
            writer.submit(WriteOp::SetFileDuplicateGroup {
                path: member.path.clone(),
                group_id: next_group_id,
            })?;
        }

        stats.file_groups += 1;
        stats.duplicate_files += members.len();
        stats.waste_bytes += waste_bytes;
        next_group_id += 1;
    }

    let empty_sentinels = [
        empty_digest(HashAlgorithm::Md5),
        empty_digest(HashAlgorithm::Blake3),
    ];

    for (hash, members) in folders::folder_hash_groups(&reader)? {
        if empty_sentinels.contains(&hash) {
            continue;
        }

        let canonical = match canonical_path(members.iter().map(|f| f.path.as_str())) {
            Some(p) => p.to_string(),
            None => continue,
        };

        let mut waste_bytes = 0i64;
        for member in &members {
            if member.path != canonical {
                waste_bytes += files::total_size_under(&reader, &member.path)?;
            }
        }

        writer.submit(WriteOp::InsertDuplicateGroup(DuplicateGroup {
            group_id: next_group_id,
            kind: GroupKind::Folder,
            hash,
            member_count: members.len() as i64,
            canonical_path: canonical,
            waste_bytes,
        }))?;

        for member in &members {
            writer.submit(WriteOp::SetFolderDuplicateGroup {
                path: member.path.clone(),
                group_id: next_group_id,
            })?;
        }

        stats.folder_groups += 1;
        stats.duplicate_folders += members.len();
        stats.waste_bytes += waste_bytes;
        next_group_id += 1;
    }

    writer.flush()?;
    Ok(stats)
}
