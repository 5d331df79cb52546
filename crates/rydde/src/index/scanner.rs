use crate::catalog::{files, folders, Catalog, CatalogWriter, FileRecord, FolderAction, FolderRecord, WriteOp};
use crate::error::{Result, RyddeError};
use crate::probe::{probe_file, MetadataProbe};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use walkdir::WalkDir;

#[derive(Debug, Clone, Default)]
pub struct ScanStats {
    pub files_scanned: usize,
    pub dirs_scanned: usize,
    pub bytes_scanned: u64,
    /// Records skipped because an unchanged entry already sits in the catalog.
    pub unchanged_skipped: usize,
    pub symlinks_skipped: usize,
    /// Subtrees pruned because they are committed `keep`.
    pub keep_pruned: usize,
    pub errors: usize,
}

impl ScanStats {
    pub fn merge(&mut self, other: &ScanStats) {
        self.files_scanned += other.files_scanned;
        self.dirs_scanned += other.dirs_scanned;
        self.bytes_scanned += other.bytes_scanned;
        self.unchanged_skipped += other.unchanged_skipped;
        self.symlinks_skipped += other.symlinks_skipped;
        self.keep_pruned += other.keep_pruned;
        self.errors += other.errors;
    }
}

/// Number of normal path components; the classifier's depth ordering key.
pub fn path_depth(path: &str) -> i64 {
    path.split('/').filter(|c| !c.is_empty()).count() as i64
}

/// Filesystem mtime truncated to whole seconds, for stable restart checks.
fn entry_mtime(metadata: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .and_then(|d| DateTime::from_timestamp(d.as_secs() as i64, 0))
}

fn is_under_any(path: &str, roots: &[String]) -> bool {
    roots.iter().any(|p| {
        path == p || path.strip_prefix(p.as_str()).is_some_and(|rest| rest.starts_with('/'))
    })
}

/// Walk one source root and emit folder and file records.
///
/// Symlinks are never followed, so cycles are impossible and depth stays
/// monotonic. Subtrees whose folder the catalog already commits as `keep`
/// are pruned wholesale; `keep_except` folders are descended normally. An
/// unchanged entry (same mtime for folders, same size and mtime for files)
/// is left alone, which makes a re-scan of a grown tree cheap.
pub fn scan_root(
    catalog: &Catalog,
    writer: &CatalogWriter,
    probe: &dyn MetadataProbe,
    root: &Path,
) -> Result<ScanStats> {
    let root = root
        .canonicalize()
        .map_err(|_| RyddeError::FileNotFound(root.to_path_buf()))?;
    let root_str = root.to_string_lossy().to_string();
    let mut stats = ScanStats::default();

    let reader = catalog.reader()?;
    let keep_paths = folders::keep_folder_paths(&reader)?;

    // (file_count, dir_count) tallied during the walk, flushed afterwards.
    let mut counts: HashMap<String, (i64, i64)> = HashMap::new();

    let keep_for_filter = keep_paths.clone();
    let walker = WalkDir::new(&root)
        .follow_links(false)
        .into_iter()
        .filter_entry(move |e| !is_under_any(&e.path().to_string_lossy(), &keep_for_filter));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Walk error under {}: {}", root_str, e);
                stats.errors += 1;
                continue;
            }
        };

        let path = entry.path();
        let path_str = path.to_string_lossy().to_string();

        if entry.path_is_symlink() {
            stats.symlinks_skipped += 1;
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Failed to stat {}: {}", path_str, e);
                stats.errors += 1;
                continue;
            }
        };

        if entry.file_type().is_dir() {
            stats.dirs_scanned += 1;
            counts.entry(path_str.clone()).or_insert((0, 0));
            if path != root {
                if let Some(parent) = path.parent() {
                    counts.entry(parent.to_string_lossy().to_string()).or_insert((0, 0)).1 += 1;
                }
            }

            let mtime = entry_mtime(&metadata);
            if let Some(existing) = folders::get_folder(&reader, &path_str)? {
                if existing.modified_at == mtime {
                    stats.unchanged_skipped += 1;
                    continue;
                }
            }

            let is_root = path == root;
            writer.submit(WriteOp::UpsertFolder(FolderRecord {
                path: path_str.clone(),
                parent: if is_root {
                    None
                } else {
                    path.parent().map(|p| p.to_string_lossy().to_string())
                },
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path_str.clone()),
                depth: path_depth(&path_str),
                file_count: 0,
                dir_count: 0,
                modified_at: mtime,
                agg_hash: None,
                action: FolderAction::Unknown,
                source: None,
                category: None,
                metadata: Default::default(),
                is_root,
                duplicate_group: None,
                scanned_at: Utc::now(),
            }))?;
            continue;
        }

        if !entry.file_type().is_file() {
            continue;
        }

        if let Some(parent) = path.parent() {
            counts.entry(parent.to_string_lossy().to_string()).or_insert((0, 0)).0 += 1;
        }

        let size_bytes = metadata.len() as i64;
        let mtime = entry_mtime(&metadata);

        if let Some(existing) = files::get_file(&reader, &path_str)? {
            if existing.size_bytes == size_bytes && existing.modified_at == mtime {
                stats.unchanged_skipped += 1;
                continue;
            }
        }

        let mime = probe.probe_mime(path);
        let file_metadata = probe_file(probe, path, &mime);

        writer.submit(WriteOp::UpsertFile(FileRecord {
            path: path_str.clone(),
            parent: path
                .parent()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path_str.clone()),
            size_bytes,
            modified_at: mtime,
            mime: Some(mime),
            content_hash: None,
            metadata: file_metadata,
            category: None,
            class_source: None,
            confidence: None,
            duplicate_group: None,
            error: None,
            scanned_at: Utc::now(),
        }))?;

        stats.files_scanned += 1;
        stats.bytes_scanned += size_bytes as u64;
    }

    stats.keep_pruned = keep_paths
        .iter()
        .filter(|p| is_under_any(p.as_str(), std::slice::from_ref(&root_str)))
        .count();

    let mut sorted_counts: Vec<(String, (i64, i64))> = counts.into_iter().collect();
    sorted_counts.sort();
    for (path, (file_count, dir_count)) in sorted_counts {
        writer.submit(WriteOp::SetFolderCounts {
            path,
            file_count,
            dir_count,
        })?;
    }

    Ok(stats)
}
