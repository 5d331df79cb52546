//! Consolidates the frozen catalog into the reorganization plan.
//!
//! Top-level `keep` folders become single keep-unit entries; files under
//! disaggregate terminals get individual `place` entries; duplicate groups
//! are collapsed onto their canonical member with `skip-duplicate` entries
//! for the rest. Emission is deterministic: the plan table is keyed and
//! read back source-path ascending, and collision suffixes are assigned in
//! that same order, so re-planning an unchanged catalog reproduces the
//! plan byte for byte.

use crate::catalog::{files, folders, groups, plan};
use crate::catalog::{Catalog, CatalogWriter, DuplicateGroup, FolderAction, FolderRecord, PlanEntry, PlanKind, WriteOp};
use crate::chain::verify_keep_inheritance;
use crate::error::{Result, RyddeError};
use crate::rules::{CategorySet, DEFAULT_CATEGORY};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Default, Clone)]
pub struct PlanStats {
    pub keep_units: usize,
    pub placed_files: usize,
    pub skipped_duplicates: usize,
    /// Targets rewritten to the unsorted bucket because their category was
    /// not in the categories file.
    pub category_fallbacks: usize,
    /// Folders still unclassified at plan time, treated as disaggregate.
    pub unclassified_folders: usize,
}

pub fn build_plan(
    catalog: &Catalog,
    writer: &CatalogWriter,
    categories: &CategorySet,
) -> Result<PlanStats> {
    let reader = catalog.reader()?;
    verify_keep_inheritance(&reader)?;

    writer.submit(WriteOp::ClearPlan)?;

    let all_folders = folders::list_all_folders(&reader)?;
    let folder_by_path: BTreeMap<&str, &FolderRecord> =
        all_folders.iter().map(|f| (f.path.as_str(), f)).collect();
    let groups_by_id: BTreeMap<i64, DuplicateGroup> = groups::list_groups(&reader)?
        .into_iter()
        .map(|g| (g.group_id, g))
        .collect();

    let mut stats = PlanStats::default();
    for folder in &all_folders {
        if folder.action == FolderAction::Unknown {
            stats.unclassified_folders += 1;
        }
    }
    if stats.unclassified_folders > 0 {
        log::warn!(
            "{} folders reached planning unclassified; treating them as disaggregate",
            stats.unclassified_folders
        );
    }

    let mut used_targets: BTreeSet<String> = BTreeSet::new();

    // Keep units first: a kept folder whose parent is not kept moves as one
    // piece, descendants riding along relatively.
    let mut unit_targets: BTreeMap<String, String> = BTreeMap::new();
    let mut unit_skips: Vec<(&FolderRecord, String)> = Vec::new();

    for folder in &all_folders {
        if folder.action != FolderAction::Keep {
            continue;
        }
        let parent_kept = folder
            .parent
            .as_deref()
            .and_then(|p| folder_by_path.get(p))
            .map(|p| p.action == FolderAction::Keep)
            .unwrap_or(false);
        if parent_kept {
            continue;
        }

        if let Some(group) = folder.duplicate_group.and_then(|id| groups_by_id.get(&id)) {
            if group.canonical_path != folder.path {
                unit_skips.push((folder, group.canonical_path.clone()));
                continue;
            }
        }

        let base = unit_base_category(folder, &folder_by_path, categories, &mut stats);
        let desired = format!("{}/{}", base, folder.name);
        let target = unique_target(&mut used_targets, desired, false)?;

        unit_targets.insert(folder.path.clone(), target.clone());
        writer.submit(WriteOp::UpsertPlanEntry(PlanEntry {
            source_path: folder.path.clone(),
            target_path: target,
            kind: PlanKind::KeepUnit,
            decided_by: folder.source.map(|s| s.as_str().to_string()).unwrap_or_default(),
            duplicate_of: None,
        }))?;
        stats.keep_units += 1;
    }

    for (folder, canonical) in unit_skips {
        let target = unit_targets
            .get(&canonical)
            .cloned()
            .unwrap_or_else(|| canonical.clone());
        writer.submit(WriteOp::UpsertPlanEntry(PlanEntry {
            source_path: folder.path.clone(),
            target_path: target,
            kind: PlanKind::SkipDuplicate,
            decided_by: folder.source.map(|s| s.as_str().to_string()).unwrap_or_default(),
            duplicate_of: Some(canonical),
        }))?;
        stats.skipped_duplicates += 1;
    }

    // Files. Anything under a kept folder rides with its unit; the rest is
    // placed individually, with duplicate suppression among the placed set.
    let all_files = files::list_all_files(&reader)?;
    let placed: Vec<_> = all_files
        .iter()
        .filter(|f| {
            folder_by_path
                .get(f.parent.as_str())
                .map(|folder| folder.action != FolderAction::Keep)
                .unwrap_or(true)
        })
        .collect();

    // Canonical member per duplicate group, among placed files only: a twin
    // inside a kept unit stays where its unit goes and suppresses nothing.
    let mut placed_canonical: HashMap<i64, &str> = HashMap::new();
    for file in &placed {
        if let Some(group_id) = file.duplicate_group {
            placed_canonical
                .entry(group_id)
                .and_modify(|current| {
                    if file.path.as_str() < *current {
                        *current = file.path.as_str();
                    }
                })
                .or_insert(file.path.as_str());
        }
    }

    let mut file_targets: BTreeMap<&str, String> = BTreeMap::new();
    let mut file_skips: Vec<(&str, &str, String)> = Vec::new();

    for file in &placed {
        let decided_by = file
            .class_source
            .map(|s| s.as_str().to_string())
            .unwrap_or_default();

        if let Some(group_id) = file.duplicate_group {
            let canonical = placed_canonical[&group_id];
            if canonical != file.path {
                file_skips.push((file.path.as_str(), canonical, decided_by));
                continue;
            }
        }

        let category = validated_category(file.category.as_deref(), categories, &mut stats);
        let desired = format!("{}/{}", category, file.name);
        let target = unique_target(&mut used_targets, desired, true)?;

        file_targets.insert(file.path.as_str(), target.clone());
        writer.submit(WriteOp::UpsertPlanEntry(PlanEntry {
            source_path: file.path.clone(),
            target_path: target,
            kind: PlanKind::Place,
            decided_by,
            duplicate_of: None,
        }))?;
        stats.placed_files += 1;
    }

    for (source, canonical, decided_by) in file_skips {
        let target = file_targets
            .get(canonical)
            .cloned()
            .unwrap_or_else(|| canonical.to_string());
        writer.submit(WriteOp::UpsertPlanEntry(PlanEntry {
            source_path: source.to_string(),
            target_path: target,
            kind: PlanKind::SkipDuplicate,
            decided_by,
            duplicate_of: Some(canonical.to_string()),
        }))?;
        stats.skipped_duplicates += 1;
    }

    writer.flush()?;
    Ok(stats)
}

/// Read the committed plan, source-path ascending.
pub fn load_plan(catalog: &Catalog) -> Result<Vec<PlanEntry>> {
    let reader = catalog.reader()?;
    plan::list_entries(&reader)
}

/// Category base for a keep-unit target. The unit's own category wins;
/// otherwise the nearest classified ancestor's category is extended with
/// the relative path down to the unit's parent. Dated-backup metadata
/// appends `year[/month]` when the category does not already mention it.
fn unit_base_category(
    folder: &FolderRecord,
    folder_by_path: &BTreeMap<&str, &FolderRecord>,
    categories: &CategorySet,
    stats: &mut PlanStats,
) -> String {
    let mut base = match &folder.category {
        Some(category) => validated_category(Some(category), categories, stats),
        None => {
            let mut found = None;
            let mut cursor = folder.parent.clone();
            while let Some(path) = cursor {
                if let Some(ancestor) = folder_by_path.get(path.as_str()) {
                    if let Some(category) = &ancestor.category {
                        let relative = folder
                            .parent
                            .as_deref()
                            .unwrap_or("")
                            .strip_prefix(path.as_str())
                            .unwrap_or("")
                            .trim_matches('/');
                        let validated = validated_category(Some(category), categories, stats);
                        found = Some(if relative.is_empty() {
                            validated
                        } else {
                            format!("{}/{}", validated, relative)
                        });
                        break;
                    }
                    cursor = ancestor.parent.clone();
                } else {
                    break;
                }
            }
            found.unwrap_or_else(|| DEFAULT_CATEGORY.to_string())
        }
    };

    if let Some(year) = folder.metadata.get("backup_year") {
        if !base.contains(year.as_str()) {
            base.push('/');
            base.push_str(year);
            if let Some(month) = folder.metadata.get("backup_month") {
                base.push('/');
                base.push_str(month);
            }
        }
    }

    base
}

fn validated_category(
    category: Option<&str>,
    categories: &CategorySet,
    stats: &mut PlanStats,
) -> String {
    match category {
        Some(category) if categories.is_legal(category) => category.trim_matches('/').to_string(),
        Some(category) => {
            log::warn!(
                "Category '{}' is not in the categories file; falling back to {}",
                category,
                DEFAULT_CATEGORY
            );
            stats.category_fallbacks += 1;
            DEFAULT_CATEGORY.to_string()
        }
        None => DEFAULT_CATEGORY.to_string(),
    }
}

/// Claim `desired`, or the first free ` (n)` variant of it. For files the
/// counter goes before the extension: `name (2).ext`.
fn unique_target(
    used: &mut BTreeSet<String>,
    desired: String,
    split_extension: bool,
) -> Result<String> {
    if used.insert(desired.clone()) {
        return Ok(desired);
    }

    let (stem, ext) = if split_extension {
        split_target_extension(&desired)
    } else {
        (desired.as_str(), "")
    };

    for n in 2..10_000 {
        let candidate = format!("{} ({}){}", stem, n, ext);
        if used.insert(candidate.clone()) {
            return Ok(candidate);
        }
    }

    Err(RyddeError::PlanConflict(desired))
}

/// Split `Documents/report.pdf` into (`Documents/report`, `.pdf`). Dotfiles
/// and extension-less names keep their whole basename as the stem.
fn split_target_extension(target: &str) -> (&str, &str) {
    let basename_start = target.rfind('/').map(|i| i + 1).unwrap_or(0);
    let basename = &target[basename_start..];
    match basename.rfind('.') {
        Some(dot) if dot > 0 => target.split_at(basename_start + dot),
        _ => (target, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_target_extension() {
        assert_eq!(
            split_target_extension("Documents/report.pdf"),
            ("Documents/report", ".pdf")
        );
        assert_eq!(split_target_extension("Documents/README"), ("Documents/README", ""));
        assert_eq!(split_target_extension("Other/.bashrc"), ("Other/.bashrc", ""));
        assert_eq!(
            split_target_extension("Media/archive.tar.gz"),
            ("Media/archive.tar", ".gz")
        );
    }

    #[test]
    fn test_unique_target_suffixing() {
        let mut used = BTreeSet::new();
        assert_eq!(
            unique_target(&mut used, "Documents/a.pdf".to_string(), true).unwrap(),
            "Documents/a.pdf"
        );
        assert_eq!(
            unique_target(&mut used, "Documents/a.pdf".to_string(), true).unwrap(),
            "Documents/a (2).pdf"
        );
        assert_eq!(
            unique_target(&mut used, "Documents/a.pdf".to_string(), true).unwrap(),
            "Documents/a (3).pdf"
        );
        assert_eq!(
            unique_target(&mut used, "Photos/Trip".to_string(), false).unwrap(),
            "Photos/Trip"
        );
        assert_eq!(
            unique_target(&mut used, "Photos/Trip".to_string(), false).unwrap(),
            "Photos/Trip (2)"
        );
    }
}
