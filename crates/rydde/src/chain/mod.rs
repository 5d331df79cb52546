//! The classifier chain: Rules → AI → Default, with strict top-down
//! inheritance.
//!
//! Folders are processed in ascending depth, path-sorted within a band, and
//! the catalog writer is flushed between bands. That flush is the depth
//! barrier: a folder is never dispatched before every ancestor's decision
//! is committed, so the parent lookup below always sees the truth.
//!
//! Once `keep` is stamped on a folder, descendants are stamped
//! `(keep, inherited)` without ever touching the rules engine or the AI.
//! Evaluating a descendant of a committed `keep` is a fatal invariant
//! violation, as is classifying the same folder twice in one run.

use crate::ai::{AiClient, FileQuery, FolderQuery};
use crate::catalog::{files, folders, Catalog, CatalogWriter, DecisionSource, FolderAction, FolderRecord, WriteOp};
use crate::error::{Result, RyddeError};
use crate::rules::engine::{FolderHint, SurveyFile};
use crate::rules::{RuleEngine, RuleMode, DEFAULT_CATEGORY, RESERVED_CAPTURES};
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ChainOptions {
    /// Folder queries bundled into one AI dispatch.
    pub ai_batch: usize,
    /// Upper bound on files surveyed per folder.
    pub folder_sample: usize,
    /// Wall-clock budget for the whole stage.
    pub stage_budget: Option<Duration>,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            ai_batch: 16,
            folder_sample: 64,
            stage_budget: None,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ChainStats {
    pub folders_classified: usize,
    pub folders_inherited: usize,
    pub folders_rule_final: usize,
    pub folders_ai: usize,
    pub folders_default: usize,
    pub files_classified: usize,
    pub files_rule_final: usize,
    pub files_ai: usize,
    pub files_inherited: usize,
    pub files_default: usize,
    pub ai_unavailable: usize,
}

/// Run the full chain: folders first (depth-ascending), then files.
pub fn run_chain(
    catalog: &Catalog,
    writer: &CatalogWriter,
    engine: &RuleEngine,
    ai: Option<&AiClient>,
    options: &ChainOptions,
) -> Result<ChainStats> {
    let deadline = options.stage_budget.map(|budget| Instant::now() + budget);
    let mut stats = ChainStats::default();

    classify_folders(catalog, writer, engine, ai, options, deadline, &mut stats)?;
    classify_files(catalog, writer, engine, ai, options, deadline, &mut stats)?;

    Ok(stats)
}

/// A folder waiting on the AI stage, with the evidence we hand over.
struct PendingFolder {
    record: FolderRecord,
    parent_action: Option<FolderAction>,
    hint: Option<FolderHint>,
    metadata: BTreeMap<String, String>,
    query: FolderQuery,
}

fn classify_folders(
    catalog: &Catalog,
    writer: &CatalogWriter,
    engine: &RuleEngine,
    ai: Option<&AiClient>,
    options: &ChainOptions,
    deadline: Option<Instant>,
    stats: &mut ChainStats,
) -> Result<()> {
    let reader = catalog.reader()?;
    let Some((min_depth, max_depth)) = folders::depth_range(&reader)? else {
        return Ok(());
    };

    let mut seen_this_run: HashSet<String> = HashSet::new();

    for depth in min_depth..=max_depth {
        let band = folders::folders_at_depth(&reader, depth)?;
        let mut pending: Vec<PendingFolder> = Vec::new();

        for folder in band {
            // Idempotence: a committed decision is never revisited.
            if folder.action != FolderAction::Unknown {
                continue;
            }

            if !seen_this_run.insert(folder.path.clone()) {
                return Err(RyddeError::InvariantViolation(format!(
                    "folder {} dispatched to the chain twice; catalog at {}",
                    folder.path,
                    catalog.path().display()
                )));
            }

            let parent = match &folder.parent {
                Some(parent_path) => folders::get_folder(&reader, parent_path)?,
                None => None,
            };

            if let Some(parent) = &parent {
                if parent.action == FolderAction::Keep {
                    commit_decision(
                        writer,
                        &folder,
                        FolderAction::Keep,
                        DecisionSource::Inherited,
                        None,
                        None,
                        stats,
                    )?;
                    stats.folders_inherited += 1;
                    continue;
                }
                if parent.action == FolderAction::Unknown && !folder.is_root {
                    return Err(RyddeError::InvariantViolation(format!(
                        "folder {} reached the chain before its parent was committed",
                        folder.path
                    )));
                }
            }

            // Rules stage: a direct folder-path rule first, then the survey
            // over sampled descendant files. Source roots only direct-match;
            // a root never adopts keep from a marker buried inside it, but a
            // rule naming the root itself still routes it through the AI.
            let (hint, sample_metadata) = if folder.is_root {
                (engine.folder_hint_direct(&folder.path), BTreeMap::new())
            } else {
                match engine.folder_hint_direct(&folder.path) {
                    Some(hint) => (Some(hint), BTreeMap::new()),
                    None => survey_folder(&reader, engine, &folder, options.folder_sample)?,
                }
            };

            let mut metadata = sample_metadata;
            if let Some(hint) = &hint {
                metadata.extend(hint.captures.clone());
            }

            if let Some(hint) = &hint {
                if hint.mode == RuleMode::Final {
                    let category = hint.category.clone();
                    commit_decision(
                        writer,
                        &folder,
                        hint.folder_action,
                        DecisionSource::RuleFinal,
                        category,
                        Some(&metadata),
                        stats,
                    )?;
                    stats.folders_rule_final += 1;
                    continue;
                }
            }

            let parent_action = parent.as_ref().map(|p| p.action);
            let budget_left = deadline.map_or(true, |d| Instant::now() < d);
            if let Some(ai_client) = ai.filter(|_| budget_left && (!folder.is_root || hint.is_some())) {
                let query = build_folder_query(&reader, &folder, &hint)?;
                pending.push(PendingFolder {
                    record: folder,
                    parent_action,
                    hint,
                    metadata,
                    query,
                });
                if pending.len() >= options.ai_batch {
                    dispatch_folder_batch(writer, ai_client, &mut pending, deadline, stats)?;
                }
            } else {
                let (action, source) = default_decision(parent_action, hint.as_ref());
                let category = hint.as_ref().and_then(|h| h.category.clone());
                commit_decision(writer, &folder, action, source, category, Some(&metadata), stats)?;
                stats.folders_default += 1;
            }
        }

        if let Some(ai) = ai {
            dispatch_folder_batch(writer, ai, &mut pending, deadline, stats)?;
        }

        // The depth barrier: nothing at depth+1 runs until this band is
        // committed and visible to readers.
        writer.flush()?;
    }

    Ok(())
}

/// Sample descendant files and harvest reserved backup metadata from them.
fn survey_folder(
    reader: &Connection,
    engine: &RuleEngine,
    folder: &FolderRecord,
    sample_limit: usize,
) -> Result<(Option<FolderHint>, BTreeMap<String, String>)> {
    let sample_records = files::files_under(reader, &folder.path, Some(sample_limit))?;

    let mut harvested = BTreeMap::new();
    let sample: Vec<SurveyFile> = sample_records
        .into_iter()
        .map(|f| {
            for key in RESERVED_CAPTURES {
                if let Some(value) = f.metadata.get(*key) {
                    harvested
                        .entry(key.to_string())
                        .or_insert_with(|| value.clone());
                }
            }
            SurveyFile {
                path: f.path,
                mime: f.mime.unwrap_or_default(),
                metadata: f.metadata,
            }
        })
        .collect();

    Ok((engine.survey(&sample), harvested))
}

fn build_folder_query(
    reader: &Connection,
    folder: &FolderRecord,
    hint: &Option<FolderHint>,
) -> Result<FolderQuery> {
    let children = files::files_in_folder(reader, &folder.path)?;
    let subfolders = folders::subfolders_of(reader, &folder.path)?;

    let mut sample_names: Vec<String> = subfolders.iter().map(|f| format!("{}/", f.name)).collect();
    sample_names.extend(children.iter().map(|f| f.name.clone()));
    sample_names.truncate(24);

    let mut histogram: BTreeMap<String, usize> = BTreeMap::new();
    for file in &children {
        if let Some(mime) = &file.mime {
            *histogram.entry(mime.clone()).or_insert(0) += 1;
        }
    }
    let mut mime_histogram: Vec<(String, usize)> = histogram.into_iter().collect();
    mime_histogram.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    Ok(FolderQuery {
        path: folder.path.clone(),
        name: folder.name.clone(),
        sample_names,
        mime_histogram,
        hint_action: hint.as_ref().map(|h| h.folder_action),
        hint_category: hint.as_ref().and_then(|h| h.category.clone()),
    })
}

fn dispatch_folder_batch(
    writer: &CatalogWriter,
    ai: &AiClient,
    pending: &mut Vec<PendingFolder>,
    deadline: Option<Instant>,
    stats: &mut ChainStats,
) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }

    let budget_left = deadline.map_or(true, |d| Instant::now() < d);
    let results = if budget_left {
        let queries: Vec<FolderQuery> = pending.iter().map(|p| p.query.clone()).collect();
        Some(ai.classify_folders(&queries))
    } else {
        None
    };

    for (i, item) in pending.drain(..).enumerate() {
        let outcome = results.as_ref().map(|r| &r[i]);
        match outcome {
            Some(Ok(decision)) => {
                let source = if item.hint.is_some() {
                    DecisionSource::RuleHintAi
                } else {
                    DecisionSource::Ai
                };
                let category = decision
                    .category
                    .clone()
                    .or_else(|| item.hint.as_ref().and_then(|h| h.category.clone()));
                commit_decision(
                    writer,
                    &item.record,
                    decision.decision,
                    source,
                    category,
                    Some(&item.metadata),
                    stats,
                )?;
                stats.folders_ai += 1;
            }
            other => {
                if let Some(Err(e)) = other {
                    log::warn!("AI fell over for {}: {}; using default", item.record.path, e);
                }
                stats.ai_unavailable += 1;
                let (action, source) = default_decision(item.parent_action, item.hint.as_ref());
                let category = item.hint.as_ref().and_then(|h| h.category.clone());
                commit_decision(
                    writer,
                    &item.record,
                    action,
                    source,
                    category,
                    Some(&item.metadata),
                    stats,
                )?;
                stats.folders_default += 1;
            }
        }
    }

    Ok(())
}

/// The Default stage. Children of a `keep_except` anchor stay kept unless a
/// rule or the AI disaggregated them; a rule-detected keep marker holds even
/// without AI; everything else, source roots included, disaggregates. A
/// root only ever carries a hint from a rule naming its own path, so a keep
/// hint is honored for roots too.
fn default_decision(
    parent_action: Option<FolderAction>,
    hint: Option<&FolderHint>,
) -> (FolderAction, DecisionSource) {
    if parent_action == Some(FolderAction::KeepExcept) {
        return (FolderAction::Keep, DecisionSource::Inherited);
    }
    if let Some(hint) = hint {
        if hint.folder_action == FolderAction::Keep {
            return (FolderAction::Keep, DecisionSource::Default);
        }
    }
    (FolderAction::Disaggregate, DecisionSource::Default)
}

fn commit_decision(
    writer: &CatalogWriter,
    folder: &FolderRecord,
    action: FolderAction,
    source: DecisionSource,
    category: Option<String>,
    metadata: Option<&BTreeMap<String, String>>,
    stats: &mut ChainStats,
) -> Result<()> {
    stats.folders_classified += 1;
    writer.submit(WriteOp::SetFolderDecision {
        path: folder.path.clone(),
        action,
        source,
        category,
    })?;

    if let Some(metadata) = metadata {
        if !metadata.is_empty() {
            let mut merged = folder.metadata.clone();
            merged.extend(metadata.clone());
            writer.submit(WriteOp::SetFolderMetadata {
                path: folder.path.clone(),
                metadata: merged,
            })?;
        }
    }

    Ok(())
}

/// A file waiting on AI category refinement.
struct PendingFile {
    path: String,
    hint_category: Option<String>,
    hinted: bool,
    query: FileQuery,
}

fn classify_files(
    catalog: &Catalog,
    writer: &CatalogWriter,
    engine: &RuleEngine,
    ai: Option<&AiClient>,
    options: &ChainOptions,
    deadline: Option<Instant>,
    stats: &mut ChainStats,
) -> Result<()> {
    let reader = catalog.reader()?;
    let all_files = files::list_all_files(&reader)?;
    let mut pending: Vec<PendingFile> = Vec::new();

    for file in all_files {
        if file.class_source.is_some() {
            continue;
        }
        stats.files_classified += 1;

        let folder = folders::get_folder(&reader, &file.parent)?;
        let folder_action = folder.as_ref().map(|f| f.action).unwrap_or(FolderAction::Unknown);

        // Under a kept folder the file rides with the unit; no rules, no AI.
        if folder_action == FolderAction::Keep {
            let category = folder
                .as_ref()
                .and_then(|f| f.category.clone())
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
            writer.submit(WriteOp::SetFileClassification {
                path: file.path.clone(),
                category,
                source: DecisionSource::Inherited,
                confidence: None,
            })?;
            stats.files_inherited += 1;
            continue;
        }

        let matched = engine.match_file(
            &file.path,
            file.mime.as_deref().unwrap_or(crate::probe::FALLBACK_MIME),
            &file.metadata,
        );

        if let Some(m) = &matched {
            if !m.captures.is_empty() {
                let mut merged = file.metadata.clone();
                merged.extend(m.captures.clone());
                writer.submit(WriteOp::SetFileMetadata {
                    path: file.path.clone(),
                    metadata: merged,
                })?;
            }
        }

        match matched {
            Some(m) if m.mode == RuleMode::Final => {
                writer.submit(WriteOp::SetFileClassification {
                    path: file.path.clone(),
                    category: m.category,
                    source: DecisionSource::RuleFinal,
                    confidence: None,
                })?;
                stats.files_rule_final += 1;
            }
            other => {
                let hint_category = other.as_ref().map(|m| m.category.clone());
                let budget_left = deadline.map_or(true, |d| Instant::now() < d);
                let refine = ai.is_some() && budget_left && folder_action == FolderAction::Disaggregate;

                if refine {
                    pending.push(PendingFile {
                        path: file.path.clone(),
                        hinted: other.is_some(),
                        query: FileQuery {
                            path: file.path.clone(),
                            name: file.name.clone(),
                            mime: file
                                .mime
                                .clone()
                                .unwrap_or_else(|| crate::probe::FALLBACK_MIME.to_string()),
                            hint_category: hint_category.clone(),
                        },
                        hint_category,
                    });
                    if pending.len() >= options.ai_batch {
                        dispatch_file_batch(writer, ai.unwrap(), &mut pending, deadline, stats)?;
                    }
                } else if let Some(category) = hint_category {
                    writer.submit(WriteOp::SetFileClassification {
                        path: file.path.clone(),
                        category,
                        source: DecisionSource::Default,
                        confidence: None,
                    })?;
                    stats.files_default += 1;
                } else if let Some(category) = folder.as_ref().and_then(|f| f.category.clone()) {
                    // No rule, no AI: the file rides on its folder's category.
                    writer.submit(WriteOp::SetFileClassification {
                        path: file.path.clone(),
                        category,
                        source: DecisionSource::Inherited,
                        confidence: None,
                    })?;
                    stats.files_inherited += 1;
                } else {
                    writer.submit(WriteOp::SetFileClassification {
                        path: file.path.clone(),
                        category: DEFAULT_CATEGORY.to_string(),
                        source: DecisionSource::Default,
                        confidence: None,
                    })?;
                    stats.files_default += 1;
                }
            }
        }
    }

    if let Some(ai) = ai {
        dispatch_file_batch(writer, ai, &mut pending, deadline, stats)?;
    }
    writer.flush()?;

    Ok(())
}

fn dispatch_file_batch(
    writer: &CatalogWriter,
    ai: &AiClient,
    pending: &mut Vec<PendingFile>,
    deadline: Option<Instant>,
    stats: &mut ChainStats,
) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }

    let budget_left = deadline.map_or(true, |d| Instant::now() < d);
    let results = if budget_left {
        let queries: Vec<FileQuery> = pending.iter().map(|p| p.query.clone()).collect();
        Some(ai.refine_files(&queries))
    } else {
        None
    };

    for (i, item) in pending.drain(..).enumerate() {
        match results.as_ref().map(|r| &r[i]) {
            Some(Ok(decision)) => {
                let category = decision
                    .category
                    .clone()
                    .or_else(|| item.hint_category.clone())
                    .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
                let source = if item.hinted {
                    DecisionSource::RuleHintAi
                } else {
                    DecisionSource::Ai
                };
                writer.submit(WriteOp::SetFileClassification {
                    path: item.path,
                    category,
                    source,
                    confidence: decision.confidence,
                })?;
                stats.files_ai += 1;
            }
            _ => {
                stats.ai_unavailable += 1;
                let category = item
                    .hint_category
                    .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
                writer.submit(WriteOp::SetFileClassification {
                    path: item.path,
                    category,
                    source: DecisionSource::Default,
                    confidence: None,
                })?;
                stats.files_default += 1;
            }
        }
    }

    Ok(())
}

/// The inheritance invariant, re-checked over the committed catalog: every
/// descendant of a `keep` folder is `keep`/`inherited`. The planner runs
/// this before trusting the catalog.
///
/// Checked through parent links, not sorted-path adjacency: in path order a
/// sibling like `Photos-old` sorts between `Photos` and `Photos/child`
/// (`-` < `/`), so a kept folder and its descendants are not contiguous.
pub fn verify_keep_inheritance(reader: &Connection) -> Result<()> {
    let all = folders::list_all_folders(reader)?;
    let by_path: HashMap<&str, &FolderRecord> =
        all.iter().map(|f| (f.path.as_str(), f)).collect();

    for folder in &all {
        let mut cursor = folder.parent.as_deref();
        while let Some(parent_path) = cursor {
            let Some(ancestor) = by_path.get(parent_path) else {
                break;
            };
            if ancestor.action == FolderAction::Keep {
                if folder.action != FolderAction::Keep
                    || folder.source != Some(DecisionSource::Inherited)
                {
                    return Err(RyddeError::InvariantViolation(format!(
                        "{} sits under kept {} but is {}/{}",
                        folder.path,
                        ancestor.path,
                        folder.action.as_str(),
                        folder.source.map(|s| s.as_str()).unwrap_or("unset")
                    )));
                }
                break;
            }
            cursor = ancestor.parent.as_deref();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, FileRecord};
    use crate::rules::RuleSet;
    use chrono::Utc;

    fn test_engine(csv: &str) -> RuleEngine {
        RuleEngine::new(RuleSet::from_reader(csv.as_bytes()).unwrap())
    }

    fn folder(path: &str, depth: i64, is_root: bool) -> FolderRecord {
        let (parent, name) = path.rsplit_once('/').unwrap();
        FolderRecord {
            path: path.to_string(),
            parent: if is_root { None } else { Some(parent.to_string()) },
            name: name.to_string(),
            depth,
            file_count: 0,
            dir_count: 0,
            modified_at: None,
            agg_hash: None,
            action: FolderAction::Unknown,
            source: None,
            category: None,
            metadata: BTreeMap::new(),
            is_root,
            duplicate_group: None,
            scanned_at: Utc::now(),
        }
    }

    fn file(path: &str, mime: &str) -> FileRecord {
        let (parent, name) = path.rsplit_once('/').unwrap();
        FileRecord {
            path: path.to_string(),
            parent: parent.to_string(),
            name: name.to_string(),
            size_bytes: 1,
            modified_at: None,
            mime: Some(mime.to_string()),
            content_hash: None,
            metadata: BTreeMap::new(),
            category: None,
            class_source: None,
            confidence: None,
            duplicate_group: None,
            error: None,
            scanned_at: Utc::now(),
        }
    }

    fn setup() -> (Catalog, CatalogWriter, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("c.db")).unwrap();
        let writer = catalog.spawn_writer(100).unwrap();
        (catalog, writer, dir)
    }

    #[test]
    fn test_keep_marker_cascades_and_descendants_inherit() {
        let (catalog, writer, _dir) = setup();

        writer.submit(WriteOp::UpsertFolder(folder("/src", 1, true))).unwrap();
        writer.submit(WriteOp::UpsertFolder(folder("/src/project", 2, false))).unwrap();
        writer.submit(WriteOp::UpsertFolder(folder("/src/project/.git", 3, false))).unwrap();
        writer.submit(WriteOp::UpsertFolder(folder("/src/project/src", 3, false))).unwrap();
        writer.submit(WriteOp::UpsertFile(file("/src/project/.git/config", "text/plain"))).unwrap();
        writer.submit(WriteOp::UpsertFile(file("/src/project/src/main.c", "text/x-c"))).unwrap();
        writer.flush().unwrap();

        let engine = test_engine("^.*/\\.git/.*$, *, System/Metadata, keep, final\n");
        let stats = run_chain(&catalog, &writer, &engine, None, &ChainOptions::default()).unwrap();
        writer.flush().unwrap();

        let reader = catalog.reader().unwrap();
        let root = folders::get_folder(&reader, "/src").unwrap().unwrap();
        assert_eq!(root.action, FolderAction::Disaggregate);
        assert_eq!(root.source, Some(DecisionSource::Default));

        let project = folders::get_folder(&reader, "/src/project").unwrap().unwrap();
        assert_eq!(project.action, FolderAction::Keep);
        assert_eq!(project.source, Some(DecisionSource::RuleFinal));

        for path in ["/src/project/.git", "/src/project/src"] {
            let sub = folders::get_folder(&reader, path).unwrap().unwrap();
            assert_eq!(sub.action, FolderAction::Keep);
            assert_eq!(sub.source, Some(DecisionSource::Inherited));
        }

        assert_eq!(stats.folders_rule_final, 1);
        assert_eq!(stats.folders_inherited, 2);
        verify_keep_inheritance(&reader).unwrap();
    }

    #[test]
    fn test_keep_except_children_default_to_inherited_keep() {
        let (catalog, writer, _dir) = setup();

        writer.submit(WriteOp::UpsertFolder(folder("/home/alice", 2, true))).unwrap();
        writer.submit(WriteOp::UpsertFolder(folder("/home/alice/.config", 3, false))).unwrap();
        writer.submit(WriteOp::UpsertFolder(folder("/home/alice/Documents", 3, false))).unwrap();
        writer.submit(WriteOp::UpsertFile(file("/home/alice/Documents/cv.pdf", "application/pdf"))).unwrap();
        writer.flush().unwrap();

        let engine = test_engine(
            "^/home/alice$, *, People/Alice, keep_except, final\n\
             ^.*/Documents$, *, Documents, disaggregate, final\n\
             ^.*\\.pdf$, */pdf, Documents/Inbox, disaggregate, final\n",
        );
        run_chain(&catalog, &writer, &engine, None, &ChainOptions::default()).unwrap();
        writer.flush().unwrap();

        let reader = catalog.reader().unwrap();
        let alice = folders::get_folder(&reader, "/home/alice").unwrap().unwrap();
        assert_eq!(alice.action, FolderAction::KeepExcept);
        assert_eq!(alice.source, Some(DecisionSource::RuleFinal));

        let config = folders::get_folder(&reader, "/home/alice/.config").unwrap().unwrap();
        assert_eq!(config.action, FolderAction::Keep);
        assert_eq!(config.source, Some(DecisionSource::Inherited));

        let documents = folders::get_folder(&reader, "/home/alice/Documents").unwrap().unwrap();
        assert_eq!(documents.action, FolderAction::Disaggregate);

        let cv = files::get_file(&reader, "/home/alice/Documents/cv.pdf").unwrap().unwrap();
        assert_eq!(cv.category.as_deref(), Some("Documents/Inbox"));
        assert_eq!(cv.class_source, Some(DecisionSource::RuleFinal));
    }

    #[test]
    fn test_no_rules_no_ai_defaults_to_disaggregate() {
        let (catalog, writer, _dir) = setup();

        writer.submit(WriteOp::UpsertFolder(folder("/src", 1, true))).unwrap();
        writer.submit(WriteOp::UpsertFolder(folder("/src/Misc", 2, false))).unwrap();
        writer.submit(WriteOp::UpsertFile(file("/src/Misc/whatever.bin", "application/octet-stream"))).unwrap();
        writer.flush().unwrap();

        let engine = test_engine("^$, text/nothing, X, keep, final\n");
        run_chain(&catalog, &writer, &engine, None, &ChainOptions::default()).unwrap();
        writer.flush().unwrap();

        let reader = catalog.reader().unwrap();
        let misc = folders::get_folder(&reader, "/src/Misc").unwrap().unwrap();
        assert_eq!(misc.action, FolderAction::Disaggregate);
        assert_eq!(misc.source, Some(DecisionSource::Default));

        let file = files::get_file(&reader, "/src/Misc/whatever.bin").unwrap().unwrap();
        assert_eq!(file.category.as_deref(), Some(DEFAULT_CATEGORY));
        assert_eq!(file.class_source, Some(DecisionSource::Default));
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let (catalog, writer, _dir) = setup();

        writer.submit(WriteOp::UpsertFolder(folder("/src", 1, true))).unwrap();
        writer.submit(WriteOp::UpsertFolder(folder("/src/d", 2, false))).unwrap();
        writer.flush().unwrap();

        let engine = test_engine(".*, */pdf, Documents, disaggregate, final\n");
        let first = run_chain(&catalog, &writer, &engine, None, &ChainOptions::default()).unwrap();
        assert_eq!(first.folders_default, 2);

        let second = run_chain(&catalog, &writer, &engine, None, &ChainOptions::default()).unwrap();
        assert_eq!(second.folders_default, 0);
        assert_eq!(second.folders_inherited, 0);
        assert_eq!(second.files_classified, 0);
    }

    #[test]
    fn test_verify_sees_past_prefix_siblings() {
        // `Photos-old` sorts between `Photos` and `Photos/child` in path
        // order; the violation under `Photos` must still be caught.
        let (catalog, writer, _dir) = setup();

        let mut kept = folder("/src/Photos", 2, false);
        kept.action = FolderAction::Keep;
        kept.source = Some(DecisionSource::RuleFinal);
        let mut sibling = folder("/src/Photos-old", 2, false);
        sibling.action = FolderAction::Disaggregate;
        sibling.source = Some(DecisionSource::Default);
        let mut bad_child = folder("/src/Photos/child", 3, false);
        bad_child.action = FolderAction::Disaggregate;
        bad_child.source = Some(DecisionSource::Default);

        writer.submit(WriteOp::UpsertFolder(kept)).unwrap();
        writer.submit(WriteOp::UpsertFolder(sibling)).unwrap();
        writer.submit(WriteOp::UpsertFolder(bad_child)).unwrap();
        writer.flush().unwrap();

        let reader = catalog.reader().unwrap();
        let err = verify_keep_inheritance(&reader).unwrap_err();
        assert!(err.to_string().contains("/src/Photos/child"));

        // Correcting the child makes the same layout pass.
        let mut fixed = folder("/src/Photos/child", 3, false);
        fixed.action = FolderAction::Keep;
        fixed.source = Some(DecisionSource::Inherited);
        writer.submit(WriteOp::UpsertFolder(fixed)).unwrap();
        writer.flush().unwrap();
        verify_keep_inheritance(&reader).unwrap();
    }

    #[test]
    fn test_verify_inheritance_catches_violation() {
        let (catalog, writer, _dir) = setup();

        let mut kept = folder("/src/kept", 2, false);
        kept.action = FolderAction::Keep;
        kept.source = Some(DecisionSource::RuleFinal);
        let mut bad_child = folder("/src/kept/child", 3, false);
        bad_child.action = FolderAction::Disaggregate;
        bad_child.source = Some(DecisionSource::Default);

        writer.submit(WriteOp::UpsertFolder(kept)).unwrap();
        writer.submit(WriteOp::UpsertFolder(bad_child)).unwrap();
        writer.flush().unwrap();

        let reader = catalog.reader().unwrap();
        assert!(matches!(
            verify_keep_inheritance(&reader).unwrap_err(),
            RyddeError::InvariantViolation(_)
        ));
    }
}
