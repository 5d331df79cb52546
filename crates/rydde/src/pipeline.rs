//! Modal pipeline driver: wires the scanner, hasher, classifier chain, and
//! planner over one catalog, with per-stage worker pools and flush barriers
//! between stages.

use crate::ai::AiClient;
use crate::catalog::{files, folders, Catalog, CatalogWriter, WriteOp};
use crate::chain::{run_chain, ChainOptions, ChainStats};
use crate::config::{Config, HashAlgorithm, Mode};
use crate::error::Result;
use crate::index::dedup::{refresh_duplicate_groups, DedupStats};
use crate::index::hasher::{aggregate_hash, hash_file};
use crate::index::scanner::{scan_root, ScanStats};
use crate::planner::{build_plan, PlanStats};
use crate::probe::MetadataProbe;
use crate::rules::{CategorySet, RuleEngine};
use crossbeam_channel::bounded;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

static SHUTDOWN: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// The process-wide shutdown flag. Workers finish their current item and
/// drain to the next checkpoint once it flips.
pub fn shutdown_flag() -> Arc<AtomicBool> {
    SHUTDOWN
        .get_or_init(|| Arc::new(AtomicBool::new(false)))
        .clone()
}

extern "C" fn handle_sigint(_signum: libc::c_int) {
    if let Some(flag) = SHUTDOWN.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

/// Install the SIGINT handler that flips [`shutdown_flag`].
pub fn install_signal_handler() {
    let _ = shutdown_flag();
    let handler = handle_sigint as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
}

#[derive(Debug, Default, Clone)]
pub struct PipelineReport {
    pub scan: Option<ScanStats>,
    pub files_hashed: usize,
    pub folders_hashed: usize,
    pub dedup: Option<DedupStats>,
    pub chain: Option<ChainStats>,
    pub plan: Option<PlanStats>,
}

/// Run the selected stages over `roots`. Each stage ends on a writer flush,
/// so the next one reads a complete snapshot.
#[allow(clippy::too_many_arguments)]
pub fn run(
    catalog: &Catalog,
    config: &Config,
    engine: &RuleEngine,
    categories: &CategorySet,
    probe: &dyn MetadataProbe,
    roots: &[PathBuf],
    ai: Option<&AiClient>,
) -> Result<PipelineReport> {
    let writer = catalog.spawn_writer(config.batch_size)?;
    let mut report = PipelineReport::default();
    let mode = config.mode;

    if matches!(mode, Mode::Scan | Mode::All) {
        report.scan = Some(run_scan(catalog, &writer, probe, roots, config.scan_workers)?);
        writer.flush()?;
    }

    if matches!(mode, Mode::Hash | Mode::All) && !shutdown_flag().load(Ordering::SeqCst) {
        report.files_hashed = run_file_hashing(catalog, &writer, config.hash_algorithm, config.hash_workers)?;
        report.folders_hashed = run_folder_hashing(catalog, &writer, config.hash_algorithm)?;
        report.dedup = Some(refresh_duplicate_groups(catalog, &writer)?);
    }

    if matches!(mode, Mode::Classify | Mode::All) && !shutdown_flag().load(Ordering::SeqCst) {
        let options = ChainOptions {
            ai_batch: config.ai.batch_size,
            folder_sample: config.folder_sample,
            stage_budget: config.ai.stage_budget,
        };
        report.chain = Some(run_chain(catalog, &writer, engine, ai, &options)?);
    }

    if matches!(mode, Mode::Plan | Mode::All) && !shutdown_flag().load(Ordering::SeqCst) {
        report.plan = Some(build_plan(catalog, &writer, categories)?);
    }

    writer.close()?;

    if let Some(ai) = ai {
        let (input, output) = ai.usage();
        if input + output > 0 {
            log::info!("AI token usage: {} in, {} out", input, output);
        }
    }

    Ok(report)
}

fn run_scan(
    catalog: &Catalog,
    writer: &CatalogWriter,
    probe: &dyn MetadataProbe,
    roots: &[PathBuf],
    workers: usize,
) -> Result<ScanStats> {
    if roots.is_empty() {
        return Ok(ScanStats::default());
    }

    let (tx, rx) = bounded::<PathBuf>(roots.len());
    for root in roots {
        let _ = tx.send(root.clone());
    }
    drop(tx);

    let total = Mutex::new(ScanStats::default());
    let shutdown = shutdown_flag();
    let pool = workers.clamp(1, roots.len());

    std::thread::scope(|scope| {
        for _ in 0..pool {
            let rx = rx.clone();
            let shutdown = shutdown.clone();
            let total = &total;
            scope.spawn(move || {
                while let Ok(root) = rx.recv() {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    match scan_root(catalog, writer, probe, &root) {
                        Ok(stats) => total.lock().unwrap().merge(&stats),
                        Err(e) => {
                            log::error!("Scan of {} failed: {}", root.display(), e);
                            total.lock().unwrap().errors += 1;
                        }
                    }
                }
            });
        }
    });

    Ok(total.into_inner().unwrap())
}

fn run_file_hashing(
    catalog: &Catalog,
    writer: &CatalogWriter,
    algorithm: HashAlgorithm,
    workers: usize,
) -> Result<usize> {
    let reader = catalog.reader()?;
    let pending = files::files_missing_hash(&reader)?;
    if pending.is_empty() {
        return Ok(0);
    }

    let (tx, rx) = bounded::<String>(pending.len());
    for file in &pending {
        let _ = tx.send(file.path.clone());
    }
    drop(tx);

    let hashed = AtomicUsize::new(0);
    let shutdown = shutdown_flag();
    let pool = workers.clamp(1, pending.len());

    std::thread::scope(|scope| {
        for _ in 0..pool {
            let rx = rx.clone();
            let shutdown = shutdown.clone();
            let hashed = &hashed;
            scope.spawn(move || {
                while let Ok(path) = rx.recv() {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    match hash_file(&path, algorithm) {
                        Ok(hash) => {
                            if writer.submit(WriteOp::SetFileHash { path, hash }).is_err() {
                                break;
                            }
                            hashed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            log::warn!("Cannot hash {}: {}", path, e);
                            let _ = writer.submit(WriteOp::SetFileError {
                                path,
                                error: e.to_string(),
                            });
                        }
                    }
                }
            });
        }
    });

    writer.flush()?;
    Ok(hashed.load(Ordering::Relaxed))
}

/// Aggregate folder hashing, deepest folders first so every child hash is
/// known when its parent is computed.
fn run_folder_hashing(
    catalog: &Catalog,
    writer: &CatalogWriter,
    algorithm: HashAlgorithm,
) -> Result<usize> {
    let reader = catalog.reader()?;
    let descending = folders::folders_depth_descending(&reader)?;

    let mut computed: HashMap<String, String> = HashMap::new();
    let mut updated = 0usize;

    for folder in &descending {
        let mut children: Vec<(String, String)> = Vec::new();

        for file in files::files_in_folder(&reader, &folder.path)? {
            let hash = file.content_hash.unwrap_or_else(|| "unhashed".to_string());
            children.push((file.name, hash));
        }
        for sub in folders::subfolders_of(&reader, &folder.path)? {
            let hash = computed
                .get(&sub.path)
                .cloned()
                .or(sub.agg_hash)
                .unwrap_or_else(|| "unhashed".to_string());
            children.push((sub.name, hash));
        }

        let agg = aggregate_hash(&children, algorithm);
        computed.insert(folder.path.clone(), agg.clone());

        if folder.agg_hash.as_deref() != Some(agg.as_str()) {
            writer.submit(WriteOp::SetFolderHash {
                path: folder.path.clone(),
                hash: agg,
            })?;
            updated += 1;
        }
    }

    writer.flush()?;
    Ok(updated)
}
