use rydde_lib::catalog::Catalog;
use rydde_lib::pipeline::{self, PipelineReport};
use rydde_lib::probe::FsProbe;
use rydde_lib::{CategorySet, Config, HashAlgorithm, Mode, RuleEngine, RuleSet};
use std::path::{Path, PathBuf};

pub const CATEGORIES: &str = "\
Documents
Photos
Media
Backups
System
People
Other/Unsorted
";

pub fn test_config(db: PathBuf) -> Config {
    Config {
        catalog_path: db,
        mode: Mode::All,
        hash_algorithm: HashAlgorithm::Blake3,
        batch_size: 50,
        folder_sample: 64,
        scan_workers: 2,
        hash_workers: 2,
        move_workers: 1,
        ai: Default::default(),
    }
}

/// Scan/hash/classify/plan one tree without AI and hand back the catalog.
pub fn run_pipeline(tree: &Path, rules_csv: &str, db: &Path) -> (Catalog, PipelineReport) {
    let catalog = Catalog::open(db).unwrap();
    let config = test_config(db.to_path_buf());
    let engine = RuleEngine::new(RuleSet::from_reader(rules_csv.as_bytes()).unwrap());
    let categories = CategorySet::from_reader(CATEGORIES.as_bytes()).unwrap();

    let report = pipeline::run(
        &catalog,
        &config,
        &engine,
        &categories,
        &FsProbe,
        &[tree.to_path_buf()],
        None,
    )
    .unwrap();

    (catalog, report)
}

/// Absolute catalog path of an entry inside the (canonicalized) tree root.
pub fn abs(tree: &Path, relative: &str) -> String {
    let root = tree.canonicalize().unwrap();
    if relative.is_empty() {
        root.to_string_lossy().to_string()
    } else {
        root.join(relative).to_string_lossy().to_string()
    }
}
