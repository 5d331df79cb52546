pub mod ai;
pub mod catalog;
pub mod chain;
pub mod config;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod planner;
pub mod probe;
pub mod rules;

pub use ai::{parse_endpoint_specs, AiClient, AiDecision, EndpointSpec, Protocol};
pub use catalog::{
    Catalog, CatalogWriter, DecisionSource, DuplicateGroup, FileRecord, FolderAction,
    FolderRecord, GroupKind, PlanEntry, PlanKind, WriteOp,
};
pub use chain::{run_chain, verify_keep_inheritance, ChainOptions, ChainStats};
pub use config::{Config, HashAlgorithm, Mode};
pub use error::{Result, RyddeError};
pub use index::{
    aggregate_hash, canonical_path, empty_digest, hash_file, path_depth,
    refresh_duplicate_groups, scan_root, verify_hash, DedupStats, ScanStats,
};
pub use planner::{build_plan, load_plan, PlanStats};
pub use probe::{FsProbe, MetadataProbe};
pub use rules::{CategorySet, RuleEngine, RuleMode, RuleSet, DEFAULT_CATEGORY};
