//! Durable catalog of everything the pipeline knows: file and folder
//! records, content hashes, duplicate groups, and the emitted plan.
//!
//! One SQLite file in WAL mode. All mutation goes through a single writer
//! thread ([`writer::CatalogWriter`]) committing in batches; stages read
//! through their own connections and see the last committed batch.

pub mod files;
pub mod folders;
pub mod groups;
pub mod plan;
pub mod schema;
pub mod writer;

pub use writer::{CatalogWriter, WriteOp};

use crate::error::{Result, RyddeError};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What happens to a folder in the reorganization plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FolderAction {
    /// Preserve the folder and all descendants as one unit.
    Keep,
    /// Preserve the folder as an anchor, but evaluate descendants.
    KeepExcept,
    /// Redistribute contents into category targets.
    Disaggregate,
    /// Not yet classified.
    Unknown,
}

impl FolderAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderAction::Keep => "keep",
            FolderAction::KeepExcept => "keep_except",
            FolderAction::Disaggregate => "disaggregate",
            FolderAction::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "keep" => Ok(FolderAction::Keep),
            "keep_except" => Ok(FolderAction::KeepExcept),
            "disaggregate" => Ok(FolderAction::Disaggregate),
            "unknown" => Ok(FolderAction::Unknown),
            _ => Err(RyddeError::Config(format!("Invalid folder action: {}", s))),
        }
    }
}

/// Which stage of the chain produced a classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DecisionSource {
    RuleFinal,
    RuleHintAi,
    Ai,
    Inherited,
    Default,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::RuleFinal => "rule-final",
            DecisionSource::RuleHintAi => "rule-hint-ai",
            DecisionSource::Ai => "ai",
            DecisionSource::Inherited => "inherited",
            DecisionSource::Default => "default",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "rule-final" => Ok(DecisionSource::RuleFinal),
            "rule-hint-ai" => Ok(DecisionSource::RuleHintAi),
            "ai" => Ok(DecisionSource::Ai),
            "inherited" => Ok(DecisionSource::Inherited),
            "default" => Ok(DecisionSource::Default),
            _ => Err(RyddeError::Config(format!("Invalid decision source: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlanKind {
    Place,
    SkipDuplicate,
    KeepUnit,
}

impl PlanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanKind::Place => "place",
            PlanKind::SkipDuplicate => "skip-duplicate",
            PlanKind::KeepUnit => "keep-unit",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "place" => Ok(PlanKind::Place),
            "skip-duplicate" => Ok(PlanKind::SkipDuplicate),
            "keep-unit" => Ok(PlanKind::KeepUnit),
            _ => Err(RyddeError::Config(format!("Invalid plan entry kind: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GroupKind {
    File,
    Folder,
}

impl GroupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKind::File => "file",
            GroupKind::Folder => "folder",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(GroupKind::File),
            "folder" => Ok(GroupKind::Folder),
            _ => Err(RyddeError::Config(format!("Invalid duplicate group kind: {}", s))),
        }
    }
}

/// One scanned file. Created by the scanner, enriched by the probe and
/// hasher, classified by the chain, read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute POSIX path, primary key.
    pub path: String,
    /// Containing folder path.
    pub parent: String,
    pub name: String,
    pub size_bytes: i64,
    pub modified_at: Option<DateTime<Utc>>,
    pub mime: Option<String>,
    pub content_hash: Option<String>,
    /// Rule captures, EXIF fields, document-head token.
    pub metadata: BTreeMap<String, String>,
    pub category: Option<String>,
    pub class_source: Option<DecisionSource>,
    pub confidence: Option<f64>,
    pub duplicate_group: Option<i64>,
    pub error: Option<String>,
    pub scanned_at: DateTime<Utc>,
}

/// One scanned folder. Classified exactly once, in ascending depth order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderRecord {
    pub path: String,
    /// None for source roots.
    pub parent: Option<String>,
    pub name: String,
    pub depth: i64,
    pub file_count: i64,
    pub dir_count: i64,
    pub modified_at: Option<DateTime<Utc>>,
    /// Order-independent aggregate over child hashes.
    pub agg_hash: Option<String>,
    pub action: FolderAction,
    pub source: Option<DecisionSource>,
    pub category: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub is_root: bool,
    pub duplicate_group: Option<i64>,
    pub scanned_at: DateTime<Utc>,
}

/// Records sharing a content or aggregate hash. The canonical member is the
/// lowest path, then the shortest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub group_id: i64,
    pub kind: GroupKind,
    pub hash: String,
    pub member_count: i64,
    pub canonical_path: String,
    /// Bytes that disappear when only the canonical member is placed.
    pub waste_bytes: i64,
}

/// One line of the reorganization plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanEntry {
    pub source_path: String,
    pub target_path: String,
    pub kind: PlanKind,
    /// Decision source tag of the classification that produced the target.
    pub decided_by: String,
    /// For skip-duplicate entries, the canonical member's path.
    pub duplicate_of: Option<String>,
}

/// Handle to the catalog file. Cheap to clone; connections are opened per
/// use so every stage reads through its own snapshot.
#[derive(Debug, Clone)]
pub struct Catalog {
    path: PathBuf,
}

impl Catalog {
    /// Open (creating if needed) and verify the schema version. An
    /// incompatible catalog is a hard failure naming the offending file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        match schema::get_schema_version(&conn)? {
            Some(version) if version != schema::SCHEMA_VERSION => {
                return Err(RyddeError::SchemaVersionMismatch {
                    path,
                    found: version,
                    expected: schema::SCHEMA_VERSION,
                });
            }
            Some(_) => {}
            None => schema::initialize_schema(&conn)?,
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A fresh read connection. Readers see the last committed batch.
    pub fn reader(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(conn)
    }

    /// Spawn the single writer thread. Only one should exist per run.
    pub fn spawn_writer(&self, batch_size: usize) -> Result<CatalogWriter> {
        CatalogWriter::spawn(self.path.clone(), batch_size)
    }
}
