//! Classification rules: ordered CSV rule table, compiled matchers, and the
//! category whitelist the planner validates against.
//!
//! A rule row is `path_regex, mime_glob, category_template, folder_action,
//! mode`. Rules are evaluated strictly in file order; the first rule whose
//! path regex and MIME glob both match wins. Named capture groups become the
//! matched file's metadata and may be referenced from the category template
//! as `{name}`.

pub mod engine;

pub use engine::{FileMatch, FolderHint, RuleEngine};

use crate::catalog::FolderAction;
use crate::error::{Result, RyddeError};
use globset::{Glob, GlobMatcher};
use regex::Regex;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

/// Synthetic MIME used when matching rules against folder paths.
pub const DIRECTORY_MIME: &str = "inode/directory";

/// Fallback category when no rule matches and AI is out of the picture.
pub const DEFAULT_CATEGORY: &str = "Other/Unsorted";

/// Capture names with reserved semantics. `category`/`subcategory` override
/// the rule's template; the `backup_*` components drive dated grouping in
/// the planner.
pub const RESERVED_CAPTURES: &[&str] = &[
    "category",
    "subcategory",
    "backup_job",
    "backup_year",
    "backup_month",
    "backup_time",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMode {
    /// The rule's decision is authoritative; no AI call.
    Final,
    /// The rule's decision is a hint; the AI produces the final answer.
    Ai,
}

impl RuleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleMode::Final => "final",
            RuleMode::Ai => "ai",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "final" => Ok(RuleMode::Final),
            "ai" => Ok(RuleMode::Ai),
            _ => Err(RyddeError::Config(format!(
                "Invalid rule mode '{}' (valid: final, ai)",
                s
            ))),
        }
    }
}

/// One compiled rule. Immutable after load.
#[derive(Debug, Clone)]
pub struct Rule {
    pub index: usize,
    pub pattern: Regex,
    pub mime_glob: GlobMatcher,
    pub mime_glob_src: String,
    pub category_template: String,
    pub folder_action: FolderAction,
    pub mode: RuleMode,
}

/// The ordered rule table.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| RyddeError::Config(format!("Cannot read rules file {}: {}", path.display(), e)))?;
        Self::from_reader(file)
    }

    /// Parse and compile a header-less rules CSV. `#` starts a comment line,
    /// fields are trimmed. Compilation fails fast on the first bad row.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .flexible(false)
            .from_reader(reader);

        let mut rules = Vec::new();
        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();

        for (line, record) in csv_reader.records().enumerate() {
            let record = record
                .map_err(|e| RyddeError::Config(format!("Rules row {}: {}", line + 1, e)))?;
            if record.len() != 5 {
                return Err(RyddeError::Config(format!(
                    "Rules row {}: expected 5 columns, got {}",
                    line + 1,
                    record.len()
                )));
            }

            let pattern_src = record.get(0).unwrap_or_default();
            let glob_src = record.get(1).unwrap_or_default();
            let template = record.get(2).unwrap_or_default();
            let action_src = record.get(3).unwrap_or_default();
            let mode_src = record.get(4).unwrap_or_default();

            let pattern = Regex::new(pattern_src).map_err(|e| {
                RyddeError::Config(format!("Rules row {}: bad regex: {}", line + 1, e))
            })?;
            let mime_glob = Glob::new(glob_src)
                .map_err(|e| RyddeError::Config(format!("Rules row {}: bad MIME glob: {}", line + 1, e)))?
                .compile_matcher();

            let folder_action = FolderAction::from_str(action_src)?;
            if folder_action == FolderAction::Unknown {
                return Err(RyddeError::Config(format!(
                    "Rules row {}: folder action 'unknown' is not allowed in the rules file",
                    line + 1
                )));
            }
            let mode = RuleMode::from_str(mode_src)?;

            let key = (pattern_src.to_string(), glob_src.to_string());
            if !seen.insert(key) {
                // The earlier rule shadows this one completely.
                log::warn!(
                    "Rules row {}: duplicate of an earlier pattern/glob pair, unreachable",
                    line + 1
                );
            }

            rules.push(Rule {
                index: rules.len(),
                pattern,
                mime_glob,
                mime_glob_src: glob_src.to_string(),
                category_template: template.to_string(),
                folder_action,
                mode,
            });
        }

        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Legal category path prefixes (single-column CSV).
///
/// Every target the planner emits must sit under one of these prefixes.
#[derive(Debug, Clone, Default)]
pub struct CategorySet {
    prefixes: BTreeSet<String>,
}

impl CategorySet {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            RyddeError::Config(format!("Cannot read categories file {}: {}", path.display(), e))
        })?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let mut prefixes = BTreeSet::new();
        for record in csv_reader.records() {
            let record = record.map_err(|e| RyddeError::Config(format!("Categories file: {}", e)))?;
            if let Some(prefix) = record.get(0) {
                if !prefix.is_empty() {
                    prefixes.insert(prefix.trim_matches('/').to_string());
                }
            }
        }

        if !prefixes.contains(DEFAULT_CATEGORY) {
            return Err(RyddeError::Config(format!(
                "Categories file must list the fallback category '{}'",
                DEFAULT_CATEGORY
            )));
        }

        Ok(Self { prefixes })
    }

    /// True when `category` equals a legal prefix or sits underneath one.
    pub fn is_legal(&self, category: &str) -> bool {
        let category = category.trim_matches('/');
        self.prefixes.iter().any(|p| {
            category == p || category.strip_prefix(p.as_str()).is_some_and(|rest| rest.starts_with('/'))
        })
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}
