//! First-match-wins evaluation of the rule table, template resolution from
//! named captures, and the per-folder survey that condenses file-level hits
//! into a folder hint.

use crate::catalog::FolderAction;
use crate::rules::{RuleMode, RuleSet, DIRECTORY_MIME};
use std::collections::BTreeMap;

/// Result of matching a single path/MIME pair against the table.
#[derive(Debug, Clone)]
pub struct FileMatch {
    pub rule_index: usize,
    /// Category with `{name}` references already substituted.
    pub category: String,
    pub folder_action: FolderAction,
    pub mode: RuleMode,
    /// Named capture groups extracted by the winning rule.
    pub captures: BTreeMap<String, String>,
}

/// Condensed rule evidence for one folder, fed to the AI stage when the
/// dominant rule's mode is `ai` and adopted directly when it is `final`.
#[derive(Debug, Clone)]
pub struct FolderHint {
    pub rule_index: usize,
    pub category: Option<String>,
    pub folder_action: FolderAction,
    pub mode: RuleMode,
    /// Files in the sample that hit the dominant rule.
    pub hits: usize,
    /// Files surveyed in total.
    pub sampled: usize,
    /// Captures from the dominant match, for folder metadata.
    pub captures: BTreeMap<String, String>,
}

/// A sampled file handed to [`RuleEngine::survey`].
#[derive(Debug, Clone)]
pub struct SurveyFile {
    pub path: String,
    pub mime: String,
    pub metadata: BTreeMap<String, String>,
}

/// Stateless after construction; shared freely across worker pools.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: RuleSet,
}

impl RuleEngine {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// First rule whose path regex and MIME glob both match, with its
    /// template resolved against captures plus `extra` metadata (EXIF
    /// fields and the like). A rule whose template references a group that
    /// resolves from neither is skipped, not an error.
    pub fn match_file(
        &self,
        path: &str,
        mime: &str,
        extra: &BTreeMap<String, String>,
    ) -> Option<FileMatch> {
        for rule in &self.rules.rules {
            if !rule.mime_glob.is_match(mime) {
                continue;
            }
            let Some(caps) = rule.pattern.captures(path) else {
                continue;
            };

            let mut captures = BTreeMap::new();
            for name in rule.pattern.capture_names().flatten() {
                if let Some(m) = caps.name(name) {
                    captures.insert(name.to_string(), m.as_str().to_string());
                }
            }

            let Some(category) = resolve_category(&rule.category_template, &captures, extra) else {
                log::debug!(
                    "Rule {} matched {} but its template left a capture unresolved, skipping",
                    rule.index,
                    path
                );
                continue;
            };

            return Some(FileMatch {
                rule_index: rule.index,
                category,
                folder_action: rule.folder_action,
                mode: rule.mode,
                captures,
            });
        }
        None
    }

    /// Direct rule match against a folder path. Only rules whose MIME glob
    /// admits `inode/directory` (in practice, `*`) can match here.
    pub fn match_folder(&self, folder_path: &str) -> Option<FileMatch> {
        self.match_file(folder_path, DIRECTORY_MIME, &BTreeMap::new())
    }

    /// Survey a bounded sample of a folder's files and return the dominant
    /// rule hit. Ties go to the lowest rule index, keeping the result
    /// deterministic regardless of sample order.
    pub fn survey(&self, sample: &[SurveyFile]) -> Option<FolderHint> {
        let mut tallies: BTreeMap<usize, (usize, FileMatch)> = BTreeMap::new();

        for file in sample {
            if let Some(m) = self.match_file(&file.path, &file.mime, &file.metadata) {
                tallies
                    .entry(m.rule_index)
                    .and_modify(|(count, _)| *count += 1)
                    .or_insert((1, m));
            }
        }

        // BTreeMap iteration is index-ascending, so `>` keeps the lowest
        // index among equal counts.
        let (_, (hits, dominant)) = tallies
            .into_iter()
            .max_by(|(ia, (ca, _)), (ib, (cb, _))| ca.cmp(cb).then(ib.cmp(ia)))?;

        Some(FolderHint {
            rule_index: dominant.rule_index,
            category: Some(dominant.category),
            folder_action: dominant.folder_action,
            mode: dominant.mode,
            hits,
            sampled: sample.len(),
            captures: dominant.captures,
        })
    }

    /// A direct folder-path match presented as a hint (a "survey" of one).
    pub fn folder_hint_direct(&self, folder_path: &str) -> Option<FolderHint> {
        self.match_folder(folder_path).map(|m| FolderHint {
            rule_index: m.rule_index,
            category: Some(m.category),
            folder_action: m.folder_action,
            mode: m.mode,
            hits: 1,
            sampled: 1,
            captures: m.captures,
        })
    }
}

/// Resolve the effective category for a match. The reserved `category`
/// capture overrides the template outright (with `subcategory` appended when
/// present); otherwise every `{name}` in the template must resolve from the
/// captures or the extra metadata.
fn resolve_category(
    template: &str,
    captures: &BTreeMap<String, String>,
    extra: &BTreeMap<String, String>,
) -> Option<String> {
    let lookup = |name: &str| {
        captures
            .get(name)
            .or_else(|| extra.get(name))
            .map(|s| s.as_str())
    };

    if let Some(category) = lookup("category") {
        let mut out = category.to_string();
        if let Some(sub) = lookup("subcategory") {
            out.push('/');
            out.push_str(sub);
        }
        return Some(normalize(&out));
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}')?;
        let name = &after[..close];
        out.push_str(lookup(name)?);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Some(normalize(&out))
}

fn normalize(category: &str) -> String {
    category.trim_matches('/').to_string()
}
