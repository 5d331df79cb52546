//! Remote folder/file classifier.
//!
//! Endpoints are OpenAI-compatible chat-completions servers or native
//! Ollama servers; the protocol is probed once per endpoint and cached.
//! The client is a pool of blocking workers over a shared queue, sized by
//! the per-endpoint worker counts in the `url|workers|model` specification.

pub mod client;

pub use client::{AiClient, TokenUsage};

use crate::catalog::FolderAction;
use crate::error::{Result, RyddeError};
use serde::Deserialize;

/// One endpoint from the `OLLAMA_URL` specification: `url|workers|model`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    pub url: String,
    pub workers: usize,
    pub model: String,
}

/// Parse a comma-separated list of `url|workers|model` specs.
pub fn parse_endpoint_specs(raw: &str) -> Result<Vec<EndpointSpec>> {
    let mut specs = Vec::new();

    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let fields: Vec<&str> = part.split('|').collect();
        if fields.len() != 3 {
            return Err(RyddeError::Config(format!(
                "Endpoint spec '{}' must be url|workers|model",
                part
            )));
        }

        let workers: usize = fields[1].parse().map_err(|_| {
            RyddeError::Config(format!("Endpoint spec '{}': bad worker count", part))
        })?;
        if workers == 0 {
            return Err(RyddeError::Config(format!(
                "Endpoint spec '{}': worker count must be at least 1",
                part
            )));
        }
        if fields[2].is_empty() {
            return Err(RyddeError::Config(format!(
                "Endpoint spec '{}': model name is empty",
                part
            )));
        }

        specs.push(EndpointSpec {
            url: fields[0].trim_end_matches('/').to_string(),
            workers,
            model: fields[2].to_string(),
        });
    }

    if specs.is_empty() {
        return Err(RyddeError::Config(
            "Endpoint specification is empty".to_string(),
        ));
    }

    Ok(specs)
}

/// Wire protocol spoken by one endpoint, detected on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    OpenAi,
    Ollama,
}

/// Everything the AI sees about one folder.
#[derive(Debug, Clone)]
pub struct FolderQuery {
    pub path: String,
    pub name: String,
    pub sample_names: Vec<String>,
    pub mime_histogram: Vec<(String, usize)>,
    pub hint_action: Option<FolderAction>,
    pub hint_category: Option<String>,
}

/// Category-refinement query for one file under a disaggregated folder.
#[derive(Debug, Clone)]
pub struct FileQuery {
    pub path: String,
    pub name: String,
    pub mime: String,
    pub hint_category: Option<String>,
}

/// The fixed response schema.
#[derive(Debug, Clone, PartialEq)]
pub struct AiDecision {
    pub decision: FolderAction,
    pub category: Option<String>,
    pub confidence: Option<f64>,
}

#[derive(Deserialize)]
struct RawDecision {
    decision: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Parse model output into a decision. Accepts a bare JSON object or one
/// wrapped in a markdown code fence. Anything else is malformed.
pub fn parse_decision(content: &str) -> Result<AiDecision> {
    let trimmed = content.trim();
    let body = if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        rest.trim_start_matches('\n')
            .trim_end_matches('`')
            .trim_end_matches('\n')
    } else {
        trimmed
    };

    let raw: RawDecision = serde_json::from_str(body)
        .map_err(|e| RyddeError::AiUnavailable(format!("malformed classifier output: {}", e)))?;

    let decision = match raw.decision.to_lowercase().as_str() {
        "keep" => FolderAction::Keep,
        "disaggregate" => FolderAction::Disaggregate,
        other => {
            return Err(RyddeError::AiUnavailable(format!(
                "ambiguous classifier decision '{}'",
                other
            )))
        }
    };

    Ok(AiDecision {
        decision,
        category: raw.category.filter(|c| !c.is_empty()),
        confidence: raw.confidence,
    })
}
