use crate::ai::{
    parse_decision, AiDecision, EndpointSpec, FileQuery, FolderQuery, Protocol,
};
use crate::error::{Result, RyddeError};
use crossbeam_channel::bounded;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You organize grown-wild file collections. Decide whether a folder \
should be kept together as one unit (a project, an album, an installation) or disaggregated so \
its files can be re-filed by category. Respond with exactly one JSON object: \
{\"decision\": \"keep\" | \"disaggregate\", \"category\": \"optional/target/category\", \
\"confidence\": 0.0-1.0}. No prose.";

/// Prompt/completion token totals across the client's lifetime.
#[derive(Debug, Default)]
pub struct TokenUsage {
    input: AtomicU64,
    output: AtomicU64,
}

impl TokenUsage {
    pub fn record(&self, input: u64, output: u64) {
        self.input.fetch_add(input, Ordering::Relaxed);
        self.output.fetch_add(output, Ordering::Relaxed);
    }

    pub fn totals(&self) -> (u64, u64) {
        (
            self.input.load(Ordering::Relaxed),
            self.output.load(Ordering::Relaxed),
        )
    }
}

struct EndpointState {
    spec: EndpointSpec,
    agent: ureq::Agent,
    protocol: Mutex<Option<Protocol>>,
}

pub struct AiClient {
    endpoints: Vec<Arc<EndpointState>>,
    retries: u32,
    shutdown: Arc<AtomicBool>,
    usage: TokenUsage,
}

impl AiClient {
    pub fn new(
        specs: Vec<EndpointSpec>,
        request_timeout: Duration,
        retries: u32,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let endpoints = specs
            .into_iter()
            .map(|spec| {
                Arc::new(EndpointState {
                    agent: ureq::AgentBuilder::new().timeout(request_timeout).build(),
                    spec,
                    protocol: Mutex::new(None),
                })
            })
            .collect();

        Self {
            endpoints,
            retries,
            shutdown,
            usage: TokenUsage::default(),
        }
    }

    /// Total in-flight capacity: the sum of per-endpoint worker counts.
    pub fn total_workers(&self) -> usize {
        self.endpoints.iter().map(|e| e.spec.workers).sum()
    }

    pub fn usage(&self) -> (u64, u64) {
        self.usage.totals()
    }

    /// True when at least one endpoint answers its protocol probe.
    pub fn any_endpoint_reachable(&self) -> bool {
        self.endpoints
            .iter()
            .any(|e| self.detect_protocol(e).is_ok())
    }

    /// Classify folders. Queries within a batch are independent and may be
    /// answered in any order; results come back in input order.
    pub fn classify_folders(&self, queries: &[FolderQuery]) -> Vec<Result<AiDecision>> {
        let prompts = queries.iter().map(folder_prompt).collect();
        self.dispatch(prompts)
    }

    /// Refine file categories under disaggregated folders.
    pub fn refine_files(&self, queries: &[FileQuery]) -> Vec<Result<AiDecision>> {
        let prompts = queries.iter().map(file_prompt).collect();
        self.dispatch(prompts)
    }

    fn dispatch(&self, prompts: Vec<String>) -> Vec<Result<AiDecision>> {
        let n = prompts.len();
        if n == 0 {
            return Vec::new();
        }

        let (task_tx, task_rx) = bounded::<(usize, String)>(n);
        let (result_tx, result_rx) = bounded::<(usize, Result<AiDecision>)>(n);

        for pair in prompts.into_iter().enumerate() {
            // Channel holds n slots; cannot block.
            let _ = task_tx.send(pair);
        }
        drop(task_tx);

        std::thread::scope(|scope| {
            for endpoint in &self.endpoints {
                for _ in 0..endpoint.spec.workers {
                    let task_rx = task_rx.clone();
                    let result_tx = result_tx.clone();
                    scope.spawn(move || {
                        while let Ok((idx, prompt)) = task_rx.recv() {
                            let result = if self.shutdown.load(Ordering::Relaxed) {
                                Err(RyddeError::AiUnavailable("shutdown requested".to_string()))
                            } else {
                                self.request_with_retry(endpoint, &prompt)
                            };
                            let _ = result_tx.send((idx, result));
                        }
                    });
                }
            }
            drop(result_tx);
        });

        let mut results: Vec<Option<Result<AiDecision>>> = (0..n).map(|_| None).collect();
        while let Ok((idx, result)) = result_rx.try_recv() {
            results[idx] = Some(result);
        }
        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| {
                    Err(RyddeError::AiUnavailable("worker lost the query".to_string()))
                })
            })
            .collect()
    }

    fn request_with_retry(&self, endpoint: &EndpointState, prompt: &str) -> Result<AiDecision> {
        let protocol = self.detect_protocol(endpoint)?;

        let mut malformed_retried = false;
        let mut attempt = 0u32;
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(RyddeError::AiUnavailable("shutdown requested".to_string()));
            }

            match self.request_once(endpoint, protocol, prompt) {
                Ok(content) => match parse_decision(&content) {
                    Ok(decision) => return Ok(decision),
                    Err(e) if !malformed_retried => {
                        log::debug!("{}: malformed output, retrying once: {}", endpoint.spec.url, e);
                        malformed_retried = true;
                    }
                    Err(e) => return Err(e),
                },
                Err(e) => {
                    if attempt >= self.retries {
                        return Err(RyddeError::AiUnavailable(format!(
                            "{} failed after {} attempts: {}",
                            endpoint.spec.url,
                            attempt + 1,
                            e
                        )));
                    }
                    let backoff = Duration::from_millis(500 * (1u64 << attempt.min(6)));
                    log::debug!(
                        "{}: attempt {} failed ({}), backing off {:?}",
                        endpoint.spec.url,
                        attempt + 1,
                        e,
                        backoff
                    );
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
            }
        }
    }

    fn detect_protocol(&self, endpoint: &EndpointState) -> Result<Protocol> {
        let mut cached = endpoint
            .protocol
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(protocol) = *cached {
            return Ok(protocol);
        }

        let openai_probe = format!("{}/v1/models", endpoint.spec.url);
        if endpoint.agent.get(&openai_probe).call().is_ok() {
            *cached = Some(Protocol::OpenAi);
            return Ok(Protocol::OpenAi);
        }

        let ollama_probe = format!("{}/api/tags", endpoint.spec.url);
        if endpoint.agent.get(&ollama_probe).call().is_ok() {
            *cached = Some(Protocol::Ollama);
            return Ok(Protocol::Ollama);
        }

        Err(RyddeError::AiUnavailable(format!(
            "endpoint {} answers neither /v1/models nor /api/tags",
            endpoint.spec.url
        )))
    }

    fn request_once(
        &self,
        endpoint: &EndpointState,
        protocol: Protocol,
        prompt: &str,
    ) -> Result<String> {
        let messages = vec![
            Message {
                role: "system",
                content: SYSTEM_PROMPT.to_string(),
            },
            Message {
                role: "user",
                content: prompt.to_string(),
            },
        ];

        match protocol {
            Protocol::OpenAi => {
                let url = format!("{}/v1/chat/completions", endpoint.spec.url);
                let response = endpoint
                    .agent
                    .post(&url)
                    .send_json(OpenAiRequest {
                        model: &endpoint.spec.model,
                        messages,
                        temperature: 0.0,
                    })
                    .map_err(|e| RyddeError::AiUnavailable(e.to_string()))?;

                let body: OpenAiResponse = response
                    .into_json()
                    .map_err(|e| RyddeError::AiUnavailable(format!("bad response body: {}", e)))?;

                if let Some(usage) = body.usage {
                    self.usage
                        .record(usage.prompt_tokens.unwrap_or(0), usage.completion_tokens.unwrap_or(0));
                }

                body.choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .ok_or_else(|| RyddeError::AiUnavailable("empty choices".to_string()))
            }
            Protocol::Ollama => {
                let url = format!("{}/api/chat", endpoint.spec.url);
                let response = endpoint
                    .agent
                    .post(&url)
                    .send_json(OllamaRequest {
                        model: &endpoint.spec.model,
                        messages,
                        stream: false,
                        format: "json",
                        options: OllamaOptions { temperature: 0.0 },
                    })
                    .map_err(|e| RyddeError::AiUnavailable(e.to_string()))?;

                let body: OllamaResponse = response
                    .into_json()
                    .map_err(|e| RyddeError::AiUnavailable(format!("bad response body: {}", e)))?;

                self.usage.record(
                    body.prompt_eval_count.unwrap_or(0),
                    body.eval_count.unwrap_or(0),
                );

                body.message
                    .map(|m| m.content)
                    .ok_or_else(|| RyddeError::AiUnavailable("empty message".to_string()))
            }
        }
    }
}

fn folder_prompt(query: &FolderQuery) -> String {
    let mut prompt = format!("Folder: {}\n", query.name);

    if !query.sample_names.is_empty() {
        prompt.push_str("Contents sample:\n");
        for name in &query.sample_names {
            prompt.push_str("  ");
            prompt.push_str(name);
            prompt.push('\n');
        }
    }

    if !query.mime_histogram.is_empty() {
        prompt.push_str("MIME histogram:\n");
        for (mime, count) in &query.mime_histogram {
            prompt.push_str(&format!("  {} x{}\n", mime, count));
        }
    }

    if let Some(action) = query.hint_action {
        prompt.push_str(&format!("A matching rule suggests: {}\n", action.as_str()));
    }
    if let Some(category) = &query.hint_category {
        prompt.push_str(&format!("Suggested category: {}\n", category));
    }

    prompt
}

fn file_prompt(query: &FileQuery) -> String {
    let mut prompt = format!(
        "File: {}\nMIME: {}\nThis file is being re-filed individually; answer with decision \
         \"disaggregate\" and the best category.\n",
        query.name, query.mime
    );
    if let Some(category) = &query.hint_category {
        prompt.push_str(&format!("Suggested category: {}\n", category));
    }
    prompt
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f64,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    stream: bool,
    format: &'static str,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f64,
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FolderAction;

    fn unreachable_client(retries: u32) -> AiClient {
        AiClient::new(
            vec![EndpointSpec {
                // Reserved TEST-NET address: connections fail fast-ish, and
                // the short agent timeout bounds the probe.
                url: "http://192.0.2.1:1".to_string(),
                workers: 2,
                model: "test".to_string(),
            }],
            Duration::from_millis(200),
            retries,
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn test_total_workers_sums_endpoints() {
        let client = AiClient::new(
            vec![
                EndpointSpec {
                    url: "http://a".to_string(),
                    workers: 3,
                    model: "m".to_string(),
                },
                EndpointSpec {
                    url: "http://b".to_string(),
                    workers: 2,
                    model: "m".to_string(),
                },
            ],
            Duration::from_secs(1),
            0,
            Arc::new(AtomicBool::new(false)),
        );
        assert_eq!(client.total_workers(), 5);
    }

    #[test]
    fn test_unreachable_endpoint_yields_unavailable() {
        let client = unreachable_client(0);
        let queries = vec![FolderQuery {
            path: "/src/Misc".to_string(),
            name: "Misc".to_string(),
            sample_names: vec!["a.txt".to_string()],
            mime_histogram: vec![("text/plain".to_string(), 1)],
            hint_action: None,
            hint_category: None,
        }];

        let results = client.classify_folders(&queries);
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0].as_ref().unwrap_err(),
            RyddeError::AiUnavailable(_)
        ));
    }

    #[test]
    fn test_shutdown_short_circuits() {
        let shutdown = Arc::new(AtomicBool::new(true));
        let client = AiClient::new(
            vec![EndpointSpec {
                url: "http://192.0.2.1:1".to_string(),
                workers: 1,
                model: "test".to_string(),
            }],
            Duration::from_secs(120),
            5,
            shutdown,
        );

        let queries = vec![FileQuery {
            path: "/a/b.pdf".to_string(),
            name: "b.pdf".to_string(),
            mime: "application/pdf".to_string(),
            hint_category: None,
        }];
        let results = client.refine_files(&queries);
        assert!(matches!(
            results[0].as_ref().unwrap_err(),
            RyddeError::AiUnavailable(_)
        ));
    }

    #[test]
    fn test_token_usage_accumulates() {
        let usage = TokenUsage::default();
        usage.record(10, 5);
        usage.record(3, 2);
        assert_eq!(usage.totals(), (13, 7));
    }

    #[test]
    fn test_folder_prompt_carries_hint() {
        let prompt = folder_prompt(&FolderQuery {
            path: "/x/Wedding-Photos-2024".to_string(),
            name: "Wedding-Photos-2024".to_string(),
            sample_names: vec!["IMG_0001.jpg".to_string()],
            mime_histogram: vec![("image/jpeg".to_string(), 1)],
            hint_action: Some(FolderAction::Keep),
            hint_category: Some("Photos/2024".to_string()),
        });
        assert!(prompt.contains("Wedding-Photos-2024"));
        assert!(prompt.contains("IMG_0001.jpg"));
        assert!(prompt.contains("image/jpeg x1"));
        assert!(prompt.contains("keep"));
        assert!(prompt.contains("Photos/2024"));
    }
}
