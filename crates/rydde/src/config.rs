use crate::error::{Result, RyddeError};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use xdg::BaseDirectories;

/// Pipeline stage selector, from the `MODE` environment variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Scan,
    Hash,
    Classify,
    Plan,
    All,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Scan => "scan",
            Mode::Hash => "hash",
            Mode::Classify => "classify",
            Mode::Plan => "plan",
            Mode::All => "all",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "scan" => Ok(Mode::Scan),
            "hash" => Ok(Mode::Hash),
            "classify" => Ok(Mode::Classify),
            "plan" => Ok(Mode::Plan),
            "all" => Ok(Mode::All),
            _ => Err(RyddeError::Config(format!(
                "Invalid mode '{}' (valid: scan, hash, classify, plan, all)",
                s
            ))),
        }
    }
}

/// Content hash algorithm knob. Must stay stable across restarts of the
/// same catalog, otherwise dedup groups degenerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Blake3,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Blake3 => "blake3",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "md5" => Ok(HashAlgorithm::Md5),
            "blake3" => Ok(HashAlgorithm::Blake3),
            _ => Err(RyddeError::Config(format!(
                "Invalid hash algorithm '{}'. Use 'md5' or 'blake3'",
                s
            ))),
        }
    }
}

/// Remote classifier knobs.
#[derive(Debug, Clone)]
pub struct AiConfig {
    /// Raw endpoint specification, `url|workers|model[,url|workers|model...]`.
    pub endpoints: String,
    /// Folder queries bundled into one dispatch wave.
    pub batch_size: usize,
    /// Per-request deadline.
    pub request_timeout: Duration,
    /// Retries after the first attempt.
    pub retries: u32,
    /// Wall-clock budget for the whole classification stage. Folders left
    /// over when it expires fall through to the default decision.
    pub stage_budget: Option<Duration>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoints: String::new(),
            batch_size: 16,
            request_timeout: Duration::from_secs(120),
            retries: 2,
            stage_budget: None,
        }
    }
}

/// Optional on-disk config file (`rydde.toml`), found via XDG. Environment
/// variables override file values; CLI flags override both.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    scan_workers: Option<usize>,
    hash_workers: Option<usize>,
    ai_workers: Option<usize>,
    move_workers: Option<usize>,
    hash_algorithm: Option<String>,
    batch_size: Option<usize>,
    folder_sample: Option<usize>,
    ollama_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub catalog_path: PathBuf,
    pub mode: Mode,
    pub hash_algorithm: HashAlgorithm,
    /// Catalog write ops per commit.
    pub batch_size: usize,
    /// Upper bound on files surveyed per folder for the rules hint.
    pub folder_sample: usize,
    pub scan_workers: usize,
    pub hash_workers: usize,
    pub move_workers: usize,
    pub ai: AiConfig,
}

impl Config {
    pub fn new(db_override: Option<PathBuf>) -> Result<Self> {
        let file = Self::load_file_config();

        let catalog_path = if let Some(path) = db_override {
            path
        } else if let Ok(env_path) = std::env::var("RYDDE_DB") {
            PathBuf::from(env_path)
        } else {
            let xdg = BaseDirectories::with_prefix("rydde").map_err(|e| {
                RyddeError::Config(format!("Failed to initialize XDG directories: {}", e))
            })?;
            xdg.place_data_file("rydde.db")
                .map_err(|e| RyddeError::Config(format!("Failed to create data directory: {}", e)))?
        };

        let mode = match std::env::var("MODE") {
            Ok(s) => Mode::from_str(&s)?,
            Err(_) => Mode::All,
        };

        let hash_algorithm = match std::env::var("RYDDE_HASH") {
            Ok(s) => HashAlgorithm::from_str(&s)?,
            Err(_) => match file.hash_algorithm.as_deref() {
                Some(s) => HashAlgorithm::from_str(s)?,
                None => HashAlgorithm::Blake3,
            },
        };

        let default_workers = num_cpus::get().max(2);

        let mut ai = AiConfig::default();
        if let Ok(spec) = std::env::var("OLLAMA_URL") {
            ai.endpoints = spec;
        } else if let Some(spec) = file.ollama_url {
            ai.endpoints = spec;
        }
        if let Some(n) = env_usize("OLLAMA_WORKERS")?.or(file.ai_workers) {
            // A bare worker count caps total in-flight requests even when the
            // endpoint spec asks for more.
            ai.batch_size = ai.batch_size.min(n.max(1) * 4);
        }

        Ok(Self {
            catalog_path,
            mode,
            hash_algorithm,
            batch_size: env_usize("RYDDE_BATCH")?.or(file.batch_size).unwrap_or(500),
            folder_sample: env_usize("RYDDE_FOLDER_SAMPLE")?
                .or(file.folder_sample)
                .unwrap_or(64),
            scan_workers: env_usize("SCAN_WORKERS")?
                .or(file.scan_workers)
                .unwrap_or(default_workers),
            hash_workers: env_usize("HASH_WORKERS")?
                .or(file.hash_workers)
                .unwrap_or(default_workers),
            move_workers: env_usize("MOVE_WORKERS")?.or(file.move_workers).unwrap_or(2),
            ai,
        })
    }

    pub fn ensure_db_directory(&self) -> Result<()> {
        if let Some(parent) = self.catalog_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    pub fn ai_enabled(&self) -> bool {
        !self.ai.endpoints.is_empty()
    }

    fn load_file_config() -> FileConfig {
        let path = BaseDirectories::with_prefix("rydde")
            .ok()
            .and_then(|xdg| xdg.find_config_file("rydde.toml"));

        match path {
            Some(path) => match std::fs::read_to_string(&path) {
                Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                    log::warn!("Ignoring malformed {}: {}", path.display(), e);
                    FileConfig::default()
                }),
                Err(_) => FileConfig::default(),
            },
            None => FileConfig::default(),
        }
    }
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(s) => s
            .parse::<usize>()
            .map(Some)
            .map_err(|_| RyddeError::Config(format!("{} must be a number, got '{}'", name, s))),
        Err(_) => Ok(None),
    }
}
