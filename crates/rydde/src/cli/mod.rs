pub mod full;
pub mod metadata;
pub mod rules;

use clap::{Parser, Subcommand};
use rydde_lib::{CategorySet, Config, Result, RuleSet, RyddeError};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rydde")]
#[command(about = "Dedup-aware classification and reorganization planning", long_about = None)]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to the catalog database")]
    pub db: Option<PathBuf>,

    #[arg(long, global = true, help = "Path to the rules CSV")]
    pub rules: Option<PathBuf>,

    #[arg(long, global = true, help = "Path to the categories CSV")]
    pub categories: Option<PathBuf>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Dry-run the rules engine over a tree and show matches")]
    Rules {
        #[arg(help = "File or directory to evaluate")]
        path: PathBuf,
    },

    #[command(about = "Probe one file and print its metadata")]
    Metadata {
        #[arg(help = "File to probe")]
        path: PathBuf,
    },

    #[command(about = "Run the pipeline (stages selected by MODE, default all)")]
    Full {
        #[arg(required = true, help = "Source roots to reorganize")]
        paths: Vec<PathBuf>,

        #[arg(long, help = "Disable the AI classifier stage")]
        no_ai: bool,

        #[arg(long, value_name = "FILE", help = "Write the plan as JSON")]
        json: Option<PathBuf>,

        #[arg(long, value_name = "URL", help = "AI endpoint spec url|workers|model[,...]")]
        ollama_url: Option<String>,

        #[arg(long, value_name = "NAME", help = "Assert that folder NAME ends up disaggregated")]
        expect_disaggregate: Vec<String>,

        #[arg(long, value_name = "NAME", help = "Assert that folder NAME ends up kept")]
        expect_keep: Vec<String>,
    },
}

pub fn load_config(db_override: Option<PathBuf>) -> Result<Config> {
    let config = Config::new(db_override)?;
    config.ensure_db_directory()?;
    Ok(config)
}

pub fn load_rules(path: &Option<PathBuf>) -> Result<RuleSet> {
    match path {
        Some(path) => RuleSet::from_path(path),
        None => Err(RyddeError::Config(
            "No rules file given; pass --rules <path>".to_string(),
        )),
    }
}

pub fn load_categories(path: &Option<PathBuf>) -> Result<CategorySet> {
    match path {
        Some(path) => CategorySet::from_path(path),
        None => Err(RyddeError::Config(
            "No categories file given; pass --categories <path>".to_string(),
        )),
    }
}
