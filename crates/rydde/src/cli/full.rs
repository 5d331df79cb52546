use comfy_table::{presets::UTF8_FULL, Cell, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use rydde_lib::catalog::{folders, Catalog, FolderAction, PlanEntry, PlanKind};
use rydde_lib::pipeline::{self, shutdown_flag};
use rydde_lib::probe::FsProbe;
use rydde_lib::{
    parse_endpoint_specs, AiClient, CategorySet, Config, Result, RuleEngine, RuleSet, RyddeError,
};
use std::path::PathBuf;

pub struct FullOptions {
    pub paths: Vec<PathBuf>,
    pub no_ai: bool,
    pub json: Option<PathBuf>,
    pub ollama_url: Option<String>,
    pub expect_disaggregate: Vec<String>,
    pub expect_keep: Vec<String>,
}

pub fn handle_full_command(
    mut config: Config,
    rules: RuleSet,
    categories: CategorySet,
    options: FullOptions,
    verbose: bool,
) -> Result<()> {
    let engine = RuleEngine::new(rules);
    let catalog = Catalog::open(&config.catalog_path)?;

    if let Some(spec) = options.ollama_url {
        config.ai.endpoints = spec;
    }

    let has_expectations =
        !options.expect_disaggregate.is_empty() || !options.expect_keep.is_empty();

    let ai = if options.no_ai || !config.ai_enabled() {
        None
    } else {
        let specs = parse_endpoint_specs(&config.ai.endpoints)?;
        let client = AiClient::new(
            specs,
            config.ai.request_timeout,
            config.ai.retries,
            shutdown_flag(),
        );
        if has_expectations && !client.any_endpoint_reachable() {
            // Expectations without a classifier to meet them is exit 3.
            return Err(RyddeError::AiUnavailable(
                "expectations were given but no AI endpoint is reachable".to_string(),
            ));
        }
        Some(client)
    };

    println!(
        "{} Running mode '{}' over {} root(s), catalog {}",
        style(">>>").cyan(),
        style(config.mode.as_str()).bold(),
        options.paths.len(),
        config.catalog_path.display()
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} [{elapsed_precise}]")
            .unwrap(),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));
    spinner.set_message("scanning, hashing, classifying...");

    let report = pipeline::run(
        &catalog,
        &config,
        &engine,
        &categories,
        &FsProbe,
        &options.paths,
        ai.as_ref(),
    );
    spinner.finish_and_clear();
    let report = report?;

    if let Some(scan) = &report.scan {
        println!("\n{} Scan completed", style("✓").green());
        println!("  Files indexed: {}", style(scan.files_scanned).cyan());
        println!("  Directories: {}", style(scan.dirs_scanned).cyan());
        println!(
            "  Total size: {}",
            style(format_bytes(scan.bytes_scanned as i64)).cyan()
        );
        if scan.keep_pruned > 0 {
            println!("  Kept subtrees pruned: {}", style(scan.keep_pruned).dim());
        }
        if scan.errors > 0 {
            println!("  Errors: {}", style(scan.errors).yellow());
        }
    }

    if report.files_hashed > 0 || report.folders_hashed > 0 {
        println!("\n{} Hashing completed", style("✓").green());
        println!("  Files hashed: {}", style(report.files_hashed).cyan());
        println!("  Folder aggregates: {}", style(report.folders_hashed).cyan());
    }
    if let Some(dedup) = &report.dedup {
        println!(
            "  Duplicate groups: {} ({} wasted)",
            style(dedup.file_groups + dedup.folder_groups).cyan(),
            style(format_bytes(dedup.waste_bytes)).yellow()
        );
    }

    if let Some(chain) = &report.chain {
        println!("\n{} Classification completed", style("✓").green());
        println!(
            "  Folders: {} rule-final, {} ai, {} inherited, {} default",
            style(chain.folders_rule_final).cyan(),
            style(chain.folders_ai).cyan(),
            style(chain.folders_inherited).cyan(),
            style(chain.folders_default).cyan()
        );
        println!(
            "  Files: {} rule-final, {} ai, {} inherited, {} default",
            style(chain.files_rule_final).cyan(),
            style(chain.files_ai).cyan(),
            style(chain.files_inherited).cyan(),
            style(chain.files_default).cyan()
        );
        if chain.ai_unavailable > 0 {
            println!(
                "  AI unavailable for {} queries (fell back to default)",
                style(chain.ai_unavailable).yellow()
            );
        }
    }

    if report.plan.is_some() {
        let entries = rydde_lib::planner::load_plan(&catalog)?;
        print_plan_summary(&entries, verbose);

        if let Some(json_path) = &options.json {
            let json = serde_json::to_string_pretty(&entries)?;
            std::fs::write(json_path, json)?;
            println!(
                "\n{} Plan written to {}",
                style("✓").green(),
                json_path.display()
            );
        }
    }

    check_expectations(
        &catalog,
        &options.expect_keep,
        &options.expect_disaggregate,
    )?;

    Ok(())
}

fn print_plan_summary(entries: &[PlanEntry], verbose: bool) {
    let units = entries.iter().filter(|e| e.kind == PlanKind::KeepUnit).count();
    let placed = entries.iter().filter(|e| e.kind == PlanKind::Place).count();
    let skipped = entries
        .iter()
        .filter(|e| e.kind == PlanKind::SkipDuplicate)
        .count();

    println!("\n{} Plan: {} entries", style("✓").green(), entries.len());
    println!(
        "  {} keep-units, {} placed files, {} duplicates skipped",
        style(units).cyan(),
        style(placed).cyan(),
        style(skipped).yellow()
    );

    if entries.is_empty() {
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["kind", "source", "target", "decided by"]);

    let limit = if verbose { entries.len() } else { 20 };
    for entry in entries.iter().take(limit) {
        table.add_row(vec![
            Cell::new(entry.kind.as_str()),
            Cell::new(&entry.source_path),
            Cell::new(&entry.target_path),
            Cell::new(&entry.decided_by),
        ]);
    }
    println!("{}", table);
    if entries.len() > limit {
        println!("  ... and {} more (use -v to show all)", entries.len() - limit);
    }
}

/// Compare `--expect-keep` / `--expect-disaggregate` assertions against the
/// committed folder actions. A mismatch is an invariant failure (exit 2).
fn check_expectations(
    catalog: &Catalog,
    expect_keep: &[String],
    expect_disaggregate: &[String],
) -> Result<()> {
    if expect_keep.is_empty() && expect_disaggregate.is_empty() {
        return Ok(());
    }

    let reader = catalog.reader()?;
    let all = folders::list_all_folders(&reader)?;

    let find = |name: &str| {
        all.iter()
            .find(|f| f.name == name || f.path == name)
            .map(|f| f.action)
    };

    for name in expect_keep {
        match find(name) {
            Some(FolderAction::Keep) | Some(FolderAction::KeepExcept) => {
                println!("{} '{}' is kept, as expected", style("✓").green(), name);
            }
            Some(action) => {
                return Err(RyddeError::InvariantViolation(format!(
                    "expected '{}' to be kept, but it is {}",
                    name,
                    action.as_str()
                )));
            }
            None => {
                return Err(RyddeError::InvariantViolation(format!(
                    "expected folder '{}' was never scanned",
                    name
                )));
            }
        }
    }

    for name in expect_disaggregate {
        match find(name) {
            Some(FolderAction::Disaggregate) => {
                println!("{} '{}' is disaggregated, as expected", style("✓").green(), name);
            }
            Some(action) => {
                return Err(RyddeError::InvariantViolation(format!(
                    "expected '{}' to be disaggregated, but it is {}",
                    name,
                    action.as_str()
                )));
            }
            None => {
                return Err(RyddeError::InvariantViolation(format!(
                    "expected folder '{}' was never scanned",
                    name
                )));
            }
        }
    }

    Ok(())
}

fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
