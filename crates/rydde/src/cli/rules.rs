use console::style;
use rydde_lib::probe::{probe_file, FsProbe, MetadataProbe};
use rydde_lib::{Result, RuleEngine, RuleSet, RyddeError};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Dry-run the rule table over a file or tree, printing what matched what.
pub fn handle_rules_command(rules: RuleSet, path: PathBuf, verbose: bool) -> Result<()> {
    if !path.exists() {
        return Err(RyddeError::FileNotFound(path));
    }

    let engine = RuleEngine::new(rules);
    let probe = FsProbe;

    println!(
        "{} Evaluating {} rules against {}...\n",
        style(">>>").cyan(),
        style(engine.rule_count()).bold(),
        path.display()
    );

    let mut matched = 0usize;
    let mut unmatched = 0usize;

    for entry in WalkDir::new(&path).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                eprintln!("{} {}", style("!").yellow(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        report_file(&engine, &probe, entry.path(), verbose, &mut matched, &mut unmatched);
    }

    println!(
        "\n{} {} matched, {} unmatched",
        style("✓").green(),
        style(matched).cyan(),
        style(unmatched).yellow()
    );

    Ok(())
}

fn report_file(
    engine: &RuleEngine,
    probe: &FsProbe,
    path: &Path,
    verbose: bool,
    matched: &mut usize,
    unmatched: &mut usize,
) {
    let mime = probe.probe_mime(path);
    let metadata = probe_file(probe, path, &mime);
    let path_str = path.to_string_lossy();

    match engine.match_file(&path_str, &mime, &metadata) {
        Some(m) => {
            *matched += 1;
            println!(
                "{} {} -> {} (rule {}, {}, {})",
                style("✓").green(),
                path_str,
                style(&m.category).cyan(),
                m.rule_index,
                m.folder_action.as_str(),
                m.mode.as_str()
            );
            if verbose && !m.captures.is_empty() {
                for (key, value) in &m.captures {
                    println!("    {} = {}", style(key).dim(), value);
                }
            }
        }
        None => {
            *unmatched += 1;
            println!("{} {} ({})", style("·").dim(), path_str, style(&mime).dim());
        }
    }
}
