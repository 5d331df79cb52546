use console::style;
use rydde_lib::probe::{probe_file, FsProbe, MetadataProbe};
use rydde_lib::{Result, RyddeError};
use std::path::PathBuf;

/// Probe a single file and print everything the pipeline would learn.
pub fn handle_metadata_command(path: PathBuf) -> Result<()> {
    if !path.is_file() {
        return Err(RyddeError::FileNotFound(path));
    }

    let probe = FsProbe;
    let mime = probe.probe_mime(&path);
    let metadata = probe_file(&probe, &path, &mime);
    let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

    println!("{} {}", style("path:").dim(), path.display());
    println!("{} {}", style("mime:").dim(), style(&mime).cyan());
    println!("{} {}", style("size:").dim(), size);

    if metadata.is_empty() {
        println!("{}", style("no extracted metadata").dim());
    } else {
        for (key, value) in &metadata {
            println!("{} {}", style(format!("{}:", key)).dim(), value);
        }
    }

    Ok(())
}
