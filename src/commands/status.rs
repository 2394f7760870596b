use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::model::ParseRunManifest;
use crate::store::{self, FUNCTIONS_TABLE, STRUCTURE_TABLE};

pub fn run(args: StatusArgs) -> Result<()> {
    info!(out_dir = %args.out_dir.display(), "status requested");

    report_store(
        &args.out_dir.join("Functions.sqlite"),
        FUNCTIONS_TABLE,
        "functions store",
    );
    report_store(
        &args.out_dir.join("Structure.sqlite"),
        STRUCTURE_TABLE,
        "structure store",
    );
    report_xml(&args.out_dir.join("functions_output.xml"), "functions XML");
    report_xml(&args.out_dir.join("structure_output.xml"), "structure XML");
    report_latest_manifest(&args.out_dir.join("manifests"))?;

    Ok(())
}

fn report_store(path: &Path, table: &str, label: &str) {
    if !path.is_file() {
        warn!(path = %path.display(), "{label} missing");
        return;
    }
    match store::table_count(path, table) {
        Ok(rows) => info!(path = %path.display(), rows, "{label} present"),
        Err(error) => warn!(path = %path.display(), %error, "{label} unreadable"),
    }
}

fn report_xml(path: &Path, label: &str) {
    if path.is_file() {
        match fs::metadata(path) {
            Ok(meta) => info!(path = %path.display(), bytes = meta.len(), "{label} present"),
            Err(error) => warn!(path = %path.display(), %error, "{label} unreadable"),
        }
    } else {
        warn!(path = %path.display(), "{label} missing");
    }
}

fn report_latest_manifest(manifest_dir: &Path) -> Result<()> {
    let Some(path) = latest_manifest_path(manifest_dir)? else {
        warn!(path = %manifest_dir.display(), "no run manifests found");
        return Ok(());
    };

    let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let manifest: ParseRunManifest = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    info!(
        run_id = %manifest.run_id,
        command = %manifest.command,
        status = %manifest.status,
        source = %manifest.source_path,
        store = %manifest.store_path,
        records = manifest.counts.records_consolidated,
        duplicates_merged = manifest.counts.duplicates_merged,
        roots = manifest.counts.roots,
        warnings = manifest.warnings.len(),
        updated_at = %manifest.updated_at,
        "latest run manifest"
    );

    Ok(())
}

// Manifest names embed a UTC compact timestamp, so the lexicographically
// greatest file name is the most recent run.
fn latest_manifest_path(manifest_dir: &Path) -> Result<Option<std::path::PathBuf>> {
    if !manifest_dir.is_dir() {
        return Ok(None);
    }

    let mut latest: Option<std::path::PathBuf> = None;
    for entry in fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to list {}", manifest_dir.display()))?
    {
        let path = entry
            .with_context(|| format!("failed to list {}", manifest_dir.display()))?
            .path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        if latest
            .as_ref()
            .is_none_or(|current| path.file_name() > current.file_name())
        {
            latest = Some(path);
        }
    }

    Ok(latest)
}
