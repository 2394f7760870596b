use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

pub fn now_utc_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn utc_compact_string(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 8192];

    loop {
        let count = file
            .read(&mut buf)
            .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
        if count == 0 {
            break;
        }
        hasher.update(&buf[..count]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let data = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;

    let mut file = File::create(path)
        .with_context(|| format!("failed to create json file: {}", path.display()))?;
    file.write_all(&data)
        .with_context(|| format!("failed to write json file: {}", path.display()))?;
    file.write_all(b"\n")
        .with_context(|| format!("failed to finalize json file: {}", path.display()))?;

    Ok(())
}

/// Escapes a string for a double-quoted XML attribute value. Beyond the
/// five predefined entities, newlines, carriage returns and tabs become
/// character references: a parser normalizes literal ones to spaces, which
/// would flatten multi-line descriptions on re-parse.
pub fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            '\n' => escaped.push_str("&#10;"),
            '\r' => escaped.push_str("&#13;"),
            '\t' => escaped.push_str("&#9;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Moves a previous output artifact into a sibling `Archive/` directory with a
/// timestamp suffix before the extension. Must run before every artifact
/// write; failures are logged and swallowed so they never block the new write.
pub fn archive_old(path: &Path) {
    if !path.is_file() {
        return;
    }

    let folder = path.parent().unwrap_or_else(|| Path::new("."));
    let archive_dir = folder.join("Archive");
    if let Err(err) = fs::create_dir_all(&archive_dir) {
        warn!(path = %archive_dir.display(), error = %err, "could not create archive directory");
        return;
    }

    let stem = path
        .file_stem()
        .map(|value| value.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|value| format!(".{}", value.to_string_lossy()))
        .unwrap_or_default();
    let ts = Local::now().format("%Y%m%d_%H%M%S").to_string();

    let target = next_free_archive_path(&archive_dir, &stem, &ts, &extension);

    match fs::rename(path, &target) {
        Ok(()) => {
            info!(from = %path.display(), to = %target.display(), "archived previous artifact");
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "could not archive previous artifact");
        }
    }
}

// Two archives within the same second get a numeric suffix instead of
// overwriting the earlier copy.
fn next_free_archive_path(archive_dir: &Path, stem: &str, ts: &str, extension: &str) -> PathBuf {
    let primary = archive_dir.join(format!("{stem}_{ts}{extension}"));
    if !primary.exists() {
        return primary;
    }

    let mut attempt = 2_u32;
    loop {
        let candidate = archive_dir.join(format!("{stem}_{ts}_{attempt}{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_escaping_covers_entities_and_line_breaks() {
        assert_eq!(
            escape_attribute("Heat & \"cool\" <fast>"),
            "Heat &amp; &quot;cool&quot; &lt;fast&gt;"
        );
        assert_eq!(escape_attribute("Alpha\nZeta"), "Alpha&#10;Zeta");
        assert_eq!(escape_attribute("a\r\tb"), "a&#13;&#9;b");
        assert_eq!(escape_attribute(""), "");
    }

    #[test]
    fn archive_moves_previous_artifact_aside() {
        let dir = tempfile::tempdir().expect("tempdir");
        let artifact = dir.path().join("Functions.sqlite");
        fs::write(&artifact, b"old").expect("write artifact");

        archive_old(&artifact);

        assert!(!artifact.exists());
        let archived: Vec<_> = fs::read_dir(dir.path().join("Archive"))
            .expect("archive dir")
            .map(|entry| entry.expect("entry").file_name().into_string().expect("name"))
            .collect();
        assert_eq!(archived.len(), 1);
        assert!(archived[0].starts_with("Functions_"));
        assert!(archived[0].ends_with(".sqlite"));
    }

    #[test]
    fn same_second_archives_do_not_collide() {
        let dir = tempfile::tempdir().expect("tempdir");
        let artifact = dir.path().join("out.xml");

        fs::write(&artifact, b"first").expect("write");
        archive_old(&artifact);
        fs::write(&artifact, b"second").expect("write");
        archive_old(&artifact);

        let count = fs::read_dir(dir.path().join("Archive")).expect("archive dir").count();
        assert_eq!(count, 2);
    }

    #[test]
    fn archive_of_missing_path_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        archive_old(&dir.path().join("never-written.xml"));
        assert!(!dir.path().join("Archive").exists());
    }
}
