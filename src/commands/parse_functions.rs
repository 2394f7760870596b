//! Function extraction: scans a source document line by line for code+name
//! pairs, infers the hierarchy from the codes and consolidates duplicates
//! into the functions store.

use std::collections::{BTreeSet, HashMap, HashSet, hash_map::Entry};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use regex::Regex;
use tracing::info;

use crate::cli::{FunctionMode, ParseFunctionsArgs};
use crate::code::{
    CodeKey, code_groups, depth, is_fi_code, is_fs_code, letter_matches, normalize_code,
    parent_candidate,
};
use crate::model::{FunctionRecord, ParseCounts, ParseRunManifest};
use crate::reader;
use crate::store;
use crate::util::{
    archive_old, ensure_directory, now_utc_string, sha256_file, utc_compact_string,
    write_json_pretty,
};

/// Vocabulary typical of failure descriptions rather than function names.
/// A line whose name contains any of these must never become a function node.
const FAILURE_KEYWORDS: [&str; 16] = [
    "отказ",
    "потеря",
    "нарушен",
    "сбой",
    "неисправ",
    "failure",
    "loss",
    "malfunction",
    "fault",
    "defect",
    "hazard",
    "condition",
    "failure mode",
    "failure condition",
    "effect of failure",
    "failure effect",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFunction {
    pub code: String,
    pub name: String,
}

pub struct Extraction {
    pub functions: Vec<ExtractedFunction>,
    /// Lines the regex matched, including ones later rejected by filters.
    /// The gap to `functions.len()` surfaces in the run manifest counts.
    pub lines_matched: usize,
}

pub fn run(args: ParseFunctionsArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("parse-functions-{}", utc_compact_string(started_ts));

    info!(
        input = %args.input.display(),
        fi = %args.fi,
        mode = args.mode.as_str(),
        out = %args.out.display(),
        "parsing functions"
    );

    let document = reader::read_document(&args.input)?;
    if document.text.trim().is_empty() {
        bail!(
            "function parse stage: no text could be extracted from {}",
            args.input.display()
        );
    }

    let extraction = extract_functions_from_text(
        &document.text,
        args.mode,
        args.max_depth,
        args.code_letter,
        args.min_first_group,
    )?;
    if extraction.functions.is_empty() {
        bail!(
            "function parse stage: no function lines recognized in {}",
            args.input.display()
        );
    }
    let lines_matched = extraction.lines_matched;
    let records_kept = extraction.functions.len();

    let records = extraction
        .functions
        .into_iter()
        .map(|function| FunctionRecord {
            fi: args.fi.clone(),
            code: function.code,
            parent_code: String::new(),
            name: function.name,
            description: String::new(),
        })
        .collect::<Vec<FunctionRecord>>();

    let records = infer_hierarchy(records, args.mode);
    let consolidated = consolidate_functions(records);
    let roots = consolidated
        .records
        .iter()
        .filter(|record| record.parent_code.is_empty())
        .count();

    if let Some(parent) = args.out.parent() {
        ensure_directory(parent)?;
    }
    archive_old(&args.out);

    let source_sha256 = sha256_file(&args.input)?;
    let updated_at = now_utc_string();
    let metadata = vec![
        ("source_path".to_string(), args.input.display().to_string()),
        ("source_sha256".to_string(), source_sha256.clone()),
        ("mode".to_string(), args.mode.as_str().to_string()),
        ("fi_designator".to_string(), args.fi.clone()),
        ("generated_at".to_string(), updated_at.clone()),
    ];
    store::write_functions_store(&args.out, &consolidated.records, &metadata)?;

    let manifest = ParseRunManifest {
        manifest_version: 1,
        run_id: run_id.clone(),
        command: "parse-functions".to_string(),
        status: "completed".to_string(),
        started_at,
        updated_at,
        source_path: args.input.display().to_string(),
        source_sha256,
        store_path: args.out.display().to_string(),
        counts: ParseCounts {
            lines_matched,
            records_kept,
            records_consolidated: consolidated.records.len(),
            duplicates_merged: consolidated.duplicates_merged,
            roots,
        },
        warnings: document.diagnostics,
    };
    let manifest_dir = args.manifest_dir.clone().unwrap_or_else(|| {
        args.out
            .parent()
            .map(|parent| parent.join("manifests"))
            .unwrap_or_else(|| "manifests".into())
    });
    write_json_pretty(&manifest_dir.join(format!("{run_id}.json")), &manifest)?;

    info!(
        records = consolidated.records.len(),
        roots,
        duplicates_merged = consolidated.duplicates_merged,
        path = %args.out.display(),
        "functions store written"
    );

    Ok(())
}

/// Finds function lines in document order. Formats accepted:
/// `F1 Name`, `Ф1.2 Name`, `F1-2-3 Name`, `F1_2_3 Name`, `Ф21.20.01 Name`,
/// with stray spaces inside the code and an optional trailing dot.
pub fn extract_functions_from_text(
    text: &str,
    mode: FunctionMode,
    max_depth: usize,
    code_letter: Option<char>,
    min_first_group: Option<u32>,
) -> Result<Extraction> {
    let pattern = Regex::new(
        r"(?m)^[ \t]*([ФF][ \t]*\d+(?:[ \t]*[.\-_][ \t]*\d+){0,4}[ \t]*\.?)[ \t]+(.+)$",
    )
    .context("failed to compile function line regex")?;

    let mut results = Vec::new();
    let mut lines_matched = 0_usize;

    for captures in pattern.captures_iter(text) {
        lines_matched += 1;
        let raw_code = captures.get(1).map(|value| value.as_str()).unwrap_or("");
        let raw_name = captures.get(2).map(|value| value.as_str()).unwrap_or("");

        let name = strip_list_markers(raw_name);
        if name.is_empty() {
            continue;
        }
        if is_failure_like(name) {
            continue;
        }

        let code = normalize_code(raw_code);
        if code.is_empty() {
            continue;
        }

        if let Some(filter) = code_letter {
            let head = code.chars().next().unwrap_or_default();
            if !letter_matches(head, filter) {
                continue;
            }
        }

        if let Some(minimum) = min_first_group {
            let groups = code_groups(&code);
            let Some(first) = groups.first() else {
                continue;
            };
            match first.parse::<u32>() {
                Ok(value) if value >= minimum => {}
                _ => continue,
            }
        }

        let family_matches = match mode {
            FunctionMode::Fi => is_fi_code(&code),
            FunctionMode::Fs => is_fs_code(&code),
        };
        if !family_matches {
            continue;
        }

        if max_depth > 0 && depth(&code) > max_depth {
            continue;
        }

        let name = strip_leading_code_tokens(&code, name);
        if name.is_empty() {
            continue;
        }

        results.push(ExtractedFunction { code, name });
    }

    Ok(Extraction {
        functions: results,
        lines_matched,
    })
}

fn is_failure_like(text: &str) -> bool {
    let lowered = text.to_lowercase();
    FAILURE_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

fn strip_list_markers(name: &str) -> &str {
    name.trim_start_matches(|ch: char| ch.is_whitespace() || matches!(ch, '-' | '–' | '—'))
        .trim_end()
}

/// Drops up to two leading name tokens that restate the record's own code or
/// its immediate parent, e.g. `F1.1.1 F1.1 Actual name` -> `Actual name`.
fn strip_leading_code_tokens(code: &str, name: &str) -> String {
    if code.is_empty() || name.is_empty() {
        return name.to_string();
    }

    let parent = parent_candidate(code).unwrap_or_default();
    let tokens = name.split_whitespace().collect::<Vec<&str>>();

    let mut cut = 0;
    for token in tokens.iter().take(2) {
        let starts_like_code = token.starts_with(['F', 'Ф']);
        if !starts_like_code {
            break;
        }

        let normalized = normalize_code(token);
        if normalized == code || (!parent.is_empty() && normalized == parent) {
            cut += 1;
        } else {
            break;
        }
    }

    if cut > 0 {
        tokens[cut..].join(" ")
    } else {
        name.to_string()
    }
}

/// Assigns parents from code structure. `fs` records form a flat list by
/// design; `fi` records are natural-sorted and each points at the code one
/// group shorter, when present in the batch. Parents are always strictly
/// shorter codes, so the result can never contain a cycle.
pub fn infer_hierarchy(mut records: Vec<FunctionRecord>, mode: FunctionMode) -> Vec<FunctionRecord> {
    match mode {
        FunctionMode::Fs => {
            for record in &mut records {
                record.parent_code.clear();
            }
            records
        }
        FunctionMode::Fi => {
            records.sort_by_cached_key(|record| CodeKey::for_code(&record.code));
            let known = records
                .iter()
                .map(|record| record.code.clone())
                .collect::<HashSet<String>>();

            for record in &mut records {
                record.parent_code = parent_candidate(&record.code)
                    .filter(|candidate| known.contains(candidate))
                    .unwrap_or_default();
            }
            records
        }
    }
}

pub struct ConsolidatedFunctions {
    pub records: Vec<FunctionRecord>,
    pub duplicates_merged: usize,
}

/// Collapses duplicate codes. The first occurrence in natural code order
/// keeps code, parent and name; later occurrences contribute their name to
/// the description when it differs. Output follows the natural code order.
pub fn consolidate_functions(records: Vec<FunctionRecord>) -> ConsolidatedFunctions {
    let mut sorted = records;
    sorted.sort_by_cached_key(|record| CodeKey::for_code(&record.code));

    let mut by_code = HashMap::<String, FunctionRecord>::new();
    let mut extras = HashMap::<String, BTreeSet<String>>::new();
    let mut order = Vec::<String>::new();
    let mut duplicates_merged = 0_usize;

    for record in sorted {
        match by_code.entry(record.code.clone()) {
            Entry::Vacant(slot) => {
                order.push(record.code.clone());
                slot.insert(record);
            }
            Entry::Occupied(slot) => {
                duplicates_merged += 1;
                let name = record.name.trim();
                if !name.is_empty() && name != slot.get().name {
                    extras
                        .entry(record.code.clone())
                        .or_default()
                        .insert(name.to_string());
                }
            }
        }
    }

    let records = order
        .into_iter()
        .filter_map(|code| {
            let mut record = by_code.remove(&code)?;
            if let Some(names) = extras.get(&code) {
                record.description = names
                    .iter()
                    .cloned()
                    .collect::<Vec<String>>()
                    .join("\n");
            }
            Some(record)
        })
        .collect();

    ConsolidatedFunctions {
        records,
        duplicates_merged,
    }
}
