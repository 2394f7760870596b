//! Structure extraction: finds "system / subsystem / name" tables in a PDF
//! text layout or a spreadsheet, synthesizes structure items with parent
//! links and stores them for the export stage.

use std::collections::HashMap;

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::ParseStructureArgs;
use crate::model::{ParseCounts, ParseRunManifest, StructureItem};
use crate::reader::{self, Sheet};
use crate::store;
use crate::util::{
    archive_old, ensure_directory, now_utc_string, sha256_file, utc_compact_string,
    write_json_pretty,
};

/// Header prefixes accepted for the three table columns, lower-cased.
const SYSTEM_HEADERS: [&str; 2] = ["система", "system"];
const SUBSYSTEM_HEADERS: [&str; 2] = ["подсистема", "subsystem"];
const NAME_HEADERS: [&str; 4] = ["наимен", "функц", "name", "function"];

/// A line starting with this prefix terminates the table region of a page.
const TABLE_END_MARKER: &str = "перечень функций самолета";

/// Placeholder unit of measure for rows that never specify one.
pub const PLACEHOLDER_UOM: &str = "Н";

const ALTERNATE_NAME_PREFIX: &str = "Alternate name: ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureRow {
    pub system: String,
    pub subsystem: String,
    pub name: String,
}

pub fn run(args: ParseStructureArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("parse-structure-{}", utc_compact_string(started_ts));

    info!(
        input = %args.input.display(),
        out = %args.out.display(),
        "parsing structure"
    );

    let extension = args
        .input
        .extension()
        .map(|value| value.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let mut diagnostics = Vec::new();
    let rows = match extension.as_str() {
        "pdf" => {
            let extracted = reader::read_pdf_pages(&args.input)?;
            diagnostics.extend(extracted.diagnostics);
            extract_rows_from_pages(&extracted.pages)
        }
        "xlsx" | "xls" => {
            let extracted = reader::read_sheets(&args.input)?;
            diagnostics.extend(extracted.diagnostics);
            extract_rows_from_sheets(&extracted.sheets)
        }
        other => bail!(
            "structure parsing supports only PDF and spreadsheet sources, got '.{other}': {}",
            args.input.display()
        ),
    };

    if rows.is_empty() {
        bail!(
            "structure parse stage: no system/subsystem rows recognized in {}",
            args.input.display()
        );
    }

    let built = build_structure_items(&rows);
    let roots = built
        .items
        .iter()
        .filter(|item| item.parent_id.is_empty())
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
        ("generated_at".to_string(), updated_at.clone()),
    ];
    store::write_structure_store(&args.out, &built.items, &metadata)?;

    let mut warnings = diagnostics;
    warnings.extend(built.warnings);

    let manifest = ParseRunManifest {
        manifest_version: 1,
        run_id: run_id.clone(),
        command: "parse-structure".to_string(),
        status: "completed".to_string(),
        started_at,
        updated_at,
        source_path: args.input.display().to_string(),
        source_sha256,
        store_path: args.out.display().to_string(),
        counts: ParseCounts {
            lines_matched: rows.len(),
            records_kept: rows.len(),
            records_consolidated: built.items.len(),
            duplicates_merged: built.duplicates_merged,
            roots,
        },
        warnings,
    };
    let manifest_dir = args.manifest_dir.clone().unwrap_or_else(|| {
        args.out
            .parent()
            .map(|parent| parent.join("manifests"))
            .unwrap_or_else(|| "manifests".into())
    });
    write_json_pretty(&manifest_dir.join(format!("{run_id}.json")), &manifest)?;

    info!(
        items = built.items.len(),
        roots,
        duplicates_merged = built.duplicates_merged,
        path = %args.out.display(),
        "structure store written"
    );

    Ok(())
}

/// Scans page-oriented text for the three-line table header and the
/// system/subsystem code lines below it. The table region resets on every
/// page, but the current system code carries across pages: a table continued
/// on the next page keeps attributing subsystems to the last system seen.
pub fn extract_rows_from_pages(pages: &[String]) -> Vec<StructureRow> {
    let mut rows = Vec::new();
    let mut current_system: Option<String> = None;

    for page in pages {
        let lines = page.lines().map(str::trim).collect::<Vec<&str>>();
        scan_page(&lines, &mut current_system, &mut rows);
    }

    rows
}

fn scan_page(lines: &[&str], current_system: &mut Option<String>, rows: &mut Vec<StructureRow>) {
    let mut in_table = false;
    let mut index = 0;

    while index < lines.len() {
        let line = lines[index];
        let lowered = line.to_lowercase();

        if !in_table {
            if starts_with_any(&lowered, &SYSTEM_HEADERS)
                && index + 2 < lines.len()
                && starts_with_any(&lines[index + 1].to_lowercase(), &SUBSYSTEM_HEADERS)
                && starts_with_any(&lines[index + 2].to_lowercase(), &NAME_HEADERS)
            {
                in_table = true;
                index += 3;
                continue;
            }
        } else {
            if lowered.starts_with(TABLE_END_MARKER) {
                break;
            }

            if line.is_empty() {
                index += 1;
                continue;
            }

            if let Some(number) = parse_code_line(line) {
                // Codes not divisible by ten name a system, the rest are
                // subsystems of the current one.
                if number % 10 != 0 {
                    *current_system = Some(line.to_string());
                    index += 1;
                    continue;
                }

                let subsystem = line.to_string();
                index += 1;

                let mut name_parts = Vec::<&str>::new();
                while index < lines.len() {
                    let candidate = lines[index];
                    if candidate.is_empty() {
                        index += 1;
                        continue;
                    }
                    if parse_code_line(candidate).is_some() {
                        break;
                    }
                    if candidate.to_lowercase().starts_with(TABLE_END_MARKER) {
                        break;
                    }
                    name_parts.push(candidate);
                    index += 1;
                }

                let name = name_parts.join(" ");
                if name.is_empty() {
                    continue;
                }
                let Some(system) = current_system.as_ref() else {
                    // A subsystem before any system code is unattributable.
                    continue;
                };

                rows.push(StructureRow {
                    system: system.clone(),
                    subsystem,
                    name,
                });
                continue;
            }
        }

        index += 1;
    }
}

/// Scans every sheet for a row with three horizontally adjacent header cells
/// and reads (system, subsystem, name) triples at those column offsets below
/// it. Only the first header row per sheet is used.
pub fn extract_rows_from_sheets(sheets: &[Sheet]) -> Vec<StructureRow> {
    let mut rows = Vec::new();

    for sheet in sheets {
        let Some((header_row, column)) = find_header(&sheet.rows) else {
            continue;
        };

        let mut current_system: Option<String> = None;

        for row in sheet.rows.iter().skip(header_row + 1) {
            let system_raw = cell_at(row, column);
            let subsystem_raw = cell_at(row, column + 1);
            let name_raw = cell_at(row, column + 2);

            if system_raw.is_empty() && subsystem_raw.is_empty() && name_raw.is_empty() {
                continue;
            }

            if !system_raw.is_empty() {
                current_system = Some(system_raw.to_string());
            }
            let Some(system) = current_system.as_ref() else {
                continue;
            };
            if subsystem_raw.is_empty() || name_raw.is_empty() {
                continue;
            }

            rows.push(StructureRow {
                system: system.clone(),
                subsystem: subsystem_raw.to_string(),
                name: name_raw.to_string(),
            });
        }
    }

    rows
}

fn find_header(rows: &[Vec<String>]) -> Option<(usize, usize)> {
    for (row_index, row) in rows.iter().enumerate() {
        for column in 0..row.len().saturating_sub(2) {
            let c0 = row[column].to_lowercase();
            let c1 = row[column + 1].to_lowercase();
            let c2 = row[column + 2].to_lowercase();

            if starts_with_any(&c0, &SYSTEM_HEADERS)
                && starts_with_any(&c1, &SUBSYSTEM_HEADERS)
                && starts_with_any(&c2, &NAME_HEADERS)
            {
                return Some((row_index, column));
            }
        }
    }
    None
}

fn cell_at(row: &[String], column: usize) -> &str {
    row.get(column).map(|value| value.trim()).unwrap_or("")
}

fn starts_with_any(value: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|prefix| value.starts_with(prefix))
}

// A pure 1-3 digit line is a system or subsystem code.
fn parse_code_line(line: &str) -> Option<u32> {
    if line.is_empty() || line.len() > 3 || !line.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    line.parse().ok()
}

pub struct BuiltItems {
    pub items: Vec<StructureItem>,
    pub warnings: Vec<String>,
    pub duplicates_merged: usize,
}

/// Turns extracted triples into structure items. `id` is
/// `"{system}.{subsystem}"`; subsystem `"00"` marks the system root, every
/// other subsystem hangs off `"{system}.00"`. The first occurrence of an id
/// wins; later occurrences with a different name only annotate the
/// description. Output is sorted by id.
pub fn build_structure_items(rows: &[StructureRow]) -> BuiltItems {
    let mut items = Vec::<StructureItem>::new();
    let mut index_by_id = HashMap::<String, usize>::new();
    let mut warnings = Vec::new();
    let mut duplicates_merged = 0_usize;

    for row in rows {
        let system = row.system.trim();
        let subsystem = row.subsystem.trim();
        let name = row.name.trim();
        if system.is_empty() || subsystem.is_empty() || name.is_empty() {
            continue;
        }

        let id = format!("{system}.{subsystem}");
        let parent_id = if subsystem == "00" {
            String::new()
        } else {
            format!("{system}.00")
        };

        match index_by_id.get(&id) {
            None => {
                index_by_id.insert(id.clone(), items.len());
                items.push(StructureItem {
                    id,
                    parent_id,
                    name: name.to_string(),
                    description: String::new(),
                    quantity: "1".to_string(),
                    uom: PLACEHOLDER_UOM.to_string(),
                });
            }
            Some(&slot) => {
                duplicates_merged += 1;
                let existing = &mut items[slot];
                if name != existing.name {
                    let message = format!(
                        "duplicate structure id '{id}' ('{}' / '{name}'), first occurrence kept",
                        existing.name
                    );
                    warn!(id = %id, "{message}");
                    warnings.push(message);

                    if !existing.description.contains(name) {
                        if !existing.description.is_empty() {
                            existing.description.push('\n');
                        }
                        existing.description.push_str(ALTERNATE_NAME_PREFIX);
                        existing.description.push_str(name);
                    }
                }
            }
        }
    }

    items.sort_by(|a, b| a.id.cmp(&b.id));

    BuiltItems {
        items,
        warnings,
        duplicates_merged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(lines: &[&str]) -> String {
        lines.join("\n")
    }

    fn row(system: &str, subsystem: &str, name: &str) -> StructureRow {
        StructureRow {
            system: system.to_string(),
            subsystem: subsystem.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn page_scan_reads_systems_and_subsystems() {
        let pages = vec![page(&[
            "Система",
            "Подсистема",
            "Наименование",
            "21",
            "00",
            "Кондиционирование",
            "воздуха",
            "10",
            "Наддув",
        ])];

        let rows = extract_rows_from_pages(&pages);
        assert_eq!(
            rows,
            vec![
                row("21", "00", "Кондиционирование воздуха"),
                row("21", "10", "Наддув"),
            ]
        );
    }

    #[test]
    fn page_scan_ignores_text_before_the_header() {
        let pages = vec![page(&["21", "00", "Stray codes", "no header on this page"])];
        assert!(extract_rows_from_pages(&pages).is_empty());
    }

    #[test]
    fn page_scan_stops_at_the_end_marker() {
        let pages = vec![page(&[
            "System",
            "Subsystem",
            "Name",
            "21",
            "00",
            "Air conditioning",
            "Перечень функций самолета",
            "22",
            "00",
            "Never reached",
        ])];

        let rows = extract_rows_from_pages(&pages);
        assert_eq!(rows, vec![row("21", "00", "Air conditioning")]);
    }

    #[test]
    fn current_system_persists_across_pages() {
        let pages = vec![
            page(&["Система", "Подсистема", "Наименование", "21", "00", "Climate"]),
            page(&["Система", "Подсистема", "Наименование", "10", "Pressurization"]),
        ];

        let rows = extract_rows_from_pages(&pages);
        assert_eq!(
            rows,
            vec![row("21", "00", "Climate"), row("21", "10", "Pressurization")]
        );
    }

    #[test]
    fn dangling_subsystem_before_any_system_is_discarded() {
        let pages = vec![page(&[
            "Система",
            "Подсистема",
            "Наименование",
            "10",
            "Orphan subsystem",
            "21",
            "20",
            "Attributed subsystem",
        ])];

        let rows = extract_rows_from_pages(&pages);
        assert_eq!(rows, vec![row("21", "20", "Attributed subsystem")]);
    }

    fn sheet(rows: &[&[&str]]) -> Sheet {
        Sheet {
            name: "Sheet1".to_string(),
            rows: rows
                .iter()
                .map(|cells| cells.iter().map(|value| value.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn sheet_scan_finds_offset_headers_and_fills_down_systems() {
        let sheets = vec![sheet(&[
            &["", "irrelevant preamble", "", ""],
            &["", "Система", "Подсистема", "Наименование"],
            &["", "21", "00", "Climate"],
            &["", "", "10", "Pressurization"],
            &["", "22", "00", "Autoflight"],
        ])];

        let rows = extract_rows_from_sheets(&sheets);
        assert_eq!(
            rows,
            vec![
                row("21", "00", "Climate"),
                row("21", "10", "Pressurization"),
                row("22", "00", "Autoflight"),
            ]
        );
    }

    #[test]
    fn sheet_scan_accepts_english_headers_and_function_column() {
        let sheets = vec![sheet(&[
            &["System", "Subsystem", "Functions"],
            &["21", "00", "Climate"],
        ])];

        let rows = extract_rows_from_sheets(&sheets);
        assert_eq!(rows, vec![row("21", "00", "Climate")]);
    }

    #[test]
    fn sheet_scan_skips_incomplete_rows() {
        let sheets = vec![sheet(&[
            &["Система", "Подсистема", "Наименование"],
            &["", "10", "Before any system"],
            &["21", "", "No subsystem"],
            &["", "10", ""],
            &["", "20", "Kept"],
        ])];

        let rows = extract_rows_from_sheets(&sheets);
        assert_eq!(rows, vec![row("21", "20", "Kept")]);
    }

    #[test]
    fn only_the_first_header_per_sheet_is_used() {
        let sheets = vec![sheet(&[
            &["Система", "Подсистема", "Наименование"],
            &["21", "00", "Climate"],
            &["Система", "Подсистема", "Наименование"],
            &["22", "00", "Autoflight"],
        ])];

        // The repeated header defines no new columns; it is read as a plain
        // data row like any other.
        let rows = extract_rows_from_sheets(&sheets);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], row("21", "00", "Climate"));
        assert_eq!(rows[1], row("Система", "Подсистема", "Наименование"));
        assert_eq!(rows[2], row("22", "00", "Autoflight"));
    }

    #[test]
    fn builder_synthesizes_ids_and_parents() {
        let rows = vec![
            row("21", "00", "Climate"),
            row("21", "10", "Pressurization"),
            row("22", "00", "Autoflight"),
        ];

        let built = build_structure_items(&rows);
        assert!(built.warnings.is_empty());
        assert_eq!(built.items.len(), 3);

        assert_eq!(built.items[0].id, "21.00");
        assert_eq!(built.items[0].parent_id, "");
        assert_eq!(built.items[1].id, "21.10");
        assert_eq!(built.items[1].parent_id, "21.00");
        assert_eq!(built.items[1].quantity, "1");
        assert_eq!(built.items[1].uom, PLACEHOLDER_UOM);
        assert_eq!(built.items[2].parent_id, "");
    }

    #[test]
    fn duplicate_ids_keep_the_first_name_and_annotate_alternates() {
        let rows = vec![
            row("21", "10", "Pressurization"),
            row("21", "10", "Pressurisation system"),
            row("21", "10", "Pressurization"),
            row("21", "10", "Pressurisation system"),
        ];

        let built = build_structure_items(&rows);
        assert_eq!(built.items.len(), 1);
        assert_eq!(built.items[0].name, "Pressurization");
        assert_eq!(
            built.items[0].description,
            "Alternate name: Pressurisation system"
        );
        assert_eq!(built.duplicates_merged, 3);
        // One warning per differing duplicate row.
        assert_eq!(built.warnings.len(), 2);
    }

    #[test]
    fn builder_output_is_sorted_by_id() {
        let rows = vec![
            row("29", "00", "Hydraulics"),
            row("21", "00", "Climate"),
            row("21", "10", "Pressurization"),
        ];

        let ids = build_structure_items(&rows)
            .items
            .into_iter()
            .map(|item| item.id)
            .collect::<Vec<String>>();
        assert_eq!(ids, vec!["21.00", "21.10", "29.00"]);
    }
}
