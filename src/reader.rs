//! External collaborators: raw text and table extraction from source files.
//!
//! Extraction problems never abort a run from here. Each reader returns what
//! it could recover plus a diagnostics list; the calling pipeline decides
//! whether an empty result is terminal. Only a missing input file or an
//! unsupported extension is a hard error.

use std::fs::File;
use std::io::Read as _;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};
use calamine::{Data, Reader as _, open_workbook_auto};
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::warn;
use zip::ZipArchive;

#[derive(Debug)]
pub struct DocumentText {
    pub text: String,
    pub diagnostics: Vec<String>,
}

#[derive(Debug)]
pub struct PdfPages {
    pub pages: Vec<String>,
    pub diagnostics: Vec<String>,
}

#[derive(Debug)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug)]
pub struct SheetSet {
    pub sheets: Vec<Sheet>,
    pub diagnostics: Vec<String>,
}

/// Extracts free text from `.txt`, `.docx`, `.pdf`, `.xlsx` or `.xls`.
/// Spreadsheets are flattened to lines by joining non-empty cells.
pub fn read_document(path: &Path) -> Result<DocumentText> {
    if !path.is_file() {
        bail!("input file not found: {}", path.display());
    }

    let extension = file_extension(path);
    let mut diagnostics = Vec::new();

    let text = match extension.as_str() {
        "txt" => match std::fs::read(path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => {
                diagnostics.push(format!("failed to read {}: {err}", path.display()));
                String::new()
            }
        },
        "docx" => match extract_docx_text(path) {
            Ok(text) => text,
            Err(err) => {
                diagnostics.push(format!("docx extraction failed for {}: {err:#}", path.display()));
                String::new()
            }
        },
        "pdf" => {
            let extracted = read_pdf_pages(path)?;
            diagnostics.extend(extracted.diagnostics);
            extracted.pages.join("\n")
        }
        "xlsx" | "xls" => {
            let extracted = read_sheets(path)?;
            diagnostics.extend(extracted.diagnostics);
            sheets_to_text(&extracted.sheets)
        }
        other => bail!("unsupported input extension '.{other}': {}", path.display()),
    };

    for diagnostic in &diagnostics {
        warn!(diagnostic = %diagnostic, "document extraction issue");
    }

    Ok(DocumentText { text, diagnostics })
}

/// Per-page text via the `pdftotext` text layer, pages split on form feeds.
pub fn read_pdf_pages(path: &Path) -> Result<PdfPages> {
    if !path.is_file() {
        bail!("input file not found: {}", path.display());
    }

    let output = Command::new("pdftotext")
        .arg("-enc")
        .arg("UTF-8")
        .arg(path)
        .arg("-")
        .output();

    let output = match output {
        Ok(output) => output,
        Err(err) => {
            let diagnostic = format!("failed to execute pdftotext for {}: {err}", path.display());
            warn!(diagnostic = %diagnostic, "pdf extraction issue");
            return Ok(PdfPages { pages: Vec::new(), diagnostics: vec![diagnostic] });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostic = format!(
            "pdftotext returned non-zero exit status for {}: {}",
            path.display(),
            stderr.trim()
        );
        warn!(diagnostic = %diagnostic, "pdf extraction issue");
        return Ok(PdfPages { pages: Vec::new(), diagnostics: vec![diagnostic] });
    }

    let raw = String::from_utf8_lossy(&output.stdout);
    let pages = raw
        .split('\u{000C}')
        .map(|page| page.to_string())
        .collect::<Vec<String>>();

    Ok(PdfPages { pages, diagnostics: Vec::new() })
}

/// Every sheet of a workbook as a trimmed cell grid.
pub fn read_sheets(path: &Path) -> Result<SheetSet> {
    if !path.is_file() {
        bail!("input file not found: {}", path.display());
    }

    let mut workbook = match open_workbook_auto(path) {
        Ok(workbook) => workbook,
        Err(err) => {
            let diagnostic = format!("failed to open workbook {}: {err}", path.display());
            warn!(diagnostic = %diagnostic, "spreadsheet extraction issue");
            return Ok(SheetSet { sheets: Vec::new(), diagnostics: vec![diagnostic] });
        }
    };

    let mut sheets = Vec::new();
    let mut diagnostics = Vec::new();

    for name in workbook.sheet_names() {
        match workbook.worksheet_range(&name) {
            Ok(range) => {
                let rows = range
                    .rows()
                    .map(|row| row.iter().map(format_cell).collect::<Vec<String>>())
                    .collect();
                sheets.push(Sheet { name, rows });
            }
            Err(err) => {
                let diagnostic = format!("failed to read sheet '{name}': {err}");
                warn!(diagnostic = %diagnostic, "spreadsheet extraction issue");
                diagnostics.push(diagnostic);
            }
        }
    }

    Ok(SheetSet { sheets, diagnostics })
}

fn file_extension(path: &Path) -> String {
    path.extension()
        .map(|value| value.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

// Integer-valued numeric cells must render without the float tail, otherwise
// a system code cell "21" would surface as "21.0".
fn format_cell(data: &Data) -> String {
    match data {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(value) => value.trim().to_string(),
        Data::Float(value) => {
            if value.fract() == 0.0 && value.abs() < 1e15 {
                format!("{}", *value as i64)
            } else {
                value.to_string()
            }
        }
        Data::Int(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
        Data::DateTime(value) => value.as_f64().to_string(),
        Data::DateTimeIso(value) | Data::DurationIso(value) => value.trim().to_string(),
    }
}

fn sheets_to_text(sheets: &[Sheet]) -> String {
    let mut lines = Vec::new();
    for sheet in sheets {
        for row in &sheet.rows {
            let values = row
                .iter()
                .filter(|value| !value.is_empty())
                .cloned()
                .collect::<Vec<String>>();
            if !values.is_empty() {
                lines.push(values.join(" "));
            }
        }
    }
    lines.join("\n")
}

// A DOCX is a zip container; the visible text (paragraphs and table cells
// alike) lives in word/document.xml as w:t runs grouped into w:p paragraphs.
fn extract_docx_text(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("not a zip container: {}", path.display()))?;

    let mut entry = archive
        .by_name("word/document.xml")
        .context("word/document.xml missing from container")?;
    let mut xml = Vec::new();
    entry
        .read_to_end(&mut xml)
        .context("failed to read word/document.xml")?;

    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Text(event)) => {
                let fragment = event
                    .unescape()
                    .context("failed to decode text run in word/document.xml")?;
                text.push_str(&fragment);
            }
            Ok(Event::End(event)) if event.name().as_ref() == b"w:p" => {
                text.push('\n');
            }
            Ok(Event::Empty(event)) if event.name().as_ref() == b"w:tab" => {
                text.push(' ');
            }
            Ok(Event::Empty(event)) if event.name().as_ref() == b"w:br" => {
                text.push('\n');
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                bail!(
                    "XML parse error in word/document.xml at position {}: {err}",
                    reader.error_position()
                );
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(text)
}
