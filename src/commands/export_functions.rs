//! Function export: validates the functions store and serializes the
//! hierarchy as nested `Function` elements.
//!
//! Validation here is strict. Function rows are machine-derived, so an empty
//! field, a duplicate code or a declared-but-absent parent is a hard error,
//! not something to repair.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Cursor;

use anyhow::{Context, Result, bail};
use quick_xml::Writer;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::name::QName;
use tracing::info;

use crate::cli::ExportFunctionsArgs;
use crate::model::FunctionRecord;
use crate::store::{self, NumberedRow};
use crate::tree::{ChildrenIndex, build_children_index};
use crate::util::{archive_old, ensure_directory, escape_attribute};

const DATASET_GUID: &str = "urn:placeholder";

// Pre-escaped so that line breaks inside the value become character
// references; a tuple push would leave them literal and a conforming
// parser would normalize them to spaces.
fn text_attribute<'a>(key: &'a str, value: &str) -> Attribute<'a> {
    Attribute {
        key: QName(key.as_bytes()),
        value: Cow::Owned(escape_attribute(value).into_bytes()),
    }
}

pub fn run(args: ExportFunctionsArgs) -> Result<()> {
    info!(
        input = %args.input.display(),
        out = %args.out.display(),
        "exporting functions to XML"
    );

    let rows = store::read_functions_store(&args.input)?;
    if rows.is_empty() {
        bail!(
            "function export stage: store {} contains no rows",
            args.input.display()
        );
    }

    let (functions, order) = validate_functions(&rows)?;
    let index = build_children_index(&order, |code| functions[code].parent_code.as_str());

    let xml = render_functions_xml(&functions, &index, args.target_fi.as_deref())?;

    if let Some(parent) = args.out.parent() {
        ensure_directory(parent)?;
    }
    archive_old(&args.out);
    std::fs::write(&args.out, xml)
        .with_context(|| format!("failed to write {}", args.out.display()))?;

    info!(
        functions = functions.len(),
        roots = index.roots.len(),
        path = %args.out.display(),
        "functions XML written"
    );

    Ok(())
}

fn validate_functions(
    rows: &[NumberedRow<FunctionRecord>],
) -> Result<(HashMap<String, FunctionRecord>, Vec<String>)> {
    let mut functions = HashMap::<String, FunctionRecord>::new();
    let mut order = Vec::<String>::new();

    for row in rows {
        let record = &row.value;

        if record.code.is_empty() {
            bail!("row {}: empty Func_code", row.row_num);
        }
        if record.name.is_empty() {
            bail!("row {}: empty Name for code '{}'", row.row_num, record.code);
        }
        if functions.contains_key(&record.code) {
            bail!("row {}: duplicate Func_code '{}'", row.row_num, record.code);
        }

        order.push(record.code.clone());
        functions.insert(record.code.clone(), record.clone());
    }

    for record in functions.values() {
        if !record.parent_code.is_empty() && !functions.contains_key(&record.parent_code) {
            bail!(
                "function '{}' references missing Parent_code '{}'",
                record.code,
                record.parent_code
            );
        }
    }

    Ok((functions, order))
}

fn render_functions_xml(
    functions: &HashMap<String, FunctionRecord>,
    index: &ChildrenIndex,
    target_fi: Option<&str>,
) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    let mut writer = Writer::new_with_indent(&mut buffer, b' ', 4);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .context("failed to write XML declaration")?;

    let mut dataset = BytesStart::new("Dataset");
    dataset.push_attribute(("GUID", DATASET_GUID));
    writer
        .write_event(Event::Start(dataset))
        .context("failed to write Dataset element")?;

    for root in &index.roots {
        write_function(&mut writer, root, functions, index, target_fi)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("Dataset")))
        .context("failed to close Dataset element")?;

    let mut output = buffer.into_inner();
    output.push(b'\n');
    Ok(output)
}

fn write_function<W: std::io::Write>(
    writer: &mut Writer<W>,
    code: &str,
    functions: &HashMap<String, FunctionRecord>,
    index: &ChildrenIndex,
    target_fi: Option<&str>,
) -> Result<()> {
    let Some(record) = functions.get(code) else {
        bail!("children index references unknown code '{code}'");
    };

    // Roots carry the FI designator; nested functions carry their parent code.
    let parentfi = if record.parent_code.is_empty() {
        target_fi.unwrap_or(record.fi.as_str())
    } else {
        ""
    };

    let mut element = BytesStart::new("Function");
    element.push_attribute(("guid", ""));
    element.push_attribute(text_attribute("description", &record.description));
    element.push_attribute(("parent", record.parent_code.as_str()));
    element.push_attribute(("parentfi", parentfi));
    element.push_attribute(("lcn", record.code.as_str()));
    element.push_attribute(text_attribute("name", &record.name));

    let children = index
        .children
        .get(code)
        .map(|values| values.as_slice())
        .unwrap_or_default();

    if children.is_empty() {
        writer
            .write_event(Event::Empty(element))
            .with_context(|| format!("failed to write Function element '{code}'"))?;
        return Ok(());
    }

    writer
        .write_event(Event::Start(element))
        .with_context(|| format!("failed to write Function element '{code}'"))?;

    for child in children {
        write_function(writer, child, functions, index, target_fi)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("Function")))
        .with_context(|| format!("failed to close Function element '{code}'"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(records: Vec<FunctionRecord>) -> Vec<NumberedRow<FunctionRecord>> {
        records
            .into_iter()
            .enumerate()
            .map(|(index, value)| NumberedRow {
                row_num: index as i64 + 1,
                value,
            })
            .collect()
    }

    fn record(code: &str, parent: &str, name: &str) -> FunctionRecord {
        FunctionRecord {
            fi: "TEST".to_string(),
            code: code.to_string(),
            parent_code: parent.to_string(),
            name: name.to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn nested_function_xml_matches_expected_layout() {
        let rows = numbered(vec![
            record("F1", "", "Top"),
            record("F1.1", "F1", "Child A"),
            record("F1.2", "F1", "Child B"),
        ]);

        let (functions, order) = validate_functions(&rows).expect("validate");
        let index = build_children_index(&order, |code| functions[code].parent_code.as_str());
        let xml = render_functions_xml(&functions, &index, None).expect("render");

        let expected = concat!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n",
            "<Dataset GUID=\"urn:placeholder\">\n",
            "    <Function guid=\"\" description=\"\" parent=\"\" parentfi=\"TEST\" ",
            "lcn=\"F1\" name=\"Top\">\n",
            "        <Function guid=\"\" description=\"\" parent=\"F1\" parentfi=\"\" ",
            "lcn=\"F1.1\" name=\"Child A\"/>\n",
            "        <Function guid=\"\" description=\"\" parent=\"F1\" parentfi=\"\" ",
            "lcn=\"F1.2\" name=\"Child B\"/>\n",
            "    </Function>\n",
            "</Dataset>\n",
        );
        assert_eq!(String::from_utf8(xml).expect("utf-8"), expected);
    }

    #[test]
    fn target_fi_override_replaces_root_designators() {
        let rows = numbered(vec![record("F1", "", "Top")]);

        let (functions, order) = validate_functions(&rows).expect("validate");
        let index = build_children_index(&order, |code| functions[code].parent_code.as_str());
        let xml = render_functions_xml(&functions, &index, Some("OVERRIDE")).expect("render");

        let text = String::from_utf8(xml).expect("utf-8");
        assert!(text.contains("parentfi=\"OVERRIDE\""));
        assert!(!text.contains("parentfi=\"TEST\""));
    }

    #[test]
    fn attribute_values_are_escaped() {
        let rows = numbered(vec![record("F1", "", "Heat & \"cool\" <fast>")]);

        let (functions, order) = validate_functions(&rows).expect("validate");
        let index = build_children_index(&order, |code| functions[code].parent_code.as_str());
        let xml = render_functions_xml(&functions, &index, None).expect("render");

        let text = String::from_utf8(xml).expect("utf-8");
        assert!(text.contains("name=\"Heat &amp; &quot;cool&quot; &lt;fast&gt;\""));
    }

    #[test]
    fn consolidated_descriptions_keep_their_line_breaks() {
        let mut top = record("F1", "", "Top");
        top.description = "Alpha\nZeta".to_string();
        let rows = numbered(vec![top]);

        let (functions, order) = validate_functions(&rows).expect("validate");
        let index = build_children_index(&order, |code| functions[code].parent_code.as_str());
        let xml = render_functions_xml(&functions, &index, None).expect("render");

        let text = String::from_utf8(xml).expect("utf-8");
        assert!(text.contains("description=\"Alpha&#10;Zeta\""));
        assert!(!text.contains("description=\"Alpha\nZeta\""));
    }

    #[test]
    fn duplicate_codes_are_a_hard_error() {
        let rows = numbered(vec![record("F1", "", "Top"), record("F1", "", "Again")]);
        let err = validate_functions(&rows).expect_err("must fail");
        assert!(err.to_string().contains("duplicate Func_code 'F1'"));
        assert!(err.to_string().contains("row 2"));
    }

    #[test]
    fn missing_parent_is_a_hard_error() {
        let rows = numbered(vec![record("F1.1", "F1", "Orphan")]);
        let err = validate_functions(&rows).expect_err("must fail");
        assert!(err.to_string().contains("missing Parent_code 'F1'"));
    }

    #[test]
    fn empty_code_and_name_are_hard_errors() {
        let err = validate_functions(&numbered(vec![record("", "", "Name")]))
            .expect_err("must fail");
        assert!(err.to_string().contains("empty Func_code"));

        let err =
            validate_functions(&numbered(vec![record("F1", "", "")])).expect_err("must fail");
        assert!(err.to_string().contains("empty Name"));
    }

    #[test]
    fn export_writes_and_archives_artifacts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store_path = dir.path().join("Functions.sqlite");
        let out_path = dir.path().join("functions_output.xml");

        store::write_functions_store(
            &store_path,
            &[record("F1", "", "Top"), record("F1.1", "F1", "Child A")],
            &[],
        )
        .expect("write store");

        let args = ExportFunctionsArgs {
            input: store_path.clone(),
            out: out_path.clone(),
            target_fi: None,
        };
        run(args.clone()).expect("first export");
        run(args).expect("second export");

        assert!(out_path.is_file());
        let archived = std::fs::read_dir(dir.path().join("Archive"))
            .expect("archive dir")
            .count();
        assert_eq!(archived, 1);
    }
}
