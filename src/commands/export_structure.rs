//! Structure export: validates the structure store and serializes the item
//! tree as `Cube` elements nested inside `CubeLink` quantity wrappers.
//!
//! Unlike the function export, validation here is repairing. Structure rows
//! come from hand-maintained documents, so duplicate ids are merged with
//! field backfill and dangling parents are cleared to root, each with a
//! warning. Only an empty item id or a tree with no roots is fatal.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Cursor;

use anyhow::{Context, Result, bail};
use quick_xml::Writer;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::name::QName;
use tracing::{info, warn};

use crate::cli::ExportStructureArgs;
use crate::commands::parse_structure::PLACEHOLDER_UOM;
use crate::model::StructureItem;
use crate::store::{self, NumberedRow};
use crate::tree::{ChildrenIndex, build_children_index};
use crate::util::{archive_old, ensure_directory, escape_attribute};

const DATASET_GUID: &str = "urn:placeholder";
const DEFAULT_QUANTITY: &str = "1";

// Pre-escaped so that line breaks inside the value become character
// references; a tuple push would leave them literal and a conforming
// parser would normalize them to spaces.
fn text_attribute<'a>(key: &'a str, value: &str) -> Attribute<'a> {
    Attribute {
        key: QName(key.as_bytes()),
        value: Cow::Owned(escape_attribute(value).into_bytes()),
    }
}

pub fn run(args: ExportStructureArgs) -> Result<()> {
    info!(
        input = %args.input.display(),
        out = %args.out.display(),
        "exporting structure to XML"
    );

    let rows = store::read_structure_store(&args.input)?;
    if rows.is_empty() {
        bail!(
            "structure export stage: store {} contains no rows",
            args.input.display()
        );
    }

    let validated = validate_items(&rows)?;
    for warning in &validated.warnings {
        warn!("{warning}");
    }

    let index = build_children_index(&validated.order, |id| {
        validated.items[id].parent_id.as_str()
    });
    if index.roots.is_empty() {
        bail!("structure export stage: no root items remain after validation");
    }

    let xml = render_structure_xml(&validated.items, &index)?;

    if let Some(parent) = args.out.parent() {
        ensure_directory(parent)?;
    }
    archive_old(&args.out);
    std::fs::write(&args.out, xml)
        .with_context(|| format!("failed to write {}", args.out.display()))?;

    info!(
        items = validated.items.len(),
        roots = index.roots.len(),
        warnings = validated.warnings.len(),
        path = %args.out.display(),
        "structure XML written"
    );

    Ok(())
}

#[derive(Debug)]
pub struct ValidatedItems {
    pub items: HashMap<String, StructureItem>,
    pub order: Vec<String>,
    pub warnings: Vec<String>,
}

pub fn validate_items(rows: &[NumberedRow<StructureItem>]) -> Result<ValidatedItems> {
    let mut items = HashMap::<String, StructureItem>::new();
    let mut order = Vec::<String>::new();
    let mut warnings = Vec::<String>::new();

    for row in rows {
        let mut item = row.value.clone();
        if item.id.is_empty() {
            bail!("row {}: empty Item_ID", row.row_num);
        }
        if item.quantity.is_empty() {
            item.quantity = DEFAULT_QUANTITY.to_string();
        }
        if item.uom.is_empty() {
            item.uom = PLACEHOLDER_UOM.to_string();
        }

        match items.get_mut(&item.id) {
            None => {
                order.push(item.id.clone());
                items.insert(item.id.clone(), item);
            }
            Some(existing) => {
                if *existing == item {
                    warnings.push(format!(
                        "row {}: duplicate item '{}' with identical data, first occurrence kept",
                        row.row_num, item.id
                    ));
                    continue;
                }
                warnings.push(format!(
                    "row {}: duplicate item '{}' with differing data, merged into first occurrence",
                    row.row_num, item.id
                ));
                // Backfill only what the first occurrence left empty or at
                // its default. The first-seen parent is always kept.
                if existing.name.is_empty() {
                    existing.name = item.name;
                }
                if existing.description.is_empty() {
                    existing.description = item.description;
                }
                if existing.quantity == DEFAULT_QUANTITY && item.quantity != DEFAULT_QUANTITY {
                    existing.quantity = item.quantity;
                }
                if existing.uom == PLACEHOLDER_UOM && item.uom != PLACEHOLDER_UOM {
                    existing.uom = item.uom;
                }
            }
        }
    }

    let known: Vec<String> = order.clone();
    for id in &known {
        let parent_id = items[id].parent_id.clone();
        if !parent_id.is_empty() && !items.contains_key(&parent_id) {
            warnings.push(format!(
                "item '{id}' references missing parent '{parent_id}', reattached as root"
            ));
            if let Some(item) = items.get_mut(id) {
                item.parent_id.clear();
            }
        }
    }

    Ok(ValidatedItems {
        items,
        order,
        warnings,
    })
}

fn render_structure_xml(
    items: &HashMap<String, StructureItem>,
    index: &ChildrenIndex,
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
        write_cube(&mut writer, root, items, index, true)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("Dataset")))
        .context("failed to close Dataset element")?;

    let mut output = buffer.into_inner();
    output.push(b'\n');
    Ok(output)
}

fn write_cube<W: std::io::Write>(
    writer: &mut Writer<W>,
    id: &str,
    items: &HashMap<String, StructureItem>,
    index: &ChildrenIndex,
    is_root: bool,
) -> Result<()> {
    let Some(item) = items.get(id) else {
        bail!("children index references unknown item '{id}'");
    };

    let final_item = if is_root { "1" } else { "0" };
    let mut element = BytesStart::new("Cube");
    element.push_attribute(("is_MSI", "0"));
    element.push_attribute(("final_item", final_item));
    element.push_attribute(text_attribute("description", &item.description));
    element.push_attribute(text_attribute("name", &item.name));
    element.push_attribute(("id", item.id.as_str()));
    element.push_attribute(("uom", item.uom.as_str()));

    let children = index
        .children
        .get(id)
        .map(|values| values.as_slice())
        .unwrap_or_default();

    if children.is_empty() {
        writer
            .write_event(Event::Empty(element))
            .with_context(|| format!("failed to write Cube element '{id}'"))?;
        return Ok(());
    }

    writer
        .write_event(Event::Start(element))
        .with_context(|| format!("failed to write Cube element '{id}'"))?;

    for child in children {
        let quantity = items
            .get(child)
            .map(|value| value.quantity.as_str())
            .unwrap_or(DEFAULT_QUANTITY);
        let mut link = BytesStart::new("CubeLink");
        link.push_attribute(("quantity", quantity));
        writer
            .write_event(Event::Start(link))
            .with_context(|| format!("failed to write CubeLink element for '{child}'"))?;

        write_cube(writer, child, items, index, false)?;

        writer
            .write_event(Event::End(BytesEnd::new("CubeLink")))
            .with_context(|| format!("failed to close CubeLink element for '{child}'"))?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("Cube")))
        .with_context(|| format!("failed to close Cube element '{id}'"))?;

    Ok(())
}
