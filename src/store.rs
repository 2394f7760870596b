//! Intermediate tabular artifacts.
//!
//! Each parse run materializes its records into a single fixed-name table of
//! an sqlite store (`Functions` or `Structure`), plus a `metadata` key/value
//! table carrying run provenance. The export commands read these tables back
//! in rowid order and validate them against the fixed column sets.

use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, params};

use crate::model::{FunctionRecord, StructureItem};

pub const FUNCTIONS_TABLE: &str = "Functions";
pub const STRUCTURE_TABLE: &str = "Structure";

pub const FUNCTION_COLUMNS: [&str; 6] = [
    "FI_designator",
    "Func_code",
    "Parent_code",
    "Name",
    "Description",
    "Products_list",
];

pub const STRUCTURE_COLUMNS: [&str; 6] =
    ["Item_ID", "Parent_ID", "Name", "Description", "Quantity", "UOM"];

/// A stored row paired with its 1-based row number for error context.
#[derive(Debug, Clone)]
pub struct NumberedRow<T> {
    pub row_num: i64,
    pub value: T,
}

fn open_connection(path: &Path) -> Result<Connection> {
    let connection = Connection::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(connection)
}

pub fn write_functions_store(
    path: &Path,
    records: &[FunctionRecord],
    metadata: &[(String, String)],
) -> Result<()> {
    let mut connection = open_connection(path)?;
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS Functions (
          FI_designator TEXT NOT NULL,
          Func_code TEXT NOT NULL,
          Parent_code TEXT NOT NULL DEFAULT '',
          Name TEXT NOT NULL,
          Description TEXT NOT NULL DEFAULT '',
          Products_list TEXT NOT NULL DEFAULT ''
        );
        ",
    )?;

    let tx = connection.transaction()?;
    tx.execute(&format!("DELETE FROM {FUNCTIONS_TABLE}"), [])?;
    {
        let mut statement = tx.prepare(
            "INSERT INTO Functions
               (FI_designator, Func_code, Parent_code, Name, Description, Products_list)
             VALUES (?1, ?2, ?3, ?4, ?5, '')",
        )?;
        for record in records {
            statement.execute(params![
                record.fi,
                record.code,
                record.parent_code,
                record.name,
                record.description,
            ])?;
        }
    }
    write_metadata(&tx, metadata)?;
    tx.commit()?;

    Ok(())
}

pub fn write_structure_store(
    path: &Path,
    items: &[StructureItem],
    metadata: &[(String, String)],
) -> Result<()> {
    let mut connection = open_connection(path)?;
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS Structure (
          Item_ID TEXT NOT NULL,
          Parent_ID TEXT NOT NULL DEFAULT '',
          Name TEXT NOT NULL,
          Description TEXT NOT NULL DEFAULT '',
          Quantity TEXT NOT NULL DEFAULT '1',
          UOM TEXT NOT NULL
        );
        ",
    )?;

    let tx = connection.transaction()?;
    tx.execute(&format!("DELETE FROM {STRUCTURE_TABLE}"), [])?;
    {
        let mut statement = tx.prepare(
            "INSERT INTO Structure
               (Item_ID, Parent_ID, Name, Description, Quantity, UOM)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for item in items {
            statement.execute(params![
                item.id,
                item.parent_id,
                item.name,
                item.description,
                item.quantity,
                item.uom,
            ])?;
        }
    }
    write_metadata(&tx, metadata)?;
    tx.commit()?;

    Ok(())
}

fn write_metadata(tx: &rusqlite::Transaction<'_>, metadata: &[(String, String)]) -> Result<()> {
    let mut statement = tx.prepare(
        "INSERT INTO metadata (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )?;
    for (key, value) in metadata {
        statement.execute(params![key, value])?;
    }
    Ok(())
}

pub fn read_functions_store(path: &Path) -> Result<Vec<NumberedRow<FunctionRecord>>> {
    if !path.is_file() {
        bail!("functions store not found: {}", path.display());
    }

    let connection = open_connection(path)?;
    require_columns(&connection, FUNCTIONS_TABLE, &FUNCTION_COLUMNS)?;

    let mut statement = connection.prepare(
        "SELECT rowid, FI_designator, Func_code, Parent_code, Name, Description
         FROM Functions ORDER BY rowid",
    )?;
    let rows = statement
        .query_map([], |row| {
            Ok(NumberedRow {
                row_num: row.get(0)?,
                value: FunctionRecord {
                    fi: cell(row.get(1)?),
                    code: cell(row.get(2)?),
                    parent_code: cell(row.get(3)?),
                    name: cell(row.get(4)?),
                    description: cell(row.get(5)?),
                },
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("failed to read table '{FUNCTIONS_TABLE}'"))?;

    Ok(rows)
}

pub fn read_structure_store(path: &Path) -> Result<Vec<NumberedRow<StructureItem>>> {
    if !path.is_file() {
        bail!("structure store not found: {}", path.display());
    }

    let connection = open_connection(path)?;
    require_columns(&connection, STRUCTURE_TABLE, &STRUCTURE_COLUMNS)?;

    let mut statement = connection.prepare(
        "SELECT rowid, Item_ID, Parent_ID, Name, Description, Quantity, UOM
         FROM Structure ORDER BY rowid",
    )?;
    let rows = statement
        .query_map([], |row| {
            Ok(NumberedRow {
                row_num: row.get(0)?,
                value: StructureItem {
                    id: cell(row.get(1)?),
                    parent_id: cell(row.get(2)?),
                    name: cell(row.get(3)?),
                    description: cell(row.get(4)?),
                    quantity: cell(row.get(5)?),
                    uom: cell(row.get(6)?),
                },
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("failed to read table '{STRUCTURE_TABLE}'"))?;

    Ok(rows)
}

pub fn table_count(path: &Path, table: &str) -> Result<i64> {
    let connection = open_connection(path)?;
    let count = connection
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .with_context(|| format!("failed to count rows of table '{table}'"))?;
    Ok(count)
}

fn cell(value: Option<String>) -> String {
    value.unwrap_or_default().trim().to_string()
}

fn require_columns(connection: &Connection, table: &str, required: &[&str]) -> Result<()> {
    let mut statement = connection
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table '{table}'"))?;
    let present = statement
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<String>>>()?;

    if present.is_empty() {
        bail!("table '{table}' is missing from the store");
    }

    for column in required {
        if !present.iter().any(|name| name == column) {
            bail!("required column '{column}' is missing from table '{table}'");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn functions_round_trip_preserves_order_and_row_numbers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("Functions.sqlite");

        let records = vec![
            record("F1", "", "Top"),
            record("F1.1", "F1", "Child A"),
            record("F1.2", "F1", "Child B"),
        ];
        write_functions_store(&path, &records, &[]).expect("write store");

        let rows = read_functions_store(&path).expect("read store");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].row_num, 1);
        assert_eq!(rows[1].value.code, "F1.1");
        assert_eq!(rows[2].value.parent_code, "F1");
    }

    #[test]
    fn missing_required_column_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("Functions.sqlite");

        let connection = Connection::open(&path).expect("open");
        connection
            .execute_batch("CREATE TABLE Functions (Func_code TEXT, Name TEXT);")
            .expect("create");
        drop(connection);

        let err = read_functions_store(&path).expect_err("must fail");
        assert!(err.to_string().contains("FI_designator"));
    }

    #[test]
    fn missing_store_file_is_a_distinct_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = read_functions_store(&dir.path().join("absent.sqlite")).expect_err("must fail");
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn rewriting_a_store_replaces_previous_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("Structure.sqlite");

        let first = vec![StructureItem {
            id: "21.00".to_string(),
            parent_id: String::new(),
            name: "Climate".to_string(),
            description: String::new(),
            quantity: "1".to_string(),
            uom: "Н".to_string(),
        }];
        write_structure_store(&path, &first, &[]).expect("write");
        write_structure_store(&path, &first, &[]).expect("rewrite");

        assert_eq!(table_count(&path, STRUCTURE_TABLE).expect("count"), 1);
    }
}
