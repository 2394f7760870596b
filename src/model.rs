use serde::{Deserialize, Serialize};

/// One extracted function line. Unique key: `code`. The parent is assigned by
/// hierarchy inference, the description by duplicate consolidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub fi: String,
    pub code: String,
    pub parent_code: String,
    pub name: String,
    pub description: String,
}

/// One structure node synthesized from a (system, subsystem, name) row.
/// `id` is `"{system}.{subsystem}"`; roots carry an empty `parent_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureItem {
    pub id: String,
    pub parent_id: String,
    pub name: String,
    pub description: String,
    pub quantity: String,
    pub uom: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseCounts {
    pub lines_matched: usize,
    pub records_kept: usize,
    pub records_consolidated: usize,
    pub duplicates_merged: usize,
    pub roots: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub command: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub source_path: String,
    pub source_sha256: String,
    pub store_path: String,
    pub counts: ParseCounts,
    pub warnings: Vec<String>,
}
