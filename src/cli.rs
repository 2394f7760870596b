use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "plm-import",
    version,
    about = "Function and structure tree import tooling for PLM exchange"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract function records from a source document into the functions store.
    ParseFunctions(ParseFunctionsArgs),
    /// Extract system/subsystem rows from a source table into the structure store.
    ParseStructure(ParseStructureArgs),
    /// Validate the functions store and emit nested Function XML.
    ExportFunctions(ExportFunctionsArgs),
    /// Validate the structure store and emit nested Cube XML.
    ExportStructure(ExportStructureArgs),
    Status(StatusArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum FunctionMode {
    /// Top-level function instances; hierarchy inferred from the code.
    Fi,
    /// Per-system function lists; always flat.
    Fs,
}

impl FunctionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fi => "fi",
            Self::Fs => "fs",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ParseFunctionsArgs {
    /// Source document (.txt, .docx, .pdf, .xlsx, .xls).
    pub input: PathBuf,

    /// Functional-instance designator written to every record.
    #[arg(long)]
    pub fi: String,

    #[arg(long, default_value = "out/Functions.sqlite")]
    pub out: PathBuf,

    #[arg(long, value_enum, default_value_t = FunctionMode::Fi)]
    pub mode: FunctionMode,

    /// Maximum code depth (F1.2.3 = 3). 0 = unlimited.
    #[arg(long, default_value_t = 0)]
    pub max_depth: usize,

    /// Single code letter to keep (F or Ф); unset keeps both alphabets.
    #[arg(long)]
    pub code_letter: Option<char>,

    /// Keep only codes whose first numeric group is >= this value.
    #[arg(long)]
    pub min_first_group: Option<u32>,

    /// Directory for run manifests; defaults to <out dir>/manifests.
    #[arg(long)]
    pub manifest_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ParseStructureArgs {
    /// Source table (.pdf, .xlsx, .xls).
    pub input: PathBuf,

    #[arg(long, default_value = "out/Structure.sqlite")]
    pub out: PathBuf,

    /// Directory for run manifests; defaults to <out dir>/manifests.
    #[arg(long)]
    pub manifest_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ExportFunctionsArgs {
    #[arg(long, default_value = "out/Functions.sqlite")]
    pub input: PathBuf,

    #[arg(long, default_value = "out/functions_output.xml")]
    pub out: PathBuf,

    /// Overrides the stored FI designator on every root element.
    #[arg(long)]
    pub target_fi: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ExportStructureArgs {
    #[arg(long, default_value = "out/Structure.sqlite")]
    pub input: PathBuf,

    #[arg(long, default_value = "out/structure_output.xml")]
    pub out: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = "out")]
    pub out_dir: PathBuf,
}
