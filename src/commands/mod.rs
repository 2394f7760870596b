pub mod export_functions;
pub mod export_structure;
pub mod parse_functions;
pub mod parse_structure;
pub mod status;
