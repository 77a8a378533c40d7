//! CSV exchange of relations for one vocabulary scope.

pub mod export;
pub mod import;

pub use export::{export_csv, export_rows, ExportRow};
pub use import::{import_csv, ImportMode, ImportReport, ImportRow, RowStatus};

/// UTF-8 byte order mark written ahead of exports so spreadsheet tools detect the encoding
pub const UTF8_BOM: &str = "\u{FEFF}";

pub const EXPORT_HEADER: [&str; 6] = [
    "relation_id",
    "relation_type",
    "from_term_id",
    "from_preferred_label",
    "to_term_id",
    "to_preferred_label",
];
