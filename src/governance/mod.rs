//! Vocabulary maintenance: quality reports and term merge.

pub mod merge;
pub mod reports;

pub use merge::{merge, MergeMode, MergeOptions, MergeResult, MergeSummary};
pub use reports::{report, ReportEntry, ReportKind};
