pub mod audit;
pub mod bulk;
pub mod config;
pub mod db;
pub mod error;
pub mod governance;
pub mod graph;
pub mod linkage;
pub mod pagination;
pub mod service;
pub mod term;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{ErrorClass, Result, ThesaurusError};
pub use graph::{canonicalize_related_pair, Relation, RelationType, Viewpoint};
pub use service::Thesaurus;
pub use term::{TenantId, Term, TermKind, TermStatus, VocabularyScope};
