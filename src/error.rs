use thiserror::Error;
use uuid::Uuid;

/// Main error type for the thesaurus engine
#[derive(Error, Debug)]
pub enum ThesaurusError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reader/writer errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed caller input (bad id, empty label, missing CSV column)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Pagination cursor could not be decoded
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// A term cannot relate to itself
    #[error("Term {0} cannot be related to itself")]
    SelfRelation(Uuid),

    /// Term absent or outside the tenant
    #[error("Term not found: {0}")]
    TermNotFound(Uuid),

    /// Relation absent, outside the tenant, or not touching the given term
    #[error("Relation not found: {0}")]
    RelationNotFound(Uuid),

    /// Endpoints belong to different kinds
    #[error("Kind mismatch: {from} vs {to}")]
    KindMismatch { from: String, to: String },

    /// Endpoints belong to different vocabularies
    #[error("Vocabulary mismatch: {from} vs {to}")]
    VocabularyMismatch { from: String, to: String },

    /// The relation type is not allowed for terms of this kind
    #[error("Relation type {relation_type} is not supported for {kind} terms")]
    UnsupportedRelationType { kind: String, relation_type: String },

    /// Inserting the broader edge would close a cycle
    #[error("Adding {child} broader {parent} would create a cycle")]
    WouldCreateCycle { child: Uuid, parent: Uuid },

    /// The canonical relation row already exists
    #[error("Relation already exists: {from} {relation_type} {to}")]
    DuplicateRelation {
        from: Uuid,
        relation_type: String,
        to: Uuid,
    },

    /// Another term already uses this preferred label in the same scope
    #[error("Term already exists: {0}")]
    DuplicateTerm(String),
}

/// Coarse error taxonomy used by callers to decide how to respond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller must fix the input; never retried
    Validation,
    /// Domain rule rejected the change; nothing was written
    Conflict,
    /// Target missing or outside tenant scope
    NotFound,
    /// Storage or environment failure
    Internal,
}

impl ThesaurusError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ThesaurusError::InvalidInput(_)
            | ThesaurusError::InvalidCursor(_)
            | ThesaurusError::SelfRelation(_)
            | ThesaurusError::Csv(_) => ErrorClass::Validation,
            ThesaurusError::KindMismatch { .. }
            | ThesaurusError::VocabularyMismatch { .. }
            | ThesaurusError::UnsupportedRelationType { .. }
            | ThesaurusError::WouldCreateCycle { .. }
            | ThesaurusError::DuplicateRelation { .. }
            | ThesaurusError::DuplicateTerm(_) => ErrorClass::Conflict,
            ThesaurusError::TermNotFound(_) | ThesaurusError::RelationNotFound(_) => {
                ErrorClass::NotFound
            }
            ThesaurusError::Database(_)
            | ThesaurusError::Io(_)
            | ThesaurusError::Serialization(_)
            | ThesaurusError::Config(_) => ErrorClass::Internal,
        }
    }

    /// HTTP-equivalent status for the error class.
    pub fn status_code(&self) -> u16 {
        match self.class() {
            ErrorClass::Validation => 400,
            ErrorClass::NotFound => 404,
            ErrorClass::Conflict => 409,
            ErrorClass::Internal => 500,
        }
    }
}

/// True when the error is SQLite rejecting a row on a UNIQUE index.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Convenient Result type using ThesaurusError
pub type Result<T> = std::result::Result<T, ThesaurusError>;
