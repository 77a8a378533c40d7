//! Vocabulary terms: identity, scope, and the store that persists them.
//!
//! Every term lives in exactly one `(tenant, kind, vocabulary_code)` scope. Relations never
//! cross scopes, so the scope is also the unit of the hierarchy invariants enforced by
//! [`crate::graph::engine`].

mod store;

pub use store::{
    create_term, find_by_label, find_term, get_term, get_terms, list_terms, normalize_label,
    normalize_variants, update_term, validate_vocabulary_code, TermFilter,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ThesaurusError;
use crate::graph::RelationType;

/// Tenant (organization) that owns a vocabulary. Every read and write is scoped by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub Uuid);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TenantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(TenantId)
    }
}

/// Vocabulary domain a term belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermKind {
    Subject,
    Name,
    Geographic,
    Genre,
}

impl TermKind {
    pub const ALL: [TermKind; 4] = [
        TermKind::Subject,
        TermKind::Name,
        TermKind::Geographic,
        TermKind::Genre,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TermKind::Subject => "subject",
            TermKind::Name => "name",
            TermKind::Geographic => "geographic",
            TermKind::Genre => "genre",
        }
    }

    /// Name authorities are flat: they take see-also links but no hierarchy.
    pub fn supports(&self, relation_type: RelationType) -> bool {
        match (self, relation_type) {
            (TermKind::Name, RelationType::Broader) => false,
            _ => true,
        }
    }
}

impl fmt::Display for TermKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TermKind {
    type Err = ThesaurusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "subject" => Ok(TermKind::Subject),
            "name" => Ok(TermKind::Name),
            "geographic" => Ok(TermKind::Geographic),
            "genre" => Ok(TermKind::Genre),
            other => Err(ThesaurusError::InvalidInput(format!("unknown term kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermStatus {
    Active,
    Inactive,
}

impl TermStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TermStatus::Active => "active",
            TermStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for TermStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TermStatus {
    type Err = ThesaurusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(TermStatus::Active),
            "inactive" => Ok(TermStatus::Inactive),
            other => Err(ThesaurusError::InvalidInput(format!("unknown term status: {}", other))),
        }
    }
}

/// `(kind, vocabulary_code)` namespace inside a tenant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VocabularyScope {
    pub kind: TermKind,
    pub vocabulary_code: String,
}

impl VocabularyScope {
    pub fn new(kind: TermKind, vocabulary_code: impl Into<String>) -> Self {
        Self { kind, vocabulary_code: vocabulary_code.into() }
    }
}

impl fmt::Display for VocabularyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.vocabulary_code)
    }
}

/// A controlled-vocabulary entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub kind: TermKind,
    pub vocabulary_code: String,
    pub preferred_label: String,
    pub variant_labels: Vec<String>,
    pub note: Option<String>,
    pub source: Option<String>,
    pub status: TermStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Term {
    pub fn scope(&self) -> VocabularyScope {
        VocabularyScope::new(self.kind, self.vocabulary_code.clone())
    }

    pub fn is_active(&self) -> bool {
        self.status == TermStatus::Active
    }

    pub fn summary(&self) -> TermSummary {
        TermSummary {
            id: self.id,
            preferred_label: self.preferred_label.clone(),
            kind: self.kind,
            vocabulary_code: self.vocabulary_code.clone(),
            status: self.status,
        }
    }
}

/// Lightweight term reference used in listings and reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSummary {
    pub id: Uuid,
    pub preferred_label: String,
    pub kind: TermKind,
    pub vocabulary_code: String,
    pub status: TermStatus,
}

/// Input for [`create_term`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTerm {
    /// Caller-chosen id (e.g. deterministic seed ids); a v4 id is generated when absent
    #[serde(default)]
    pub id: Option<Uuid>,
    pub kind: TermKind,
    pub vocabulary_code: String,
    pub preferred_label: String,
    #[serde(default)]
    pub variant_labels: Vec<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

impl NewTerm {
    pub fn new(kind: TermKind, vocabulary_code: impl Into<String>, preferred_label: impl Into<String>) -> Self {
        Self {
            id: None,
            kind,
            vocabulary_code: vocabulary_code.into(),
            preferred_label: preferred_label.into(),
            variant_labels: Vec::new(),
            note: None,
            source: None,
        }
    }
}

/// Partial update for [`update_term`]; `None` leaves a field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TermUpdate {
    pub preferred_label: Option<String>,
    pub variant_labels: Option<Vec<String>>,
    pub note: Option<String>,
    pub source: Option<String>,
    pub status: Option<TermStatus>,
}

/// Column list matching [`term_from_row`]
pub(crate) const TERM_COLUMNS: &str = "id, tenant_id, kind, vocabulary_code, preferred_label, \
     variant_labels, note, source, status, created_at, updated_at";

pub(crate) fn term_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Term> {
    use crate::db::{parse_column, timestamp_column};

    let variants_json: String = row.get(5)?;
    let variant_labels: Vec<String> = serde_json::from_str(&variants_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Term {
        id: parse_column(row, 0)?,
        tenant_id: parse_column(row, 1)?,
        kind: parse_column(row, 2)?,
        vocabulary_code: row.get(3)?,
        preferred_label: row.get(4)?,
        variant_labels,
        note: row.get(6)?,
        source: row.get(7)?,
        status: parse_column(row, 8)?,
        created_at: timestamp_column(row, 9)?,
        updated_at: timestamp_column(row, 10)?,
    })
}
