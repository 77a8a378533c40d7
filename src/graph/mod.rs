//! Relation graph: stored edge model, mutation engine, and bounded traversal.
//!
//! Edges are stored in one canonical direction. A `broader` row points from the narrower
//! term to the broader one; a `related` row always has `from_term_id < to_term_id`.
//! Callers speak in viewpoints (`broader`, `narrower`, `related`) and [`to_canonical`]
//! translates them.

pub mod arena;
pub mod engine;
pub mod traversal;

pub use engine::{add_relation, delete_relation, relations_for_term, TermRelation};
pub use traversal::{
    ancestors, children, expand, graph, roots, AncestorPath, AncestorsResult, Direction,
    ExpandInclude, ExpandResult, GraphEdge, GraphResult, HierarchyNode,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ThesaurusError;
use crate::term::TenantId;

/// Stored relation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Broader,
    Related,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Broader => "broader",
            RelationType::Related => "related",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = ThesaurusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "broader" => Ok(RelationType::Broader),
            "related" => Ok(RelationType::Related),
            other => Err(ThesaurusError::InvalidInput(format!(
                "relation_type must be broader or related, got: {}",
                other
            ))),
        }
    }
}

/// Direction of a relation as seen from one of its endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Viewpoint {
    /// The other term is broader than this one (BT)
    Broader,
    /// The other term is narrower than this one (NT)
    Narrower,
    /// See-also (RT)
    Related,
}

impl Viewpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Viewpoint::Broader => "broader",
            Viewpoint::Narrower => "narrower",
            Viewpoint::Related => "related",
        }
    }
}

impl fmt::Display for Viewpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Viewpoint {
    type Err = ThesaurusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "broader" | "bt" => Ok(Viewpoint::Broader),
            "narrower" | "nt" => Ok(Viewpoint::Narrower),
            "related" | "rt" => Ok(Viewpoint::Related),
            other => Err(ThesaurusError::InvalidInput(format!("unknown relation viewpoint: {}", other))),
        }
    }
}

/// A stored edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub from_term_id: Uuid,
    pub relation_type: RelationType,
    pub to_term_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relation {
    /// The endpoint opposite `term_id`, if `term_id` is an endpoint at all
    pub fn other_endpoint(&self, term_id: Uuid) -> Option<Uuid> {
        if self.from_term_id == term_id {
            Some(self.to_term_id)
        } else if self.to_term_id == term_id {
            Some(self.from_term_id)
        } else {
            None
        }
    }
}

/// An edge in stored direction, before it has an id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CanonicalEdge {
    pub from: Uuid,
    pub relation_type: RelationType,
    pub to: Uuid,
}

impl CanonicalEdge {
    /// Build an edge in stored form; `related` pairs are ordered
    pub fn new(from: Uuid, relation_type: RelationType, to: Uuid) -> Self {
        match relation_type {
            RelationType::Broader => Self { from, relation_type, to },
            RelationType::Related => {
                let (from, to) = canonicalize_related_pair(from, to);
                Self { from, relation_type, to }
            }
        }
    }
}

/// Order a `related` pair so that `(a, b)` and `(b, a)` map to the same row
pub fn canonicalize_related_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Translate "`target` is `viewpoint` of `term`" into the stored edge
pub fn to_canonical(term: Uuid, viewpoint: Viewpoint, target: Uuid) -> CanonicalEdge {
    match viewpoint {
        Viewpoint::Broader => CanonicalEdge::new(term, RelationType::Broader, target),
        Viewpoint::Narrower => CanonicalEdge::new(target, RelationType::Broader, term),
        Viewpoint::Related => CanonicalEdge::new(term, RelationType::Related, target),
    }
}

/// Inverse of [`to_canonical`]: how a stored edge looks from one endpoint
pub fn viewpoint_of(relation_type: RelationType, from: Uuid, term: Uuid) -> Viewpoint {
    match relation_type {
        RelationType::Related => Viewpoint::Related,
        RelationType::Broader if from == term => Viewpoint::Broader,
        RelationType::Broader => Viewpoint::Narrower,
    }
}

pub(crate) const RELATION_COLUMNS: &str =
    "id, tenant_id, from_term_id, relation_type, to_term_id, created_at, updated_at";

pub(crate) fn relation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Relation> {
    use crate::db::{parse_column, timestamp_column};

    Ok(Relation {
        id: parse_column(row, 0)?,
        tenant_id: parse_column(row, 1)?,
        from_term_id: parse_column(row, 2)?,
        relation_type: parse_column(row, 3)?,
        to_term_id: parse_column(row, 4)?,
        created_at: timestamp_column(row, 5)?,
        updated_at: timestamp_column(row, 6)?,
    })
}
