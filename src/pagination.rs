//! Opaque keyset cursors.
//!
//! A cursor is URL-safe base64 over a small JSON object holding the sort key and the
//! row id of the last item on the previous page. Hierarchy browsing and reports sort by
//! `(preferred_label ASC, id ASC)`; CRUD listings sort by `(created_at DESC, id DESC)`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, ThesaurusError};

/// Which ordering a cursor belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorKind {
    /// `(preferred_label, id)` ascending
    Label,
    /// `(created_at, id)` descending
    CreatedAt,
}

/// Decoded keyset position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(rename = "f")]
    pub kind: CursorKind,
    #[serde(rename = "k")]
    pub sort_key: String,
    pub id: Uuid,
}

impl Cursor {
    pub fn label(label: impl Into<String>, id: Uuid) -> Self {
        Self { kind: CursorKind::Label, sort_key: label.into(), id }
    }

    pub fn created_at(created_at: impl Into<String>, id: Uuid) -> Self {
        Self { kind: CursorKind::CreatedAt, sort_key: created_at.into(), id }
    }

    pub fn encode(&self) -> String {
        // Serializing a struct of strings and a UUID cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a token, rejecting tokens minted for a different ordering
    pub fn decode(token: &str, expected: CursorKind) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| ThesaurusError::InvalidCursor(format!("not base64: {}", e)))?;
        let cursor: Cursor = serde_json::from_slice(&bytes)
            .map_err(|e| ThesaurusError::InvalidCursor(format!("bad payload: {}", e)))?;
        if cursor.kind != expected {
            return Err(ThesaurusError::InvalidCursor(format!(
                "cursor is for {:?} ordering, expected {:?}",
                cursor.kind, expected
            )));
        }
        Ok(cursor)
    }
}

/// Page size and optional resume token
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub limit: usize,
    pub cursor: Option<String>,
}

impl PageRequest {
    pub fn new(limit: usize, cursor: Option<String>) -> Self {
        Self { limit: limit.max(1), cursor }
    }

    pub fn first(limit: usize) -> Self {
        Self::new(limit, None)
    }

    /// Decode the resume token, if any
    pub fn decode_cursor(&self, expected: CursorKind) -> Result<Option<Cursor>> {
        self.cursor
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(|t| Cursor::decode(t, expected))
            .transpose()
    }

    /// Row count to fetch: one extra row tells whether another page exists
    pub fn fetch_limit(&self) -> i64 {
        (self.limit + 1) as i64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(50)
    }
}

/// One page of results
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Build a page from rows fetched with `PageRequest::fetch_limit`
    pub fn from_overfetch(mut rows: Vec<T>, limit: usize, cursor_of: impl Fn(&T) -> Cursor) -> Self {
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = if has_more {
            rows.last().map(|last| cursor_of(last).encode())
        } else {
            None
        };
        Self { items: rows, next_cursor }
    }
}
