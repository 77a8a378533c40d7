//! Data-quality reports over one vocabulary scope.
//!
//! Reports only list active terms; deactivated (merged) terms are expected to be
//! disconnected and would drown the signal.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, ThesaurusError};
use crate::linkage::BibLinkage;
use crate::pagination::{Cursor, CursorKind, Page, PageRequest};
use crate::term::{TenantId, TermStatus, VocabularyScope};

/// Candidate rows pulled per round while filtering by usage
const USAGE_SCAN_BATCH: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// No broader, narrower, or related edges
    Orphans,
    /// More than one broader edge
    MultiBroader,
    /// Connected in the graph but referenced by no bibliographic record
    UnusedWithRelations,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Orphans => "orphans",
            ReportKind::MultiBroader => "multi_broader",
            ReportKind::UnusedWithRelations => "unused_with_relations",
        }
    }

    fn filter_sql(&self) -> &'static str {
        match self {
            ReportKind::Orphans => "broader_count = 0 AND narrower_count = 0 AND related_count = 0",
            ReportKind::MultiBroader => "broader_count > 1",
            ReportKind::UnusedWithRelations => "broader_count + narrower_count + related_count > 0",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportKind {
    type Err = ThesaurusError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "orphans" => Ok(ReportKind::Orphans),
            "multi_broader" => Ok(ReportKind::MultiBroader),
            "unused_with_relations" => Ok(ReportKind::UnusedWithRelations),
            other => Err(ThesaurusError::InvalidInput(format!("unknown report: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub id: Uuid,
    pub preferred_label: String,
    pub status: TermStatus,
    pub broader_count: i64,
    pub narrower_count: i64,
    pub related_count: i64,
    /// Only filled in by the usage report
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_count: Option<i64>,
}

const ENTRY_SQL: &str = r#"
    SELECT id, preferred_label, status, broader_count, narrower_count, related_count FROM (
        SELECT t.id AS id, t.preferred_label AS preferred_label, t.status AS status,
            (SELECT COUNT(*) FROM authority_relations r
             WHERE r.tenant_id = t.tenant_id AND r.relation_type = 'broader' AND r.from_term_id = t.id) AS broader_count,
            (SELECT COUNT(*) FROM authority_relations r
             WHERE r.tenant_id = t.tenant_id AND r.relation_type = 'broader' AND r.to_term_id = t.id) AS narrower_count,
            (SELECT COUNT(*) FROM authority_relations r
             WHERE r.tenant_id = t.tenant_id AND r.relation_type = 'related'
               AND (r.from_term_id = t.id OR r.to_term_id = t.id)) AS related_count
        FROM authority_terms t
        WHERE t.tenant_id = ? AND t.kind = ? AND t.vocabulary_code = ? AND t.status = 'active'
    )
"#;

fn fetch_entries(
    conn: &Connection,
    tenant: TenantId,
    scope: &VocabularyScope,
    kind: ReportKind,
    after: Option<&Cursor>,
    limit: usize,
) -> Result<Vec<ReportEntry>> {
    let mut sql = format!("{} WHERE {}", ENTRY_SQL, kind.filter_sql());
    let mut values = vec![tenant.to_string(), scope.kind.as_str().to_string(), scope.vocabulary_code.clone()];
    if let Some(cursor) = after {
        sql.push_str(" AND (preferred_label > ? OR (preferred_label = ? AND id > ?))");
        values.push(cursor.sort_key.clone());
        values.push(cursor.sort_key.clone());
        values.push(cursor.id.to_string());
    }
    sql.push_str(&format!(" ORDER BY preferred_label, id LIMIT {}", limit));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(values), |row| {
            Ok(ReportEntry {
                id: crate::db::parse_column(row, 0)?,
                preferred_label: row.get(1)?,
                status: crate::db::parse_column(row, 2)?,
                broader_count: row.get(3)?,
                narrower_count: row.get(4)?,
                related_count: row.get(5)?,
                usage_count: None,
            })
        })?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(rows)
}

fn entry_cursor(entry: &ReportEntry) -> Cursor {
    Cursor::label(entry.preferred_label.clone(), entry.id)
}

/// One page of a quality report, ordered by `(preferred_label, id)`
pub fn report(
    conn: &Connection,
    tenant: TenantId,
    scope: &VocabularyScope,
    kind: ReportKind,
    page: &PageRequest,
    linkage: &dyn BibLinkage,
) -> Result<Page<ReportEntry>> {
    let cursor = page.decode_cursor(CursorKind::Label)?;

    if kind != ReportKind::UnusedWithRelations {
        let rows = fetch_entries(conn, tenant, scope, kind, cursor.as_ref(), page.limit + 1)?;
        return Ok(Page::from_overfetch(rows, page.limit, entry_cursor));
    }

    // Usage lives behind the linkage collaborator, so filter in rounds
    let mut after = cursor;
    let mut unused = Vec::new();
    'scan: loop {
        let batch = fetch_entries(conn, tenant, scope, kind, after.as_ref(), USAGE_SCAN_BATCH)?;
        let exhausted = batch.len() < USAGE_SCAN_BATCH;
        for mut entry in batch {
            after = Some(entry_cursor(&entry));
            let usage = linkage.usage_count(conn, tenant, entry.id)?;
            if usage == 0 {
                entry.usage_count = Some(0);
                unused.push(entry);
                if unused.len() > page.limit {
                    break 'scan;
                }
            }
        }
        if exhausted {
            break;
        }
    }

    Ok(Page::from_overfetch(unused, page.limit, entry_cursor))
}
