//! Batch relation import from CSV.
//!
//! Rows go through syntactic checks, then scope checks against the stored terms, then
//! the engine's insert path inside a single IMMEDIATE transaction, so later rows see
//! the edges staged by earlier ones. Bad rows are reported per row rather than failing
//! the batch; `Apply` only commits a batch with no bad rows.

use std::collections::HashMap;
use std::str::FromStr;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::UTF8_BOM;
use crate::audit::{AuditRecord, AuditSink};
use crate::db::immediate_transaction;
use crate::error::{ErrorClass, Result, ThesaurusError};
use crate::graph::engine::insert_edge;
use crate::graph::{CanonicalEdge, RelationType};
use crate::term::{get_terms, TenantId, Term, VocabularyScope};

const REQUIRED_COLUMNS: [&str; 3] = ["from_term_id", "to_term_id", "relation_type"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    Preview,
    Apply,
}

impl FromStr for ImportMode {
    type Err = ThesaurusError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preview" => Ok(ImportMode::Preview),
            "apply" => Ok(ImportMode::Apply),
            other => Err(ThesaurusError::InvalidInput(format!("mode must be preview or apply, got: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Create,
    SkipExisting,
    Error,
}

/// Outcome for one data row. Ids are shown in canonical (stored) order.
#[derive(Debug, Clone, Serialize)]
pub struct ImportRow {
    /// 1-based data row number, header excluded
    pub row: usize,
    pub from_term_id: Option<Uuid>,
    pub relation_type: Option<RelationType>,
    pub to_term_id: Option<Uuid>,
    pub status: RowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ImportRow {
    fn error(row: usize, reason: impl Into<String>) -> Self {
        Self {
            row,
            from_term_id: None,
            relation_type: None,
            to_term_id: None,
            status: RowStatus::Error,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub mode: ImportMode,
    pub scope: VocabularyScope,
    pub total_rows: usize,
    pub create_count: usize,
    pub skip_existing_count: usize,
    pub error_count: usize,
    /// True when the batch was committed
    pub applied: bool,
    /// SHA-256 of the uploaded bytes
    pub source_sha256: String,
    pub rows: Vec<ImportRow>,
}

/// Syntactically valid row awaiting scope checks
struct ParsedRow {
    row: usize,
    edge: CanonicalEdge,
}

/// Column positions for the required fields
struct Columns {
    from: usize,
    to: usize,
    relation_type: usize,
}

fn locate_columns(headers: &csv::StringRecord) -> Result<Columns> {
    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim().trim_start_matches(UTF8_BOM).eq_ignore_ascii_case(name))
    };

    let missing: Vec<&str> = REQUIRED_COLUMNS.iter().copied().filter(|c| position(*c).is_none()).collect();
    match (position("from_term_id"), position("to_term_id"), position("relation_type")) {
        (Some(from), Some(to), Some(relation_type)) => Ok(Columns { from, to, relation_type }),
        _ => Err(ThesaurusError::InvalidInput(format!("missing required CSV column(s): {}", missing.join(", ")))),
    }
}

fn parse_record(row: usize, record: &csv::StringRecord, columns: &Columns) -> std::result::Result<ParsedRow, String> {
    let field = |idx: usize, name: &str| -> std::result::Result<String, String> {
        match record.get(idx).map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => Err(format!("{} is empty", name)),
        }
    };

    let from_raw = field(columns.from, "from_term_id")?;
    let to_raw = field(columns.to, "to_term_id")?;
    let type_raw = field(columns.relation_type, "relation_type")?;

    let from = Uuid::parse_str(&from_raw).map_err(|_| format!("from_term_id is not a UUID: {}", from_raw))?;
    let to = Uuid::parse_str(&to_raw).map_err(|_| format!("to_term_id is not a UUID: {}", to_raw))?;
    let relation_type = RelationType::from_str(&type_raw).map_err(|e| e.to_string())?;
    if from == to {
        return Err("from_term_id and to_term_id are the same term".to_string());
    }

    Ok(ParsedRow { row, edge: CanonicalEdge::new(from, relation_type, to) })
}

fn check_scope(term: Option<&Term>, id: Uuid, scope: &VocabularyScope, relation_type: RelationType) -> std::result::Result<(), String> {
    let Some(term) = term else {
        return Err(format!("term {} not found", id));
    };
    if term.kind != scope.kind || term.vocabulary_code != scope.vocabulary_code {
        return Err(format!("term {} belongs to {}, not {}", id, term.scope(), scope));
    }
    if !term.kind.supports(relation_type) {
        return Err(format!("{} relations are not supported for {} terms", relation_type, term.kind));
    }
    Ok(())
}

/// Import relations into `scope` from CSV bytes.
///
/// Missing required columns reject the whole batch; every other problem becomes an
/// `error` row. `Preview` always rolls back.
pub fn import_csv(
    conn: &mut Connection,
    tenant: TenantId,
    scope: &VocabularyScope,
    data: &[u8],
    mode: ImportMode,
    audit: &dyn AuditSink,
) -> Result<ImportReport> {
    let source_sha256 = format!("{:x}", Sha256::digest(data));
    let body = data.strip_prefix(UTF8_BOM.as_bytes()).unwrap_or(data);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body);
    let columns = locate_columns(reader.headers()?)?;

    // Syntactic pass
    let mut rows: Vec<ImportRow> = Vec::new();
    let mut parsed: Vec<ParsedRow> = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let row = idx + 1;
        let outcome = record
            .map_err(|e| format!("unreadable CSV record: {}", e))
            .and_then(|record| parse_record(row, &record, &columns));
        match outcome {
            Ok(p) => parsed.push(p),
            Err(reason) => rows.push(ImportRow::error(row, reason)),
        }
    }
    let total_rows = rows.len() + parsed.len();

    let tx = immediate_transaction(conn)?;

    // Scope pass
    let ids: Vec<Uuid> = parsed.iter().flat_map(|p| [p.edge.from, p.edge.to]).collect();
    let terms: HashMap<Uuid, Term> = get_terms(&tx, tenant, &ids)?;

    let mut create_count = 0;
    let mut skip_existing_count = 0;
    for p in parsed {
        let CanonicalEdge { from, relation_type, to } = p.edge;
        let mut result = ImportRow {
            row: p.row,
            from_term_id: Some(from),
            relation_type: Some(relation_type),
            to_term_id: Some(to),
            status: RowStatus::Error,
            reason: None,
        };

        let scoped = check_scope(terms.get(&from), from, scope, relation_type)
            .and_then(|_| check_scope(terms.get(&to), to, scope, relation_type));
        if let Err(reason) = scoped {
            result.reason = Some(reason);
            rows.push(result);
            continue;
        }
        let (Some(from_term), Some(to_term)) = (terms.get(&from), terms.get(&to)) else { continue };

        match insert_edge(&tx, tenant, from_term, relation_type, to_term) {
            Ok(_) => {
                result.status = RowStatus::Create;
                create_count += 1;
            }
            Err(ThesaurusError::DuplicateRelation { .. }) => {
                result.status = RowStatus::SkipExisting;
                skip_existing_count += 1;
            }
            Err(e) if e.class() != ErrorClass::Internal => {
                log::debug!("Import row {} rejected: {}", p.row, e);
                result.reason = Some(e.to_string());
            }
            Err(e) => return Err(e),
        }
        rows.push(result);
    }

    rows.sort_by_key(|r| r.row);
    let error_count = rows.iter().filter(|r| r.status == RowStatus::Error).count();

    let mut report = ImportReport {
        mode,
        scope: scope.clone(),
        total_rows,
        create_count,
        skip_existing_count,
        error_count,
        applied: false,
        source_sha256,
        rows,
    };

    if mode == ImportMode::Apply && error_count == 0 {
        let metadata = serde_json::json!({
            "scope": scope.to_string(),
            "source_sha256": report.source_sha256,
            "total_rows": total_rows,
            "create_count": create_count,
            "skip_existing_count": skip_existing_count,
        });
        audit.record(
            &tx,
            tenant,
            &AuditRecord::new("authority_relation.import", "vocabulary", scope.to_string(), metadata),
        )?;
        tx.commit()?;
        report.applied = true;
        log::info!(
            "Imported relations into {}: {} created, {} already present",
            scope,
            create_count,
            skip_existing_count
        );
    } else {
        tx.rollback()?;
        if mode == ImportMode::Apply {
            log::warn!("Import into {} not applied: {} row(s) with errors", scope, error_count);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{events_for, SqliteAuditSink};
    use crate::bulk::export_csv;
    use crate::term::TermKind;
    use crate::test_support::{link_broader, memory_db, relation_count, subject, tenant, term_in};

    fn lcsh() -> VocabularyScope {
        VocabularyScope::new(TermKind::Subject, "lcsh")
    }

    fn csv_of(rows: &[(Uuid, &str, Uuid)]) -> Vec<u8> {
        let mut out = String::from("from_term_id,relation_type,to_term_id,note\n");
        for (from, relation_type, to) in rows {
            out.push_str(&format!("{},{},{},ignored\n", from, relation_type, to));
        }
        out.into_bytes()
    }

    #[test]
    fn test_apply_then_reapply_is_idempotent() {
        let mut conn = memory_db();
        let t = tenant();
        let a = subject(&conn, t, "A");
        let b = subject(&conn, t, "B");
        let c = subject(&conn, t, "C");
        let data = csv_of(&[(a.id, "broader", b.id), (b.id, "broader", c.id), (c.id, "related", a.id)]);

        let first = import_csv(&mut conn, t, &lcsh(), &data, ImportMode::Apply, &SqliteAuditSink).unwrap();
        assert!(first.applied);
        assert_eq!((first.total_rows, first.create_count, first.error_count), (3, 3, 0));
        assert_eq!(relation_count(&conn, t), 3);

        let second = import_csv(&mut conn, t, &lcsh(), &data, ImportMode::Apply, &SqliteAuditSink).unwrap();
        assert_eq!(second.create_count, 0);
        assert_eq!(second.skip_existing_count, second.total_rows);
        assert_eq!(relation_count(&conn, t), 3);

        let events = events_for(&conn, t, "vocabulary", "subject:lcsh").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1["source_sha256"], first.source_sha256.as_str());
    }

    #[test]
    fn test_preview_rolls_back() {
        let mut conn = memory_db();
        let t = tenant();
        let a = subject(&conn, t, "A");
        let b = subject(&conn, t, "B");
        let data = csv_of(&[(a.id, "broader", b.id)]);

        let report = import_csv(&mut conn, t, &lcsh(), &data, ImportMode::Preview, &SqliteAuditSink).unwrap();
        assert_eq!(report.create_count, 1);
        assert!(!report.applied);
        assert_eq!(relation_count(&conn, t), 0);
    }

    #[test]
    fn test_row_errors_block_apply() {
        let mut conn = memory_db();
        let t = tenant();
        let a = subject(&conn, t, "A");
        let b = subject(&conn, t, "B");
        let c = subject(&conn, t, "C");
        let foreign = term_in(&conn, t, TermKind::Subject, "local", "Elsewhere");
        let mut data = csv_of(&[
            (a.id, "broader", b.id),
            (b.id, "broader", c.id),
            (c.id, "broader", a.id),
            (a.id, "related", foreign.id),
            (a.id, "narrower", b.id),
            (a.id, "broader", a.id),
            (Uuid::new_v4(), "related", a.id),
            (b.id, "related", a.id),
            (a.id, "related", b.id),
        ]);
        data.extend_from_slice(b"not-a-uuid,broader,x,\n");

        let report = import_csv(&mut conn, t, &lcsh(), &data, ImportMode::Apply, &SqliteAuditSink).unwrap();
        let statuses: Vec<RowStatus> = report.rows.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                RowStatus::Create,
                RowStatus::Create,
                RowStatus::Error, // cycle against rows 1 and 2 of this batch
                RowStatus::Error, // wrong vocabulary
                RowStatus::Error, // narrower is not a stored type
                RowStatus::Error, // self relation
                RowStatus::Error, // unknown term
                RowStatus::Create,
                RowStatus::SkipExisting, // same pair as row 8 once canonicalized
                RowStatus::Error,
            ]
        );
        assert_eq!(report.total_rows, 10);
        assert_eq!(report.error_count, 6);
        assert!(!report.applied);
        assert_eq!(relation_count(&conn, t), 0);
        assert!(report.rows[2].reason.as_deref().unwrap().contains("cycle"));
    }

    #[test]
    fn test_cycle_against_committed_edges() {
        let mut conn = memory_db();
        let t = tenant();
        let a = subject(&conn, t, "A");
        let b = subject(&conn, t, "B");
        link_broader(&conn, t, &a, &b);

        let data = csv_of(&[(b.id, "broader", a.id)]);
        let report = import_csv(&mut conn, t, &lcsh(), &data, ImportMode::Preview, &SqliteAuditSink).unwrap();
        assert_eq!(report.error_count, 1);
    }

    #[test]
    fn test_headers_bom_and_case_tolerated() {
        let mut conn = memory_db();
        let t = tenant();
        let a = subject(&conn, t, "A");
        let b = subject(&conn, t, "B");
        let text = format!("\u{FEFF} From_Term_ID , RELATION_TYPE,to_term_id\n{},Broader,{}\n", a.id, b.id);

        let report = import_csv(&mut conn, t, &lcsh(), text.as_bytes(), ImportMode::Apply, &SqliteAuditSink).unwrap();
        assert_eq!(report.create_count, 1);
        assert!(report.applied);
    }

    #[test]
    fn test_missing_columns_rejects_batch() {
        let mut conn = memory_db();
        let err = import_csv(
            &mut conn,
            tenant(),
            &lcsh(),
            b"from_term_id,relation_type\n",
            ImportMode::Preview,
            &SqliteAuditSink,
        )
        .unwrap_err();
        assert!(matches!(err, ThesaurusError::InvalidInput(msg) if msg.contains("to_term_id")));
    }

    #[test]
    fn test_export_round_trips_through_import() {
        let mut conn = memory_db();
        let t = tenant();
        let a = subject(&conn, t, "A");
        let b = subject(&conn, t, "B");
        link_broader(&conn, t, &a, &b);

        let exported = export_csv(&conn, t, &lcsh()).unwrap();
        let report = import_csv(&mut conn, t, &lcsh(), &exported, ImportMode::Preview, &SqliteAuditSink).unwrap();
        assert_eq!(report.total_rows, 1);
        assert_eq!(report.skip_existing_count, 1);
    }
}
