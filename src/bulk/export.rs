use rusqlite::{params, Connection};
use serde::Serialize;
use uuid::Uuid;

use super::{EXPORT_HEADER, UTF8_BOM};
use crate::error::{Result, ThesaurusError};
use crate::graph::RelationType;
use crate::term::{TenantId, VocabularyScope};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    pub relation_id: Uuid,
    pub relation_type: RelationType,
    pub from_term_id: Uuid,
    pub from_preferred_label: String,
    pub to_term_id: Uuid,
    pub to_preferred_label: String,
}

/// Relations of a scope ordered by type, then endpoint labels, then id
pub fn export_rows(conn: &Connection, tenant: TenantId, scope: &VocabularyScope) -> Result<Vec<ExportRow>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT r.id, r.relation_type, r.from_term_id, f.preferred_label, r.to_term_id, t.preferred_label
        FROM authority_relations r
        JOIN authority_terms f ON f.tenant_id = r.tenant_id AND f.id = r.from_term_id
        JOIN authority_terms t ON t.tenant_id = r.tenant_id AND t.id = r.to_term_id
        WHERE r.tenant_id = ?1 AND f.kind = ?2 AND f.vocabulary_code = ?3
        ORDER BY r.relation_type, f.preferred_label, t.preferred_label, r.id
        "#,
    )?;
    let rows = stmt
        .query_map(
            params![tenant.to_string(), scope.kind.as_str(), scope.vocabulary_code],
            |row| {
                Ok(ExportRow {
                    relation_id: crate::db::parse_column(row, 0)?,
                    relation_type: crate::db::parse_column(row, 1)?,
                    from_term_id: crate::db::parse_column(row, 2)?,
                    from_preferred_label: row.get(3)?,
                    to_term_id: crate::db::parse_column(row, 4)?,
                    to_preferred_label: row.get(5)?,
                })
            },
        )?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(rows)
}

/// Serialize rows as BOM-prefixed CSV with `\n` record terminators
pub fn write_csv(rows: &[ExportRow]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(UTF8_BOM.as_bytes().to_vec());

    writer.write_record(EXPORT_HEADER)?;
    for row in rows {
        writer.write_record([
            row.relation_id.to_string().as_str(),
            row.relation_type.as_str(),
            row.from_term_id.to_string().as_str(),
            row.from_preferred_label.as_str(),
            row.to_term_id.to_string().as_str(),
            row.to_preferred_label.as_str(),
        ])?;
    }

    writer.into_inner().map_err(|e| ThesaurusError::Io(e.into_error()))
}

pub fn export_csv(conn: &Connection, tenant: TenantId, scope: &VocabularyScope) -> Result<Vec<u8>> {
    let rows = export_rows(conn, tenant, scope)?;
    log::debug!("Exporting {} relations for {}", rows.len(), scope);
    write_csv(&rows)
}
