//! Audit trail for committed bulk mutations.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::term::TenantId;

/// One audit event. `metadata` carries the operation summary.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub metadata: serde_json::Value,
}

impl AuditRecord {
    pub fn new(
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            metadata,
        }
    }
}

/// Where mutating operations report what they did. Called inside the caller's
/// transaction, so a failed write aborts the mutation too.
pub trait AuditSink: Send + Sync {
    fn record(&self, conn: &Connection, tenant: TenantId, record: &AuditRecord) -> Result<()>;
}

/// Writes to the `audit_events` table
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteAuditSink;

impl AuditSink for SqliteAuditSink {
    fn record(&self, conn: &Connection, tenant: TenantId, record: &AuditRecord) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        let timestamp = crate::db::format_timestamp(Utc::now());
        let metadata_json = serde_json::to_string(&record.metadata)?;

        conn.execute(
            r#"
            INSERT INTO audit_events (
                id, tenant_id, action, entity_type, entity_id, metadata_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                id,
                tenant.to_string(),
                record.action,
                record.entity_type,
                record.entity_id,
                metadata_json,
                timestamp,
            ],
        )?;
        log::debug!("Audit {} {} {}", record.action, record.entity_type, record.entity_id);
        Ok(())
    }
}

/// Stored audit events for one entity, oldest first, as `(action, metadata)`
pub fn events_for(
    conn: &Connection,
    tenant: TenantId,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<(String, serde_json::Value)>> {
    let mut stmt = conn.prepare(
        "SELECT action, metadata_json FROM audit_events \
         WHERE tenant_id = ?1 AND entity_type = ?2 AND entity_id = ?3 \
         ORDER BY created_at, id",
    )?;
    let rows = stmt
        .query_map(params![tenant.to_string(), entity_type, entity_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

    let mut out = Vec::with_capacity(rows.len());
    for (action, json) in rows {
        out.push((action, serde_json::from_str(&json)?));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_db, tenant};

    #[test]
    fn test_record_and_read_back() {
        let conn = memory_db();
        let t = tenant();
        let record = AuditRecord::new("term.merge", "authority_term", "abc", serde_json::json!({"relations_moved": 3}));

        SqliteAuditSink.record(&conn, t, &record).unwrap();

        let events = events_for(&conn, t, "authority_term", "abc").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "term.merge");
        assert_eq!(events[0].1["relations_moved"], 3);
        assert!(events_for(&conn, tenant(), "authority_term", "abc").unwrap().is_empty());
    }
}
