//! Links between bibliographic records and authority terms.
//!
//! The engine does not own bibliographic records. Merge needs to repoint their subject
//! links and the quality reports need usage counts, so both go through [`BibLinkage`].

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::term::TenantId;

/// Result of repointing links from one term to another
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteOutcome {
    /// Records that referenced the source term
    pub bibs_affected: i64,
    /// Records whose link was moved (the rest already referenced the target)
    pub bibs_updated: i64,
}

pub trait BibLinkage: Send + Sync {
    /// Repoint every reference to `source` at `target` inside the caller's transaction
    fn rewrite_references(&self, conn: &Connection, tenant: TenantId, source: Uuid, target: Uuid) -> Result<RewriteOutcome>;

    /// Number of records referencing `term_id`
    fn usage_count(&self, conn: &Connection, tenant: TenantId, term_id: Uuid) -> Result<i64>;
}

/// Backed by the `bib_term_links` table
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteBibLinkage;

impl BibLinkage for SqliteBibLinkage {
    fn rewrite_references(&self, conn: &Connection, tenant: TenantId, source: Uuid, target: Uuid) -> Result<RewriteOutcome> {
        let (tenant, source, target) = (tenant.to_string(), source.to_string(), target.to_string());

        let bibs_affected: i64 = conn.query_row(
            "SELECT COUNT(*) FROM bib_term_links WHERE tenant_id = ?1 AND term_id = ?2",
            params![tenant, source],
            |row| row.get(0),
        )?;
        if bibs_affected == 0 {
            return Ok(RewriteOutcome::default());
        }

        // Move links whose record does not already reference the target
        let bibs_updated = conn.execute(
            r#"
            UPDATE bib_term_links SET term_id = ?3
            WHERE tenant_id = ?1 AND term_id = ?2
              AND NOT EXISTS (
                  SELECT 1 FROM bib_term_links existing
                  WHERE existing.tenant_id = bib_term_links.tenant_id
                    AND existing.bib_id = bib_term_links.bib_id
                    AND existing.term_id = ?3
              )
            "#,
            params![tenant, source, target],
        )? as i64;

        // Whatever is left would duplicate an existing target link
        conn.execute(
            "DELETE FROM bib_term_links WHERE tenant_id = ?1 AND term_id = ?2",
            params![tenant, source],
        )?;

        Ok(RewriteOutcome { bibs_affected, bibs_updated })
    }

    fn usage_count(&self, conn: &Connection, tenant: TenantId, term_id: Uuid) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM bib_term_links WHERE tenant_id = ?1 AND term_id = ?2",
            params![tenant.to_string(), term_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// Attach `term_id` to a bibliographic record at `position`. Re-linking updates the position.
pub fn link_term(conn: &Connection, tenant: TenantId, bib_id: Uuid, term_id: Uuid, position: i64) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO bib_term_links (tenant_id, bib_id, term_id, position)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT (tenant_id, bib_id, term_id) DO UPDATE SET position = excluded.position
        "#,
        params![tenant.to_string(), bib_id.to_string(), term_id.to_string(), position],
    )?;
    Ok(())
}

/// Terms linked to a record, in position order
pub fn terms_for_bib(conn: &Connection, tenant: TenantId, bib_id: Uuid) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT term_id FROM bib_term_links WHERE tenant_id = ?1 AND bib_id = ?2 ORDER BY position, term_id",
    )?;
    let rows = stmt
        .query_map(params![tenant.to_string(), bib_id.to_string()], |row| {
            crate::db::parse_column::<Uuid>(row, 0)
        })?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(rows)
}
