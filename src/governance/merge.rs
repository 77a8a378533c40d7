//! Merge (redirect) one term into another.
//!
//! A merge repoints bibliographic links, folds the source's labels into the target's
//! variants, moves the source's relations onto the target through the engine, and
//! optionally deactivates the source. Preview runs the exact same writes and rolls back.

use std::collections::HashMap;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink};
use crate::db::immediate_transaction;
use crate::error::{Result, ThesaurusError};
use crate::graph::engine::{detach_term, insert_edge};
use crate::linkage::BibLinkage;
use crate::term::{get_term, get_terms, update_term, TenantId, Term, TermStatus, TermUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    Preview,
    Apply,
}

impl FromStr for MergeMode {
    type Err = ThesaurusError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preview" => Ok(MergeMode::Preview),
            "apply" => Ok(MergeMode::Apply),
            other => Err(ThesaurusError::InvalidInput(format!("mode must be preview or apply, got: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOptions {
    /// Mark the source inactive with a note pointing at the target
    #[serde(default = "default_deactivate_source")]
    pub deactivate_source: bool,
}

fn default_deactivate_source() -> bool {
    true
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self { deactivate_source: default_deactivate_source() }
    }
}

/// Counts describing what a merge did (or would do)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    pub bibs_affected: i64,
    pub bibs_updated: i64,
    pub variant_labels_added: usize,
    pub relations_moved: usize,
    pub relations_skipped_existing: usize,
    pub self_loops_dropped: usize,
    pub relations_deleted: usize,
    pub source_deactivated: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeResult {
    pub mode: MergeMode,
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub summary: MergeSummary,
}

/// Merge `source_id` into `target_id` in one IMMEDIATE transaction.
///
/// Any failure, including a relation move that would close a cycle, aborts the whole
/// merge. In `Apply` mode the audit record is written before commit.
#[allow(clippy::too_many_arguments)]
pub fn merge(
    conn: &mut Connection,
    tenant: TenantId,
    source_id: Uuid,
    target_id: Uuid,
    mode: MergeMode,
    options: &MergeOptions,
    linkage: &dyn BibLinkage,
    audit: &dyn AuditSink,
) -> Result<MergeResult> {
    let tx = immediate_transaction(conn)?;
    let summary = merge_in(&tx, tenant, source_id, target_id, options, linkage)?;

    match mode {
        MergeMode::Preview => {
            tx.rollback()?;
            log::debug!("Previewed merge {} -> {}: {:?}", source_id, target_id, summary);
        }
        MergeMode::Apply => {
            let metadata = serde_json::json!({
                "source_id": source_id,
                "target_id": target_id,
                "options": options,
                "summary": summary,
            });
            audit.record(
                &tx,
                tenant,
                &AuditRecord::new("authority_term.merge", "authority_term", source_id.to_string(), metadata),
            )?;
            tx.commit()?;
            log::info!(
                "Merged term {} into {} ({} bibs updated, {} relations moved)",
                source_id,
                target_id,
                summary.bibs_updated,
                summary.relations_moved
            );
        }
    }

    Ok(MergeResult { mode, source_id, target_id, summary })
}

fn merge_in(
    conn: &Connection,
    tenant: TenantId,
    source_id: Uuid,
    target_id: Uuid,
    options: &MergeOptions,
    linkage: &dyn BibLinkage,
) -> Result<MergeSummary> {
    if source_id == target_id {
        return Err(ThesaurusError::InvalidInput("cannot merge a term into itself".to_string()));
    }
    let source = get_term(conn, tenant, source_id)?;
    let target = get_term(conn, tenant, target_id)?;
    if source.kind != target.kind {
        return Err(ThesaurusError::KindMismatch {
            from: source.kind.to_string(),
            to: target.kind.to_string(),
        });
    }

    let mut summary = MergeSummary::default();

    let rewrite = linkage.rewrite_references(conn, tenant, source.id, target.id)?;
    summary.bibs_affected = rewrite.bibs_affected;
    summary.bibs_updated = rewrite.bibs_updated;

    summary.variant_labels_added = fold_labels(conn, tenant, &source, &target)?;

    if source.vocabulary_code == target.vocabulary_code {
        move_relations(conn, tenant, &source, &target, &mut summary)?;
    } else {
        let warning = format!(
            "relations not moved: source vocabulary {} differs from target vocabulary {}",
            source.vocabulary_code, target.vocabulary_code
        );
        log::warn!("Merge {} -> {}: {}", source.id, target.id, warning);
        summary.warnings.push(warning);
    }

    if options.deactivate_source {
        update_term(
            conn,
            tenant,
            source.id,
            TermUpdate {
                status: Some(TermStatus::Inactive),
                note: Some(format!("Merged into {} ({})", target.preferred_label, target.id)),
                ..Default::default()
            },
        )?;
        summary.source_deactivated = true;
    }

    Ok(summary)
}

/// Add the source's preferred and variant labels to the target's variants
fn fold_labels(conn: &Connection, tenant: TenantId, source: &Term, target: &Term) -> Result<usize> {
    let mut variants = target.variant_labels.clone();
    let before = variants.len();
    for label in std::iter::once(&source.preferred_label).chain(source.variant_labels.iter()) {
        if label != &target.preferred_label && !variants.contains(label) {
            variants.push(label.clone());
        }
    }

    let added = variants.len() - before;
    if added > 0 {
        update_term(
            conn,
            tenant,
            target.id,
            TermUpdate { variant_labels: Some(variants), ..Default::default() },
        )?;
    }
    Ok(added)
}

/// Detach every relation of `source` and re-create it on `target` through the engine
fn move_relations(
    conn: &Connection,
    tenant: TenantId,
    source: &Term,
    target: &Term,
    summary: &mut MergeSummary,
) -> Result<()> {
    let removed = detach_term(conn, tenant, source.id)?;
    summary.relations_deleted = removed.len();

    let others: Vec<Uuid> = removed.iter().filter_map(|r| r.other_endpoint(source.id)).collect();
    let mut terms: HashMap<Uuid, Term> = get_terms(conn, tenant, &others)?;
    terms.insert(target.id, target.clone());

    for relation in &removed {
        let Some(other) = relation.other_endpoint(source.id) else { continue };
        if other == target.id {
            summary.self_loops_dropped += 1;
            continue;
        }

        let from_id = if relation.from_term_id == source.id { target.id } else { relation.from_term_id };
        let to_id = if relation.to_term_id == source.id { target.id } else { relation.to_term_id };
        let (Some(from), Some(to)) = (terms.get(&from_id), terms.get(&to_id)) else {
            return Err(ThesaurusError::TermNotFound(other));
        };

        match insert_edge(conn, tenant, from, relation.relation_type, to) {
            Ok(_) => summary.relations_moved += 1,
            Err(ThesaurusError::DuplicateRelation { .. }) => summary.relations_skipped_existing += 1,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
