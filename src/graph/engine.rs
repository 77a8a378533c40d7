//! The only writer of `authority_relations`.
//!
//! Every edge insert goes through [`insert_edge`], which checks endpoint scope, the
//! per-kind relation policy, and (for `broader`) the ancestor closure of the parent as
//! seen by the caller's transaction. Callers are expected to hold an IMMEDIATE
//! transaction so the check and the insert observe the same edge set.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use super::{
    relation_from_row, to_canonical, viewpoint_of, CanonicalEdge, Relation, RelationType, Viewpoint,
    RELATION_COLUMNS,
};
use crate::db::now_timestamp;
use crate::error::{is_unique_violation, Result, ThesaurusError};
use crate::term::{get_term, get_terms, TenantId, Term, TermSummary};

/// A relation as seen from one of its endpoints
#[derive(Debug, Clone, Serialize)]
pub struct TermRelation {
    pub relation_id: Uuid,
    pub viewpoint: Viewpoint,
    pub term: TermSummary,
}

/// Relate `term_id` to `target_id` from `term_id`'s point of view.
///
/// "A broader B" stores `A -> B`; "A narrower B" stores `B -> A`; "A related B" stores the
/// ordered pair. Duplicates are a conflict.
pub fn add_relation(
    conn: &Connection,
    tenant: TenantId,
    term_id: Uuid,
    viewpoint: Viewpoint,
    target_id: Uuid,
) -> Result<Relation> {
    if term_id == target_id {
        return Err(ThesaurusError::SelfRelation(term_id));
    }
    let term = get_term(conn, tenant, term_id)?;
    let target = get_term(conn, tenant, target_id)?;

    let edge = to_canonical(term_id, viewpoint, target_id);
    let (from, to) = if edge.from == term.id { (&term, &target) } else { (&target, &term) };
    insert_edge(conn, tenant, from, edge.relation_type, to)
}

/// Scope and policy checks shared by every insert path
pub(crate) fn check_edge(from: &Term, relation_type: RelationType, to: &Term) -> Result<()> {
    if from.id == to.id {
        return Err(ThesaurusError::SelfRelation(from.id));
    }
    if from.kind != to.kind {
        return Err(ThesaurusError::KindMismatch {
            from: from.kind.to_string(),
            to: to.kind.to_string(),
        });
    }
    if from.vocabulary_code != to.vocabulary_code {
        return Err(ThesaurusError::VocabularyMismatch {
            from: from.vocabulary_code.clone(),
            to: to.vocabulary_code.clone(),
        });
    }
    if !from.kind.supports(relation_type) {
        return Err(ThesaurusError::UnsupportedRelationType {
            kind: from.kind.to_string(),
            relation_type: relation_type.to_string(),
        });
    }
    Ok(())
}

/// True if `child` is already an ancestor-or-self of `parent`, i.e. `child -> parent` would
/// close a cycle. Sees uncommitted edges of the current transaction.
pub(crate) fn would_create_cycle(conn: &Connection, tenant: TenantId, child: Uuid, parent: Uuid) -> Result<bool> {
    let found: bool = conn.query_row(
        r#"
        WITH RECURSIVE up(id) AS (
            SELECT ?2
            UNION
            SELECT r.to_term_id
            FROM authority_relations r
            JOIN up ON r.from_term_id = up.id
            WHERE r.tenant_id = ?1 AND r.relation_type = 'broader'
        )
        SELECT EXISTS (SELECT 1 FROM up WHERE id = ?3)
        "#,
        params![tenant.to_string(), parent.to_string(), child.to_string()],
        |row| row.get(0),
    )?;
    Ok(found)
}

/// Validate and store one edge between two already-loaded terms.
///
/// `related` endpoints are reordered into canonical form. A row that already exists is
/// reported as `DuplicateRelation`; bulk paths treat that as a skip.
pub(crate) fn insert_edge(
    conn: &Connection,
    tenant: TenantId,
    from: &Term,
    relation_type: RelationType,
    to: &Term,
) -> Result<Relation> {
    check_edge(from, relation_type, to)?;
    let edge = CanonicalEdge::new(from.id, relation_type, to.id);

    if relation_type == RelationType::Broader && would_create_cycle(conn, tenant, edge.from, edge.to)? {
        log::warn!(
            "Rejected broader edge {} -> {} in {}: would create a cycle",
            edge.from,
            edge.to,
            from.scope()
        );
        return Err(ThesaurusError::WouldCreateCycle { child: edge.from, parent: edge.to });
    }

    let id = Uuid::new_v4();
    let now = now_timestamp();
    let inserted = conn.execute(
        r#"
        INSERT INTO authority_relations (
            id, tenant_id, from_term_id, relation_type, to_term_id, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
        "#,
        params![
            id.to_string(),
            tenant.to_string(),
            edge.from.to_string(),
            edge.relation_type.as_str(),
            edge.to.to_string(),
            now,
        ],
    );

    match inserted {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(ThesaurusError::DuplicateRelation {
                from: edge.from,
                relation_type: edge.relation_type.to_string(),
                to: edge.to,
            });
        }
        Err(e) => return Err(e.into()),
    }

    log::debug!("Stored {} {} {}", edge.from, edge.relation_type, edge.to);
    get_relation(conn, tenant, id)?.ok_or(ThesaurusError::RelationNotFound(id))
}

pub(crate) fn get_relation(conn: &Connection, tenant: TenantId, id: Uuid) -> Result<Option<Relation>> {
    let sql = format!(
        "SELECT {} FROM authority_relations WHERE tenant_id = ?1 AND id = ?2",
        RELATION_COLUMNS
    );
    let relation = conn
        .query_row(&sql, params![tenant.to_string(), id.to_string()], relation_from_row)
        .optional()?;
    Ok(relation)
}

/// Delete a relation through one of its endpoints. A relation that exists but does not
/// touch `term_id` is reported as not found.
pub fn delete_relation(conn: &Connection, tenant: TenantId, term_id: Uuid, relation_id: Uuid) -> Result<Relation> {
    let relation = get_relation(conn, tenant, relation_id)?
        .filter(|r| r.other_endpoint(term_id).is_some())
        .ok_or(ThesaurusError::RelationNotFound(relation_id))?;

    conn.execute(
        "DELETE FROM authority_relations WHERE tenant_id = ?1 AND id = ?2",
        params![tenant.to_string(), relation_id.to_string()],
    )?;
    log::debug!(
        "Deleted relation {} ({} {} {})",
        relation.id,
        relation.from_term_id,
        relation.relation_type,
        relation.to_term_id
    );
    Ok(relation)
}

/// Every stored edge with `term_id` as an endpoint, oldest first
pub(crate) fn relations_touching(conn: &Connection, tenant: TenantId, term_id: Uuid) -> Result<Vec<Relation>> {
    let sql = format!(
        "SELECT {} FROM authority_relations \
         WHERE tenant_id = ?1 AND (from_term_id = ?2 OR to_term_id = ?2) \
         ORDER BY created_at, id",
        RELATION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![tenant.to_string(), term_id.to_string()], relation_from_row)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(rows)
}

/// Remove every edge touching `term_id`, returning what was removed
pub(crate) fn detach_term(conn: &Connection, tenant: TenantId, term_id: Uuid) -> Result<Vec<Relation>> {
    let relations = relations_touching(conn, tenant, term_id)?;
    conn.execute(
        "DELETE FROM authority_relations WHERE tenant_id = ?1 AND (from_term_id = ?2 OR to_term_id = ?2)",
        params![tenant.to_string(), term_id.to_string()],
    )?;
    Ok(relations)
}

/// The term's relations from its own point of view, grouped broader, narrower, related
/// and sorted by the other endpoint's label.
pub fn relations_for_term(conn: &Connection, tenant: TenantId, term_id: Uuid) -> Result<Vec<TermRelation>> {
    get_term(conn, tenant, term_id)?;
    let relations = relations_touching(conn, tenant, term_id)?;

    let others: Vec<Uuid> = relations.iter().filter_map(|r| r.other_endpoint(term_id)).collect();
    let terms = get_terms(conn, tenant, &others)?;

    let mut out: Vec<TermRelation> = relations
        .iter()
        .filter_map(|r| {
            let other = terms.get(&r.other_endpoint(term_id)?)?;
            Some(TermRelation {
                relation_id: r.id,
                viewpoint: viewpoint_of(r.relation_type, r.from_term_id, term_id),
                term: other.summary(),
            })
        })
        .collect();
    out.sort_by(|a, b| {
        a.viewpoint
            .cmp(&b.viewpoint)
            .then_with(|| a.term.preferred_label.cmp(&b.term.preferred_label))
            .then_with(|| a.term.id.cmp(&b.term.id))
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::TermKind;
    use crate::test_support::{link_broader, memory_db, relation_count, subject, tenant, term_in};
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[test]
    fn test_broader_chain_rejects_cycle() {
        let conn = memory_db();
        let t = tenant();
        let a = subject(&conn, t, "A");
        let b = subject(&conn, t, "B");
        let c = subject(&conn, t, "C");

        let ab = add_relation(&conn, t, a.id, Viewpoint::Broader, b.id).unwrap();
        assert_eq!((ab.from_term_id, ab.to_term_id), (a.id, b.id));
        add_relation(&conn, t, b.id, Viewpoint::Broader, c.id).unwrap();

        let err = add_relation(&conn, t, c.id, Viewpoint::Broader, a.id).unwrap_err();
        assert!(matches!(err, ThesaurusError::WouldCreateCycle { child, parent } if child == c.id && parent == a.id));
        // Same edge expressed as a narrower viewpoint from A
        let err = add_relation(&conn, t, a.id, Viewpoint::Narrower, c.id).unwrap_err();
        assert!(matches!(err, ThesaurusError::WouldCreateCycle { .. }));
        assert_eq!(relation_count(&conn, t), 2);
    }

    #[test]
    fn test_narrower_viewpoint_stores_child_to_parent() {
        let conn = memory_db();
        let t = tenant();
        let parent = subject(&conn, t, "Animals");
        let child = subject(&conn, t, "Cats");

        let rel = add_relation(&conn, t, parent.id, Viewpoint::Narrower, child.id).unwrap();
        assert_eq!(rel.from_term_id, child.id);
        assert_eq!(rel.to_term_id, parent.id);
        assert_eq!(rel.relation_type, RelationType::Broader);
    }

    #[test]
    fn test_related_is_canonical_and_unique() {
        let conn = memory_db();
        let t = tenant();
        let a = subject(&conn, t, "Ships");
        let b = subject(&conn, t, "Boats");

        let rel = add_relation(&conn, t, a.id, Viewpoint::Related, b.id).unwrap();
        assert!(rel.from_term_id < rel.to_term_id);

        let err = add_relation(&conn, t, b.id, Viewpoint::Related, a.id).unwrap_err();
        assert!(matches!(err, ThesaurusError::DuplicateRelation { .. }));
        assert_eq!(err.status_code(), 409);
        assert_eq!(relation_count(&conn, t), 1);
    }

    #[test]
    fn test_scope_and_policy_checks() {
        let conn = memory_db();
        let t = tenant();
        let a = subject(&conn, t, "Rivers");
        let other_vocab = term_in(&conn, t, TermKind::Subject, "local", "Streams");
        let genre = term_in(&conn, t, TermKind::Genre, "lcsh", "Rivers");
        let p1 = term_in(&conn, t, TermKind::Name, "lcnaf", "Doe, Jane");
        let p2 = term_in(&conn, t, TermKind::Name, "lcnaf", "Doe, John");

        assert!(matches!(
            add_relation(&conn, t, a.id, Viewpoint::Broader, a.id),
            Err(ThesaurusError::SelfRelation(_))
        ));
        assert!(matches!(
            add_relation(&conn, t, a.id, Viewpoint::Broader, other_vocab.id),
            Err(ThesaurusError::VocabularyMismatch { .. })
        ));
        assert!(matches!(
            add_relation(&conn, t, a.id, Viewpoint::Related, genre.id),
            Err(ThesaurusError::KindMismatch { .. })
        ));
        assert!(matches!(
            add_relation(&conn, t, p1.id, Viewpoint::Broader, p2.id),
            Err(ThesaurusError::UnsupportedRelationType { .. })
        ));
        add_relation(&conn, t, p1.id, Viewpoint::Related, p2.id).unwrap();

        // Other tenants cannot see the terms at all
        assert!(matches!(
            add_relation(&conn, tenant(), a.id, Viewpoint::Related, other_vocab.id),
            Err(ThesaurusError::TermNotFound(_))
        ));
    }

    #[test]
    fn test_delete_relation_requires_endpoint() {
        let conn = memory_db();
        let t = tenant();
        let a = subject(&conn, t, "A");
        let b = subject(&conn, t, "B");
        let c = subject(&conn, t, "C");
        let rel = link_broader(&conn, t, &a, &b);

        assert!(matches!(
            delete_relation(&conn, t, c.id, rel.id),
            Err(ThesaurusError::RelationNotFound(_))
        ));
        let deleted = delete_relation(&conn, t, b.id, rel.id).unwrap();
        assert_eq!(deleted.id, rel.id);
        assert_eq!(relation_count(&conn, t), 0);
        assert!(matches!(
            delete_relation(&conn, t, a.id, rel.id),
            Err(ThesaurusError::RelationNotFound(_))
        ));
    }

    #[test]
    fn test_relations_for_term_viewpoints() {
        let conn = memory_db();
        let t = tenant();
        let mid = subject(&conn, t, "Mammals");
        let top = subject(&conn, t, "Animals");
        let low = subject(&conn, t, "Whales");
        let see = subject(&conn, t, "Zoology");
        link_broader(&conn, t, &mid, &top);
        link_broader(&conn, t, &low, &mid);
        add_relation(&conn, t, see.id, Viewpoint::Related, mid.id).unwrap();

        let rels = relations_for_term(&conn, t, mid.id).unwrap();
        let view: Vec<(Viewpoint, &str)> = rels.iter().map(|r| (r.viewpoint, r.term.preferred_label.as_str())).collect();
        assert_eq!(
            view,
            vec![
                (Viewpoint::Broader, "Animals"),
                (Viewpoint::Narrower, "Whales"),
                (Viewpoint::Related, "Zoology"),
            ]
        );
    }

    #[test]
    fn test_cycle_check_sees_uncommitted_edges() {
        let mut conn = memory_db();
        let t = tenant();
        let a = subject(&conn, t, "A");
        let b = subject(&conn, t, "B");

        let tx = crate::db::immediate_transaction(&mut conn).unwrap();
        add_relation(&tx, t, a.id, Viewpoint::Broader, b.id).unwrap();
        assert!(would_create_cycle(&tx, t, b.id, a.id).unwrap());
        tx.rollback().unwrap();
        assert!(!would_create_cycle(&conn, t, b.id, a.id).unwrap());
    }

    /// Kahn's algorithm over the stored broader edges
    fn is_acyclic(conn: &Connection, t: TenantId) -> bool {
        let mut stmt = conn
            .prepare("SELECT from_term_id, to_term_id FROM authority_relations WHERE tenant_id = ?1 AND relation_type = 'broader'")
            .unwrap();
        let edges: Vec<(String, String)> = stmt
            .query_map([t.to_string()], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();

        let mut indegree: HashMap<&str, usize> = HashMap::new();
        for (from, to) in &edges {
            indegree.entry(from.as_str()).or_insert(0);
            *indegree.entry(to.as_str()).or_insert(0) += 1;
        }
        let mut ready: Vec<&str> = indegree.iter().filter(|(_, d)| **d == 0).map(|(k, _)| *k).collect();
        let mut visited = 0;
        while let Some(node) = ready.pop() {
            visited += 1;
            for (from, to) in &edges {
                if from == node {
                    let d = indegree.get_mut(to.as_str()).unwrap();
                    *d -= 1;
                    if *d == 0 {
                        ready.push(to.as_str());
                    }
                }
            }
        }
        visited == indegree.len()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_broader_edges_stay_acyclic(
            edges in prop::collection::vec((0usize..8, 0usize..8, any::<bool>()), 1..40)
        ) {
            let conn = memory_db();
            let t = tenant();
            let terms: Vec<Term> = (0..8).map(|i| subject(&conn, t, &format!("T{}", i))).collect();

            for (a, b, as_narrower) in edges {
                let viewpoint = if as_narrower { Viewpoint::Narrower } else { Viewpoint::Broader };
                match add_relation(&conn, t, terms[a].id, viewpoint, terms[b].id) {
                    Ok(_) => {}
                    Err(ThesaurusError::SelfRelation(_))
                    | Err(ThesaurusError::WouldCreateCycle { .. })
                    | Err(ThesaurusError::DuplicateRelation { .. }) => {}
                    Err(e) => panic!("unexpected error: {}", e),
                }
                prop_assert!(is_acyclic(&conn, t));
            }
        }

        #[test]
        fn prop_related_insertions_collapse(a in 0usize..6, b in 0usize..6) {
            prop_assume!(a != b);
            let conn = memory_db();
            let t = tenant();
            let terms: Vec<Term> = (0..6).map(|i| subject(&conn, t, &format!("R{}", i))).collect();

            add_relation(&conn, t, terms[a].id, Viewpoint::Related, terms[b].id).unwrap();
            let second = add_relation(&conn, t, terms[b].id, Viewpoint::Related, terms[a].id);
            let is_duplicate = matches!(second, Err(ThesaurusError::DuplicateRelation { .. }));
            prop_assert!(is_duplicate);
            prop_assert_eq!(relation_count(&conn, t), 1);
        }
    }
}
