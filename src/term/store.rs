//! Term CRUD and lookup.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{term_from_row, NewTerm, TenantId, Term, TermKind, TermUpdate, VocabularyScope, TERM_COLUMNS};
use crate::db::{now_timestamp, placeholders, IN_CHUNK};
use crate::error::{is_unique_violation, Result, ThesaurusError};
use crate::pagination::{Cursor, CursorKind, Page, PageRequest};

/// Optional filters for [`list_terms`]
#[derive(Debug, Clone, Default)]
pub struct TermFilter {
    pub kind: Option<TermKind>,
    pub vocabulary_code: Option<String>,
}

fn vocabulary_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9._-]{0,63}$").expect("valid vocabulary regex"))
}

/// Vocabulary codes are short lowercase namespace tokens such as `lcsh` or `builtin-zh`.
pub fn validate_vocabulary_code(code: &str) -> Result<()> {
    if vocabulary_code_pattern().is_match(code) {
        Ok(())
    } else {
        Err(ThesaurusError::InvalidInput(format!(
            "vocabulary_code must match [a-z0-9][a-z0-9._-]{{0,63}}, got: {:?}",
            code
        )))
    }
}

/// Trim and collapse internal whitespace; empty labels are rejected.
pub fn normalize_label(label: &str) -> Result<String> {
    let normalized = label.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return Err(ThesaurusError::InvalidInput("label must not be empty".to_string()));
    }
    Ok(normalized)
}

/// Normalize variants, drop blanks, duplicates, and anything equal to the preferred label.
/// First occurrence wins, so caller order is preserved.
pub fn normalize_variants(preferred_label: &str, variants: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(variants.len());
    for variant in variants {
        let Ok(v) = normalize_label(variant) else { continue };
        if v != preferred_label && !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

fn variants_json(variants: &[String]) -> Result<String> {
    Ok(serde_json::to_string(variants)?)
}

/// Insert a new term. Fails with `DuplicateTerm` if the preferred label is taken in scope.
pub fn create_term(conn: &Connection, tenant: TenantId, new: NewTerm) -> Result<Term> {
    validate_vocabulary_code(&new.vocabulary_code)?;
    let preferred_label = normalize_label(&new.preferred_label)?;
    let variant_labels = normalize_variants(&preferred_label, &new.variant_labels);
    let id = new.id.unwrap_or_else(Uuid::new_v4);
    let now = now_timestamp();

    let inserted = conn.execute(
        r#"
        INSERT INTO authority_terms (
            id, tenant_id, kind, vocabulary_code, preferred_label,
            variant_labels, note, source, status, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'active', ?9, ?9)
        "#,
        params![
            id.to_string(),
            tenant.to_string(),
            new.kind.as_str(),
            new.vocabulary_code,
            preferred_label,
            variants_json(&variant_labels)?,
            new.note,
            new.source,
            now,
        ],
    );

    match inserted {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(ThesaurusError::DuplicateTerm(format!(
                "{} in {}:{}",
                preferred_label, new.kind, new.vocabulary_code
            )));
        }
        Err(e) => return Err(e.into()),
    }

    log::debug!("Created term {} ({}) in {}:{}", id, preferred_label, new.kind, new.vocabulary_code);
    get_term(conn, tenant, id)
}

/// Look up a term inside the tenant
pub fn find_term(conn: &Connection, tenant: TenantId, id: Uuid) -> Result<Option<Term>> {
    let sql = format!("SELECT {} FROM authority_terms WHERE tenant_id = ?1 AND id = ?2", TERM_COLUMNS);
    let term = conn
        .query_row(&sql, params![tenant.to_string(), id.to_string()], term_from_row)
        .optional()?;
    Ok(term)
}

/// Like [`find_term`] but absent terms are a `TermNotFound` error
pub fn get_term(conn: &Connection, tenant: TenantId, id: Uuid) -> Result<Term> {
    find_term(conn, tenant, id)?.ok_or(ThesaurusError::TermNotFound(id))
}

/// Batch lookup. Ids outside the tenant or unknown are simply absent from the map.
pub fn get_terms(conn: &Connection, tenant: TenantId, ids: &[Uuid]) -> Result<HashMap<Uuid, Term>> {
    let mut out = HashMap::with_capacity(ids.len());
    for chunk in ids.chunks(IN_CHUNK) {
        let sql = format!(
            "SELECT {} FROM authority_terms WHERE tenant_id = ? AND id IN ({})",
            TERM_COLUMNS,
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut values = Vec::with_capacity(chunk.len() + 1);
        values.push(tenant.to_string());
        values.extend(chunk.iter().map(|id| id.to_string()));
        let rows = stmt.query_map(rusqlite::params_from_iter(values), term_from_row)?;
        for row in rows {
            let term = row?;
            out.insert(term.id, term);
        }
    }
    Ok(out)
}

/// Exact preferred-label lookup within a scope
pub fn find_by_label(
    conn: &Connection,
    tenant: TenantId,
    scope: &VocabularyScope,
    label: &str,
) -> Result<Option<Term>> {
    let label = normalize_label(label)?;
    let sql = format!(
        "SELECT {} FROM authority_terms \
         WHERE tenant_id = ?1 AND kind = ?2 AND vocabulary_code = ?3 AND preferred_label = ?4",
        TERM_COLUMNS
    );
    let term = conn
        .query_row(
            &sql,
            params![tenant.to_string(), scope.kind.as_str(), scope.vocabulary_code, label],
            term_from_row,
        )
        .optional()?;
    Ok(term)
}

/// Apply a partial update. Kind and vocabulary are immutable: moving a term between
/// scopes would strand its relations.
pub fn update_term(conn: &Connection, tenant: TenantId, id: Uuid, update: TermUpdate) -> Result<Term> {
    let current = get_term(conn, tenant, id)?;

    let preferred_label = match update.preferred_label.as_deref() {
        Some(label) => normalize_label(label)?,
        None => current.preferred_label.clone(),
    };
    let variants = update.variant_labels.as_ref().unwrap_or(&current.variant_labels);
    let variant_labels = normalize_variants(&preferred_label, variants);
    let note = update.note.or_else(|| current.note.clone());
    let source = update.source.or_else(|| current.source.clone());
    let status = update.status.unwrap_or(current.status);

    let updated = conn.execute(
        r#"
        UPDATE authority_terms
        SET preferred_label = ?1, variant_labels = ?2, note = ?3, source = ?4,
            status = ?5, updated_at = ?6
        WHERE tenant_id = ?7 AND id = ?8
        "#,
        params![
            preferred_label,
            variants_json(&variant_labels)?,
            note,
            source,
            status.as_str(),
            now_timestamp(),
            tenant.to_string(),
            id.to_string(),
        ],
    );

    match updated {
        Ok(_) => get_term(conn, tenant, id),
        Err(e) if is_unique_violation(&e) => Err(ThesaurusError::DuplicateTerm(format!(
            "{} in {}",
            preferred_label,
            current.scope()
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Newest-first listing with a `(created_at, id)` cursor
pub fn list_terms(
    conn: &Connection,
    tenant: TenantId,
    filter: &TermFilter,
    page: &PageRequest,
) -> Result<Page<Term>> {
    let cursor = page.decode_cursor(CursorKind::CreatedAt)?;

    let mut sql = format!("SELECT {} FROM authority_terms WHERE tenant_id = ?", TERM_COLUMNS);
    let mut values: Vec<String> = vec![tenant.to_string()];
    if let Some(kind) = filter.kind {
        sql.push_str(" AND kind = ?");
        values.push(kind.as_str().to_string());
    }
    if let Some(code) = &filter.vocabulary_code {
        sql.push_str(" AND vocabulary_code = ?");
        values.push(code.clone());
    }
    if let Some(cursor) = &cursor {
        sql.push_str(" AND (created_at < ? OR (created_at = ? AND id < ?))");
        values.push(cursor.sort_key.clone());
        values.push(cursor.sort_key.clone());
        values.push(cursor.id.to_string());
    }
    sql.push_str(&format!(" ORDER BY created_at DESC, id DESC LIMIT {}", page.fetch_limit()));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(values), term_from_row)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

    Ok(Page::from_overfetch(rows, page.limit, |t| {
        Cursor::created_at(crate::db::format_timestamp(t.created_at), t.id)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::TermStatus;
    use crate::test_support::{memory_db, tenant};

    #[test]
    fn test_create_and_get_term() {
        let conn = memory_db();
        let t = tenant();
        let mut new = NewTerm::new(TermKind::Subject, "lcsh", "  Solar   system ");
        new.variant_labels = vec!["Planets".into(), "Solar system".into(), "planets ".into(), "".into()];

        let term = create_term(&conn, t, new).unwrap();
        assert_eq!(term.preferred_label, "Solar system");
        assert_eq!(term.variant_labels, vec!["Planets".to_string(), "planets".to_string()]);
        assert_eq!(term.status, TermStatus::Active);

        let fetched = get_term(&conn, t, term.id).unwrap();
        assert_eq!(fetched, term);
    }

    #[test]
    fn test_duplicate_label_in_scope_conflicts() {
        let conn = memory_db();
        let t = tenant();
        create_term(&conn, t, NewTerm::new(TermKind::Subject, "lcsh", "Whales")).unwrap();

        let err = create_term(&conn, t, NewTerm::new(TermKind::Subject, "lcsh", "Whales")).unwrap_err();
        assert!(matches!(err, ThesaurusError::DuplicateTerm(_)));

        // Same label in another vocabulary or kind is fine
        create_term(&conn, t, NewTerm::new(TermKind::Subject, "local", "Whales")).unwrap();
        create_term(&conn, t, NewTerm::new(TermKind::Genre, "lcsh", "Whales")).unwrap();
    }

    #[test]
    fn test_tenant_isolation() {
        let conn = memory_db();
        let a = tenant();
        let b = tenant();
        let term = create_term(&conn, a, NewTerm::new(TermKind::Subject, "lcsh", "Owls")).unwrap();

        assert!(matches!(get_term(&conn, b, term.id), Err(ThesaurusError::TermNotFound(_))));
        assert!(get_terms(&conn, b, &[term.id]).unwrap().is_empty());
        assert_eq!(get_terms(&conn, a, &[term.id]).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_vocabulary_code() {
        let conn = memory_db();
        let err = create_term(&conn, tenant(), NewTerm::new(TermKind::Subject, "LC SH", "Owls")).unwrap_err();
        assert!(matches!(err, ThesaurusError::InvalidInput(_)));
        assert!(validate_vocabulary_code("builtin-zh").is_ok());
        assert!(validate_vocabulary_code("").is_err());
    }

    #[test]
    fn test_find_by_label_and_update() {
        let conn = memory_db();
        let t = tenant();
        let scope = VocabularyScope::new(TermKind::Subject, "lcsh");
        let term = create_term(&conn, t, NewTerm::new(TermKind::Subject, "lcsh", "Cats")).unwrap();

        let found = find_by_label(&conn, t, &scope, " Cats").unwrap().unwrap();
        assert_eq!(found.id, term.id);

        let updated = update_term(
            &conn,
            t,
            term.id,
            TermUpdate {
                preferred_label: Some("Domestic cats".into()),
                variant_labels: Some(vec!["Cats".into(), "Domestic cats".into()]),
                status: Some(TermStatus::Inactive),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(updated.preferred_label, "Domestic cats");
        assert_eq!(updated.variant_labels, vec!["Cats".to_string()]);
        assert_eq!(updated.status, TermStatus::Inactive);
        assert!(find_by_label(&conn, t, &scope, "Cats").unwrap().is_none());
    }

    #[test]
    fn test_update_to_taken_label_conflicts() {
        let conn = memory_db();
        let t = tenant();
        create_term(&conn, t, NewTerm::new(TermKind::Subject, "lcsh", "Dogs")).unwrap();
        let mut new = NewTerm::new(TermKind::Subject, "lcsh", "Hounds");
        new.note = Some("hunting breeds".into());
        let hounds = create_term(&conn, t, new).unwrap();

        let err = update_term(
            &conn,
            t,
            hounds.id,
            TermUpdate { preferred_label: Some(" Dogs ".into()), ..Default::default() },
        )
        .unwrap_err();
        assert!(matches!(err, ThesaurusError::DuplicateTerm(ref msg) if msg.contains("Dogs")));

        let unchanged = get_term(&conn, t, hounds.id).unwrap();
        assert_eq!(unchanged.preferred_label, "Hounds");
        assert_eq!(unchanged.note.as_deref(), Some("hunting breeds"));
    }

    #[test]
    fn test_list_terms_pages_newest_first() {
        let conn = memory_db();
        let t = tenant();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(create_term(&conn, t, NewTerm::new(TermKind::Subject, "lcsh", format!("Term {}", i))).unwrap().id);
        }

        let filter = TermFilter { kind: Some(TermKind::Subject), vocabulary_code: Some("lcsh".into()) };
        let mut seen = Vec::new();
        let mut page = PageRequest::first(2);
        loop {
            let result = list_terms(&conn, t, &filter, &page).unwrap();
            seen.extend(result.items.iter().map(|term| term.id));
            match result.next_cursor {
                Some(next) => page = PageRequest::new(2, Some(next)),
                None => break,
            }
        }

        assert_eq!(seen.len(), 5);
        let mut sorted_seen = seen.clone();
        sorted_seen.sort();
        sorted_seen.dedup();
        ids.sort();
        assert_eq!(sorted_seen, ids);
    }
}
