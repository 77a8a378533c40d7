//! Shared fixtures for unit tests.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tempfile::TempDir;
use uuid::Uuid;

use crate::db::{migrate, Db};
use crate::graph::{add_relation, Relation, Viewpoint};
use crate::term::{create_term, NewTerm, TenantId, Term, TermKind};

pub(crate) fn migrations_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
}

/// Fresh in-memory database with the full schema
pub(crate) fn memory_db() -> Connection {
    let mut conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
    migrate::run_migrations(&mut conn, &migrations_dir()).unwrap();
    conn
}

/// On-disk database for tests that go through [`Db`]
pub(crate) async fn temp_db() -> (Db, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Db::new(temp_dir.path().join("thesaurus.db"));
    let dir = migrations_dir();
    db.with_connection(move |conn| migrate::run_migrations(conn, &dir))
        .await
        .unwrap();
    (db, temp_dir)
}

pub(crate) fn tenant() -> TenantId {
    TenantId(Uuid::new_v4())
}

/// Subject term in the `lcsh` vocabulary
pub(crate) fn subject(conn: &Connection, tenant: TenantId, label: &str) -> Term {
    create_term(conn, tenant, NewTerm::new(TermKind::Subject, "lcsh", label)).unwrap()
}

pub(crate) fn term_in(conn: &Connection, tenant: TenantId, kind: TermKind, vocabulary: &str, label: &str) -> Term {
    create_term(conn, tenant, NewTerm::new(kind, vocabulary, label)).unwrap()
}

/// Store `child` broader `parent`
pub(crate) fn link_broader(conn: &Connection, tenant: TenantId, child: &Term, parent: &Term) -> Relation {
    add_relation(conn, tenant, child.id, Viewpoint::Broader, parent.id).unwrap()
}

pub(crate) fn link_related(conn: &Connection, tenant: TenantId, a: &Term, b: &Term) -> Relation {
    add_relation(conn, tenant, a.id, Viewpoint::Related, b.id).unwrap()
}

pub(crate) fn relation_count(conn: &Connection, tenant: TenantId) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM authority_relations WHERE tenant_id = ?1",
        [tenant.to_string()],
        |row| row.get(0),
    )
    .unwrap()
}
