//! Async facade over the synchronous core.
//!
//! Each call opens its own connection on a blocking task. Mutations run inside an
//! IMMEDIATE transaction; reads run on a plain connection.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::audit::{AuditSink, SqliteAuditSink};
use crate::bulk::{self, ImportMode, ImportReport};
use crate::config::{Config, PaginationConfig, TraversalLimits};
use crate::db::{migrate, Db};
use crate::error::Result;
use crate::governance::{self, MergeMode, MergeOptions, MergeResult, ReportEntry, ReportKind};
use crate::graph::traversal::{AncestorsQuery, GraphQuery};
use crate::graph::{
    self, AncestorsResult, Direction, ExpandInclude, ExpandResult, GraphResult, HierarchyNode, Relation,
    TermRelation, Viewpoint,
};
use crate::linkage::{BibLinkage, SqliteBibLinkage};
use crate::pagination::{Page, PageRequest};
use crate::term::{self, NewTerm, TenantId, Term, TermFilter, TermUpdate, VocabularyScope};

#[derive(Clone)]
pub struct Thesaurus {
    db: Db,
    limits: TraversalLimits,
    pagination: PaginationConfig,
    linkage: Arc<dyn BibLinkage>,
    audit: Arc<dyn AuditSink>,
}

impl Thesaurus {
    /// Service over `db` with default limits and the SQLite collaborators
    pub fn new(db: Db) -> Self {
        Self {
            db,
            limits: TraversalLimits::default(),
            pagination: PaginationConfig::default(),
            linkage: Arc::new(SqliteBibLinkage),
            audit: Arc::new(SqliteAuditSink),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let db = Db::new(config.db_path())
            .with_busy_timeout(Duration::from_millis(config.database.busy_timeout_ms));
        Self {
            limits: config.traversal.clone(),
            pagination: config.pagination.clone(),
            ..Self::new(db)
        }
    }

    pub fn with_limits(mut self, limits: TraversalLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_linkage(mut self, linkage: Arc<dyn BibLinkage>) -> Self {
        self.linkage = linkage;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn limits(&self) -> &TraversalLimits {
        &self.limits
    }

    /// Apply pending schema migrations, returning how many ran
    pub async fn migrate(&self, migrations_dir: PathBuf) -> Result<usize> {
        self.db
            .with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
            .await
    }

    fn page(&self, limit: Option<usize>, cursor: Option<String>) -> PageRequest {
        PageRequest::new(self.pagination.clamp(limit), cursor)
    }

    // Terms

    pub async fn create_term(&self, tenant: TenantId, new: NewTerm) -> Result<Term> {
        self.db
            .with_transaction(move |tx| term::create_term(tx, tenant, new))
            .await
    }

    pub async fn get_term(&self, tenant: TenantId, id: Uuid) -> Result<Term> {
        self.db.with_connection(move |conn| term::get_term(conn, tenant, id)).await
    }

    pub async fn update_term(&self, tenant: TenantId, id: Uuid, update: TermUpdate) -> Result<Term> {
        self.db
            .with_transaction(move |tx| term::update_term(tx, tenant, id, update))
            .await
    }

    pub async fn list_terms(
        &self,
        tenant: TenantId,
        filter: TermFilter,
        limit: Option<usize>,
        cursor: Option<String>,
    ) -> Result<Page<Term>> {
        let page = self.page(limit, cursor);
        self.db
            .with_connection(move |conn| term::list_terms(conn, tenant, &filter, &page))
            .await
    }

    // Relations

    pub async fn add_relation(
        &self,
        tenant: TenantId,
        term_id: Uuid,
        viewpoint: Viewpoint,
        target_id: Uuid,
    ) -> Result<Relation> {
        self.db
            .with_transaction(move |tx| graph::add_relation(tx, tenant, term_id, viewpoint, target_id))
            .await
    }

    pub async fn delete_relation(&self, tenant: TenantId, term_id: Uuid, relation_id: Uuid) -> Result<Relation> {
        self.db
            .with_transaction(move |tx| graph::delete_relation(tx, tenant, term_id, relation_id))
            .await
    }

    pub async fn relations_for_term(&self, tenant: TenantId, term_id: Uuid) -> Result<Vec<TermRelation>> {
        self.db
            .with_connection(move |conn| graph::relations_for_term(conn, tenant, term_id))
            .await
    }

    // Traversal

    pub async fn roots(
        &self,
        tenant: TenantId,
        scope: VocabularyScope,
        limit: Option<usize>,
        cursor: Option<String>,
    ) -> Result<Page<HierarchyNode>> {
        let page = self.page(limit, cursor);
        self.db
            .with_connection(move |conn| graph::roots(conn, tenant, &scope, &page))
            .await
    }

    pub async fn children(
        &self,
        tenant: TenantId,
        term_id: Uuid,
        limit: Option<usize>,
        cursor: Option<String>,
    ) -> Result<Page<HierarchyNode>> {
        let page = self.page(limit, cursor);
        self.db
            .with_connection(move |conn| graph::children(conn, tenant, term_id, &page))
            .await
    }

    pub async fn ancestors(
        &self,
        tenant: TenantId,
        term_id: Uuid,
        depth: Option<usize>,
        max_paths: Option<usize>,
    ) -> Result<AncestorsResult> {
        let limits = self.limits.clone();
        let query = AncestorsQuery {
            depth: depth.unwrap_or(limits.max_depth),
            max_paths: max_paths.unwrap_or(limits.default_max_paths),
        };
        self.db
            .with_connection(move |conn| graph::ancestors(conn, tenant, term_id, &query, &limits))
            .await
    }

    pub async fn graph(
        &self,
        tenant: TenantId,
        term_id: Uuid,
        direction: Direction,
        depth: Option<usize>,
        max_nodes: Option<usize>,
        max_edges: Option<usize>,
    ) -> Result<GraphResult> {
        let limits = self.limits.clone();
        let query = GraphQuery {
            direction,
            depth: depth.unwrap_or(3),
            max_nodes: max_nodes.unwrap_or(limits.graph_max_nodes),
            max_edges: max_edges.unwrap_or(limits.graph_max_edges),
        };
        self.db
            .with_connection(move |conn| graph::graph(conn, tenant, term_id, &query, &limits))
            .await
    }

    pub async fn expand(
        &self,
        tenant: TenantId,
        term_id: Uuid,
        include: ExpandInclude,
        depth: Option<usize>,
    ) -> Result<ExpandResult> {
        let limits = self.limits.clone();
        let depth = depth.unwrap_or(1);
        self.db
            .with_connection(move |conn| graph::expand(conn, tenant, term_id, &include, depth, &limits))
            .await
    }

    // Governance

    pub async fn report(
        &self,
        tenant: TenantId,
        scope: VocabularyScope,
        kind: ReportKind,
        limit: Option<usize>,
        cursor: Option<String>,
    ) -> Result<Page<ReportEntry>> {
        let page = self.page(limit, cursor);
        let linkage = Arc::clone(&self.linkage);
        self.db
            .with_connection(move |conn| governance::report(conn, tenant, &scope, kind, &page, linkage.as_ref()))
            .await
    }

    pub async fn merge(
        &self,
        tenant: TenantId,
        source_id: Uuid,
        target_id: Uuid,
        mode: MergeMode,
        options: MergeOptions,
    ) -> Result<MergeResult> {
        let linkage = Arc::clone(&self.linkage);
        let audit = Arc::clone(&self.audit);
        self.db
            .with_connection(move |conn| {
                governance::merge(conn, tenant, source_id, target_id, mode, &options, linkage.as_ref(), audit.as_ref())
            })
            .await
    }

    // Bulk

    pub async fn export_csv(&self, tenant: TenantId, scope: VocabularyScope) -> Result<Vec<u8>> {
        self.db
            .with_connection(move |conn| bulk::export_csv(conn, tenant, &scope))
            .await
    }

    pub async fn import_csv(
        &self,
        tenant: TenantId,
        scope: VocabularyScope,
        data: Vec<u8>,
        mode: ImportMode,
    ) -> Result<ImportReport> {
        let audit = Arc::clone(&self.audit);
        self.db
            .with_connection(move |conn| bulk::import_csv(conn, tenant, &scope, &data, mode, audit.as_ref()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ThesaurusError;
    use crate::term::TermKind;
    use crate::test_support::{migrations_dir, temp_db};
    use tempfile::TempDir;

    async fn service() -> (Thesaurus, TempDir) {
        let (db, dir) = temp_db().await;
        (Thesaurus::new(db), dir)
    }

    fn lcsh() -> VocabularyScope {
        VocabularyScope::new(TermKind::Subject, "lcsh")
    }

    async fn subject(svc: &Thesaurus, t: TenantId, label: &str) -> Term {
        svc.create_term(t, NewTerm::new(TermKind::Subject, "lcsh", label)).await.unwrap()
    }

    #[tokio::test]
    async fn test_hierarchy_scenario_end_to_end() {
        let (svc, _dir) = service().await;
        let t = TenantId(Uuid::new_v4());
        let a = subject(&svc, t, "A").await;
        let b = subject(&svc, t, "B").await;
        let c = subject(&svc, t, "C").await;

        svc.add_relation(t, a.id, Viewpoint::Broader, b.id).await.unwrap();
        svc.add_relation(t, b.id, Viewpoint::Broader, c.id).await.unwrap();
        let err = svc.add_relation(t, c.id, Viewpoint::Broader, a.id).await.unwrap_err();
        assert!(matches!(err, ThesaurusError::WouldCreateCycle { .. }));

        let roots = svc.roots(t, lcsh(), None, None).await.unwrap();
        assert_eq!(roots.items.iter().map(|n| n.id).collect::<Vec<_>>(), vec![c.id]);

        let kids = svc.children(t, c.id, None, None).await.unwrap();
        assert_eq!(kids.items.iter().map(|n| n.id).collect::<Vec<_>>(), vec![b.id]);

        let result = svc.ancestors(t, a.id, Some(5), None).await.unwrap();
        assert_eq!(result.paths.len(), 1);
        let ids: Vec<Uuid> = result.paths[0].nodes.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![c.id, b.id, a.id]);
        assert!(result.paths[0].is_complete);

        let expanded = svc
            .expand(t, c.id, ExpandInclude::parse(&["self", "narrower"]).unwrap(), Some(5))
            .await
            .unwrap();
        assert_eq!(expanded.labels, vec!["C", "B", "A"]);
    }

    #[tokio::test]
    async fn test_concurrent_inverse_edges_cannot_both_land() {
        let (svc, _dir) = service().await;
        let t = TenantId(Uuid::new_v4());
        let a = subject(&svc, t, "A").await;
        let b = subject(&svc, t, "B").await;

        let (first, second) = tokio::join!(
            svc.add_relation(t, a.id, Viewpoint::Broader, b.id),
            svc.add_relation(t, b.id, Viewpoint::Broader, a.id),
        );
        assert_eq!(first.is_ok() as u8 + second.is_ok() as u8, 1);
        let failed = first.err().or(second.err()).unwrap();
        assert!(matches!(failed, ThesaurusError::WouldCreateCycle { .. }));
    }

    #[tokio::test]
    async fn test_merge_preview_matches_apply() {
        let (svc, _dir) = service().await;
        let t = TenantId(Uuid::new_v4());
        let source = subject(&svc, t, "Automobiles").await;
        let target = subject(&svc, t, "Cars").await;
        let parent = subject(&svc, t, "Vehicles").await;
        svc.add_relation(t, source.id, Viewpoint::Broader, parent.id).await.unwrap();

        let preview = svc
            .merge(t, source.id, target.id, MergeMode::Preview, MergeOptions::default())
            .await
            .unwrap();
        let applied = svc
            .merge(t, source.id, target.id, MergeMode::Apply, MergeOptions::default())
            .await
            .unwrap();
        assert_eq!(preview.summary, applied.summary);
        assert_eq!(applied.summary.relations_moved, 1);

        let source_after = svc.get_term(t, source.id).await.unwrap();
        assert!(!source_after.is_active());
    }

    #[tokio::test]
    async fn test_export_import_cycle() {
        let (svc, _dir) = service().await;
        let t = TenantId(Uuid::new_v4());
        let empty = svc.export_csv(t, lcsh()).await.unwrap();
        assert_eq!(empty, svc.export_csv(t, lcsh()).await.unwrap());
        assert!(empty.starts_with("\u{FEFF}relation_id,".as_bytes()));

        let a = subject(&svc, t, "A").await;
        let b = subject(&svc, t, "B").await;
        let data = format!("from_term_id,to_term_id,relation_type\n{},{},broader\n", a.id, b.id).into_bytes();

        let first = svc.import_csv(t, lcsh(), data.clone(), ImportMode::Apply).await.unwrap();
        assert_eq!(first.create_count, 1);
        let again = svc.import_csv(t, lcsh(), data, ImportMode::Apply).await.unwrap();
        assert_eq!(again.create_count, 0);
        assert_eq!(again.skip_existing_count, again.total_rows);

        let exported = String::from_utf8(svc.export_csv(t, lcsh()).await.unwrap()).unwrap();
        assert_eq!(exported.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent_through_service() {
        let (svc, _dir) = service().await;
        assert_eq!(svc.migrate(migrations_dir()).await.unwrap(), 0);
    }
}
