//! Read-only bounded queries over the broader hierarchy.
//!
//! Nothing here mutates, and nothing here fails because a graph is too big: every
//! walk is bounded by depth and size caps and reports `truncated` when one of them bites.

use std::collections::{HashSet, VecDeque};

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::arena::TermArena;
use crate::config::TraversalLimits;
use crate::db::{placeholders, IN_CHUNK};
use crate::error::{Result, ThesaurusError};
use crate::pagination::{Cursor, CursorKind, Page, PageRequest};
use crate::term::{get_term, get_terms, TenantId, TermStatus, TermSummary, VocabularyScope};

/// A term in a hierarchy listing, with enough counts to drive lazy expansion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HierarchyNode {
    pub id: Uuid,
    pub preferred_label: String,
    pub status: TermStatus,
    /// Number of parents; more than one means polyhierarchy
    pub broader_count: i64,
    pub narrower_count: i64,
    pub has_children: bool,
}

const NODE_SELECT: &str = r#"
    SELECT t.id, t.preferred_label, t.status,
        (SELECT COUNT(*) FROM authority_relations b
         WHERE b.tenant_id = t.tenant_id AND b.from_term_id = t.id AND b.relation_type = 'broader'),
        (SELECT COUNT(*) FROM authority_relations n
         WHERE n.tenant_id = t.tenant_id AND n.to_term_id = t.id AND n.relation_type = 'broader')
    FROM authority_terms t
"#;

fn node_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HierarchyNode> {
    let narrower_count: i64 = row.get(4)?;
    Ok(HierarchyNode {
        id: crate::db::parse_column(row, 0)?,
        preferred_label: row.get(1)?,
        status: crate::db::parse_column(row, 2)?,
        broader_count: row.get(3)?,
        narrower_count,
        has_children: narrower_count > 0,
    })
}

/// Run a node query with an optional `(preferred_label, id)` keyset condition appended
fn node_page(
    conn: &Connection,
    mut sql: String,
    mut values: Vec<String>,
    page: &PageRequest,
) -> Result<Page<HierarchyNode>> {
    if let Some(cursor) = page.decode_cursor(CursorKind::Label)? {
        sql.push_str(" AND (t.preferred_label > ? OR (t.preferred_label = ? AND t.id > ?))");
        values.push(cursor.sort_key.clone());
        values.push(cursor.sort_key);
        values.push(cursor.id.to_string());
    }
    sql.push_str(&format!(" ORDER BY t.preferred_label, t.id LIMIT {}", page.fetch_limit()));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(values), node_from_row)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(Page::from_overfetch(rows, page.limit, |n| Cursor::label(n.preferred_label.clone(), n.id)))
}

/// Active terms of a scope with no broader edge
pub fn roots(conn: &Connection, tenant: TenantId, scope: &VocabularyScope, page: &PageRequest) -> Result<Page<HierarchyNode>> {
    let sql = format!(
        "{} WHERE t.tenant_id = ? AND t.kind = ? AND t.vocabulary_code = ? AND t.status = 'active' \
         AND NOT EXISTS (SELECT 1 FROM authority_relations r \
             WHERE r.tenant_id = t.tenant_id AND r.from_term_id = t.id AND r.relation_type = 'broader')",
        NODE_SELECT
    );
    let values = vec![tenant.to_string(), scope.kind.as_str().to_string(), scope.vocabulary_code.clone()];
    node_page(conn, sql, values, page)
}

/// Direct narrower terms of `term_id`
pub fn children(conn: &Connection, tenant: TenantId, term_id: Uuid, page: &PageRequest) -> Result<Page<HierarchyNode>> {
    get_term(conn, tenant, term_id)?;
    let sql = format!(
        "{} JOIN authority_relations r ON r.tenant_id = t.tenant_id AND r.from_term_id = t.id \
         WHERE r.tenant_id = ? AND r.to_term_id = ? AND r.relation_type = 'broader'",
        NODE_SELECT
    );
    node_page(conn, sql, vec![tenant.to_string(), term_id.to_string()], page)
}

/// Which way to walk the broader hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ancestors,
    Descendants,
}

impl FromStr for Direction {
    type Err = ThesaurusError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ancestors" | "up" => Ok(Direction::Ancestors),
            "descendants" | "down" => Ok(Direction::Descendants),
            other => Err(ThesaurusError::InvalidInput(format!(
                "direction must be ancestors or descendants, got: {}",
                other
            ))),
        }
    }
}

/// Broader edges leaving `ids` in the walk direction, as `(near, far)` pairs
fn level_edges(conn: &Connection, tenant: TenantId, ids: &[Uuid], direction: Direction) -> Result<Vec<(Uuid, Uuid)>> {
    let (near_col, far_col) = match direction {
        Direction::Ancestors => ("from_term_id", "to_term_id"),
        Direction::Descendants => ("to_term_id", "from_term_id"),
    };

    let mut out = Vec::new();
    for chunk in ids.chunks(IN_CHUNK) {
        let sql = format!(
            "SELECT {near}, {far} FROM authority_relations \
             WHERE tenant_id = ? AND relation_type = 'broader' AND {near} IN ({}) \
             ORDER BY {near}, {far}",
            placeholders(chunk.len()),
            near = near_col,
            far = far_col
        );
        let mut values = Vec::with_capacity(chunk.len() + 1);
        values.push(tenant.to_string());
        values.extend(chunk.iter().map(|id| id.to_string()));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values), |row| {
            Ok((crate::db::parse_column::<Uuid>(row, 0)?, crate::db::parse_column::<Uuid>(row, 1)?))
        })?;
        for row in rows {
            out.push(row?);
        }
    }
    Ok(out)
}

/// Depth-bounded closure loaded into an arena
struct Walk {
    arena: TermArena,
    /// Nodes with edges that were not loaded, either past the depth bound or past the node cap
    cut: HashSet<usize>,
    truncated: bool,
}

/// Breadth-first closure from `seed`, one batched query per level. The arena's
/// insertion order is BFS order, so `arena.ids()[0]` is the seed.
fn walk(
    conn: &Connection,
    tenant: TenantId,
    seed: Uuid,
    direction: Direction,
    depth: usize,
    max_nodes: usize,
    probe_cut: bool,
) -> Result<Walk> {
    let mut arena = TermArena::new();
    arena.intern(seed);
    let mut cut = HashSet::new();
    let mut truncated = false;
    let mut frontier = vec![seed];

    for level in 0..=depth {
        if frontier.is_empty() {
            break;
        }
        let edges = level_edges(conn, tenant, &frontier, direction)?;
        if level == depth {
            if probe_cut {
                cut.extend(edges.iter().filter_map(|(near, _)| arena.get(near)));
            }
            break;
        }

        let mut next = Vec::new();
        for (near, far) in edges {
            let Some(near_idx) = arena.get(&near) else { continue };
            let far_idx = match arena.get(&far) {
                Some(idx) => idx,
                None if arena.len() >= max_nodes => {
                    truncated = true;
                    if probe_cut {
                        cut.insert(near_idx);
                    }
                    continue;
                }
                None => {
                    next.push(far);
                    arena.intern(far)
                }
            };
            match direction {
                Direction::Ancestors => arena.add_broader(near_idx, far_idx),
                Direction::Descendants => arena.add_broader(far_idx, near_idx),
            };
        }
        frontier = next;
    }

    Ok(Walk { arena, cut, truncated })
}

fn summaries(conn: &Connection, tenant: TenantId, ids: &[Uuid]) -> Result<Vec<TermSummary>> {
    let terms = get_terms(conn, tenant, ids)?;
    Ok(ids.iter().filter_map(|id| terms.get(id)).map(|t| t.summary()).collect())
}

/// Parameters for [`ancestors`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AncestorsQuery {
    pub depth: usize,
    pub max_paths: usize,
}

/// One root-to-term breadcrumb
#[derive(Debug, Clone, Serialize)]
pub struct AncestorPath {
    /// Topmost node first, the queried term last
    pub nodes: Vec<TermSummary>,
    /// True when the topmost node has no broader edges at all
    pub is_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AncestorsResult {
    pub term: TermSummary,
    pub depth: usize,
    pub paths: Vec<AncestorPath>,
    pub truncated: bool,
}

/// Enumerate shortest-first breadcrumbs from the hierarchy tops down to `term_id`.
///
/// Phase one loads the ancestor closure within `depth` hops. Phase two runs a BFS
/// over partial paths inside that closure, stopping at `max_paths` results or when
/// the explored-state budget is spent.
pub fn ancestors(
    conn: &Connection,
    tenant: TenantId,
    term_id: Uuid,
    query: &AncestorsQuery,
    limits: &TraversalLimits,
) -> Result<AncestorsResult> {
    let term = get_term(conn, tenant, term_id)?;
    let depth = query.depth.min(limits.max_depth);
    let max_paths = query.max_paths.clamp(1, limits.max_paths_limit.max(1));
    let max_states = limits.max_explored_states.max(1);

    let Walk { arena, cut, mut truncated } =
        walk(conn, tenant, term.id, Direction::Ancestors, depth, max_states, true)?;

    let mut index_paths: Vec<(Vec<usize>, bool)> = Vec::new();
    let mut queue: VecDeque<Vec<usize>> = VecDeque::new();
    queue.push_back(vec![0]);
    let mut explored = 1usize;

    'bfs: while let Some(path) = queue.pop_front() {
        let Some(&node) = path.last() else { continue };
        let parents = arena.parents(node);

        if parents.is_empty() {
            let is_complete = !cut.contains(&node);
            if !is_complete {
                truncated = true;
            }
            index_paths.push((path, is_complete));
            if index_paths.len() >= max_paths {
                // Every queued partial path still ends at some top
                if !queue.is_empty() {
                    truncated = true;
                }
                break;
            }
            continue;
        }

        for &parent in parents {
            if path.contains(&parent) {
                continue;
            }
            if explored >= max_states {
                truncated = true;
                break 'bfs;
            }
            explored += 1;
            let mut next = path.clone();
            next.push(parent);
            queue.push_back(next);
        }
    }

    let terms = get_terms(conn, tenant, arena.ids())?;
    let paths = index_paths
        .into_iter()
        .map(|(path, is_complete)| AncestorPath {
            nodes: path
                .iter()
                .rev()
                .filter_map(|&idx| terms.get(&arena.id(idx)))
                .map(|t| t.summary())
                .collect(),
            is_complete,
        })
        .collect();

    Ok(AncestorsResult { term: term.summary(), depth, paths, truncated })
}

/// Parameters for [`graph`]; sizes are clamped to the configured caps
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GraphQuery {
    pub direction: Direction,
    pub depth: usize,
    pub max_nodes: usize,
    pub max_edges: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub relation_id: Uuid,
    pub from_term_id: Uuid,
    pub to_term_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphResult {
    pub root: Uuid,
    pub direction: Direction,
    pub nodes: Vec<TermSummary>,
    pub edges: Vec<GraphEdge>,
    pub truncated: bool,
}

/// Bounded subgraph around `term_id` for visualization: the depth-limited closure in
/// one direction plus every broader edge with both endpoints inside it.
pub fn graph(
    conn: &Connection,
    tenant: TenantId,
    term_id: Uuid,
    query: &GraphQuery,
    limits: &TraversalLimits,
) -> Result<GraphResult> {
    get_term(conn, tenant, term_id)?;
    let depth = query.depth.min(limits.max_depth);
    let max_nodes = query.max_nodes.clamp(1, limits.graph_max_nodes.max(1));
    let max_edges = query.max_edges.min(limits.graph_max_edges);

    let Walk { arena, mut truncated, .. } =
        walk(conn, tenant, term_id, query.direction, depth, max_nodes, false)?;

    let mut edges = Vec::new();
    for chunk in arena.ids().chunks(IN_CHUNK) {
        let sql = format!(
            "SELECT id, from_term_id, to_term_id FROM authority_relations \
             WHERE tenant_id = ? AND relation_type = 'broader' AND from_term_id IN ({})",
            placeholders(chunk.len())
        );
        let mut values = Vec::with_capacity(chunk.len() + 1);
        values.push(tenant.to_string());
        values.extend(chunk.iter().map(|id| id.to_string()));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values), |row| {
            Ok(GraphEdge {
                relation_id: crate::db::parse_column(row, 0)?,
                from_term_id: crate::db::parse_column(row, 1)?,
                to_term_id: crate::db::parse_column(row, 2)?,
            })
        })?;
        for row in rows {
            let edge = row?;
            if arena.contains(&edge.to_term_id) {
                edges.push(edge);
            }
        }
    }
    edges.sort_by(|a, b| (a.from_term_id, a.to_term_id).cmp(&(b.from_term_id, b.to_term_id)));
    if edges.len() > max_edges {
        edges.truncate(max_edges);
        truncated = true;
    }

    Ok(GraphResult {
        root: term_id,
        direction: query.direction,
        nodes: summaries(conn, tenant, arena.ids())?,
        edges,
        truncated,
    })
}

/// What [`expand`] folds into the result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandInclude {
    #[serde(rename = "self")]
    pub self_term: bool,
    pub variants: bool,
    pub broader: bool,
    pub narrower: bool,
    pub related: bool,
}

impl ExpandInclude {
    pub fn none() -> Self {
        Self { self_term: false, variants: false, broader: false, narrower: false, related: false }
    }

    /// Parse a list such as `["self", "variants", "narrower"]`
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut include = Self::none();
        for name in names {
            match name.as_ref().trim().to_ascii_lowercase().as_str() {
                "self" => include.self_term = true,
                "variants" => include.variants = true,
                "broader" => include.broader = true,
                "narrower" => include.narrower = true,
                "related" => include.related = true,
                other => {
                    return Err(ThesaurusError::InvalidInput(format!("unknown expand include: {}", other)))
                }
            }
        }
        Ok(include)
    }
}

impl Default for ExpandInclude {
    fn default() -> Self {
        Self { self_term: true, variants: true, broader: false, narrower: true, related: false }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpandResult {
    pub term: TermSummary,
    /// Deduplicated labels, seed first, then broader, narrower, related
    pub labels: Vec<String>,
    /// Ids of the terms whose preferred labels are in `labels`
    pub term_ids: Vec<Uuid>,
    pub truncated: bool,
}

/// Query expansion around one term. Hierarchy hops go up to `depth` levels; `related`
/// only ever goes one hop from the seed. Inactive neighbours are skipped.
pub fn expand(
    conn: &Connection,
    tenant: TenantId,
    term_id: Uuid,
    include: &ExpandInclude,
    depth: usize,
    limits: &TraversalLimits,
) -> Result<ExpandResult> {
    let seed = get_term(conn, tenant, term_id)?;
    let depth = depth.min(limits.expand_max_depth);
    let max_terms = limits.expand_max_terms.max(1);
    let mut truncated = false;

    let mut candidates: Vec<Uuid> = Vec::new();
    for (wanted, direction) in [(include.broader, Direction::Ancestors), (include.narrower, Direction::Descendants)] {
        if !wanted {
            continue;
        }
        let w = walk(conn, tenant, seed.id, direction, depth, max_terms + 1, false)?;
        truncated |= w.truncated;
        candidates.extend(w.arena.ids().iter().skip(1));
    }
    if include.related {
        let mut stmt = conn.prepare(
            "SELECT CASE WHEN from_term_id = ?2 THEN to_term_id ELSE from_term_id END \
             FROM authority_relations \
             WHERE tenant_id = ?1 AND relation_type = 'related' AND (from_term_id = ?2 OR to_term_id = ?2) \
             ORDER BY 1",
        )?;
        let rows = stmt.query_map(params![tenant.to_string(), seed.id.to_string()], |row| {
            crate::db::parse_column::<Uuid>(row, 0)
        })?;
        for row in rows {
            candidates.push(row?);
        }
    }

    let mut labels = Vec::new();
    let mut term_ids = Vec::new();
    let mut seen_labels = HashSet::new();
    let mut seen_ids = HashSet::new();

    if include.self_term {
        seen_ids.insert(seed.id);
        term_ids.push(seed.id);
        if seen_labels.insert(seed.preferred_label.clone()) {
            labels.push(seed.preferred_label.clone());
        }
    }
    if include.variants {
        for variant in &seed.variant_labels {
            if seen_labels.insert(variant.clone()) {
                labels.push(variant.clone());
            }
        }
    }

    let terms = get_terms(conn, tenant, &candidates)?;
    for id in candidates {
        if id == seed.id || !seen_ids.insert(id) {
            continue;
        }
        let Some(term) = terms.get(&id).filter(|t| t.is_active()) else { continue };
        if term_ids.len() >= max_terms {
            truncated = true;
            break;
        }
        term_ids.push(id);
        if seen_labels.insert(term.preferred_label.clone()) {
            labels.push(term.preferred_label.clone());
        }
    }

    Ok(ExpandResult { term: seed.summary(), labels, term_ids, truncated })
}
