//! Flat in-memory view of a bounded slice of the broader hierarchy.
//!
//! Traversal loads edges level by level into a `TermArena` and then walks integer
//! indices instead of ids.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct TermArena {
    ids: Vec<Uuid>,
    index: HashMap<Uuid, usize>,
    /// node -> broader nodes
    up: Vec<Vec<usize>>,
    /// node -> narrower nodes
    down: Vec<Vec<usize>>,
    edges: HashSet<(usize, usize)>,
}

impl TermArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `id`, adding it if unseen
    pub fn intern(&mut self, id: Uuid) -> usize {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.ids.len();
        self.ids.push(id);
        self.index.insert(id, idx);
        self.up.push(Vec::new());
        self.down.push(Vec::new());
        idx
    }

    pub fn get(&self, id: &Uuid) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.index.contains_key(id)
    }

    pub fn id(&self, idx: usize) -> Uuid {
        self.ids[idx]
    }

    pub fn ids(&self) -> &[Uuid] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Record `child` broader `parent`. Returns false if the edge was already known.
    pub fn add_broader(&mut self, child: usize, parent: usize) -> bool {
        if !self.edges.insert((child, parent)) {
            return false;
        }
        self.up[child].push(parent);
        self.down[parent].push(child);
        true
    }

    pub fn parents(&self, idx: usize) -> &[usize] {
        &self.up[idx]
    }

    pub fn children(&self, idx: usize) -> &[usize] {
        &self.down[idx]
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Known edges as `(child, parent)` index pairs
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.up
            .iter()
            .enumerate()
            .flat_map(|(child, parents)| parents.iter().map(move |&parent| (child, parent)))
    }
}
