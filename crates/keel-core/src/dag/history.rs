//! In-memory version history of one item.
//!
//! Nodes are version ids plus the sentinel [`ROOT_ID`]. Edges are
//! [`VersionSuccessor`] records, indexed by their own id, with parent and
//! child adjacency kept alongside. Nothing here touches storage; the
//! [`super::engine`] functions rebuild a history from successor links and
//! write its changes back.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

/// Synthetic parent of every item's first version(s).
pub const ROOT_ID: i64 = 0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DagError {
    #[error("parent version {parent_id} is not in the history of item {item_id}")]
    UnknownParent { item_id: i64, parent_id: i64 },

    #[error("truncation height must be at least 1, got {0}")]
    InvalidHeight(usize),
}

/// One edge: `from_id` is the immediate predecessor of `to_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionSuccessor {
    pub id: i64,
    pub from_id: i64,
    pub to_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionHistoryDag {
    item_id: i64,
    edges: BTreeMap<i64, VersionSuccessor>,
    children: BTreeMap<i64, BTreeSet<i64>>,
    parents: BTreeMap<i64, BTreeSet<i64>>,
}

/// What [`VersionHistoryDag::plan_truncation`] decided.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TruncationPlan {
    /// Edges to discard.
    pub removed: Vec<VersionSuccessor>,
    /// Versions that lose every inbound edge and must hang off the root.
    pub rerooted: Vec<i64>,
    /// Versions inside the kept window.
    pub retained: BTreeSet<i64>,
}

impl VersionHistoryDag {
    #[must_use]
    pub fn new(item_id: i64) -> Self {
        Self {
            item_id,
            ..Self::default()
        }
    }

    pub fn from_successors(item_id: i64, edges: impl IntoIterator<Item = VersionSuccessor>) -> Self {
        let mut dag = Self::new(item_id);
        for edge in edges {
            dag.add_successor(edge);
        }
        dag
    }

    #[must_use]
    pub const fn item_id(&self) -> i64 {
        self.item_id
    }

    /// `true` while the item has no versions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Record an edge. Re-adding a known edge id is a no-op.
    pub fn add_successor(&mut self, edge: VersionSuccessor) {
        if self.edges.contains_key(&edge.id) {
            return;
        }
        self.edges.insert(edge.id, edge);
        self.children.entry(edge.from_id).or_default().insert(edge.to_id);
        self.parents.entry(edge.to_id).or_default().insert(edge.from_id);
    }

    fn remove_successor(&mut self, edge_id: i64) {
        let Some(edge) = self.edges.remove(&edge_id) else {
            return;
        };
        // Parallel edges between the same pair keep the adjacency entry.
        let still_linked = self
            .edges
            .values()
            .any(|e| e.from_id == edge.from_id && e.to_id == edge.to_id);
        if !still_linked {
            if let Some(kids) = self.children.get_mut(&edge.from_id) {
                kids.remove(&edge.to_id);
            }
            if let Some(ups) = self.parents.get_mut(&edge.to_id) {
                ups.remove(&edge.from_id);
            }
        }
    }

    #[must_use]
    pub fn edge_ids(&self) -> Vec<i64> {
        self.edges.keys().copied().collect()
    }

    pub fn successors(&self) -> impl Iterator<Item = &VersionSuccessor> {
        self.edges.values()
    }

    /// Every version id with at least one inbound edge, ascending.
    #[must_use]
    pub fn versions(&self) -> BTreeSet<i64> {
        self.edges.values().map(|e| e.to_id).collect()
    }

    /// The root is always present; other ids need an inbound edge.
    #[must_use]
    pub fn contains(&self, version_id: i64) -> bool {
        version_id == ROOT_ID || self.parents.get(&version_id).is_some_and(|p| !p.is_empty())
    }

    /// Versions with no outgoing edge, ascending. Never includes the root.
    #[must_use]
    pub fn leaves(&self) -> Vec<i64> {
        self.versions()
            .into_iter()
            .filter(|id| self.children.get(id).is_none_or(BTreeSet::is_empty))
            .collect()
    }

    #[must_use]
    pub fn parents_of(&self, version_id: i64) -> Vec<i64> {
        self.parents
            .get(&version_id)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn children_of(&self, version_id: i64) -> Vec<i64> {
        self.children
            .get(&version_id)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Normalize a parent list for a new version.
    ///
    /// An empty list means "first version" and becomes `[ROOT_ID]`.
    /// Duplicates are collapsed, keeping first-seen order.
    ///
    /// # Errors
    ///
    /// Returns [`DagError::UnknownParent`] for an id not in this history.
    pub fn check_parents(&self, parent_ids: &[i64]) -> Result<Vec<i64>, DagError> {
        if parent_ids.is_empty() {
            return Ok(vec![ROOT_ID]);
        }
        let mut seen = BTreeSet::new();
        let mut parents = Vec::with_capacity(parent_ids.len());
        for &parent_id in parent_ids {
            if !self.contains(parent_id) {
                return Err(DagError::UnknownParent {
                    item_id: self.item_id,
                    parent_id,
                });
            }
            if seen.insert(parent_id) {
                parents.push(parent_id);
            }
        }
        Ok(parents)
    }

    /// Decide which edges go so only `height` generations remain behind
    /// each leaf.
    ///
    /// A version is retained if it is at most `height - 1` parent steps
    /// from some leaf. An edge survives only if both ends are retained (or
    /// it comes from the root). A retained version left with no inbound
    /// edge is re-rooted.
    ///
    /// # Errors
    ///
    /// Returns [`DagError::InvalidHeight`] when `height` is 0.
    pub fn plan_truncation(&self, height: usize) -> Result<TruncationPlan, DagError> {
        if height == 0 {
            return Err(DagError::InvalidHeight(height));
        }

        let mut retained = BTreeSet::new();
        let mut queue: VecDeque<(i64, usize)> =
            self.leaves().into_iter().map(|leaf| (leaf, 0)).collect();
        while let Some((id, depth)) = queue.pop_front() {
            if !retained.insert(id) || depth + 1 >= height {
                continue;
            }
            for parent in self.parents_of(id) {
                if parent != ROOT_ID && !retained.contains(&parent) {
                    queue.push_back((parent, depth + 1));
                }
            }
        }

        let mut removed = Vec::new();
        let mut anchored = BTreeSet::new();
        for edge in self.edges.values() {
            let keep = retained.contains(&edge.to_id)
                && (edge.from_id == ROOT_ID || retained.contains(&edge.from_id));
            if keep {
                anchored.insert(edge.to_id);
            } else {
                removed.push(*edge);
            }
        }

        let rerooted = retained
            .iter()
            .copied()
            .filter(|id| !anchored.contains(id))
            .collect();

        Ok(TruncationPlan {
            removed,
            rerooted,
            retained,
        })
    }

    /// Apply `plan`, using `new_edge_ids[i]` for the edge re-rooting
    /// `plan.rerooted[i]`.
    pub fn apply_truncation(&mut self, plan: &TruncationPlan, new_edge_ids: &[i64]) {
        for edge in &plan.removed {
            self.remove_successor(edge.id);
        }
        for (&to_id, &id) in plan.rerooted.iter().zip(new_edge_ids) {
            self.add_successor(VersionSuccessor {
                id,
                from_id: ROOT_ID,
                to_id,
            });
        }
    }

    /// Every version reachable from the root.
    #[must_use]
    pub fn reachable_from_root(&self) -> BTreeSet<i64> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([ROOT_ID]);
        while let Some(id) = queue.pop_front() {
            for child in self.children_of(id) {
                if seen.insert(child) {
                    queue.push_back(child);
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(id: i64, from_id: i64, to_id: i64) -> VersionSuccessor {
        VersionSuccessor { id, from_id, to_id }
    }

    fn chain() -> VersionHistoryDag {
        // 0 -> 1 -> 2 -> 3
        VersionHistoryDag::from_successors(
            9,
            [edge(101, 0, 1), edge(102, 1, 2), edge(103, 2, 3)],
        )
    }

    #[test]
    fn empty_history_has_no_leaves() {
        let dag = VersionHistoryDag::new(9);
        assert!(dag.is_empty());
        assert!(dag.leaves().is_empty());
        assert!(dag.contains(ROOT_ID));
        assert!(!dag.contains(1));
    }

    #[test]
    fn two_root_versions_are_two_leaves() {
        let dag = VersionHistoryDag::from_successors(9, [edge(101, 0, 1), edge(102, 0, 2)]);
        assert_eq!(dag.leaves(), vec![1, 2]);
        assert_eq!(dag.children_of(ROOT_ID), vec![1, 2]);
    }

    #[test]
    fn branch_and_merge() {
        let dag = VersionHistoryDag::from_successors(
            9,
            [
                edge(101, 0, 1),
                edge(102, 1, 2),
                edge(103, 1, 3),
                edge(104, 2, 4),
                edge(105, 3, 4),
            ],
        );
        assert_eq!(dag.children_of(1), vec![2, 3]);
        assert_eq!(dag.parents_of(4), vec![2, 3]);
        assert_eq!(dag.leaves(), vec![4]);
    }

    #[test]
    fn readding_an_edge_is_idempotent() {
        let mut dag = chain();
        dag.add_successor(edge(102, 1, 2));
        assert_eq!(dag.edge_ids(), vec![101, 102, 103]);
    }

    #[test]
    fn check_parents_defaults_to_root_and_dedupes() {
        let dag = chain();
        assert_eq!(dag.check_parents(&[]), Ok(vec![ROOT_ID]));
        assert_eq!(dag.check_parents(&[3, 2, 3]), Ok(vec![3, 2]));
        assert_eq!(
            dag.check_parents(&[3, 77]),
            Err(DagError::UnknownParent {
                item_id: 9,
                parent_id: 77
            })
        );
    }

    #[test]
    fn height_one_collapses_to_leaves() {
        let mut dag = VersionHistoryDag::from_successors(9, [edge(101, 0, 1), edge(102, 1, 2)]);
        let plan = dag.plan_truncation(1).expect("plan");
        assert_eq!(plan.removed.len(), 2);
        assert_eq!(plan.rerooted, vec![2]);

        dag.apply_truncation(&plan, &[200]);
        let edges: Vec<_> = dag.successors().copied().collect();
        assert_eq!(edges, vec![edge(200, ROOT_ID, 2)]);
    }

    #[test]
    fn height_two_keeps_one_parent_generation() {
        let mut dag = chain();
        let plan = dag.plan_truncation(2).expect("plan");
        assert_eq!(plan.retained, BTreeSet::from([2, 3]));
        assert_eq!(plan.rerooted, vec![2]);

        dag.apply_truncation(&plan, &[300]);
        assert_eq!(dag.parents_of(2), vec![ROOT_ID]);
        assert_eq!(dag.parents_of(3), vec![2]);
        assert_eq!(dag.leaves(), vec![3]);
    }

    #[test]
    fn tall_height_is_a_no_op() {
        let dag = chain();
        let plan = dag.plan_truncation(10).expect("plan");
        assert!(plan.removed.is_empty());
        assert!(plan.rerooted.is_empty());
    }

    #[test]
    fn root_edge_in_window_is_not_duplicated() {
        // 0 -> 1 -> 2, and 0 -> 2 directly.
        let dag = VersionHistoryDag::from_successors(
            9,
            [edge(101, 0, 1), edge(102, 1, 2), edge(103, 0, 2)],
        );
        let plan = dag.plan_truncation(1).expect("plan");
        assert!(plan.rerooted.is_empty());
        assert_eq!(
            plan.removed.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![101, 102]
        );
    }

    #[test]
    fn zero_height_is_rejected() {
        assert_eq!(chain().plan_truncation(0), Err(DagError::InvalidHeight(0)));
    }
}
