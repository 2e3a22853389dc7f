//! Native graph backend: records are petgraph nodes, links are edges.
//!
//! The whole graph lives in memory. A file-backed store loads a JSON
//! snapshot at open, holds an advisory [`StoreLock`] for its lifetime, and
//! rewrites the snapshot (temp file, then rename) on every commit.
//!
//! Sessions copy the graph at `begin`; `abort`, a failed persist, or a
//! dropped session restores the copy.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{
    Attribute, Backend, EdgeRecord, Fields, Record, Storage, StorageError, StorageResult,
    Transaction, fields, present, record_id,
};
use crate::lock::{DEFAULT_LOCK_TIMEOUT, StoreLock};
use crate::model::Value;

const SNAPSHOT_FORMAT: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Vertex {
    id: i64,
    label: String,
    fields: Fields,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Link {
    label: String,
    fields: Fields,
}

#[derive(Debug, Clone, Default)]
struct GraphState {
    graph: StableDiGraph<Vertex, Link>,
    index: HashMap<i64, NodeIndex>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotLink {
    from_id: i64,
    to_id: i64,
    label: String,
    fields: Fields,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    format: u32,
    vertices: Vec<Vertex>,
    links: Vec<SnapshotLink>,
}

impl GraphState {
    fn vertex(&self, id: i64) -> Option<&Vertex> {
        self.index
            .get(&id)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    fn vertex_id(&self, idx: NodeIndex) -> Option<i64> {
        self.graph.node_weight(idx).map(|v| v.id)
    }

    /// Vertices that may match `attributes`, narrowed by `id` when present.
    fn candidates(&self, attributes: &[Attribute]) -> Vec<&Vertex> {
        let by_id = present(attributes)
            .find(|(field, _)| *field == fields::ID)
            .and_then(|(_, value)| value.as_long());
        match by_id {
            Some(id) => self.vertex(id).into_iter().collect(),
            None => self
                .graph
                .node_indices()
                .filter_map(|idx| self.graph.node_weight(idx))
                .collect(),
        }
    }

    fn edge_record(&self, edge: EdgeIndex) -> Option<EdgeRecord> {
        let (from, to) = self.graph.edge_endpoints(edge)?;
        let link = self.graph.edge_weight(edge)?;
        Some(EdgeRecord {
            label: link.label.clone(),
            from_id: self.vertex_id(from)?,
            to_id: self.vertex_id(to)?,
            fields: link.fields.clone(),
        })
    }

    fn matching_edges(&self, label: &str, attributes: &[Attribute]) -> Vec<EdgeIndex> {
        self.graph
            .edge_indices()
            .filter(|&edge| {
                self.graph
                    .edge_weight(edge)
                    .is_some_and(|link| link.label == label && link.fields.matches(attributes))
            })
            .collect()
    }

    fn to_snapshot(&self) -> Snapshot {
        let vertices = self
            .graph
            .node_indices()
            .filter_map(|idx| self.graph.node_weight(idx).cloned())
            .collect();
        let links = self
            .graph
            .edge_indices()
            .filter_map(|edge| self.edge_record(edge))
            .map(|edge| SnapshotLink {
                from_id: edge.from_id,
                to_id: edge.to_id,
                label: edge.label,
                fields: edge.fields,
            })
            .collect();
        Snapshot {
            format: SNAPSHOT_FORMAT,
            vertices,
            links,
        }
    }

    fn from_snapshot(snapshot: Snapshot) -> StorageResult<Self> {
        let mut state = Self::default();
        for vertex in snapshot.vertices {
            let id = vertex.id;
            if state.index.contains_key(&id) {
                return Err(StorageError::DuplicateId(id));
            }
            let idx = state.graph.add_node(vertex);
            state.index.insert(id, idx);
        }
        for link in snapshot.links {
            let (Some(&from), Some(&to)) = (state.index.get(&link.from_id), state.index.get(&link.to_id))
            else {
                return Err(StorageError::Snapshot(serde::de::Error::custom(format!(
                    "link {} -> {} references a missing record",
                    link.from_id, link.to_id
                ))));
            };
            state.graph.add_edge(
                from,
                to,
                Link {
                    label: link.label,
                    fields: link.fields,
                },
            );
        }
        Ok(state)
    }
}

/// A petgraph-backed [`Storage`], in memory or persisted as a JSON snapshot.
#[derive(Debug)]
pub struct GraphStore {
    state: Mutex<GraphState>,
    path: Option<PathBuf>,
    lock: Option<StoreLock>,
}

impl GraphStore {
    /// A store that lives only as long as this value.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(GraphState::default()),
            path: None,
            lock: None,
        }
    }

    /// Open (or create) the snapshot at `path` and lock it for this process.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held elsewhere, or the snapshot cannot
    /// be read or parsed.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let lock = StoreLock::acquire(&StoreLock::path_for(path), DEFAULT_LOCK_TIMEOUT)?;

        let state = if path.exists() {
            let bytes = fs::read(path).map_err(|source| StorageError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
            if snapshot.format != SNAPSHOT_FORMAT {
                return Err(StorageError::Snapshot(serde::de::Error::custom(format!(
                    "unsupported snapshot format {}",
                    snapshot.format
                ))));
            }
            GraphState::from_snapshot(snapshot)?
        } else {
            let state = GraphState::default();
            persist(&state, path)?;
            state
        };
        debug!(
            path = %path.display(),
            records = state.graph.node_count(),
            links = state.graph.edge_count(),
            "opened graph store"
        );

        Ok(Self {
            state: Mutex::new(state),
            path: Some(path.to_path_buf()),
            lock: Some(lock),
        })
    }

    /// Backing snapshot file, or `None` for an in-memory store.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Lock file held while this store is open.
    #[must_use]
    pub fn lock_path(&self) -> Option<&Path> {
        self.lock.as_ref().map(StoreLock::path)
    }
}

impl Storage for GraphStore {
    fn backend(&self) -> Backend {
        Backend::Graph
    }

    fn begin(&self) -> StorageResult<Box<dyn Transaction + '_>> {
        let state = self.state.lock().map_err(|_| StorageError::Poisoned)?;
        let backup = state.clone();
        Ok(Box::new(GraphTransaction {
            state,
            backup: Some(backup),
            path: self.path.as_deref(),
        }))
    }
}

fn persist(state: &GraphState, path: &Path) -> StorageResult<()> {
    let io_err = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };
    let bytes = serde_json::to_vec(&state.to_snapshot())?;

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(&tmp, bytes).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}

/// A session over the locked graph. `backup` is `None` once finished.
pub struct GraphTransaction<'a> {
    state: MutexGuard<'a, GraphState>,
    backup: Option<GraphState>,
    path: Option<&'a Path>,
}

impl GraphTransaction<'_> {
    fn restore(&mut self) {
        if let Some(backup) = self.backup.take() {
            *self.state = backup;
        }
    }
}

impl Drop for GraphTransaction<'_> {
    fn drop(&mut self) {
        if self.backup.is_some() {
            debug!("graph session dropped without commit; restoring");
            self.restore();
        }
    }
}

impl Transaction for GraphTransaction<'_> {
    fn add_vertex(&mut self, label: &str, attributes: &[Attribute]) -> StorageResult<()> {
        let id = record_id(label, attributes)?;
        if self.state.index.contains_key(&id) {
            return Err(StorageError::DuplicateId(id));
        }
        let idx = self.state.graph.add_node(Vertex {
            id,
            label: label.to_string(),
            fields: Fields::from_attributes(attributes),
        });
        self.state.index.insert(id, idx);
        Ok(())
    }

    fn add_edge(
        &mut self,
        label: &str,
        from_id: i64,
        to_id: i64,
        attributes: &[Attribute],
    ) -> StorageResult<bool> {
        let (Some(&from), Some(&to)) = (self.state.index.get(&from_id), self.state.index.get(&to_id))
        else {
            return Ok(false);
        };
        self.state.graph.add_edge(
            from,
            to,
            Link {
                label: label.to_string(),
                fields: Fields::from_attributes(attributes),
            },
        );
        Ok(true)
    }

    fn add_vertex_and_edge(
        &mut self,
        label: &str,
        attributes: &[Attribute],
        edge_label: &str,
        from_id: i64,
        edge_attributes: &[Attribute],
    ) -> StorageResult<bool> {
        if !self.state.index.contains_key(&from_id) {
            return Ok(false);
        }
        let id = record_id(label, attributes)?;
        self.add_vertex(label, attributes)?;
        self.add_edge(edge_label, from_id, id, edge_attributes)
    }

    fn get_vertex(&self, label: Option<&str>, attributes: &[Attribute]) -> StorageResult<Record> {
        self.state
            .candidates(attributes)
            .into_iter()
            .filter(|v| label.is_none_or(|l| v.label == l) && v.fields.matches(attributes))
            .min_by_key(|v| v.id)
            .map(|v| Record {
                id: v.id,
                label: v.label.clone(),
                fields: v.fields.clone(),
            })
            .ok_or_else(|| StorageError::empty(label, attributes))
    }

    fn get_vertices_by_attributes(&self, attributes: &[Attribute]) -> StorageResult<Vec<i64>> {
        let mut ids: Vec<i64> = self
            .state
            .candidates(attributes)
            .into_iter()
            .filter(|v| v.fields.matches(attributes))
            .map(|v| v.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn get_edge(&self, label: &str, attributes: &[Attribute]) -> StorageResult<EdgeRecord> {
        self.state
            .matching_edges(label, attributes)
            .into_iter()
            .find_map(|edge| self.state.edge_record(edge))
            .ok_or_else(|| StorageError::empty(Some(label), attributes))
    }

    #[instrument(level = "trace", skip(self))]
    fn get_descendant_edges_by_label(
        &self,
        start_id: i64,
        label: &str,
    ) -> StorageResult<Vec<EdgeRecord>> {
        let Some(&start) = self.state.index.get(&start_id) else {
            return Ok(Vec::new());
        };
        let graph = &self.state.graph;

        let mut seen_edges: HashSet<EdgeIndex> = HashSet::new();
        let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut found = Vec::new();

        while let Some(node) = queue.pop_front() {
            for edge in graph.edges_directed(node, Direction::Outgoing) {
                if edge.weight().label != label || !seen_edges.insert(edge.id()) {
                    continue;
                }
                if let Some(record) = self.state.edge_record(edge.id()) {
                    found.push(record);
                }
                if visited.insert(edge.target()) {
                    queue.push_back(edge.target());
                }
            }
        }
        Ok(found)
    }

    fn get_adjacent_vertices_by_edge_label(
        &self,
        edge_label: &str,
        id: i64,
        fields: &[&str],
    ) -> StorageResult<Vec<Record>> {
        let Some(&idx) = self.state.index.get(&id) else {
            return Ok(Vec::new());
        };
        let graph = &self.state.graph;

        let mut targets: Vec<&Vertex> = graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|edge| edge.weight().label == edge_label)
            .filter_map(|edge| graph.node_weight(edge.target()))
            .collect();
        targets.sort_by_key(|v| v.id);
        targets.dedup_by_key(|v| v.id);

        Ok(targets
            .into_iter()
            .map(|v| {
                Record {
                    id: v.id,
                    label: v.label.clone(),
                    fields: v.fields.clone(),
                }
                .project(fields)
            })
            .collect())
    }

    fn set_property(&mut self, id: i64, key: &str, value: &Value) -> StorageResult<()> {
        let Some(&idx) = self.state.index.get(&id) else {
            return Ok(());
        };
        if let Some(vertex) = self.state.graph.node_weight_mut(idx) {
            vertex.fields.0.insert(key.to_string(), value.clone());
        }
        Ok(())
    }

    fn delete_edges(&mut self, label: &str, attributes: &[Attribute]) -> StorageResult<usize> {
        let doomed = self.state.matching_edges(label, attributes);
        for &edge in &doomed {
            self.state.graph.remove_edge(edge);
        }
        Ok(doomed.len())
    }

    fn highest_id(&self) -> StorageResult<i64> {
        let graph = &self.state.graph;
        let records = self.state.index.keys().copied().max().unwrap_or(0);
        let links = graph
            .edge_indices()
            .filter_map(|edge| graph.edge_weight(edge))
            .filter_map(|link| link.fields.get(fields::ID).and_then(Value::as_long))
            .max()
            .unwrap_or(0);
        Ok(records.max(links))
    }

    fn commit(mut self: Box<Self>) -> StorageResult<()> {
        if let Some(path) = self.path {
            if let Err(err) = persist(&self.state, path) {
                warn!(error = %err, path = %path.display(), "graph snapshot write failed; restoring");
                self.restore();
                return Err(err);
            }
        }
        self.backup = None;
        Ok(())
    }

    fn abort(mut self: Box<Self>) -> StorageResult<()> {
        self.restore();
        Ok(())
    }
}
