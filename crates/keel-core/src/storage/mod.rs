//! Storage adapter protocol and its two backend families.
//!
//! The catalog never talks to a database directly. It issues a fixed set of
//! typed vertex/edge primitives on a [`Transaction`] obtained from a
//! [`Storage`]:
//!
//! - [`graph::GraphStore`]: a native property graph (petgraph) where links
//!   are first-class edges.
//! - [`sqlite::SqliteStore`]: a tabular engine where links are join records
//!   in a `links` table.
//!
//! # Typed predicates
//!
//! Every write or lookup takes a list of [`Attribute`]s. A list is a
//! conjunction; attributes whose value is `None` are dropped before the
//! backend sees them. The [`Value`] variant decides how a literal is
//! rendered, so the string `'1'` is never confused with the integer `1`.
//!
//! # Ids
//!
//! Every record carries a LONG `id` field. It is the match key for
//! [`Transaction::add_edge`], [`Transaction::add_vertex_and_edge`] and
//! [`Transaction::set_property`].

pub mod graph;
pub mod sqlite;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::lock::LockError;
use crate::model::{Value, ValueType};

/// Stable record and link labels shared by every backend.
pub mod labels {
    pub const VERSION_SUCCESSOR: &str = "VersionSuccessor";
    pub const TAG: &str = "Tag";
    pub const TAG_CONNECTION: &str = "TagConnection";
    pub const PARAMETER: &str = "Parameter";
    pub const PARAMETER_CONNECTION: &str = "ParameterConnection";
    pub const STRUCTURE_ATTRIBUTE: &str = "StructureAttribute";
    pub const ATTRIBUTE_CONNECTION: &str = "AttributeConnection";
    pub const EDGE_VERSION_CONNECTION: &str = "EdgeVersionConnection";
    pub const GRAPH_VERSION_EDGE: &str = "GraphVersionEdge";
    pub const LINEAGE_CONNECTION: &str = "LineageConnection";
}

/// Stable field names shared by every backend.
pub mod fields {
    pub const ID: &str = "id";
    pub const KIND: &str = "kind";
    pub const NAME: &str = "name";
    pub const SOURCE_KEY: &str = "source_key";
    pub const ITEM_ID: &str = "item_id";
    pub const OWNER_ID: &str = "owner_id";
    pub const KEY: &str = "key";
    pub const VALUE: &str = "value";
    pub const TYPE: &str = "type";
    pub const FROM_ID: &str = "from_id";
    pub const TO_ID: &str = "to_id";
    pub const FROM_NODE_ID: &str = "from_node_id";
    pub const TO_NODE_ID: &str = "to_node_id";
    pub const STRUCTURE_VERSION_ID: &str = "structure_version_id";
    pub const REFERENCE: &str = "reference";
    pub const IS_LEAF: &str = "is_leaf";
    pub const FROM_START_ID: &str = "from_start_id";
    pub const FROM_END_ID: &str = "from_end_id";
    pub const TO_START_ID: &str = "to_start_id";
    pub const TO_END_ID: &str = "to_end_id";
    pub const FROM_VERSION_ID: &str = "from_version_id";
    pub const TO_VERSION_ID: &str = "to_version_id";
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A single-result lookup matched nothing.
    #[error("no results found for ({label} {pattern})")]
    EmptyResult { label: String, pattern: String },

    #[error("{label} record has no LONG id attribute")]
    MissingId { label: String },

    #[error("record id {0} already exists")]
    DuplicateId(i64),

    #[error("field '{0}' is missing")]
    MissingField(String),

    #[error("field '{field}' holds a {found} value, expected {expected}")]
    FieldType {
        field: String,
        expected: ValueType,
        found: ValueType,
    },

    #[error("field '{field}' holds unreadable value '{raw}'")]
    Corrupt { field: String, raw: String },

    #[error("invalid label filter: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("store schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("store snapshot is unreadable: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("store lock: {0}")]
    Lock(#[from] LockError),

    #[error("storage session state was poisoned by a panicking holder")]
    Poisoned,
}

impl StorageError {
    /// `true` when a lookup matched zero records.
    #[must_use]
    pub const fn is_empty_result(&self) -> bool {
        matches!(self, Self::EmptyResult { .. })
    }

    pub(crate) fn empty(label: Option<&str>, attributes: &[Attribute]) -> Self {
        Self::EmptyResult {
            label: label.unwrap_or("*").to_string(),
            pattern: render_pattern(attributes),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Attributes and records
// ---------------------------------------------------------------------------

/// One typed `(field, value)` predicate or field assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub field: String,
    pub value: Option<Value>,
}

impl Attribute {
    #[must_use]
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: Some(value.into()),
        }
    }

    /// An attribute that is dropped when `value` is `None`.
    #[must_use]
    pub fn optional(field: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }

    #[must_use]
    pub fn long(field: impl Into<String>, value: i64) -> Self {
        Self::new(field, Value::Long(value))
    }

    #[must_use]
    pub fn string(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, Value::String(value.into()))
    }

    #[must_use]
    pub fn id(id: i64) -> Self {
        Self::long(fields::ID, id)
    }
}

/// Attributes with a value, in order. `None`-valued attributes are skipped.
pub(crate) fn present(attributes: &[Attribute]) -> impl Iterator<Item = (&str, &Value)> {
    attributes
        .iter()
        .filter_map(|a| a.value.as_ref().map(|v| (a.field.as_str(), v)))
}

/// Extract the mandatory LONG `id` from a vertex's attributes.
pub(crate) fn record_id(label: &str, attributes: &[Attribute]) -> StorageResult<i64> {
    present(attributes)
        .find_map(|(field, value)| (field == fields::ID).then(|| value.as_long()).flatten())
        .ok_or_else(|| StorageError::MissingId {
            label: label.to_string(),
        })
}

/// Render a predicate list as a property-map pattern, e.g.
/// `{id: 5, source_key: 'nodes/a', is_leaf: true}`.
///
/// Strings are single-quoted with `\` and `'` escaped; integers, longs and
/// booleans are bare literals.
#[must_use]
pub fn render_pattern(attributes: &[Attribute]) -> String {
    let mut out = String::from("{");
    for (i, (field, value)) in present(attributes).enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{field}: {}", render_literal(value));
    }
    out.push('}');
    out
}

/// Render one typed literal.
#[must_use]
pub fn render_literal(value: &Value) -> String {
    match value {
        Value::String(s) => {
            let escaped = s.replace('\\', "\\\\").replace('\'', "\\'");
            format!("'{escaped}'")
        }
        Value::Integer(v) => v.to_string(),
        Value::Long(v) => v.to_string(),
        Value::Boolean(v) => v.to_string(),
    }
}

/// Typed fields of a record or link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fields(pub BTreeMap<String, Value>);

impl Fields {
    pub(crate) fn from_attributes(attributes: &[Attribute]) -> Self {
        Self(
            present(attributes)
                .map(|(f, v)| (f.to_string(), v.clone()))
                .collect(),
        )
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// `true` if every present attribute equals the stored field, type included.
    #[must_use]
    pub fn matches(&self, attributes: &[Attribute]) -> bool {
        present(attributes).all(|(field, value)| self.0.get(field) == Some(value))
    }

    fn typed<T>(
        &self,
        field: &str,
        expected: ValueType,
        pick: impl Fn(&Value) -> Option<T>,
    ) -> StorageResult<Option<T>> {
        match self.0.get(field) {
            None => Ok(None),
            Some(value) => pick(value).map(Some).ok_or_else(|| StorageError::FieldType {
                field: field.to_string(),
                expected,
                found: value.value_type(),
            }),
        }
    }

    /// # Errors
    ///
    /// Fails if the field holds a non-LONG value.
    pub fn opt_long(&self, field: &str) -> StorageResult<Option<i64>> {
        self.typed(field, ValueType::Long, Value::as_long)
    }

    /// # Errors
    ///
    /// Fails if the field is absent or not a LONG.
    pub fn long(&self, field: &str) -> StorageResult<i64> {
        self.opt_long(field)?
            .ok_or_else(|| StorageError::MissingField(field.to_string()))
    }

    /// # Errors
    ///
    /// Fails if the field holds a non-STRING value.
    pub fn opt_string(&self, field: &str) -> StorageResult<Option<String>> {
        self.typed(field, ValueType::String, |v| v.as_str().map(str::to_string))
    }

    /// # Errors
    ///
    /// Fails if the field is absent or not a STRING.
    pub fn string(&self, field: &str) -> StorageResult<String> {
        self.opt_string(field)?
            .ok_or_else(|| StorageError::MissingField(field.to_string()))
    }

    /// # Errors
    ///
    /// Fails if the field holds a non-BOOLEAN value.
    pub fn opt_bool(&self, field: &str) -> StorageResult<Option<bool>> {
        self.typed(field, ValueType::Boolean, Value::as_bool)
    }
}

/// A stored vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: i64,
    pub label: String,
    pub fields: Fields,
}

impl Record {
    /// Keep only `wanted` fields (plus `id`).
    pub(crate) fn project(mut self, wanted: &[&str]) -> Self {
        self.fields
            .0
            .retain(|field, _| field == fields::ID || wanted.contains(&field.as_str()));
        self
    }
}

/// A stored link between two records, identified by their ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRecord {
    pub label: String,
    pub from_id: i64,
    pub to_id: i64,
    pub fields: Fields,
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// Which backend family a [`Storage`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sqlite,
    Graph,
}

impl Backend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Graph => "graph",
        }
    }

    /// Default store file name under the project's `.keel/` directory.
    #[must_use]
    pub const fn default_file_name(self) -> &'static str {
        match self {
            Self::Sqlite => "catalog.sqlite3",
            Self::Graph => "catalog.graph.json",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "tabular" => Ok(Self::Sqlite),
            "graph" | "native" => Ok(Self::Graph),
            other => Err(format!("unknown backend '{other}': expected sqlite or graph")),
        }
    }
}

/// A backend instance. Each logical operation takes its own session.
pub trait Storage: Send + Sync {
    fn backend(&self) -> Backend;

    /// Open a session. The session holds the backend exclusively until it
    /// is committed, aborted, or dropped (which aborts).
    ///
    /// # Errors
    ///
    /// Returns a backend error if the session cannot be started.
    fn begin(&self) -> StorageResult<Box<dyn Transaction + '_>>;
}

/// The primitive vertex/edge protocol, scoped to one session.
///
/// All methods return backend faults as [`StorageError`]. Single-result
/// lookups return [`StorageError::EmptyResult`] when nothing matches.
pub trait Transaction {
    /// Create a labeled record. `attributes` must include a LONG `id`.
    fn add_vertex(&mut self, label: &str, attributes: &[Attribute]) -> StorageResult<()>;

    /// Link two existing records by id. Returns `false` (and writes nothing)
    /// when either endpoint is missing.
    fn add_edge(
        &mut self,
        label: &str,
        from_id: i64,
        to_id: i64,
        attributes: &[Attribute],
    ) -> StorageResult<bool>;

    /// Create a record and one incoming link from `from_id` as one unit.
    /// Returns `false` (and writes nothing) when `from_id` does not exist.
    fn add_vertex_and_edge(
        &mut self,
        label: &str,
        attributes: &[Attribute],
        edge_label: &str,
        from_id: i64,
        edge_attributes: &[Attribute],
    ) -> StorageResult<bool>;

    /// Fetch exactly one record matching every attribute.
    fn get_vertex(&self, label: Option<&str>, attributes: &[Attribute]) -> StorageResult<Record>;

    /// Ids of every record matching every attribute, ascending.
    fn get_vertices_by_attributes(&self, attributes: &[Attribute]) -> StorageResult<Vec<i64>>;

    /// Fetch one link matching every attribute.
    fn get_edge(&self, label: &str, attributes: &[Attribute]) -> StorageResult<EdgeRecord>;

    /// Every `label` link reachable from `start_id` over one or more `label`
    /// hops, each link reported once.
    fn get_descendant_edges_by_label(
        &self,
        start_id: i64,
        label: &str,
    ) -> StorageResult<Vec<EdgeRecord>>;

    /// Records one `edge_label` hop away from `id`, projected to `fields`.
    fn get_adjacent_vertices_by_edge_label(
        &self,
        edge_label: &str,
        id: i64,
        fields: &[&str],
    ) -> StorageResult<Vec<Record>>;

    /// Set one field on an existing record. Missing records are a no-op.
    fn set_property(&mut self, id: i64, key: &str, value: &Value) -> StorageResult<()>;

    /// Remove every `label` link matching `attributes`; returns the count.
    fn delete_edges(&mut self, label: &str, attributes: &[Attribute]) -> StorageResult<usize>;

    /// Largest record or link id stored, or 0 for an empty store.
    fn highest_id(&self) -> StorageResult<i64>;

    /// Every record reachable from `version_id` over one or more
    /// [`labels::EDGE_VERSION_CONNECTION`] hops.
    fn transitive_closure(&self, version_id: i64) -> StorageResult<Vec<i64>> {
        reachable_ids(self, version_id, labels::EDGE_VERSION_CONNECTION)
    }

    /// Node versions two connection hops from `version_id`, through an edge
    /// version whose Edge item's source key matches `label_filter`.
    fn adjacent_nodes(&self, version_id: i64, label_filter: &str) -> StorageResult<Vec<i64>> {
        let pattern = Regex::new(label_filter)?;
        let edge_version_label = crate::model::ItemKind::Edge.version_label();
        let edge_label = crate::model::ItemKind::Edge.item_label();

        let mut found = BTreeSet::new();
        for hop in self.get_adjacent_vertices_by_edge_label(
            labels::EDGE_VERSION_CONNECTION,
            version_id,
            &[fields::ITEM_ID],
        )? {
            if hop.label != edge_version_label {
                continue;
            }
            let edge_id = hop.fields.long(fields::ITEM_ID)?;
            let edge = self.get_vertex(Some(edge_label), &[Attribute::id(edge_id)])?;
            if !pattern.is_match(&edge.fields.string(fields::SOURCE_KEY)?) {
                continue;
            }
            for dst in self.get_adjacent_vertices_by_edge_label(
                labels::EDGE_VERSION_CONNECTION,
                hop.id,
                &[],
            )? {
                found.insert(dst.id);
            }
        }
        Ok(found.into_iter().collect())
    }

    /// Finalize every write of this session and release it.
    fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Discard every write of this session and release it.
    fn abort(self: Box<Self>) -> StorageResult<()>;
}

/// Distinct targets of every `label` link reachable from `start_id`.
pub(crate) fn reachable_ids<T: Transaction + ?Sized>(
    tx: &T,
    start_id: i64,
    label: &str,
) -> StorageResult<Vec<i64>> {
    let reached: BTreeSet<i64> = tx
        .get_descendant_edges_by_label(start_id, label)?
        .into_iter()
        .map(|edge| edge.to_id)
        .collect();
    Ok(reached.into_iter().collect())
}

/// Nodes at even hop distance (2, 4, ...) from `start_id` along `edges`.
///
/// Used for link patterns such as `version -> lineage edge version ->
/// version`, where only the far side of each pair is wanted. A node can sit
/// on both sides (a lineage edge version used as an endpoint), so visited
/// state is the `(id, parity)` pair.
pub(crate) fn even_hop_targets(start_id: i64, edges: &[EdgeRecord]) -> Vec<i64> {
    let mut adjacency: HashMap<i64, Vec<i64>> = HashMap::new();
    for edge in edges {
        adjacency.entry(edge.from_id).or_default().push(edge.to_id);
    }

    let mut visited: HashSet<(i64, bool)> = HashSet::from([(start_id, false)]);
    let mut even: BTreeSet<i64> = BTreeSet::new();
    let mut queue = VecDeque::from([(start_id, false)]);
    while let Some((id, odd)) = queue.pop_front() {
        for &next in adjacency.get(&id).map_or(&[][..], Vec::as_slice) {
            let state = (next, !odd);
            if visited.insert(state) {
                if odd {
                    even.insert(next);
                }
                queue.push_back(state);
            }
        }
    }

    even.remove(&start_id);
    even.into_iter().collect()
}

/// Open the configured backend at `path`, creating it if needed.
///
/// # Errors
///
/// Returns an error if the store cannot be opened, locked, or migrated.
pub fn open(backend: Backend, path: &Path) -> StorageResult<Arc<dyn Storage>> {
    Ok(match backend {
        Backend::Sqlite => Arc::new(sqlite::SqliteStore::open(path)?),
        Backend::Graph => Arc::new(graph::GraphStore::open(path)?),
    })
}
