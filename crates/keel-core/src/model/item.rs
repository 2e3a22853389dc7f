use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fmt, str::FromStr};

use super::value::{Value, ValueType};

/// The six entity kinds the catalog versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Node,
    Edge,
    Graph,
    Structure,
    LineageEdge,
    LineageGraph,
}

impl ItemKind {
    pub const ALL: [Self; 6] = [
        Self::Node,
        Self::Edge,
        Self::Graph,
        Self::Structure,
        Self::LineageEdge,
        Self::LineageGraph,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Edge => "edge",
            Self::Graph => "graph",
            Self::Structure => "structure",
            Self::LineageEdge => "lineage_edge",
            Self::LineageGraph => "lineage_graph",
        }
    }

    /// Storage label of this kind's item records.
    #[must_use]
    pub const fn item_label(self) -> &'static str {
        match self {
            Self::Node => "Node",
            Self::Edge => "Edge",
            Self::Graph => "Graph",
            Self::Structure => "Structure",
            Self::LineageEdge => "LineageEdge",
            Self::LineageGraph => "LineageGraph",
        }
    }

    /// Storage label of this kind's version records.
    #[must_use]
    pub const fn version_label(self) -> &'static str {
        match self {
            Self::Node => "NodeVersion",
            Self::Edge => "EdgeVersion",
            Self::Graph => "GraphVersion",
            Self::Structure => "StructureVersion",
            Self::LineageEdge => "LineageEdgeVersion",
            Self::LineageGraph => "LineageGraphVersion",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "node" => Ok(Self::Node),
            "edge" => Ok(Self::Edge),
            "graph" => Ok(Self::Graph),
            "structure" => Ok(Self::Structure),
            "lineage_edge" => Ok(Self::LineageEdge),
            "lineage_graph" => Ok(Self::LineageGraph),
            other => Err(format!(
                "unknown item kind '{other}': expected one of node, edge, graph, structure, lineage_edge, lineage_graph"
            )),
        }
    }
}

/// A named, typed value attached to an item or a version.
///
/// `id` is the id of the record that owns the tag. Tags built by callers
/// before persistence use [`Tag::unbound`] or [`Tag::declared`]; the factory
/// rebinds them. The type is carried on its own so a tag can declare a type
/// without holding a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub key: String,
    pub value: Option<Value>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,
}

impl Tag {
    /// A tag whose type is the type of `value`.
    #[must_use]
    pub fn new(id: i64, key: impl Into<String>, value: Option<Value>) -> Self {
        let value_type = value.as_ref().map(Value::value_type);
        Self::typed(id, key, value_type, value)
    }

    #[must_use]
    pub fn typed(
        id: i64,
        key: impl Into<String>,
        value_type: Option<ValueType>,
        value: Option<Value>,
    ) -> Self {
        Self {
            id,
            key: key.into(),
            value,
            value_type,
        }
    }

    /// A tag not yet attached to any record.
    #[must_use]
    pub fn unbound(key: impl Into<String>, value: Option<Value>) -> Self {
        Self::new(0, key, value)
    }

    /// An unattached tag of type `value_type`, with or without a value.
    #[must_use]
    pub fn declared(key: impl Into<String>, value_type: ValueType, value: Option<Value>) -> Self {
        Self::typed(0, key, Some(value_type), value)
    }

    /// Declared type, else the type of the value.
    #[must_use]
    pub fn value_type(&self) -> Option<ValueType> {
        self.value_type
            .or_else(|| self.value.as_ref().map(Value::value_type))
    }

    /// `(declared, held)` when the declared type disagrees with the value.
    #[must_use]
    pub fn type_conflict(&self) -> Option<(ValueType, ValueType)> {
        let declared = self.value_type?;
        let held = self.value.as_ref()?.value_type();
        (declared != held).then_some((declared, held))
    }

    pub(crate) fn bound_to(&self, owner_id: i64) -> Self {
        Self::typed(owner_id, self.key.clone(), self.value_type, self.value.clone())
    }
}

/// Tags keyed by tag key.
pub type TagMap = BTreeMap<String, Tag>;

/// Build a [`TagMap`] of unbound tags from `(key, value)` pairs.
pub fn tags<K, I>(entries: I) -> TagMap
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Option<Value>)>,
{
    tag_map(
        entries
            .into_iter()
            .map(|(key, value)| Tag::unbound(key, value)),
    )
}

/// Key already-built tags by their keys; a later duplicate key wins.
pub fn tag_map(entries: impl IntoIterator<Item = Tag>) -> TagMap {
    entries
        .into_iter()
        .map(|tag| (tag.key.clone(), tag))
        .collect()
}

/// The two Node items an Edge item connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEndpoints {
    pub from_node_id: i64,
    pub to_node_id: i64,
}

/// A long-lived logical entity owning one version history DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub kind: ItemKind,
    pub name: Option<String>,
    pub source_key: String,
    pub tags: TagMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<ItemEndpoints>,
}

/// Input for item creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewItem {
    pub name: Option<String>,
    pub source_key: String,
    pub tags: TagMap,
    pub endpoints: Option<ItemEndpoints>,
}

impl NewItem {
    #[must_use]
    pub fn new(source_key: impl Into<String>) -> Self {
        Self {
            source_key: source_key.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: Option<Value>) -> Self {
        let key = key.into();
        self.tags.insert(key.clone(), Tag::unbound(key, value));
        self
    }

    /// A tag of `value_type`, possibly without a value.
    #[must_use]
    pub fn with_typed_tag(
        mut self,
        key: impl Into<String>,
        value_type: ValueType,
        value: Option<Value>,
    ) -> Self {
        let tag = Tag::declared(key, value_type, value);
        self.tags.insert(tag.key.clone(), tag);
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: TagMap) -> Self {
        self.tags = tags;
        self
    }

    /// Connect two Node items; required for, and only valid on, Edge items.
    #[must_use]
    pub const fn between(mut self, from_node_id: i64, to_node_id: i64) -> Self {
        self.endpoints = Some(ItemEndpoints {
            from_node_id,
            to_node_id,
        });
        self
    }
}
