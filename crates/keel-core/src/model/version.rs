use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::item::{ItemKind, Tag, TagMap};
use super::value::{Value, ValueType};

/// Fields shared by every version kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichVersion {
    pub id: i64,
    pub item_id: i64,
    pub tags: TagMap,
    pub structure_version_id: Option<i64>,
    pub reference: Option<String>,
    pub parameters: BTreeMap<String, String>,
}

/// An immutable snapshot of an item, with kind-specific fields in `body`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version<B> {
    #[serde(flatten)]
    pub rich: RichVersion,
    #[serde(flatten)]
    pub body: B,
}

impl<B> Version<B> {
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.rich.id
    }

    #[must_use]
    pub const fn item_id(&self) -> i64 {
        self.rich.item_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeBody {}

/// One side of an edge version.
///
/// `end_id == None` means the endpoint is open: it tracks the most recent
/// compatible version of the endpoint item from `start_id` onward, instead
/// of the pinned range `start_id..=end_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub start_id: i64,
    pub end_id: Option<i64>,
}

impl Endpoint {
    #[must_use]
    pub const fn open(start_id: i64) -> Self {
        Self {
            start_id,
            end_id: None,
        }
    }

    #[must_use]
    pub const fn pinned(start_id: i64, end_id: i64) -> Self {
        Self {
            start_id,
            end_id: Some(end_id),
        }
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.end_id.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeBody {
    pub from: Endpoint,
    pub to: Endpoint,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphBody {
    pub edge_version_ids: Vec<i64>,
}

/// The typed attribute contract a structure version declares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureBody {
    pub attributes: BTreeMap<String, ValueType>,
}

impl StructureBody {
    pub fn new<K, I>(attributes: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, ValueType)>,
    {
        Self {
            attributes: attributes
                .into_iter()
                .map(|(key, ty)| (key.into(), ty))
                .collect(),
        }
    }
}

/// Provenance: the version at `to_version_id` was derived from `from_version_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEdgeBody {
    pub from_version_id: i64,
    pub to_version_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageGraphBody {
    pub lineage_edge_version_ids: Vec<i64>,
}

pub type NodeVersion = Version<NodeBody>;
pub type EdgeVersion = Version<EdgeBody>;
pub type GraphVersion = Version<GraphBody>;
pub type StructureVersion = Version<StructureBody>;
pub type LineageEdgeVersion = Version<LineageEdgeBody>;
pub type LineageGraphVersion = Version<LineageGraphBody>;

/// Input for version creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVersion<B> {
    pub item_id: i64,
    pub tags: TagMap,
    pub structure_version_id: Option<i64>,
    pub reference: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub parent_ids: Vec<i64>,
    pub body: B,
}

impl<B> NewVersion<B> {
    #[must_use]
    pub fn new(item_id: i64, body: B) -> Self {
        Self {
            item_id,
            tags: TagMap::new(),
            structure_version_id: None,
            reference: None,
            parameters: BTreeMap::new(),
            parent_ids: Vec::new(),
            body,
        }
    }

    #[must_use]
    pub fn with_tags(mut self, tags: TagMap) -> Self {
        self.tags = tags;
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
    pub const fn with_structure(mut self, structure_version_id: i64) -> Self {
        self.structure_version_id = Some(structure_version_id);
        self
    }

    #[must_use]
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_parents(mut self, parent_ids: impl IntoIterator<Item = i64>) -> Self {
        self.parent_ids = parent_ids.into_iter().collect();
        self
    }
}

/// Kind-level marker used in diagnostics; every body maps to one kind.
pub trait HasKind {
    const KIND: ItemKind;
}

impl HasKind for NodeBody {
    const KIND: ItemKind = ItemKind::Node;
}
impl HasKind for EdgeBody {
    const KIND: ItemKind = ItemKind::Edge;
}
impl HasKind for GraphBody {
    const KIND: ItemKind = ItemKind::Graph;
}
impl HasKind for StructureBody {
    const KIND: ItemKind = ItemKind::Structure;
}
impl HasKind for LineageEdgeBody {
    const KIND: ItemKind = ItemKind::LineageEdge;
}
impl HasKind for LineageGraphBody {
    const KIND: ItemKind = ItemKind::LineageGraph;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattened_version_serializes_body_inline() {
        let version = Version {
            rich: RichVersion {
                id: 7,
                item_id: 3,
                tags: TagMap::new(),
                structure_version_id: None,
                reference: None,
                parameters: BTreeMap::new(),
            },
            body: LineageEdgeBody {
                from_version_id: 1,
                to_version_id: 2,
            },
        };
        let json = serde_json::to_value(&version).expect("serialize");
        assert_eq!(json["id"], 7);
        assert_eq!(json["from_version_id"], 1);
        assert_eq!(json["to_version_id"], 2);
    }

    #[test]
    fn open_endpoint_has_no_end() {
        assert!(Endpoint::open(4).is_open());
        assert!(!Endpoint::pinned(4, 9).is_open());
    }
}
