//! Domain records: items, versions, tags, and typed values.
//!
//! Everything here is plain data. Persistence lives in [`crate::factory`],
//! which reads and writes these types through a [`crate::storage::Storage`].

pub mod item;
pub mod value;
pub mod version;

pub use item::{Item, ItemEndpoints, ItemKind, NewItem, Tag, TagMap, tag_map, tags};
pub use value::{ParseValueError, Value, ValueType};
pub use version::{
    EdgeBody, EdgeVersion, Endpoint, GraphBody, GraphVersion, HasKind, LineageEdgeBody,
    LineageEdgeVersion, LineageGraphBody, LineageGraphVersion, NewVersion, NodeBody,
    NodeVersion, RichVersion, StructureBody, StructureVersion, Version,
};
