//! keel-core: a versioned metadata catalog.
//!
//! Items (nodes, edges, graphs, structures, lineage edges, lineage graphs)
//! each own a version history DAG. Versions are immutable, carry typed
//! tags validated against an optional structure version, and are linked
//! into their item's history in the same storage session that writes them.
//!
//! # Conventions
//!
//! - **Errors**: `thiserror` enums per layer, folded into
//!   [`error::CatalogError`] at the factory boundary.
//! - **Logging**: `tracing` macros; factory operations are instrumented.
//! - **Storage**: only through [`storage::Transaction`]; either backend.

pub mod config;
pub mod dag;
pub mod error;
pub mod factory;
pub mod ids;
pub mod lineage;
pub mod lock;
pub mod model;
pub mod storage;
pub mod validate;

pub use error::{CatalogError, CatalogResult, ErrorClass, ErrorCode};
pub use factory::Catalog;
