//! Per-item version history DAG.
//!
//! An item starts with an empty history. Its first version hangs off the
//! sentinel root ([`ROOT_ID`]); every later version names one or more
//! existing versions as parents. Branches (two children of one parent) and
//! merges (one child of two parents) are both legal.
//!
//! - [`history`]: the in-memory arena ([`VersionHistoryDag`]) with leaf,
//!   ancestry, and truncation planning logic.
//! - [`engine`]: reconstruction from storage, version insertion, and
//!   truncation over a [`crate::storage::Transaction`].

pub mod engine;
pub mod history;

pub use engine::{TruncationSummary, insert_version, retrieve, successor, truncate};
pub use history::{DagError, ROOT_ID, TruncationPlan, VersionHistoryDag, VersionSuccessor};
