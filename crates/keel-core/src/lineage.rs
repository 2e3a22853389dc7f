//! Reachability over the version graph.
//!
//! Node versions never link to each other directly. An edge version sits
//! between them: `node version -> edge version -> node version`, all over
//! `EdgeVersionConnection` links. Provenance uses the same shape with
//! lineage edge versions and `LineageConnection` links.

use regex::Regex;
use tracing::instrument;

use crate::error::{CatalogError, CatalogResult};
use crate::factory::{Catalog, NotFoundExt};
use crate::model::ItemKind;
use crate::storage::{self, Attribute, Transaction, labels};

#[derive(Debug, Clone, Copy)]
pub struct LineageQueries<'c> {
    catalog: &'c Catalog,
}

fn require_node_version(tx: &dyn Transaction, id: i64) -> CatalogResult<()> {
    tx.get_vertex(Some(ItemKind::Node.version_label()), &[Attribute::id(id)])
        .or_not_found(|| CatalogError::VersionNotFound {
            kind: ItemKind::Node,
            id,
        })
        .map(drop)
}

impl<'c> LineageQueries<'c> {
    pub(crate) const fn new(catalog: &'c Catalog) -> Self {
        Self { catalog }
    }

    /// Every record reachable from a node version over one or more
    /// connection links: edge versions and node versions alike, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::VersionNotFound`] if `version_id` is not a
    /// node version.
    #[instrument(skip(self))]
    pub fn transitive_closure(&self, version_id: i64) -> CatalogResult<Vec<i64>> {
        self.catalog.run(|tx| {
            require_node_version(tx, version_id)?;
            Ok(tx.transitive_closure(version_id)?)
        })
    }

    /// Node versions one edge version away from `version_id`, where the
    /// edge version's Edge item has a source key matching `label_filter`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidRequest`] for a malformed pattern, or
    /// [`CatalogError::VersionNotFound`] if `version_id` is not a node
    /// version.
    #[instrument(skip(self))]
    pub fn adjacent_nodes(&self, version_id: i64, label_filter: &str) -> CatalogResult<Vec<i64>> {
        Regex::new(label_filter)
            .map_err(|err| CatalogError::InvalidRequest(format!("label filter: {err}")))?;
        self.catalog.run(|tx| {
            require_node_version(tx, version_id)?;
            Ok(tx.adjacent_nodes(version_id, label_filter)?)
        })
    }

    /// Every version derived from `version_id` through lineage edge
    /// versions, transitively. A lineage edge version is reported only when
    /// another lineage edge derives it.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownVersion`] if nothing has `version_id`.
    #[instrument(skip(self))]
    pub fn provenance_closure(&self, version_id: i64) -> CatalogResult<Vec<i64>> {
        self.catalog.run(|tx| {
            tx.get_vertex(None, &[Attribute::id(version_id)])
                .or_not_found(|| CatalogError::UnknownVersion(version_id))?;
            let edges = tx.get_descendant_edges_by_label(version_id, labels::LINEAGE_CONNECTION)?;
            Ok(storage::even_hop_targets(version_id, &edges))
        })
    }
}
