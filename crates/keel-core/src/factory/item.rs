use tracing::{info, instrument};

use super::{Catalog, NotFoundExt, load_tags, write_tags};
use crate::dag::{self, TruncationSummary};
use crate::error::{CatalogError, CatalogResult};
use crate::model::{Item, ItemEndpoints, ItemKind, NewItem};
use crate::storage::{Attribute, Record, StorageError, Transaction, fields};

/// Creates and reads items of one kind.
#[derive(Debug, Clone, Copy)]
pub struct ItemFactory<'c> {
    catalog: &'c Catalog,
    kind: ItemKind,
}

impl<'c> ItemFactory<'c> {
    pub(crate) const fn new(catalog: &'c Catalog, kind: ItemKind) -> Self {
        Self { catalog, kind }
    }

    #[must_use]
    pub const fn kind(&self) -> ItemKind {
        self.kind
    }

    /// Persist a new item and its tags.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::DuplicateSourceKey`] if this kind already has an
    ///   item with the same source key.
    /// - [`CatalogError::InvalidRequest`] if endpoints are given for a
    ///   non-edge kind, or missing for an edge.
    /// - [`CatalogError::ItemNotFound`] if an edge endpoint is not a stored
    ///   node item.
    /// - [`CatalogError::Validation`] if a tag's value contradicts its
    ///   declared type.
    #[instrument(skip(self, item), fields(kind = %self.kind, source_key = %item.source_key))]
    pub fn create(&self, item: NewItem) -> CatalogResult<Item> {
        let kind = self.kind;
        match (kind, item.endpoints) {
            (ItemKind::Edge, None) => {
                return Err(CatalogError::InvalidRequest(
                    "edge items need from and to node items".into(),
                ));
            }
            (ItemKind::Edge, Some(_)) | (_, None) => {}
            (other, Some(_)) => {
                return Err(CatalogError::InvalidRequest(format!(
                    "{other} items do not take endpoints"
                )));
            }
        }

        self.catalog.validator().validate(&item.tags, None)?;

        let created = self.catalog.run(|tx| {
            let existing = tx.get_vertices_by_attributes(&[
                Attribute::string(fields::SOURCE_KEY, item.source_key.clone()),
                Attribute::string(fields::KIND, kind.as_str()),
            ])?;
            if !existing.is_empty() {
                return Err(CatalogError::DuplicateSourceKey {
                    kind,
                    source_key: item.source_key.clone(),
                });
            }

            if let Some(ends) = item.endpoints {
                for node_id in [ends.from_node_id, ends.to_node_id] {
                    tx.get_vertex(Some(ItemKind::Node.item_label()), &[Attribute::id(node_id)])
                        .or_not_found(|| CatalogError::ItemNotFound {
                            kind: ItemKind::Node,
                            key: node_id.to_string(),
                        })?;
                }
            }

            let ids = self.catalog.ids();
            let id = ids.next_id();
            let mut attributes = vec![
                Attribute::id(id),
                Attribute::string(fields::KIND, kind.as_str()),
                Attribute::optional(fields::NAME, item.name.clone().map(Into::into)),
                Attribute::string(fields::SOURCE_KEY, item.source_key.clone()),
            ];
            if let Some(ends) = item.endpoints {
                attributes.push(Attribute::long(fields::FROM_NODE_ID, ends.from_node_id));
                attributes.push(Attribute::long(fields::TO_NODE_ID, ends.to_node_id));
            }
            tx.add_vertex(kind.item_label(), &attributes)?;
            let tags = write_tags(tx, ids, id, &item.tags)?;

            Ok(Item {
                id,
                kind,
                name: item.name.clone(),
                source_key: item.source_key.clone(),
                tags,
                endpoints: item.endpoints,
            })
        })?;

        info!(item_id = created.id, "created item");
        Ok(created)
    }

    /// # Errors
    ///
    /// Returns [`CatalogError::ItemNotFound`] if no item of this kind has
    /// `source_key`.
    pub fn retrieve(&self, source_key: &str) -> CatalogResult<Item> {
        self.catalog.run(|tx| self.retrieve_in(tx, source_key))
    }

    /// # Errors
    ///
    /// Returns [`CatalogError::ItemNotFound`] if no item of this kind has
    /// `id`.
    pub fn retrieve_by_id(&self, id: i64) -> CatalogResult<Item> {
        self.catalog.run(|tx| {
            let record = self.lookup(tx, &[Attribute::id(id)], || id.to_string())?;
            Ok(load_item(tx, self.kind, record)?)
        })
    }

    /// Current leaf version ids of the item with `source_key`, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::ItemNotFound`] for an unknown source key.
    pub fn get_leaves(&self, source_key: &str) -> CatalogResult<Vec<i64>> {
        self.catalog.run(|tx| {
            let item = self.retrieve_in(tx, source_key)?;
            Ok(dag::retrieve(tx, item.id)?.leaves())
        })
    }

    /// Keep `height` generations of history behind each leaf.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::ItemNotFound`] for an unknown item, or a
    /// validation error for `height == 0`.
    #[instrument(skip(self), fields(kind = %self.kind))]
    pub fn truncate(&self, item_id: i64, height: usize) -> CatalogResult<TruncationSummary> {
        let summary = self.catalog.run(|tx| {
            self.lookup(tx, &[Attribute::id(item_id)], || item_id.to_string())?;
            dag::truncate(tx, self.catalog.ids(), item_id, height)
        })?;
        info!(
            item_id,
            height,
            removed = summary.removed_edge_ids.len(),
            rerooted = summary.rerooted_version_ids.len(),
            "truncated history"
        );
        Ok(summary)
    }

    fn retrieve_in(&self, tx: &dyn Transaction, source_key: &str) -> CatalogResult<Item> {
        let record = self.lookup(
            tx,
            &[
                Attribute::string(fields::SOURCE_KEY, source_key),
                Attribute::string(fields::KIND, self.kind.as_str()),
            ],
            || source_key.to_string(),
        )?;
        Ok(load_item(tx, self.kind, record)?)
    }

    fn lookup(
        &self,
        tx: &dyn Transaction,
        attributes: &[Attribute],
        key: impl FnOnce() -> String,
    ) -> CatalogResult<Record> {
        tx.get_vertex(Some(self.kind.item_label()), attributes)
            .or_not_found(|| CatalogError::ItemNotFound {
                kind: self.kind,
                key: key(),
            })
    }
}

fn load_item(tx: &dyn Transaction, kind: ItemKind, record: Record) -> Result<Item, StorageError> {
    let endpoints = match (
        record.fields.opt_long(fields::FROM_NODE_ID)?,
        record.fields.opt_long(fields::TO_NODE_ID)?,
    ) {
        (Some(from_node_id), Some(to_node_id)) => Some(ItemEndpoints {
            from_node_id,
            to_node_id,
        }),
        _ => None,
    };
    Ok(Item {
        id: record.id,
        kind,
        name: record.fields.opt_string(fields::NAME)?,
        source_key: record.fields.string(fields::SOURCE_KEY)?,
        tags: load_tags(tx, record.id)?,
        endpoints,
    })
}
