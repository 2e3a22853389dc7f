use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;

use tracing::{info, instrument};

use super::{Catalog, NotFoundExt, load_tags, write_tags};
use crate::dag;
use crate::error::{CatalogError, CatalogResult};
use crate::ids::IdGenerator;
use crate::model::{
    EdgeBody, Endpoint, GraphBody, HasKind, ItemKind, LineageEdgeBody, LineageGraphBody,
    NewVersion, NodeBody, RichVersion, StructureBody, Version,
};
use crate::storage::{Attribute, Record, StorageError, StorageResult, Transaction, fields, labels};

/// Kind-specific behavior of a version body.
///
/// The factory handles the shared fields (tags, parameters, structure,
/// reference) and the history; a body adds its own record fields and links.
pub trait VersionBody: HasKind + Clone + Sized {
    /// Canonical form stored and returned, e.g. sorted member ids.
    #[must_use]
    fn normalize(self) -> Self {
        self
    }

    /// Extra fields on the version record.
    fn record_fields(&self) -> Vec<Attribute> {
        Vec::new()
    }

    /// Reject bodies that reference missing records. Runs before any write.
    ///
    /// # Errors
    ///
    /// A not-found error for the first missing reference.
    fn check(&self, _tx: &dyn Transaction) -> CatalogResult<()> {
        Ok(())
    }

    /// Links and owned records written after the version record exists.
    ///
    /// # Errors
    ///
    /// A storage error from the writes.
    fn write_links(
        &self,
        _tx: &mut dyn Transaction,
        _ids: &IdGenerator,
        _version_id: i64,
    ) -> CatalogResult<()> {
        Ok(())
    }

    /// Rebuild the body from a stored record.
    ///
    /// # Errors
    ///
    /// A storage error if fields or links are unreadable.
    fn load(tx: &dyn Transaction, record: &Record) -> StorageResult<Self>;
}

fn require_version(tx: &dyn Transaction, kind: ItemKind, id: i64) -> CatalogResult<()> {
    tx.get_vertex(Some(kind.version_label()), &[Attribute::id(id)])
        .or_not_found(|| CatalogError::VersionNotFound { kind, id })
        .map(drop)
}

fn link(tx: &mut dyn Transaction, label: &str, from_id: i64, to_id: i64) -> CatalogResult<()> {
    if tx.add_edge(label, from_id, to_id, &[])? {
        Ok(())
    } else {
        Err(StorageError::empty(None, &[Attribute::id(from_id)]).into())
    }
}

fn member_ids(tx: &dyn Transaction, version_id: i64) -> StorageResult<Vec<i64>> {
    Ok(tx
        .get_adjacent_vertices_by_edge_label(labels::GRAPH_VERSION_EDGE, version_id, &[])?
        .into_iter()
        .map(|record| record.id)
        .collect())
}

fn sorted_unique(ids: Vec<i64>) -> Vec<i64> {
    ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

impl VersionBody for NodeBody {
    fn load(_tx: &dyn Transaction, _record: &Record) -> StorageResult<Self> {
        Ok(Self {})
    }
}

impl VersionBody for EdgeBody {
    fn record_fields(&self) -> Vec<Attribute> {
        vec![
            Attribute::long(fields::FROM_START_ID, self.from.start_id),
            Attribute::optional(fields::FROM_END_ID, self.from.end_id.map(Into::into)),
            Attribute::long(fields::TO_START_ID, self.to.start_id),
            Attribute::optional(fields::TO_END_ID, self.to.end_id.map(Into::into)),
        ]
    }

    fn check(&self, tx: &dyn Transaction) -> CatalogResult<()> {
        for endpoint in [self.from, self.to] {
            require_version(tx, ItemKind::Node, endpoint.start_id)?;
            if let Some(end_id) = endpoint.end_id {
                require_version(tx, ItemKind::Node, end_id)?;
            }
        }
        Ok(())
    }

    fn write_links(
        &self,
        tx: &mut dyn Transaction,
        _ids: &IdGenerator,
        version_id: i64,
    ) -> CatalogResult<()> {
        link(tx, labels::EDGE_VERSION_CONNECTION, self.from.start_id, version_id)?;
        link(tx, labels::EDGE_VERSION_CONNECTION, version_id, self.to.start_id)
    }

    fn load(_tx: &dyn Transaction, record: &Record) -> StorageResult<Self> {
        let f = &record.fields;
        Ok(Self {
            from: Endpoint {
                start_id: f.long(fields::FROM_START_ID)?,
                end_id: f.opt_long(fields::FROM_END_ID)?,
            },
            to: Endpoint {
                start_id: f.long(fields::TO_START_ID)?,
                end_id: f.opt_long(fields::TO_END_ID)?,
            },
        })
    }
}

impl VersionBody for GraphBody {
    fn normalize(self) -> Self {
        Self {
            edge_version_ids: sorted_unique(self.edge_version_ids),
        }
    }

    fn check(&self, tx: &dyn Transaction) -> CatalogResult<()> {
        for &id in &self.edge_version_ids {
            require_version(tx, ItemKind::Edge, id)?;
        }
        Ok(())
    }

    fn write_links(
        &self,
        tx: &mut dyn Transaction,
        _ids: &IdGenerator,
        version_id: i64,
    ) -> CatalogResult<()> {
        for &member in &self.edge_version_ids {
            link(tx, labels::GRAPH_VERSION_EDGE, version_id, member)?;
        }
        Ok(())
    }

    fn load(tx: &dyn Transaction, record: &Record) -> StorageResult<Self> {
        Ok(Self {
            edge_version_ids: member_ids(tx, record.id)?,
        })
    }
}

impl VersionBody for StructureBody {
    fn write_links(
        &self,
        tx: &mut dyn Transaction,
        ids: &IdGenerator,
        version_id: i64,
    ) -> CatalogResult<()> {
        for (key, ty) in &self.attributes {
            let attributes = [
                Attribute::id(ids.next_id()),
                Attribute::long(fields::OWNER_ID, version_id),
                Attribute::string(fields::KEY, key.clone()),
                Attribute::string(fields::TYPE, ty.as_str()),
            ];
            if !tx.add_vertex_and_edge(
                labels::STRUCTURE_ATTRIBUTE,
                &attributes,
                labels::ATTRIBUTE_CONNECTION,
                version_id,
                &[],
            )? {
                return Err(StorageError::empty(None, &[Attribute::id(version_id)]).into());
            }
        }
        Ok(())
    }

    fn load(tx: &dyn Transaction, record: &Record) -> StorageResult<Self> {
        let mut attributes = BTreeMap::new();
        for attr in tx.get_adjacent_vertices_by_edge_label(
            labels::ATTRIBUTE_CONNECTION,
            record.id,
            &[fields::KEY, fields::TYPE],
        )? {
            let raw = attr.fields.string(fields::TYPE)?;
            let ty = raw.parse().map_err(|_| StorageError::Corrupt {
                field: fields::TYPE.to_string(),
                raw: raw.clone(),
            })?;
            attributes.insert(attr.fields.string(fields::KEY)?, ty);
        }
        Ok(Self { attributes })
    }
}

impl VersionBody for LineageEdgeBody {
    fn record_fields(&self) -> Vec<Attribute> {
        vec![
            Attribute::long(fields::FROM_VERSION_ID, self.from_version_id),
            Attribute::long(fields::TO_VERSION_ID, self.to_version_id),
        ]
    }

    fn check(&self, tx: &dyn Transaction) -> CatalogResult<()> {
        for id in [self.from_version_id, self.to_version_id] {
            let is_version = tx
                .get_vertex(None, &[Attribute::id(id)])
                .map(|record| ItemKind::ALL.iter().any(|k| k.version_label() == record.label))
                .or_not_found(|| CatalogError::UnknownVersion(id))?;
            if !is_version {
                return Err(CatalogError::UnknownVersion(id));
            }
        }
        Ok(())
    }

    fn write_links(
        &self,
        tx: &mut dyn Transaction,
        _ids: &IdGenerator,
        version_id: i64,
    ) -> CatalogResult<()> {
        link(tx, labels::LINEAGE_CONNECTION, self.from_version_id, version_id)?;
        link(tx, labels::LINEAGE_CONNECTION, version_id, self.to_version_id)
    }

    fn load(_tx: &dyn Transaction, record: &Record) -> StorageResult<Self> {
        Ok(Self {
            from_version_id: record.fields.long(fields::FROM_VERSION_ID)?,
            to_version_id: record.fields.long(fields::TO_VERSION_ID)?,
        })
    }
}

impl VersionBody for LineageGraphBody {
    fn normalize(self) -> Self {
        Self {
            lineage_edge_version_ids: sorted_unique(self.lineage_edge_version_ids),
        }
    }

    fn check(&self, tx: &dyn Transaction) -> CatalogResult<()> {
        for &id in &self.lineage_edge_version_ids {
            require_version(tx, ItemKind::LineageEdge, id)?;
        }
        Ok(())
    }

    fn write_links(
        &self,
        tx: &mut dyn Transaction,
        _ids: &IdGenerator,
        version_id: i64,
    ) -> CatalogResult<()> {
        for &member in &self.lineage_edge_version_ids {
            link(tx, labels::GRAPH_VERSION_EDGE, version_id, member)?;
        }
        Ok(())
    }

    fn load(tx: &dyn Transaction, record: &Record) -> StorageResult<Self> {
        Ok(Self {
            lineage_edge_version_ids: member_ids(tx, record.id)?,
        })
    }
}

/// Creates and reads versions with body `B`.
#[derive(Debug)]
pub struct VersionFactory<'c, B> {
    catalog: &'c Catalog,
    body: PhantomData<fn() -> B>,
}

impl<B> Clone for VersionFactory<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for VersionFactory<'_, B> {}

impl<'c, B: VersionBody> VersionFactory<'c, B> {
    pub(crate) const fn new(catalog: &'c Catalog) -> Self {
        Self {
            catalog,
            body: PhantomData,
        }
    }

    /// Validate, persist, and link a new version into its item's history.
    ///
    /// Nothing is written unless the item exists, the structure version (if
    /// any) exists and accepts the tags, the body's references resolve, and
    /// every parent is in the history.
    ///
    /// # Errors
    ///
    /// NotFound, Validation, or Conflict errors per the failed check, or a
    /// backend fault. The session is aborted in every case.
    #[instrument(skip(self, new), fields(kind = %B::KIND, item_id = new.item_id))]
    pub fn create(&self, new: NewVersion<B>) -> CatalogResult<Version<B>> {
        let catalog = self.catalog;
        let NewVersion {
            item_id,
            tags,
            structure_version_id,
            reference,
            parameters,
            parent_ids,
            body,
        } = new;
        let body = body.normalize();

        let version = catalog.run(|tx| {
            tx.get_vertex(Some(B::KIND.item_label()), &[Attribute::id(item_id)])
                .or_not_found(|| CatalogError::ItemNotFound {
                    kind: B::KIND,
                    key: item_id.to_string(),
                })?;

            let structure = structure_version_id
                .map(|id| load_version::<StructureBody>(tx, id))
                .transpose()?;
            catalog.validator().validate(&tags, structure.as_ref())?;
            body.check(tx)?;

            let mut history = dag::retrieve(tx, item_id)?;
            history.check_parents(&parent_ids)?;

            let ids = catalog.ids();
            let id = ids.next_id();
            let mut attributes = vec![
                Attribute::id(id),
                Attribute::long(fields::ITEM_ID, item_id),
                Attribute::optional(fields::STRUCTURE_VERSION_ID, structure_version_id.map(Into::into)),
                Attribute::optional(fields::REFERENCE, reference.clone().map(Into::into)),
            ];
            attributes.extend(body.record_fields());
            dag::insert_version(
                tx,
                &mut history,
                ids,
                B::KIND.version_label(),
                &attributes,
                &parent_ids,
            )?;

            let tags = write_tags(tx, ids, id, &tags)?;
            write_parameters(tx, ids, id, &parameters)?;
            body.write_links(tx, ids, id)?;

            Ok(Version {
                rich: RichVersion {
                    id,
                    item_id,
                    tags,
                    structure_version_id,
                    reference: reference.clone(),
                    parameters: parameters.clone(),
                },
                body: body.clone(),
            })
        })?;

        info!(version_id = version.id(), "created version");
        Ok(version)
    }

    /// # Errors
    ///
    /// Returns [`CatalogError::VersionNotFound`] if no version of this kind
    /// has `id`.
    pub fn retrieve(&self, id: i64) -> CatalogResult<Version<B>> {
        self.catalog.run(|tx| load_version::<B>(tx, id))
    }
}

fn load_version<B: VersionBody>(tx: &dyn Transaction, id: i64) -> CatalogResult<Version<B>> {
    let record = tx
        .get_vertex(Some(B::KIND.version_label()), &[Attribute::id(id)])
        .or_not_found(|| CatalogError::VersionNotFound { kind: B::KIND, id })?;
    let f = &record.fields;
    Ok(Version {
        rich: RichVersion {
            id: record.id,
            item_id: f.long(fields::ITEM_ID)?,
            tags: load_tags(tx, record.id)?,
            structure_version_id: f.opt_long(fields::STRUCTURE_VERSION_ID)?,
            reference: f.opt_string(fields::REFERENCE)?,
            parameters: load_parameters(tx, record.id)?,
        },
        body: B::load(tx, &record)?,
    })
}

fn write_parameters(
    tx: &mut dyn Transaction,
    ids: &IdGenerator,
    owner_id: i64,
    parameters: &BTreeMap<String, String>,
) -> CatalogResult<()> {
    for (key, value) in parameters {
        let attributes = [
            Attribute::id(ids.next_id()),
            Attribute::long(fields::OWNER_ID, owner_id),
            Attribute::string(fields::KEY, key.clone()),
            Attribute::string(fields::VALUE, value.clone()),
        ];
        if !tx.add_vertex_and_edge(
            labels::PARAMETER,
            &attributes,
            labels::PARAMETER_CONNECTION,
            owner_id,
            &[],
        )? {
            return Err(StorageError::empty(None, &[Attribute::id(owner_id)]).into());
        }
    }
    Ok(())
}

fn load_parameters(tx: &dyn Transaction, owner_id: i64) -> StorageResult<BTreeMap<String, String>> {
    tx.get_adjacent_vertices_by_edge_label(
        labels::PARAMETER_CONNECTION,
        owner_id,
        &[fields::KEY, fields::VALUE],
    )?
    .into_iter()
    .map(|record| -> StorageResult<(String, String)> {
        Ok((
            record.fields.string(fields::KEY)?,
            record.fields.string(fields::VALUE)?,
        ))
    })
    .collect()
}
