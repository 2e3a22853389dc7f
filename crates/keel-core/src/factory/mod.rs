//! Item and version factories: the catalog's public write and read surface.
//!
//! A [`Catalog`] owns one [`Storage`], one [`IdGenerator`] and one
//! [`StructureValidator`]. Every factory call runs inside its own storage
//! session: the session commits when the call succeeds and is aborted
//! before the error is returned when it fails.

pub mod item;
pub mod version;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

pub use item::ItemFactory;
pub use version::{VersionBody, VersionFactory};

use crate::config::KeelConfig;
use crate::dag::{self, VersionHistoryDag, VersionSuccessor};
use crate::error::{CatalogError, CatalogResult};
use crate::ids::IdGenerator;
use crate::lineage::LineageQueries;
use crate::model::{ItemKind, Tag, TagMap, ValueType};
use crate::storage::{
    self, Attribute, Backend, Storage, StorageError, StorageResult, Transaction, fields, labels,
};
use crate::validate::StructureValidator;

/// Map a storage "empty result" to a typed not-found error.
pub(crate) trait NotFoundExt<T> {
    fn or_not_found(self, err: impl FnOnce() -> CatalogError) -> CatalogResult<T>;
}

impl<T> NotFoundExt<T> for StorageResult<T> {
    fn or_not_found(self, err: impl FnOnce() -> CatalogError) -> CatalogResult<T> {
        match self {
            Err(e) if e.is_empty_result() => Err(err()),
            other => other.map_err(CatalogError::from),
        }
    }
}

#[derive(Clone)]
pub struct Catalog {
    storage: Arc<dyn Storage>,
    ids: Arc<IdGenerator>,
    validator: StructureValidator,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("backend", &self.storage.backend())
            .field("next_id", &self.ids.peek())
            .field("validator", &self.validator)
            .finish()
    }
}

impl Catalog {
    /// Wrap `storage`, seeding ids above the highest stored id.
    ///
    /// # Errors
    ///
    /// Returns a backend fault if the highest id cannot be read.
    pub fn new(
        storage: Arc<dyn Storage>,
        validator: StructureValidator,
        machine_id: u32,
        machine_count: u32,
    ) -> CatalogResult<Self> {
        let floor = {
            let tx = storage.begin()?;
            let highest = tx.highest_id()?;
            tx.abort()?;
            highest
        };
        debug!(backend = %storage.backend(), floor, "seeding id generator");
        Ok(Self {
            storage,
            ids: Arc::new(IdGenerator::new(machine_id, machine_count, floor)),
            validator,
        })
    }

    /// A throwaway catalog with default validation.
    ///
    /// # Errors
    ///
    /// Returns a backend fault if the store cannot be created.
    pub fn in_memory(backend: Backend) -> CatalogResult<Self> {
        let storage: Arc<dyn Storage> = match backend {
            Backend::Sqlite => Arc::new(storage::sqlite::SqliteStore::open_in_memory()?),
            Backend::Graph => Arc::new(storage::graph::GraphStore::in_memory()),
        };
        Self::new(storage, StructureValidator::default(), 0, 1)
    }

    /// Open the store `config` names under `project_root`.
    ///
    /// # Errors
    ///
    /// Returns a backend fault if the store cannot be opened or locked.
    pub fn open(config: &KeelConfig, project_root: &Path) -> CatalogResult<Self> {
        let path = config.store_path(project_root);
        let storage = storage::open(config.storage.backend, &path)?;
        Self::new(
            storage,
            StructureValidator::new(config.validation.require_all_attributes),
            config.ids.machine_id,
            config.ids.machine_count,
        )
    }

    #[must_use]
    pub fn backend(&self) -> Backend {
        self.storage.backend()
    }

    #[must_use]
    pub const fn validator(&self) -> StructureValidator {
        self.validator
    }

    #[must_use]
    pub const fn items(&self, kind: ItemKind) -> ItemFactory<'_> {
        ItemFactory::new(self, kind)
    }

    #[must_use]
    pub const fn versions<B: VersionBody>(&self) -> VersionFactory<'_, B> {
        VersionFactory::new(self)
    }

    #[must_use]
    pub const fn lineage(&self) -> LineageQueries<'_> {
        LineageQueries::new(self)
    }

    /// The item's version history as currently stored.
    ///
    /// # Errors
    ///
    /// Returns a backend fault if the history cannot be read.
    pub fn dag(&self, item_id: i64) -> CatalogResult<VersionHistoryDag> {
        self.run(|tx| Ok(dag::retrieve(tx, item_id)?))
    }

    /// One successor edge by id.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::SuccessorNotFound`] when no edge has `id`.
    pub fn successor(&self, id: i64) -> CatalogResult<VersionSuccessor> {
        self.run(|tx| {
            dag::successor(tx, id).or_not_found(|| CatalogError::SuccessorNotFound(id))
        })
    }

    pub(crate) fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    /// The id this handle allocates next, as of its last session.
    ///
    /// Another handle writing to the same store may move it forward.
    #[must_use]
    pub fn peek_next_id(&self) -> i64 {
        self.ids.peek()
    }

    /// Run `op` in a fresh session; commit on success, abort on failure.
    ///
    /// The session is the store's only writer, so the id generator is first
    /// moved past every id another handle may have written.
    pub(crate) fn run<T>(
        &self,
        op: impl FnOnce(&mut dyn Transaction) -> CatalogResult<T>,
    ) -> CatalogResult<T> {
        let mut tx = self.storage.begin()?;
        let highest = match tx.highest_id() {
            Ok(highest) => highest,
            Err(err) => {
                if let Err(abort_err) = tx.abort() {
                    warn!(error = %abort_err, original = %err, "session abort failed");
                }
                return Err(err.into());
            }
        };
        self.ids.advance_past(highest);
        match op(tx.as_mut()) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = tx.abort() {
                    warn!(error = %abort_err, original = %err, "session abort failed");
                }
                Err(err)
            }
        }
    }
}

/// Persist `tags` as `Tag` records owned by `owner_id`.
pub(crate) fn write_tags(
    tx: &mut dyn Transaction,
    ids: &IdGenerator,
    owner_id: i64,
    tags: &TagMap,
) -> CatalogResult<TagMap> {
    let mut bound = TagMap::new();
    for (key, tag) in tags {
        let attributes = [
            Attribute::id(ids.next_id()),
            Attribute::long(fields::OWNER_ID, owner_id),
            Attribute::string(fields::KEY, key.clone()),
            Attribute::optional(fields::VALUE, tag.value.clone()),
            Attribute::optional(fields::TYPE, tag.value_type().map(|ty| ty.as_str().into())),
        ];
        if !tx.add_vertex_and_edge(
            labels::TAG,
            &attributes,
            labels::TAG_CONNECTION,
            owner_id,
            &[],
        )? {
            return Err(StorageError::empty(None, &[Attribute::id(owner_id)]).into());
        }
        bound.insert(key.clone(), tag.bound_to(owner_id));
    }
    Ok(bound)
}

pub(crate) fn load_tags(tx: &dyn Transaction, owner_id: i64) -> StorageResult<TagMap> {
    tx.get_adjacent_vertices_by_edge_label(
        labels::TAG_CONNECTION,
        owner_id,
        &[fields::KEY, fields::VALUE, fields::TYPE],
    )?
    .into_iter()
    .map(|record| -> StorageResult<(String, Tag)> {
        let key = record.fields.string(fields::KEY)?;
        let value = record.fields.get(fields::VALUE).cloned();
        let value_type = record
            .fields
            .opt_string(fields::TYPE)?
            .map(|raw| {
                raw.parse::<ValueType>().map_err(|_| StorageError::Corrupt {
                    field: fields::TYPE.to_string(),
                    raw,
                })
            })
            .transpose()?;
        Ok((key.clone(), Tag::typed(owner_id, key, value_type, value)))
    })
    .collect()
}
