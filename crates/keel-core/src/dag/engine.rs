//! Reading and writing version histories through a storage session.
//!
//! Successor links are physically anchored at the item record for root
//! edges, so one descendant traversal from the item id recovers the whole
//! history. The logical endpoints live in each link's `from_id` / `to_id`
//! fields, where the sentinel root is stored as 0.

use serde::Serialize;
use tracing::{debug, instrument};

use super::history::{ROOT_ID, VersionHistoryDag, VersionSuccessor};
use crate::error::{CatalogError, CatalogResult};
use crate::ids::IdGenerator;
use crate::model::Value;
use crate::storage::{
    Attribute, EdgeRecord, StorageError, StorageResult, Transaction, fields, labels, record_id,
};

impl VersionSuccessor {
    fn from_record(record: &EdgeRecord) -> StorageResult<Self> {
        Ok(Self {
            id: record.fields.long(fields::ID)?,
            from_id: record.fields.long(fields::FROM_ID)?,
            to_id: record.fields.long(fields::TO_ID)?,
        })
    }
}

/// Result of [`truncate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TruncationSummary {
    pub item_id: i64,
    pub height: usize,
    pub removed_edge_ids: Vec<i64>,
    pub rerooted_version_ids: Vec<i64>,
    pub leaves: Vec<i64>,
}

fn successor_attributes(edge: VersionSuccessor, item_id: i64) -> [Attribute; 4] {
    [
        Attribute::id(edge.id),
        Attribute::long(fields::FROM_ID, edge.from_id),
        Attribute::long(fields::TO_ID, edge.to_id),
        Attribute::long(fields::ITEM_ID, item_id),
    ]
}

/// Physical source of a successor link.
const fn anchor(item_id: i64, from_id: i64) -> i64 {
    if from_id == ROOT_ID { item_id } else { from_id }
}

fn missing_anchor(anchor_id: i64) -> CatalogError {
    StorageError::empty(None, &[Attribute::id(anchor_id)]).into()
}

/// Rebuild an item's history from its stored successor links.
///
/// # Errors
///
/// Returns a storage error if the traversal fails or a link is malformed.
#[instrument(level = "debug", skip(tx))]
pub fn retrieve(tx: &dyn Transaction, item_id: i64) -> StorageResult<VersionHistoryDag> {
    let mut successors = Vec::new();
    for record in tx.get_descendant_edges_by_label(item_id, labels::VERSION_SUCCESSOR)? {
        if record.fields.opt_long(fields::ITEM_ID)? != Some(item_id) {
            continue;
        }
        successors.push(VersionSuccessor::from_record(&record)?);
    }
    Ok(VersionHistoryDag::from_successors(item_id, successors))
}

/// Fetch one successor link by its id.
///
/// # Errors
///
/// Returns [`StorageError::EmptyResult`] when no such link exists.
pub fn successor(tx: &dyn Transaction, id: i64) -> StorageResult<VersionSuccessor> {
    let record = tx.get_edge(labels::VERSION_SUCCESSOR, &[Attribute::id(id)])?;
    VersionSuccessor::from_record(&record)
}

/// Persist a version record and link it under `parent_ids`.
///
/// `attributes` must carry the new version's LONG `id`; the leaf flag is
/// added here. One parent uses the combined vertex-and-edge write so the
/// record is never stored unlinked. Parents stop being leaves.
///
/// # Errors
///
/// Fails with [`super::DagError::UnknownParent`] before any write if a
/// parent is not in `dag`, or with a storage error from the writes.
pub fn insert_version(
    tx: &mut dyn Transaction,
    dag: &mut VersionHistoryDag,
    ids: &IdGenerator,
    label: &str,
    attributes: &[Attribute],
    parent_ids: &[i64],
) -> CatalogResult<Vec<VersionSuccessor>> {
    let parents = dag.check_parents(parent_ids)?;
    let item_id = dag.item_id();
    let version_id = record_id(label, attributes)?;

    let mut record = attributes.to_vec();
    record.push(Attribute::new(fields::IS_LEAF, true));

    let edges: Vec<VersionSuccessor> = parents
        .iter()
        .map(|&from_id| VersionSuccessor {
            id: ids.next_id(),
            from_id,
            to_id: version_id,
        })
        .collect();

    if let [edge] = edges.as_slice() {
        let source = anchor(item_id, edge.from_id);
        let linked = tx.add_vertex_and_edge(
            label,
            &record,
            labels::VERSION_SUCCESSOR,
            source,
            &successor_attributes(*edge, item_id),
        )?;
        if !linked {
            return Err(missing_anchor(source));
        }
    } else {
        tx.add_vertex(label, &record)?;
        for edge in &edges {
            let source = anchor(item_id, edge.from_id);
            let linked = tx.add_edge(
                labels::VERSION_SUCCESSOR,
                source,
                version_id,
                &successor_attributes(*edge, item_id),
            )?;
            if !linked {
                return Err(missing_anchor(source));
            }
        }
    }

    for &parent in &parents {
        if parent != ROOT_ID {
            tx.set_property(parent, fields::IS_LEAF, &Value::Boolean(false))?;
        }
    }
    for edge in &edges {
        dag.add_successor(*edge);
    }
    debug!(item_id, version_id, parents = ?parents, "linked version into history");
    Ok(edges)
}

/// Keep `height` generations behind each leaf and re-root the rest.
///
/// Pruned version records stay in storage; only their successor links go.
///
/// # Errors
///
/// Fails with [`super::DagError::InvalidHeight`] for height 0, or with a
/// storage error from the rewrite.
#[instrument(level = "debug", skip(tx, ids))]
pub fn truncate(
    tx: &mut dyn Transaction,
    ids: &IdGenerator,
    item_id: i64,
    height: usize,
) -> CatalogResult<TruncationSummary> {
    let mut dag = retrieve(tx, item_id)?;
    let plan = dag.plan_truncation(height)?;

    for edge in &plan.removed {
        tx.delete_edges(labels::VERSION_SUCCESSOR, &[Attribute::id(edge.id)])?;
    }

    let mut new_edge_ids = Vec::with_capacity(plan.rerooted.len());
    for &version_id in &plan.rerooted {
        let edge = VersionSuccessor {
            id: ids.next_id(),
            from_id: ROOT_ID,
            to_id: version_id,
        };
        if !tx.add_edge(
            labels::VERSION_SUCCESSOR,
            item_id,
            version_id,
            &successor_attributes(edge, item_id),
        )? {
            return Err(missing_anchor(item_id));
        }
        new_edge_ids.push(edge.id);
    }
    dag.apply_truncation(&plan, &new_edge_ids);

    Ok(TruncationSummary {
        item_id,
        height,
        removed_edge_ids: plan.removed.iter().map(|e| e.id).collect(),
        rerooted_version_ids: plan.rerooted,
        leaves: dag.leaves(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::storage::graph::GraphStore;
    use crate::storage::sqlite::SqliteStore;

    fn exercise(store: &dyn Storage) {
        let ids = IdGenerator::new(0, 1, 100);
        let mut tx = store.begin().expect("begin");
        tx.add_vertex("Structure", &[Attribute::id(1)]).expect("item");

        let mut dag = retrieve(tx.as_ref(), 1).expect("empty history");
        assert!(dag.is_empty());

        insert_version(tx.as_mut(), &mut dag, &ids, "StructureVersion", &[Attribute::id(2)], &[])
            .expect("v1");
        insert_version(tx.as_mut(), &mut dag, &ids, "StructureVersion", &[Attribute::id(3)], &[2])
            .expect("v2");

        let stored = retrieve(tx.as_ref(), 1).expect("history");
        assert_eq!(stored, dag);
        assert_eq!(stored.leaves(), vec![3]);

        let v1 = tx.get_vertex(None, &[Attribute::id(2)]).expect("v1 record");
        assert_eq!(v1.fields.opt_bool(fields::IS_LEAF).expect("flag"), Some(false));

        let summary = truncate(tx.as_mut(), &ids, 1, 1).expect("truncate");
        assert_eq!(summary.rerooted_version_ids, vec![3]);
        assert_eq!(summary.leaves, vec![3]);

        let after = retrieve(tx.as_ref(), 1).expect("history");
        let edges: Vec<_> = after.successors().copied().collect();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from_id, ROOT_ID);
        assert_eq!(edges[0].to_id, 3);
        assert_eq!(successor(tx.as_ref(), edges[0].id).expect("lookup"), edges[0]);

        let err = insert_version(
            tx.as_mut(),
            &mut dag,
            &ids,
            "StructureVersion",
            &[Attribute::id(4)],
            &[55],
        )
        .expect_err("unknown parent");
        assert!(matches!(err, CatalogError::Dag(_)));
        assert!(tx.get_vertex(None, &[Attribute::id(4)]).is_err());
    }

    #[test]
    fn history_round_trips_on_sqlite() {
        exercise(&SqliteStore::open_in_memory().expect("store"));
    }

    #[test]
    fn history_round_trips_on_graph() {
        exercise(&GraphStore::in_memory());
    }
}
