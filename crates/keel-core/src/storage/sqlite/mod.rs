//! Tabular backend: records and join-record links in SQLite.
//!
//! Runtime pragmas follow the usual single-file defaults:
//! - `journal_mode = WAL` so readers never block the writer
//! - `busy_timeout = 5s` to ride out transient lock contention
//! - `foreign_keys = ON` so dangling links and fields are rejected
//!
//! Every predicate is an `EXISTS` sub-select over `record_fields` (or
//! `link_fields`) matching field name, type discriminator, and value. Values
//! are bound as typed parameters, never spliced into SQL text.

pub mod migrations;
pub mod schema;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::{instrument, warn};

use super::{
    Attribute, Backend, EdgeRecord, Fields, Record, Storage, StorageError, StorageResult,
    Transaction, fields, labels, present, record_id,
};
use crate::model::{Value, ValueType};

/// Busy timeout applied to every connection.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A SQLite-backed [`Storage`]. One connection, one session at a time.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the store at `path`, apply pragmas, and migrate.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the database
    /// cannot be opened, configured, or migrated.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut conn = Connection::open(path)?;
        configure_connection(&conn)?;
        let version = migrations::migrate(&mut conn)?;
        tracing::debug!(path = %path.display(), schema_version = version, "opened sqlite store");

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// A private, throwaway store.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be migrated.
    pub fn open_in_memory() -> StorageResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Backing file, or `None` for an in-memory store.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

impl Storage for SqliteStore {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn begin(&self) -> StorageResult<Box<dyn Transaction + '_>> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTransaction {
            conn,
            finished: false,
        }))
    }
}

/// One `BEGIN IMMEDIATE` .. `COMMIT`/`ROLLBACK` session.
///
/// Dropping an unfinished session rolls it back.
pub struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %err, "rollback of abandoned sqlite session failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Typed value mapping
// ---------------------------------------------------------------------------

fn encode(value: &Value) -> SqlValue {
    match value {
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Integer(v) => SqlValue::Integer(i64::from(*v)),
        Value::Long(v) => SqlValue::Integer(*v),
        Value::Boolean(v) => SqlValue::Integer(i64::from(*v)),
    }
}

fn decode(field_type: &str, raw: SqlValue) -> rusqlite::Result<Value> {
    let ty: ValueType = field_type
        .parse()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(err)))?;
    match (ty, raw) {
        (ValueType::String, SqlValue::Text(s)) => Ok(Value::String(s)),
        (ValueType::Integer, SqlValue::Integer(v)) => i32::try_from(v)
            .map(Value::Integer)
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(2, Type::Integer, Box::new(err))),
        (ValueType::Long, SqlValue::Integer(v)) => Ok(Value::Long(v)),
        (ValueType::Boolean, SqlValue::Integer(v)) => Ok(Value::Boolean(v != 0)),
        (_, other) => Err(rusqlite::Error::InvalidColumnType(
            2,
            "value".to_string(),
            other.data_type(),
        )),
    }
}

/// Append one `EXISTS` clause per present attribute.
///
/// `owner` is the correlated key column, e.g. `r.id` or `l.link_id`.
fn push_predicates(
    sql: &mut String,
    params: &mut Vec<SqlValue>,
    table: &str,
    key_column: &str,
    owner: &str,
    attributes: &[Attribute],
) {
    for (field, value) in present(attributes) {
        sql.push_str(&format!(
            " AND EXISTS (SELECT 1 FROM {table} p WHERE p.{key_column} = {owner} \
             AND p.field = ? AND p.field_type = ? AND p.value = ?)"
        ));
        params.push(SqlValue::Text(field.to_string()));
        params.push(SqlValue::Text(value.value_type().as_str().to_string()));
        params.push(encode(value));
    }
}

const RECORD_FIELDS_SQL: &str =
    "SELECT field, field_type, value FROM record_fields WHERE record_id = ?1";
const LINK_FIELDS_SQL: &str = "SELECT field, field_type, value FROM link_fields WHERE link_id = ?1";

impl SqliteTransaction<'_> {
    fn load_fields(&self, sql: &str, owner_id: i64) -> StorageResult<Fields> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map([owner_id], |row| {
            let field: String = row.get(0)?;
            let field_type: String = row.get(1)?;
            let raw: SqlValue = row.get(2)?;
            Ok((field, decode(&field_type, raw)?))
        })?;
        Ok(Fields(rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()?))
    }

    fn load_record(&self, id: i64, label: String) -> StorageResult<Record> {
        Ok(Record {
            id,
            label,
            fields: self.load_fields(RECORD_FIELDS_SQL, id)?,
        })
    }

    fn load_link(&self, link_id: i64, label: &str, from_id: i64, to_id: i64) -> StorageResult<EdgeRecord> {
        Ok(EdgeRecord {
            label: label.to_string(),
            from_id,
            to_id,
            fields: self.load_fields(LINK_FIELDS_SQL, link_id)?,
        })
    }

    fn record_exists(&self, id: i64) -> StorageResult<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM records WHERE id = ?1)",
            [id],
            |row| row.get(0),
        )?)
    }

    fn write_fields(&self, sql: &str, owner_id: i64, attributes: &[Attribute]) -> StorageResult<()> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        for (field, value) in present(attributes) {
            stmt.execute(params![
                owner_id,
                field,
                value.value_type().as_str(),
                encode(value)
            ])?;
        }
        Ok(())
    }

    fn links_from(&self, sql: &str, params: &[SqlValue], label: &str) -> StorageResult<Vec<EdgeRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(link_id, from_id, to_id)| self.load_link(link_id, label, from_id, to_id))
            .collect()
    }
}

const UPSERT_RECORD_FIELD_SQL: &str = "
    INSERT INTO record_fields (record_id, field, field_type, value)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT (record_id, field)
    DO UPDATE SET field_type = excluded.field_type, value = excluded.value";

const UPSERT_LINK_FIELD_SQL: &str = "
    INSERT INTO link_fields (link_id, field, field_type, value)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT (link_id, field)
    DO UPDATE SET field_type = excluded.field_type, value = excluded.value";

impl Transaction for SqliteTransaction<'_> {
    fn add_vertex(&mut self, label: &str, attributes: &[Attribute]) -> StorageResult<()> {
        let id = record_id(label, attributes)?;
        if self.record_exists(id)? {
            return Err(StorageError::DuplicateId(id));
        }
        self.conn.execute(
            "INSERT INTO records (id, label) VALUES (?1, ?2)",
            params![id, label],
        )?;
        self.write_fields(UPSERT_RECORD_FIELD_SQL, id, attributes)
    }

    fn add_edge(
        &mut self,
        label: &str,
        from_id: i64,
        to_id: i64,
        attributes: &[Attribute],
    ) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO links (label, from_id, to_id)
             SELECT ?1, f.id, t.id FROM records f, records t
             WHERE f.id = ?2 AND t.id = ?3",
            params![label, from_id, to_id],
        )?;
        if inserted == 0 {
            return Ok(false);
        }
        let link_id = self.conn.last_insert_rowid();
        self.write_fields(UPSERT_LINK_FIELD_SQL, link_id, attributes)?;
        Ok(true)
    }

    fn add_vertex_and_edge(
        &mut self,
        label: &str,
        attributes: &[Attribute],
        edge_label: &str,
        from_id: i64,
        edge_attributes: &[Attribute],
    ) -> StorageResult<bool> {
        if !self.record_exists(from_id)? {
            return Ok(false);
        }
        let id = record_id(label, attributes)?;
        self.add_vertex(label, attributes)?;
        self.add_edge(edge_label, from_id, id, edge_attributes)
    }

    fn get_vertex(&self, label: Option<&str>, attributes: &[Attribute]) -> StorageResult<Record> {
        let mut sql = String::from("SELECT r.id, r.label FROM records r WHERE 1 = 1");
        let mut params = Vec::new();
        if let Some(label) = label {
            sql.push_str(" AND r.label = ?");
            params.push(SqlValue::Text(label.to_string()));
        }
        push_predicates(&mut sql, &mut params, "record_fields", "record_id", "r.id", attributes);
        sql.push_str(" ORDER BY r.id LIMIT 1");

        let found = self
            .conn
            .query_row(&sql, params_from_iter(params.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .optional()?;
        let (id, label_found) = found.ok_or_else(|| StorageError::empty(label, attributes))?;
        self.load_record(id, label_found)
    }

    fn get_vertices_by_attributes(&self, attributes: &[Attribute]) -> StorageResult<Vec<i64>> {
        let mut sql = String::from("SELECT r.id FROM records r WHERE 1 = 1");
        let mut params = Vec::new();
        push_predicates(&mut sql, &mut params, "record_fields", "record_id", "r.id", attributes);
        sql.push_str(" ORDER BY r.id");

        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(params.iter()), |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    fn get_edge(&self, label: &str, attributes: &[Attribute]) -> StorageResult<EdgeRecord> {
        let mut sql =
            String::from("SELECT l.link_id, l.from_id, l.to_id FROM links l WHERE l.label = ?");
        let mut params = vec![SqlValue::Text(label.to_string())];
        push_predicates(&mut sql, &mut params, "link_fields", "link_id", "l.link_id", attributes);
        sql.push_str(" ORDER BY l.link_id LIMIT 1");

        self.links_from(&sql, &params, label)?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::empty(Some(label), attributes))
    }

    #[instrument(level = "trace", skip(self))]
    fn get_descendant_edges_by_label(
        &self,
        start_id: i64,
        label: &str,
    ) -> StorageResult<Vec<EdgeRecord>> {
        let sql = "
            WITH RECURSIVE reach(id) AS (
                SELECT ?1
                UNION
                SELECT l.to_id FROM links l JOIN reach ON l.from_id = reach.id
                WHERE l.label = ?2
            )
            SELECT l.link_id, l.from_id, l.to_id
            FROM links l JOIN reach ON l.from_id = reach.id
            WHERE l.label = ?2
            ORDER BY l.link_id";
        self.links_from(
            sql,
            &[SqlValue::Integer(start_id), SqlValue::Text(label.to_string())],
            label,
        )
    }

    fn get_adjacent_vertices_by_edge_label(
        &self,
        edge_label: &str,
        id: i64,
        fields: &[&str],
    ) -> StorageResult<Vec<Record>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT DISTINCT r.id, r.label
             FROM links l JOIN records r ON r.id = l.to_id
             WHERE l.from_id = ?1 AND l.label = ?2
             ORDER BY r.id",
        )?;
        let rows = stmt
            .query_map(params![id, edge_label], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        rows.into_iter()
            .map(|(id, label)| Ok(self.load_record(id, label)?.project(fields)))
            .collect()
    }

    fn set_property(&mut self, id: i64, key: &str, value: &Value) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO record_fields (record_id, field, field_type, value)
             SELECT id, ?2, ?3, ?4 FROM records WHERE id = ?1
             ON CONFLICT (record_id, field)
             DO UPDATE SET field_type = excluded.field_type, value = excluded.value",
            params![id, key, value.value_type().as_str(), encode(value)],
        )?;
        Ok(())
    }

    fn delete_edges(&mut self, label: &str, attributes: &[Attribute]) -> StorageResult<usize> {
        let mut sql = String::from(
            "DELETE FROM links WHERE link_id IN (SELECT l.link_id FROM links l WHERE l.label = ?",
        );
        let mut params = vec![SqlValue::Text(label.to_string())];
        push_predicates(&mut sql, &mut params, "link_fields", "link_id", "l.link_id", attributes);
        sql.push(')');

        Ok(self.conn.execute(&sql, params_from_iter(params.iter()))?)
    }

    fn highest_id(&self) -> StorageResult<i64> {
        let highest: Option<i64> = self.conn.query_row(
            "SELECT MAX(top) FROM (
                 SELECT MAX(id) AS top FROM records
                 UNION ALL
                 SELECT MAX(value) FROM link_fields WHERE field = ?1 AND field_type = ?2
             )",
            params![fields::ID, ValueType::Long.as_str()],
            |row| row.get(0),
        )?;
        Ok(highest.unwrap_or(0))
    }

    fn transitive_closure(&self, version_id: i64) -> StorageResult<Vec<i64>> {
        let mut stmt = self.conn.prepare_cached(
            "WITH RECURSIVE reach(id) AS (
                 SELECT l.to_id FROM links l WHERE l.from_id = ?1 AND l.label = ?2
                 UNION
                 SELECT l.to_id FROM links l JOIN reach ON l.from_id = reach.id
                 WHERE l.label = ?2
             )
             SELECT id FROM reach ORDER BY id",
        )?;
        let ids = stmt
            .query_map(params![version_id, labels::EDGE_VERSION_CONNECTION], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    fn commit(mut self: Box<Self>) -> StorageResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    fn abort(mut self: Box<Self>) -> StorageResult<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().expect("in-memory store")
    }

    #[test]
    fn open_sets_wal_busy_timeout_and_fk() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = SqliteStore::open(&dir.path().join("nested/catalog.sqlite3")).expect("open");
        let conn = store.conn.lock().expect("conn");

        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("journal_mode");
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");

        let busy_timeout_ms: u64 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .expect("busy_timeout");
        assert_eq!(u128::from(busy_timeout_ms), DEFAULT_BUSY_TIMEOUT.as_millis());

        let foreign_keys: i64 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("foreign_keys");
        assert_eq!(foreign_keys, 1);
    }

    #[test]
    fn string_and_integer_predicates_do_not_cross_match() {
        let store = store();
        let mut tx = store.begin().expect("begin");
        tx.add_vertex("Tag", &[Attribute::id(1), Attribute::string("value", "1")])
            .expect("string tag");
        tx.add_vertex("Tag", &[Attribute::id(2), Attribute::new("value", 1_i32)])
            .expect("integer tag");

        assert_eq!(
            tx.get_vertices_by_attributes(&[Attribute::string("value", "1")])
                .expect("lookup"),
            vec![1]
        );
        assert_eq!(
            tx.get_vertices_by_attributes(&[Attribute::new("value", 1_i32)])
                .expect("lookup"),
            vec![2]
        );
        let record = tx.get_vertex(Some("Tag"), &[Attribute::id(2)]).expect("get");
        assert_eq!(record.fields.get("value"), Some(&Value::Integer(1)));
    }

    #[test]
    fn dropped_session_rolls_back() {
        let store = store();
        {
            let mut tx = store.begin().expect("begin");
            tx.add_vertex("Node", &[Attribute::id(7)]).expect("add");
        }
        let tx = store.begin().expect("begin again");
        assert!(tx.get_vertex(None, &[Attribute::id(7)]).expect_err("gone").is_empty_result());
    }

    #[test]
    fn dangling_links_write_nothing() {
        let store = store();
        let mut tx = store.begin().expect("begin");
        tx.add_vertex("Node", &[Attribute::id(1)]).expect("add");

        assert!(!tx.add_edge("TagConnection", 1, 99, &[]).expect("edge"));
        assert!(
            !tx.add_vertex_and_edge("Tag", &[Attribute::id(2)], "TagConnection", 99, &[])
                .expect("vertex and edge")
        );
        assert!(tx.get_vertex(None, &[Attribute::id(2)]).is_err());
        assert_eq!(tx.highest_id().expect("highest"), 1);
    }

    #[test]
    fn highest_id_includes_link_ids() {
        let store = store();
        let mut tx = store.begin().expect("begin");
        tx.add_vertex("Node", &[Attribute::id(3)]).expect("a");
        tx.add_vertex("NodeVersion", &[Attribute::id(4)]).expect("b");
        assert!(
            tx.add_edge(labels::VERSION_SUCCESSOR, 3, 4, &[Attribute::id(12)])
                .expect("edge")
        );
        assert_eq!(tx.highest_id().expect("highest"), 12);
    }
}
