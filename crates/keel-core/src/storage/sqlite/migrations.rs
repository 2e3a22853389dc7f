//! Schema versioning for the SQLite backend via `PRAGMA user_version`.

use super::schema;
use crate::storage::{StorageError, StorageResult};
use rusqlite::{Connection, types::Type};
use tracing::{debug, info};

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "records and links",
        sql: schema::MIGRATION_V1_SQL,
    },
    Migration {
        version: 2,
        name: "link field lookup index",
        sql: schema::MIGRATION_V2_SQL,
    },
];

/// Highest schema version this build writes.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

/// # Errors
///
/// Fails if the pragma cannot be read or holds a negative value.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let raw: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(err)))
}

/// Bring the store up to [`LATEST_SCHEMA_VERSION`], one transaction per step.
///
/// # Errors
///
/// [`StorageError::UnsupportedSchema`] for a store written by a newer
/// build, or the SQLite error of the failing step.
pub fn migrate(conn: &mut Connection) -> StorageResult<u32> {
    let mut current = current_schema_version(conn)?;
    if current > LATEST_SCHEMA_VERSION {
        return Err(StorageError::UnsupportedSchema {
            found: current,
            supported: LATEST_SCHEMA_VERSION,
        });
    }

    let start = current;
    for step in MIGRATIONS.iter().filter(|m| m.version > start) {
        let tx = conn.transaction()?;
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", i64::from(step.version))?;
        tx.execute(
            "UPDATE store_meta SET schema_version = ?1 WHERE id = 1",
            [i64::from(step.version)],
        )?;
        tx.commit()?;
        info!(version = step.version, name = step.name, "migrated store schema");
        current = step.version;
    }
    debug!(version = current, "store schema current");
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::{LATEST_SCHEMA_VERSION, MIGRATIONS, current_schema_version, migrate};
    use crate::storage::StorageError;
    use crate::storage::sqlite::schema;
    use rusqlite::{Connection, params};

    fn has_object(conn: &Connection, kind: &str, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = ?1 AND name = ?2)",
            params![kind, name],
            |row| row.get(0),
        )
        .expect("sqlite_master query")
    }

    #[test]
    fn steps_are_ordered_and_end_at_latest() {
        let versions: Vec<u32> = MIGRATIONS.iter().map(|m| m.version).collect();
        assert!(versions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(versions.last(), Some(&LATEST_SCHEMA_VERSION));
    }

    #[test]
    fn fresh_store_gets_every_table_and_index() {
        let mut conn = Connection::open_in_memory().expect("open");
        assert_eq!(migrate(&mut conn).expect("migrate"), LATEST_SCHEMA_VERSION);
        assert_eq!(current_schema_version(&conn).expect("version"), LATEST_SCHEMA_VERSION);

        for table in ["records", "record_fields", "links", "link_fields", "store_meta"] {
            assert!(has_object(&conn, "table", table), "missing table {table}");
        }
        for index in schema::REQUIRED_INDEXES {
            assert!(has_object(&conn, "index", index), "missing index {index}");
        }
    }

    #[test]
    fn rerun_changes_nothing() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;
        migrate(&mut conn).expect("first run");
        migrate(&mut conn).expect("second run");

        let (rows, recorded): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), MAX(schema_version) FROM store_meta",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_eq!(rows, 1);
        assert_eq!(recorded, i64::from(LATEST_SCHEMA_VERSION));
        Ok(())
    }

    #[test]
    fn v1_store_gains_link_field_index() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::MIGRATION_V1_SQL)?;
        conn.pragma_update(None, "user_version", 1_i64)?;
        assert!(!has_object(&conn, "index", "idx_link_fields_lookup"));

        migrate(&mut conn).expect("upgrade");
        assert!(has_object(&conn, "index", "idx_link_fields_lookup"));
        Ok(())
    }

    #[test]
    fn newer_store_is_refused() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "user_version", 99_i64)?;
        let err = migrate(&mut conn).expect_err("future schema");
        assert!(matches!(
            err,
            StorageError::UnsupportedSchema {
                found: 99,
                supported: LATEST_SCHEMA_VERSION
            }
        ));
        Ok(())
    }
}
