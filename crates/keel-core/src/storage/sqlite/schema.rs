//! Tabular layout for the SQLite backend.
//!
//! Records and links are stored entity-attribute-value style:
//! - `records` holds one row per vertex (its id and label)
//! - `record_fields` holds each typed field of a record
//! - `links` emulates graph edges as join rows between two records
//! - `link_fields` holds each typed field of a link
//! - `store_meta` mirrors the applied schema version
//!
//! `field_type` is the persisted type discriminator. The `value` columns are
//! declared without a type so SQLite applies no affinity and TEXT `'1'`
//! never collapses into INTEGER `1`.

/// Migration v1: record and link tables plus store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY,
    label TEXT NOT NULL CHECK (length(trim(label)) > 0)
);

CREATE TABLE IF NOT EXISTS record_fields (
    record_id INTEGER NOT NULL REFERENCES records(id) ON DELETE CASCADE,
    field TEXT NOT NULL,
    field_type TEXT NOT NULL CHECK (field_type IN ('string', 'integer', 'boolean', 'long')),
    value NOT NULL,
    PRIMARY KEY (record_id, field)
);

CREATE TABLE IF NOT EXISTS links (
    link_id INTEGER PRIMARY KEY AUTOINCREMENT,
    label TEXT NOT NULL CHECK (length(trim(label)) > 0),
    from_id INTEGER NOT NULL REFERENCES records(id) ON DELETE CASCADE,
    to_id INTEGER NOT NULL REFERENCES records(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS link_fields (
    link_id INTEGER NOT NULL REFERENCES links(link_id) ON DELETE CASCADE,
    field TEXT NOT NULL,
    field_type TEXT NOT NULL CHECK (field_type IN ('string', 'integer', 'boolean', 'long')),
    value NOT NULL,
    PRIMARY KEY (link_id, field)
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 0);

CREATE INDEX IF NOT EXISTS idx_records_label
    ON records(label);

CREATE INDEX IF NOT EXISTS idx_record_fields_lookup
    ON record_fields(field, field_type, value);

CREATE INDEX IF NOT EXISTS idx_links_from_label
    ON links(from_id, label);

CREATE INDEX IF NOT EXISTS idx_links_to
    ON links(to_id);
";

/// Migration v2: lookup index for link predicates (successor ids, item ids).
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_link_fields_lookup
    ON link_fields(field, field_type, value);
";

/// Indexes every migrated store must carry.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_records_label",
    "idx_record_fields_lookup",
    "idx_links_from_label",
    "idx_links_to",
    "idx_link_fields_lookup",
];
