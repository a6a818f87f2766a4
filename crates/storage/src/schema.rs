// SPDX-License-Identifier: MIT

//! Relational schema bootstrap.
//!
//! Tables are created on first open; a schema version row guards against
//! running a new server against an incompatible database. Referential
//! integrity is enforced in code (cascading deletes emit per-row
//! notifications), not by the database, which is also why the janitor
//! exists.

use rusqlite::Connection;

use crate::datastore::StorageError;

/// Version of the on-disk schema this build understands.
pub const SCHEMA_VERSION: i64 = 1;

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS resources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    is_virtual INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS collections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_id INTEGER,
    resource_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    remote_id TEXT NOT NULL DEFAULT '',
    remote_revision TEXT NOT NULL DEFAULT '',
    is_virtual INTEGER NOT NULL DEFAULT 0,
    enabled INTEGER NOT NULL DEFAULT 1,
    sync_pref TEXT NOT NULL DEFAULT 'DEFAULT',
    display_pref TEXT NOT NULL DEFAULT 'DEFAULT',
    index_pref TEXT NOT NULL DEFAULT 'DEFAULT',
    query_string TEXT NOT NULL DEFAULT '',
    query_attributes TEXT NOT NULL DEFAULT '',
    query_collections TEXT NOT NULL DEFAULT '',
    query_language TEXT NOT NULL DEFAULT '',
    cache_inherit INTEGER NOT NULL DEFAULT 1,
    cache_check_interval INTEGER NOT NULL DEFAULT -1,
    cache_timeout INTEGER NOT NULL DEFAULT -1,
    cache_sync_on_demand INTEGER NOT NULL DEFAULT 0,
    cache_local_parts TEXT NOT NULL DEFAULT ''
);
CREATE UNIQUE INDEX IF NOT EXISTS collections_sibling_name
    ON collections (resource_id, IFNULL(parent_id, 0), name);

CREATE TABLE IF NOT EXISTS mime_types (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS collection_mime_type_relation (
    collection_id INTEGER NOT NULL,
    mime_type_id INTEGER NOT NULL,
    PRIMARY KEY (collection_id, mime_type_id)
);

CREATE TABLE IF NOT EXISTS pim_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rev INTEGER NOT NULL DEFAULT 0,
    remote_id TEXT NOT NULL DEFAULT '',
    gid TEXT NOT NULL DEFAULT '',
    collection_id INTEGER NOT NULL,
    mime_type_id INTEGER NOT NULL,
    datetime TEXT NOT NULL,
    atime TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    dirty INTEGER NOT NULL DEFAULT 0,
    hidden INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS pim_items_collection ON pim_items (collection_id);

CREATE TABLE IF NOT EXISTS part_types (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ns TEXT NOT NULL,
    name TEXT NOT NULL,
    UNIQUE (ns, name)
);

CREATE TABLE IF NOT EXISTS parts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pim_item_id INTEGER NOT NULL,
    part_type_id INTEGER NOT NULL,
    data BLOB,
    datasize INTEGER NOT NULL DEFAULT 0,
    external INTEGER NOT NULL DEFAULT 0,
    UNIQUE (pim_item_id, part_type_id)
);

CREATE TABLE IF NOT EXISTS flags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS pim_item_flag_relation (
    pim_item_id INTEGER NOT NULL,
    flag_id INTEGER NOT NULL,
    PRIMARY KEY (pim_item_id, flag_id)
);

CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    gid TEXT NOT NULL,
    parent_id INTEGER,
    type_name TEXT NOT NULL DEFAULT 'PLAIN'
);

CREATE TABLE IF NOT EXISTS pim_item_tag_relation (
    pim_item_id INTEGER NOT NULL,
    tag_id INTEGER NOT NULL,
    PRIMARY KEY (pim_item_id, tag_id)
);

CREATE TABLE IF NOT EXISTS relation_types (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS relations (
    left_id INTEGER NOT NULL,
    right_id INTEGER NOT NULL,
    type_id INTEGER NOT NULL,
    remote_id TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (left_id, right_id, type_id)
);

CREATE TABLE IF NOT EXISTS collection_pim_item_relation (
    collection_id INTEGER NOT NULL,
    pim_item_id INTEGER NOT NULL,
    PRIMARY KEY (collection_id, pim_item_id)
);
";

/// Creates missing tables, seeds well-known rows and stamps the schema
/// version. Fails when the database carries a different version.
pub fn init(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(CREATE_TABLES)?;

    let version: Option<i64> =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0)).ok();
    match version {
        None => {
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [SCHEMA_VERSION])?;
        }
        Some(v) if v == SCHEMA_VERSION => {}
        Some(v) => return Err(StorageError::SchemaVersionMismatch { found: v }),
    }

    seed(conn)?;
    Ok(())
}

/// Seeds the rows every installation relies on: the search resource and
/// its root collection (ids 1), the baseline mime-types and the generic
/// relation type.
fn seed(conn: &Connection) -> Result<(), StorageError> {
    conn.execute(
        "INSERT OR IGNORE INTO resources (id, name, is_virtual) VALUES (1, 'satchel_search', 1)",
        [],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO collections (id, parent_id, resource_id, name, is_virtual)
         VALUES (1, NULL, 1, 'Search', 1)",
        [],
    )?;

    for mime in [
        "inode/directory",
        "message/rfc822",
        "text/calendar",
        "text/directory",
        "application/octet-stream",
    ] {
        conn.execute("INSERT OR IGNORE INTO mime_types (name) VALUES (?1)", [mime])?;
    }

    // Flags are created on demand with whatever casing clients use.
    conn.execute("INSERT OR IGNORE INTO relation_types (name) VALUES ('GENERIC')", [])?;

    Ok(())
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
