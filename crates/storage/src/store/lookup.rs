// SPDX-License-Identifier: MIT

//! Name lookups over the small enumeration-like tables, backed by
//! in-memory caches. Entries added during a transaction are tracked so a
//! rollback can drop them wholesale.

use std::collections::HashMap;

use rusqlite::OptionalExtension;

use satchel_core::{Flag, Id, MimeType, PartType, RelationType, Resource};

use crate::datastore::{DataStore, StorageError};

/// Read-mostly name-to-entity caches shared by one data store session.
#[derive(Default)]
pub(crate) struct LookupCaches {
    flags: HashMap<String, Flag>,
    mime_types: HashMap<String, MimeType>,
    part_types: HashMap<(String, String), PartType>,
    relation_types: HashMap<String, RelationType>,
    resources: HashMap<String, Resource>,
    /// Entries were added while a transaction was open; they become
    /// invalid if that transaction rolls back.
    dirty: bool,
}

impl LookupCaches {
    pub(crate) fn commit(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn rollback(&mut self) {
        if self.dirty {
            self.flags.clear();
            self.mime_types.clear();
            self.part_types.clear();
            self.relation_types.clear();
            self.resources.clear();
            self.dirty = false;
        }
    }
}

impl DataStore {
    pub fn flag_by_name(&mut self, name: &str) -> Result<Option<Flag>, StorageError> {
        if let Some(flag) = self.caches.flags.get(name) {
            return Ok(Some(flag.clone()));
        }
        let found = self
            .conn
            .query_row("SELECT id, name FROM flags WHERE name = ?1", [name], |row| {
                Ok(Flag { id: row.get(0)?, name: row.get(1)? })
            })
            .optional()?;
        if let Some(flag) = &found {
            self.caches.flags.insert(name.to_string(), flag.clone());
        }
        Ok(found)
    }

    pub fn flag_find_or_create(&mut self, name: &str) -> Result<Flag, StorageError> {
        if let Some(flag) = self.flag_by_name(name)? {
            return Ok(flag);
        }
        self.conn.execute("INSERT INTO flags (name) VALUES (?1)", [name])?;
        let flag = Flag { id: self.conn.last_insert_rowid(), name: name.to_string() };
        self.caches.flags.insert(name.to_string(), flag.clone());
        self.caches.dirty = self.in_transaction();
        Ok(flag)
    }

    pub fn mime_type_by_name(&mut self, name: &str) -> Result<Option<MimeType>, StorageError> {
        if let Some(mt) = self.caches.mime_types.get(name) {
            return Ok(Some(mt.clone()));
        }
        let found = self
            .conn
            .query_row("SELECT id, name FROM mime_types WHERE name = ?1", [name], |row| {
                Ok(MimeType { id: row.get(0)?, name: row.get(1)? })
            })
            .optional()?;
        if let Some(mt) = &found {
            self.caches.mime_types.insert(name.to_string(), mt.clone());
        }
        Ok(found)
    }

    pub fn mime_type_find_or_create(&mut self, name: &str) -> Result<MimeType, StorageError> {
        if let Some(mt) = self.mime_type_by_name(name)? {
            return Ok(mt);
        }
        self.conn.execute("INSERT INTO mime_types (name) VALUES (?1)", [name])?;
        let mt = MimeType { id: self.conn.last_insert_rowid(), name: name.to_string() };
        self.caches.mime_types.insert(name.to_string(), mt.clone());
        self.caches.dirty = self.in_transaction();
        Ok(mt)
    }

    pub fn mime_types_all(&self) -> Result<Vec<MimeType>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT id, name FROM mime_types ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok(MimeType { id: row.get(0)?, name: row.get(1)? }))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn part_type_find_or_create(&mut self, ns: &str, name: &str) -> Result<PartType, StorageError> {
        let key = (ns.to_string(), name.to_string());
        if let Some(pt) = self.caches.part_types.get(&key) {
            return Ok(pt.clone());
        }
        let found = self
            .conn
            .query_row(
                "SELECT id, ns, name FROM part_types WHERE ns = ?1 AND name = ?2",
                [ns, name],
                |row| Ok(PartType { id: row.get(0)?, ns: row.get(1)?, name: row.get(2)? }),
            )
            .optional()?;
        let pt = match found {
            Some(pt) => pt,
            None => {
                self.conn
                    .execute("INSERT INTO part_types (ns, name) VALUES (?1, ?2)", [ns, name])?;
                self.caches.dirty = self.in_transaction();
                PartType {
                    id: self.conn.last_insert_rowid(),
                    ns: ns.to_string(),
                    name: name.to_string(),
                }
            }
        };
        self.caches.part_types.insert(key, pt.clone());
        Ok(pt)
    }

    pub fn part_type_by_id(&self, id: Id) -> Result<PartType, StorageError> {
        self.conn
            .query_row("SELECT id, ns, name FROM part_types WHERE id = ?1", [id], |row| {
                Ok(PartType { id: row.get(0)?, ns: row.get(1)?, name: row.get(2)? })
            })
            .map_err(|_| StorageError::NotFound(format!("part type {id}")))
    }

    pub fn relation_type_by_name(&mut self, name: &str) -> Result<Option<RelationType>, StorageError> {
        if let Some(rt) = self.caches.relation_types.get(name) {
            return Ok(Some(rt.clone()));
        }
        let found = self
            .conn
            .query_row("SELECT id, name FROM relation_types WHERE name = ?1", [name], |row| {
                Ok(RelationType { id: row.get(0)?, name: row.get(1)? })
            })
            .optional()?;
        if let Some(rt) = &found {
            self.caches.relation_types.insert(name.to_string(), rt.clone());
        }
        Ok(found)
    }

    pub fn relation_type_find_or_create(&mut self, name: &str) -> Result<RelationType, StorageError> {
        if let Some(rt) = self.relation_type_by_name(name)? {
            return Ok(rt);
        }
        self.conn.execute("INSERT INTO relation_types (name) VALUES (?1)", [name])?;
        let rt = RelationType { id: self.conn.last_insert_rowid(), name: name.to_string() };
        self.caches.relation_types.insert(name.to_string(), rt.clone());
        self.caches.dirty = self.in_transaction();
        Ok(rt)
    }

    pub fn relation_type_name(&self, id: Id) -> Result<String, StorageError> {
        self.conn
            .query_row("SELECT name FROM relation_types WHERE id = ?1", [id], |row| row.get(0))
            .map_err(|_| StorageError::NotFound(format!("relation type {id}")))
    }

    pub fn resource_by_name(&mut self, name: &str) -> Result<Option<Resource>, StorageError> {
        if let Some(res) = self.caches.resources.get(name) {
            return Ok(Some(res.clone()));
        }
        let found = self
            .conn
            .query_row(
                "SELECT id, name, is_virtual FROM resources WHERE name = ?1",
                [name],
                |row| {
                    Ok(Resource { id: row.get(0)?, name: row.get(1)?, is_virtual: row.get(2)? })
                },
            )
            .optional()?;
        if let Some(res) = &found {
            self.caches.resources.insert(name.to_string(), res.clone());
        }
        Ok(found)
    }

    pub fn resource_by_id(&self, id: Id) -> Result<Option<Resource>, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT id, name, is_virtual FROM resources WHERE id = ?1", [id], |row| {
                Ok(Resource { id: row.get(0)?, name: row.get(1)?, is_virtual: row.get(2)? })
            })
            .optional()?)
    }

    pub fn create_resource(&mut self, name: &str, is_virtual: bool) -> Result<Resource, StorageError> {
        self.conn
            .execute(
                "INSERT INTO resources (name, is_virtual) VALUES (?1, ?2)",
                rusqlite::params![name, is_virtual],
            )
            .map_err(|e| crate::datastore::constraint_as_unique(e, "resource name"))?;
        let res = Resource { id: self.conn.last_insert_rowid(), name: name.to_string(), is_virtual };
        self.caches.resources.insert(name.to_string(), res.clone());
        self.caches.dirty = self.in_transaction();
        Ok(res)
    }
}
