// SPDX-License-Identifier: MIT

//! Collection tree operations.

use std::collections::BTreeSet;

use rusqlite::{params, OptionalExtension, Row};

use satchel_core::{CachePolicy, Collection, Id, MimeType, Tristate};

use crate::datastore::{constraint_as_unique, DataStore, StorageError};

const COLLECTION_COLUMNS: &str = "id, parent_id, resource_id, name, remote_id, remote_revision, \
     is_virtual, enabled, sync_pref, display_pref, index_pref, query_string, query_attributes, \
     query_collections, query_language, cache_inherit, cache_check_interval, cache_timeout, \
     cache_sync_on_demand, cache_local_parts";

fn collection_from_row(row: &Row<'_>) -> rusqlite::Result<Collection> {
    let local_parts: String = row.get(19)?;
    Ok(Collection {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        resource_id: row.get(2)?,
        name: row.get(3)?,
        remote_id: row.get(4)?,
        remote_revision: row.get(5)?,
        is_virtual: row.get(6)?,
        enabled: row.get(7)?,
        sync_pref: Tristate::parse(&row.get::<_, String>(8)?).unwrap_or_default(),
        display_pref: Tristate::parse(&row.get::<_, String>(9)?).unwrap_or_default(),
        index_pref: Tristate::parse(&row.get::<_, String>(10)?).unwrap_or_default(),
        query_string: row.get(11)?,
        query_attributes: row.get(12)?,
        query_collections: row.get(13)?,
        query_language: row.get(14)?,
        cache_policy: CachePolicy {
            inherit: row.get(15)?,
            check_interval: row.get(16)?,
            cache_timeout: row.get(17)?,
            sync_on_demand: row.get(18)?,
            local_parts: local_parts.split_whitespace().map(str::to_string).collect(),
        },
    })
}

impl DataStore {
    /// Inserts a new collection and records the added notification.
    /// Sets `collection.id` from the fresh row.
    pub fn append_collection(&mut self, collection: &mut Collection) -> Result<(), StorageError> {
        let resource = self
            .resource_by_id(collection.resource_id)?
            .ok_or_else(|| StorageError::NotFound(format!("resource {}", collection.resource_id)))?;
        if let Some(parent_id) = collection.parent_id {
            let parent = self
                .collection_by_id(parent_id)?
                .ok_or_else(|| StorageError::NotFound(format!("collection {parent_id}")))?;
            if parent.resource_id != collection.resource_id && !parent.is_virtual {
                return Err(StorageError::InvalidData(
                    "collection must belong to its parent's resource".into(),
                ));
            }
        }
        self.conn
            .execute(
                "INSERT INTO collections (parent_id, resource_id, name, remote_id, remote_revision,
                     is_virtual, enabled, sync_pref, display_pref, index_pref, query_string,
                     query_attributes, query_collections, query_language, cache_inherit,
                     cache_check_interval, cache_timeout, cache_sync_on_demand, cache_local_parts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19)",
                params![
                    collection.parent_id,
                    collection.resource_id,
                    collection.name,
                    collection.remote_id,
                    collection.remote_revision,
                    collection.is_virtual,
                    collection.enabled,
                    collection.sync_pref.as_str(),
                    collection.display_pref.as_str(),
                    collection.index_pref.as_str(),
                    collection.query_string,
                    collection.query_attributes,
                    collection.query_collections,
                    collection.query_language,
                    collection.cache_policy.inherit,
                    collection.cache_policy.check_interval,
                    collection.cache_policy.cache_timeout,
                    collection.cache_policy.sync_on_demand,
                    collection.cache_policy.local_parts.join(" "),
                ],
            )
            .map_err(|e| constraint_as_unique(e, "collection name among siblings"))?;
        collection.id = self.conn.last_insert_rowid();
        self.collector.collection_added(collection, Some(&resource.name));
        self.dispatch_if_idle();
        Ok(())
    }

    pub fn collection_by_id(&self, id: Id) -> Result<Option<Collection>, StorageError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {COLLECTION_COLUMNS} FROM collections WHERE id = ?1"),
                [id],
                collection_from_row,
            )
            .optional()?)
    }

    pub fn collection_by_parent_and_name(
        &self,
        parent_id: Option<Id>,
        name: &str,
    ) -> Result<Option<Collection>, StorageError> {
        let query = match parent_id {
            Some(_) => format!(
                "SELECT {COLLECTION_COLUMNS} FROM collections WHERE parent_id = ?1 AND name = ?2"
            ),
            None => format!(
                "SELECT {COLLECTION_COLUMNS} FROM collections WHERE parent_id IS NULL AND name = ?2"
            ),
        };
        Ok(self
            .conn
            .query_row(&query, params![parent_id.unwrap_or(0), name], collection_from_row)
            .optional()?)
    }

    pub fn collection_by_remote_id(
        &self,
        resource_id: Id,
        remote_id: &str,
    ) -> Result<Option<Collection>, StorageError> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {COLLECTION_COLUMNS} FROM collections
                     WHERE resource_id = ?1 AND remote_id = ?2"
                ),
                params![resource_id, remote_id],
                collection_from_row,
            )
            .optional()?)
    }

    pub fn collection_children(&self, parent_id: Id) -> Result<Vec<Collection>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLLECTION_COLUMNS} FROM collections WHERE parent_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([parent_id], collection_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn collections_roots(&self) -> Result<Vec<Collection>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLLECTION_COLUMNS} FROM collections WHERE parent_id IS NULL ORDER BY id"
        ))?;
        let rows = stmt.query_map([], collection_from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn collections_all(&self) -> Result<Vec<Collection>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {COLLECTION_COLUMNS} FROM collections ORDER BY id"))?;
        let rows = stmt.query_map([], collection_from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn collections_by_resource(&self, resource_id: Id) -> Result<Vec<Collection>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLLECTION_COLUMNS} FROM collections WHERE resource_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([resource_id], collection_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Writes back every mutable attribute of `collection` and records a
    /// changed notification carrying `parts`.
    pub fn update_collection(
        &mut self,
        collection: &Collection,
        parts: BTreeSet<String>,
    ) -> Result<(), StorageError> {
        let changed = self
            .conn
            .execute(
                "UPDATE collections SET parent_id = ?2, name = ?3, remote_id = ?4,
                     remote_revision = ?5, enabled = ?6, sync_pref = ?7, display_pref = ?8,
                     index_pref = ?9, query_string = ?10, query_attributes = ?11,
                     query_collections = ?12, query_language = ?13, cache_inherit = ?14,
                     cache_check_interval = ?15, cache_timeout = ?16, cache_sync_on_demand = ?17,
                     cache_local_parts = ?18
                 WHERE id = ?1",
                params![
                    collection.id,
                    collection.parent_id,
                    collection.name,
                    collection.remote_id,
                    collection.remote_revision,
                    collection.enabled,
                    collection.sync_pref.as_str(),
                    collection.display_pref.as_str(),
                    collection.index_pref.as_str(),
                    collection.query_string,
                    collection.query_attributes,
                    collection.query_collections,
                    collection.query_language,
                    collection.cache_policy.inherit,
                    collection.cache_policy.check_interval,
                    collection.cache_policy.cache_timeout,
                    collection.cache_policy.sync_on_demand,
                    collection.cache_policy.local_parts.join(" "),
                ],
            )
            .map_err(|e| constraint_as_unique(e, "collection name among siblings"))?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("collection {}", collection.id)));
        }
        self.collector.collection_changed(collection, parts);
        self.dispatch_if_idle();
        Ok(())
    }

    /// Reparents a collection. The new parent must belong to the same
    /// resource.
    pub fn move_collection(&mut self, id: Id, new_parent: Option<Id>) -> Result<(), StorageError> {
        let mut collection = self
            .collection_by_id(id)?
            .ok_or_else(|| StorageError::NotFound(format!("collection {id}")))?;
        if let Some(parent_id) = new_parent {
            let parent = self
                .collection_by_id(parent_id)?
                .ok_or_else(|| StorageError::NotFound(format!("collection {parent_id}")))?;
            if parent.resource_id != collection.resource_id {
                return Err(StorageError::InvalidData(
                    "cannot move a collection across resources".into(),
                ));
            }
            // A collection must not become its own ancestor.
            let mut cursor = Some(parent.clone());
            while let Some(c) = cursor {
                if c.id == id {
                    return Err(StorageError::InvalidData(
                        "cannot move a collection below itself".into(),
                    ));
                }
                cursor = match c.parent_id {
                    Some(pid) => self.collection_by_id(pid)?,
                    None => None,
                };
            }
        }
        collection.parent_id = new_parent;
        self.update_collection(&collection, BTreeSet::from(["PARENT".to_string()]))
    }

    /// Deletes a collection, its child collections and all contained
    /// items. Notifications are recorded leaf-first for items, then for
    /// each removed collection.
    pub fn delete_collection(&mut self, id: Id) -> Result<(), StorageError> {
        let collection = self
            .collection_by_id(id)?
            .ok_or_else(|| StorageError::NotFound(format!("collection {id}")))?;
        let resource_name = self
            .resource_by_id(collection.resource_id)?
            .map(|r| r.name)
            .unwrap_or_default();

        for child in self.collection_children(id)? {
            self.delete_collection(child.id)?;
        }

        for item in self.items_in_collection(id)? {
            self.remove_item(&item)?;
        }

        self.conn
            .execute("DELETE FROM collection_mime_type_relation WHERE collection_id = ?1", [id])?;
        self.conn
            .execute("DELETE FROM collection_pim_item_relation WHERE collection_id = ?1", [id])?;
        self.conn.execute("DELETE FROM collections WHERE id = ?1", [id])?;
        self.collector.collection_removed(&collection, &resource_name);
        self.dispatch_if_idle();
        Ok(())
    }

    pub fn collection_mime_types(&self, id: Id) -> Result<Vec<MimeType>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT m.id, m.name FROM mime_types m
             JOIN collection_mime_type_relation r ON r.mime_type_id = m.id
             WHERE r.collection_id = ?1 ORDER BY m.id",
        )?;
        let rows = stmt
            .query_map([id], |row| Ok(MimeType { id: row.get(0)?, name: row.get(1)? }))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_collection_mime_types(
        &mut self,
        id: Id,
        mime_type_ids: &[Id],
    ) -> Result<(), StorageError> {
        self.conn
            .execute("DELETE FROM collection_mime_type_relation WHERE collection_id = ?1", [id])?;
        for mt in mime_type_ids {
            self.conn.execute(
                "INSERT OR IGNORE INTO collection_mime_type_relation (collection_id, mime_type_id)
                 VALUES (?1, ?2)",
                params![id, mt],
            )?;
        }
        Ok(())
    }

    /// Item count and cumulative size of a collection; virtual
    /// collections count through the membership relation.
    pub fn collection_statistics(&self, collection: &Collection) -> Result<(i64, i64), StorageError> {
        let (count, size): (i64, Option<i64>) = if collection.is_virtual {
            self.conn.query_row(
                "SELECT COUNT(i.id), SUM(i.size) FROM pim_items i
                 JOIN collection_pim_item_relation r ON r.pim_item_id = i.id
                 WHERE r.collection_id = ?1",
                [collection.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
        } else {
            self.conn.query_row(
                "SELECT COUNT(id), SUM(size) FROM pim_items WHERE collection_id = ?1",
                [collection.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
        };
        Ok((count, size.unwrap_or(0)))
    }

    /// Adds an item to a virtual collection's membership and records an
    /// added notification against that collection.
    pub fn link_virtual_item(&mut self, collection_id: Id, item_id: Id) -> Result<bool, StorageError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO collection_pim_item_relation (collection_id, pim_item_id)
             VALUES (?1, ?2)",
            params![collection_id, item_id],
        )?;
        if inserted == 0 {
            return Ok(false);
        }
        if let Some(item) = self.item_by_id(item_id)? {
            self.collector.item_linked(&item, collection_id);
        }
        self.dispatch_if_idle();
        Ok(true)
    }

    /// Removes an item from a virtual collection's membership.
    pub fn unlink_virtual_item(
        &mut self,
        collection_id: Id,
        item_id: Id,
    ) -> Result<bool, StorageError> {
        let item = self.item_by_id(item_id)?;
        let removed = self.conn.execute(
            "DELETE FROM collection_pim_item_relation
             WHERE collection_id = ?1 AND pim_item_id = ?2",
            params![collection_id, item_id],
        )?;
        if removed == 0 {
            return Ok(false);
        }
        if let Some(item) = item {
            self.collector.item_unlinked(&item, collection_id);
        }
        self.dispatch_if_idle();
        Ok(true)
    }

    pub fn virtual_collection_items(&self, collection_id: Id) -> Result<Vec<Id>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT pim_item_id FROM collection_pim_item_relation
             WHERE collection_id = ?1 ORDER BY pim_item_id",
        )?;
        let rows = stmt
            .query_map([collection_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
