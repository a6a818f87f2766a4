// SPDX-License-Identifier: MIT

//! Tag operations. Tag membership changes ride on item notifications as
//! `ModifyTags` with a `+id`/`-id` delta.

use std::collections::BTreeSet;

use rusqlite::{params, OptionalExtension, Row};

use satchel_core::{Id, PimItem, Tag};
use satchel_wire::ImapSet;

use crate::datastore::{DataStore, StorageError};

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag { id: row.get(0)?, gid: row.get(1)?, parent_id: row.get(2)?, type_name: row.get(3)? })
}

impl DataStore {
    /// Inserts a new tag and records the added notification.
    pub fn append_tag(&mut self, tag: &mut Tag) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO tags (gid, parent_id, type_name) VALUES (?1, ?2, ?3)",
            params![tag.gid, tag.parent_id, tag.type_name],
        )?;
        tag.id = self.conn.last_insert_rowid();
        self.collector.tag_added(tag.id);
        self.dispatch_if_idle();
        Ok(())
    }

    pub fn tag_by_id(&self, id: Id) -> Result<Option<Tag>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, gid, parent_id, type_name FROM tags WHERE id = ?1",
                [id],
                tag_from_row,
            )
            .optional()?)
    }

    pub fn tags_by_gid(&self, gid: &str) -> Result<Vec<Tag>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, gid, parent_id, type_name FROM tags WHERE gid = ?1 ORDER BY id")?;
        let rows = stmt.query_map([gid], tag_from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn tags_by_set(&self, set: &ImapSet) -> Result<Vec<Tag>, StorageError> {
        let mut out = Vec::new();
        for tag in self.tags_all()? {
            if set.contains(tag.id) {
                out.push(tag);
            }
        }
        Ok(out)
    }

    pub fn tags_all(&self) -> Result<Vec<Tag>, StorageError> {
        let mut stmt =
            self.conn.prepare("SELECT id, gid, parent_id, type_name FROM tags ORDER BY id")?;
        let rows = stmt.query_map([], tag_from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn update_tag(&mut self, tag: &Tag) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE tags SET gid = ?2, parent_id = ?3, type_name = ?4 WHERE id = ?1",
            params![tag.id, tag.gid, tag.parent_id, tag.type_name],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("tag {}", tag.id)));
        }
        self.collector.tag_changed(tag.id);
        self.dispatch_if_idle();
        Ok(())
    }

    /// Deletes tags and their item memberships. Affected items get a
    /// `ModifyTags` notification carrying the removed ids.
    pub fn remove_tags(&mut self, tags: &[Tag]) -> Result<(), StorageError> {
        for tag in tags {
            let item_ids = self.items_with_tag(tag.id)?;
            for item_id in item_ids {
                if let Some(item) = self.item_by_id(item_id)? {
                    self.collector
                        .item_tags_changed(&item, BTreeSet::from([format!("-{}", tag.id)]));
                }
            }
            self.conn.execute("DELETE FROM pim_item_tag_relation WHERE tag_id = ?1", [tag.id])?;
            self.conn.execute("DELETE FROM tags WHERE id = ?1", [tag.id])?;
            self.collector.tag_removed(tag.id);
        }
        self.dispatch_if_idle();
        Ok(())
    }

    pub fn items_with_tag(&self, tag_id: Id) -> Result<Vec<Id>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT pim_item_id FROM pim_item_tag_relation WHERE tag_id = ?1 ORDER BY pim_item_id",
        )?;
        let rows = stmt.query_map([tag_id], |row| row.get(0))?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Adds tags to an item; the delta notification lists each added id.
    pub fn add_item_tags(
        &mut self,
        item: &mut PimItem,
        tags: &[Tag],
        dirty: bool,
    ) -> Result<bool, StorageError> {
        let mut delta = BTreeSet::new();
        for tag in tags {
            let inserted = self.conn.execute(
                "INSERT OR IGNORE INTO pim_item_tag_relation (pim_item_id, tag_id)
                 VALUES (?1, ?2)",
                params![item.id, tag.id],
            )?;
            if inserted > 0 {
                delta.insert(format!("+{}", tag.id));
            }
        }
        if delta.is_empty() {
            return Ok(false);
        }
        self.bump_item_rev(item, dirty)?;
        self.collector.item_tags_changed(item, delta);
        self.dispatch_if_idle();
        Ok(true)
    }

    /// Removes tags from an item; the delta notification lists each
    /// removed id.
    pub fn remove_item_tags(
        &mut self,
        item: &mut PimItem,
        tags: &[Tag],
        dirty: bool,
    ) -> Result<bool, StorageError> {
        let mut delta = BTreeSet::new();
        for tag in tags {
            let deleted = self.conn.execute(
                "DELETE FROM pim_item_tag_relation WHERE pim_item_id = ?1 AND tag_id = ?2",
                params![item.id, tag.id],
            )?;
            if deleted > 0 {
                delta.insert(format!("-{}", tag.id));
            }
        }
        if delta.is_empty() {
            return Ok(false);
        }
        self.bump_item_rev(item, dirty)?;
        self.collector.item_tags_changed(item, delta);
        self.dispatch_if_idle();
        Ok(true)
    }

    /// Replaces an item's tag set wholesale; the delta lists both
    /// directions.
    pub fn set_item_tags(
        &mut self,
        item: &mut PimItem,
        tags: &[Tag],
        dirty: bool,
    ) -> Result<(), StorageError> {
        let current: BTreeSet<Id> = self.item_tags(item.id)?.into_iter().map(|t| t.id).collect();
        let wanted: BTreeSet<Id> = tags.iter().map(|t| t.id).collect();

        let mut delta = BTreeSet::new();
        for added in wanted.difference(&current) {
            self.conn.execute(
                "INSERT OR IGNORE INTO pim_item_tag_relation (pim_item_id, tag_id)
                 VALUES (?1, ?2)",
                params![item.id, added],
            )?;
            delta.insert(format!("+{added}"));
        }
        for removed in current.difference(&wanted) {
            self.conn.execute(
                "DELETE FROM pim_item_tag_relation WHERE pim_item_id = ?1 AND tag_id = ?2",
                params![item.id, removed],
            )?;
            delta.insert(format!("-{removed}"));
        }
        if !delta.is_empty() {
            self.bump_item_rev(item, dirty)?;
            self.collector.item_tags_changed(item, delta);
            self.dispatch_if_idle();
        }
        Ok(())
    }
}
