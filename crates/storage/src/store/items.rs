// SPDX-License-Identifier: MIT

//! PimItem operations, including scope resolution for item-addressing
//! commands.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use satchel_core::{Flag, Id, PimItem, Tag};
use satchel_wire::ImapSet;

use crate::datastore::{DataStore, StorageError};

const ITEM_COLUMNS: &str = "id, rev, remote_id, gid, collection_id, mime_type_id, datetime, \
     atime, size, dirty, hidden";

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<PimItem> {
    let datetime: String = row.get(6)?;
    let atime: String = row.get(7)?;
    Ok(PimItem {
        id: row.get(0)?,
        rev: row.get(1)?,
        remote_id: row.get(2)?,
        gid: row.get(3)?,
        collection_id: row.get(4)?,
        mime_type_id: row.get(5)?,
        datetime: parse_ts(&datetime),
        atime: parse_ts(&atime),
        size: row.get(8)?,
        dirty: row.get(9)?,
        hidden: row.get(10)?,
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_default()
}

/// WHERE fragment matching an id set: OR of interval conditions.
fn set_condition(column: &str, set: &ImapSet) -> String {
    let conds: Vec<String> = set
        .intervals()
        .iter()
        .map(|iv| match iv.end {
            Some(end) if end == iv.begin => format!("{column} = {}", iv.begin),
            Some(end) => format!("({column} >= {} AND {column} <= {end})", iv.begin),
            None => format!("{column} >= {}", iv.begin),
        })
        .collect();
    format!("({})", conds.join(" OR "))
}

impl DataStore {
    /// Inserts a new item and records the added notification.
    /// Sets `item.id` from the fresh row.
    pub fn append_item(&mut self, item: &mut PimItem) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO pim_items (rev, remote_id, gid, collection_id, mime_type_id, datetime,
                 atime, size, dirty, hidden)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                item.rev,
                item.remote_id,
                item.gid,
                item.collection_id,
                item.mime_type_id,
                item.datetime.to_rfc3339(),
                item.atime.to_rfc3339(),
                item.size,
                item.dirty,
                item.hidden,
            ],
        )?;
        item.id = self.conn.last_insert_rowid();
        self.collector.item_added(item, None, None);
        self.dispatch_if_idle();
        Ok(())
    }

    pub fn item_by_id(&self, id: Id) -> Result<Option<PimItem>, StorageError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM pim_items WHERE id = ?1"),
                [id],
                item_from_row,
            )
            .optional()?)
    }

    pub fn items_in_collection(&self, collection_id: Id) -> Result<Vec<PimItem>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM pim_items WHERE collection_id = ?1 ORDER BY id"
        ))?;
        let rows =
            stmt.query_map([collection_id], item_from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Items matching an id set, optionally restricted to one collection.
    /// For a virtual collection the membership relation scopes the match.
    pub fn items_by_set(
        &self,
        set: &ImapSet,
        collection: Option<&satchel_core::Collection>,
    ) -> Result<Vec<PimItem>, StorageError> {
        let cond = set_condition("i.id", set);
        let query = match collection {
            Some(col) if col.is_virtual => format!(
                "SELECT {cols} FROM pim_items i
                 JOIN collection_pim_item_relation r ON r.pim_item_id = i.id
                 WHERE {cond} AND r.collection_id = {id} ORDER BY i.id",
                cols = qualified_columns(),
                id = col.id
            ),
            Some(col) => format!(
                "SELECT {cols} FROM pim_items i WHERE {cond} AND i.collection_id = {id}
                 ORDER BY i.id",
                cols = qualified_columns(),
                id = col.id
            ),
            None => format!(
                "SELECT {cols} FROM pim_items i WHERE {cond} ORDER BY i.id",
                cols = qualified_columns()
            ),
        };
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map([], item_from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Items matching a remote id, scoped to a resource when known.
    pub fn items_by_remote_id(
        &self,
        remote_id: &str,
        resource_id: Option<Id>,
    ) -> Result<Vec<PimItem>, StorageError> {
        let rows = match resource_id {
            Some(rid) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {cols} FROM pim_items i
                     JOIN collections c ON i.collection_id = c.id
                     WHERE i.remote_id = ?1 AND c.resource_id = ?2 ORDER BY i.id",
                    cols = qualified_columns()
                ))?;
                let rows = stmt
                    .query_map(params![remote_id, rid], item_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {cols} FROM pim_items i WHERE i.remote_id = ?1 ORDER BY i.id",
                    cols = qualified_columns()
                ))?;
                let rows = stmt
                    .query_map([remote_id], item_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    }

    pub fn items_by_gid(&self, gid: &str) -> Result<Vec<PimItem>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM pim_items WHERE gid = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map([gid], item_from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Items carrying any tag in the given id set.
    pub fn items_by_tag_set(&self, set: &ImapSet) -> Result<Vec<PimItem>, StorageError> {
        let cond = set_condition("r.tag_id", set);
        let query = format!(
            "SELECT DISTINCT {cols} FROM pim_items i
             JOIN pim_item_tag_relation r ON r.pim_item_id = i.id
             WHERE {cond} ORDER BY i.id",
            cols = qualified_columns()
        );
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map([], item_from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Bumps the revision counter; `dirty` marks a local change the
    /// owning resource has not seen yet.
    pub fn bump_item_rev(&mut self, item: &mut PimItem, dirty: bool) -> Result<(), StorageError> {
        item.rev += 1;
        if dirty {
            item.dirty = true;
        }
        self.conn.execute(
            "UPDATE pim_items SET rev = ?2, dirty = ?3 WHERE id = ?1",
            params![item.id, item.rev, item.dirty],
        )?;
        Ok(())
    }

    /// Rewrites remote id / gid / size after a STORE.
    pub fn update_item_meta(&mut self, item: &PimItem) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE pim_items SET remote_id = ?2, gid = ?3, size = ?4, dirty = ?5, hidden = ?6
             WHERE id = ?1",
            params![item.id, item.remote_id, item.gid, item.size, item.dirty, item.hidden],
        )?;
        Ok(())
    }

    /// Moves an item into another collection and records the change with
    /// a `PARENT` part marker.
    pub fn move_item(&mut self, item: &mut PimItem, target: Id) -> Result<(), StorageError> {
        if self.collection_by_id(target)?.is_none() {
            return Err(StorageError::NotFound(format!("collection {target}")));
        }
        item.collection_id = target;
        item.rev += 1;
        self.conn.execute(
            "UPDATE pim_items SET collection_id = ?2, rev = ?3 WHERE id = ?1",
            params![item.id, target, item.rev],
        )?;
        self.collector.item_changed(item, BTreeSet::from(["PARENT".to_string()]));
        self.dispatch_if_idle();
        Ok(())
    }

    /// Deletes an item with everything hanging off it: flags, tags,
    /// relations, virtual-collection membership and parts (external
    /// payload files are unlinked after commit).
    pub fn remove_item(&mut self, item: &PimItem) -> Result<(), StorageError> {
        // Capture what the removal notification needs while rows exist.
        let mime_type = self
            .conn
            .query_row(
                "SELECT name FROM mime_types WHERE id = ?1",
                [item.mime_type_id],
                |row| row.get::<_, String>(0),
            )
            .unwrap_or_default();
        let resource: String = self
            .conn
            .query_row(
                "SELECT r.name FROM collections c JOIN resources r ON c.resource_id = r.id
                 WHERE c.id = ?1",
                [item.collection_id],
                |row| row.get(0),
            )
            .unwrap_or_default();

        self.delete_parts_of_item(item.id)?;
        self.remove_relations_of_item(item.id)?;
        self.conn.execute("DELETE FROM pim_item_flag_relation WHERE pim_item_id = ?1", [item.id])?;
        self.conn.execute("DELETE FROM pim_item_tag_relation WHERE pim_item_id = ?1", [item.id])?;
        self.conn
            .execute("DELETE FROM collection_pim_item_relation WHERE pim_item_id = ?1", [item.id])?;
        self.conn.execute("DELETE FROM pim_items WHERE id = ?1", [item.id])?;
        self.collector.item_removed(item, &mime_type, &resource);
        self.dispatch_if_idle();
        Ok(())
    }

    pub fn item_flags(&self, item_id: Id) -> Result<Vec<Flag>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT f.id, f.name FROM flags f
             JOIN pim_item_flag_relation r ON r.flag_id = f.id
             WHERE r.pim_item_id = ?1 ORDER BY f.id",
        )?;
        let rows = stmt
            .query_map([item_id], |row| Ok(Flag { id: row.get(0)?, name: row.get(1)? }))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Adds flags to an item. Returns true when the flag set changed.
    pub fn add_item_flags(
        &mut self,
        item: &mut PimItem,
        flags: &[Flag],
        dirty: bool,
    ) -> Result<bool, StorageError> {
        let mut changed = false;
        for flag in flags {
            let inserted = self.conn.execute(
                "INSERT OR IGNORE INTO pim_item_flag_relation (pim_item_id, flag_id)
                 VALUES (?1, ?2)",
                params![item.id, flag.id],
            )?;
            changed |= inserted > 0;
        }
        if changed {
            self.bump_item_rev(item, dirty)?;
            self.collector.item_changed(item, BTreeSet::from(["FLAGS".to_string()]));
            self.dispatch_if_idle();
        }
        Ok(changed)
    }

    /// Removes flags from an item. Returns true when the flag set changed.
    pub fn remove_item_flags(
        &mut self,
        item: &mut PimItem,
        flags: &[Flag],
        dirty: bool,
    ) -> Result<bool, StorageError> {
        let mut changed = false;
        for flag in flags {
            let deleted = self.conn.execute(
                "DELETE FROM pim_item_flag_relation WHERE pim_item_id = ?1 AND flag_id = ?2",
                params![item.id, flag.id],
            )?;
            changed |= deleted > 0;
        }
        if changed {
            self.bump_item_rev(item, dirty)?;
            self.collector.item_changed(item, BTreeSet::from(["FLAGS".to_string()]));
            self.dispatch_if_idle();
        }
        Ok(changed)
    }

    /// Replaces the item's flag set wholesale.
    pub fn set_item_flags(
        &mut self,
        item: &mut PimItem,
        flags: &[Flag],
        dirty: bool,
    ) -> Result<(), StorageError> {
        self.conn.execute("DELETE FROM pim_item_flag_relation WHERE pim_item_id = ?1", [item.id])?;
        for flag in flags {
            self.conn.execute(
                "INSERT OR IGNORE INTO pim_item_flag_relation (pim_item_id, flag_id)
                 VALUES (?1, ?2)",
                params![item.id, flag.id],
            )?;
        }
        self.bump_item_rev(item, dirty)?;
        self.collector.item_changed(item, BTreeSet::from(["FLAGS".to_string()]));
        self.dispatch_if_idle();
        Ok(())
    }

    /// Writes an item's initial flag set without a revision bump or a
    /// change notification; the pending added-notification already covers
    /// the whole item.
    pub fn set_item_flags_silent(
        &mut self,
        item: &mut PimItem,
        flags: &[Flag],
    ) -> Result<(), StorageError> {
        for flag in flags {
            self.conn.execute(
                "INSERT OR IGNORE INTO pim_item_flag_relation (pim_item_id, flag_id)
                 VALUES (?1, ?2)",
                params![item.id, flag.id],
            )?;
        }
        Ok(())
    }

    /// Records a payload-part change notification for an item.
    pub fn record_part_change(&mut self, item: &PimItem, fq_part: &str) {
        self.collector.item_changed(item, BTreeSet::from([fq_part.to_string()]));
        self.dispatch_if_idle();
    }

    pub fn item_tags(&self, item_id: Id) -> Result<Vec<Tag>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.gid, t.parent_id, t.type_name FROM tags t
             JOIN pim_item_tag_relation r ON r.tag_id = t.id
             WHERE r.pim_item_id = ?1 ORDER BY t.id",
        )?;
        let rows = stmt
            .query_map([item_id], |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    gid: row.get(1)?,
                    parent_id: row.get(2)?,
                    type_name: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Clears the hidden bit left behind by an interrupted pre-processing
    /// run. Called once at startup.
    pub fn unhide_all_items(&mut self) -> Result<usize, StorageError> {
        Ok(self.conn.execute("UPDATE pim_items SET hidden = 0 WHERE hidden = 1", [])?)
    }
}

fn qualified_columns() -> String {
    ITEM_COLUMNS
        .split(", ")
        .map(|c| format!("i.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}
