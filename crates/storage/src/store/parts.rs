// SPDX-License-Identifier: MIT

//! Part payload storage. Large payloads are externalized to files; the
//! part row then stores the bare filename.

use rusqlite::{params, OptionalExtension, Row};

use satchel_core::{Id, Part, PartType};

use crate::datastore::{DataStore, StorageError};
use crate::external::{external_file_name, write_external_file, EXTERNAL_PAYLOAD_THRESHOLD};

/// Revision suffix of an external file name (`<part>_r<rev>`).
fn file_name_revision(name: &str) -> Option<i32> {
    name.rsplit_once("_r").and_then(|(_, rev)| rev.parse().ok())
}

fn part_from_row(row: &Row<'_>) -> rusqlite::Result<Part> {
    Ok(Part {
        id: row.get(0)?,
        pim_item_id: row.get(1)?,
        part_type_id: row.get(2)?,
        data: row.get(3)?,
        datasize: row.get(4)?,
        external: row.get(5)?,
    })
}

impl DataStore {
    /// All parts of an item, joined with their types.
    pub fn parts_of_item(&self, item_id: Id) -> Result<Vec<(PartType, Part)>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.pim_item_id, p.part_type_id, p.data, p.datasize, p.external,
                    t.id, t.ns, t.name
             FROM parts p JOIN part_types t ON p.part_type_id = t.id
             WHERE p.pim_item_id = ?1 ORDER BY p.id",
        )?;
        let rows = stmt
            .query_map([item_id], |row| {
                let part = part_from_row(row)?;
                let pt = PartType { id: row.get(6)?, ns: row.get(7)?, name: row.get(8)? };
                Ok((pt, part))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn part_by_type(
        &self,
        item_id: Id,
        part_type_id: Id,
    ) -> Result<Option<Part>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, pim_item_id, part_type_id, data, datasize, external
                 FROM parts WHERE pim_item_id = ?1 AND part_type_id = ?2",
                params![item_id, part_type_id],
                part_from_row,
            )
            .optional()?)
    }

    /// All parts that claim an external file, across all items.
    pub fn external_parts(&self) -> Result<Vec<Part>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, pim_item_id, part_type_id, data, datasize, external
             FROM parts WHERE external = 1 AND data IS NOT NULL ORDER BY id",
        )?;
        let rows = stmt.query_map([], part_from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Inserts or replaces the payload of `(item, part type)`.
    ///
    /// Payloads above [`EXTERNAL_PAYLOAD_THRESHOLD`] are written to a file
    /// named after the part id and revision; the superseded file, if any,
    /// is unlinked after the transaction commits.
    pub fn store_part_payload(
        &mut self,
        item_id: Id,
        part_type: &PartType,
        payload: Vec<u8>,
    ) -> Result<Part, StorageError> {
        let existing = self.part_by_type(item_id, part_type.id)?;
        let datasize = payload.len() as i64;
        let external = datasize > EXTERNAL_PAYLOAD_THRESHOLD;

        let part_id = match &existing {
            Some(part) => part.id,
            None => {
                self.conn.execute(
                    "INSERT INTO parts (pim_item_id, part_type_id, data, datasize, external)
                     VALUES (?1, ?2, NULL, 0, 0)",
                    params![item_id, part_type.id],
                )?;
                self.conn.last_insert_rowid()
            }
        };

        // Replacing an external payload never overwrites in place: the new
        // revision gets a new file name strictly above the old one, and
        // the old file dies with the commit.
        let mut next_rev = self.part_revision(part_id)? + 1;
        if let Some(old) = &existing {
            if old.external {
                if let Some(name) = old.data.as_deref().and_then(|d| std::str::from_utf8(d).ok()) {
                    if let Some(old_file_rev) = file_name_revision(name) {
                        next_rev = next_rev.max(old_file_rev + 1);
                    }
                    self.pending_file_deletes.push(self.external_dir().join(name));
                }
            }
        }

        let data: Vec<u8> = if external {
            let name = external_file_name(part_id, next_rev);
            write_external_file(self.external_dir(), &name, &payload)?;
            name.into_bytes()
        } else {
            payload
        };

        self.conn.execute(
            "UPDATE parts SET data = ?2, datasize = ?3, external = ?4 WHERE id = ?1",
            params![part_id, data, datasize, external],
        )?;

        Ok(Part { id: part_id, pim_item_id: item_id, part_type_id: part_type.id, data: Some(data), datasize, external })
    }

    /// Reads a part's payload, following the external indirection.
    /// `None` means the payload has been evicted and needs retrieval.
    pub fn part_payload(&self, part: &Part) -> Result<Option<Vec<u8>>, StorageError> {
        let Some(data) = &part.data else {
            return Ok(None);
        };
        if !part.external {
            return Ok(Some(data.clone()));
        }
        let name = std::str::from_utf8(data).map_err(|_| {
            StorageError::InvalidData(format!("part {} file name not UTF-8", part.id))
        })?;
        Ok(Some(std::fs::read(self.external_dir().join(name))?))
    }

    /// Evicts a payload from the cache: clears the data column (and
    /// schedules the external file for deletion) but keeps the row, so
    /// the part is known and retrievable.
    pub fn evict_part_payload(&mut self, part: &Part) -> Result<(), StorageError> {
        if part.external {
            if let Some(name) = part.data.as_deref().and_then(|d| std::str::from_utf8(d).ok()) {
                self.pending_file_deletes.push(self.external_dir().join(name));
            }
        }
        self.conn.execute(
            "UPDATE parts SET data = NULL, datasize = 0, external = 0 WHERE id = ?1",
            [part.id],
        )?;
        self.dispatch_if_idle();
        Ok(())
    }

    /// Deletes all parts of an item, scheduling external files for
    /// removal after commit.
    pub fn delete_parts_of_item(&mut self, item_id: Id) -> Result<(), StorageError> {
        for (_, part) in self.parts_of_item(item_id)? {
            if part.external {
                if let Some(name) = part.data.as_deref().and_then(|d| std::str::from_utf8(d).ok())
                {
                    self.pending_file_deletes.push(self.external_dir().join(name));
                }
            }
        }
        self.conn.execute("DELETE FROM parts WHERE pim_item_id = ?1", [item_id])?;
        Ok(())
    }

    /// Revision of the owning item, used to version external file names.
    fn part_revision(&self, part_id: Id) -> Result<i32, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT i.rev FROM pim_items i JOIN parts p ON p.pim_item_id = i.id
                 WHERE p.id = ?1",
                [part_id],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0))
    }
}
