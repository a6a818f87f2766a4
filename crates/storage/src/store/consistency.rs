// SPDX-License-Identifier: MIT

//! Consistency queries for the storage janitor. Read-only; repair is a
//! human decision.

use rusqlite::Row;

use satchel_core::{Collection, Part, PimItem};

use crate::datastore::{DataStore, StorageError};

fn orphan_collection_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, String)> {
    Ok((row.get(0)?, row.get(1)?))
}

impl DataStore {
    /// Collections whose resource row is missing.
    pub fn orphaned_collections(&self) -> Result<Vec<Collection>, StorageError> {
        let ids: Vec<i64> = {
            let mut stmt = self.conn.prepare(
                "SELECT c.id, c.name FROM collections c
                 LEFT JOIN resources r ON c.resource_id = r.id
                 WHERE r.id IS NULL ORDER BY c.id",
            )?;
            let rows = stmt
                .query_map([], orphan_collection_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(|(id, _)| id).collect()
        };
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(col) = self.collection_by_id(id)? {
                out.push(col);
            }
        }
        Ok(out)
    }

    /// Items whose collection row is missing.
    pub fn orphaned_items(&self) -> Result<Vec<PimItem>, StorageError> {
        let ids: Vec<i64> = {
            let mut stmt = self.conn.prepare(
                "SELECT i.id FROM pim_items i
                 LEFT JOIN collections c ON i.collection_id = c.id
                 WHERE c.id IS NULL ORDER BY i.id",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<_>, _>>()?;
            rows
        };
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(item) = self.item_by_id(id)? {
                out.push(item);
            }
        }
        Ok(out)
    }

    /// Parts whose item row is missing.
    pub fn orphaned_parts(&self) -> Result<Vec<Part>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.pim_item_id, p.part_type_id, p.data, p.datasize, p.external
             FROM parts p LEFT JOIN pim_items i ON p.pim_item_id = i.id
             WHERE i.id IS NULL ORDER BY p.id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Part {
                    id: row.get(0)?,
                    pim_item_id: row.get(1)?,
                    part_type_id: row.get(2)?,
                    data: row.get(3)?,
                    datasize: row.get(4)?,
                    external: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// External file names referenced by more than one part row, with
    /// the reference count.
    pub fn overlapping_external_parts(&self) -> Result<Vec<(String, i64)>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT data, COUNT(id) AS cnt FROM parts
             WHERE external = 1 AND data IS NOT NULL
             GROUP BY data HAVING cnt > 1 ORDER BY data",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let data: Vec<u8> = row.get(0)?;
                Ok((String::from_utf8_lossy(&data).into_owned(), row.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Best-effort storage reclaim. SQLite supports VACUUM; it must run
    /// outside any transaction.
    pub fn vacuum(&mut self) -> Result<(), StorageError> {
        if self.in_transaction() {
            return Err(StorageError::InvalidData("cannot vacuum inside a transaction".into()));
        }
        self.conn.execute_batch("VACUUM")?;
        Ok(())
    }
}
