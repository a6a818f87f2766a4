// SPDX-License-Identifier: MIT

//! Directed typed links between items. The triple (left, right, type) is
//! unique. Relation changes emit a relation notification plus one
//! `ModifyRelations` item notification per item side.

use std::collections::BTreeSet;

use rusqlite::params;

use satchel_core::{Id, Relation};

use crate::datastore::{constraint_as_unique, DataStore, StorageError};

/// Delta descriptor carried in `ModifyRelations` item notifications.
fn relation_descriptor(type_name: &str, relation: &Relation) -> String {
    format!("RELATION {type_name} {} {}", relation.left_id, relation.right_id)
}

impl DataStore {
    /// Creates a relation between two existing items.
    pub fn insert_relation(
        &mut self,
        left: Id,
        right: Id,
        type_name: &str,
        remote_id: Option<&str>,
    ) -> Result<Relation, StorageError> {
        let left_item = self
            .item_by_id(left)?
            .ok_or_else(|| StorageError::NotFound(format!("item {left}")))?;
        let right_item = self
            .item_by_id(right)?
            .ok_or_else(|| StorageError::NotFound(format!("item {right}")))?;
        let rtype = self.relation_type_find_or_create(type_name)?;

        let relation = Relation {
            left_id: left,
            right_id: right,
            type_id: rtype.id,
            remote_id: remote_id.unwrap_or_default().to_string(),
        };
        self.conn
            .execute(
                "INSERT INTO relations (left_id, right_id, type_id, remote_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![relation.left_id, relation.right_id, relation.type_id, relation.remote_id],
            )
            .map_err(|e| constraint_as_unique(e, "relation (left, right, type)"))?;

        self.collector.relation_added(&relation, type_name);
        let descriptor = BTreeSet::from([relation_descriptor(type_name, &relation)]);
        self.collector.item_relations_changed(&left_item, descriptor.clone());
        self.collector.item_relations_changed(&right_item, descriptor);
        self.dispatch_if_idle();
        Ok(relation)
    }

    /// Removes relations between two items. Without a type, every
    /// relation on the pair goes. Each removed relation emits its own
    /// remove notification; both item sides get one `ModifyRelations`
    /// notification carrying the union of removed descriptors.
    pub fn remove_relations(
        &mut self,
        left: Id,
        right: Id,
        type_name: Option<&str>,
    ) -> Result<usize, StorageError> {
        let matching = self.relations_between(left, right, type_name)?;
        if matching.is_empty() {
            return Err(StorageError::NotFound("relation".into()));
        }

        let mut descriptors = BTreeSet::new();
        for (relation, tname) in &matching {
            self.conn.execute(
                "DELETE FROM relations WHERE left_id = ?1 AND right_id = ?2 AND type_id = ?3",
                params![relation.left_id, relation.right_id, relation.type_id],
            )?;
            self.collector.relation_removed(relation, tname);
            descriptors.insert(relation_descriptor(tname, relation));
        }

        for side in [left, right] {
            if let Some(item) = self.item_by_id(side)? {
                self.collector.item_relations_changed(&item, descriptors.clone());
            }
        }
        self.dispatch_if_idle();
        Ok(matching.len())
    }

    fn relations_between(
        &mut self,
        left: Id,
        right: Id,
        type_name: Option<&str>,
    ) -> Result<Vec<(Relation, String)>, StorageError> {
        match type_name {
            Some(name) => {
                let Some(rtype) = self.relation_type_by_name(name)? else {
                    return Ok(Vec::new());
                };
                self.query_relations(
                    "SELECT r.left_id, r.right_id, r.type_id, r.remote_id, t.name
                     FROM relations r JOIN relation_types t ON r.type_id = t.id
                     WHERE r.left_id = ?1 AND r.right_id = ?2 AND r.type_id = ?3",
                    params![left, right, rtype.id],
                )
            }
            None => self.query_relations(
                "SELECT r.left_id, r.right_id, r.type_id, r.remote_id, t.name
                 FROM relations r JOIN relation_types t ON r.type_id = t.id
                 WHERE r.left_id = ?1 AND r.right_id = ?2",
                params![left, right],
            ),
        }
    }

    /// Relations matching any combination of side and type filters.
    pub fn relations_matching(
        &mut self,
        left: Option<Id>,
        right: Option<Id>,
        side: Option<Id>,
        type_name: Option<&str>,
    ) -> Result<Vec<(Relation, String)>, StorageError> {
        let mut conditions = Vec::new();
        if let Some(left) = left {
            conditions.push(format!("r.left_id = {left}"));
        }
        if let Some(right) = right {
            conditions.push(format!("r.right_id = {right}"));
        }
        if let Some(side) = side {
            conditions.push(format!("(r.left_id = {side} OR r.right_id = {side})"));
        }
        if let Some(name) = type_name {
            let Some(rtype) = self.relation_type_by_name(name)? else {
                return Ok(Vec::new());
            };
            conditions.push(format!("r.type_id = {}", rtype.id));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let query = format!(
            "SELECT r.left_id, r.right_id, r.type_id, r.remote_id, t.name
             FROM relations r JOIN relation_types t ON r.type_id = t.id
             {where_clause} ORDER BY r.left_id, r.right_id, r.type_id"
        );
        self.query_relations(&query, params![])
    }

    /// Drops every relation touching an item; used by item removal.
    /// Remove notifications are recorded for each dropped relation.
    pub fn remove_relations_of_item(&mut self, item_id: Id) -> Result<(), StorageError> {
        let matching = self.query_relations(
            "SELECT r.left_id, r.right_id, r.type_id, r.remote_id, t.name
             FROM relations r JOIN relation_types t ON r.type_id = t.id
             WHERE r.left_id = ?1 OR r.right_id = ?1",
            params![item_id],
        )?;
        for (relation, tname) in &matching {
            self.conn.execute(
                "DELETE FROM relations WHERE left_id = ?1 AND right_id = ?2 AND type_id = ?3",
                params![relation.left_id, relation.right_id, relation.type_id],
            )?;
            self.collector.relation_removed(relation, tname);
        }
        self.dispatch_if_idle();
        Ok(())
    }

    fn query_relations(
        &self,
        query: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<(Relation, String)>, StorageError> {
        let mut stmt = self.conn.prepare(query)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    Relation {
                        left_id: row.get(0)?,
                        right_id: row.get(1)?,
                        type_id: row.get(2)?,
                        remote_id: row.get(3)?,
                    },
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
