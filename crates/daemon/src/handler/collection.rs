// SPDX-License-Identifier: MIT

//! Collection handlers: COLLECTIONCREATE, COLLECTIONMODIFY,
//! COLLECTIONDELETE, COLLECTIONMOVE, LIST.

use std::collections::BTreeSet;

use tokio::io::{AsyncRead, AsyncWrite};

use satchel_core::{CachePolicy, Collection, Tristate};

use super::helpers::{
    collection_from_id_or_path, collection_line, parse_cache_policy, parse_tristate,
};
use super::HandlerError;
use crate::connection::{Connection, ConnectionState};
use satchel_storage::Transaction;

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// `<tag> COLLECTIONCREATE <name> <parent> (<attr> <value>...)`
    ///
    /// The parent argument is an id or path; `0` creates a root
    /// collection, which requires a resource context to own it.
    pub(crate) async fn collection_create(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;

        let name = self.stream.read_utf8_string().await?;
        if name.is_empty() {
            return Err(HandlerError::Protocol("collection name is empty".into()));
        }
        let parent_arg = self.stream.read_utf8_string().await?;
        let attrs = self.read_attr_pairs().await?;

        let (parent_id, resource_id) = if parent_arg == "0" {
            let resource = self.ctx.resource.as_ref().ok_or_else(|| {
                HandlerError::Failure("top-level collections need a resource context".into())
            })?;
            (None, resource.id)
        } else {
            let parent = collection_from_id_or_path(&self.db, &parent_arg)?;
            (Some(parent.id), parent.resource_id)
        };

        let mut collection = Collection {
            id: 0,
            parent_id,
            resource_id,
            name,
            remote_id: String::new(),
            remote_revision: String::new(),
            is_virtual: false,
            enabled: true,
            sync_pref: Tristate::Default,
            display_pref: Tristate::Default,
            index_pref: Tristate::Default,
            query_string: String::new(),
            query_attributes: String::new(),
            query_collections: String::new(),
            query_language: String::new(),
            cache_policy: CachePolicy::default(),
        };

        let mut mime_type_names: Vec<String> = Vec::new();
        for (key, value) in &attrs {
            match key.as_str() {
                "REMOTEID" => collection.remote_id = value_as_string(value)?,
                "REMOTEREVISION" => collection.remote_revision = value_as_string(value)?,
                "MIMETYPE" => mime_type_names = value_as_name_list(value)?,
                "CACHEPOLICY" => parse_cache_policy(value, &mut collection.cache_policy)?,
                "VIRTUAL" => collection.is_virtual = value_as_string(value)? != "0",
                "ENABLED" => collection.enabled = value_as_string(value)? == "TRUE",
                "SYNC" => collection.sync_pref = parse_tristate(&value_as_string(value)?)?,
                "DISPLAY" => collection.display_pref = parse_tristate(&value_as_string(value)?)?,
                "INDEX" => collection.index_pref = parse_tristate(&value_as_string(value)?)?,
                other => {
                    return Err(HandlerError::Protocol(format!(
                        "unknown collection attribute {other}"
                    )))
                }
            }
        }

        let mut txn = Transaction::begin(&mut self.db)?;
        let db = txn.store();
        db.append_collection(&mut collection)?;
        let mut mime_ids = Vec::with_capacity(mime_type_names.len());
        for name in &mime_type_names {
            mime_ids.push(db.mime_type_find_or_create(name)?.id);
        }
        db.set_collection_mime_types(collection.id, &mime_ids)?;
        txn.commit()?;

        let line = collection_line(&self.db, &collection, false)?;
        self.stream.send_untagged(line.as_bytes()).await?;
        Ok("COLLECTIONCREATE completed".into())
    }

    /// `<tag> COLLECTIONMODIFY <collection> (<attr> <value>...)`
    pub(crate) async fn collection_modify(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;

        let arg = self.stream.read_utf8_string().await?;
        let attrs = self.read_attr_pairs().await?;
        let mut collection = collection_from_id_or_path(&self.db, &arg)?;

        let mut changed_parts = BTreeSet::new();
        let mut mime_type_names: Option<Vec<String>> = None;
        let mut new_parent: Option<Option<i64>> = None;
        for (key, value) in &attrs {
            changed_parts.insert(key.clone());
            match key.as_str() {
                "NAME" => collection.name = value_as_string(value)?,
                "REMOTEID" => collection.remote_id = value_as_string(value)?,
                "REMOTEREVISION" => collection.remote_revision = value_as_string(value)?,
                "MIMETYPE" => mime_type_names = Some(value_as_name_list(value)?),
                "CACHEPOLICY" => parse_cache_policy(value, &mut collection.cache_policy)?,
                "ENABLED" => collection.enabled = value_as_string(value)? == "TRUE",
                "SYNC" => collection.sync_pref = parse_tristate(&value_as_string(value)?)?,
                "DISPLAY" => collection.display_pref = parse_tristate(&value_as_string(value)?)?,
                "INDEX" => collection.index_pref = parse_tristate(&value_as_string(value)?)?,
                "PARENT" => {
                    let id: i64 = value_as_string(value)?
                        .parse()
                        .map_err(|_| HandlerError::Protocol("bad parent id".into()))?;
                    new_parent = Some((id != 0).then_some(id));
                }
                other => {
                    return Err(HandlerError::Protocol(format!(
                        "unknown collection attribute {other}"
                    )))
                }
            }
        }

        let mut txn = Transaction::begin(&mut self.db)?;
        let db = txn.store();
        if let Some(parent) = new_parent {
            db.move_collection(collection.id, parent)?;
            collection.parent_id = parent;
        }
        if let Some(names) = mime_type_names {
            let mut mime_ids = Vec::with_capacity(names.len());
            for name in &names {
                mime_ids.push(db.mime_type_find_or_create(name)?.id);
            }
            db.set_collection_mime_types(collection.id, &mime_ids)?;
        }
        db.update_collection(&collection, changed_parts)?;
        txn.commit()?;
        Ok("COLLECTIONMODIFY completed".into())
    }

    /// `<tag> COLLECTIONDELETE <collection>`: cascades to children,
    /// items and parts. Virtual collections also release their search.
    pub(crate) async fn collection_delete(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        let arg = self.stream.read_utf8_string().await?;
        let collection = collection_from_id_or_path(&self.db, &arg)?;

        let mut txn = Transaction::begin(&mut self.db)?;
        txn.store().delete_collection(collection.id)?;
        txn.commit()?;

        if collection.is_persistent_search() {
            self.server.search.remove_search(collection.id);
        }
        Ok("COLLECTIONDELETE completed".into())
    }

    /// `<tag> COLLECTIONMOVE <collection> <new-parent>`
    pub(crate) async fn collection_move(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        let arg = self.stream.read_utf8_string().await?;
        let parent_arg = self.stream.read_utf8_string().await?;
        let collection = collection_from_id_or_path(&self.db, &arg)?;

        let new_parent = if parent_arg == "0" {
            None
        } else {
            Some(collection_from_id_or_path(&self.db, &parent_arg)?.id)
        };

        let mut txn = Transaction::begin(&mut self.db)?;
        txn.store().move_collection(collection.id, new_parent)?;
        txn.commit()?;
        Ok("COLLECTIONMOVE completed".into())
    }

    /// `<tag> LIST <base> <depth>`: emits one untagged collection line
    /// per collection below `base`. Depth `INF` lists the whole subtree;
    /// base `0` lists from the roots.
    pub(crate) async fn list(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        let base_arg = self.stream.read_utf8_string().await?;
        let depth_arg = self.stream.read_atom().await?;
        let depth = parse_depth(&depth_arg)?;

        let start: Vec<Collection> = if base_arg == "0" {
            self.db.collections_roots()?
        } else {
            vec![collection_from_id_or_path(&self.db, &base_arg)?]
        };

        let mut stack: Vec<(Collection, u32)> = start.into_iter().map(|c| (c, 0)).collect();
        let mut listed = 0usize;
        while let Some((col, level)) = stack.pop() {
            let line = collection_line(&self.db, &col, true)?;
            self.stream.send_untagged(line.as_bytes()).await?;
            listed += 1;
            if level < depth {
                for child in self.db.collection_children(col.id)? {
                    stack.push((child, level + 1));
                }
            }
        }
        Ok(format!("LIST completed, {listed} collection(s)"))
    }

    /// Reads the `(<ATTR> <value> ...)` list into uppercased key/value
    /// pairs, keeping nested list values raw.
    async fn read_attr_pairs(&mut self) -> Result<Vec<(String, Vec<u8>)>, HandlerError> {
        if self.stream.at_command_end().await? {
            return Ok(Vec::new());
        }
        let raw = self.stream.read_paren_list().await?;
        let mut pairs = Vec::new();
        let mut iter = raw.into_iter();
        while let Some(key) = iter.next() {
            let key = String::from_utf8(key)
                .map_err(|_| HandlerError::Protocol("non-UTF-8 attribute".into()))?
                .to_ascii_uppercase();
            let value = iter
                .next()
                .ok_or_else(|| HandlerError::Protocol(format!("attribute {key} without value")))?;
            pairs.push((key, value));
        }
        Ok(pairs)
    }
}

fn value_as_string(value: &[u8]) -> Result<String, HandlerError> {
    String::from_utf8(value.to_vec())
        .map_err(|_| HandlerError::Protocol("non-UTF-8 attribute value".into()))
}

fn value_as_name_list(value: &[u8]) -> Result<Vec<String>, HandlerError> {
    let text = value_as_string(value)?;
    let inner = text.trim();
    let inner = inner.strip_prefix('(').and_then(|s| s.strip_suffix(')')).unwrap_or(inner);
    Ok(inner.split_whitespace().map(str::to_string).collect())
}

fn parse_depth(depth: &str) -> Result<u32, HandlerError> {
    if depth.is_empty() {
        return Err(HandlerError::Protocol("no depth specified".into()));
    }
    if depth.eq_ignore_ascii_case("INF") {
        return Ok(u32::MAX);
    }
    depth.parse().map_err(|_| HandlerError::Protocol("invalid depth argument".into()))
}
