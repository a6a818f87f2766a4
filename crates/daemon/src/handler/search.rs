// SPDX-License-Identifier: MIT

//! Search handlers: SEARCH, SEARCH_STORE, SEARCH_RESULT.

use std::collections::HashSet;

use tokio::io::{AsyncRead, AsyncWrite};

use satchel_core::{CachePolicy, Collection, Tristate, SEARCH_RESOURCE_ID, SEARCH_ROOT_COLLECTION_ID};
use satchel_storage::Transaction;
use satchel_wire::{ImapSet, SelectionScope};

use super::helpers::{collection_from_id_or_path, collection_line};
use super::HandlerError;
use crate::connection::{Connection, ConnectionState};

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// `<tag> SEARCH <query>`: one-shot query via the search engines;
    /// answers with an untagged `SEARCH <id>...` line.
    pub(crate) async fn search(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        let query = self.stream.read_utf8_string().await?;
        if query.is_empty() {
            return Err(HandlerError::Protocol("no query specified".into()));
        }

        let ids = self
            .server
            .search
            .one_shot(&query)
            .map_err(|e| HandlerError::Failure(e.to_string()))?;
        let id_list: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        self.stream
            .send_untagged(format!("SEARCH {}", id_list.join(" ")).trim_end().as_bytes())
            .await?;
        Ok("SEARCH completed".into())
    }

    /// `<tag> SEARCH_STORE <name> <query> [(<attr> <value>...)]`:
    /// creates a persistent search collection under the search root and
    /// registers it with the search manager.
    pub(crate) async fn search_store(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;

        let name = self.stream.read_utf8_string().await?;
        if name.is_empty() {
            return Err(HandlerError::Failure("no name specified".into()));
        }
        let query = self.stream.read_utf8_string().await?;
        if query.is_empty() {
            return Err(HandlerError::Failure("no query specified".into()));
        }

        let mut query_language = String::new();
        let mut query_attributes = String::new();
        let mut query_collections = String::new();
        if !self.stream.at_command_end().await? && self.stream.has_list().await? {
            let raw = self.stream.read_paren_list().await?;
            let mut iter = raw.into_iter();
            while let Some(key) = iter.next() {
                let key = String::from_utf8(key)
                    .map_err(|_| HandlerError::Protocol("non-UTF-8 attribute".into()))?
                    .to_ascii_uppercase();
                let value = iter.next().ok_or_else(|| {
                    HandlerError::Protocol(format!("attribute {key} without value"))
                })?;
                let value = String::from_utf8(value)
                    .map_err(|_| HandlerError::Protocol("non-UTF-8 attribute value".into()))?;
                match key.as_str() {
                    "QUERYLANGUAGE" => query_language = value,
                    "QUERYATTRIBUTES" => query_attributes = value,
                    "QUERYCOLLECTIONS" => {
                        query_collections = value
                            .trim_start_matches('(')
                            .trim_end_matches(')')
                            .to_string()
                    }
                    other => {
                        return Err(HandlerError::Protocol(format!(
                            "unknown search attribute {other}"
                        )))
                    }
                }
            }
        }

        let mut collection = Collection {
            id: 0,
            parent_id: Some(SEARCH_ROOT_COLLECTION_ID),
            resource_id: SEARCH_RESOURCE_ID,
            name,
            // The query doubles as the remote id, like any other opaque
            // backend identifier.
            remote_id: query.clone(),
            remote_revision: String::new(),
            is_virtual: true,
            enabled: true,
            sync_pref: Tristate::Default,
            display_pref: Tristate::Default,
            index_pref: Tristate::Default,
            query_string: query,
            query_attributes,
            query_collections,
            query_language,
            cache_policy: CachePolicy::default(),
        };

        let mut txn = Transaction::begin(&mut self.db)?;
        let db = txn.store();
        db.append_collection(&mut collection)?;

        // No way to know what the query will match: allow every content
        // mime-type, directories excluded.
        let mime_ids: Vec<_> = db
            .mime_types_all()?
            .into_iter()
            .filter(|mt| mt.name != "inode/directory")
            .map(|mt| mt.id)
            .collect();
        db.set_collection_mime_types(collection.id, &mime_ids)?;
        txn.commit()?;

        self.server.search.add_search(&collection);

        let line = collection_line(&self.db, &collection, false)?;
        self.stream.send_untagged(line.as_bytes()).await?;
        Ok("SEARCH_STORE completed".into())
    }

    /// `<tag> [UID] SEARCH_RESULT <search-collection> <set|()>`: replaces
    /// the membership of a persistent search with the given item set.
    /// Used by agent-fed searches.
    pub(crate) async fn search_result(
        &mut self,
        _scope: SelectionScope,
    ) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;

        let arg = self.stream.read_utf8_string().await?;
        let collection = collection_from_id_or_path(&self.db, &arg)?;
        if !collection.is_virtual {
            return Err(HandlerError::Failure("not a persistent search collection".into()));
        }

        let wanted: HashSet<i64> = if self.stream.has_list().await? {
            // An empty list clears the search.
            let raw = self.stream.read_paren_list().await?;
            if !raw.is_empty() {
                return Err(HandlerError::Protocol("expected empty list or id set".into()));
            }
            HashSet::new()
        } else {
            let raw = self.stream.read_atom().await?;
            let set =
                ImapSet::parse(&raw).map_err(|e| HandlerError::Protocol(e.to_string()))?;
            self.db.items_by_set(&set, None)?.into_iter().map(|i| i.id).collect()
        };

        let current: HashSet<i64> =
            self.db.virtual_collection_items(collection.id)?.into_iter().collect();

        let mut txn = Transaction::begin(&mut self.db)?;
        let db = txn.store();
        for added in wanted.difference(&current) {
            db.link_virtual_item(collection.id, *added)?;
        }
        for removed in current.difference(&wanted) {
            db.unlink_virtual_item(collection.id, *removed)?;
        }
        txn.commit()?;
        Ok("SEARCH_RESULT completed".into())
    }
}
