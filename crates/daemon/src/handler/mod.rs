// SPDX-License-Identifier: MIT

//! Command handlers, one per verb.
//!
//! A handler parses its remaining arguments from the stream, executes
//! inside a transaction on the connection's data store (pure reads may
//! skip it), emits untagged responses as it goes, and returns the text of
//! the tagged OK. Failures roll the transaction back; the dispatcher
//! turns them into a tagged NO (execution) or BAD (protocol).

mod collection;
mod helpers;
mod item;
mod relation;
mod search;
mod session;
mod tag;
mod transaction;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use satchel_storage::StorageError;
use satchel_wire::{ImapSet, ProtocolError, SelectionScope};

use crate::connection::{Connection, ConnectionState};
use crate::retrieval::RetrievalError;

#[derive(Debug, Error)]
pub enum HandlerError {
    /// Recoverable execution failure, answered with a tagged NO.
    #[error("{0}")]
    Failure(String),

    /// Malformed command or argument, answered with a tagged BAD.
    #[error("{0}")]
    Protocol(String),

    /// Socket-level failure; the connection is torn down.
    #[error(transparent)]
    Wire(#[from] ProtocolError),

    #[error("{0}")]
    Storage(#[from] StorageError),

    #[error("item retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),
}

impl From<crate::retrieval::RetrieveExecError> for HandlerError {
    fn from(e: crate::retrieval::RetrieveExecError) -> Self {
        match e {
            crate::retrieval::RetrieveExecError::Storage(e) => HandlerError::Storage(e),
            crate::retrieval::RetrieveExecError::Retrieval(e) => HandlerError::Retrieval(e),
        }
    }
}

/// Routes a parsed verb to its handler.
pub async fn dispatch<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut Connection<S>,
    scope: SelectionScope,
    verb: &str,
) -> Result<String, HandlerError> {
    match verb {
        "LOGIN" => conn.login().await,
        "BEGIN" => conn.transaction_begin().await,
        "COMMIT" => conn.transaction_commit().await,
        "ROLLBACK" => conn.transaction_rollback().await,
        "LOGOUT" => conn.logout().await,
        "CAPABILITY" => conn.capability().await,
        "SELECT" => conn.select(scope).await,
        "RESSELECT" => conn.resource_select().await,

        "APPEND" => conn.append().await,
        "X-AKAPPEND" => conn.bulk_append().await,
        "FETCH" => conn.fetch(scope).await,
        "STORE" => conn.store(scope).await,
        "MOVE" => conn.move_items(scope).await,
        "REMOVE" => conn.remove(scope).await,

        "COLLECTIONCREATE" => conn.collection_create().await,
        "COLLECTIONMODIFY" => conn.collection_modify().await,
        "COLLECTIONDELETE" => conn.collection_delete().await,
        "COLLECTIONMOVE" => conn.collection_move().await,
        "LIST" => conn.list().await,

        "SEARCH" => conn.search().await,
        "SEARCH_STORE" => conn.search_store().await,
        "SEARCH_RESULT" => conn.search_result(scope).await,

        "RELATIONSTORE" => conn.relation_store().await,
        "RELATIONREMOVE" => conn.relation_remove().await,
        "RELATIONFETCH" => conn.relation_fetch().await,

        "TAGAPPEND" => conn.tag_append().await,
        "TAGSTORE" => conn.tag_store().await,
        "TAGREMOVE" => conn.tag_remove().await,
        "TAGFETCH" => conn.tag_fetch().await,

        other => Err(HandlerError::Protocol(format!("unknown command {other}"))),
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Reads and resolves the item addressing that follows a scoped verb.
    ///
    /// `UID` (and unscoped commands) read an id set; `RID` and `GID` read
    /// a string; `HRID` reads a path list of remote ids ending in the
    /// item's; `TAG` reads a tag id set.
    pub(crate) async fn read_scoped_items(
        &mut self,
        scope: SelectionScope,
    ) -> Result<Vec<satchel_core::PimItem>, HandlerError> {
        match scope {
            SelectionScope::None | SelectionScope::Uid => {
                if scope == SelectionScope::None {
                    // Unscoped item addressing needs a selected collection.
                    self.require_state(ConnectionState::Selected)?;
                }
                let raw = self.stream.read_atom().await?;
                let set = ImapSet::parse(&raw)
                    .map_err(|e| HandlerError::Protocol(e.to_string()))?;
                let collection = match (scope, self.ctx.selected_collection) {
                    (SelectionScope::None, Some(id)) => self.db.collection_by_id(id)?,
                    _ => None,
                };
                Ok(self.db.items_by_set(&set, collection.as_ref())?)
            }
            SelectionScope::Rid => {
                let rid = self.stream.read_utf8_string().await?;
                let resource_id = self.ctx.resource.as_ref().map(|r| r.id);
                let items = self.db.items_by_remote_id(&rid, resource_id)?;
                if items.is_empty() {
                    return Err(HandlerError::Failure(format!("no item with remote id {rid:?}")));
                }
                Ok(items)
            }
            SelectionScope::Hrid => {
                let path = self.stream.read_paren_list().await?;
                self.resolve_hrid(&path)
            }
            SelectionScope::Gid => {
                let gid = self.stream.read_utf8_string().await?;
                let items = self.db.items_by_gid(&gid)?;
                if items.is_empty() {
                    return Err(HandlerError::Failure(format!("no item with gid {gid:?}")));
                }
                Ok(items)
            }
            SelectionScope::Tag => {
                let raw = self.stream.read_atom().await?;
                let set = ImapSet::parse(&raw)
                    .map_err(|e| HandlerError::Protocol(e.to_string()))?;
                Ok(self.db.items_by_tag_set(&set)?)
            }
        }
    }

    /// Resolves a hierarchical remote-id path: collection remote ids from
    /// the root down, the last element being the item's remote id.
    fn resolve_hrid(
        &mut self,
        path: &[Vec<u8>],
    ) -> Result<Vec<satchel_core::PimItem>, HandlerError> {
        let resource = self
            .ctx
            .resource
            .clone()
            .ok_or_else(|| HandlerError::Failure("HRID requires a resource context".into()))?;
        if path.len() < 2 {
            return Err(HandlerError::Protocol("HRID path needs collection and item".into()));
        }

        let mut collection: Option<satchel_core::Collection> = None;
        for element in &path[..path.len() - 1] {
            let rid = String::from_utf8(element.clone())
                .map_err(|_| HandlerError::Protocol("non-UTF-8 remote id".into()))?;
            let found = self.db.collection_by_remote_id(resource.id, &rid)?;
            let found = found
                .ok_or_else(|| HandlerError::Failure(format!("no collection with remote id {rid:?}")))?;
            // Each level must be the child of the previous one.
            if let Some(parent) = &collection {
                if found.parent_id != Some(parent.id) {
                    return Err(HandlerError::Failure("broken HRID chain".into()));
                }
            }
            collection = Some(found);
        }

        let item_rid = String::from_utf8(path[path.len() - 1].clone())
            .map_err(|_| HandlerError::Protocol("non-UTF-8 remote id".into()))?;
        let collection =
            collection.ok_or_else(|| HandlerError::Failure("broken HRID chain".into()))?;
        let items: Vec<_> = self
            .db
            .items_by_remote_id(&item_rid, Some(resource.id))?
            .into_iter()
            .filter(|i| i.collection_id == collection.id)
            .collect();
        if items.is_empty() {
            return Err(HandlerError::Failure(format!("no item with remote id {item_rid:?}")));
        }
        Ok(items)
    }
}
