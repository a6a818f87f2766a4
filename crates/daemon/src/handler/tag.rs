// SPDX-License-Identifier: MIT

//! Tag handlers: TAGAPPEND, TAGSTORE, TAGREMOVE, TAGFETCH.

use tokio::io::{AsyncRead, AsyncWrite};

use satchel_core::Tag;
use satchel_storage::Transaction;
use satchel_wire::{quoted, ImapSet};

use super::HandlerError;
use crate::connection::{Connection, ConnectionState};

fn tag_line(tag: &Tag) -> String {
    format!(
        "{} TAGFETCH (GID {} PARENT {} TYPE {})",
        tag.id,
        quoted(&tag.gid),
        tag.parent_id.unwrap_or(0),
        quoted(&tag.type_name)
    )
}

fn apply_tag_attrs(
    tag: &mut Tag,
    attrs: &[(String, String)],
) -> Result<(), HandlerError> {
    for (key, value) in attrs {
        match key.as_str() {
            "PARENT" => {
                let id: i64 = value
                    .parse()
                    .map_err(|_| HandlerError::Protocol("bad tag parent id".into()))?;
                tag.parent_id = (id != 0).then_some(id);
            }
            "TYPE" => tag.type_name = value.clone(),
            "GID" => tag.gid = value.clone(),
            other => {
                return Err(HandlerError::Protocol(format!("unknown tag attribute {other}")))
            }
        }
    }
    Ok(())
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// `<tag> TAGAPPEND <gid> [(<attr> <value>...)]`: creates a tag, or
    /// returns the existing one with the same gid.
    pub(crate) async fn tag_append(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        let gid = self.stream.read_utf8_string().await?;
        if gid.is_empty() {
            return Err(HandlerError::Protocol("missing tag gid".into()));
        }
        let attrs = self.read_tag_attrs().await?;

        let existing = self.db.tags_by_gid(&gid)?;
        let tag = match existing.into_iter().next() {
            Some(tag) => tag,
            None => {
                let mut tag =
                    Tag { id: 0, gid, parent_id: None, type_name: "PLAIN".to_string() };
                apply_tag_attrs(&mut tag, &attrs)?;
                let mut txn = Transaction::begin(&mut self.db)?;
                txn.store().append_tag(&mut tag)?;
                txn.commit()?;
                tag
            }
        };

        self.stream.send_untagged(tag_line(&tag).as_bytes()).await?;
        Ok("TAGAPPEND completed".into())
    }

    /// `<tag> TAGSTORE <id> (<attr> <value>...)`
    pub(crate) async fn tag_store(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        let id = self.stream.read_number().await?;
        let attrs = self.read_tag_attrs().await?;

        let mut tag = self
            .db
            .tag_by_id(id)?
            .ok_or_else(|| HandlerError::Failure(format!("no tag with id {id}")))?;
        apply_tag_attrs(&mut tag, &attrs)?;

        let mut txn = Transaction::begin(&mut self.db)?;
        txn.store().update_tag(&tag)?;
        txn.commit()?;

        self.stream.send_untagged(tag_line(&tag).as_bytes()).await?;
        Ok("TAGSTORE completed".into())
    }

    /// `<tag> TAGREMOVE <set>`
    pub(crate) async fn tag_remove(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        let raw = self.stream.read_atom().await?;
        let set = ImapSet::parse(&raw).map_err(|e| HandlerError::Protocol(e.to_string()))?;

        let tags = self.db.tags_by_set(&set)?;
        if tags.is_empty() {
            return Err(HandlerError::Failure("no tags found".into()));
        }
        let count = tags.len();

        let mut txn = Transaction::begin(&mut self.db)?;
        txn.store().remove_tags(&tags)?;
        txn.commit()?;
        Ok(format!("TAGREMOVE completed, {count} tag(s)"))
    }

    /// `<tag> TAGFETCH <set>`: emits one untagged line per tag.
    pub(crate) async fn tag_fetch(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        let raw = self.stream.read_atom().await?;
        let set = ImapSet::parse(&raw).map_err(|e| HandlerError::Protocol(e.to_string()))?;

        let tags: Vec<Tag> = if set.is_all() {
            self.db.tags_all()?
        } else {
            self.db.tags_by_set(&set)?
        };
        for tag in &tags {
            self.stream.send_untagged(tag_line(tag).as_bytes()).await?;
        }
        Ok("TAGFETCH completed".into())
    }

    async fn read_tag_attrs(&mut self) -> Result<Vec<(String, String)>, HandlerError> {
        if self.stream.at_command_end().await? || !self.stream.has_list().await? {
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
            let value = String::from_utf8(value)
                .map_err(|_| HandlerError::Protocol("non-UTF-8 attribute value".into()))?;
            pairs.push((key, value));
        }
        Ok(pairs)
    }
}
