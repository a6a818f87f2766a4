// SPDX-License-Identifier: MIT

//! Item handlers: APPEND, X-AKAPPEND, FETCH, STORE, MOVE, REMOVE.

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncWrite};

use satchel_core::{PartType, PimItem};
use satchel_storage::Transaction;
use satchel_wire::{quoted, SelectionScope};

use super::helpers::collection_from_id_or_path;
use super::HandlerError;
use crate::connection::{Connection, ConnectionState};
use crate::retrieval::ItemRetriever;

/// One parsed STORE operation.
enum StoreOp {
    AddFlags(Vec<String>),
    RemoveFlags(Vec<String>),
    SetFlags(Vec<String>),
    AddTags(Vec<i64>),
    RemoveTags(Vec<i64>),
    SetTags(Vec<i64>),
    SetPart { fq_name: String, payload: Vec<u8> },
}

/// Parsed FETCH attribute list.
#[derive(Default)]
struct FetchSpec {
    parts: Vec<String>,
    full_payload: bool,
    cache_only: bool,
    all_attrs: bool,
    external_payload: bool,
    with_flags: bool,
    with_tags: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// `<tag> APPEND <collection> <mimetype> (<flags>) [<part> <payload>]...`
    pub(crate) async fn append(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;

        let collection_arg = self.stream.read_utf8_string().await?;
        let mime_type = self.stream.read_utf8_string().await?;
        let flags = self.read_name_list().await?;
        let parts = self.read_part_payloads().await?;

        let collection = collection_from_id_or_path(&self.db, &collection_arg)?;
        let item_id = self.create_item(collection.id, &mime_type, None, &flags, &parts)?;
        Ok(format!("Append completed ([UIDNEXT {item_id}])"))
    }

    /// `<tag> X-AKAPPEND <collection> <mimetype> <remote-id> (<flags>)
    /// [<part> <payload>]...`: bulk append used by resources to feed the
    /// cache without dirty tracking.
    pub(crate) async fn bulk_append(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        if self.ctx.resource.is_none() {
            return Err(HandlerError::Failure("X-AKAPPEND requires a resource context".into()));
        }

        let collection_arg = self.stream.read_utf8_string().await?;
        let mime_type = self.stream.read_utf8_string().await?;
        let remote_id = self.stream.read_utf8_string().await?;
        let flags = self.read_name_list().await?;
        let parts = self.read_part_payloads().await?;

        let collection = collection_from_id_or_path(&self.db, &collection_arg)?;
        let item_id =
            self.create_item(collection.id, &mime_type, Some(&remote_id), &flags, &parts)?;
        Ok(format!("Append completed ([UIDNEXT {item_id}])"))
    }

    fn create_item(
        &mut self,
        collection_id: i64,
        mime_type: &str,
        remote_id: Option<&str>,
        flags: &[String],
        parts: &[(String, Vec<u8>)],
    ) -> Result<i64, HandlerError> {
        let mut txn = Transaction::begin(&mut self.db)?;
        let db = txn.store();

        let mime = db.mime_type_find_or_create(mime_type)?;
        let size: i64 = parts.iter().map(|(_, data)| data.len() as i64).sum();
        let now = Utc::now();
        let mut item = PimItem {
            id: 0,
            rev: 0,
            remote_id: remote_id.unwrap_or_default().to_string(),
            gid: String::new(),
            collection_id,
            mime_type_id: mime.id,
            datetime: now,
            atime: now,
            size,
            dirty: remote_id.is_none(),
            hidden: false,
        };
        db.append_item(&mut item)?;

        let mut resolved = Vec::with_capacity(flags.len());
        for name in flags {
            resolved.push(db.flag_find_or_create(name)?);
        }
        if !resolved.is_empty() {
            // The added-notification already covers the fresh item; the
            // flag write must not record a second change.
            db.set_item_flags_silent(&mut item, &resolved)?;
        }

        for (fq_name, payload) in parts {
            let (ns, name) = PartType::split_fq(fq_name);
            let part_type = db.part_type_find_or_create(ns, name)?;
            db.store_part_payload(item.id, &part_type, payload.clone())?;
        }

        txn.commit()?;
        Ok(item.id)
    }

    /// `<tag> [scope] FETCH <set> (<attrs>)`
    pub(crate) async fn fetch(&mut self, scope: SelectionScope) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        let items = self.read_scoped_items(scope).await?;
        let spec = self.read_fetch_spec().await?;

        if !spec.cache_only && (!spec.parts.is_empty() || spec.full_payload) {
            let retriever = ItemRetriever::new(&mut self.db, &self.server.retrieval)
                .with_parts(&spec.parts)
                .with_full_payload(spec.full_payload)
                .with_own_resource(self.ctx.resource.as_ref().map(|r| r.name.clone()))
                .with_cache_verification(self.ctx.verify_cache_on_retrieval);
            retriever.exec(&items).await?;
        }

        for item in &items {
            let line = self.fetch_line(item, &spec)?;
            self.stream.send_untagged(&line).await?;
        }
        Ok("FETCH completed".into())
    }

    /// Serializes one item for the untagged FETCH data line.
    fn fetch_line(&mut self, item: &PimItem, spec: &FetchSpec) -> Result<Vec<u8>, HandlerError> {
        let mime = self.db.mime_type_name(item.mime_type_id)?;
        let mut line = format!(
            "{} FETCH (UID {} REV {} REMOTEID {} MIMETYPE {} COLLECTIONID {} SIZE {}",
            item.id,
            item.id,
            item.rev,
            quoted(&item.remote_id),
            quoted(&mime),
            item.collection_id,
            item.size
        )
        .into_bytes();

        if spec.with_flags || spec.all_attrs {
            let flags: Vec<String> =
                self.db.item_flags(item.id)?.into_iter().map(|f| f.name).collect();
            line.extend_from_slice(format!(" FLAGS ({})", flags.join(" ")).as_bytes());
        }
        if spec.with_tags || spec.all_attrs {
            let tags: Vec<String> = self
                .db
                .item_tags(item.id)?
                .into_iter()
                .map(|t| t.id.to_string())
                .collect();
            line.extend_from_slice(format!(" TAGS ({})", tags.join(" ")).as_bytes());
        }

        for (part_type, part) in self.db.parts_of_item(item.id)? {
            let fq = part_type.full_name();
            let wanted = spec.full_payload && part_type.ns == "PLD"
                || spec.all_attrs && part_type.ns == "ATR"
                || spec.parts.iter().any(|p| {
                    let (ns, name) = PartType::split_fq(p);
                    ns == part_type.ns && name == part_type.name
                });
            if !wanted {
                continue;
            }

            if spec.external_payload && part.external {
                // Hand out the filename instead of inlining the payload.
                let name = part.data.clone().unwrap_or_default();
                line.extend_from_slice(format!(" {fq}[FILE] {{{}}}\r\n", name.len()).as_bytes());
                line.extend_from_slice(&name);
                continue;
            }

            match self.db.part_payload(&part)? {
                Some(data) => {
                    line.extend_from_slice(format!(" {fq} {{{}}}\r\n", data.len()).as_bytes());
                    line.extend_from_slice(&data);
                }
                // Not materialized (retrieval failed or was skipped):
                // report the part as unavailable, keep the rest.
                None => line.extend_from_slice(format!(" {fq} NIL").as_bytes()),
            }
        }

        line.push(b')');
        Ok(line)
    }

    /// `<tag> [scope] STORE <set> <op> <args> [<op> <args>]...`
    pub(crate) async fn store(&mut self, scope: SelectionScope) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        let items = self.read_scoped_items(scope).await?;
        let ops = self.read_store_ops().await?;
        if ops.is_empty() {
            return Err(HandlerError::Protocol("STORE without operations".into()));
        }

        let dirty = self.modifies_foreign_items(&items)?;
        let mut txn = Transaction::begin(&mut self.db)?;
        let db = txn.store();

        for item in &items {
            let mut item = item.clone();
            for op in &ops {
                match op {
                    StoreOp::AddFlags(names) => {
                        let flags = resolve_flags(db, names)?;
                        db.add_item_flags(&mut item, &flags, dirty)?;
                    }
                    StoreOp::RemoveFlags(names) => {
                        let flags = resolve_flags(db, names)?;
                        db.remove_item_flags(&mut item, &flags, dirty)?;
                    }
                    StoreOp::SetFlags(names) => {
                        let flags = resolve_flags(db, names)?;
                        db.set_item_flags(&mut item, &flags, dirty)?;
                    }
                    StoreOp::AddTags(ids) => {
                        let tags = resolve_tags(db, ids)?;
                        db.add_item_tags(&mut item, &tags, dirty)?;
                    }
                    StoreOp::RemoveTags(ids) => {
                        let tags = resolve_tags(db, ids)?;
                        db.remove_item_tags(&mut item, &tags, dirty)?;
                    }
                    StoreOp::SetTags(ids) => {
                        let tags = resolve_tags(db, ids)?;
                        db.set_item_tags(&mut item, &tags, dirty)?;
                    }
                    StoreOp::SetPart { fq_name, payload } => {
                        let (ns, name) = PartType::split_fq(fq_name);
                        let part_type = db.part_type_find_or_create(ns, name)?;
                        db.store_part_payload(item.id, &part_type, payload.clone())?;
                        db.bump_item_rev(&mut item, dirty)?;
                        db.record_part_change(&item, fq_name);
                    }
                }
            }
        }

        txn.commit()?;
        Ok("STORE completed".into())
    }

    /// `<tag> [scope] MOVE <set> <target-collection>`
    pub(crate) async fn move_items(&mut self, scope: SelectionScope) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        let items = self.read_scoped_items(scope).await?;
        let target_arg = self.stream.read_utf8_string().await?;
        let target = collection_from_id_or_path(&self.db, &target_arg)?;

        let mut txn = Transaction::begin(&mut self.db)?;
        for item in items {
            let mut item = item;
            txn.store().move_item(&mut item, target.id)?;
        }
        txn.commit()?;
        Ok("MOVE completed".into())
    }

    /// `<tag> [scope] REMOVE <set>`
    pub(crate) async fn remove(&mut self, scope: SelectionScope) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        let items = self.read_scoped_items(scope).await?;
        if items.is_empty() {
            return Err(HandlerError::Failure("no items found".into()));
        }

        let mut txn = Transaction::begin(&mut self.db)?;
        for item in &items {
            txn.store().remove_item(item)?;
        }
        txn.commit()?;
        Ok(format!("REMOVE completed, {} item(s)", items.len()))
    }

    /// True when the writer is not the resource owning the items, so the
    /// change must be flagged for the resource to pick up.
    fn modifies_foreign_items(&self, items: &[PimItem]) -> Result<bool, HandlerError> {
        let Some(resource) = &self.ctx.resource else {
            return Ok(true);
        };
        for item in items {
            if self.db.resource_name_of_collection(item.collection_id)? != resource.name {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Reads a parenthesized list of names (flags), or nothing at end of
    /// command.
    async fn read_name_list(&mut self) -> Result<Vec<String>, HandlerError> {
        if self.stream.at_command_end().await? || !self.stream.has_list().await? {
            return Ok(Vec::new());
        }
        let raw = self.stream.read_paren_list().await?;
        raw.into_iter()
            .map(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|_| HandlerError::Protocol("non-UTF-8 flag name".into()))
            })
            .collect()
    }

    /// Reads `<part-name> <payload>` pairs until end of command.
    async fn read_part_payloads(&mut self) -> Result<Vec<(String, Vec<u8>)>, HandlerError> {
        let mut parts = Vec::new();
        while !self.stream.at_command_end().await? {
            let name = self.stream.read_atom().await?;
            if name.is_empty() {
                return Err(HandlerError::Protocol("expected part name".into()));
            }
            let payload = self.stream.read_string().await?;
            parts.push((name, payload));
        }
        Ok(parts)
    }

    async fn read_fetch_spec(&mut self) -> Result<FetchSpec, HandlerError> {
        let mut spec = FetchSpec::default();
        if self.stream.at_command_end().await? {
            return Ok(spec);
        }
        let attrs = self.stream.read_paren_list().await?;
        for attr in attrs {
            let attr = String::from_utf8(attr)
                .map_err(|_| HandlerError::Protocol("non-UTF-8 fetch attribute".into()))?;
            match attr.to_ascii_uppercase().as_str() {
                "UID" => {}
                "FLAGS" => spec.with_flags = true,
                "TAGS" => spec.with_tags = true,
                "FULLPAYLOAD" => spec.full_payload = true,
                "CACHEONLY" => spec.cache_only = true,
                "ALLATTR" => spec.all_attrs = true,
                "EXTERNALPAYLOAD" => spec.external_payload = true,
                _ => spec.parts.push(attr),
            }
        }
        Ok(spec)
    }

    async fn read_store_ops(&mut self) -> Result<Vec<StoreOp>, HandlerError> {
        let mut ops = Vec::new();
        while !self.stream.at_command_end().await? {
            let op = self.stream.read_atom().await?;
            match op.to_ascii_uppercase().as_str() {
                "+FLAGS" => ops.push(StoreOp::AddFlags(self.read_name_list().await?)),
                "-FLAGS" => ops.push(StoreOp::RemoveFlags(self.read_name_list().await?)),
                "FLAGS" => ops.push(StoreOp::SetFlags(self.read_name_list().await?)),
                "+TAGS" => ops.push(StoreOp::AddTags(self.read_id_list().await?)),
                "-TAGS" => ops.push(StoreOp::RemoveTags(self.read_id_list().await?)),
                "TAGS" => ops.push(StoreOp::SetTags(self.read_id_list().await?)),
                "" => return Err(HandlerError::Protocol("expected STORE operation".into())),
                _ => {
                    // Anything else is a part name followed by its payload.
                    let payload = self.stream.read_string().await?;
                    ops.push(StoreOp::SetPart { fq_name: op, payload });
                }
            }
        }
        Ok(ops)
    }

    async fn read_id_list(&mut self) -> Result<Vec<i64>, HandlerError> {
        let raw = self.stream.read_paren_list().await?;
        raw.into_iter()
            .map(|bytes| {
                std::str::from_utf8(&bytes)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| HandlerError::Protocol("expected numeric id".into()))
            })
            .collect()
    }
}

fn resolve_flags(
    db: &mut satchel_storage::DataStore,
    names: &[String],
) -> Result<Vec<satchel_core::Flag>, HandlerError> {
    let mut flags = Vec::with_capacity(names.len());
    for name in names {
        flags.push(db.flag_find_or_create(name)?);
    }
    Ok(flags)
}

fn resolve_tags(
    db: &mut satchel_storage::DataStore,
    ids: &[i64],
) -> Result<Vec<satchel_core::Tag>, HandlerError> {
    let mut tags = Vec::with_capacity(ids.len());
    for id in ids {
        let tag = db
            .tag_by_id(*id)?
            .ok_or_else(|| HandlerError::Failure(format!("no tag with id {id}")))?;
        tags.push(tag);
    }
    Ok(tags)
}
