// SPDX-License-Identifier: MIT

//! Shared serialization and resolution helpers for handlers.

use satchel_core::{CachePolicy, Collection, Tristate};
use satchel_storage::{DataStore, StorageError};
use satchel_wire::{join, quoted};

use super::HandlerError;

/// Serializes a collection as the payload of an untagged response line:
/// `<id> <parent-id> (NAME ... MIMETYPE (...) ... CACHEPOLICY (...))`.
pub(crate) fn collection_line(
    db: &DataStore,
    col: &Collection,
    include_statistics: bool,
) -> Result<String, StorageError> {
    let mime_types: Vec<String> =
        db.collection_mime_types(col.id)?.into_iter().map(|m| m.name).collect();
    let resource = db
        .resource_by_id(col.resource_id)?
        .map(|r| r.name)
        .unwrap_or_default();

    let mut body = Vec::new();
    body.push(format!("NAME {}", quoted(&col.name)));
    body.push(format!("MIMETYPE ({})", join(&mime_types, " ")));
    body.push(format!("REMOTEID {}", quoted(&col.remote_id)));
    body.push(format!("REMOTEREVISION {}", quoted(&col.remote_revision)));
    body.push(format!("RESOURCE {}", quoted(&resource)));
    body.push(format!("VIRTUAL {}", col.is_virtual as u8));

    if include_statistics {
        let (count, size) = db.collection_statistics(col)?;
        body.push(format!("MESSAGES {count}"));
        body.push(format!("SIZE {size}"));
    }

    if col.is_persistent_search() {
        let search = format!(
            "({} QUERYSTRING {} QUERYCOLLECTIONS ({}))",
            col.query_attributes,
            quoted(&col.query_string),
            col.query_collections
        );
        body.push(format!("PERSISTENTSEARCH {}", quoted(&search)));
    }

    body.push(cache_policy_fragment(&col.cache_policy));
    body.push(format!("ENABLED {}", if col.enabled { "TRUE" } else { "FALSE" }));
    body.push(format!("DISPLAY {}", col.display_pref.as_str()));
    body.push(format!("SYNC {}", col.sync_pref.as_str()));
    body.push(format!("INDEX {}", col.index_pref.as_str()));

    Ok(format!(
        "{} {} ({})",
        col.id,
        col.parent_id.unwrap_or(0),
        join(&body, " ")
    ))
}

/// `CACHEPOLICY (INHERIT b INTERVAL n CACHETIMEOUT n SYNCONDEMAND b LOCALPARTS (...))`
pub(crate) fn cache_policy_fragment(policy: &CachePolicy) -> String {
    format!(
        "CACHEPOLICY (INHERIT {} INTERVAL {} CACHETIMEOUT {} SYNCONDEMAND {} LOCALPARTS ({}))",
        if policy.inherit { "true" } else { "false" },
        policy.check_interval,
        policy.cache_timeout,
        if policy.sync_on_demand { "true" } else { "false" },
        join(&policy.local_parts, " ")
    )
}

/// Parses the key/value list of a CACHEPOLICY argument into `policy`.
pub(crate) fn parse_cache_policy(
    raw: &[u8],
    policy: &mut CachePolicy,
) -> Result<(), HandlerError> {
    let items = split_list(raw)?;
    let mut iter = items.iter();
    while let Some(key) = iter.next() {
        let value = iter
            .next()
            .ok_or_else(|| HandlerError::Protocol("cache policy key without value".into()))?;
        match key.to_ascii_uppercase().as_str() {
            "INHERIT" => policy.inherit = value.eq_ignore_ascii_case("true"),
            "INTERVAL" => {
                policy.check_interval = value
                    .parse()
                    .map_err(|_| HandlerError::Protocol("bad cache interval".into()))?
            }
            "CACHETIMEOUT" => {
                policy.cache_timeout = value
                    .parse()
                    .map_err(|_| HandlerError::Protocol("bad cache timeout".into()))?
            }
            "SYNCONDEMAND" => policy.sync_on_demand = value.eq_ignore_ascii_case("true"),
            "LOCALPARTS" => {
                policy.local_parts = split_list(value.as_bytes())?;
            }
            other => {
                return Err(HandlerError::Protocol(format!("unknown cache policy key {other}")))
            }
        }
    }
    Ok(())
}

/// Splits a possibly parenthesized byte fragment into whitespace-separated
/// tokens, honoring one level of nested parentheses per token.
fn split_list(raw: &[u8]) -> Result<Vec<String>, HandlerError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| HandlerError::Protocol("non-UTF-8 list".into()))?;
    let inner = text.trim();
    let inner = inner.strip_prefix('(').and_then(|s| s.strip_suffix(')')).unwrap_or(inner);

    let mut out = Vec::new();
    let mut depth = 0u32;
    let mut current = String::new();
    for c in inner.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| HandlerError::Protocol("unbalanced parentheses".into()))?;
                current.push(c);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    Ok(out)
}

/// Resolves a collection argument that is either a numeric id or a
/// slash-separated name path from the root.
pub(crate) fn collection_from_id_or_path(
    db: &DataStore,
    arg: &str,
) -> Result<Collection, HandlerError> {
    if let Ok(id) = arg.parse::<i64>() {
        return db
            .collection_by_id(id)?
            .ok_or_else(|| HandlerError::Failure(format!("no collection with id {id}")));
    }

    let mut current: Option<Collection> = None;
    for name in arg.split('/').filter(|p| !p.is_empty()) {
        let parent_id = current.as_ref().map(|c| c.id);
        let found = db.collection_by_parent_and_name(parent_id, name)?;
        current = Some(found.ok_or_else(|| {
            HandlerError::Failure(format!("no collection named {name:?} in path {arg:?}"))
        })?);
    }
    current.ok_or_else(|| HandlerError::Protocol("empty collection path".into()))
}

/// Parses a tristate argument (`TRUE`/`FALSE`/`DEFAULT`).
pub(crate) fn parse_tristate(value: &str) -> Result<Tristate, HandlerError> {
    Tristate::parse(value)
        .ok_or_else(|| HandlerError::Protocol(format!("expected tristate, got {value:?}")))
}

#[cfg(test)]
#[path = "helpers_tests.rs"]
mod tests;
