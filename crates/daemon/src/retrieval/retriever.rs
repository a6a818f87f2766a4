// SPDX-License-Identifier: MIT

//! Builds retrieval requests for items whose requested payload parts are
//! not cached, and blocks on the retrieval manager until the owning
//! resources have delivered.

use satchel_core::{Id, PartType, PimItem};
use satchel_storage::{verify_external_part, DataStore, StorageError};

use super::{RetrievalError, RetrievalHandle, RetrievalRequest};

/// The payload part implied by `FULLPAYLOAD`.
pub const FULL_PAYLOAD_PART: &str = "RFC822";

pub struct ItemRetriever<'a> {
    db: &'a mut DataStore,
    handle: &'a RetrievalHandle,
    /// Payload part names requested, without the `PLD:` prefix.
    parts: Vec<String>,
    full_payload: bool,
    /// Resource identity of the session, when the peer is a resource.
    /// A resource never triggers retrieval from itself.
    own_resource: Option<String>,
    /// Check external payload files against their part rows before use.
    verify_cache: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RetrieveExecError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
}

impl<'a> ItemRetriever<'a> {
    pub fn new(db: &'a mut DataStore, handle: &'a RetrievalHandle) -> Self {
        Self {
            db,
            handle,
            parts: Vec::new(),
            full_payload: false,
            own_resource: None,
            verify_cache: false,
        }
    }

    /// Requests payload parts by fully-qualified name; only the `PLD`
    /// namespace triggers retrieval.
    pub fn with_parts(mut self, fq_parts: &[String]) -> Self {
        for fq in fq_parts {
            let (ns, name) = PartType::split_fq(fq);
            if ns == "PLD" && !self.parts.iter().any(|p| p == name) {
                self.parts.push(name.to_string());
            }
        }
        self
    }

    pub fn with_full_payload(mut self, full: bool) -> Self {
        self.full_payload = full;
        if full && !self.parts.iter().any(|p| p == FULL_PAYLOAD_PART) {
            self.parts.push(FULL_PAYLOAD_PART.to_string());
        }
        self
    }

    pub fn with_own_resource(mut self, resource: Option<String>) -> Self {
        self.own_resource = resource;
        self
    }

    pub fn with_cache_verification(mut self, verify: bool) -> Self {
        self.verify_cache = verify;
        self
    }

    /// Ensures the requested parts of every item are materialized,
    /// blocking on the retrieval manager for the missing ones.
    pub async fn exec(mut self, items: &[PimItem]) -> Result<(), RetrieveExecError> {
        if self.parts.is_empty() && !self.full_payload {
            return Ok(());
        }

        let mut requests = Vec::new();
        for item in items {
            if let Some(request) = self.build_request(item)? {
                requests.push(request);
            }
        }

        for request in requests {
            self.handle.request_item_delivery(request).await?;
        }
        Ok(())
    }

    /// A request covering the parts of `item` that need the resource, or
    /// `None` when the cache can already answer.
    fn build_request(&mut self, item: &PimItem) -> Result<Option<RetrievalRequest>, StorageError> {
        let resource = self.resource_of(item.collection_id)?;
        if self.own_resource.as_deref() == Some(resource.as_str()) {
            // Resources feed the cache; they never fetch through it.
            return Ok(None);
        }

        if self.verify_cache {
            for (_, part) in self.db.parts_of_item(item.id)? {
                if part.external && part.data.is_some() {
                    if let Err(e) = verify_external_part(self.db.external_dir(), &part) {
                        tracing::warn!(item = item.id, "cached payload failed verification: {e}");
                        self.db.evict_part_payload(&part)?;
                    }
                }
            }
        }

        let mut missing = self.parts.clone();
        for (part_type, part) in self.db.parts_of_item(item.id)? {
            if part_type.ns != "PLD" {
                continue;
            }
            if part.datasize > 0 && part.data.is_some() {
                missing.retain(|name| name != &part_type.name);
            } else if self.full_payload && !missing.iter().any(|n| n == &part_type.name) {
                // A known payload part with no data also needs an update.
                missing.push(part_type.name.clone());
            }
        }

        if missing.is_empty() {
            return Ok(None);
        }

        let mime_type = self
            .db
            .mime_type_name(item.mime_type_id)
            .unwrap_or_else(|_| "application/octet-stream".to_string());

        Ok(Some(RetrievalRequest {
            item_id: item.id,
            remote_id: item.remote_id.clone(),
            mime_type,
            resource,
            parts: missing,
        }))
    }

    fn resource_of(&self, collection_id: Id) -> Result<String, StorageError> {
        self.db.resource_name_of_collection(collection_id)
    }
}
