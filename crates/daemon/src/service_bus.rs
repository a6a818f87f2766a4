// SPDX-License-Identifier: MIT

//! Name-based RPC to external processes.
//!
//! The transport itself is pluggable; the server only needs typed calls
//! to named endpoints and owner-change notifications. Resources answer
//! delivery and synchronization calls; a supervisor process owns the
//! control name, and losing its owner shuts the server down.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use satchel_core::Id;

/// Well-known name of the server itself.
pub const SERVER_SERVICE: &str = "org.freedesktop.Satchel";

/// Well-known name of the supervisor process.
pub const CONTROL_SERVICE: &str = "org.freedesktop.Satchel.Control";

/// Prefix of per-resource endpoints.
pub const RESOURCE_SERVICE_PREFIX: &str = "org.freedesktop.Satchel.Resource.";

/// Endpoint name for a resource id.
pub fn resource_service_name(resource: &str) -> String {
    format!("{RESOURCE_SERVICE_PREFIX}{resource}")
}

/// The resource id of a resource endpoint name, if it is one.
pub fn resource_from_service_name(service: &str) -> Option<&str> {
    service.strip_prefix(RESOURCE_SERVICE_PREFIX)
}

#[derive(Debug, Error, Clone)]
pub enum RpcError {
    #[error("endpoint has no owner: {0}")]
    NoOwner(String),

    #[error("call failed: {0}")]
    CallFailed(String),
}

/// A service name gained or lost its owner.
#[derive(Debug, Clone)]
pub struct OwnerChange {
    pub service: String,
    /// True when the previous owner disappeared.
    pub lost: bool,
}

/// Typed calls a resource process answers.
#[async_trait]
pub trait ResourceRpc: Send + Sync {
    /// Ask the resource to materialize the given parts of one item.
    /// Returns once the resource has written the parts into storage.
    async fn request_item_delivery(
        &self,
        item_id: Id,
        remote_id: &str,
        mime_type: &str,
        parts: &[String],
    ) -> Result<(), RpcError>;

    /// Fire-and-forget request to synchronize one collection.
    async fn synchronize_collection(&self, collection_id: Id) -> Result<(), RpcError>;

    /// Fire-and-forget request to synchronize the whole resource.
    async fn synchronize(&self) -> Result<(), RpcError>;
}

/// Transport handing out typed stubs by endpoint name.
pub trait ServiceBus: Send + Sync {
    /// A stub for a resource endpoint, or `None` when the endpoint
    /// currently has no owner.
    fn resource(&self, resource: &str) -> Option<Arc<dyn ResourceRpc>>;

    /// Stream of owner changes across all watched names.
    fn subscribe_owner_changes(&self) -> broadcast::Receiver<OwnerChange>;
}

/// Bus used when no transport is configured: no resources are reachable
/// and no owner ever changes. Retrieval requests fail fast.
pub struct NullServiceBus {
    owner_tx: broadcast::Sender<OwnerChange>,
}

impl Default for NullServiceBus {
    fn default() -> Self {
        let (owner_tx, _) = broadcast::channel(16);
        Self { owner_tx }
    }
}

impl NullServiceBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServiceBus for NullServiceBus {
    fn resource(&self, _resource: &str) -> Option<Arc<dyn ResourceRpc>> {
        None
    }

    fn subscribe_owner_changes(&self) -> broadcast::Receiver<OwnerChange> {
        self.owner_tx.subscribe()
    }
}
