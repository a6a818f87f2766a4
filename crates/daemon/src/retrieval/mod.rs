// SPDX-License-Identifier: MIT

//! Item retrieval manager.
//!
//! Handlers that need a payload the cache does not hold submit a
//! retrieval request and block until the owning resource has delivered.
//! Requests are sharded by resource: at most one RPC is outstanding per
//! resource, different resources proceed in parallel. When a request
//! completes, still-queued requests for the same item inherit its result,
//! so late duplicates cost no extra RPC.

mod retriever;

pub use retriever::{ItemRetriever, RetrieveExecError};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use satchel_core::Id;

use crate::service_bus::{resource_from_service_name, OwnerChange, ResourceRpc, ServiceBus};

/// What a handler asks the manager to materialize.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub item_id: Id,
    pub remote_id: String,
    pub mime_type: String,
    /// Name of the owning resource.
    pub resource: String,
    /// Payload part names (without the `PLD:` prefix).
    pub parts: Vec<String>,
}

#[derive(Debug, Error, Clone)]
pub enum RetrievalError {
    #[error("{0}")]
    Failed(String),

    #[error("retrieval manager is gone")]
    Closed,
}

enum Command {
    Deliver { request: RetrievalRequest, reply: oneshot::Sender<Result<(), String>> },
    SyncCollection { resource: String, collection_id: Id },
    SyncResource { resource: String },
}

struct JobDone {
    resource: String,
    item_id: Id,
    error: Option<String>,
}

struct PendingDelivery {
    request: RetrievalRequest,
    reply: oneshot::Sender<Result<(), String>>,
}

struct CurrentJob {
    item_id: Id,
    reply: oneshot::Sender<Result<(), String>>,
}

/// Cloneable submitter handle to the manager task.
#[derive(Clone)]
pub struct RetrievalHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl RetrievalHandle {
    /// Submits a request and waits until the resource has delivered (or
    /// failed). An empty error from the resource means success.
    pub async fn request_item_delivery(
        &self,
        request: RetrievalRequest,
    ) -> Result<(), RetrievalError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Deliver { request, reply: reply_tx })
            .map_err(|_| RetrievalError::Closed)?;
        match reply_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(RetrievalError::Failed(message)),
            Err(_) => Err(RetrievalError::Closed),
        }
    }

    /// Fire-and-forget collection synchronization.
    pub fn sync_collection(&self, resource: &str, collection_id: Id) {
        let _ = self.tx.send(Command::SyncCollection {
            resource: resource.to_string(),
            collection_id,
        });
    }

    /// Fire-and-forget whole-resource synchronization.
    pub fn sync_resource(&self, resource: &str) {
        let _ = self.tx.send(Command::SyncResource { resource: resource.to_string() });
    }
}

/// The manager task state.
pub struct ItemRetrievalManager {
    bus: Arc<dyn ServiceBus>,
    rx: mpsc::UnboundedReceiver<Command>,
    owner_rx: broadcast::Receiver<OwnerChange>,
    job_tx: mpsc::UnboundedSender<JobDone>,
    job_rx: mpsc::UnboundedReceiver<JobDone>,
    /// Queued requests per resource.
    pending: HashMap<String, VecDeque<PendingDelivery>>,
    /// The single outstanding RPC per resource.
    current: HashMap<String, CurrentJob>,
    /// Cached typed stubs, evicted when the endpoint loses its owner.
    stubs: HashMap<String, Arc<dyn ResourceRpc>>,
}

impl ItemRetrievalManager {
    /// Spawns the manager on its own task and returns the submitter
    /// handle.
    pub fn spawn(bus: Arc<dyn ServiceBus>) -> RetrievalHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let owner_rx = bus.subscribe_owner_changes();
        let manager = Self {
            bus,
            rx,
            owner_rx,
            job_tx,
            job_rx,
            pending: HashMap::new(),
            current: HashMap::new(),
            stubs: HashMap::new(),
        };
        tokio::spawn(manager.run());
        RetrievalHandle { tx }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(Command::Deliver { request, reply }) => {
                            debug!(
                                item = request.item_id,
                                resource = %request.resource,
                                "queueing retrieval request"
                            );
                            self.pending
                                .entry(request.resource.clone())
                                .or_default()
                                .push_back(PendingDelivery { request, reply });
                            self.process_queues();
                        }
                        Some(Command::SyncCollection { resource, collection_id }) => {
                            if let Some(stub) = self.stub_for(&resource) {
                                tokio::spawn(async move {
                                    if let Err(e) = stub.synchronize_collection(collection_id).await {
                                        warn!("collection sync failed: {e}");
                                    }
                                });
                            }
                        }
                        Some(Command::SyncResource { resource }) => {
                            if let Some(stub) = self.stub_for(&resource) {
                                tokio::spawn(async move {
                                    if let Err(e) = stub.synchronize().await {
                                        warn!("resource sync failed: {e}");
                                    }
                                });
                            }
                        }
                        None => return,
                    }
                }
                Some(done) = self.job_rx.recv() => {
                    self.finish_job(done);
                    self.process_queues();
                }
                change = self.owner_rx.recv() => {
                    if let Ok(change) = change {
                        self.owner_changed(change);
                        self.process_queues();
                    }
                }
            }
        }
    }

    /// Dispatches the front request of every idle resource queue.
    fn process_queues(&mut self) {
        let idle: Vec<String> = self
            .pending
            .iter()
            .filter(|(resource, queue)| {
                !queue.is_empty() && !self.current.contains_key(*resource)
            })
            .map(|(resource, _)| resource.clone())
            .collect();

        for resource in idle {
            let Some(delivery) = self.pending.get_mut(&resource).and_then(VecDeque::pop_front)
            else {
                continue;
            };
            let PendingDelivery { request, reply } = delivery;

            let Some(stub) = self.stub_for(&resource) else {
                let _ = reply.send(Err(format!("resource {resource} is not available")));
                continue;
            };

            self.current
                .insert(resource.clone(), CurrentJob { item_id: request.item_id, reply });
            let job_tx = self.job_tx.clone();
            tokio::spawn(async move {
                let result = stub
                    .request_item_delivery(
                        request.item_id,
                        &request.remote_id,
                        &request.mime_type,
                        &request.parts,
                    )
                    .await;
                let _ = job_tx.send(JobDone {
                    resource: request.resource,
                    item_id: request.item_id,
                    error: result.err().map(|e| e.to_string()),
                });
            });
        }

        self.pending.retain(|_, queue| !queue.is_empty());
    }

    /// Completes the outstanding job and every queued request for the
    /// same item on that resource (completion-time coalescing).
    fn finish_job(&mut self, done: JobDone) {
        let Some(job) = self.current.get(&done.resource) else {
            // The job was already failed by an owner change.
            return;
        };
        if job.item_id != done.item_id {
            return;
        }
        if let Some(job) = self.current.remove(&done.resource) {
            let result = match &done.error {
                Some(message) => Err(message.clone()),
                None => Ok(()),
            };
            debug!(item = done.item_id, resource = %done.resource, ok = done.error.is_none(),
                "retrieval request processed");
            let _ = job.reply.send(result);
        }

        if let Some(queue) = self.pending.get_mut(&done.resource) {
            let mut remaining = VecDeque::with_capacity(queue.len());
            for delivery in queue.drain(..) {
                if delivery.request.item_id == done.item_id {
                    debug!(item = done.item_id, "coalescing duplicate retrieval request");
                    let result = match &done.error {
                        Some(message) => Err(message.clone()),
                        None => Ok(()),
                    };
                    let _ = delivery.reply.send(result);
                } else {
                    remaining.push_back(delivery);
                }
            }
            *queue = remaining;
        }
    }

    /// A lost endpoint owner evicts the cached stub and fails the
    /// in-flight job so its waiters do not hang.
    fn owner_changed(&mut self, change: OwnerChange) {
        if !change.lost {
            return;
        }
        let Some(resource) = resource_from_service_name(&change.service) else {
            return;
        };
        debug!(resource, "lost connection to resource, discarding cached stub");
        self.stubs.remove(resource);
        if let Some(job) = self.current.remove(resource) {
            let _ = job.reply.send(Err(format!("resource {resource} vanished")));
        }
    }

    fn stub_for(&mut self, resource: &str) -> Option<Arc<dyn ResourceRpc>> {
        if let Some(stub) = self.stubs.get(resource) {
            return Some(Arc::clone(stub));
        }
        let stub = self.bus.resource(resource)?;
        self.stubs.insert(resource.to_string(), Arc::clone(&stub));
        Some(stub)
    }
}

#[cfg(test)]
#[path = "retrieval_tests.rs"]
mod tests;
