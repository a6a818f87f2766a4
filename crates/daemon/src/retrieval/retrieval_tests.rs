// SPDX-License-Identifier: MIT

//! Retrieval manager tests: queueing, coalescing, failure fan-out and
//! stub eviction, driven through a fake service bus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use satchel_core::Id;

use super::*;
use crate::service_bus::{resource_service_name, RpcError};

/// Resource stub with controllable latency and failure.
struct FakeResource {
    deliveries: AtomicUsize,
    syncs: AtomicUsize,
    delay: Duration,
    fail_with: Option<String>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeResource {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            deliveries: AtomicUsize::new(0),
            syncs: AtomicUsize::new(0),
            delay,
            fail_with: None,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            deliveries: AtomicUsize::new(0),
            syncs: AtomicUsize::new(0),
            delay: Duration::from_millis(0),
            fail_with: Some(message.to_string()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ResourceRpc for FakeResource {
    async fn request_item_delivery(
        &self,
        _item_id: Id,
        _remote_id: &str,
        _mime_type: &str,
        _parts: &[String],
    ) -> Result<(), RpcError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(message) => Err(RpcError::CallFailed(message.clone())),
            None => Ok(()),
        }
    }

    async fn synchronize_collection(&self, _collection_id: Id) -> Result<(), RpcError> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn synchronize(&self) -> Result<(), RpcError> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeServiceBus {
    resources: Mutex<HashMap<String, Arc<FakeResource>>>,
    owner_tx: broadcast::Sender<OwnerChange>,
}

impl FakeServiceBus {
    fn new() -> Arc<Self> {
        let (owner_tx, _) = broadcast::channel(16);
        Arc::new(Self { resources: Mutex::new(HashMap::new()), owner_tx })
    }

    fn add(&self, name: &str, resource: Arc<FakeResource>) {
        self.resources.lock().insert(name.to_string(), resource);
    }

    fn drop_owner(&self, name: &str) {
        self.resources.lock().remove(name);
        let _ = self
            .owner_tx
            .send(OwnerChange { service: resource_service_name(name), lost: true });
    }
}

impl ServiceBus for FakeServiceBus {
    fn resource(&self, resource: &str) -> Option<Arc<dyn ResourceRpc>> {
        self.resources.lock().get(resource).cloned().map(|r| r as Arc<dyn ResourceRpc>)
    }

    fn subscribe_owner_changes(&self) -> broadcast::Receiver<OwnerChange> {
        self.owner_tx.subscribe()
    }
}

fn request(item: Id, resource: &str) -> RetrievalRequest {
    RetrievalRequest {
        item_id: item,
        remote_id: format!("r{item}"),
        mime_type: "message/rfc822".to_string(),
        resource: resource.to_string(),
        parts: vec!["RFC822".to_string()],
    }
}

#[tokio::test]
async fn delivery_round_trip() {
    let bus = FakeServiceBus::new();
    let resource = FakeResource::new(Duration::from_millis(1));
    bus.add("res1", Arc::clone(&resource));
    let handle = ItemRetrievalManager::spawn(bus);

    handle.request_item_delivery(request(1, "res1")).await.unwrap();
    assert_eq!(resource.deliveries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_resource_fails_fast() {
    let bus = FakeServiceBus::new();
    let handle = ItemRetrievalManager::spawn(bus);

    let err = handle.request_item_delivery(request(1, "ghost")).await.unwrap_err();
    let RetrievalError::Failed(message) = err else { panic!("wrong error kind") };
    assert!(message.contains("ghost"));
}

#[tokio::test]
async fn duplicate_requests_coalesce_on_completion() {
    let bus = FakeServiceBus::new();
    let resource = FakeResource::new(Duration::from_millis(50));
    bus.add("res1", Arc::clone(&resource));
    let handle = ItemRetrievalManager::spawn(bus);

    // Both waiters ask for the same item while the first RPC is in
    // flight; the second inherits its completion.
    let first = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.request_item_delivery(request(7, "res1")).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.request_item_delivery(request(7, "res1")).await })
    };

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(resource.deliveries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dispatch_is_serial_per_resource() {
    let bus = FakeServiceBus::new();
    let resource = FakeResource::new(Duration::from_millis(20));
    bus.add("res1", Arc::clone(&resource));
    let handle = ItemRetrievalManager::spawn(bus);

    let mut waiters = Vec::new();
    for item in 1..=3 {
        let handle = handle.clone();
        waiters.push(tokio::spawn(async move {
            handle.request_item_delivery(request(item, "res1")).await
        }));
    }
    for waiter in waiters {
        waiter.await.unwrap().unwrap();
    }
    assert_eq!(resource.deliveries.load(Ordering::SeqCst), 3);
    assert_eq!(resource.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn different_resources_proceed_in_parallel() {
    let bus = FakeServiceBus::new();
    let res1 = FakeResource::new(Duration::from_millis(30));
    let res2 = FakeResource::new(Duration::from_millis(30));
    bus.add("res1", Arc::clone(&res1));
    bus.add("res2", Arc::clone(&res2));
    let handle = ItemRetrievalManager::spawn(bus);

    let started = std::time::Instant::now();
    let a = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.request_item_delivery(request(1, "res1")).await })
    };
    let b = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.request_item_delivery(request(2, "res2")).await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    // Serial execution would need at least 60ms.
    assert!(started.elapsed() < Duration::from_millis(55));
}

#[tokio::test]
async fn rpc_error_reaches_all_coalesced_waiters() {
    let bus = FakeServiceBus::new();
    let resource = FakeResource::failing("mailbox is on fire");
    bus.add("res1", Arc::clone(&resource));
    let handle = ItemRetrievalManager::spawn(bus);

    let err = handle.request_item_delivery(request(3, "res1")).await.unwrap_err();
    let RetrievalError::Failed(message) = err else { panic!("wrong error kind") };
    assert!(message.contains("mailbox is on fire"));
}

#[tokio::test]
async fn owner_loss_fails_in_flight_waiters() {
    let bus = FakeServiceBus::new();
    let resource = FakeResource::new(Duration::from_secs(30));
    bus.add("res1", Arc::clone(&resource));
    let handle = ItemRetrievalManager::spawn(Arc::clone(&bus) as Arc<dyn ServiceBus>);

    let waiter = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.request_item_delivery(request(9, "res1")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    bus.drop_owner("res1");

    let err = waiter.await.unwrap().unwrap_err();
    let RetrievalError::Failed(message) = err else { panic!("wrong error kind") };
    assert!(message.contains("vanished"));
}

#[tokio::test]
async fn sync_requests_are_fire_and_forget() {
    let bus = FakeServiceBus::new();
    let resource = FakeResource::new(Duration::from_millis(1));
    bus.add("res1", Arc::clone(&resource));
    let handle = ItemRetrievalManager::spawn(bus);

    handle.sync_collection("res1", 4);
    handle.sync_resource("res1");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(resource.syncs.load(Ordering::SeqCst), 2);
}
