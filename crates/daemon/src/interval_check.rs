// SPDX-License-Identifier: MIT

//! Interval checker.
//!
//! Collections whose effective cache policy configures a check interval
//! get a periodic synchronization request dispatched to their resource
//! through the retrieval manager.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use satchel_core::Id;
use satchel_storage::{DataStore, StorageError};

use crate::cache_cleaner::effective_cache_policy;
use crate::retrieval::RetrievalHandle;

/// How often collection check intervals are evaluated.
pub const TICK: Duration = Duration::from_secs(60);

pub struct IntervalCheck {
    db: DataStore,
    retrieval: RetrievalHandle,
    last_checked: HashMap<Id, Instant>,
}

impl IntervalCheck {
    pub fn new(db: DataStore, retrieval: RetrievalHandle) -> Self {
        Self { db, retrieval, last_checked: HashMap::new() }
    }

    /// Spawns the checker loop until shutdown.
    pub fn spawn(mut self, shutdown: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep() {
                            warn!("interval check failed: {e}");
                        }
                    }
                    _ = shutdown.cancelled() => return,
                }
            }
        });
    }

    /// Requests synchronization for every collection whose interval has
    /// elapsed.
    pub fn sweep(&mut self) -> Result<usize, StorageError> {
        let now = Instant::now();
        let mut requested = 0;
        for collection in self.db.collections_all()? {
            if collection.is_virtual || !collection.enabled {
                continue;
            }
            let policy = effective_cache_policy(&self.db, &collection)?;
            if policy.check_interval <= 0 {
                continue;
            }
            let due = self
                .last_checked
                .get(&collection.id)
                .map(|last| {
                    now.duration_since(*last)
                        >= Duration::from_secs(policy.check_interval as u64 * 60)
                })
                .unwrap_or(true);
            if !due {
                continue;
            }
            let resource = self.db.resource_name_of_collection(collection.id)?;
            // A resource root triggers a whole-resource sync as well.
            if collection.parent_id.is_none() {
                self.retrieval.sync_resource(&resource);
            }
            self.retrieval.sync_collection(&resource, collection.id);
            self.last_checked.insert(collection.id, now);
            requested += 1;
        }
        Ok(requested)
    }
}
