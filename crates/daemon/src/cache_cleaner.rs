// SPDX-License-Identifier: MIT

//! Payload cache cleaner.
//!
//! Periodically evicts cached payload parts whose collection's effective
//! cache policy has timed them out. Parts named in the policy's local
//! part list are never evicted.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use satchel_core::{CachePolicy, Collection};
use satchel_storage::{DataStore, StorageError};

/// How often the cleaner wakes up.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct CacheCleaner {
    db: DataStore,
}

impl CacheCleaner {
    pub fn new(db: DataStore) -> Self {
        Self { db }
    }

    /// Spawns the cleaner loop until shutdown.
    pub fn spawn(mut self, shutdown: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep() {
                            warn!("cache cleaner sweep failed: {e}");
                        }
                    }
                    _ = shutdown.cancelled() => return,
                }
            }
        });
    }

    /// One pass over all collections with an expiring cache.
    pub fn sweep(&mut self) -> Result<usize, StorageError> {
        let collections = self.db.collections_all()?;
        let mut evicted = 0;
        for collection in &collections {
            if collection.is_virtual {
                continue;
            }
            let policy = effective_cache_policy(&self.db, collection)?;
            if policy.cache_timeout < 0 {
                continue;
            }
            evicted += self.sweep_collection(collection, &policy)?;
        }
        if evicted > 0 {
            debug!(evicted, "cache cleaner evicted payload parts");
        }
        Ok(evicted)
    }

    fn sweep_collection(
        &mut self,
        collection: &Collection,
        policy: &CachePolicy,
    ) -> Result<usize, StorageError> {
        let cutoff = Utc::now() - chrono::Duration::minutes(policy.cache_timeout as i64);
        let mut evicted = 0;
        for item in self.db.items_in_collection(collection.id)? {
            if item.atime > cutoff {
                continue;
            }
            for (part_type, part) in self.db.parts_of_item(item.id)? {
                if part_type.ns != "PLD" || part.data.is_none() {
                    continue;
                }
                let fq = part_type.full_name();
                if policy.local_parts.iter().any(|p| p == &fq || p == &part_type.name) {
                    continue;
                }
                self.db.evict_part_payload(&part)?;
                evicted += 1;
            }
        }
        Ok(evicted)
    }
}

/// Resolves a collection's effective cache policy by walking the parent
/// chain until a non-inheriting policy is found; the default applies at
/// the root.
pub fn effective_cache_policy(
    db: &DataStore,
    collection: &Collection,
) -> Result<CachePolicy, StorageError> {
    if !collection.cache_policy.inherit {
        return Ok(collection.cache_policy.clone());
    }
    let mut cursor = collection.parent_id;
    while let Some(id) = cursor {
        let Some(parent) = db.collection_by_id(id)? else {
            break;
        };
        if !parent.cache_policy.inherit {
            return Ok(parent.cache_policy.clone());
        }
        cursor = parent.parent_id;
    }
    Ok(CachePolicy::default())
}

#[cfg(test)]
#[path = "cache_cleaner_tests.rs"]
mod tests;
