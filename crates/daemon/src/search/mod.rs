// SPDX-License-Identifier: MIT

//! Persistent-search engine.
//!
//! A persistent search is a collection whose membership is defined by a
//! stored query and maintained from indexer change events. Engines are
//! plugins selected by query language; each owns the searches whose
//! language it speaks. The indexer is an external collaborator; its
//! events resolve to item ids and flow into the virtual collection's
//! membership table, emitting item notifications against it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use satchel_core::{Collection, Id};
use satchel_storage::DataStore;

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("indexer unavailable: {0}")]
    Unavailable(String),

    #[error("search failed: {0}")]
    Failed(String),
}

/// Change events an indexer emits for a registered search handle.
#[derive(Debug, Clone)]
pub enum IndexerEvent {
    HitsAdded { search: String, uris: Vec<String> },
    HitsRemoved { search: String, uris: Vec<String> },
    HitsModified { search: String, uris: Vec<String> },
}

/// External content indexer, reached over the service bus in production.
pub trait Indexer: Send + Sync {
    /// Opens the indexer session. An engine whose session cannot be
    /// opened is invalid and silently skips `add_search` calls.
    fn open_session(&self) -> Result<(), IndexerError>;

    /// Registers a live search; returns its handle. Events reference it.
    fn new_search(&self, query: &str) -> Result<String, IndexerError>;

    fn close_search(&self, handle: &str);

    /// One-shot query: the matching URIs as of now.
    fn search_once(&self, query: &str) -> Result<Vec<String>, IndexerError>;
}

/// Capability surface of one search engine plugin.
pub trait SearchEngine: Send + Sync {
    /// Registers a persistent search. Skipped silently when the engine is
    /// invalid or the query language is not one of its own.
    fn add_search(&self, collection: &Collection);

    /// Unregisters the search owned by a deleted virtual collection.
    fn remove_search(&self, collection_id: Id);

    /// Query languages this engine owns.
    fn languages(&self) -> Vec<String>;

    /// One-shot query evaluation, for engines that support it.
    fn one_shot(&self, _query: &str) -> Result<Vec<Id>, IndexerError> {
        Err(IndexerError::Unavailable("engine has no one-shot search".into()))
    }
}

/// An item URI as reported by the indexer. The canonical form is just
/// the numeric item id.
fn uri_to_item_id(uri: &str) -> Option<Id> {
    uri.rsplit('/').next().and_then(|tail| tail.parse().ok())
}

struct SearchMaps {
    search_to_collection: HashMap<String, Id>,
    collection_to_search: HashMap<Id, String>,
}

/// Engine driving a live [`Indexer`] session.
pub struct IndexerSearchEngine {
    language: String,
    indexer: Arc<dyn Indexer>,
    valid: bool,
    maps: Arc<Mutex<SearchMaps>>,
}

impl IndexerSearchEngine {
    /// Opens the indexer session and starts the event pump. `db` is the
    /// engine's own database session used to apply hits.
    pub fn new(
        language: &str,
        indexer: Arc<dyn Indexer>,
        events: mpsc::UnboundedReceiver<IndexerEvent>,
        db: DataStore,
    ) -> Self {
        let valid = match indexer.open_session() {
            Ok(()) => true,
            Err(e) => {
                warn!(language, "no valid indexer session: {e}");
                false
            }
        };
        let maps = Arc::new(Mutex::new(SearchMaps {
            search_to_collection: HashMap::new(),
            collection_to_search: HashMap::new(),
        }));
        if valid {
            tokio::spawn(pump_events(events, Arc::clone(&maps), db));
        }
        Self { language: language.to_string(), indexer, valid, maps }
    }
}

async fn pump_events(
    mut events: mpsc::UnboundedReceiver<IndexerEvent>,
    maps: Arc<Mutex<SearchMaps>>,
    mut db: DataStore,
) {
    while let Some(event) = events.recv().await {
        match event {
            IndexerEvent::HitsAdded { search, uris } => {
                let Some(collection_id) = maps.lock().search_to_collection.get(&search).copied()
                else {
                    continue;
                };
                for uri in uris {
                    let Some(item_id) = uri_to_item_id(&uri) else {
                        debug!(uri, "unresolvable hit URI");
                        continue;
                    };
                    if let Err(e) = db.link_virtual_item(collection_id, item_id) {
                        warn!("could not apply search hit: {e}");
                    }
                }
            }
            IndexerEvent::HitsRemoved { search, uris } => {
                let Some(collection_id) = maps.lock().search_to_collection.get(&search).copied()
                else {
                    continue;
                };
                for uri in uris {
                    let Some(item_id) = uri_to_item_id(&uri) else {
                        continue;
                    };
                    if let Err(e) = db.unlink_virtual_item(collection_id, item_id) {
                        warn!("could not apply search hit removal: {e}");
                    }
                }
            }
            IndexerEvent::HitsModified { search, uris } => {
                debug!(search, count = uris.len(), "hits modified");
            }
        }
    }
}

impl SearchEngine for IndexerSearchEngine {
    fn add_search(&self, collection: &Collection) {
        if !self.valid
            || !collection.query_language.eq_ignore_ascii_case(&self.language)
            || collection.query_string.is_empty()
        {
            return;
        }
        let handle = match self.indexer.new_search(&collection.query_string) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(collection = collection.id, "could not register search: {e}");
                return;
            }
        };
        debug!(collection = collection.id, handle, "registered persistent search");
        let mut maps = self.maps.lock();
        maps.search_to_collection.insert(handle.clone(), collection.id);
        maps.collection_to_search.insert(collection.id, handle);
    }

    fn remove_search(&self, collection_id: Id) {
        let handle = {
            let mut maps = self.maps.lock();
            let Some(handle) = maps.collection_to_search.remove(&collection_id) else {
                return;
            };
            maps.search_to_collection.remove(&handle);
            handle
        };
        self.indexer.close_search(&handle);
    }

    fn languages(&self) -> Vec<String> {
        vec![self.language.clone()]
    }

    fn one_shot(&self, query: &str) -> Result<Vec<Id>, IndexerError> {
        if !self.valid {
            return Err(IndexerError::Unavailable("engine is invalid".into()));
        }
        let uris = self.indexer.search_once(query)?;
        Ok(uris.iter().filter_map(|uri| uri_to_item_id(uri)).collect())
    }
}

/// Indexer used when no real indexer transport is configured. Sessions
/// never open, so engines built on it are invalid and skip registration.
pub struct NullIndexer;

impl Indexer for NullIndexer {
    fn open_session(&self) -> Result<(), IndexerError> {
        Err(IndexerError::Unavailable("no indexer configured".into()))
    }

    fn new_search(&self, _query: &str) -> Result<String, IndexerError> {
        Err(IndexerError::Unavailable("no indexer configured".into()))
    }

    fn close_search(&self, _handle: &str) {}

    fn search_once(&self, _query: &str) -> Result<Vec<String>, IndexerError> {
        Err(IndexerError::Unavailable("no indexer configured".into()))
    }
}

/// Engine for agent-fed searches: resources compute the result set
/// themselves and push it with SEARCH_RESULT, so registration is a
/// bookkeeping no-op here.
pub struct AgentSearchEngine;

impl SearchEngine for AgentSearchEngine {
    fn add_search(&self, collection: &Collection) {
        debug!(collection = collection.id, "agent search registered");
    }

    fn remove_search(&self, _collection_id: Id) {}

    fn languages(&self) -> Vec<String> {
        vec!["AGENT".to_string()]
    }
}

/// Routes persistent searches to the engine owning their query language.
pub struct SearchManager {
    engines: Vec<Box<dyn SearchEngine>>,
}

impl SearchManager {
    pub fn new(engines: Vec<Box<dyn SearchEngine>>) -> Self {
        Self { engines }
    }

    /// Registers a search with every engine speaking its language.
    /// Engines that do not own the language (or are invalid) skip it;
    /// that is not an error.
    pub fn add_search(&self, collection: &Collection) {
        for engine in &self.engines {
            engine.add_search(collection);
        }
    }

    pub fn remove_search(&self, collection_id: Id) {
        for engine in &self.engines {
            engine.remove_search(collection_id);
        }
    }

    /// One-shot query: the first engine that can answer wins.
    pub fn one_shot(&self, query: &str) -> Result<Vec<Id>, IndexerError> {
        let mut last_error = IndexerError::Unavailable("no search engine configured".into());
        for engine in &self.engines {
            match engine.one_shot(query) {
                Ok(ids) => return Ok(ids),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    /// Re-registers every stored persistent search, called at startup.
    pub fn reload_searches(&self, db: &DataStore) {
        let collections = match db.collections_by_resource(satchel_core::SEARCH_RESOURCE_ID) {
            Ok(collections) => collections,
            Err(e) => {
                warn!("could not load persistent searches: {e}");
                return;
            }
        };
        for collection in collections {
            if collection.is_persistent_search() {
                self.add_search(&collection);
            }
        }
    }
}

#[cfg(test)]
#[path = "search_tests.rs"]
mod tests;
