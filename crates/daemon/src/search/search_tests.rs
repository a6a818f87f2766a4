// SPDX-License-Identifier: MIT

//! Search engine tests against a fake indexer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc;

use satchel_core::{CachePolicy, Collection, Tristate};
use satchel_storage::{DataStore, NotificationBus};

use super::*;

struct FakeIndexer {
    valid: bool,
    searches: Mutex<Vec<String>>,
    closed: Mutex<Vec<String>>,
    one_shot_hits: Vec<String>,
    counter: AtomicUsize,
}

impl FakeIndexer {
    fn new(valid: bool) -> Arc<Self> {
        Arc::new(Self {
            valid,
            searches: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            one_shot_hits: vec!["3".to_string(), "item/5".to_string()],
            counter: AtomicUsize::new(0),
        })
    }
}

impl Indexer for FakeIndexer {
    fn open_session(&self) -> Result<(), IndexerError> {
        if self.valid {
            Ok(())
        } else {
            Err(IndexerError::Unavailable("no session".into()))
        }
    }

    fn new_search(&self, query: &str) -> Result<String, IndexerError> {
        let handle = format!("search-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        self.searches.lock().push(query.to_string());
        Ok(handle)
    }

    fn close_search(&self, handle: &str) {
        self.closed.lock().push(handle.to_string());
    }

    fn search_once(&self, _query: &str) -> Result<Vec<String>, IndexerError> {
        Ok(self.one_shot_hits.clone())
    }
}

struct Fixture {
    dir: TempDir,
    bus: NotificationBus,
}

impl Fixture {
    fn new() -> Self {
        Self { dir: TempDir::new().unwrap(), bus: NotificationBus::new() }
    }

    fn open_db(&self, session: &str) -> DataStore {
        DataStore::open(
            &self.dir.path().join("satchel.db"),
            session,
            self.dir.path(),
            self.bus.clone(),
        )
        .unwrap()
    }
}

fn search_collection(db: &mut DataStore, name: &str, language: &str) -> Collection {
    let mut col = Collection {
        id: 0,
        parent_id: Some(satchel_core::SEARCH_ROOT_COLLECTION_ID),
        resource_id: satchel_core::SEARCH_RESOURCE_ID,
        name: name.to_string(),
        remote_id: "subject:foo".into(),
        remote_revision: String::new(),
        is_virtual: true,
        enabled: true,
        sync_pref: Tristate::Default,
        display_pref: Tristate::Default,
        index_pref: Tristate::Default,
        query_string: "subject:foo".into(),
        query_attributes: String::new(),
        query_collections: String::new(),
        query_language: language.to_string(),
        cache_policy: CachePolicy::default(),
    };
    db.append_collection(&mut col).unwrap();
    col
}

fn make_item(db: &mut DataStore) -> satchel_core::PimItem {
    let res = db.create_resource("res1", false).unwrap();
    let mut col = Collection {
        id: 0,
        parent_id: None,
        resource_id: res.id,
        name: "inbox".into(),
        remote_id: String::new(),
        remote_revision: String::new(),
        is_virtual: false,
        enabled: true,
        sync_pref: Tristate::Default,
        display_pref: Tristate::Default,
        index_pref: Tristate::Default,
        query_string: String::new(),
        query_attributes: String::new(),
        query_collections: String::new(),
        query_language: String::new(),
        cache_policy: CachePolicy::default(),
    };
    db.append_collection(&mut col).unwrap();
    let mime = db.mime_type_find_or_create("message/rfc822").unwrap();
    let mut item = satchel_core::PimItem {
        id: 0,
        rev: 0,
        remote_id: "r1".into(),
        gid: String::new(),
        collection_id: col.id,
        mime_type_id: mime.id,
        datetime: chrono::Utc::now(),
        atime: chrono::Utc::now(),
        size: 0,
        dirty: false,
        hidden: false,
    };
    db.append_item(&mut item).unwrap();
    item
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn hits_added_materialize_membership() {
    let fx = Fixture::new();
    let mut db = fx.open_db("setup");
    let item = make_item(&mut db);
    let col = search_collection(&mut db, "mysearch", "XESAM");

    let indexer = FakeIndexer::new(true);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let engine = IndexerSearchEngine::new(
        "XESAM",
        Arc::clone(&indexer) as Arc<dyn Indexer>,
        events_rx,
        fx.open_db("engine"),
    );
    engine.add_search(&col);
    assert_eq!(indexer.searches.lock().as_slice(), ["subject:foo"]);

    events_tx
        .send(IndexerEvent::HitsAdded {
            search: "search-0".into(),
            uris: vec![item.id.to_string()],
        })
        .unwrap();

    let check_db = fx.open_db("check");
    let col_id = col.id;
    wait_for(|| {
        check_db.virtual_collection_items(col_id).map(|v| v.contains(&item.id)).unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn hits_removed_drop_membership() {
    let fx = Fixture::new();
    let mut db = fx.open_db("setup");
    let item = make_item(&mut db);
    let col = search_collection(&mut db, "mysearch", "XESAM");
    db.link_virtual_item(col.id, item.id).unwrap();

    let indexer = FakeIndexer::new(true);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let engine = IndexerSearchEngine::new(
        "XESAM",
        Arc::clone(&indexer) as Arc<dyn Indexer>,
        events_rx,
        fx.open_db("engine"),
    );
    engine.add_search(&col);

    events_tx
        .send(IndexerEvent::HitsRemoved {
            search: "search-0".into(),
            uris: vec![item.id.to_string()],
        })
        .unwrap();

    let check_db = fx.open_db("check");
    let col_id = col.id;
    wait_for(|| {
        check_db.virtual_collection_items(col_id).map(|v| v.is_empty()).unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn invalid_engine_skips_add_search_silently() {
    let fx = Fixture::new();
    let mut db = fx.open_db("setup");
    let col = search_collection(&mut db, "mysearch", "XESAM");

    let indexer = FakeIndexer::new(false);
    let (_events_tx, events_rx) = mpsc::unbounded_channel();
    let engine = IndexerSearchEngine::new(
        "XESAM",
        Arc::clone(&indexer) as Arc<dyn Indexer>,
        events_rx,
        fx.open_db("engine"),
    );
    // Not fatal, just skipped.
    engine.add_search(&col);
    assert!(indexer.searches.lock().is_empty());
}

#[tokio::test]
async fn engine_ignores_foreign_query_language() {
    let fx = Fixture::new();
    let mut db = fx.open_db("setup");
    let col = search_collection(&mut db, "mysearch", "SPARQL");

    let indexer = FakeIndexer::new(true);
    let (_events_tx, events_rx) = mpsc::unbounded_channel();
    let engine = IndexerSearchEngine::new(
        "XESAM",
        Arc::clone(&indexer) as Arc<dyn Indexer>,
        events_rx,
        fx.open_db("engine"),
    );
    engine.add_search(&col);
    assert!(indexer.searches.lock().is_empty());
}

#[tokio::test]
async fn remove_search_closes_indexer_handle() {
    let fx = Fixture::new();
    let mut db = fx.open_db("setup");
    let col = search_collection(&mut db, "mysearch", "XESAM");

    let indexer = FakeIndexer::new(true);
    let (_events_tx, events_rx) = mpsc::unbounded_channel();
    let engine = IndexerSearchEngine::new(
        "XESAM",
        Arc::clone(&indexer) as Arc<dyn Indexer>,
        events_rx,
        fx.open_db("engine"),
    );
    engine.add_search(&col);
    engine.remove_search(col.id);
    assert_eq!(indexer.closed.lock().as_slice(), ["search-0"]);

    // Removing twice is a no-op.
    engine.remove_search(col.id);
    assert_eq!(indexer.closed.lock().len(), 1);
}

#[tokio::test]
async fn one_shot_resolves_uris_to_item_ids() {
    let fx = Fixture::new();
    let indexer = FakeIndexer::new(true);
    let (_events_tx, events_rx) = mpsc::unbounded_channel();
    let engine = IndexerSearchEngine::new(
        "XESAM",
        Arc::clone(&indexer) as Arc<dyn Indexer>,
        events_rx,
        fx.open_db("engine"),
    );

    let ids = engine.one_shot("subject:foo").unwrap();
    assert_eq!(ids, vec![3, 5]);
}

#[tokio::test]
async fn manager_routes_by_language_and_reloads() {
    let fx = Fixture::new();
    let mut db = fx.open_db("setup");
    let col = search_collection(&mut db, "mysearch", "XESAM");
    let _plain = search_collection(&mut db, "agentsearch", "AGENT");

    let indexer = FakeIndexer::new(true);
    let (_events_tx, events_rx) = mpsc::unbounded_channel();
    let manager = SearchManager::new(vec![
        Box::new(AgentSearchEngine),
        Box::new(IndexerSearchEngine::new(
            "XESAM",
            Arc::clone(&indexer) as Arc<dyn Indexer>,
            events_rx,
            fx.open_db("engine"),
        )),
    ]);

    manager.reload_searches(&db);
    // Only the XESAM search landed at the indexer.
    assert_eq!(indexer.searches.lock().len(), 1);

    manager.remove_search(col.id);
    assert_eq!(indexer.closed.lock().len(), 1);
}
