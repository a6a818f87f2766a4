// SPDX-License-Identifier: MIT

use tempfile::TempDir;

use satchel_core::{CachePolicy, Collection};
use satchel_storage::{DataStore, NotificationBus};

use super::*;

fn test_db(dir: &TempDir) -> DataStore {
    DataStore::open_in_memory("helper-tests", dir.path(), NotificationBus::new()).unwrap()
}

fn make_collection(db: &mut DataStore, resource_id: i64, parent: Option<i64>, name: &str) -> Collection {
    let mut col = Collection {
        id: 0,
        parent_id: parent,
        resource_id,
        name: name.to_string(),
        remote_id: String::new(),
        remote_revision: String::new(),
        is_virtual: false,
        enabled: true,
        sync_pref: Default::default(),
        display_pref: Default::default(),
        index_pref: Default::default(),
        query_string: String::new(),
        query_attributes: String::new(),
        query_collections: String::new(),
        query_language: String::new(),
        cache_policy: CachePolicy::default(),
    };
    db.append_collection(&mut col).unwrap();
    col
}

#[test]
fn cache_policy_round_trips_through_fragment() {
    let policy = CachePolicy {
        inherit: false,
        check_interval: 5,
        cache_timeout: 60,
        sync_on_demand: true,
        local_parts: vec!["ENVELOPE".to_string(), "HEAD".to_string()],
    };
    let fragment = cache_policy_fragment(&policy);
    // The fragment has a `CACHEPOLICY ` prefix followed by the value list.
    let value = fragment.strip_prefix("CACHEPOLICY ").unwrap();

    let mut parsed = CachePolicy::default();
    parse_cache_policy(value.as_bytes(), &mut parsed).unwrap();
    assert_eq!(parsed, policy);
}

#[test]
fn cache_policy_rejects_dangling_key() {
    let mut policy = CachePolicy::default();
    let err = parse_cache_policy(b"(INHERIT)", &mut policy).unwrap_err();
    assert!(matches!(err, HandlerError::Protocol(_)));
}

#[test]
fn collection_resolution_by_id_and_path() {
    let dir = TempDir::new().unwrap();
    let mut db = test_db(&dir);
    let res = db.create_resource("res1", false).unwrap();
    let root = make_collection(&mut db, res.id, None, "root");
    let sub = make_collection(&mut db, res.id, Some(root.id), "sub");

    let by_id = collection_from_id_or_path(&db, &sub.id.to_string()).unwrap();
    assert_eq!(by_id.id, sub.id);

    let by_path = collection_from_id_or_path(&db, "root/sub").unwrap();
    assert_eq!(by_path.id, sub.id);

    assert!(collection_from_id_or_path(&db, "root/missing").is_err());
    assert!(collection_from_id_or_path(&db, "99999").is_err());
}

#[test]
fn collection_line_contains_core_attributes() {
    let dir = TempDir::new().unwrap();
    let mut db = test_db(&dir);
    let res = db.create_resource("res1", false).unwrap();
    let mut col = make_collection(&mut db, res.id, None, "inbox");
    col.query_string = "subject:foo".into();
    db.update_collection(&col, Default::default()).unwrap();

    let line = collection_line(&db, &col, false).unwrap();
    assert!(line.starts_with(&format!("{} 0 (", col.id)));
    assert!(line.contains("NAME \"inbox\""));
    assert!(line.contains("RESOURCE \"res1\""));
    assert!(line.contains("PERSISTENTSEARCH"));
    assert!(line.contains("CACHEPOLICY (INHERIT true"));
    assert!(line.contains("ENABLED TRUE"));
    assert!(line.ends_with(')'));
}
