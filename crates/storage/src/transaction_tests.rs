// SPDX-License-Identifier: MIT

use tempfile::TempDir;

use crate::bus::NotificationBus;
use crate::datastore::DataStore;

use super::*;

fn test_store(dir: &TempDir) -> DataStore {
    DataStore::open_in_memory("s", dir.path(), NotificationBus::new()).unwrap()
}

#[test]
fn dropping_uncommitted_guard_rolls_back() {
    let dir = TempDir::new().unwrap();
    let mut db = test_store(&dir);

    {
        let mut txn = Transaction::begin(&mut db).unwrap();
        txn.store().create_resource("res1", false).unwrap();
        // No commit: the guard's drop must roll back.
    }

    assert!(!db.in_transaction());
    assert!(db.resource_by_name("res1").unwrap().is_none());
}

#[test]
fn committed_guard_persists_writes() {
    let dir = TempDir::new().unwrap();
    let mut db = test_store(&dir);

    let mut txn = Transaction::begin(&mut db).unwrap();
    txn.store().create_resource("res1", false).unwrap();
    txn.commit().unwrap();

    assert!(db.resource_by_name("res1").unwrap().is_some());
}

#[test]
fn nested_guards_roll_back_together() {
    let dir = TempDir::new().unwrap();
    let mut db = test_store(&dir);

    db.begin_transaction().unwrap();
    {
        let mut inner = Transaction::begin(&mut db).unwrap();
        inner.store().create_resource("res1", false).unwrap();
        // Inner guard dropped without commit: stack is doomed.
    }
    assert!(db.commit_transaction().is_err());
    assert!(db.resource_by_name("res1").unwrap().is_none());
}
