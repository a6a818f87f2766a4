// SPDX-License-Identifier: MIT

//! Janitor sweep tests over a real store and payload directory.

use tempfile::TempDir;

use satchel_core::{CachePolicy, Collection, PimItem, Tristate};
use satchel_storage::{DataStore, NotificationBus, EXTERNAL_PAYLOAD_THRESHOLD};

use super::*;

struct Fixture {
    dir: TempDir,
    bus: NotificationBus,
}

impl Fixture {
    fn new() -> Self {
        Self { dir: TempDir::new().unwrap(), bus: NotificationBus::new() }
    }

    fn external_dir(&self) -> PathBuf {
        self.dir.path().join("file_db_data")
    }

    fn open_db(&self, session: &str) -> DataStore {
        std::fs::create_dir_all(self.external_dir()).unwrap();
        DataStore::open(
            &self.dir.path().join("satchel.db"),
            session,
            &self.external_dir(),
            self.bus.clone(),
        )
        .unwrap()
    }

    fn janitor(&self) -> (StorageJanitor, broadcast::Receiver<String>) {
        let (information, rx) = broadcast::channel(256);
        let janitor =
            StorageJanitor { db: self.open_db("janitor"), external_dir: self.external_dir(), information };
        (janitor, rx)
    }
}

fn seed_item(db: &mut DataStore) -> (Collection, PimItem) {
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
    let mut item = PimItem {
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
    (col, item)
}

fn drain(rx: &mut broadcast::Receiver<String>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(line) = rx.try_recv() {
        out.push(line);
    }
    out
}

#[tokio::test]
async fn clean_store_reports_only_progress() {
    let fx = Fixture::new();
    let mut db = fx.open_db("setup");
    seed_item(&mut db);

    let (mut janitor, mut rx) = fx.janitor();
    janitor.check();

    let findings = drain(&mut rx);
    assert!(findings.iter().any(|m| m == "Consistency check done."));
    assert!(!findings.iter().any(|m| m.contains("orphan")));
    assert!(!findings.iter().any(|m| m.contains("unreferenced")));
}

#[tokio::test]
async fn unreferenced_external_file_is_reported_and_kept() {
    let fx = Fixture::new();
    let mut db = fx.open_db("setup");
    seed_item(&mut db);
    let stray = fx.external_dir().join("zzz");
    std::fs::write(&stray, b"junk").unwrap();

    let (mut janitor, mut rx) = fx.janitor();
    janitor.check();

    let findings = drain(&mut rx);
    assert!(findings
        .iter()
        .any(|m| m.contains("Found unreferenced external file:") && m.contains("zzz")));
    // Reported, not repaired.
    assert!(stray.exists());
}

#[tokio::test]
async fn missing_external_file_is_reported() {
    let fx = Fixture::new();
    let mut db = fx.open_db("setup");
    let (_, item) = seed_item(&mut db);
    let pt = db.part_type_find_or_create("PLD", "RFC822").unwrap();
    let payload = vec![b'x'; (EXTERNAL_PAYLOAD_THRESHOLD + 1) as usize];
    let part = db.store_part_payload(item.id, &pt, payload).unwrap();
    let name = String::from_utf8(part.data.unwrap()).unwrap();
    std::fs::remove_file(fx.external_dir().join(&name)).unwrap();

    let (mut janitor, mut rx) = fx.janitor();
    janitor.check();

    let findings = drain(&mut rx);
    assert!(findings.iter().any(|m| m.contains("Missing external file:") && m.contains(&name)));
}

#[tokio::test]
async fn cross_resource_parent_is_reported() {
    let fx = Fixture::new();
    let mut db = fx.open_db("setup");
    let (col, _) = seed_item(&mut db);
    let res2 = db.create_resource("res2", false).unwrap();
    // Bypass the append-time check the way a broken sync would.
    let mut rogue = col.clone();
    rogue.id = 0;
    rogue.name = "rogue".into();
    rogue.resource_id = res2.id;
    db.append_collection(&mut rogue).unwrap();
    rogue.parent_id = Some(col.id);
    db.update_collection(&rogue, Default::default()).unwrap();

    let (mut janitor, mut rx) = fx.janitor();
    janitor.check();

    let findings = drain(&mut rx);
    assert!(findings
        .iter()
        .any(|m| m.contains("belongs to a different resource than its parent")));
}

#[tokio::test]
async fn handle_triggers_check_and_broadcasts() {
    let fx = Fixture::new();
    let mut db = fx.open_db("setup");
    seed_item(&mut db);

    let handle = StorageJanitor::spawn(fx.open_db("janitor"), fx.external_dir());
    let mut rx = handle.subscribe();
    handle.check();

    let mut seen_done = false;
    for _ in 0..200 {
        match rx.try_recv() {
            Ok(line) if line == "Consistency check done." => {
                seen_done = true;
                break;
            }
            Ok(_) => {}
            Err(_) => tokio::time::sleep(std::time::Duration::from_millis(5)).await,
        }
    }
    assert!(seen_done);
}

#[tokio::test]
async fn vacuum_reports_completion() {
    let fx = Fixture::new();
    let mut db = fx.open_db("setup");
    seed_item(&mut db);

    let (mut janitor, mut rx) = fx.janitor();
    janitor.vacuum();

    let findings = drain(&mut rx);
    assert!(findings.iter().any(|m| m == "vacuum done"));
}
