// SPDX-License-Identifier: MIT

//! Protocol tests: a full connection worker driven over an in-memory
//! socket pair, with a shared file-backed store so assertions can use a
//! second database session.

use std::sync::Arc;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;

use satchel_core::notification::{Notification, Operation};
use satchel_storage::{DataStore, NotificationBus, Subscriber, SubscriberFilter};

use super::*;
use crate::context::ServerContext;
use crate::retrieval::ItemRetrievalManager;
use crate::search::{AgentSearchEngine, SearchManager};
use crate::service_bus::NullServiceBus;

struct Harness {
    client: TestClient,
    context: Arc<ServerContext>,
    subscriber: Subscriber,
    // Keeps the state directory alive.
    _dir: TempDir,
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let external_dir = dir.path().join("file_db_data");
    std::fs::create_dir_all(&external_dir).unwrap();

    let bus = NotificationBus::new();
    let subscriber = bus.subscribe(SubscriberFilter::default());
    let retrieval = ItemRetrievalManager::spawn(Arc::new(NullServiceBus::new()));
    let search = Arc::new(SearchManager::new(vec![Box::new(AgentSearchEngine)]));
    let context = Arc::new(ServerContext::new(
        dir.path().join("satchel.db"),
        external_dir,
        bus,
        retrieval,
        search,
        CancellationToken::new(),
    ));

    let (client_io, server_io) = tokio::io::duplex(1 << 20);
    let connection = Connection::new(server_io, Arc::clone(&context)).unwrap();
    tokio::spawn(connection.run());

    let mut client = TestClient::new(client_io);
    let greeting = client.read_line().await;
    assert!(greeting.starts_with("* OK satchel server"), "greeting: {greeting}");

    Harness { client, context, subscriber, _dir: dir }
}

impl Harness {
    /// A separate database session on the same store, for assertions and
    /// fixtures.
    fn open_db(&self) -> DataStore {
        self.context.open_store("test-fixture").unwrap()
    }

    async fn login(&mut self) {
        self.client.send("1 LOGIN test-client").await;
        let line = self.client.read_line().await;
        assert!(line.starts_with("1 OK"), "login failed: {line}");
    }

    fn seed_collection(&self) -> (satchel_core::Resource, satchel_core::Collection) {
        let mut db = self.open_db();
        let res = db.create_resource("testresource", false).unwrap();
        let mut col = satchel_core::Collection {
            id: 0,
            parent_id: None,
            resource_id: res.id,
            name: "inbox".into(),
            remote_id: "inbox-rid".into(),
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
            cache_policy: Default::default(),
        };
        db.append_collection(&mut col).unwrap();
        (res, col)
    }

    fn drain_notifications(&self) {
        while self.subscriber.try_recv().is_some() {}
    }
}

/// Client side of the framed protocol, aware of embedded literals in
/// data lines.
struct TestClient {
    io: DuplexStream,
}

impl TestClient {
    fn new(io: DuplexStream) -> Self {
        Self { io }
    }

    async fn send(&mut self, line: &str) {
        self.io.write_all(line.as_bytes()).await.unwrap();
        self.io.write_all(b"\r\n").await.unwrap();
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.io.write_all(bytes).await.unwrap();
    }

    async fn read_u8(&mut self) -> u8 {
        let mut buf = [0u8; 1];
        self.io.read_exact(&mut buf).await.unwrap();
        buf[0]
    }

    /// Reads one logical response line. A trailing `{N}` announces N raw
    /// bytes that belong to the same line (FETCH payloads).
    async fn read_logical_line(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let b = self.read_u8().await;
            if b != b'\n' {
                out.push(b);
                continue;
            }
            if out.last() == Some(&b'\r') {
                out.pop();
            }
            if let Some(n) = trailing_literal_len(&out) {
                out.extend_from_slice(b"\r\n");
                for _ in 0..n {
                    let b = self.read_u8().await;
                    out.push(b);
                }
                continue;
            }
            return out;
        }
    }

    async fn read_line(&mut self) -> String {
        String::from_utf8_lossy(&self.read_logical_line().await).into_owned()
    }

    /// Reads lines until the tagged response for `tag`, returning
    /// (untagged lines, tagged line).
    async fn read_until_tagged(&mut self, tag: &str) -> (Vec<String>, String) {
        let mut untagged = Vec::new();
        let prefix = format!("{tag} ");
        loop {
            let line = self.read_line().await;
            if line.starts_with(&prefix) {
                return (untagged, line);
            }
            untagged.push(line);
        }
    }
}

fn trailing_literal_len(line: &[u8]) -> Option<usize> {
    if *line.last()? != b'}' {
        return None;
    }
    let open = line.iter().rposition(|b| *b == b'{')?;
    std::str::from_utf8(&line[open + 1..line.len() - 1]).ok()?.parse().ok()
}

#[tokio::test]
async fn login_and_capability() {
    let mut h = harness().await;
    h.login().await;

    h.client.send("2 CAPABILITY").await;
    let (untagged, tagged) = h.client.read_until_tagged("2").await;
    assert!(untagged.iter().any(|l| l.contains("CAPABILITY (PROTOCOL 1)")));
    assert!(tagged.starts_with("2 OK"));
}

#[tokio::test]
async fn unknown_verb_is_bad_and_connection_survives() {
    let mut h = harness().await;
    h.login().await;

    h.client.send("2 FROBNICATE all the things").await;
    let line = h.client.read_line().await;
    assert!(line.starts_with("2 BAD"), "{line}");

    h.client.send("3 CAPABILITY").await;
    let (_, tagged) = h.client.read_until_tagged("3").await;
    assert!(tagged.starts_with("3 OK"));
}

#[tokio::test]
async fn select_requires_authentication() {
    let mut h = harness().await;
    h.client.send("1 SELECT 1").await;
    let line = h.client.read_line().await;
    assert!(line.starts_with("1 BAD"), "{line}");
}

#[tokio::test]
async fn fetch_without_selection_requires_scope() {
    let mut h = harness().await;
    h.login().await;
    h.client.send("2 FETCH 1:* (FLAGS)").await;
    let line = h.client.read_line().await;
    assert!(line.starts_with("2 BAD"), "{line}");
}

#[tokio::test]
async fn append_then_fetch_round_trips_parts_and_flags() {
    let mut h = harness().await;
    let (_, col) = h.seed_collection();
    h.login().await;

    // Literal payload: wait for the continuation before sending bytes.
    h.client
        .send_raw(
            format!("2 APPEND {} message/rfc822 (\\Seen urgent) PLD:RFC822 {{11}}\r\n", col.id)
                .as_bytes(),
        )
        .await;
    let cont = h.client.read_line().await;
    assert!(cont.starts_with("+ "), "expected continuation, got {cont}");
    h.client.send_raw(b"hello world\r\n").await;

    let line = h.client.read_line().await;
    assert!(line.starts_with("2 OK Append completed ([UIDNEXT "), "{line}");
    let id: i64 = line
        .trim_end_matches("])")
        .rsplit(' ')
        .next()
        .unwrap()
        .parse()
        .unwrap();

    h.client.send(&format!("3 UID FETCH {id} (FLAGS FULLPAYLOAD)")).await;
    let (untagged, tagged) = h.client.read_until_tagged("3").await;
    assert!(tagged.starts_with("3 OK FETCH completed"));
    assert_eq!(untagged.len(), 1);
    let data = &untagged[0];
    assert!(data.contains(&format!("UID {id}")));
    assert!(data.contains("\\Seen"));
    assert!(data.contains("urgent"));
    assert!(data.contains("PLD:RFC822 {11}"));
    assert!(data.contains("hello world"));
}

#[tokio::test]
async fn store_flag_round_trip_restores_pre_state() {
    let mut h = harness().await;
    let (_, col) = h.seed_collection();
    h.login().await;

    h.client.send(&format!("2 APPEND {} message/rfc822 ()", col.id)).await;
    let line = h.client.read_line().await;
    assert!(line.starts_with("2 OK"), "{line}");
    let id: i64 = line.trim_end_matches("])").rsplit(' ').next().unwrap().parse().unwrap();

    h.client.send(&format!("3 UID STORE {id} +FLAGS (\\Seen)")).await;
    assert!(h.client.read_line().await.starts_with("3 OK"));
    h.client.send(&format!("4 UID STORE {id} -FLAGS (\\Seen)")).await;
    assert!(h.client.read_line().await.starts_with("4 OK"));

    h.client.send(&format!("5 UID FETCH {id} (FLAGS)")).await;
    let (untagged, _) = h.client.read_until_tagged("5").await;
    assert!(untagged[0].contains("FLAGS ()"), "{}", untagged[0]);
}

#[tokio::test]
async fn transaction_compresses_to_single_item_added() {
    let mut h = harness().await;
    let (_, col) = h.seed_collection();
    h.login().await;
    h.drain_notifications();

    h.client.send("2 BEGIN").await;
    assert!(h.client.read_line().await.starts_with("2 OK"));
    h.client.send(&format!("3 APPEND {} message/rfc822 ()", col.id)).await;
    let line = h.client.read_line().await;
    assert!(line.starts_with("3 OK"), "{line}");
    let id: i64 = line.trim_end_matches("])").rsplit(' ').next().unwrap().parse().unwrap();
    h.client.send(&format!("4 UID STORE {id} +FLAGS (\\Seen)")).await;
    assert!(h.client.read_line().await.starts_with("4 OK"));
    h.client.send(&format!("5 UID STORE {id} -FLAGS (\\Seen)")).await;
    assert!(h.client.read_line().await.starts_with("5 OK"));

    // Nothing leaves the transaction before commit.
    assert!(h.subscriber.try_recv().is_none());

    h.client.send("6 COMMIT").await;
    assert!(h.client.read_line().await.starts_with("6 OK"));

    let batch = h.subscriber.recv().await;
    let item_notifications: Vec<_> = batch
        .notifications
        .iter()
        .filter(|n| matches!(n, Notification::Item { .. }))
        .collect();
    assert_eq!(item_notifications.len(), 1, "batch: {:?}", batch.notifications);
    assert_eq!(item_notifications[0].operation(), Operation::Add);
    assert!(h.subscriber.try_recv().is_none());

    // The final flag set is empty.
    let db = h.open_db();
    assert!(db.item_flags(id).unwrap().is_empty());
}

#[tokio::test]
async fn failed_transaction_emits_nothing() {
    let mut h = harness().await;
    let (_, col) = h.seed_collection();
    h.login().await;
    h.drain_notifications();

    h.client.send("2 BEGIN").await;
    assert!(h.client.read_line().await.starts_with("2 OK"));
    h.client.send(&format!("3 APPEND {} message/rfc822 ()", col.id)).await;
    assert!(h.client.read_line().await.starts_with("3 OK"));

    // Duplicate sibling name violates the unique constraint.
    h.client.send(&format!("4 COLLECTIONCREATE sub {}", col.id)).await;
    let (_, tagged) = h.client.read_until_tagged("4").await;
    assert!(tagged.starts_with("4 OK"), "{tagged}");
    h.client.send(&format!("5 COLLECTIONCREATE sub {}", col.id)).await;
    let line = h.client.read_line().await;
    assert!(line.starts_with("5 NO"), "{line}");

    h.client.send("6 COMMIT").await;
    let line = h.client.read_line().await;
    assert!(line.starts_with("6 NO"), "{line}");

    assert!(h.subscriber.try_recv().is_none());
}

#[tokio::test]
async fn search_store_creates_virtual_collection() {
    let mut h = harness().await;
    h.login().await;

    h.client.send("2 SEARCH_STORE \"mysearch\" \"subject:foo\"").await;
    let (untagged, tagged) = h.client.read_until_tagged("2").await;
    assert!(tagged.starts_with("2 OK SEARCH_STORE completed"), "{tagged}");
    assert_eq!(untagged.len(), 1);
    assert!(untagged[0].contains("NAME \"mysearch\""), "{}", untagged[0]);

    let db = h.open_db();
    let col = db
        .collection_by_parent_and_name(Some(satchel_core::SEARCH_ROOT_COLLECTION_ID), "mysearch")
        .unwrap()
        .unwrap();
    assert_eq!(col.resource_id, satchel_core::SEARCH_RESOURCE_ID);
    assert!(col.is_virtual);
    assert_eq!(col.query_string, "subject:foo");

    // Every mime-type except directories.
    let mimes = db.collection_mime_types(col.id).unwrap();
    assert!(!mimes.is_empty());
    assert!(mimes.iter().all(|m| m.name != "inode/directory"));

    // Listable under the search root.
    h.client.send(&format!("3 LIST {} 1", satchel_core::SEARCH_ROOT_COLLECTION_ID)).await;
    let (untagged, _) = h.client.read_until_tagged("3").await;
    assert!(untagged.iter().any(|l| l.contains("NAME \"mysearch\"")));
}

#[tokio::test]
async fn relation_store_fetch_remove_round_trip() {
    let mut h = harness().await;
    let (_, col) = h.seed_collection();
    h.login().await;

    let (left, right) = {
        let mut db = h.open_db();
        let mime = db.mime_type_find_or_create("message/rfc822").unwrap();
        let mut make = |rid: &str| {
            let mut item = satchel_core::PimItem {
                id: 0,
                rev: 0,
                remote_id: rid.into(),
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
            item.id
        };
        (make("item1"), make("item2"))
    };

    h.client
        .send(&format!("2 UID RELATIONSTORE LEFT {left} RIGHT {right} TYPE \"type\""))
        .await;
    let line = h.client.read_line().await;
    assert!(line.starts_with("2 OK Store completed"), "{line}");

    h.client.send("3 UID RELATIONFETCH TYPE \"type\"").await;
    let (untagged, _) = h.client.read_until_tagged("3").await;
    assert_eq!(untagged.len(), 1);
    assert!(untagged[0].contains(&format!("LEFT {left} RIGHT {right} TYPE \"type\"")));

    h.client
        .send(&format!("4 UID RELATIONREMOVE LEFT {left} RIGHT {right} TYPE \"type\""))
        .await;
    assert!(h.client.read_line().await.starts_with("4 OK"));

    h.client.send("5 UID RELATIONFETCH TYPE \"type\"").await;
    let (untagged, _) = h.client.read_until_tagged("5").await;
    assert!(untagged.is_empty());
}

#[tokio::test]
async fn relation_remove_without_type_removes_all_and_notifies() {
    let mut h = harness().await;
    let (_, col) = h.seed_collection();
    h.login().await;

    let (left, right) = {
        let mut db = h.open_db();
        let mime = db.mime_type_find_or_create("message/rfc822").unwrap();
        let mut make = |rid: &str| {
            let mut item = satchel_core::PimItem {
                id: 0,
                rev: 0,
                remote_id: rid.into(),
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
            item.id
        };
        let left = make("item1");
        let right = make("item2");
        db.insert_relation(left, right, "type", None).unwrap();
        db.insert_relation(left, right, "type2", None).unwrap();
        (left, right)
    };
    h.drain_notifications();

    h.client.send(&format!("2 UID RELATIONREMOVE LEFT {left} RIGHT {right}")).await;
    let line = h.client.read_line().await;
    assert!(line.starts_with("2 OK"), "{line}");

    let batch = h.subscriber.recv().await;
    let relation_removes = batch
        .notifications
        .iter()
        .filter(|n| {
            matches!(n, Notification::Relation { op: Operation::Remove, .. })
        })
        .count();
    assert_eq!(relation_removes, 2);
    let modify_relations = batch
        .notifications
        .iter()
        .filter(|n| n.operation() == Operation::ModifyRelations)
        .count();
    assert_eq!(modify_relations, 2);

    let mut db = h.open_db();
    assert!(db.relations_matching(Some(left), Some(right), None, None).unwrap().is_empty());
}

#[tokio::test]
async fn resource_commands_require_resselect() {
    let mut h = harness().await;
    let (_, col) = h.seed_collection();
    h.login().await;

    h.client
        .send(&format!("2 X-AKAPPEND {} message/rfc822 \"rid-1\" ()", col.id))
        .await;
    let line = h.client.read_line().await;
    assert!(line.starts_with("2 NO"), "{line}");

    h.client.send("3 RESSELECT \"testresource\"").await;
    assert!(h.client.read_line().await.starts_with("3 OK"));

    h.client
        .send(&format!("4 X-AKAPPEND {} message/rfc822 \"rid-1\" (\\Seen)", col.id))
        .await;
    let line = h.client.read_line().await;
    assert!(line.starts_with("4 OK Append completed"), "{line}");

    // The resource-written item is not dirty.
    let db = h.open_db();
    let items = db.items_by_remote_id("rid-1", None).unwrap();
    assert_eq!(items.len(), 1);
    assert!(!items[0].dirty);
}

#[tokio::test]
async fn select_by_path_and_unscoped_fetch() {
    let mut h = harness().await;
    let (_, col) = h.seed_collection();
    h.login().await;

    h.client.send(&format!("2 APPEND {} message/rfc822 ()", col.id)).await;
    let line = h.client.read_line().await;
    let id: i64 = line.trim_end_matches("])").rsplit(' ').next().unwrap().parse().unwrap();

    h.client.send("3 SELECT \"inbox\"").await;
    let (untagged, tagged) = h.client.read_until_tagged("3").await;
    assert!(tagged.starts_with("3 OK SELECT completed"));
    assert!(untagged[0].contains("NAME \"inbox\""));

    // Unscoped FETCH now resolves against the selected collection.
    h.client.send("4 FETCH 1:* (FLAGS)").await;
    let (untagged, _) = h.client.read_until_tagged("4").await;
    assert_eq!(untagged.len(), 1);
    assert!(untagged[0].contains(&format!("UID {id}")));
}

#[tokio::test]
async fn move_and_remove_items() {
    let mut h = harness().await;
    let (_, col) = h.seed_collection();
    h.login().await;

    h.client.send(&format!("2 COLLECTIONCREATE archive {}", col.id)).await;
    let (untagged, tagged) = h.client.read_until_tagged("2").await;
    assert!(tagged.starts_with("2 OK"));
    let archive_id: i64 = untagged[0].split(' ').nth(1).unwrap().parse().unwrap();

    h.client.send(&format!("3 APPEND {} message/rfc822 ()", col.id)).await;
    let line = h.client.read_line().await;
    let id: i64 = line.trim_end_matches("])").rsplit(' ').next().unwrap().parse().unwrap();

    h.client.send(&format!("4 UID MOVE {id} {archive_id}")).await;
    assert!(h.client.read_line().await.starts_with("4 OK"));
    {
        let db = h.open_db();
        assert_eq!(db.item_by_id(id).unwrap().unwrap().collection_id, archive_id);
    }

    h.client.send(&format!("5 UID REMOVE {id}")).await;
    assert!(h.client.read_line().await.starts_with("5 OK"));
    {
        let db = h.open_db();
        assert!(db.item_by_id(id).unwrap().is_none());
    }
}

#[tokio::test]
async fn tag_append_fetch_and_item_tagging() {
    let mut h = harness().await;
    let (_, col) = h.seed_collection();
    h.login().await;

    h.client.send("2 TAGAPPEND \"important\" (TYPE \"PLAIN\")").await;
    let (untagged, tagged) = h.client.read_until_tagged("2").await;
    assert!(tagged.starts_with("2 OK"));
    let tag_id: i64 = untagged[0].split(' ').nth(1).unwrap().parse().unwrap();

    // Appending the same gid returns the existing tag.
    h.client.send("3 TAGAPPEND \"important\"").await;
    let (untagged, _) = h.client.read_until_tagged("3").await;
    let same_id: i64 = untagged[0].split(' ').nth(1).unwrap().parse().unwrap();
    assert_eq!(tag_id, same_id);

    h.client.send(&format!("4 APPEND {} message/rfc822 ()", col.id)).await;
    let line = h.client.read_line().await;
    let item_id: i64 = line.trim_end_matches("])").rsplit(' ').next().unwrap().parse().unwrap();

    h.client.send(&format!("5 UID STORE {item_id} +TAGS ({tag_id})")).await;
    assert!(h.client.read_line().await.starts_with("5 OK"));

    // TAG scope addresses items carrying the tag.
    h.client.send(&format!("6 TAG FETCH {tag_id} (FLAGS TAGS)")).await;
    let (untagged, _) = h.client.read_until_tagged("6").await;
    assert_eq!(untagged.len(), 1);
    assert!(untagged[0].contains(&format!("UID {item_id}")));
    assert!(untagged[0].contains(&format!("TAGS ({tag_id})")));

    h.client.send(&format!("7 TAGFETCH {tag_id}")).await;
    let (untagged, _) = h.client.read_until_tagged("7").await;
    assert!(untagged[0].contains("GID \"important\""));

    h.client.send(&format!("8 TAGREMOVE {tag_id}")).await;
    assert!(h.client.read_line().await.starts_with("8 OK"));
}

#[tokio::test]
async fn logout_sends_bye_then_ok() {
    let mut h = harness().await;
    h.login().await;

    h.client.send("2 LOGOUT").await;
    let bye = h.client.read_line().await;
    assert!(bye.starts_with("* BYE"), "{bye}");
    let tagged = h.client.read_line().await;
    assert!(tagged.starts_with("2 OK LOGOUT completed"), "{tagged}");
}
