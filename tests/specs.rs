// SPDX-License-Identifier: MIT

//! End-to-end specs: a real server on a real Unix socket, spoken to the
//! way a client library would.

use std::sync::Arc;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use satchel_daemon::config::ServerConfig;
use satchel_daemon::lifecycle::startup;
use satchel_storage::DataStore;

struct Client {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl Client {
    async fn connect(socket_path: &std::path::Path) -> Self {
        let stream = UnixStream::connect(socket_path).await.unwrap();
        let (read, writer) = stream.into_split();
        let mut client = Self { reader: BufReader::new(read), writer };
        let greeting = client.read_line().await;
        assert!(greeting.starts_with("* OK satchel server"), "{greeting}");
        client
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\r\n").await.unwrap();
    }

    async fn read_line(&mut self) -> String {
        let mut out = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            self.reader.read_exact(&mut byte).await.unwrap();
            if byte[0] == b'\n' {
                if out.last() == Some(&b'\r') {
                    out.pop();
                }
                return String::from_utf8_lossy(&out).into_owned();
            }
            out.push(byte[0]);
        }
    }

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

    async fn login(&mut self, session: &str) {
        self.send(&format!("0 LOGIN {session}")).await;
        let line = self.read_line().await;
        assert!(line.starts_with("0 OK"), "{line}");
    }
}

struct Fixture {
    server_task: tokio::task::JoinHandle<()>,
    shutdown: tokio_util::sync::CancellationToken,
    socket_path: std::path::PathBuf,
    db_path: std::path::PathBuf,
    external_dir: std::path::PathBuf,
    _dir: TempDir,
}

async fn start_server() -> Fixture {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig::for_state_dir(dir.path().to_path_buf()).unwrap();
    let server = startup(config).await.unwrap();
    let shutdown = server.shutdown_token();
    let socket_path = server.config.socket_path.clone();
    let db_path = server.config.db_path.clone();
    let external_dir = server.config.external_dir.clone();
    let server_task = tokio::spawn(server.run());
    Fixture { server_task, shutdown, socket_path, db_path, external_dir, _dir: dir }
}

impl Fixture {
    fn open_db(&self) -> DataStore {
        DataStore::open(
            &self.db_path,
            "spec-fixture",
            &self.external_dir,
            satchel_storage::NotificationBus::new(),
        )
        .unwrap()
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.server_task.await.unwrap();
    }
}

#[tokio::test]
async fn persistent_search_is_created_and_listable() {
    let fx = start_server().await;
    let mut client = Client::connect(&fx.socket_path).await;
    client.login("spec-client").await;

    client.send("2 SEARCH_STORE \"mysearch\" \"subject:foo\"").await;
    let (untagged, tagged) = client.read_until_tagged("2").await;
    assert!(tagged.starts_with("2 OK SEARCH_STORE completed"), "{tagged}");
    assert_eq!(untagged.len(), 1);
    assert!(untagged[0].contains("NAME \"mysearch\""));

    // Listable under the search root, owned by the search resource.
    client.send("3 LIST 1 INF").await;
    let (listed, tagged) = client.read_until_tagged("3").await;
    assert!(tagged.starts_with("3 OK"));
    let search_line = listed
        .iter()
        .find(|l| l.contains("NAME \"mysearch\""))
        .expect("search collection listed");
    // `* <id> <parent-id> (...)`: parented under the search root.
    let parent: i64 = search_line.split(' ').nth(2).unwrap().parse().unwrap();
    assert_eq!(parent, 1);

    let db = fx.open_db();
    let col = db.collection_by_parent_and_name(Some(1), "mysearch").unwrap().unwrap();
    assert_eq!(col.resource_id, 1);
    let mimes = db.collection_mime_types(col.id).unwrap();
    assert!(!mimes.is_empty());
    assert!(mimes.iter().all(|m| m.name != "inode/directory"));

    client.send("4 LOGOUT").await;
    let (_, tagged) = client.read_until_tagged("4").await;
    assert!(tagged.starts_with("4 OK"));
    fx.stop().await;
}

#[tokio::test]
async fn two_clients_see_consistent_state() {
    let fx = start_server().await;

    // Seed a resource-owned collection out of band.
    let col_id = {
        let mut db = fx.open_db();
        let res = db.create_resource("specresource", false).unwrap();
        let mut col = satchel_core::Collection {
            id: 0,
            parent_id: None,
            resource_id: res.id,
            name: "shared".into(),
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
            cache_policy: Default::default(),
        };
        db.append_collection(&mut col).unwrap();
        col.id
    };

    let mut writer = Client::connect(&fx.socket_path).await;
    writer.login("writer").await;
    let mut reader = Client::connect(&fx.socket_path).await;
    reader.login("reader").await;

    writer.send(&format!("2 APPEND {col_id} message/rfc822 (\\Seen)")).await;
    let line = writer.read_line().await;
    assert!(line.starts_with("2 OK Append completed"), "{line}");
    let id: i64 = line.trim_end_matches("])").rsplit(' ').next().unwrap().parse().unwrap();

    // The second connection sees the item immediately.
    reader.send(&format!("2 UID FETCH {id} (FLAGS)")).await;
    let (untagged, tagged) = reader.read_until_tagged("2").await;
    assert!(tagged.starts_with("2 OK"));
    assert_eq!(untagged.len(), 1);
    assert!(untagged[0].contains("\\Seen"));

    fx.stop().await;
}

#[tokio::test]
async fn janitor_reports_unreferenced_file_over_handle() {
    let fx = start_server().await;
    // A file nothing references.
    std::fs::write(fx.external_dir.join("zzz"), b"junk").unwrap();

    let handle = satchel_daemon::janitor::StorageJanitor::spawn(
        fx.open_db(),
        fx.external_dir.clone(),
    );
    let mut findings = handle.subscribe();
    handle.check();

    let mut seen = false;
    for _ in 0..200 {
        match findings.try_recv() {
            Ok(line) if line.contains("Found unreferenced external file:") && line.contains("zzz") => {
                seen = true;
                break;
            }
            Ok(_) => {}
            Err(_) => tokio::time::sleep(std::time::Duration::from_millis(5)).await,
        }
    }
    assert!(seen);
    assert!(fx.external_dir.join("zzz").exists());

    fx.stop().await;
}
