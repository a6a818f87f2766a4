// SPDX-License-Identifier: MIT

use tempfile::TempDir;

use crate::config::{ConnectionSettings, ServerConfig};

use super::*;

fn test_config(dir: &TempDir) -> ServerConfig {
    ServerConfig::for_state_dir(dir.path().to_path_buf()).unwrap()
}

#[tokio::test]
async fn startup_creates_runtime_files() {
    let dir = TempDir::new().unwrap();
    let server = startup(test_config(&dir)).await.unwrap();

    assert!(server.config.socket_path.exists());
    assert!(server.config.lock_path.exists());
    assert!(server.config.external_dir.is_dir());

    let settings = ConnectionSettings::read(&server.config.connectionrc_path).unwrap();
    assert_eq!(settings.data.method, "UnixPath");
    assert_eq!(settings.data.unix_path.as_deref(), Some(server.config.socket_path.as_path()));

    let pid: u32 =
        std::fs::read_to_string(&server.config.lock_path).unwrap().trim().parse().unwrap();
    assert_eq!(pid, std::process::id());
}

#[tokio::test]
async fn second_startup_fails_on_lock() {
    let dir = TempDir::new().unwrap();
    let _server = startup(test_config(&dir)).await.unwrap();

    let err = startup(test_config(&dir)).await.unwrap_err();
    assert!(matches!(err, LifecycleError::LockFailed(_)));
    // The running server's files are untouched.
    assert!(dir.path().join("satcheld.socket").exists());
}

#[tokio::test]
async fn shutdown_removes_runtime_files() {
    let dir = TempDir::new().unwrap();
    let server = startup(test_config(&dir)).await.unwrap();
    let shutdown = server.shutdown_token();
    let config = server.config.clone();

    let running = tokio::spawn(server.run());
    shutdown.cancel();
    running.await.unwrap();

    assert!(!config.socket_path.exists());
    assert!(!config.connectionrc_path.exists());
    assert!(!config.lock_path.exists());
    // The database itself survives.
    assert!(config.db_path.exists());
}

#[tokio::test]
async fn accepts_connections_until_shutdown() {
    let dir = TempDir::new().unwrap();
    let server = startup(test_config(&dir)).await.unwrap();
    let shutdown = server.shutdown_token();
    let socket_path = server.config.socket_path.clone();

    let running = tokio::spawn(server.run());

    let mut stream = tokio::net::UnixStream::connect(&socket_path).await.unwrap();
    let mut greeting = vec![0u8; 64];
    let n = tokio::io::AsyncReadExt::read(&mut stream, &mut greeting).await.unwrap();
    assert!(String::from_utf8_lossy(&greeting[..n]).starts_with("* OK satchel server"));

    shutdown.cancel();
    running.await.unwrap();
}

#[tokio::test]
async fn schema_mismatch_is_fatal_with_exit_code() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    {
        // Prime the database, then stamp an incompatible version.
        let conn = rusqlite_open(&config);
        conn.execute("UPDATE schema_version SET version = 999", []).unwrap();
    }

    let err = startup(test_config(&dir)).await.unwrap_err();
    assert_eq!(err.exit_code(), 4);
}

fn rusqlite_open(config: &ServerConfig) -> rusqlite::Connection {
    let _ = satchel_storage::DataStore::open(
        &config.db_path,
        "prime",
        &config.external_dir,
        satchel_storage::NotificationBus::new(),
    )
    .unwrap();
    rusqlite::Connection::open(&config.db_path).unwrap()
}
