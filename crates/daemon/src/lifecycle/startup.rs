// SPDX-License-Identifier: MIT

//! Server startup and initialization.

use std::io::Write;
use std::sync::Arc;

use fs2::FileExt;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use satchel_storage::{DataStore, NotificationBus};

use super::{LifecycleError, Server};
use crate::config::{ConnectionSettings, ServerConfig};
use crate::context::ServerContext;
use crate::janitor::StorageJanitor;
use crate::retrieval::ItemRetrievalManager;
use crate::search::{
    AgentSearchEngine, IndexerSearchEngine, NullIndexer, SearchEngine, SearchManager,
};
use crate::service_bus::{NullServiceBus, OwnerChange, ServiceBus, CONTROL_SERVICE};
use crate::{cache_cleaner::CacheCleaner, interval_check::IntervalCheck};

/// Starts the server with no external service-bus transport configured.
pub async fn startup(config: ServerConfig) -> Result<Server, LifecycleError> {
    startup_with_bus(config, Arc::new(NullServiceBus::new())).await
}

/// Starts the server against the given service bus.
pub async fn startup_with_bus(
    config: ServerConfig,
    service_bus: Arc<dyn ServiceBus>,
) -> Result<Server, LifecycleError> {
    match startup_inner(config, service_bus).await {
        Ok(server) => Ok(server),
        Err((config, e)) => {
            // Don't clean up after a lock failure: those files belong to
            // the already-running server.
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(&config);
            }
            Err(e)
        }
    }
}

async fn startup_inner(
    config: ServerConfig,
    service_bus: Arc<dyn ServiceBus>,
) -> Result<Server, (ServerConfig, LifecycleError)> {
    // Fallible steps carry the config back out for failure cleanup.
    macro_rules! fail {
        ($result:expr) => {
            match $result {
                Ok(value) => value,
                Err(e) => return Err((config, e.into())),
            }
        };
    }

    // 1. Create the state and external payload directories.
    fail!(std::fs::create_dir_all(&config.state_dir));
    fail!(std::fs::create_dir_all(&config.external_dir));

    // 2. Acquire the lock file before touching anything else. Opened
    // without truncation so a failed lock leaves the running server's
    // PID intact.
    let lock_file = fail!(std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path));
    fail!(lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed));
    let mut lock_file = lock_file;
    fail!(lock_file.set_len(0));
    fail!(writeln!(lock_file, "{}", std::process::id()));

    // 3. Open the database, creating or verifying the schema. Fatal on
    // version mismatch.
    let bus = NotificationBus::new();
    let mut bootstrap_db = fail!(DataStore::open(
        &config.db_path,
        "satcheld-startup",
        &config.external_dir,
        bus.clone(),
    ));

    // 4. Unhide items left hidden by an interrupted pre-processing run.
    let unhidden = fail!(bootstrap_db.unhide_all_items());
    if unhidden > 0 {
        info!(unhidden, "unhid items left over from interrupted pre-processing");
    }
    if config.rc.general.disable_preprocessing {
        info!("pre-processing disabled by configuration");
    }

    // 5. Advertise the endpoint for clients.
    fail!(ConnectionSettings::unix(&config.socket_path).write(&config.connectionrc_path));

    // 6. Remove a stale socket and bind (last, after all validation).
    if config.socket_path.exists() {
        fail!(std::fs::remove_file(&config.socket_path));
    }
    let listener = fail!(UnixListener::bind(&config.socket_path)
        .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e)));

    let shutdown = CancellationToken::new();

    // 7. Retrieval manager with typed stubs from the service bus.
    let retrieval = ItemRetrievalManager::spawn(Arc::clone(&service_bus));

    // 8. Search engines from configuration; unknown names get an
    // indexer-backed engine that stays invalid without a transport.
    let mut engines: Vec<Box<dyn SearchEngine>> = Vec::new();
    for manager in &config.rc.search.managers {
        if manager.eq_ignore_ascii_case("agent") {
            engines.push(Box::new(AgentSearchEngine));
        } else {
            let engine_db = fail!(DataStore::open(
                &config.db_path,
                "satcheld-search",
                &config.external_dir,
                bus.clone(),
            ));
            let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
            engines.push(Box::new(IndexerSearchEngine::new(
                manager,
                Arc::new(NullIndexer),
                rx,
                engine_db,
            )));
        }
    }
    let search = Arc::new(SearchManager::new(engines));
    search.reload_searches(&bootstrap_db);

    // 9. Janitor with its own database session.
    let janitor_db = fail!(DataStore::open(
        &config.db_path,
        "satcheld-janitor",
        &config.external_dir,
        bus.clone(),
    ));
    let janitor = StorageJanitor::spawn(janitor_db, config.external_dir.clone());

    // 10. Cache cleaner and interval checker.
    if config.rc.cache.enable_cleaner {
        let cleaner_db = fail!(DataStore::open(
            &config.db_path,
            "satcheld-cache-cleaner",
            &config.external_dir,
            bus.clone(),
        ));
        CacheCleaner::new(cleaner_db).spawn(shutdown.clone());
    }
    let interval_db = fail!(DataStore::open(
        &config.db_path,
        "satcheld-interval-check",
        &config.external_dir,
        bus.clone(),
    ));
    IntervalCheck::new(interval_db, retrieval.clone()).spawn(shutdown.clone());

    // 11. Losing the supervisor means nobody restarts us cleanly later:
    // quit now, rolling back whatever is in flight.
    spawn_control_watch(service_bus.subscribe_owner_changes(), shutdown.clone());

    let context = Arc::new(
        ServerContext::new(
            config.db_path.clone(),
            config.external_dir.clone(),
            bus,
            retrieval,
            search,
            shutdown,
        )
        .with_cache_verification(config.rc.cache.verify_on_retrieval),
    );

    info!(socket = %config.socket_path.display(), "server started");

    Ok(Server { config, context, janitor, listener, lock_file })
}

/// Watches the control service; if its owner disappears the server quits.
fn spawn_control_watch(
    mut owner_rx: tokio::sync::broadcast::Receiver<OwnerChange>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            match owner_rx.recv().await {
                Ok(change) if change.lost && change.service == CONTROL_SERVICE => {
                    warn!("control process died, shutting down");
                    shutdown.cancel();
                    return;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}

/// Removes runtime files created by a failed startup.
fn cleanup_on_failure(config: &ServerConfig) {
    for path in [&config.socket_path, &config.connectionrc_path, &config.lock_path] {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
#[path = "startup_tests.rs"]
mod tests;
