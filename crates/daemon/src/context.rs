// SPDX-License-Identifier: MIT

//! Shared server context threaded through connection construction.
//!
//! Subsystems that were process-wide singletons in older PIM servers are
//! explicit here; their lifetime is tied to the server object.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use satchel_storage::{DataStore, NotificationBus, StorageError};

use crate::retrieval::RetrievalHandle;
use crate::search::SearchManager;

/// Everything a connection worker needs besides its socket.
pub struct ServerContext {
    pub db_path: PathBuf,
    pub external_dir: PathBuf,
    pub bus: NotificationBus,
    pub retrieval: RetrievalHandle,
    pub search: Arc<SearchManager>,
    /// Set when the server begins shutdown; workers drain and exit.
    pub shutdown: CancellationToken,
    /// Connections verify cached external payloads before answering.
    pub verify_cache_on_retrieval: bool,
    session_counter: AtomicU64,
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("db_path", &self.db_path)
            .field("external_dir", &self.external_dir)
            .finish_non_exhaustive()
    }
}

impl ServerContext {
    pub fn new(
        db_path: PathBuf,
        external_dir: PathBuf,
        bus: NotificationBus,
        retrieval: RetrievalHandle,
        search: Arc<SearchManager>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db_path,
            external_dir,
            bus,
            retrieval,
            search,
            shutdown,
            verify_cache_on_retrieval: false,
            session_counter: AtomicU64::new(1),
        }
    }

    pub fn with_cache_verification(mut self, verify: bool) -> Self {
        self.verify_cache_on_retrieval = verify;
        self
    }

    /// A fresh session id for a new connection. Clients overwrite it with
    /// their own identifier at LOGIN.
    pub fn next_session_id(&self) -> String {
        format!("session-{}", self.session_counter.fetch_add(1, Ordering::Relaxed))
    }

    /// Opens a database session bound to this server's store.
    pub fn open_store(&self, session_id: &str) -> Result<DataStore, StorageError> {
        DataStore::open(&self.db_path, session_id, &self.external_dir, self.bus.clone())
    }
}
