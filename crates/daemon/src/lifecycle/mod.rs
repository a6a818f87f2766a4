// SPDX-License-Identifier: MIT

//! Server lifecycle: startup, accept loop, shutdown.

mod startup;
pub use startup::{startup, startup_with_bus};

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use satchel_storage::StorageError;

use crate::config::{ConfigError, ServerConfig};
use crate::connection::Connection;
use crate::context::ServerContext;
use crate::janitor::JanitorHandle;

/// Lifecycle errors. Fatal at startup; each maps to a process exit code.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to acquire lock: server already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("database error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LifecycleError {
    /// Exit code for a fatal startup failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            LifecycleError::Storage(StorageError::SchemaVersionMismatch { .. }) => 4,
            LifecycleError::Storage(_) => 2,
            LifecycleError::BindFailed(..) => 3,
            _ => 1,
        }
    }
}

/// The running server: listener plus every background subsystem.
pub struct Server {
    pub config: ServerConfig,
    pub context: Arc<ServerContext>,
    pub janitor: JanitorHandle,
    pub(crate) listener: UnixListener,
    // NOTE(lifetime): held to keep the exclusive lock; released on drop.
    #[allow(dead_code)]
    pub(crate) lock_file: File,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Server {
    /// Token that stops the accept loop and every worker.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.context.shutdown.clone()
    }

    /// The socket path clients connect to.
    pub fn socket_path(&self) -> &std::path::Path {
        &self.config.socket_path
    }

    /// Accepts connections until shutdown, then cleans up runtime files.
    /// In-flight transactions are not committed; they roll back with
    /// their connections.
    pub async fn run(self) {
        let shutdown = self.context.shutdown.clone();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, _)) => {
                            let context = Arc::clone(&self.context);
                            tokio::spawn(async move {
                                match Connection::new(socket, context) {
                                    Ok(connection) => connection.run().await,
                                    Err(e) => error!("could not set up connection: {e}"),
                                }
                            });
                        }
                        Err(e) => error!("accept error: {e}"),
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        info!("shutting down");
        self.cleanup();
    }

    /// Removes the runtime files a dead server must not leave behind.
    fn cleanup(&self) {
        for path in [&self.config.socket_path, &self.config.connectionrc_path, &self.config.lock_path]
        {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("failed to remove {}: {e}", path.display());
                }
            }
        }
        info!("shutdown complete");
    }
}
