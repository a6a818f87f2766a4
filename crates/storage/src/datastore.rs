// SPDX-License-Identifier: MIT

//! Per-session data store facade.
//!
//! Each connection worker owns one `DataStore`, which owns one database
//! session. Transactions nest by counting: only the outermost commit
//! commits, an inner rollback dooms the whole stack. The notification
//! collector rides on the transaction: its batch is completed, compressed
//! and handed to the bus when the outermost commit succeeds, and discarded
//! on rollback.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use thiserror::Error;
use tracing::{debug, warn};

use satchel_core::notification::{compress, Notification, NotificationBatch};
use satchel_core::Id;

use crate::bus::NotificationBus;
use crate::collector::{NotificationCollector, Pending};
use crate::schema;
use crate::store::LookupCaches;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database schema version {found} is not supported")]
    SchemaVersionMismatch { found: i64 },

    #[error("{0} not found")]
    NotFound(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("transaction already marked for rollback")]
    TransactionDoomed,

    #[error("no transaction in progress")]
    NoTransaction,

    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl StorageError {
    /// True for failures the client caused (missing entity, duplicate),
    /// reported as a tagged NO rather than a server error.
    pub fn is_client_fault(&self) -> bool {
        matches!(self, StorageError::NotFound(_) | StorageError::UniqueViolation(_))
    }
}

/// Maps a constraint failure onto [`StorageError::UniqueViolation`] so
/// handlers can answer NO instead of surfacing a raw database error.
pub(crate) fn constraint_as_unique(err: rusqlite::Error, what: &str) -> StorageError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StorageError::UniqueViolation(what.to_string())
        }
        _ => StorageError::Db(err),
    }
}

/// One database session plus its transaction and notification state.
pub struct DataStore {
    pub(crate) conn: Connection,
    session_id: String,
    external_dir: PathBuf,
    bus: NotificationBus,
    pub(crate) collector: NotificationCollector,
    pub(crate) caches: LookupCaches,
    transaction_depth: u32,
    rollback_only: bool,
    /// External payload files to unlink once the enclosing transaction
    /// commits. Cleared (files kept for the janitor) on rollback.
    pub(crate) pending_file_deletes: Vec<PathBuf>,
}

impl DataStore {
    /// Opens the database at `db_path`, creating the schema if needed.
    pub fn open(
        db_path: &Path,
        session_id: &str,
        external_dir: &Path,
        bus: NotificationBus,
    ) -> Result<Self, StorageError> {
        let conn = Connection::open(db_path)?;
        // Concurrent sessions from the other workers share this file.
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        conn.pragma_update(None, "journal_mode", "wal")?;
        Self::with_connection(conn, session_id, external_dir, bus)
    }

    /// In-memory store for tests. Each call yields an isolated database.
    pub fn open_in_memory(
        session_id: &str,
        external_dir: &Path,
        bus: NotificationBus,
    ) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, session_id, external_dir, bus)
    }

    fn with_connection(
        conn: Connection,
        session_id: &str,
        external_dir: &Path,
        bus: NotificationBus,
    ) -> Result<Self, StorageError> {
        schema::init(&conn)?;
        Ok(Self {
            conn,
            session_id: session_id.to_string(),
            external_dir: external_dir.to_path_buf(),
            bus,
            collector: NotificationCollector::new(),
            caches: LookupCaches::default(),
            transaction_depth: 0,
            rollback_only: false,
            pending_file_deletes: Vec::new(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Adopts the client-supplied session identifier (LOGIN). Batches
    /// emitted afterwards carry it, so the client can suppress its own
    /// echo.
    pub fn set_session_id(&mut self, session_id: &str) {
        self.session_id = session_id.to_string();
    }

    pub fn external_dir(&self) -> &Path {
        &self.external_dir
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_depth > 0
    }

    /// Begins a transaction, or joins the one already in progress.
    pub fn begin_transaction(&mut self) -> Result<(), StorageError> {
        if self.transaction_depth == 0 {
            self.conn.execute_batch("BEGIN")?;
            self.rollback_only = false;
        }
        self.transaction_depth += 1;
        Ok(())
    }

    /// Commits the current transaction level. Only the outermost level
    /// actually commits; the accumulated notification batch is emitted on
    /// the bus afterwards.
    pub fn commit_transaction(&mut self) -> Result<(), StorageError> {
        if self.transaction_depth == 0 {
            return Err(StorageError::NoTransaction);
        }
        if self.rollback_only {
            // An inner level already failed; the only way out is rollback.
            self.rollback_transaction()?;
            return Err(StorageError::TransactionDoomed);
        }
        self.transaction_depth -= 1;
        if self.transaction_depth > 0 {
            return Ok(());
        }

        // Complete the batch while the transaction's rows are still
        // visible, then commit, then emit.
        let batch = match self.build_batch() {
            Ok(batch) => batch,
            Err(e) => {
                warn!("failed to complete notification batch: {e}");
                Vec::new()
            }
        };
        self.conn.execute_batch("COMMIT")?;
        self.collector.clear();
        self.caches.commit();

        for path in self.pending_file_deletes.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                // The janitor picks up what we leave behind.
                debug!("could not remove external payload {}: {e}", path.display());
            }
        }

        if !batch.is_empty() {
            self.bus.emit(NotificationBatch {
                session_id: self.session_id.clone(),
                notifications: batch,
                missed: 0,
            });
        }
        Ok(())
    }

    /// Rolls back the current transaction level. Outer levels observe the
    /// doomed flag on their commit.
    pub fn rollback_transaction(&mut self) -> Result<(), StorageError> {
        if self.transaction_depth == 0 {
            return Err(StorageError::NoTransaction);
        }
        self.transaction_depth -= 1;
        self.rollback_only = true;
        if self.transaction_depth == 0 {
            self.conn.execute_batch("ROLLBACK")?;
            self.rollback_only = false;
            self.collector.clear();
            // Written files stay on disk; the janitor reclaims them.
            self.pending_file_deletes.clear();
            self.caches.rollback();
        }
        Ok(())
    }

    /// Emits buffered notifications right away when no transaction is in
    /// progress. Mutating operations call this so that autocommitted
    /// statements (no surrounding BEGIN) still notify; inside a
    /// transaction it is a no-op and the commit flushes.
    pub(crate) fn dispatch_if_idle(&mut self) {
        if self.transaction_depth > 0 {
            return;
        }
        for path in self.pending_file_deletes.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                debug!("could not remove external payload {}: {e}", path.display());
            }
        }
        if self.collector.is_empty() {
            return;
        }
        match self.build_batch() {
            Ok(batch) if !batch.is_empty() => self.bus.emit(NotificationBatch {
                session_id: self.session_id.clone(),
                notifications: batch,
                missed: 0,
            }),
            Ok(_) => {}
            Err(e) => warn!("failed to complete notification batch: {e}"),
        }
    }

    /// Completes pending notifications (filling in fields that were not
    /// known at record time) and compresses the result.
    fn build_batch(&mut self) -> Result<Vec<Notification>, StorageError> {
        let pending = self.collector.take();
        let mut completed = Vec::with_capacity(pending.len());
        for p in pending {
            completed.push(self.complete(p)?);
        }
        Ok(compress(completed))
    }

    fn complete(&self, pending: Pending) -> Result<Notification, StorageError> {
        Ok(match pending {
            Pending::Item { op, item, collection, mime_type, resource, parts } => {
                let mime_type = match mime_type {
                    Some(m) => m,
                    None => self.mime_type_name(item.mime_type_id)?,
                };
                let resource = match resource {
                    Some(r) => r,
                    None => self.resource_name_of_collection(collection)?,
                };
                Notification::Item {
                    op,
                    item: satchel_core::notification::ItemNotice {
                        id: item.id,
                        remote_id: item.remote_id,
                        mime_type,
                    },
                    collection,
                    resource,
                    parts,
                }
            }
            Pending::Collection { op, id, name, resource, parts } => {
                let resource = match resource {
                    Some(r) => r,
                    None => self.resource_name_of_collection(id)?,
                };
                Notification::Collection { op, id, name, resource, parts }
            }
            Pending::Tag { op, id } => Notification::Tag { op, id },
            Pending::Relation { op, left, right, type_name, remote_id } => {
                Notification::Relation { op, left, right, type_name, remote_id }
            }
        })
    }

    /// Name of a mime-type row.
    pub fn mime_type_name(&self, id: Id) -> Result<String, StorageError> {
        self.conn
            .query_row("SELECT name FROM mime_types WHERE id = ?1", [id], |row| row.get(0))
            .map_err(|_| StorageError::NotFound(format!("mime type {id}")))
    }

    /// Name of the resource owning a collection.
    pub fn resource_name_of_collection(&self, collection_id: Id) -> Result<String, StorageError> {
        self.conn
            .query_row(
                "SELECT r.name FROM collections c JOIN resources r ON c.resource_id = r.id
                 WHERE c.id = ?1",
                [collection_id],
                |row| row.get(0),
            )
            .map_err(|_| StorageError::NotFound(format!("collection {collection_id}")))
    }
}

#[cfg(test)]
#[path = "datastore_tests.rs"]
mod tests;
