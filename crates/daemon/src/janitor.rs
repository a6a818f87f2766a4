// SPDX-License-Identifier: MIT

//! Storage janitor: background consistency checker.
//!
//! Detects and reports orphan rows, broken collection trees, overlapping
//! external payload files and unreferenced files on disk. Findings are
//! reported through an `information` channel; nothing is repaired
//! automatically.

use std::collections::HashSet;
use std::path::PathBuf;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use satchel_core::Collection;
use satchel_storage::{DataStore, StorageError};

/// Janitor RPC surface.
enum Command {
    Check,
    Vacuum,
}

/// Handle for triggering sweeps and observing findings.
#[derive(Clone)]
pub struct JanitorHandle {
    tx: mpsc::UnboundedSender<Command>,
    information: broadcast::Sender<String>,
}

impl JanitorHandle {
    /// Queues a full consistency sweep.
    pub fn check(&self) {
        let _ = self.tx.send(Command::Check);
    }

    /// Queues a best-effort storage reclaim.
    pub fn vacuum(&self) {
        let _ = self.tx.send(Command::Vacuum);
    }

    /// Stream of `information` findings.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.information.subscribe()
    }
}

/// The janitor task: owns its own database session and runs sweeps when
/// triggered.
pub struct StorageJanitor {
    db: DataStore,
    external_dir: PathBuf,
    information: broadcast::Sender<String>,
}

impl StorageJanitor {
    /// Spawns the janitor task and returns its handle.
    pub fn spawn(db: DataStore, external_dir: PathBuf) -> JanitorHandle {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (information, _) = broadcast::channel(256);
        let handle = JanitorHandle { tx, information: information.clone() };
        let mut janitor = Self { db, external_dir, information };
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Check => janitor.check(),
                    Command::Vacuum => janitor.vacuum(),
                }
            }
        });
        handle
    }

    fn inform(&self, message: impl Into<String>) {
        let message = message.into();
        debug!("janitor: {message}");
        let _ = self.information.send(message);
    }

    /// One full sweep, each step a single database pass.
    pub fn check(&mut self) {
        self.inform("Looking for collections not belonging to a valid resource...");
        self.find_orphaned_collections();

        self.inform("Checking collection tree consistency...");
        self.check_collection_tree();

        self.inform("Looking for items not belonging to a valid collection...");
        self.find_orphaned_items();

        self.inform("Looking for item parts not belonging to a valid item...");
        self.find_orphaned_parts();

        self.inform("Looking for overlapping external parts...");
        self.find_overlapping_parts();

        self.inform("Verifying external parts...");
        self.verify_external_files();

        self.inform("Consistency check done.");
    }

    fn find_orphaned_collections(&mut self) {
        match self.db.orphaned_collections() {
            Ok(orphans) if !orphans.is_empty() => {
                self.inform(format!("Found {} orphan collections.", orphans.len()));
            }
            Ok(_) => {}
            Err(e) => self.inform(format!("Orphan collection query failed: {e}")),
        }
    }

    fn check_collection_tree(&mut self) {
        let collections = match self.db.collections_all() {
            Ok(collections) => collections,
            Err(e) => {
                self.inform(format!("Collection tree query failed: {e}"));
                return;
            }
        };
        for collection in &collections {
            self.check_path_to_root(collection);
        }
    }

    /// Walks the parent chain to the root, reporting null parents and
    /// cross-resource links.
    fn check_path_to_root(&mut self, collection: &Collection) {
        let Some(parent_id) = collection.parent_id else {
            return;
        };
        let parent = match self.db.collection_by_id(parent_id) {
            Ok(Some(parent)) => parent,
            Ok(None) => {
                self.inform(format!(
                    "Collection \"{}\" (id: {}) has no valid parent.",
                    collection.name, collection.id
                ));
                return;
            }
            Err(e) => {
                self.inform(format!("Parent lookup failed: {e}"));
                return;
            }
        };
        if collection.resource_id != parent.resource_id {
            self.inform(format!(
                "Collection \"{}\" (id: {}) belongs to a different resource than its parent.",
                collection.name, collection.id
            ));
        }
        self.check_path_to_root(&parent);
    }

    fn find_orphaned_items(&mut self) {
        match self.db.orphaned_items() {
            Ok(orphans) if !orphans.is_empty() => {
                self.inform(format!("Found {} orphan items.", orphans.len()));
            }
            Ok(_) => {}
            Err(e) => self.inform(format!("Orphan item query failed: {e}")),
        }
    }

    fn find_orphaned_parts(&mut self) {
        match self.db.orphaned_parts() {
            Ok(orphans) if !orphans.is_empty() => {
                self.inform(format!("Found {} orphan parts.", orphans.len()));
            }
            Ok(_) => {}
            Err(e) => self.inform(format!("Orphan part query failed: {e}")),
        }
    }

    fn find_overlapping_parts(&mut self) {
        match self.db.overlapping_external_parts() {
            Ok(overlapping) => {
                for (file, _count) in &overlapping {
                    self.inform(format!("Found overlapping external part: {file}"));
                }
                if !overlapping.is_empty() {
                    self.inform(format!(
                        "Found {} overlapping external parts - bad.",
                        overlapping.len()
                    ));
                }
            }
            Err(e) => self.inform(format!("Overlap query failed: {e}")),
        }
    }

    /// Compares the external payload directory against the part rows:
    /// reports files the database expects but cannot find, and files on
    /// disk nothing references. Files are left in place.
    fn verify_external_files(&mut self) {
        let mut existing: HashSet<String> = HashSet::new();
        match std::fs::read_dir(&self.external_dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    if let Ok(name) = entry.file_name().into_string() {
                        existing.insert(name);
                    }
                }
            }
            Err(e) => {
                self.inform(format!("Cannot list external payload directory: {e}"));
                return;
            }
        }
        self.inform(format!("Found {} external files.", existing.len()));

        let parts = match self.db.external_parts() {
            Ok(parts) => parts,
            Err(e) => {
                self.inform(format!("External part query failed: {e}"));
                return;
            }
        };
        let mut used: HashSet<String> = HashSet::new();
        for part in &parts {
            let Some(name) =
                part.data.as_deref().and_then(|d| std::str::from_utf8(d).ok())
            else {
                continue;
            };
            if existing.contains(name) {
                used.insert(name.to_string());
            } else {
                self.inform(format!("Missing external file: {name}"));
            }
        }
        self.inform(format!("Found {} external parts.", used.len()));

        for file in existing.difference(&used) {
            self.inform(format!(
                "Found unreferenced external file: {}",
                self.external_dir.join(file).display()
            ));
        }
    }

    /// Best-effort storage reclaim; a no-op error report for back-ends
    /// without support.
    pub fn vacuum(&mut self) {
        self.inform("vacuuming database, that'll take some time...");
        match self.db.vacuum() {
            Ok(()) => {
                info!("database vacuum complete");
                self.inform("vacuum done");
            }
            Err(StorageError::Db(e)) => self.inform(format!("vacuum failed: {e}")),
            Err(_) => self.inform("Vacuum not supported for this database backend."),
        }
    }
}

#[cfg(test)]
#[path = "janitor_tests.rs"]
mod tests;
