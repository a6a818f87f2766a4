// SPDX-License-Identifier: MIT

//! Scoped transaction guard.
//!
//! A handler puts one of these on the stack; leaving the handler without
//! calling [`Transaction::commit`] rolls the transaction back, so a
//! half-done handler can never leak writes.

use crate::datastore::{DataStore, StorageError};

pub struct Transaction<'a> {
    db: &'a mut DataStore,
    committed: bool,
}

impl<'a> Transaction<'a> {
    /// Begins a (possibly nested) transaction on `db`.
    pub fn begin(db: &'a mut DataStore) -> Result<Self, StorageError> {
        db.begin_transaction()?;
        Ok(Self { db, committed: false })
    }

    /// Access to the data store for the duration of the transaction.
    pub fn store(&mut self) -> &mut DataStore {
        self.db
    }

    /// Commits this transaction level and disarms the guard.
    pub fn commit(mut self) -> Result<(), StorageError> {
        self.committed = true;
        self.db.commit_transaction()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.committed && self.db.in_transaction() {
            if let Err(e) = self.db.rollback_transaction() {
                tracing::warn!("rollback on drop failed: {e}");
            }
        }
    }
}

#[cfg(test)]
#[path = "transaction_tests.rs"]
mod tests;
