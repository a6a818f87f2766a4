// SPDX-License-Identifier: MIT

//! Client-controlled transactions: BEGIN, COMMIT, ROLLBACK.
//!
//! A client transaction brackets several commands into one atomic unit;
//! handler-internal transactions nest inside it, so notifications
//! accumulate until the outermost COMMIT and are discarded wholesale on
//! ROLLBACK. A failed command dooms the bracket: COMMIT then reports the
//! failure instead of committing half of it.

use tokio::io::{AsyncRead, AsyncWrite};

use super::HandlerError;
use crate::connection::{Connection, ConnectionState};

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// `<tag> BEGIN`
    pub(crate) async fn transaction_begin(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        self.db.begin_transaction()?;
        Ok("BEGIN completed".into())
    }

    /// `<tag> COMMIT`
    pub(crate) async fn transaction_commit(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        self.db.commit_transaction()?;
        Ok("COMMIT completed".into())
    }

    /// `<tag> ROLLBACK`
    pub(crate) async fn transaction_rollback(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        self.db.rollback_transaction()?;
        Ok("ROLLBACK completed".into())
    }
}
