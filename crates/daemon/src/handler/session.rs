// SPDX-License-Identifier: MIT

//! Session handlers: LOGIN, LOGOUT, CAPABILITY, SELECT, RESSELECT.

use tokio::io::{AsyncRead, AsyncWrite};

use satchel_wire::{Response, SelectionScope};

use super::helpers::{collection_from_id_or_path, collection_line};
use super::HandlerError;
use crate::connection::{Connection, ConnectionState, PROTOCOL_VERSION};

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// `<tag> LOGIN <session-id>`: records the client identifier and
    /// authenticates the connection.
    pub(crate) async fn login(&mut self) -> Result<String, HandlerError> {
        if self.state != ConnectionState::New {
            return Err(HandlerError::Protocol("already authenticated".into()));
        }
        self.state = ConnectionState::Authenticating;

        let session_id = self.stream.read_utf8_string().await?;
        if session_id.is_empty() {
            self.state = ConnectionState::New;
            return Err(HandlerError::Protocol("missing session identifier".into()));
        }
        self.ctx.session_id = session_id.clone();
        self.db.set_session_id(&session_id);
        self.state = ConnectionState::Authenticated;
        Ok(format!("LOGIN completed, session {session_id}"))
    }

    /// `<tag> LOGOUT`: untagged BYE, tagged OK, then the server closes
    /// the socket.
    pub(crate) async fn logout(&mut self) -> Result<String, HandlerError> {
        self.stream.send_response(&Response::bye("satchel server logging out")).await?;
        self.state = ConnectionState::LoggingOut;
        Ok("LOGOUT completed".into())
    }

    /// `<tag> CAPABILITY`: reports the negotiated capabilities.
    pub(crate) async fn capability(&mut self) -> Result<String, HandlerError> {
        self.stream
            .send_untagged(
                format!("CAPABILITY (PROTOCOL {PROTOCOL_VERSION}) (SERVER satcheld)").as_bytes(),
            )
            .await?;
        Ok("CAPABILITY completed".into())
    }

    /// `<tag> SELECT <id-or-path>` / `<tag> RID SELECT <remote-id>`:
    /// sets the selected collection in the connection context.
    pub(crate) async fn select(&mut self, scope: SelectionScope) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;

        let collection = match scope {
            SelectionScope::Rid => {
                let rid = self.stream.read_utf8_string().await?;
                let resource = self.ctx.resource.as_ref().ok_or_else(|| {
                    HandlerError::Failure("RID SELECT requires a resource context".into())
                })?;
                self.db
                    .collection_by_remote_id(resource.id, &rid)?
                    .ok_or_else(|| {
                        HandlerError::Failure(format!("no collection with remote id {rid:?}"))
                    })?
            }
            SelectionScope::None | SelectionScope::Uid => {
                let arg = self.stream.read_utf8_string().await?;
                collection_from_id_or_path(&self.db, &arg)?
            }
            other => {
                return Err(HandlerError::Protocol(format!(
                    "scope {} not valid for SELECT",
                    other.as_str()
                )))
            }
        };

        let line = collection_line(&self.db, &collection, false)?;
        self.stream.send_untagged(line.as_bytes()).await?;
        self.ctx.selected_collection = Some(collection.id);
        self.state = ConnectionState::Selected;
        Ok("SELECT completed".into())
    }

    /// `<tag> RESSELECT <resource-name>`: identifies the connection as a
    /// resource, required for privileged actions.
    pub(crate) async fn resource_select(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        let name = self.stream.read_utf8_string().await?;
        let resource = self
            .db
            .resource_by_name(&name)?
            .ok_or_else(|| HandlerError::Failure(format!("no resource named {name:?}")))?;
        self.ctx.resource = Some(resource);
        Ok(format!("RESSELECT completed, acting as {name}"))
    }
}
