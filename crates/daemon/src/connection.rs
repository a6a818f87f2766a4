// SPDX-License-Identifier: MIT

//! Per-connection worker.
//!
//! Each accepted socket gets its own task with one database session
//! pinned to it. The worker reads framed commands, drives the
//! per-connection state machine, dispatches to handlers and emits exactly
//! one tagged response per command. Command processing is strictly
//! sequential within one connection.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use satchel_core::{Id, Resource};
use satchel_storage::DataStore;
use satchel_wire::{ImapStream, ProtocolError, Response, SelectionScope};

use crate::context::ServerContext;
use crate::handler::{self, HandlerError};

/// Protocol revision advertised in the greeting and CAPABILITY.
pub const PROTOCOL_VERSION: u32 = 1;

/// Connection lifecycle states. Commands check the state they require;
/// invalid transitions answer BAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Authenticating,
    Authenticated,
    Selected,
    LoggingOut,
}

/// Mutable per-connection command context.
pub struct CommandContext {
    /// Client-supplied identifier, doubling as the notification session id.
    pub session_id: String,
    /// Collection set by SELECT.
    pub selected_collection: Option<Id>,
    /// Resource identity after RESSELECT; grants resource privileges.
    pub resource: Option<Resource>,
    /// Verify external payload files before answering from cache.
    pub verify_cache_on_retrieval: bool,
}

/// One client connection: socket, database session and state machine.
pub struct Connection<S> {
    pub(crate) stream: ImapStream<S>,
    pub(crate) db: DataStore,
    pub(crate) ctx: CommandContext,
    pub(crate) state: ConnectionState,
    pub(crate) server: Arc<ServerContext>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub fn new(socket: S, server: Arc<ServerContext>) -> Result<Self, HandlerError> {
        let session_id = server.next_session_id();
        let db = server.open_store(&session_id)?;
        Ok(Self {
            stream: ImapStream::new(socket),
            db,
            ctx: CommandContext {
                session_id,
                selected_collection: None,
                resource: None,
                verify_cache_on_retrieval: server.verify_cache_on_retrieval,
            },
            state: ConnectionState::New,
            server,
        })
    }

    /// Serves the connection until the peer disconnects, logs out, or the
    /// server shuts down.
    pub async fn run(mut self) {
        if let Err(e) = self
            .stream
            .send_response(&Response::untagged(format!(
                "OK satchel server [PROTOCOL {PROTOCOL_VERSION}]"
            )))
            .await
        {
            warn!("failed to send greeting: {e}");
            return;
        }

        loop {
            if self.server.shutdown.is_cancelled() {
                let _ = self.stream.send_response(&Response::bye("server shutting down")).await;
                break;
            }

            let tag = tokio::select! {
                tag = self.stream.read_tag() => tag,
                _ = self.server.shutdown.cancelled() => {
                    let _ = self.stream.send_response(&Response::bye("server shutting down")).await;
                    break;
                }
            };
            let tag = match tag {
                Ok(tag) => tag,
                Err(ProtocolError::ConnectionClosed) => {
                    debug!("client disconnected");
                    break;
                }
                Err(e) => {
                    warn!("unreadable command: {e}");
                    break;
                }
            };

            match self.process_command(&tag).await {
                Ok(success_text) => {
                    // The handler has consumed its arguments; the line
                    // terminator and the tagged response are ours.
                    let response = match self.stream.read_command_end().await {
                        Ok(()) => Response::ok(&tag, success_text),
                        Err(ProtocolError::Malformed(_)) => {
                            // Trailing arguments the handler did not want.
                            if self.stream.skip_line().await.is_err() {
                                break;
                            }
                            Response::bad(&tag, "trailing arguments")
                        }
                        Err(_) => break,
                    };
                    if self.stream.send_response(&response).await.is_err() {
                        break;
                    }
                }
                Err(HandlerError::Wire(ProtocolError::ConnectionClosed)) => break,
                Err(HandlerError::Wire(e)) => {
                    warn!("connection error: {e}");
                    break;
                }
                Err(e) => {
                    // Recoverable failure: resync the stream, answer on
                    // the tag, keep the connection.
                    let response = match &e {
                        HandlerError::Protocol(message) => Response::bad(&tag, message.clone()),
                        other => Response::no(&tag, other.to_string()),
                    };
                    if self.stream.skip_line().await.is_err() {
                        break;
                    }
                    if self.stream.send_response(&response).await.is_err() {
                        break;
                    }
                }
            }

            if self.state == ConnectionState::LoggingOut {
                break;
            }
        }

        info!(session = %self.ctx.session_id, "connection closed");
    }

    /// Parses the verb (plus optional scope prefix) and dispatches.
    /// Returns the text of the tagged OK; handlers emit untagged data
    /// themselves but never the tagged response or the line terminator.
    async fn process_command(&mut self, tag: &str) -> Result<String, HandlerError> {
        let first = self.stream.read_atom().await?;
        if first.is_empty() {
            return Err(HandlerError::Protocol("missing command".into()));
        }

        let (scope, verb) = match SelectionScope::parse(&first) {
            Some(scope) => {
                let verb = self.stream.read_atom().await?;
                (scope, verb.to_ascii_uppercase())
            }
            None => (SelectionScope::None, first.to_ascii_uppercase()),
        };

        debug!(session = %self.ctx.session_id, tag, verb = %verb, "dispatching command");
        handler::dispatch(self, scope, &verb).await
    }

    /// Requires a state at least as far along as `required`.
    pub(crate) fn require_state(&self, required: ConnectionState) -> Result<(), HandlerError> {
        let rank = |s: ConnectionState| match s {
            ConnectionState::New => 0,
            ConnectionState::Authenticating => 1,
            ConnectionState::Authenticated => 2,
            ConnectionState::Selected => 3,
            ConnectionState::LoggingOut => 4,
        };
        if rank(self.state) < rank(required) {
            return Err(HandlerError::Protocol(format!(
                "command not permitted in state {:?}",
                self.state
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
