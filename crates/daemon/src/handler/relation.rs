// SPDX-License-Identifier: MIT

//! Relation handlers: RELATIONSTORE, RELATIONREMOVE, RELATIONFETCH.

use tokio::io::{AsyncRead, AsyncWrite};

use satchel_storage::Transaction;
use satchel_wire::quoted;

use super::HandlerError;
use crate::connection::{Connection, ConnectionState};

#[derive(Default)]
struct RelationArgs {
    left: Option<i64>,
    right: Option<i64>,
    side: Option<i64>,
    type_name: Option<String>,
    remote_id: Option<String>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// `<tag> [UID] RELATIONSTORE LEFT <id> RIGHT <id> TYPE <name>
    /// [REMOTEID <rid>]`
    pub(crate) async fn relation_store(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        let args = self.read_relation_args().await?;
        let (left, right) = require_pair(&args)?;
        let type_name = args
            .type_name
            .as_deref()
            .ok_or_else(|| HandlerError::Protocol("missing relation TYPE".into()))?;

        // Re-storing an existing relation is idempotent.
        let existing =
            self.db.relations_matching(Some(left), Some(right), None, Some(type_name))?;
        if !existing.is_empty() {
            return Ok("Store completed".into());
        }

        let mut txn = Transaction::begin(&mut self.db)?;
        txn.store().insert_relation(left, right, type_name, args.remote_id.as_deref())?;
        txn.commit()?;
        Ok("Store completed".into())
    }

    /// `<tag> [UID] RELATIONREMOVE LEFT <id> RIGHT <id> [TYPE <name>]`
    ///
    /// Without TYPE every relation on the pair is removed.
    pub(crate) async fn relation_remove(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        let args = self.read_relation_args().await?;
        let (left, right) = require_pair(&args)?;

        let mut txn = Transaction::begin(&mut self.db)?;
        txn.store().remove_relations(left, right, args.type_name.as_deref())?;
        txn.commit()?;
        Ok("RELATIONREMOVE complete".into())
    }

    /// `<tag> [UID] RELATIONFETCH [LEFT <id>] [RIGHT <id>] [SIDE <id>]
    /// [TYPE <name>]`: emits one untagged line per matching relation.
    pub(crate) async fn relation_fetch(&mut self) -> Result<String, HandlerError> {
        self.require_state(ConnectionState::Authenticated)?;
        let args = self.read_relation_args().await?;

        let matching = self.db.relations_matching(
            args.left,
            args.right,
            args.side,
            args.type_name.as_deref(),
        )?;
        for (relation, type_name) in matching {
            let line = format!(
                "RELATIONFETCH (LEFT {} RIGHT {} TYPE {} REMOTEID {})",
                relation.left_id,
                relation.right_id,
                quoted(&type_name),
                quoted(&relation.remote_id)
            );
            self.stream.send_untagged(line.as_bytes()).await?;
        }
        Ok("RELATIONFETCH completed".into())
    }

    async fn read_relation_args(&mut self) -> Result<RelationArgs, HandlerError> {
        let mut args = RelationArgs::default();
        while !self.stream.at_command_end().await? {
            let key = self.stream.read_atom().await?;
            match key.to_ascii_uppercase().as_str() {
                "LEFT" => args.left = Some(self.stream.read_number().await?),
                "RIGHT" => args.right = Some(self.stream.read_number().await?),
                "SIDE" => args.side = Some(self.stream.read_number().await?),
                "TYPE" => args.type_name = Some(self.stream.read_utf8_string().await?),
                "REMOTEID" => args.remote_id = Some(self.stream.read_utf8_string().await?),
                other => {
                    return Err(HandlerError::Protocol(format!(
                        "unknown relation argument {other}"
                    )))
                }
            }
        }
        Ok(args)
    }
}

fn require_pair(args: &RelationArgs) -> Result<(i64, i64), HandlerError> {
    match (args.left, args.right) {
        (Some(left), Some(right)) => Ok((left, right)),
        _ => Err(HandlerError::Protocol("relation needs LEFT and RIGHT".into())),
    }
}
