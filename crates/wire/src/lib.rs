// SPDX-License-Identifier: MIT

//! Wire protocol for client/server communication.
//!
//! Line-framed, IMAP-derived: commands are `<TAG> <VERB> <ARGS...>\r\n`,
//! responses are `<tag> OK|NO|BAD <text>`, untagged lines start with `*`,
//! continuations with `+`. Arguments support quoted strings, parenthesized
//! lists and `{N}` literal blocks streamed without full buffering.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod imap_set;
mod quote;
mod response;
mod scope;
mod stream;

pub use imap_set::{ImapInterval, ImapSet};
pub use quote::{join, quoted};
pub use response::{Response, ResultCode};
pub use scope::SelectionScope;
pub use stream::{ImapStream, ProtocolError};

#[cfg(test)]
mod property_tests;
