// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Storage layer: per-session data store over the embedded relational
//! database, transaction discipline, change-notification collection and
//! external payload files.

mod bus;
mod collector;
mod datastore;
mod external;
mod schema;
mod store;
mod transaction;

pub use bus::{NotificationBus, Subscriber, SubscriberFilter, DEFAULT_QUEUE_DEPTH};
pub use collector::NotificationCollector;
pub use datastore::{DataStore, StorageError};
pub use external::{
    external_file_name, verify_external_part, write_external_file, EXTERNAL_PAYLOAD_THRESHOLD,
};
pub use schema::SCHEMA_VERSION;
pub use transaction::Transaction;
