//! # huddle-store
//!
//! Durable conversation storage backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection`. Every multi-row write (sending a message, toggling
//! a reaction, advancing a read cursor) runs in a single IMMEDIATE
//! transaction, and the store is the only authority on message timestamps.

pub mod conversations;
pub mod database;
pub mod directory;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod reactions;
pub mod receipts;

mod codec;
mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
