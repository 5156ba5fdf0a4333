//! # palaver-store
//!
//! Local persistence for the palaver messaging core, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model.  Cross-row invariants (friendship pair uniqueness, private-chat
//! pair uniqueness) are enforced by the schema itself, not by callers.

pub mod chats;
pub mod database;
pub mod friendships;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;
mod sql;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
