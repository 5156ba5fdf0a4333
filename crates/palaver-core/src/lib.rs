//! # palaver-core
//!
//! Domain logic for the palaver messaging core: identity bookkeeping, the
//! friendship graph, chat membership, the message ledger, and the content
//! policy applied to message payloads.
//!
//! The crate is deliberately synchronous: every operation runs to
//! completion over a [`palaver_store::Database`] handle, and all
//! cross-request invariants (friendship pair uniqueness, private-chat
//! deduplication, conditional status transitions) are enforced by the
//! storage schema rather than by read-then-write sequences.
//!
//! Callers are expected to pass an already-authenticated actor id;
//! credential checks, routing and transport belong to the surrounding
//! application.

pub mod chats;
pub mod clock;
pub mod friends;
pub mod identity;
pub mod messages;
pub mod policy;

mod error;

pub use clock::{Clock, SystemClock};
pub use error::{CoreError, PolicyViolation, Result};
