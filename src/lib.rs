//! Client sessions and transactions for the DocStore distributed document
//! database.
//!
//! This crate is the session and transaction core of a DocStore driver. It
//! owns the lifecycle of logical sessions (the [`ServerSession`] LSIDs the
//! server uses to correlate operations), the causal-consistency clocks
//! gossiped on every command, and the per-session transaction state machine
//! with its commit/abort retry rules.
//!
//! The surrounding driver supplies everything else: it implements
//! [`SessionClient`] to dispatch administrative commands and to take back
//! server sessions, calls [`ClientSession::append`] and
//! [`ClientSession::append_txn_fields`] while building outbound commands, and
//! feeds every reply into [`ClientSession::handle_reply`] so the session's
//! cluster time and operation time advance.
//!
//! `ClientSession` instances are not thread safe. Each session may be used by
//! at most one in-flight operation at a time.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub use ::bson;

pub mod options;

mod client;
mod concern;
pub mod error;
mod read_preference;
mod serde_util;

pub use crate::client::{
    session::{ClientSession, ClusterTime, ServerSession, ServerSessionPool},
    session_from_handle,
    SessionClient,
    SessionRegistry,
};
