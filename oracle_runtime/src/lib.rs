#![forbid(unsafe_code)]

//! Oracle Runtime
//!
//! Drives the delegated oracle program from the client side: the
//! delegation lifecycle across the base and ephemeral layers, commits,
//! oracle request/response polling and task scheduling. Every accepted
//! change is journaled per session and replayed on reopen.
//!
//! Program rules live in `oracle_program`; this crate only sequences
//! transactions and observes their effects.

pub mod error;
pub mod config;
pub mod poll;
pub mod client;
pub mod transaction;
pub mod registry;
pub mod context;
pub mod record;
pub mod delegation;
pub mod commit;
pub mod oracle;
pub mod scheduler;
pub mod proto_types;
pub mod proto_bridge;
pub mod journal;
pub mod replay;
pub mod drift;
pub mod session;
pub mod sim;
