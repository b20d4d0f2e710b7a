#![forbid(unsafe_code)]

/// Program kernel v1. Layout or wire changes require a new version.
pub const PROGRAM_VERSION: u32 = 1;

pub mod error;
pub mod pubkey;
pub mod discriminator;
pub mod wire;
pub mod domain;
pub mod lifecycle;
pub mod account_codec;
pub mod instructions;
pub mod compiled;
pub mod invariants;
pub mod effects;
pub mod processor;

