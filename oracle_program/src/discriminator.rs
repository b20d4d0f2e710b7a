/// Discriminators: the 8-byte type tags prefixed to instruction data,
/// account data and emitted events.
///
/// Rule: `sha256("<namespace>:<name>")[..8]`, with namespaces
/// `global` (instructions), `account` (account types), `event` (events).

use sha2::{Digest, Sha256};

pub const DISCRIMINATOR_LEN: usize = 8;

pub type Discriminator = [u8; DISCRIMINATOR_LEN];

/// First eight bytes of `sha256("{namespace}:{name}")`.
pub fn sighash(namespace: &str, name: &str) -> Discriminator {
    let preimage = format!("{}:{}", namespace, name);
    let digest = Sha256::digest(preimage.as_bytes());
    let mut out = [0u8; DISCRIMINATOR_LEN];
    out.copy_from_slice(&digest[..DISCRIMINATOR_LEN]);
    out
}

/// Tag for an instruction handler (snake_case name).
pub fn instruction(name: &str) -> Discriminator {
    sighash("global", name)
}

/// Tag for an account type (CamelCase name).
pub fn account(name: &str) -> Discriminator {
    sighash("account", name)
}

/// Tag for an emitted event (CamelCase name).
pub fn event(name: &str) -> Discriminator {
    sighash("event", name)
}

/// Lowercase hex, for logs.
pub fn to_hex(d: &Discriminator) -> String {
    hex::encode(d)
}
