//! 32-byte account identities and deterministic address derivation.
//!
//! Derived addresses: `sha256(seeds.. || [bump] || program_id || PDA_MARKER)`.
//! The canonical bump is the first candidate, `u8::MAX`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::ProgramError;

/// Domain separator appended to every derived-address preimage.
pub const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

/// Maximum number of seeds per derivation (bump excluded).
pub const MAX_SEEDS: usize = 16;

/// Maximum length of a single seed.
pub const MAX_SEED_LEN: usize = 32;

/// Account identity. Displayed and serialized as lowercase hex.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pubkey([u8; 32]);

impl Pubkey {
    pub const fn new_from_array(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn as_ref_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Identity whose bytes are the SHA-256 of `label`. Used for
    /// well-known test identities and fresh per-request identities.
    pub fn hashed(label: &[u8]) -> Self {
        let digest = Sha256::digest(label);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }
}

impl AsRef<[u8]> for Pubkey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 hex chars are enough to tell keys apart in logs.
        write!(f, "Pubkey({})", &hex::encode(self.0)[..8])
    }
}

/// Failure to parse a hex identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid pubkey {input:?}: {reason}")]
pub struct ParsePubkeyError {
    pub input: String,
    pub reason: String,
}

impl FromStr for Pubkey {
    type Err = ParsePubkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| ParsePubkeyError {
            input: s.to_string(),
            reason: e.to_string(),
        })?;
        let arr: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| ParsePubkeyError {
            input: s.to_string(),
            reason: format!("expected 32 bytes, got {}", v.len()),
        })?;
        Ok(Self(arr))
    }
}

impl Serialize for Pubkey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Pubkey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Address for `seeds` (which must already include the bump) under
/// `program_id`.
pub fn create_program_address(
    seeds: &[&[u8]],
    program_id: &Pubkey,
) -> Result<Pubkey, ProgramError> {
    if seeds.len() > MAX_SEEDS + 1 {
        return Err(ProgramError::MaxSeedLengthExceeded);
    }
    let mut hasher = Sha256::new();
    for seed in seeds {
        if seed.len() > MAX_SEED_LEN {
            return Err(ProgramError::MaxSeedLengthExceeded);
        }
        hasher.update(seed);
    }
    hasher.update(program_id.as_ref());
    hasher.update(PDA_MARKER);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    Ok(Pubkey(out))
}

/// Canonical derived address and bump for `seeds` under `program_id`.
pub fn find_program_address(
    seeds: &[&[u8]],
    program_id: &Pubkey,
) -> Result<(Pubkey, u8), ProgramError> {
    let bump = [u8::MAX];
    let mut with_bump: Vec<&[u8]> = seeds.to_vec();
    with_bump.push(&bump);
    let address = create_program_address(&with_bump, program_id)?;
    Ok((address, bump[0]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let key = Pubkey::hashed(b"alice");
        let text = key.to_string();
        assert_eq!(text.len(), 64);
        assert_eq!(text.parse::<Pubkey>().unwrap(), key);
    }

    #[test]
    fn parse_rejects_short_input() {
        let err = "abcd".parse::<Pubkey>().unwrap_err();
        assert!(err.reason.contains("expected 32 bytes"));
    }

    #[test]
    fn derivation_is_deterministic_and_program_scoped() {
        let payer = Pubkey::hashed(b"payer");
        let prog_a = Pubkey::hashed(b"program-a");
        let prog_b = Pubkey::hashed(b"program-b");

        let (a1, bump) = find_program_address(&[b"user", payer.as_ref()], &prog_a).unwrap();
        let (a2, _) = find_program_address(&[b"user", payer.as_ref()], &prog_a).unwrap();
        let (b1, _) = find_program_address(&[b"user", payer.as_ref()], &prog_b).unwrap();

        assert_eq!(a1, a2);
        assert_ne!(a1, b1);
        assert_eq!(bump, 255);
        assert_eq!(
            create_program_address(&[b"user", payer.as_ref(), &[bump]], &prog_a).unwrap(),
            a1
        );
    }

    #[test]
    fn oversized_seed_is_rejected() {
        let long = [7u8; 33];
        let prog = Pubkey::hashed(b"p");
        assert!(matches!(
            find_program_address(&[&long], &prog),
            Err(ProgramError::MaxSeedLengthExceeded)
        ));
    }

    #[test]
    fn serde_uses_hex_string() {
        let key = Pubkey::new_from_array([1u8; 32]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
        let back: Pubkey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
