/// Core domain types: layers, accounts, instructions, identities.
///
/// Pure data. Processing lives in `processor`, layout in `account_codec`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pubkey::Pubkey;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Seed prefix of the per-user record: `["user", payer]`.
pub const USER_SEED: &[u8] = b"user";

/// Seed of the program's task-queue signing authority: `["queue_authority"]`.
pub const QUEUE_AUTHORITY_SEED: &[u8] = b"queue_authority";

/// Seed prefix of a queue's registered-authority record under the task-queue
/// program: `["task_queue_authority", queue, authority]`.
pub const TASK_QUEUE_AUTHORITY_SEED: &[u8] = b"task_queue_authority";

/// Largest response the record can hold.
pub const MAX_RESPONSE_LEN: usize = 512;

/// Discriminator + bump + length prefix.
pub const USER_ACCOUNT_HEADER_LEN: usize = 8 + 1 + 4;

/// Allocated size of a user record.
pub const USER_ACCOUNT_SPACE: usize = USER_ACCOUNT_HEADER_LEN + MAX_RESPONSE_LEN;

/// Account type name used for the record discriminator.
pub const USER_ACCOUNT_NAME: &str = "UserAccount";

/// The system program identity (all zero bytes).
pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::new_from_array([0u8; 32]);

const LAMPORTS_PER_BYTE_YEAR: u64 = 3480;
const EXEMPTION_YEARS: u64 = 2;
const ACCOUNT_STORAGE_OVERHEAD: u64 = 128;

/// Minimum balance for an account of `space` bytes to be rent exempt.
pub fn rent_exempt_minimum(space: usize) -> u64 {
    (ACCOUNT_STORAGE_OVERHEAD + space as u64) * LAMPORTS_PER_BYTE_YEAR * EXEMPTION_YEARS
}

// ----------------------------------------------------------------------------
// Layers
// ----------------------------------------------------------------------------

/// The two execution layers a record can live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Base,
    Ephemeral,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Base => f.write_str("base"),
            Layer::Ephemeral => f.write_str("ephemeral"),
        }
    }
}

// ----------------------------------------------------------------------------
// Accounts
// ----------------------------------------------------------------------------

/// Ledger account as seen by a program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub owner: Pubkey,
    pub lamports: u64,
    pub data: Vec<u8>,
}

impl Account {
    pub fn new(owner: Pubkey, lamports: u64, space: usize) -> Self {
        Self {
            owner,
            lamports,
            data: vec![0u8; space],
        }
    }

    /// A system-owned wallet holding only lamports.
    pub fn wallet(lamports: u64) -> Self {
        Self::new(SYSTEM_PROGRAM_ID, lamports, 0)
    }
}

/// Accounts visible to one instruction, keyed by identity.
pub type AccountStore = BTreeMap<Pubkey, Account>;

/// One account reference inside an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMeta {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn writable(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: true,
        }
    }

    pub fn readonly(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: false,
        }
    }
}

/// A fully-addressed instruction: target program, ordered metas, opaque data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

// ----------------------------------------------------------------------------
// Record
// ----------------------------------------------------------------------------

/// Decoded contents of a user record (the StateStore).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub bump: u8,
    pub last_response: String,
}

/// Event emitted when an oracle answer is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub record: Pubkey,
    pub response: String,
}

impl AgentEvent {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "event_type": "agent_event",
            "record": self.record.to_string(),
            "response": self.response,
        })
    }
}

// ----------------------------------------------------------------------------
// Identities
// ----------------------------------------------------------------------------

/// Resolved identity table. Supplied by configuration, never derived from
/// literals inside processing logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Identities {
    /// This program.
    pub program_id: Pubkey,
    /// External oracle program.
    pub oracle_program: Pubkey,
    /// Signer the oracle uses when delivering answers.
    pub oracle_identity: Pubkey,
    /// Shared oracle bookkeeping/context account.
    pub oracle_context: Pubkey,
    /// Ephemeral-layer program that accepts commit/undelegate requests.
    pub magic_program: Pubkey,
    /// Context account consumed by the magic program.
    pub magic_context: Pubkey,
    /// Base-layer program that holds delegated records.
    pub delegation_program: Pubkey,
    /// External task-queue program.
    pub task_queue_program: Pubkey,
    /// Queue used when the caller names none.
    pub default_queue: Pubkey,
    /// Ephemeral validator used when the caller names none.
    pub default_validator: Pubkey,
}
