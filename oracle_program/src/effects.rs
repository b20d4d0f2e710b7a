/// Requests the program makes of external programs.
///
/// The kernel never calls out. It returns these and the hosting layer routes
/// them to the delegation layer, the oracle, or the task queue.

use serde::{Deserialize, Serialize};

use crate::compiled::CompiledTransaction;
use crate::discriminator::Discriminator;
use crate::domain::{AccountMeta, AgentEvent};
use crate::pubkey::Pubkey;

/// Hand `account` to the delegation program for `validator`'s ephemeral layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateRequest {
    pub account: Pubkey,
    pub owner_program: Pubkey,
    pub validator: Pubkey,
    pub seeds: Vec<Vec<u8>>,
}

/// Flush `accounts` from the ephemeral layer to the base layer, and
/// optionally return authority afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub payer: Pubkey,
    pub accounts: Vec<Pubkey>,
    pub undelegate: bool,
}

/// A prompt posted to the oracle, answered later through the callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub payer: Pubkey,
    pub interaction: Pubkey,
    pub context: Pubkey,
    pub prompt: String,
    pub callback_program: Pubkey,
    pub callback_discriminator: Discriminator,
    /// Accounts the oracle passes to the callback after its own identity.
    pub callback_accounts: Vec<AccountMeta>,
}

/// When a queued task becomes runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskTrigger {
    Now,
    Timestamp(i64),
}

/// Enqueue a compiled descriptor on an external task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTaskRequest {
    pub payer: Pubkey,
    pub task_queue: Pubkey,
    pub task_queue_authority: Pubkey,
    pub task: Pubkey,
    pub queue_authority: Pubkey,
    /// Seeds the program signs with as `queue_authority`.
    pub authority_seeds: Vec<Vec<u8>>,
    pub task_id: u16,
    pub trigger: TaskTrigger,
    pub transaction: CompiledTransaction,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Delegate(DelegateRequest),
    Commit(CommitRequest),
    Oracle(OracleRequest),
    QueueTask(QueueTaskRequest),
    Emit(AgentEvent),
    Log(String),
}
