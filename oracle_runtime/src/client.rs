//! Ledger access seam.
//!
//! Coordinators talk to each layer only through `LedgerClient`. The
//! simulated cluster implements it for tests; an RPC client would too.

use std::sync::Arc;

use oracle_program::domain::{Account, Layer};
use oracle_program::pubkey::Pubkey;

use crate::error::RuntimeError;
use crate::transaction::{Signature, Transaction};

/// Latest blockhash a transaction is stamped with.
pub type Blockhash = [u8; 32];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("transport: {0}")]
    Transport(String),
    /// The ephemeral layer has not picked up the delegation of `0` yet.
    #[error("account {0} is not delegated to this layer")]
    AccountNotDelegated(Pubkey),
    /// Preflight rejected the transaction; `program` is the one that failed.
    #[error("transaction rejected by {program} with code {code}: {message}")]
    Rejected {
        program: Pubkey,
        code: u32,
        message: String,
    },
}

impl From<ClientError> for RuntimeError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Transport(msg) => RuntimeError::Transport(msg),
            ClientError::AccountNotDelegated(key) => RuntimeError::NotYetDelegated(key),
            ClientError::Rejected {
                program,
                code,
                message,
            } => RuntimeError::Program {
                program: Some(program),
                code,
                message,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    Processed,
    Confirmed,
    Failed { code: u32, message: String },
}

pub trait LedgerClient: Send + Sync {
    fn layer(&self) -> Layer;
    fn latest_blockhash(&self) -> Result<Blockhash, ClientError>;
    fn send_transaction(&self, tx: &Transaction) -> Result<Signature, ClientError>;
    /// `None` while the signature is unknown to the layer.
    fn signature_status(&self, signature: &Signature) -> Result<Option<TransactionStatus>, ClientError>;
    fn get_account(&self, key: &Pubkey) -> Result<Option<Account>, ClientError>;
}

/// Clients for both layers.
#[derive(Clone)]
pub struct Ledgers {
    pub base: Arc<dyn LedgerClient>,
    pub ephemeral: Arc<dyn LedgerClient>,
}

impl Ledgers {
    pub fn new(base: Arc<dyn LedgerClient>, ephemeral: Arc<dyn LedgerClient>) -> Self {
        Self { base, ephemeral }
    }

    pub fn on(&self, layer: Layer) -> &dyn LedgerClient {
        match layer {
            Layer::Base => self.base.as_ref(),
            Layer::Ephemeral => self.ephemeral.as_ref(),
        }
    }
}
