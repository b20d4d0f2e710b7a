//! Wiring shared by every coordinator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use oracle_program::domain::{Identities, Instruction, Layer};
use oracle_program::instructions::{user_record_address, InstructionBuilder};
use oracle_program::pubkey::Pubkey;

use crate::client::Ledgers;
use crate::config::PollPolicies;
use crate::error::RuntimeError;
use crate::poll::{CancellationToken, Clock};
use crate::registry::RecordRegistry;
use crate::transaction::{send_and_confirm, Signature};

static FRESH_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Clone)]
pub struct RuntimeContext {
    pub ledgers: Ledgers,
    pub identities: Identities,
    pub policies: PollPolicies,
    pub clock: Arc<dyn Clock>,
    pub cancel: CancellationToken,
    pub registry: RecordRegistry,
}

impl RuntimeContext {
    pub fn new(
        ledgers: Ledgers,
        identities: Identities,
        policies: PollPolicies,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledgers,
            identities,
            policies,
            clock,
            cancel: CancellationToken::new(),
            registry: RecordRegistry::new(),
        }
    }

    pub fn builder(&self) -> InstructionBuilder<'_> {
        InstructionBuilder::new(&self.identities)
    }

    pub fn record_address(&self, payer: &Pubkey) -> Result<Pubkey, RuntimeError> {
        Ok(user_record_address(&self.identities.program_id, payer)?.0)
    }

    /// Submit on `layer`, retrying propagation delays and transport
    /// failures, then wait for confirmation.
    pub fn submit(
        &self,
        layer: Layer,
        fee_payer: Pubkey,
        extra_signers: &[Pubkey],
        instructions: Vec<Instruction>,
    ) -> Result<Signature, RuntimeError> {
        send_and_confirm(
            self.ledgers.on(layer),
            fee_payer,
            extra_signers,
            instructions,
            &self.policies,
            self.clock.as_ref(),
            &self.cancel,
        )
    }

    /// A never-before-used identity for a single-use account.
    pub fn fresh_identity(&self, label: &str, anchor: &Pubkey) -> Pubkey {
        let n = FRESH_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut preimage = Vec::with_capacity(label.len() + 32 + 24);
        preimage.extend_from_slice(label.as_bytes());
        preimage.extend_from_slice(anchor.as_ref());
        preimage.extend_from_slice(&self.clock.now().as_nanos().to_le_bytes());
        preimage.extend_from_slice(&n.to_le_bytes());
        Pubkey::hashed(&preimage)
    }
}
