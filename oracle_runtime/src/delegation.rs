//! Delegation lifecycle driver.
//!
//!   BaseResident → Delegating → EphemeralResident → Undelegating → BaseResident
//!
//! Transitions from the wrong state fail before anything is sent.
//! Completion of each handoff is observed by polling, never assumed.

use tracing::{info, warn};

use oracle_program::domain::Layer;
use oracle_program::lifecycle::DelegationStatus;
use oracle_program::pubkey::Pubkey;

use crate::commit::wait_for_landing;
use crate::context::RuntimeContext;
use crate::error::{lifecycle_error, RuntimeError};
use crate::poll::{poll_until, PollOutcome};
use crate::record::{fetch, observe};
use crate::registry::RecordOp;
use crate::transaction::Signature;

pub struct DelegationController {
    ctx: RuntimeContext,
}

impl DelegationController {
    pub fn new(ctx: RuntimeContext) -> Self {
        Self { ctx }
    }

    /// Create `payer`'s record on the base layer and start tracking it.
    pub fn initialize(&self, payer: &Pubkey) -> Result<Pubkey, RuntimeError> {
        let record = self.ctx.record_address(payer)?;
        let ix = self.ctx.builder().initialize(payer)?;
        let signature = self.ctx.submit(Layer::Base, *payer, &[], vec![ix])?;
        self.ctx.registry.apply(RecordOp::Tracked {
            record,
            payer: *payer,
            status: DelegationStatus::BaseResident,
        })?;
        info!(%record, %signature, "record initialized");
        Ok(record)
    }

    /// Start tracking an existing record at whatever status the layers show.
    pub fn track(&self, payer: &Pubkey) -> Result<Pubkey, RuntimeError> {
        let record = self.ctx.record_address(payer)?;
        let status = observe(&self.ctx.ledgers, &self.ctx.identities, &record, None)?
            .ok_or(RuntimeError::UnknownRecord(record))?;
        self.ctx.registry.apply(RecordOp::Tracked {
            record,
            payer: *payer,
            status,
        })?;
        info!(%record, ?status, "tracking record");
        Ok(record)
    }

    /// Hand the record to `validator`'s ephemeral layer (default validator
    /// when `None`). Leaves the record `Delegating`.
    pub fn delegate(&self, record: &Pubkey, validator: Option<Pubkey>) -> Result<Signature, RuntimeError> {
        let entry = self.ctx.registry.require(record)?;
        entry.status.begin_delegate().map_err(lifecycle_error)?;

        let validator = validator.unwrap_or(self.ctx.identities.default_validator);
        let ix = self.ctx.builder().delegate(&entry.payer, &validator)?;
        let signature = self.ctx.submit(Layer::Base, entry.payer, &[], vec![ix])?;
        self.ctx.registry.apply(RecordOp::DelegateSubmitted {
            record: *record,
            signature: signature.clone(),
        })?;
        info!(%record, %validator, %signature, "delegation submitted");
        Ok(signature)
    }

    /// Poll the ephemeral layer until it holds the record.
    pub fn await_delegation(&self, record: &Pubkey) -> Result<PollOutcome<DelegationStatus>, RuntimeError> {
        let entry = self.ctx.registry.require(record)?;
        if entry.status != DelegationStatus::Delegating {
            return Err(RuntimeError::InvalidState {
                operation: "await delegation",
                status: entry.status,
            });
        }

        let program_id = self.ctx.identities.program_id;
        let ephemeral = self.ctx.ledgers.ephemeral.as_ref();
        let outcome = poll_until(
            "delegation",
            &self.ctx.policies.propagation,
            self.ctx.clock.as_ref(),
            &self.ctx.cancel,
            |_| Ok(fetch(ephemeral, record)?.filter(|v| v.owner == program_id).map(|_| ())),
        )?;

        match outcome {
            PollOutcome::Ready(()) => {
                self.ctx
                    .registry
                    .apply(RecordOp::DelegationObserved { record: *record })?;
                info!(%record, "record is ephemeral-resident");
                Ok(PollOutcome::Ready(DelegationStatus::EphemeralResident))
            }
            PollOutcome::TimedOut { attempts } => {
                warn!(%record, attempts, "delegation not yet visible");
                Ok(PollOutcome::TimedOut { attempts })
            }
            PollOutcome::Cancelled => Ok(PollOutcome::Cancelled),
        }
    }

    /// Commit and return authority to the base layer. Waits for any commit
    /// in flight to land first. Leaves the record `Undelegating`.
    pub fn undelegate(&self, record: &Pubkey) -> Result<Signature, RuntimeError> {
        let entry = self.ctx.registry.require(record)?;
        entry.status.begin_undelegate().map_err(lifecycle_error)?;
        if entry.outstanding.is_some() {
            warn!(%record, "undelegating with an oracle request outstanding");
        }

        if entry.commit.is_some() {
            wait_for_landing(&self.ctx, record)?.into_result("in-flight commit")?;
        }

        let ix = self.ctx.builder().undelegate(&entry.payer)?;
        let signature = self.ctx.submit(Layer::Ephemeral, entry.payer, &[], vec![ix])?;
        self.ctx.registry.apply(RecordOp::UndelegateSubmitted {
            record: *record,
            signature: signature.clone(),
        })?;
        info!(%record, %signature, "undelegation submitted");
        Ok(signature)
    }

    /// Poll the base layer until the program owns the record again.
    pub fn await_undelegation(&self, record: &Pubkey) -> Result<PollOutcome<DelegationStatus>, RuntimeError> {
        let entry = self.ctx.registry.require(record)?;
        if entry.status != DelegationStatus::Undelegating {
            return Err(RuntimeError::InvalidState {
                operation: "await undelegation",
                status: entry.status,
            });
        }

        let program_id = self.ctx.identities.program_id;
        let base = self.ctx.ledgers.base.as_ref();
        let outcome = poll_until(
            "undelegation",
            &self.ctx.policies.commit,
            self.ctx.clock.as_ref(),
            &self.ctx.cancel,
            |_| Ok(fetch(base, record)?.filter(|v| v.owner == program_id).map(|_| ())),
        )?;

        match outcome {
            PollOutcome::Ready(()) => {
                self.ctx
                    .registry
                    .apply(RecordOp::UndelegationObserved { record: *record })?;
                info!(%record, "record is base-resident");
                Ok(PollOutcome::Ready(DelegationStatus::BaseResident))
            }
            PollOutcome::TimedOut { attempts } => {
                warn!(%record, attempts, "undelegation not yet visible");
                Ok(PollOutcome::TimedOut { attempts })
            }
            PollOutcome::Cancelled => Ok(PollOutcome::Cancelled),
        }
    }

    /// Status as last recorded by this runtime.
    pub fn status(&self, record: &Pubkey) -> Option<DelegationStatus> {
        self.ctx.registry.status(record)
    }

    /// Status as the two layers currently show it.
    pub fn observe(&self, record: &Pubkey) -> Result<Option<DelegationStatus>, RuntimeError> {
        observe(
            &self.ctx.ledgers,
            &self.ctx.identities,
            record,
            self.ctx.registry.status(record),
        )
    }
}
