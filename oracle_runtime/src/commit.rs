//! Flushes of ephemeral state to the base layer.
//!
//! The flush instruction is accepted at once and lands later, so
//! visibility on the base layer is always polled for.

use tracing::{debug, info, warn};

use oracle_program::domain::Layer;
use oracle_program::lifecycle::DelegationStatus;
use oracle_program::pubkey::Pubkey;

use crate::context::RuntimeContext;
use crate::error::RuntimeError;
use crate::poll::{poll_until, PollOutcome};
use crate::record::fetch;
use crate::registry::{PendingCommit, RecordOp};
use crate::transaction::Signature;

pub struct CommitCoordinator {
    ctx: RuntimeContext,
}

impl CommitCoordinator {
    pub fn new(ctx: RuntimeContext) -> Self {
        Self { ctx }
    }

    /// Request a flush of the record's ephemeral state.
    ///
    /// Committing unchanged state is accepted and changes nothing.
    pub fn commit(&self, record: &Pubkey) -> Result<Signature, RuntimeError> {
        let entry = self.ctx.registry.require(record)?;
        if entry.status != DelegationStatus::EphemeralResident {
            return Err(RuntimeError::InvalidState {
                operation: "commit",
                status: entry.status,
            });
        }

        let ix = self.ctx.builder().update_commit(&entry.payer)?;
        let signature = self.ctx.submit(Layer::Ephemeral, entry.payer, &[], vec![ix])?;

        // The flush snapshots the record when it executes, which can be
        // after an answer written while the send was being retried.
        let data_hash = fetch(self.ctx.ledgers.ephemeral.as_ref(), record)?
            .ok_or(RuntimeError::NotYetDelegated(*record))?
            .data_hash();
        let flushed = fetch(self.ctx.ledgers.base.as_ref(), record)?
            .map(|v| v.data_hash() == data_hash)
            .unwrap_or(false);
        if flushed {
            debug!(%record, "nothing new to flush");
        }

        self.ctx.registry.apply(RecordOp::CommitSubmitted {
            record: *record,
            commit: PendingCommit {
                signature: signature.clone(),
                data_hash,
            },
        })?;
        info!(%record, %signature, "commit submitted");
        Ok(signature)
    }

    /// Poll until the committed state is visible on the base layer.
    pub fn await_commit(&self, record: &Pubkey) -> Result<PollOutcome<()>, RuntimeError> {
        wait_for_landing(&self.ctx, record)
    }

    pub fn in_flight(&self, record: &Pubkey) -> Option<PendingCommit> {
        self.ctx.registry.entry(record).and_then(|e| e.commit)
    }
}

/// Wait for the record's in-flight commit, if any, to land on the base layer.
pub(crate) fn wait_for_landing(ctx: &RuntimeContext, record: &Pubkey) -> Result<PollOutcome<()>, RuntimeError> {
    let pending = match ctx.registry.require(record)?.commit {
        Some(p) => p,
        None => return Ok(PollOutcome::Ready(())),
    };

    let base = ctx.ledgers.base.as_ref();
    let ephemeral = ctx.ledgers.ephemeral.as_ref();
    let outcome = poll_until(
        "commit",
        &ctx.policies.commit,
        ctx.clock.as_ref(),
        &ctx.cancel,
        |_| {
            let landed = match fetch(base, record)? {
                Some(view) => view.data_hash(),
                None => return Ok(None),
            };
            if landed == pending.data_hash {
                return Ok(Some(()));
            }
            // Base already matches the ephemeral copy: nothing is left to flush.
            let current = fetch(ephemeral, record)?.map(|v| v.data_hash());
            Ok((current.as_deref() == Some(landed.as_str())).then_some(()))
        },
    )?;

    match &outcome {
        PollOutcome::Ready(()) => {
            ctx.registry.apply(RecordOp::CommitLanded { record: *record })?;
            info!(%record, signature = %pending.signature, "commit landed");
        }
        PollOutcome::TimedOut { attempts } => {
            warn!(%record, attempts, "commit not yet visible on base layer");
        }
        PollOutcome::Cancelled => {}
    }
    Ok(outcome)
}
