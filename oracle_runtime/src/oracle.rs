//! Oracle requests and answer polling.
//!
//! There is no request token. An answer is recognised only by the record's
//! response buffer going from empty to non-empty, so each record carries at
//! most one outstanding request. A poll timeout leaves the request
//! outstanding; the caller either polls again or abandons it.

use tracing::{info, warn};

use oracle_program::domain::Layer;
use oracle_program::pubkey::Pubkey;

use crate::context::RuntimeContext;
use crate::error::{lifecycle_error, RuntimeError};
use crate::poll::{poll_until, PollOutcome, PollPolicy};
use crate::record::fetch;
use crate::registry::{OutstandingRequest, RecordOp};

pub struct OracleRequestManager {
    ctx: RuntimeContext,
}

impl OracleRequestManager {
    pub fn new(ctx: RuntimeContext) -> Self {
        Self { ctx }
    }

    /// Post `prompt` through a fresh interaction account. Returns the
    /// interaction identity without waiting for an answer.
    pub fn ask(&self, record: &Pubkey, prompt: &str) -> Result<Pubkey, RuntimeError> {
        let entry = self.ctx.registry.require(record)?;
        if entry.outstanding.is_some() {
            return Err(RuntimeError::RequestOutstanding(*record));
        }
        let layer = entry.status.require_writable("ask").map_err(lifecycle_error)?;

        let interaction = self.ctx.fresh_identity("interaction", record);
        let ix = self.ctx.builder().ask_oracle(&entry.payer, &interaction, prompt)?;
        let signature = self.ctx.submit(layer, entry.payer, &[], vec![ix])?;
        self.ctx.registry.apply(RecordOp::AskSubmitted {
            record: *record,
            request: OutstandingRequest {
                interaction,
                prompt: prompt.to_string(),
                layer,
                signature: signature.clone(),
            },
        })?;
        info!(%record, %interaction, %layer, %signature, "oracle request submitted");
        Ok(interaction)
    }

    /// Re-read the record until its response buffer is non-empty.
    ///
    /// Timing out is an expected outcome, not an error. Only the read is
    /// repeated; the request is never resubmitted.
    pub fn poll_for_response(&self, record: &Pubkey, policy: &PollPolicy) -> Result<PollOutcome<String>, RuntimeError> {
        let entry = self.ctx.registry.require(record)?;
        let layer = entry
            .outstanding
            .as_ref()
            .map(|r| r.layer)
            .or_else(|| entry.status.write_layer())
            .unwrap_or(Layer::Base);
        let client = self.ctx.ledgers.on(layer);

        let outcome = poll_until(
            "oracle answer",
            policy,
            self.ctx.clock.as_ref(),
            &self.ctx.cancel,
            |_| match fetch(client, record)? {
                Some(view) => view.response(record),
                None => Ok(None),
            },
        )?;

        match &outcome {
            PollOutcome::Ready(response) => {
                if entry.outstanding.is_some() {
                    self.ctx.registry.apply(RecordOp::AnswerObserved {
                        record: *record,
                        response: response.clone(),
                    })?;
                }
                info!(%record, len = response.len(), "oracle answer received");
            }
            PollOutcome::TimedOut { attempts } => {
                warn!(%record, attempts, "no oracle answer yet");
            }
            PollOutcome::Cancelled => {}
        }
        Ok(outcome)
    }

    pub fn outstanding(&self, record: &Pubkey) -> Option<OutstandingRequest> {
        self.ctx.registry.entry(record).and_then(|e| e.outstanding)
    }

    /// Stop waiting for the outstanding request so a new one may be issued.
    /// A late answer to the abandoned request may still land.
    pub fn abandon(&self, record: &Pubkey) -> Result<Option<OutstandingRequest>, RuntimeError> {
        let entry = self.ctx.registry.require(record)?;
        if let Some(request) = entry.outstanding {
            self.ctx
                .registry
                .apply(RecordOp::RequestAbandoned { record: *record })?;
            warn!(%record, interaction = %request.interaction, "oracle request abandoned");
            return Ok(Some(request));
        }
        Ok(None)
    }
}
