//! Session manager: one journaled runtime per session directory.
//!
//! Directory structure:
//!   <base_dir>/<session_id>/ops.bin
//!
//! Persist-after-apply order:
//!   1. a coordinator applies its change to the registry (may be rejected)
//!   2. the session drains the accepted ops and appends them to the journal
//!
//! Ops are persisted even when the wrapped operation later fails, so a
//! request sent before a poll timeout is still known after restart.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use oracle_program::compiled::CompiledTransaction;
use oracle_program::domain::Instruction;
use oracle_program::lifecycle::DelegationStatus;
use oracle_program::pubkey::Pubkey;

use crate::commit::CommitCoordinator;
use crate::context::RuntimeContext;
use crate::delegation::DelegationController;
use crate::drift::{self, DriftReport};
use crate::error::RuntimeError;
use crate::journal::Journal;
use crate::oracle::OracleRequestManager;
use crate::poll::{PollOutcome, PollPolicy};
use crate::proto_bridge::entry_to_proto;
use crate::registry::{OutstandingRequest, PendingCommit, SubmittedTask};
use crate::replay;
use crate::scheduler::TaskCompiler;
use crate::transaction::Signature;

pub struct OracleSession {
    session_id: String,
    dir: PathBuf,
    ctx: RuntimeContext,
    journal: Journal,
    delegation: DelegationController,
    commits: CommitCoordinator,
    oracle: OracleRequestManager,
    tasks: TaskCompiler,
}

impl OracleSession {
    /// Open (or create) a session and replay its journal into the
    /// context's registry.
    pub fn open(base_dir: &Path, session_id: &str, ctx: RuntimeContext) -> Result<Self, RuntimeError> {
        let dir = base_dir.join(session_id);
        let journal = Journal::open(&dir.join("ops.bin"))?;

        let entries = journal.load_all()?;
        replay::replay_into(&ctx.registry, &entries)?;
        // Ops queued before the session existed belong to nobody.
        let orphaned = ctx.registry.drain_ops();
        if !orphaned.is_empty() {
            debug!(count = orphaned.len(), "discarding ops applied before session open");
        }
        info!(session = session_id, replayed = entries.len(), "session opened");

        Ok(Self {
            session_id: session_id.to_string(),
            dir,
            delegation: DelegationController::new(ctx.clone()),
            commits: CommitCoordinator::new(ctx.clone()),
            oracle: OracleRequestManager::new(ctx.clone()),
            tasks: TaskCompiler::new(ctx.clone()),
            ctx,
            journal,
        })
    }

    /// Journal every op accepted since the last call. Returns how many
    /// were written. On failure the ops stay queued for the next call.
    pub fn persist(&mut self) -> Result<usize, RuntimeError> {
        let ops = self.ctx.registry.drain_ops();
        if ops.is_empty() {
            return Ok(0);
        }
        let now = self.ctx.clock.now().as_millis() as u64;
        let first = self.journal.next_sequence();
        let entries: Vec<_> = ops
            .iter()
            .enumerate()
            .map(|(i, op)| entry_to_proto(first + i as u64, now, op))
            .collect();
        if let Err(e) = self.journal.append_batch(&entries) {
            warn!(session = %self.session_id, count = ops.len(), error = %e, "journal append failed, ops kept for retry");
            self.ctx.registry.requeue_ops(ops);
            return Err(e.into());
        }
        debug!(session = %self.session_id, written = entries.len(), last = self.journal.last_sequence(), "journal appended");
        Ok(entries.len())
    }

    fn persisted<T>(&mut self, result: Result<T, RuntimeError>) -> Result<T, RuntimeError> {
        self.persist()?;
        result
    }

    // ------------------------------------------------------------------------
    // Delegation
    // ------------------------------------------------------------------------

    pub fn initialize(&mut self, payer: &Pubkey) -> Result<Pubkey, RuntimeError> {
        let r = self.delegation.initialize(payer);
        self.persisted(r)
    }

    pub fn track(&mut self, payer: &Pubkey) -> Result<Pubkey, RuntimeError> {
        let r = self.delegation.track(payer);
        self.persisted(r)
    }

    pub fn delegate(&mut self, record: &Pubkey, validator: Option<Pubkey>) -> Result<Signature, RuntimeError> {
        let r = self.delegation.delegate(record, validator);
        self.persisted(r)
    }

    pub fn await_delegation(&mut self, record: &Pubkey) -> Result<PollOutcome<DelegationStatus>, RuntimeError> {
        let r = self.delegation.await_delegation(record);
        self.persisted(r)
    }

    pub fn undelegate(&mut self, record: &Pubkey) -> Result<Signature, RuntimeError> {
        let r = self.delegation.undelegate(record);
        self.persisted(r)
    }

    pub fn await_undelegation(&mut self, record: &Pubkey) -> Result<PollOutcome<DelegationStatus>, RuntimeError> {
        let r = self.delegation.await_undelegation(record);
        self.persisted(r)
    }

    pub fn status(&self, record: &Pubkey) -> Option<DelegationStatus> {
        self.delegation.status(record)
    }

    pub fn observe(&self, record: &Pubkey) -> Result<Option<DelegationStatus>, RuntimeError> {
        self.delegation.observe(record)
    }

    // ------------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------------

    pub fn commit(&mut self, record: &Pubkey) -> Result<Signature, RuntimeError> {
        let r = self.commits.commit(record);
        self.persisted(r)
    }

    pub fn await_commit(&mut self, record: &Pubkey) -> Result<PollOutcome<()>, RuntimeError> {
        let r = self.commits.await_commit(record);
        self.persisted(r)
    }

    pub fn commit_in_flight(&self, record: &Pubkey) -> Option<PendingCommit> {
        self.commits.in_flight(record)
    }

    // ------------------------------------------------------------------------
    // Oracle
    // ------------------------------------------------------------------------

    pub fn ask(&mut self, record: &Pubkey, prompt: &str) -> Result<Pubkey, RuntimeError> {
        let r = self.oracle.ask(record, prompt);
        self.persisted(r)
    }

    pub fn poll_for_response(&mut self, record: &Pubkey, policy: &PollPolicy) -> Result<PollOutcome<String>, RuntimeError> {
        let r = self.oracle.poll_for_response(record, policy);
        self.persisted(r)
    }

    pub fn outstanding(&self, record: &Pubkey) -> Option<OutstandingRequest> {
        self.oracle.outstanding(record)
    }

    pub fn abandon(&mut self, record: &Pubkey) -> Result<Option<OutstandingRequest>, RuntimeError> {
        let r = self.oracle.abandon(record);
        self.persisted(r)
    }

    // ------------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------------

    pub fn compile(&self, instructions: &[Instruction]) -> Result<CompiledTransaction, RuntimeError> {
        self.tasks.compile(instructions)
    }

    pub fn schedule(
        &mut self,
        record: &Pubkey,
        compiled: CompiledTransaction,
        task_id: u16,
        queue: Option<Pubkey>,
    ) -> Result<SubmittedTask, RuntimeError> {
        let r = self.tasks.submit(record, compiled, task_id, queue);
        self.persisted(r)
    }

    pub fn tasks(&self) -> &TaskCompiler {
        &self.tasks
    }

    // ------------------------------------------------------------------------
    // Journal
    // ------------------------------------------------------------------------

    /// Rebuild from the journal and compare with the live registry.
    pub fn verify(&self) -> Result<DriftReport, RuntimeError> {
        let entries = self.journal.load_all()?;
        drift::verify_determinism(&entries)?;
        let (replayed, _) = replay::rebuild_registry(&entries)?;
        Ok(drift::compare(&self.ctx.registry.snapshot(), &replayed.snapshot()))
    }

    pub fn current_hash(&self) -> String {
        replay::registry_hash(&self.ctx.registry.snapshot())
    }

    pub fn last_sequence(&self) -> u64 {
        self.journal.last_sequence()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }
}

/// Thread-safe session handle. Operations on different records still run
/// one at a time; the journal has a single writer.
pub struct SharedSession {
    inner: Mutex<OracleSession>,
}

impl SharedSession {
    pub fn new(session: OracleSession) -> Self {
        Self {
            inner: Mutex::new(session),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OracleSession> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access to the session.
    pub fn with<R>(&self, f: impl FnOnce(&mut OracleSession) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn current_hash(&self) -> String {
        self.lock().current_hash()
    }

    pub fn last_sequence(&self) -> u64 {
        self.lock().last_sequence()
    }

    pub fn into_inner(self) -> OracleSession {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
