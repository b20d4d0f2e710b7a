//! In-memory two-layer cluster for tests and the scenario binary.
//!
//! Both layers run the real program kernel. Delayed work (delegation
//! pickup, commit landing, oracle answers) sits on a timeline and fires
//! lazily whenever a client touches the cluster and the clock has passed
//! its due time. With a `ManualClock` the runtime's own polling sleeps are
//! what move time forward.

pub mod layer;
pub mod services;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use oracle_program::compiled::decompile;
use oracle_program::domain::{
    rent_exempt_minimum, Account, AccountStore, AgentEvent, Identities, Layer,
};
use oracle_program::effects::{CommitRequest, DelegateRequest, Effect, OracleRequest, QueueTaskRequest};
use oracle_program::pubkey::Pubkey;

use crate::client::{Blockhash, ClientError, LedgerClient, Ledgers, TransactionStatus};
use crate::poll::Clock;
use crate::transaction::{Signature, Transaction};

use self::layer::{LayerState, TxFailure};
use self::services::{OracleService, QueuedTask, Responder, TaskQueueService};

/// Code for a payer that cannot cover account creation.
pub const INSUFFICIENT_LAMPORTS_CODE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimSettings {
    /// Until the ephemeral layer picks up a delegation.
    pub delegation_delay: Duration,
    /// Until a commit lands on the base layer.
    pub commit_delay: Duration,
    /// Until an undelegation returns the record to the base layer.
    pub undelegation_delay: Duration,
    /// Until a sent transaction reports confirmed.
    pub confirmation_delay: Duration,
    /// Until the oracle delivers its answer.
    pub answer_delay: Duration,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            delegation_delay: Duration::from_secs(2),
            commit_delay: Duration::from_millis(1500),
            undelegation_delay: Duration::from_secs(2),
            confirmation_delay: Duration::from_millis(400),
            answer_delay: Duration::from_secs(4),
        }
    }
}

#[derive(Debug, Clone)]
enum Action {
    /// Ephemeral layer clones the delegated account.
    Pickup { account: Pubkey },
    /// Committed data reaches the base layer, optionally with authority.
    Land {
        account: Pubkey,
        data: Vec<u8>,
        release: bool,
    },
    /// Oracle signs its callback.
    Answer {
        layer: Layer,
        request: OracleRequest,
        response: String,
    },
}

#[derive(Debug, Clone)]
struct Scheduled {
    due: Duration,
    seq: u64,
    action: Action,
}

#[derive(Debug, Clone)]
struct SignatureRecord {
    confirmed_at: Duration,
    status: TransactionStatus,
}

struct ClusterState {
    ids: Identities,
    settings: SimSettings,
    base: LayerState,
    ephemeral: LayerState,
    timeline: Vec<Scheduled>,
    next_seq: u64,
    signatures: BTreeMap<(Layer, Signature), SignatureRecord>,
    oracle: OracleService,
    queue: TaskQueueService,
    events: Vec<AgentEvent>,
    logs: Vec<String>,
    reads: BTreeMap<(Layer, Pubkey), u32>,
    failing_sends: BTreeMap<Layer, u32>,
    blockhash_seq: u64,
}

/// Cloneable handle to the cluster.
#[derive(Clone)]
pub struct SimCluster {
    state: Arc<Mutex<ClusterState>>,
    clock: Arc<dyn Clock>,
}

impl SimCluster {
    pub fn new(ids: Identities, clock: Arc<dyn Clock>, settings: SimSettings) -> Self {
        let responder: Responder = Box::new(|prompt: &str| Some(format!("The oracle read: {}", prompt)));
        let state = ClusterState {
            oracle: OracleService::new(responder, settings.answer_delay),
            ids,
            settings,
            base: LayerState::new(Layer::Base),
            ephemeral: LayerState::new(Layer::Ephemeral),
            timeline: Vec::new(),
            next_seq: 0,
            signatures: BTreeMap::new(),
            queue: TaskQueueService::default(),
            events: Vec::new(),
            logs: Vec::new(),
            reads: BTreeMap::new(),
            failing_sends: BTreeMap::new(),
            blockhash_seq: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.advance_to(self.clock.now());
        state
    }

    pub fn client(&self, layer: Layer) -> Arc<SimClient> {
        Arc::new(SimClient {
            cluster: self.clone(),
            layer,
        })
    }

    pub fn ledgers(&self) -> Ledgers {
        Ledgers::new(self.client(Layer::Base), self.client(Layer::Ephemeral))
    }

    // ------------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------------

    pub fn fund(&self, key: &Pubkey, lamports: u64) {
        let mut state = self.lock();
        state
            .base
            .accounts
            .entry(*key)
            .or_insert_with(|| Account::wallet(0))
            .lamports += lamports;
    }

    pub fn set_responder(&self, responder: Responder) {
        self.lock().oracle.set_responder(responder);
    }

    pub fn set_answer_delay(&self, delay: Duration) {
        self.lock().oracle.answer_delay = delay;
    }

    /// Create `queue` and register `authority` as a recognized submitter.
    pub fn create_queue(&self, queue: &Pubkey, authority: Option<&Pubkey>) {
        let mut state = self.lock();
        state.queue.create_queue(*queue);
        if let Some(a) = authority {
            state.queue.add_authority(*queue, *a);
        }
    }

    /// Make the next `count` sends on `layer` fail with a transport error.
    pub fn fail_next_sends(&self, layer: Layer, count: u32) {
        self.lock().failing_sends.insert(layer, count);
    }

    // ------------------------------------------------------------------------
    // Inspection (not counted as reads)
    // ------------------------------------------------------------------------

    pub fn account(&self, layer: Layer, key: &Pubkey) -> Option<Account> {
        self.lock().layer(layer).accounts.get(key).cloned()
    }

    pub fn reads(&self, layer: Layer, key: &Pubkey) -> u32 {
        self.lock().reads.get(&(layer, *key)).copied().unwrap_or(0)
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.lock().events.clone()
    }

    pub fn logs(&self) -> Vec<String> {
        self.lock().logs.clone()
    }

    pub fn oracle_requests(&self) -> Vec<OracleRequest> {
        self.lock().oracle.requests.clone()
    }

    pub fn queued_tasks(&self, queue: &Pubkey) -> Vec<QueuedTask> {
        self.lock().queue.tasks(queue)
    }

    /// Run every runnable task of `queue` on the base layer by decompiling
    /// its descriptor. The executor signs for every declared signer.
    pub fn crank(&self, queue: &Pubkey) -> Vec<(u16, Result<Signature, ClientError>)> {
        let now = self.clock.now();
        let mut state = self.lock();
        let tasks = state.queue.take_runnable(queue, now);
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            state.base.accounts.remove(&task.task);
            let result = decompile(&task.transaction)
                .map_err(|e| ClientError::Rejected {
                    program: state.ids.task_queue_program,
                    code: e.code(),
                    message: e.to_string(),
                })
                .and_then(|instructions| {
                    let signers: Vec<Pubkey> = instructions
                        .iter()
                        .flat_map(|ix| ix.accounts.iter())
                        .filter(|m| m.is_signer)
                        .map(|m| m.pubkey)
                        .collect();
                    let fee_payer = signers.first().copied().unwrap_or(task.queue_authority);
                    let blockhash = state.next_blockhash();
                    let tx = signers
                        .iter()
                        .fold(Transaction::new(fee_payer, instructions, blockhash), |tx, s| {
                            tx.with_signer(*s)
                        });
                    state.submit(Layer::Base, &tx, now)
                });
            info!(task_id = task.task_id, ok = result.is_ok(), "task executed");
            results.push((task.task_id, result));
        }
        results
    }
}

impl ClusterState {
    fn layer(&self, layer: Layer) -> &LayerState {
        match layer {
            Layer::Base => &self.base,
            Layer::Ephemeral => &self.ephemeral,
        }
    }

    fn layer_mut(&mut self, layer: Layer) -> &mut LayerState {
        match layer {
            Layer::Base => &mut self.base,
            Layer::Ephemeral => &mut self.ephemeral,
        }
    }

    fn next_blockhash(&mut self) -> Blockhash {
        self.blockhash_seq += 1;
        Pubkey::hashed(&self.blockhash_seq.to_le_bytes()).to_bytes()
    }

    fn schedule(&mut self, due: Duration, action: Action) {
        self.next_seq += 1;
        self.timeline.push(Scheduled {
            due,
            seq: self.next_seq,
            action,
        });
    }

    /// Fire every scheduled action due by `now`, in due order.
    fn advance_to(&mut self, now: Duration) {
        loop {
            let next = self
                .timeline
                .iter()
                .enumerate()
                .filter(|(_, s)| s.due <= now)
                .min_by_key(|(_, s)| (s.due, s.seq))
                .map(|(i, _)| i);
            let Some(index) = next else { break };
            let scheduled = self.timeline.remove(index);
            self.fire(scheduled.action, scheduled.due);
        }
    }

    fn fire(&mut self, action: Action, at: Duration) {
        match action {
            Action::Pickup { account } => {
                let delegated = self
                    .base
                    .accounts
                    .get(&account)
                    .filter(|a| a.owner == self.ids.delegation_program)
                    .cloned();
                if let Some(acct) = delegated {
                    let program_id = self.ids.program_id;
                    self.ephemeral.accounts.entry(account).or_insert(Account {
                        owner: program_id,
                        ..acct
                    });
                    debug!(%account, "ephemeral layer picked up delegation");
                }
            }
            Action::Land {
                account,
                data,
                release,
            } => {
                let program_id = self.ids.program_id;
                if let Some(acct) = self.base.accounts.get_mut(&account) {
                    acct.data = data;
                    if release {
                        acct.owner = program_id;
                    }
                    debug!(%account, release, "commit landed on base layer");
                }
            }
            Action::Answer {
                layer,
                request,
                response,
            } => {
                let identity = self.ids.oracle_identity;
                let result = OracleService::callback(&identity, &request, &response)
                    .map_err(ClientError::from)
                    .and_then(|ix| {
                        let blockhash = self.next_blockhash();
                        let tx = Transaction::new(identity, vec![ix], blockhash);
                        self.submit(layer, &tx, at)
                    });
                if let Err(e) = result {
                    warn!(%layer, error = %e, "oracle callback failed");
                    self.logs.push(format!("oracle callback failed: {}", e));
                }
            }
        }
    }

    /// Execute `tx` on `layer` atomically and route its effects.
    fn submit(&mut self, layer: Layer, tx: &Transaction, now: Duration) -> Result<Signature, ClientError> {
        if layer == Layer::Ephemeral {
            self.require_delegated(tx)?;
        }
        let (store, effects) = self.layer(layer).execute(tx, &self.ids)?;
        let mut store = store;
        self.preflight_effects(&effects, tx, &mut store)?;

        self.layer_mut(layer).accounts = store;
        for effect in effects {
            self.route(layer, effect, now);
        }

        let signature = tx.signature();
        self.signatures.insert(
            (layer, signature.clone()),
            SignatureRecord {
                confirmed_at: now + self.settings.confirmation_delay,
                status: TransactionStatus::Confirmed,
            },
        );
        Ok(signature)
    }

    /// Writable program accounts must already live on the ephemeral layer.
    fn require_delegated(&self, tx: &Transaction) -> Result<(), ClientError> {
        for ix in &tx.instructions {
            for meta in ix.accounts.iter().filter(|m| m.is_writable) {
                if self.ephemeral.accounts.contains_key(&meta.pubkey) {
                    continue;
                }
                let on_base = self.base.accounts.get(&meta.pubkey).map(|a| a.owner);
                if on_base == Some(self.ids.program_id) || on_base == Some(self.ids.delegation_program) {
                    return Err(ClientError::AccountNotDelegated(meta.pubkey));
                }
            }
        }
        Ok(())
    }

    /// Synchronous external checks. A failure here rejects the whole
    /// transaction; `store` is the pending store of the executing layer.
    fn preflight_effects(
        &self,
        effects: &[Effect],
        tx: &Transaction,
        store: &mut AccountStore,
    ) -> Result<(), TxFailure> {
        for effect in effects {
            if let Effect::QueueTask(req) = effect {
                self.queue.validate(req, &self.ids, tx)?;
                charge_task_rent(req, store, &self.ids)?;
            }
        }
        Ok(())
    }

    fn route(&mut self, layer: Layer, effect: Effect, now: Duration) {
        match effect {
            Effect::Delegate(DelegateRequest { account, validator, .. }) => {
                let delegation_program = self.ids.delegation_program;
                if let Some(acct) = self.base.accounts.get_mut(&account) {
                    acct.owner = delegation_program;
                }
                info!(%account, %validator, "delegation accepted");
                self.schedule(now + self.settings.delegation_delay, Action::Pickup { account });
            }
            Effect::Commit(CommitRequest {
                accounts, undelegate, ..
            }) => {
                let delay = if undelegate {
                    self.settings.undelegation_delay
                } else {
                    self.settings.commit_delay
                };
                for account in accounts {
                    let data = if undelegate {
                        self.ephemeral.accounts.remove(&account).map(|a| a.data)
                    } else {
                        self.ephemeral.accounts.get(&account).map(|a| a.data.clone())
                    };
                    if let Some(data) = data {
                        self.schedule(
                            now + delay,
                            Action::Land {
                                account,
                                data,
                                release: undelegate,
                            },
                        );
                    }
                }
            }
            Effect::Oracle(request) => {
                let oracle_program = self.ids.oracle_program;
                self.layer_mut(layer)
                    .accounts
                    .entry(request.interaction)
                    .or_insert(Account {
                        owner: oracle_program,
                        lamports: 0,
                        data: request.prompt.as_bytes().to_vec(),
                    });
                match self.oracle.answer(&request.prompt) {
                    Some(response) => {
                        let due = now + self.oracle.answer_delay;
                        self.oracle.requests.push(request.clone());
                        self.schedule(
                            due,
                            Action::Answer {
                                layer,
                                request,
                                response,
                            },
                        );
                    }
                    None => {
                        debug!(prompt = %request.prompt, "oracle will not answer");
                        self.oracle.requests.push(request);
                    }
                }
            }
            Effect::QueueTask(req) => {
                self.queue.enqueue(&req);
                info!(task_id = req.task_id, queue = %req.task_queue, "task enqueued");
            }
            Effect::Emit(event) => self.events.push(event),
            Effect::Log(line) => self.logs.push(line),
        }
    }
}

/// Create the task account on the pending store, paid by the request's payer.
fn charge_task_rent(
    req: &QueueTaskRequest,
    store: &mut AccountStore,
    ids: &Identities,
) -> Result<(), TxFailure> {
    let size = req
        .transaction
        .encode()
        .map(|b| b.len())
        .unwrap_or_default()
        + req.description.len()
        + 64;
    let rent = rent_exempt_minimum(size);
    let payer = store.get_mut(&req.payer).filter(|a| a.lamports >= rent).ok_or(TxFailure {
        program: ids.task_queue_program,
        code: INSUFFICIENT_LAMPORTS_CODE,
        message: format!("payer cannot fund task account ({} lamports)", rent),
    })?;
    payer.lamports -= rent;
    store.insert(req.task, Account::new(ids.task_queue_program, rent, size));
    Ok(())
}

/// `LedgerClient` for one layer of the cluster.
pub struct SimClient {
    cluster: SimCluster,
    layer: Layer,
}

impl LedgerClient for SimClient {
    fn layer(&self) -> Layer {
        self.layer
    }

    fn latest_blockhash(&self) -> Result<Blockhash, ClientError> {
        Ok(self.cluster.lock().next_blockhash())
    }

    fn send_transaction(&self, tx: &Transaction) -> Result<Signature, ClientError> {
        let now = self.cluster.clock.now();
        let mut state = self.cluster.lock();
        if let Some(left) = state.failing_sends.get_mut(&self.layer).filter(|n| **n > 0) {
            *left -= 1;
            return Err(ClientError::Transport("connection reset".into()));
        }
        let result = state.submit(self.layer, tx, now);
        if let Err(e) = &result {
            debug!(layer = %self.layer, error = %e, "transaction rejected");
        }
        result
    }

    fn signature_status(&self, signature: &Signature) -> Result<Option<TransactionStatus>, ClientError> {
        let now = self.cluster.clock.now();
        let state = self.cluster.lock();
        Ok(state
            .signatures
            .get(&(self.layer, signature.clone()))
            .map(|rec| {
                if now >= rec.confirmed_at {
                    rec.status.clone()
                } else {
                    TransactionStatus::Processed
                }
            }))
    }

    fn get_account(&self, key: &Pubkey) -> Result<Option<Account>, ClientError> {
        let mut state = self.cluster.lock();
        *state.reads.entry((self.layer, *key)).or_insert(0) += 1;
        Ok(state.layer(self.layer).accounts.get(key).cloned())
    }
}
