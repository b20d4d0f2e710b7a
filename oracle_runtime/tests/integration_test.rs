//! Integration tests for oracle_runtime.
//!
//! Every test runs against its own simulated cluster on a manual clock, so
//! nothing sleeps. Journal tests use temporary directories for isolation.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use oracle_program::compiled::decompile;
use oracle_program::domain::Layer;
use oracle_program::lifecycle::DelegationStatus;
use oracle_program::pubkey::Pubkey;

use oracle_runtime::commit::CommitCoordinator;
use oracle_runtime::config::RuntimeConfig;
use oracle_runtime::context::RuntimeContext;
use oracle_runtime::delegation::DelegationController;
use oracle_runtime::error::{ErrorClass, QueueRejection, RuntimeError};
use oracle_runtime::oracle::OracleRequestManager;
use oracle_runtime::poll::{Clock, ManualClock, PollOutcome, PollPolicy};
use oracle_runtime::record::data_hash;
use oracle_runtime::scheduler::TaskCompiler;
use oracle_runtime::session::{OracleSession, SharedSession};
use oracle_runtime::sim::{SimCluster, SimSettings};

const FUNDING: u64 = 10_000_000_000;

struct Harness {
    sim: SimCluster,
    clock: Arc<ManualClock>,
    config: RuntimeConfig,
    user: Pubkey,
}

impl Harness {
    fn new(label: &str) -> Self {
        let config = RuntimeConfig::devnet().expect("devnet config");
        let clock = Arc::new(ManualClock::new());
        let sim = SimCluster::new(config.identities.clone(), clock.clone(), SimSettings::default());
        let user = Pubkey::hashed(label.as_bytes());
        sim.fund(&user, FUNDING);
        Self {
            sim,
            clock,
            config,
            user,
        }
    }

    /// A context with its own (empty) registry over the shared cluster.
    fn context(&self) -> RuntimeContext {
        RuntimeContext::new(
            self.sim.ledgers(),
            self.config.identities.clone(),
            self.config.policies.clone(),
            self.clock.clone(),
        )
    }

    fn base_data(&self, record: &Pubkey) -> Vec<u8> {
        self.sim
            .account(Layer::Base, record)
            .expect("record on base layer")
            .data
    }
}

struct Coordinators {
    ctx: RuntimeContext,
    delegation: DelegationController,
    commits: CommitCoordinator,
    oracle: OracleRequestManager,
    tasks: TaskCompiler,
}

fn coordinators(h: &Harness) -> Coordinators {
    let ctx = h.context();
    Coordinators {
        delegation: DelegationController::new(ctx.clone()),
        commits: CommitCoordinator::new(ctx.clone()),
        oracle: OracleRequestManager::new(ctx.clone()),
        tasks: TaskCompiler::new(ctx.clone()),
        ctx,
    }
}

/// Initialize and delegate, waiting for the handoff.
fn delegated(h: &Harness, c: &Coordinators) -> Pubkey {
    let record = c.delegation.initialize(&h.user).expect("initialize");
    c.delegation.delegate(&record, None).expect("delegate");
    assert_eq!(
        c.delegation.await_delegation(&record).expect("await"),
        PollOutcome::Ready(DelegationStatus::EphemeralResident)
    );
    record
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("oracle_runtime_tests").join(name);
    if dir.exists() {
        fs::remove_dir_all(&dir).ok();
    }
    fs::create_dir_all(&dir).expect("Failed to create temp dir");
    dir
}

// ---------------------------------------------------------------------------
// Delegation lifecycle
// ---------------------------------------------------------------------------

#[test]
fn delegate_undelegate_round_trip_preserves_bytes() {
    let h = Harness::new("round-trip");
    let c = coordinators(&h);
    let record = c.delegation.initialize(&h.user).unwrap();
    let before = h.base_data(&record);

    c.delegation.delegate(&record, None).unwrap();
    assert_eq!(c.delegation.status(&record), Some(DelegationStatus::Delegating));
    assert_eq!(
        h.sim.account(Layer::Base, &record).unwrap().owner,
        h.config.identities.delegation_program
    );
    c.delegation.await_delegation(&record).unwrap();
    assert_eq!(
        c.delegation.observe(&record).unwrap(),
        Some(DelegationStatus::EphemeralResident)
    );

    c.delegation.undelegate(&record).unwrap();
    assert_eq!(
        c.delegation.await_undelegation(&record).unwrap(),
        PollOutcome::Ready(DelegationStatus::BaseResident)
    );

    let after = h.sim.account(Layer::Base, &record).unwrap();
    assert_eq!(after.data, before);
    assert_eq!(after.owner, h.config.identities.program_id);
    assert!(h.sim.account(Layer::Ephemeral, &record).is_none());
}

#[test]
fn wrong_state_operations_fail_without_sending() {
    let h = Harness::new("wrong-state");
    let c = coordinators(&h);
    let record = c.delegation.initialize(&h.user).unwrap();
    let started = h.clock.now();

    let err = c.commits.commit(&record).unwrap_err();
    assert_eq!(
        err,
        RuntimeError::InvalidState {
            operation: "commit",
            status: DelegationStatus::BaseResident,
        }
    );
    assert_eq!(err.class(), ErrorClass::ProtocolState);
    assert!(!err.is_retryable());

    assert_eq!(c.delegation.undelegate(&record).unwrap_err().class(), ErrorClass::ProtocolState);
    assert_eq!(c.delegation.await_delegation(&record).unwrap_err().class(), ErrorClass::ProtocolState);
    assert_eq!(h.clock.now(), started, "no polling or retry happened");

    c.delegation.delegate(&record, None).unwrap();
    assert_eq!(c.delegation.delegate(&record, None).unwrap_err().class(), ErrorClass::ProtocolState);
    assert_eq!(c.oracle.ask(&record, "too early").unwrap_err().class(), ErrorClass::ProtocolState);
}

#[test]
fn reinitialize_is_rejected_by_the_program() {
    let h = Harness::new("reinit");
    let c = coordinators(&h);
    c.delegation.initialize(&h.user).unwrap();
    let err = c.delegation.initialize(&h.user).unwrap_err();
    assert!(matches!(err, RuntimeError::Program { code: 6004, .. }), "{err:?}");
}

// ---------------------------------------------------------------------------
// Commits
// ---------------------------------------------------------------------------

#[test]
fn commit_is_idempotent() {
    let h = Harness::new("commit-idempotent");
    let c = coordinators(&h);
    let record = delegated(&h, &c);

    c.oracle.ask(&record, "2+2").unwrap();
    let answer = c.oracle.poll_for_response(&record, &h.config.policies.oracle).unwrap();
    assert!(answer.is_ready());

    c.commits.commit(&record).unwrap();
    assert!(c.commits.in_flight(&record).is_some());
    assert!(c.commits.await_commit(&record).unwrap().is_ready());
    assert!(c.commits.in_flight(&record).is_none());
    let first = h.base_data(&record);
    assert_eq!(first, h.sim.account(Layer::Ephemeral, &record).unwrap().data);

    c.commits.commit(&record).unwrap();
    assert!(c.commits.await_commit(&record).unwrap().is_ready());
    assert_eq!(h.base_data(&record), first);
}

#[test]
fn answer_landing_during_commit_retry_is_what_gets_awaited() {
    let h = Harness::new("commit-race");
    let c = coordinators(&h);
    let record = delegated(&h, &c);
    c.oracle.ask(&record, "first").unwrap();
    c.oracle.poll_for_response(&record, &h.config.policies.oracle).unwrap();
    c.commits.commit(&record).unwrap();
    assert!(c.commits.await_commit(&record).unwrap().is_ready());
    let stale = h.base_data(&record);

    // The answer is due 4s after the ask; the failed send's backoff
    // carries the clock past it, so the flush carries the new answer.
    c.oracle.ask(&record, "second").unwrap();
    h.clock.advance(Duration::from_millis(3500));
    h.sim.fail_next_sends(Layer::Ephemeral, 1);
    c.commits.commit(&record).unwrap();

    let ephemeral = h.sim.account(Layer::Ephemeral, &record).unwrap().data;
    assert_ne!(ephemeral, stale, "answer landed before the flush executed");
    assert_eq!(c.commits.in_flight(&record).unwrap().data_hash, data_hash(&ephemeral));
    assert_eq!(h.base_data(&record), stale);

    // The stale copy on base must not count as landed.
    assert!(c.commits.await_commit(&record).unwrap().is_ready());
    assert_eq!(h.base_data(&record), ephemeral);

    c.delegation.undelegate(&record).unwrap();
    assert_eq!(
        c.delegation.await_undelegation(&record).unwrap(),
        PollOutcome::Ready(DelegationStatus::BaseResident)
    );
    assert_eq!(h.base_data(&record), ephemeral);
}

#[test]
fn await_commit_is_immediate_when_base_already_matches() {
    let h = Harness::new("commit-unchanged");
    let c = coordinators(&h);
    let record = delegated(&h, &c);
    c.commits.commit(&record).unwrap();
    assert!(c.commits.await_commit(&record).unwrap().is_ready());

    c.commits.commit(&record).unwrap();
    let started = h.clock.now();
    assert_eq!(c.commits.await_commit(&record).unwrap(), PollOutcome::Ready(()));
    assert_eq!(h.clock.now(), started, "first poll already matched");
    assert!(c.commits.in_flight(&record).is_none());
}

// ---------------------------------------------------------------------------
// Oracle requests
// ---------------------------------------------------------------------------

#[test]
fn poll_times_out_after_exactly_max_attempts() {
    let h = Harness::new("oracle-timeout");
    h.sim.set_responder(Box::new(|_: &str| None));
    let c = coordinators(&h);
    let record = delegated(&h, &c);
    c.oracle.ask(&record, "ignored").unwrap();

    let reads_before = h.sim.reads(Layer::Ephemeral, &record);
    let started = h.clock.now();
    let outcome = c
        .oracle
        .poll_for_response(&record, &PollPolicy::fixed(15, 2000))
        .unwrap();

    assert_eq!(outcome, PollOutcome::TimedOut { attempts: 15 });
    assert_eq!(h.sim.reads(Layer::Ephemeral, &record) - reads_before, 15);
    assert_eq!(h.clock.now() - started, Duration::from_millis(14 * 2000));

    // Still outstanding: a second ask must wait for abandon.
    assert!(c.oracle.outstanding(&record).is_some());
    assert_eq!(
        c.oracle.ask(&record, "again").unwrap_err(),
        RuntimeError::RequestOutstanding(record)
    );
    let abandoned = c.oracle.abandon(&record).unwrap().expect("outstanding request");
    assert_eq!(abandoned.prompt, "ignored");
    c.oracle.ask(&record, "again").unwrap();
}

#[test]
fn answer_is_delivered_on_the_layer_it_was_asked() {
    let h = Harness::new("oracle-base");
    let c = coordinators(&h);
    let record = c.delegation.initialize(&h.user).unwrap();

    let interaction = c.oracle.ask(&record, "hello").unwrap();
    assert_eq!(c.oracle.outstanding(&record).unwrap().interaction, interaction);
    let outcome = c.oracle.poll_for_response(&record, &h.config.policies.oracle).unwrap();

    assert_eq!(outcome, PollOutcome::Ready("The oracle read: hello".to_string()));
    assert!(c.oracle.outstanding(&record).is_none());
    assert_eq!(h.sim.events().len(), 1);
    assert!(h.sim.logs().iter().any(|l| l == "Request sent to Oracle!"));
}

// ---------------------------------------------------------------------------
// Compilation and task scheduling
// ---------------------------------------------------------------------------

#[test]
fn compile_merges_duplicates_and_decompiles() {
    let h = Harness::new("compile");
    let c = coordinators(&h);
    let ids = &h.config.identities;
    let builder = c.ctx.builder();
    let interaction = Pubkey::hashed(b"compile-interaction");

    // Seven distinct identities including the target program.
    let ask = builder.ask_oracle(&h.user, &interaction, "2+2").unwrap();
    let single = c.tasks.compile(std::slice::from_ref(&ask)).unwrap();
    assert_eq!(single.accounts.len(), 7);
    assert_eq!(decompile(&single).unwrap(), vec![ask.clone()]);

    // The oracle and magic contexts share an identity; its merged role is
    // writable.
    assert_eq!(ids.oracle_context, ids.magic_context);
    let commit = builder.update_commit(&h.user).unwrap();
    let compiled = c.tasks.compile(&[ask.clone(), commit.clone()]).unwrap();
    assert_eq!(compiled.accounts.len(), 8);
    assert_eq!(
        (compiled.num_rw_signers, compiled.num_ro_signers, compiled.num_rw, compiled.num_ro()),
        (1, 0, 3, 4)
    );

    let decompiled = decompile(&compiled).unwrap();
    assert_eq!(decompiled[1], commit);
    assert_eq!(decompiled[0].program_id, ask.program_id);
    assert_eq!(decompiled[0].data, ask.data);
    let context_meta = decompiled[0].accounts[3];
    assert_eq!(context_meta.pubkey, ids.oracle_context);
    assert!(context_meta.is_writable);
}

#[test]
fn unrecognized_queue_is_rejected_without_state_change() {
    let h = Harness::new("queue-unrecognized");
    let c = coordinators(&h);
    let record = c.delegation.initialize(&h.user).unwrap();
    let ask = c.ctx.builder().ask_oracle(&h.user, &Pubkey::hashed(b"q-i"), "2+2").unwrap();
    let compiled = c.tasks.compile(&[ask]).unwrap();
    let lamports = h.sim.account(Layer::Base, &h.user).unwrap().lamports;
    let queue = Pubkey::hashed(b"nobody's queue");

    let err = c.tasks.submit(&record, compiled.clone(), 7, Some(queue)).unwrap_err();
    assert_eq!(err, RuntimeError::QueueRejected(QueueRejection::NotRecognized));
    assert_eq!(err.code(), Some(3012));
    assert_eq!(err.class(), ErrorClass::QueueValidation);

    assert_eq!(h.sim.account(Layer::Base, &h.user).unwrap().lamports, lamports);
    assert!(h.sim.queued_tasks(&queue).is_empty());
    assert!(c.ctx.registry.entry(&record).unwrap().tasks.is_empty());

    // A queue that exists but never registered this program's authority.
    h.sim.create_queue(&queue, Some(&Pubkey::hashed(b"someone else")));
    let err = c.tasks.submit(&record, compiled, 7, Some(queue)).unwrap_err();
    assert_eq!(err.code(), Some(3012));
}

#[test]
fn registered_queue_accepts_and_runs_task() {
    let h = Harness::new("queue-registered");
    let c = coordinators(&h);
    let record = c.delegation.initialize(&h.user).unwrap();
    let queue = h.config.identities.default_queue;
    h.sim
        .create_queue(&queue, Some(&c.tasks.task_queue_authority(&queue).unwrap()));

    let ask = c.ctx.builder().ask_oracle(&h.user, &Pubkey::hashed(b"task-i"), "2+2").unwrap();
    let compiled = c.tasks.compile(&[ask]).unwrap();
    let submitted = c.tasks.submit(&record, compiled.clone(), 3, None).unwrap();
    assert_eq!(submitted.queue, queue);
    assert_eq!(h.sim.queued_tasks(&queue).len(), 1);
    assert_eq!(c.ctx.registry.entry(&record).unwrap().tasks, vec![submitted.clone()]);

    let dup = c.tasks.submit(&record, compiled, 3, None).unwrap_err();
    assert_eq!(dup, RuntimeError::QueueRejected(QueueRejection::TaskIdInUse(3)));

    let ran = h.sim.crank(&queue);
    assert_eq!(ran.len(), 1);
    assert_eq!(ran[0].0, 3);
    assert!(ran[0].1.is_ok(), "{:?}", ran[0].1);
    assert_eq!(h.sim.oracle_requests().len(), 1);
    assert!(h.sim.queued_tasks(&queue).is_empty());
}

// ---------------------------------------------------------------------------
// Retries
// ---------------------------------------------------------------------------

#[test]
fn propagation_delay_is_retried_until_delegated() {
    let h = Harness::new("propagation");
    let c = coordinators(&h);
    let record = c.delegation.initialize(&h.user).unwrap();
    c.delegation.delegate(&record, None).unwrap();
    assert!(h.sim.account(Layer::Ephemeral, &record).is_none());

    // Written straight through the context: the registry would refuse a
    // commit while delegating.
    let ix = c.ctx.builder().update_commit(&h.user).unwrap();
    c.ctx
        .submit(Layer::Ephemeral, h.user, &[], vec![ix])
        .expect("retried past the delegation delay");
    assert!(h.sim.account(Layer::Ephemeral, &record).is_some());
}

#[test]
fn transport_failures_are_retried_then_surface() {
    let h = Harness::new("transport");
    let c = coordinators(&h);

    h.sim.fail_next_sends(Layer::Base, 2);
    let record = c.delegation.initialize(&h.user).unwrap();
    assert_eq!(c.delegation.status(&record), Some(DelegationStatus::BaseResident));

    h.sim.fail_next_sends(Layer::Base, 100);
    let err = c.delegation.delegate(&record, None).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Transport);
    assert_eq!(c.delegation.status(&record), Some(DelegationStatus::BaseResident));
}

// ---------------------------------------------------------------------------
// Sessions and journal replay
// ---------------------------------------------------------------------------

#[test]
fn reopened_session_resumes_outstanding_request() {
    let dir = temp_dir("resume");
    let h = Harness::new("resume");
    let record;
    {
        let mut session = OracleSession::open(&dir, "s1", h.context()).unwrap();
        record = session.initialize(&h.user).unwrap();
        session.delegate(&record, None).unwrap();
        session.await_delegation(&record).unwrap();
        session.ask(&record, "2+2").unwrap();
        assert_eq!(session.last_sequence(), 4);
        assert!(session.verify().unwrap().is_clean());
    }

    let mut reopened = OracleSession::open(&dir, "s1", h.context()).unwrap();
    assert_eq!(reopened.status(&record), Some(DelegationStatus::EphemeralResident));
    let pending = reopened.outstanding(&record).expect("request survives restart");
    assert_eq!(pending.prompt, "2+2");
    assert_eq!(pending.layer, Layer::Ephemeral);

    let policy = reopened.context().policies.oracle.clone();
    let answer = reopened.poll_for_response(&record, &policy).unwrap();
    assert_eq!(answer, PollOutcome::Ready("The oracle read: 2+2".to_string()));
    assert_eq!(reopened.last_sequence(), 5);
    assert!(reopened.verify().unwrap().is_clean());
}

#[test]
fn rejected_operations_are_not_journaled() {
    let dir = temp_dir("rejected");
    let h = Harness::new("rejected");
    let mut session = OracleSession::open(&dir, "s", h.context()).unwrap();
    let record = session.initialize(&h.user).unwrap();
    let hash = session.current_hash();

    assert!(session.commit(&record).is_err());
    assert!(session.undelegate(&record).is_err());
    assert_eq!(session.last_sequence(), 1);
    assert_eq!(session.current_hash(), hash);
}

#[test]
fn failed_journal_append_keeps_ops_for_the_next_persist() {
    let dir = temp_dir("append-failure");
    let h = Harness::new("append-failure");
    let mut session = OracleSession::open(&dir, "s", h.context()).unwrap();
    let record = session.initialize(&h.user).unwrap();
    assert_eq!(session.last_sequence(), 1);

    // A directory where the journal file should be makes every append fail.
    let journal = session.dir().join("ops.bin");
    let saved = journal.with_extension("saved");
    fs::rename(&journal, &saved).unwrap();
    fs::create_dir(&journal).unwrap();

    let err = session.delegate(&record, None).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Journal);
    assert_eq!(session.status(&record), Some(DelegationStatus::Delegating));
    assert_eq!(session.last_sequence(), 1);

    fs::remove_dir(&journal).unwrap();
    fs::rename(&saved, &journal).unwrap();
    assert_eq!(session.persist().unwrap(), 1);
    assert_eq!(session.last_sequence(), 2);
    assert!(session.verify().unwrap().is_clean());

    let reopened = OracleSession::open(&dir, "s", h.context()).unwrap();
    assert_eq!(reopened.status(&record), Some(DelegationStatus::Delegating));
    assert_eq!(reopened.current_hash(), session.current_hash());
}

#[test]
fn sessions_are_isolated() {
    let dir = temp_dir("isolated");
    let h = Harness::new("isolated-a");
    let other_user = Pubkey::hashed(b"isolated-b");
    h.sim.fund(&other_user, FUNDING);

    let mut a = OracleSession::open(&dir, "a", h.context()).unwrap();
    let mut b = OracleSession::open(&dir, "b", h.context()).unwrap();
    let ra = a.initialize(&h.user).unwrap();
    let rb = b.initialize(&other_user).unwrap();

    assert!(a.status(&rb).is_none());
    assert!(b.status(&ra).is_none());
    assert_ne!(a.current_hash(), b.current_hash());
    assert_ne!(a.dir(), b.dir());
}

#[test]
fn shared_session_serializes_writers() {
    let dir = temp_dir("shared");
    let h = Harness::new("shared-0");
    let users: Vec<Pubkey> = (1..=4)
        .map(|i| Pubkey::hashed(format!("shared-{}", i).as_bytes()))
        .collect();
    for u in &users {
        h.sim.fund(u, FUNDING);
    }
    let shared = Arc::new(SharedSession::new(
        OracleSession::open(&dir, "shared", h.context()).unwrap(),
    ));

    let handles: Vec<_> = users
        .iter()
        .copied()
        .map(|user| {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || shared.with(|s| s.initialize(&user)))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert_eq!(shared.last_sequence(), 4);
    let session = Arc::try_unwrap(shared).ok().expect("sole owner").into_inner();
    assert!(session.verify().unwrap().is_clean());
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

#[test]
fn concrete_scenario() {
    let dir = temp_dir("scenario");
    let h = Harness::new("scenario");
    h.sim.set_responder(Box::new(|p: &str| (p == "2+2").then(|| "4".to_string())));
    let mut s = OracleSession::open(&dir, "scenario", h.context()).unwrap();

    let record = s.initialize(&h.user).unwrap();
    s.delegate(&record, None).unwrap();
    assert!(s.await_delegation(&record).unwrap().is_ready());

    s.ask(&record, "2+2").unwrap();
    let policy = s.context().policies.oracle.clone();
    assert_eq!(
        s.poll_for_response(&record, &policy).unwrap(),
        PollOutcome::Ready("4".to_string())
    );

    s.commit(&record).unwrap();
    assert!(s.await_commit(&record).unwrap().is_ready());
    let committed = h.base_data(&record);
    s.commit(&record).unwrap();
    assert!(s.await_commit(&record).unwrap().is_ready());
    assert_eq!(h.base_data(&record), committed);

    s.undelegate(&record).unwrap();
    assert!(s.await_undelegation(&record).unwrap().is_ready());
    assert_eq!(h.base_data(&record), committed);

    let ask = s
        .context()
        .builder()
        .ask_oracle(&h.user, &Pubkey::hashed(b"scenario-task"), "2+2")
        .unwrap();
    let compiled = s.compile(&[ask]).unwrap();
    let unknown = Pubkey::hashed(b"scenario-unknown-queue");
    let err = s.schedule(&record, compiled.clone(), 1, Some(unknown)).unwrap_err();
    assert_eq!(err.code(), Some(3012));

    let queue = h.config.identities.default_queue;
    h.sim
        .create_queue(&queue, Some(&s.tasks().task_queue_authority(&queue).unwrap()));
    s.schedule(&record, compiled, 1, None).unwrap();

    assert!(s.verify().unwrap().is_clean());
    assert_eq!(s.status(&record), Some(DelegationStatus::BaseResident));
}
