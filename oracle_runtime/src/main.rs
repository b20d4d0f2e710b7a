//! oracle_scenario - end-to-end run against the simulated cluster.
//!
//! initialize → delegate → ask → commit ×2 → undelegate → schedule,
//! printing PASS/FAIL per step.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use oracle_program::domain::Layer;
use oracle_program::lifecycle::DelegationStatus;
use oracle_program::pubkey::Pubkey;
use oracle_runtime::config::RuntimeConfig;
use oracle_runtime::context::RuntimeContext;
use oracle_runtime::error::{QueueRejection, RuntimeError};
use oracle_runtime::poll::{Clock, ManualClock, PollOutcome, SystemClock};
use oracle_runtime::record::fetch;
use oracle_runtime::session::OracleSession;
use oracle_runtime::sim::{SimCluster, SimSettings};

/// Run the delegated-oracle scenario against an in-memory cluster
#[derive(Parser, Debug)]
#[command(name = "oracle_scenario")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Runtime configuration (JSON); devnet identities when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the session journal
    #[arg(long)]
    session_dir: Option<PathBuf>,

    /// Session identifier
    #[arg(long, default_value = "scenario")]
    session: String,

    /// Sleep for real instead of advancing a manual clock
    #[arg(long)]
    realtime: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

struct Report {
    failures: usize,
}

impl Report {
    fn step(&mut self, name: &str, ok: bool, detail: impl std::fmt::Display) {
        if ok {
            println!("PASS  {:<34} {}", name, detail);
        } else {
            self.failures += 1;
            println!("FAIL  {:<34} {}", name, detail);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = match &cli.config {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RuntimeConfig::devnet().context("loading devnet config")?,
    }
    .with_env_overrides();
    info!(ephemeral = %config.ephemeral.rpc, "configuration loaded");

    let clock: Arc<dyn Clock> = if cli.realtime {
        Arc::new(SystemClock::new())
    } else {
        Arc::new(ManualClock::new())
    };
    let sim = SimCluster::new(config.identities.clone(), clock.clone(), SimSettings::default());
    sim.set_responder(Box::new(|prompt: &str| {
        Some(match prompt.trim() {
            "2+2" => "4".to_string(),
            other => format!("no idea about {}", other),
        })
    }));

    let ctx = RuntimeContext::new(sim.ledgers(), config.identities.clone(), config.policies.clone(), clock);
    let session_dir = cli
        .session_dir
        .unwrap_or_else(|| std::env::temp_dir().join("oracle_scenario"));
    // A stale journal would describe records this fresh cluster never saw.
    let _ = std::fs::remove_dir_all(session_dir.join(&cli.session));
    let mut session = OracleSession::open(&session_dir, &cli.session, ctx)?;

    let user = Pubkey::hashed(b"scenario-user");
    sim.fund(&user, 10_000_000_000);

    let mut report = Report { failures: 0 };
    run(&mut session, &sim, &user, &mut report)?;

    let drift = session.verify()?;
    report.step("journal replays to live state", drift.is_clean(), format!("{} ops", session.last_sequence()));

    if report.failures > 0 {
        println!("{} step(s) failed", report.failures);
        std::process::exit(1);
    }
    println!("all steps passed");
    Ok(())
}

fn run(session: &mut OracleSession, sim: &SimCluster, user: &Pubkey, report: &mut Report) -> Result<()> {
    let ids = session.context().identities.clone();

    let record = session.initialize(user)?;
    report.step(
        "initialize",
        session.status(&record) == Some(DelegationStatus::BaseResident),
        record,
    );

    session.delegate(&record, None)?;
    let delegated = session.await_delegation(&record)?;
    report.step(
        "delegate + await",
        delegated == PollOutcome::Ready(DelegationStatus::EphemeralResident),
        format!("{:?}", delegated),
    );

    session.ask(&record, "2+2")?;
    let policy = session.context().policies.oracle.clone();
    let answer = session.poll_for_response(&record, &policy)?;
    report.step(
        "ask \"2+2\" + poll",
        matches!(&answer, PollOutcome::Ready(r) if !r.is_empty()),
        format!("{:?}", answer),
    );

    session.commit(&record)?;
    let first = session.await_commit(&record)?;
    let after_first = sim.account(Layer::Base, &record).map(|a| a.data);
    session.commit(&record)?;
    let second = session.await_commit(&record)?;
    let after_second = sim.account(Layer::Base, &record).map(|a| a.data);
    report.step(
        "commit twice",
        first.is_ready() && second.is_ready() && after_first == after_second,
        "base data unchanged by second commit",
    );

    session.undelegate(&record)?;
    let undelegated = session.await_undelegation(&record)?;
    let base_response = fetch(session.context().ledgers.base.as_ref(), &record)?
        .map(|view| view.response(&record))
        .transpose()?
        .flatten();
    report.step(
        "undelegate + await",
        undelegated == PollOutcome::Ready(DelegationStatus::BaseResident)
            && base_response == answer.clone().ready(),
        format!("base response {:?}", base_response),
    );

    let interaction = session.context().fresh_identity("interaction", &record);
    let ask = session.context().builder().ask_oracle(user, &interaction, "2+2")?;
    let compiled = session.compile(&[ask])?;

    let unregistered = Pubkey::hashed(b"scenario-unregistered-queue");
    let rejected = session.schedule(&record, compiled.clone(), 1, Some(unregistered));
    report.step(
        "schedule on unregistered queue",
        matches!(rejected, Err(RuntimeError::QueueRejected(QueueRejection::NotRecognized)))
            && sim.queued_tasks(&unregistered).is_empty(),
        format!("{:?}", rejected.err().map(|e| e.code())),
    );

    let queue = ids.default_queue;
    let authority = session.tasks().task_queue_authority(&queue)?;
    sim.create_queue(&queue, Some(&authority));
    let submitted = session.schedule(&record, compiled, 1, None)?;
    let ran = sim.crank(&queue);
    report.step(
        "schedule on registered queue",
        ran.len() == 1 && ran.iter().all(|(id, r)| *id == submitted.task_id && r.is_ok()),
        format!("task {} on {}", submitted.task_id, submitted.queue),
    );

    Ok(())
}
