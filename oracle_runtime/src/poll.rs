//! Bounded polling: the only way the runtime waits.
//!
//! Every wait has an attempt budget and an optional wall-clock deadline.
//! Time comes from a `Clock` so tests drive it by hand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RuntimeError;

// ----------------------------------------------------------------------------
// Clock
// ----------------------------------------------------------------------------

pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

/// Wall clock. `sleep` blocks the thread.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that only moves when slept on or advanced.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

// ----------------------------------------------------------------------------
// Cancellation
// ----------------------------------------------------------------------------

/// Shared flag checked before every attempt.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Policy
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Fixed,
    /// Interval doubles after every attempt, capped at `max_interval_ms`.
    Exponential { max_interval_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
    /// Give up once this much time has passed since the first attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

impl PollPolicy {
    pub fn fixed(max_attempts: u32, interval_ms: u64) -> Self {
        Self {
            max_attempts,
            interval_ms,
            backoff: Backoff::Fixed,
            deadline_ms: None,
        }
    }

    pub fn exponential(max_attempts: u32, interval_ms: u64, max_interval_ms: u64) -> Self {
        Self {
            max_attempts,
            interval_ms,
            backoff: Backoff::Exponential { max_interval_ms },
            deadline_ms: None,
        }
    }

    pub fn with_deadline(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    /// Wait after the `attempt`-th (1-based) attempt.
    pub fn interval(&self, attempt: u32) -> Duration {
        let ms = match self.backoff {
            Backoff::Fixed => self.interval_ms,
            Backoff::Exponential { max_interval_ms } => {
                let shift = attempt.saturating_sub(1).min(32);
                self.interval_ms
                    .saturating_mul(1u64 << shift)
                    .min(max_interval_ms)
            }
        };
        Duration::from_millis(ms)
    }

    /// Upper bound on time spent sleeping under this policy.
    pub fn budget(&self) -> Duration {
        let total: Duration = (1..self.max_attempts).map(|a| self.interval(a)).sum();
        match self.deadline_ms {
            Some(d) => total.min(Duration::from_millis(d)),
            None => total,
        }
    }
}

// ----------------------------------------------------------------------------
// Polling
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut { attempts: u32 },
    Cancelled,
}

impl<T> PollOutcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            PollOutcome::Ready(v) => Some(v),
            _ => None,
        }
    }

    /// Convert a non-ready outcome into an error naming `what`.
    pub fn into_result(self, what: &str) -> Result<T, RuntimeError> {
        match self {
            PollOutcome::Ready(v) => Ok(v),
            PollOutcome::TimedOut { attempts } => Err(RuntimeError::Timeout {
                what: what.to_string(),
                attempts,
            }),
            PollOutcome::Cancelled => Err(RuntimeError::Cancelled(what.to_string())),
        }
    }
}

/// Call `check` until it yields a value, the attempt budget or deadline
/// runs out, or `cancel` fires. Sleeps only between attempts.
///
/// Retryable check errors count as a failed attempt; others propagate.
pub fn poll_until<T, F>(
    what: &str,
    policy: &PollPolicy,
    clock: &dyn Clock,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<PollOutcome<T>, RuntimeError>
where
    F: FnMut(u32) -> Result<Option<T>, RuntimeError>,
{
    let started = clock.now();
    let deadline = policy.deadline_ms.map(Duration::from_millis);
    let mut attempts = 0;

    while attempts < policy.max_attempts {
        if cancel.is_cancelled() {
            debug!(what, attempts, "poll cancelled");
            return Ok(PollOutcome::Cancelled);
        }
        attempts += 1;
        match check(attempts) {
            Ok(Some(value)) => {
                debug!(what, attempts, "poll ready");
                return Ok(PollOutcome::Ready(value));
            }
            Ok(None) => {}
            Err(e) if e.is_retryable() => {
                warn!(what, attempts, error = %e, "transient failure while polling");
            }
            Err(e) => return Err(e),
        }
        if attempts == policy.max_attempts {
            break;
        }
        if let Some(limit) = deadline {
            if clock.now().saturating_sub(started) >= limit {
                break;
            }
        }
        clock.sleep(policy.interval(attempts));
    }

    debug!(what, attempts, "poll timed out");
    Ok(PollOutcome::TimedOut { attempts })
}

/// Run `op`, retrying retryable failures under `policy`. The last error is
/// returned when the budget runs out; fatal errors return immediately.
pub fn retry_transient<T, F>(
    what: &str,
    policy: &PollPolicy,
    clock: &dyn Clock,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RuntimeError>
where
    F: FnMut() -> Result<T, RuntimeError>,
{
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(RuntimeError::Cancelled(what.to_string()));
        }
        attempt += 1;
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let wait = policy.interval(attempt);
                warn!(what, attempt, error = %e, wait_ms = wait.as_millis() as u64, "retrying");
                clock.sleep(wait);
            }
            Err(e) => return Err(e),
        }
    }
}
