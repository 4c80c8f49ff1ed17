use crate::core::{Result, ShardError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, timeout};

/// Stand-in deadline for timeouts too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Bounded exponential backoff shared by readiness probes, identity pushes
/// and awareness polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Overall budget for one wait, in milliseconds.
    pub timeout_ms: u64,
    /// Delay before the second attempt, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound for a single delay, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            initial_backoff_ms: 10,
            max_backoff_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout_ms: duration_ms(timeout),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff_ms = duration_ms(initial);
        self.max_backoff_ms = duration_ms(max);
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.initial_backoff_ms == 0 {
            return Err("initial_backoff_ms must be > 0".to_string());
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err("max_backoff_ms must be >= initial_backoff_ms".to_string());
        }
        Ok(())
    }

    /// Delay after the given 1-based attempt, doubling up to the cap.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff_ms.max(1);
        let cap = self.max_backoff_ms.max(base);

        let mut backoff = base;
        for _ in 1..attempt {
            backoff = backoff.saturating_mul(2).min(cap);
        }
        Duration::from_millis(backoff)
    }
}

/// Repeats `attempt` until it yields a value or the policy's timeout elapses.
///
/// `Ok(None)` and retryable errors mean "not yet"; any other error ends the
/// wait immediately. Runs at least once even with a zero timeout. Each attempt
/// is itself bounded by the remaining time, so a call that never answers
/// cannot outlive the policy. Running out of time yields
/// [`ShardError::TargetUnreachable`].
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();
    let deadline = start
        .checked_add(policy.timeout())
        .unwrap_or_else(|| start + FAR_FUTURE);
    let mut attempt_no = 1u32;
    let mut last_failure = String::from("condition not met");

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, attempt()).await {
            Ok(Ok(Some(value))) => return Ok(value),
            Ok(Ok(None)) => {
                last_failure = String::from("condition not met");
            }
            Ok(Err(err)) if err.is_retryable() => {
                last_failure = err.to_string();
            }
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                last_failure = format!("attempt {} did not complete in time", attempt_no);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ShardError::TargetUnreachable(format!(
                "{} not satisfied within {}ms after {} attempts: {}",
                what, policy.timeout_ms, attempt_no, last_failure
            )));
        }

        let backoff = policy.backoff_for(attempt_no).min(deadline - now);
        if attempt_no % 10 == 0 {
            warn!(
                "{} still waiting (attempt {}): {} (backoff={}ms)",
                what,
                attempt_no,
                last_failure,
                backoff.as_millis()
            );
        } else {
            debug!(
                "{} retry (attempt {}): {} (backoff={}ms)",
                what,
                attempt_no,
                last_failure,
                backoff.as_millis()
            );
        }
        tokio::time::sleep(backoff).await;
        attempt_no += 1;
    }
}
