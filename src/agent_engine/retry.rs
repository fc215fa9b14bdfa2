//! Per-phase retry budgets.
//!
//! Each suspend point of a round (screenshot, model call, action execution)
//! runs under its own [`RetryBudget`]. The attempt counter is reset on every
//! call to [`with_retry`], so a budget describes one phase of one round.
//! Cancellation is checked before every attempt and raced against the
//! attempt in flight; a cancelled attempt is never retried.
use std::fmt;
use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::errors::{PilotError, PilotResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    Model,
    Screenshot,
    Execute,
}

impl fmt::Display for RetryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RetryPhase::Model => "model",
            RetryPhase::Screenshot => "screenshot",
            RetryPhase::Execute => "execute",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub phase: RetryPhase,
    pub max_attempts: u32,
    pub attempts_used: u32,
}

impl RetryBudget {
    /// `max_attempts` below one is raised to one.
    pub fn new(phase: RetryPhase, max_attempts: u32) -> Self {
        Self {
            phase,
            max_attempts: max_attempts.max(1),
            attempts_used: 0,
        }
    }

    /// Budget for `phase` from the configured number of retries after the first attempt.
    pub fn from_config(phase: RetryPhase, cfg: &RetryConfig) -> Self {
        let retries = match phase {
            RetryPhase::Model => cfg.model,
            RetryPhase::Screenshot => cfg.screenshot,
            RetryPhase::Execute => cfg.execute,
        };
        Self::new(phase, retries.saturating_add(1))
    }
}

/// Runs `op` until it succeeds, the budget is spent, or `cancel` fires.
/// Returns the last error when every attempt failed.
pub async fn with_retry<T, F, Fut>(
    budget: &mut RetryBudget,
    cancel: &CancellationToken,
    mut op: F,
) -> PilotResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PilotResult<T>>,
{
    budget.attempts_used = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(PilotError::Cancelled);
        }
        budget.attempts_used += 1;
        let attempt = budget.attempts_used;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PilotError::Cancelled),
            r = op() => r,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(PilotError::Cancelled) => return Err(PilotError::Cancelled),
            Err(e) if attempt >= budget.max_attempts => {
                tracing::warn!(
                    phase = %budget.phase,
                    attempts = attempt,
                    error = %e,
                    "retry budget exhausted"
                );
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(
                    phase = %budget.phase,
                    attempt,
                    max = budget.max_attempts,
                    error = %e,
                    "attempt failed, retrying"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_always_failing_uses_every_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut budget = RetryBudget::new(RetryPhase::Model, 4);
        let c = calls.clone();
        let result: PilotResult<()> = with_retry(&mut budget, &CancellationToken::new(), || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                Err(PilotError::Transport(format!("failure {n}")))
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(budget.attempts_used, 4);
        assert_eq!(result.unwrap_err().to_string(), "Model transport error: failure 4");
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut budget = RetryBudget::new(RetryPhase::Screenshot, 6);
        let c = calls.clone();
        let result = with_retry(&mut budget, &CancellationToken::new(), || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) + 1 < 3 {
                    Err(PilotError::Capture("busy".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_counter_resets_per_call() {
        let mut budget = RetryBudget::new(RetryPhase::Execute, 2);
        let token = CancellationToken::new();
        let _ = with_retry(&mut budget, &token, || async { Err::<(), _>(PilotError::Parse("x".into())) }).await;
        assert_eq!(budget.attempts_used, 2);
        with_retry(&mut budget, &token, || async { Ok(()) }).await.unwrap();
        assert_eq!(budget.attempts_used, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        token.cancel();
        let mut budget = RetryBudget::new(RetryPhase::Model, 3);
        let c = calls.clone();
        let result = with_retry(&mut budget, &token, || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_in_flight_attempt() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let mut budget = RetryBudget::new(RetryPhase::Model, 3);
        let result = with_retry(&mut budget, &token, || async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(budget.attempts_used, 1);
    }

    #[tokio::test]
    async fn test_cancelled_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut budget = RetryBudget::new(RetryPhase::Execute, 5);
        let c = calls.clone();
        let result: PilotResult<()> = with_retry(&mut budget, &CancellationToken::new(), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(PilotError::Cancelled)
            }
        })
        .await;
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_budget_from_config_counts_first_attempt() {
        let cfg = RetryConfig::default();
        assert_eq!(RetryBudget::from_config(RetryPhase::Model, &cfg).max_attempts, cfg.model + 1);
        assert_eq!(RetryBudget::new(RetryPhase::Execute, 0).max_attempts, 1);
    }
}
