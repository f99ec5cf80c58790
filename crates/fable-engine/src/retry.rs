//! Retry executor with classified backoff and provider fallback.
//!
//! Every generation call goes through [`RetryExecutor::run`]: the output is
//! validated after each attempt, failures are classified into an
//! [`ErrorKind`] that selects the backoff multiplier, and the executor
//! walks a fallback chain of providers. Auth and quota errors switch
//! provider immediately; two consecutive invalid outputs on one provider
//! also trigger a switch. Attempt counting resets per provider, but the
//! overall budget across providers stays bounded.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use fable_llm::{CallCounter, DynService, GenerationSpec, Generated};
use fable_types::{ErrorKind, FableError, Result};

use crate::validator::{OutputKind, OutputValidator};

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per provider before moving down the fallback chain.
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Uniform jitter fraction added on top of the computed delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 60_000,
            jitter: 0.15,
        }
    }
}

impl RetryPolicy {
    /// Backoff multiplier for an error class. Rate limits back off hardest;
    /// invalid outputs are usually a model hiccup and retry quickly.
    fn multiplier(kind: ErrorKind) -> f64 {
        match kind {
            ErrorKind::RateLimited => 3.0,
            ErrorKind::InvalidOutput => 1.5,
            _ => 2.0,
        }
    }

    /// Deterministic delay for the given error class and 0-indexed attempt,
    /// before jitter.
    pub fn delay_for(&self, kind: ErrorKind, attempt: u32) -> Duration {
        let millis = self.base_delay_ms as f64 * Self::multiplier(kind).powi(attempt as i32);
        Duration::from_millis((millis as u64).min(self.max_delay_ms))
    }

    /// Delay with uniform jitter in `[0, jitter * delay]` added.
    pub fn jittered(&self, delay: Duration) -> Duration {
        let span = delay.as_millis() as f64 * self.jitter;
        if span < 1.0 {
            return delay;
        }
        let extra = rand::rng().random_range(0.0..span);
        delay + Duration::from_millis(extra as u64)
    }
}

// ---------------------------------------------------------------------------
// RetryAttempt / AttemptLog
// ---------------------------------------------------------------------------

/// Record of a single attempt. Ephemeral: drives fallback/backoff
/// decisions and post-hoc logging, never persisted.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub number: usize,
    pub provider: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub error: Option<String>,
    pub kind: Option<ErrorKind>,
    pub output_len: usize,
}

/// All attempts made for one named operation.
#[derive(Debug, Clone, Default)]
pub struct AttemptLog {
    pub operation: String,
    pub attempts: Vec<RetryAttempt>,
}

impl AttemptLog {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            attempts: Vec::new(),
        }
    }

    fn record_success(&mut self, provider: &str, started_at: DateTime<Utc>, output_len: usize) {
        self.attempts.push(RetryAttempt {
            number: self.attempts.len() + 1,
            provider: provider.to_string(),
            started_at,
            completed_at: Some(Utc::now()),
            success: true,
            error: None,
            kind: None,
            output_len,
        });
    }

    fn record_failure(&mut self, provider: &str, started_at: DateTime<Utc>, error: &FableError) {
        self.attempts.push(RetryAttempt {
            number: self.attempts.len() + 1,
            provider: provider.to_string(),
            started_at,
            completed_at: Some(Utc::now()),
            success: false,
            error: Some(error.to_string()),
            kind: Some(error.kind()),
            output_len: 0,
        });
    }

    pub fn total_attempts(&self) -> usize {
        self.attempts.len()
    }

    pub fn succeeded(&self) -> bool {
        self.attempts.iter().any(|a| a.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RetryAttempt> {
        self.attempts.iter().filter(|a| !a.success)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.attempts
            .iter()
            .rev()
            .find_map(|a| a.error.as_deref())
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "{}: {} attempts, success: {}",
            self.operation,
            self.total_attempts(),
            self.succeeded()
        )];
        for attempt in &self.attempts {
            let status = if attempt.success { "ok" } else { "failed" };
            let mut line = format!(
                "  attempt {} [{}] {}",
                attempt.number, attempt.provider, status
            );
            if let Some(ref err) = attempt.error {
                line.push_str(": ");
                line.push_str(err);
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

// ---------------------------------------------------------------------------
// RetryExecutor
// ---------------------------------------------------------------------------

/// Wraps a fallback chain of generation services with classified retry.
/// Constructed explicitly and passed by reference into the phase engine —
/// no process-wide state.
pub struct RetryExecutor {
    providers: Vec<Arc<DynService>>,
    policy: RetryPolicy,
    counter: Arc<CallCounter>,
}

impl RetryExecutor {
    pub fn new(providers: Vec<Arc<DynService>>, policy: RetryPolicy) -> Self {
        Self {
            providers,
            policy,
            counter: Arc::new(CallCounter::new()),
        }
    }

    pub fn with_counter(mut self, counter: Arc<CallCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn counter(&self) -> &Arc<CallCounter> {
        &self.counter
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run a generation call through the fallback chain until one attempt
    /// produces output that passes validation, or the budget is exhausted.
    pub async fn run(
        &self,
        operation: &str,
        spec: &GenerationSpec,
        min_length: usize,
        kind: OutputKind,
        validator: &OutputValidator,
        log: &mut AttemptLog,
    ) -> Result<Generated> {
        if self.providers.is_empty() {
            return Err(FableError::Other("no generation providers configured".into()));
        }

        let mut total_attempts = 0usize;
        let last_provider = self.providers.len() - 1;

        for (idx, provider) in self.providers.iter().enumerate() {
            let mut consecutive_invalid = 0u32;

            for attempt in 0..self.policy.max_attempts {
                total_attempts += 1;
                let started_at = Utc::now();
                self.counter.record(provider.name());

                let outcome = match provider.generate(spec).await {
                    Ok(generated) => match validator.validate(&generated.text, min_length, kind) {
                        Ok(()) => Ok(generated),
                        Err(rejection) => Err(FableError::InvalidOutput {
                            reason: rejection.to_string(),
                        }),
                    },
                    Err(e) => Err(e),
                };

                let err = match outcome {
                    Ok(generated) => {
                        log.record_success(provider.name(), started_at, generated.text.len());
                        tracing::info!(
                            operation,
                            provider = provider.name(),
                            attempt,
                            chars = generated.text.len(),
                            "Generation succeeded"
                        );
                        return Ok(generated);
                    }
                    Err(e) => e,
                };

                let err_kind = err.kind();
                log.record_failure(provider.name(), started_at, &err);
                tracing::warn!(
                    operation,
                    provider = provider.name(),
                    attempt,
                    error = %err,
                    "Generation attempt failed"
                );

                if err.switches_provider() {
                    // No same-provider retry for auth/quota failures.
                    break;
                }
                if !err.is_retryable() {
                    return Err(err);
                }

                if err_kind == ErrorKind::InvalidOutput {
                    consecutive_invalid += 1;
                    if consecutive_invalid >= 2 && idx < last_provider {
                        break;
                    }
                } else {
                    consecutive_invalid = 0;
                }

                if attempt + 1 < self.policy.max_attempts {
                    let delay = self.policy.jittered(self.policy.delay_for(err_kind, attempt as u32));
                    tracing::info!(
                        operation,
                        delay_ms = delay.as_millis() as u64,
                        "Backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(FableError::Exhausted {
            operation: operation.to_string(),
            attempts: total_attempts,
        })
    }
}
