//! Bounded retry with backoff, and the dead-letter destination for writes
//! that exhaust their attempts.

use chrono::{DateTime, Utc};
use metrics::counter;
use rand::Rng;
use serde_json::Value;
use shared::RelayError;
use shared::config::IngestConfig;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, warn};

/// Retry schedule derived from configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// Base delay; doubles per attempt with jitter.
    pub base_delay: Duration,
    /// Delay ceiling.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    fn delay_for(self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(attempt));
        let capped = exponential.min(self.max_delay);
        // Full jitter keeps concurrent retries from synchronizing.
        let jittered_ms = rand::rng().random_range(0..=capped.as_millis().max(1));
        Duration::from_millis(u64::try_from(jittered_ms).unwrap_or(u64::MAX))
    }
}

/// Runs `operation` until it succeeds or the policy is exhausted.
///
/// # Errors
/// Returns the final attempt's error once `max_attempts` is reached.
pub async fn run_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, RelayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after failure"
                );
                counter!("relay_retry_attempts_total", "operation" => operation_name.to_string())
                    .increment(1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// A record of an event that could not be persisted after exhausting retries.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// What was being attempted.
    pub operation: String,
    /// The payload that was lost from the durable path.
    pub payload: Value,
    /// The final error.
    pub reason: String,
    /// When the write was abandoned.
    pub recorded_at: DateTime<Utc>,
}

/// Bounded in-memory dead-letter ring.
///
/// Every push is also logged at error level, so operators see abandoned
/// writes even if the ring has rolled over.
#[derive(Debug)]
pub struct DeadLetterLog {
    entries: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
}

impl DeadLetterLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Records an abandoned write.
    pub fn push(&self, operation: &str, payload: Value, reason: &RelayError) {
        error!(operation, reason = %reason, "dead-lettering after exhausted retries");
        counter!("relay_dead_letters_total", "operation" => operation.to_string()).increment(1);

        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if guard.len() == self.capacity {
            guard.pop_front();
        }
        guard.push_back(DeadLetter {
            operation: operation.to_string(),
            payload,
            reason: reason.to_string(),
            recorded_at: Utc::now(),
        });
    }

    /// Snapshot of the current entries, oldest first.
    pub fn snapshot(&self) -> Vec<DeadLetter> {
        let guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        guard.iter().cloned().collect()
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        let guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        guard.len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
