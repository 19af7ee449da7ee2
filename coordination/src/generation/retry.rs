//! Bounded retries with a per-attempt timeout.

use std::time::Duration;

use tracing::{debug, warn};

use super::{GenerationError, GenerationRequest, GenerationResult, TextGenerator};

/// How hard to try before giving up on a generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    /// Base delay between attempts; grows linearly with the attempt number.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            attempt_timeout: Duration::from_secs(30),
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Call `generator` until it yields non-empty text or the policy runs out.
pub async fn generate_with_retry(
    generator: &dyn TextGenerator,
    request: &GenerationRequest,
    policy: &RetryPolicy,
) -> GenerationResult<String> {
    let attempts = policy.max_attempts.max(1);
    let mut last = GenerationError::Empty;

    for attempt in 1..=attempts {
        let outcome = tokio::time::timeout(policy.attempt_timeout, generator.generate(request)).await;
        match outcome {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                debug!(speaker = %request.speaker, attempt, "Generation succeeded");
                return Ok(text);
            }
            Ok(Ok(_)) => last = GenerationError::Empty,
            Ok(Err(e)) => last = e,
            Err(_) => last = GenerationError::Timeout(policy.attempt_timeout),
        }

        warn!(
            speaker = %request.speaker,
            purpose = %request.purpose,
            attempt,
            max_attempts = attempts,
            error = %last,
            "Generation attempt failed"
        );
        if attempt < attempts {
            tokio::time::sleep(policy.backoff * attempt).await;
        }
    }

    Err(GenerationError::Exhausted {
        attempts,
        last: Box::new(last),
    })
}
