use rand::Rng;
use shared::{Recommendation, RecommendationOrigin};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::fallback::{fallback_text, post_process};
use super::prompt::{Prompt, build_prompt};
use super::{GenerationError, RecommendationRequest, TextGenerator};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay before retry number `attempt` (0-based), capped,
    /// plus up to 50% random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter_ms = (exp.as_millis() / 2) as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        exp + Duration::from_millis(jitter)
    }
}

#[derive(Debug, Clone)]
pub struct RecommendationConfig {
    /// Upper bound for a single generation attempt.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub max_chars: usize,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            max_chars: 1500,
        }
    }
}

/// Wraps a [`TextGenerator`] with retries and a local template fallback.
/// `recommend` never fails.
pub struct RecommendationClient {
    generator: Arc<dyn TextGenerator>,
    config: RecommendationConfig,
}

impl RecommendationClient {
    pub fn new(generator: Arc<dyn TextGenerator>, config: RecommendationConfig) -> Self {
        Self { generator, config }
    }

    /// Generated advice within `timeout` (covering all attempts and
    /// backoff), otherwise the fallback template.
    pub async fn recommend(&self, request: &RecommendationRequest, timeout: Duration) -> Recommendation {
        self.recommend_until(request, timeout, &CancellationToken::new())
            .await
    }

    /// Like [`recommend`](Self::recommend), but the fallback is also used as
    /// soon as `cancel` fires.
    pub async fn recommend_until(
        &self,
        request: &RecommendationRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Recommendation {
        if timeout.is_zero() {
            log::warn!("No time left for text generation, using fallback");
            return self.fallback(request);
        }

        let deadline = Instant::now() + timeout;
        let prompt = build_prompt(request);
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                log::warn!("Text generation cancelled, using fallback");
                return self.fallback(request);
            }
            outcome = tokio::time::timeout_at(deadline, self.generate_with_retry(&prompt)) => outcome,
        };

        match outcome {
            Ok(Ok(text)) => Recommendation {
                text: post_process(&text, request.language, self.config.max_chars),
                language: request.language,
                origin: RecommendationOrigin::External,
            },
            Ok(Err(e)) => {
                log::warn!("Text generation failed ({}), using fallback", e);
                self.fallback(request)
            }
            Err(_) => {
                log::warn!(
                    "Text generation exceeded {:?}, using fallback",
                    timeout
                );
                self.fallback(request)
            }
        }
    }

    async fn generate_with_retry(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let policy = &self.config.retry;
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.config.timeout, self.generator.generate(prompt)).await {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout),
            };

            match result {
                Ok(text) => return Ok(text),
                Err(e) if attempt < policy.max_retries && e.is_retryable() => {
                    let delay = policy.delay(attempt);
                    log::warn!(
                        "Text generation attempt {} failed: {}. Retrying in {:?}",
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn fallback(&self, request: &RecommendationRequest) -> Recommendation {
        Recommendation {
            text: fallback_text(request.classification.label, request.language),
            language: request.language,
            origin: RecommendationOrigin::Fallback,
        }
    }
}
