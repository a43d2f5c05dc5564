pub mod client;
pub mod fallback;
pub mod prompt;
pub mod typhoon;

use async_trait::async_trait;
use shared::{ClassificationResult, FeatureMatch, Language};

pub use client::{RecommendationClient, RecommendationConfig, RetryPolicy};
pub use prompt::{Prompt, build_prompt};
pub use typhoon::{TyphoonClient, TyphoonConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationRequest {
    pub classification: ClassificationResult,
    pub features: Vec<FeatureMatch>,
    pub language: Language,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("Text generation timed out")]
    Timeout,
    #[error("Text generation service returned HTTP {0}")]
    Status(u16),
    #[error("Text generation service is rate limiting requests")]
    RateLimited,
    #[error("Malformed response from text generation service: {0}")]
    Malformed(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Text generation is disabled: {0}")]
    Disabled(String),
}

impl GenerationError {
    /// Everything except a disabled generator is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GenerationError::Disabled(_))
    }
}

/// Network boundary for free-text generation.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError>;
}

/// Generator used when the external service is mocked out. Fails at once,
/// so every recommendation comes from the local templates.
pub struct OfflineGenerator;

#[async_trait]
impl TextGenerator for OfflineGenerator {
    async fn generate(&self, _prompt: &Prompt) -> Result<String, GenerationError> {
        Err(GenerationError::Disabled("offline mode".to_string()))
    }
}
