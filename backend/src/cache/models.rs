use shared::{AnalysisResult, Language};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Results are cached per normalized image and output language.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub image_hash: String,
    pub language: Language,
}

impl CacheKey {
    pub fn new(image_hash: impl Into<String>, language: Language) -> Self {
        Self {
            image_hash: image_hash.into(),
            language,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub result: Arc<AnalysisResult>,
    pub inserted_at: Instant,
}

impl CacheEntry {
    pub fn new(result: Arc<AnalysisResult>, now: Instant) -> Self {
        Self {
            result,
            inserted_at: now,
        }
    }

    /// Entries expire once `ttl` has fully elapsed since insertion.
    pub fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= ttl
    }
}
