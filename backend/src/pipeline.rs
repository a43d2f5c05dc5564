use serde::Serialize;
use shared::{AnalysisResult, Language, RecommendationOrigin, StageReport, StageReports};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheKey, CacheService};
use crate::error::AnalysisError;
use crate::features::{EmbeddingError, FeatureExtractor, retain_for_label};
use crate::imaging::{ImageError, ImageNormalizer, RawImage};
use crate::inference::{ClassifierEngine, InferenceError};
use crate::ratelimit::RateLimiter;
use crate::recommend::{RecommendationClient, RecommendationRequest};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub language: Language,
    /// Budget for one request. Once it is spent the recommendation stage
    /// falls back to the local template.
    pub request_deadline: Duration,
    pub match_predicted_label: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            language: Language::Th,
            request_deadline: Duration::from_secs(45),
            match_predicted_label: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub cache_entries: usize,
    pub tracked_users: usize,
    pub classifier_loaded: bool,
    pub embedder_loaded: bool,
}

pub struct WoundAnalysisPipeline {
    config: PipelineConfig,
    normalizer: Arc<ImageNormalizer>,
    classifier: Arc<ClassifierEngine>,
    extractor: Arc<FeatureExtractor>,
    recommender: RecommendationClient,
    rate_limiter: RateLimiter,
    cache: CacheService,
    shutdown: CancellationToken,
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Runs `work` on the blocking pool and times it. A task that dies before
/// returning is reported through `lost`, as that stage's own error.
async fn blocking_stage<T, E, F>(
    name: &'static str,
    work: F,
    lost: impl FnOnce(String) -> E,
) -> (Result<T, AnalysisError>, StageReport)
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<AnalysisError> + Send + 'static,
{
    log::debug!("Stage {} started", name);
    let started = Instant::now();
    let result: Result<T, AnalysisError> = match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(e) => Err(lost(format!("{} task failed: {}", name, e))),
    }
    .map_err(Into::into);
    let elapsed = elapsed_ms(started);

    match &result {
        Ok(_) => log::info!("Stage {} finished in {:.1} ms", name, elapsed),
        Err(e) if e.is_internal() => log::error!("Stage {} failed after {:.1} ms: {}", name, elapsed, e),
        Err(e) => log::warn!("Stage {} rejected input after {:.1} ms: {}", name, elapsed, e),
    }

    let report = StageReport {
        elapsed_ms: elapsed,
        error: result.as_ref().err().map(|e| e.to_string()),
    };
    (result, report)
}

impl WoundAnalysisPipeline {
    pub fn new(
        config: PipelineConfig,
        normalizer: ImageNormalizer,
        classifier: Arc<ClassifierEngine>,
        extractor: Arc<FeatureExtractor>,
        recommender: RecommendationClient,
        rate_limiter: RateLimiter,
        cache: CacheService,
    ) -> Self {
        Self {
            config,
            normalizer: Arc::new(normalizer),
            classifier,
            extractor,
            recommender,
            rate_limiter,
            cache,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn max_image_bytes(&self) -> usize {
        self.normalizer.config().max_bytes
    }

    pub async fn analyze(&self, user_id: &str, raw: RawImage) -> Result<Arc<AnalysisResult>, AnalysisError> {
        self.analyze_in(user_id, raw, self.config.language).await
    }

    /// Rate limit, normalize, cache lookup, classify and extract features
    /// concurrently, then recommend within what is left of the deadline.
    pub async fn analyze_in(
        &self,
        user_id: &str,
        raw: RawImage,
        language: Language,
    ) -> Result<Arc<AnalysisResult>, AnalysisError> {
        let started = Instant::now();
        let deadline = started + self.config.request_deadline;

        let remaining = self.rate_limiter.check(user_id).inspect_err(|e| {
            log::warn!("User {} rejected: {}", user_id, e);
        })?;
        log::debug!(
            "Analyzing {} byte {} image for user {} ({} requests left in window)",
            raw.bytes.len(),
            raw.mime_type,
            user_id,
            remaining
        );

        let normalizer = self.normalizer.clone();
        let (normalized, normalize_report) = blocking_stage(
            "normalize",
            move || {
                normalizer.normalize(&raw).map(|image| {
                    let hash = image.content_hash();
                    (image, hash)
                })
            },
            ImageError::Decode,
        )
        .await;
        let (image, image_hash) = normalized?;

        let key = CacheKey::new(image_hash, language);
        if let Some(hit) = self.cache.get(&key) {
            log::info!("Cache hit for user {} (image {})", user_id, key.image_hash);
            return Ok(hit);
        }

        let image = Arc::new(image);
        let classifier = self.classifier.clone();
        let classify_image = image.clone();
        let extractor = self.extractor.clone();
        let extract_image = image;
        let ((classification, classify_report), (features, extract_report)) = tokio::join!(
            blocking_stage(
                "classify",
                move || classifier.classify(&classify_image),
                InferenceError::Runtime,
            ),
            blocking_stage(
                "extract_features",
                move || extractor.extract(&extract_image, language),
                EmbeddingError::Inference,
            ),
        );
        let classification = classification?;
        let mut features = features?;
        if self.config.match_predicted_label {
            features = retain_for_label(features, classification.label);
        }

        let request = RecommendationRequest {
            classification,
            features,
            language,
        };
        let budget = deadline.saturating_duration_since(Instant::now());
        log::debug!("Stage recommend started with {:?} left", budget);
        let recommend_started = Instant::now();
        let recommendation = self
            .recommender
            .recommend_until(&request, budget, &self.shutdown)
            .await;
        let recommend_report = StageReport {
            elapsed_ms: elapsed_ms(recommend_started),
            error: (recommendation.origin == RecommendationOrigin::Fallback)
                .then(|| "external generation unavailable, used fallback template".to_string()),
        };
        log::info!(
            "Stage recommend finished in {:.1} ms ({})",
            recommend_report.elapsed_ms,
            recommendation.origin
        );

        let RecommendationRequest {
            classification,
            features,
            ..
        } = request;
        let result = AnalysisResult {
            image_hash: key.image_hash.clone(),
            language,
            classification,
            features,
            recommendation,
            stages: StageReports {
                normalize: normalize_report,
                classify: classify_report,
                extract_features: extract_report,
                recommend: recommend_report,
            },
            analyzed_at: chrono::Utc::now().to_rfc3339(),
        };

        let result = self.cache.insert_if_absent(key, Arc::new(result));
        log::info!(
            "Analysis for user {} finished in {:.1} ms: {} ({:.1}%), {} features",
            user_id,
            elapsed_ms(started),
            result.classification.label,
            result.classification.confidence * 100.0,
            result.features.len()
        );
        Ok(result)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            cache_entries: self.cache.len(),
            tracked_users: self.rate_limiter.tracked_users(),
            classifier_loaded: self.classifier.is_loaded(),
            embedder_loaded: self.extractor.is_loaded(),
        }
    }

    /// Drops expired cache entries and rate-limit windows.
    pub fn purge_expired(&self) -> usize {
        let removed = self.cache.purge_expired() + self.rate_limiter.purge_expired();
        if removed > 0 {
            log::info!("Purged {} expired entries", removed);
        }
        removed
    }

    /// Token that fires on [`shutdown`](Self::shutdown). In-flight
    /// recommendations switch to the fallback when it does.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
