use serde::{Deserialize, Serialize};
use shared::Language;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::cache_service::CacheConfig;
use crate::features::extractor::ExtractorConfig;
use crate::imaging::normalizer::NormalizerConfig;
use crate::inference::classifier::ClassifierConfig;
use crate::inference::Precision;
use crate::pipeline::PipelineConfig;
use crate::ratelimit::RateLimitConfig;
use crate::recommend::client::{RecommendationConfig, RetryPolicy};
use crate::recommend::typhoon::TyphoonConfig;

const KNOWN_FORMATS: [&str; 7] = ["jpg", "jpeg", "png", "bmp", "webp", "tiff", "tif"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("Missing required setting {0}")]
    Missing(&'static str),
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub image: ImageSettings,
    pub models: ModelSettings,
    pub features: FeatureSettings,
    pub recommendation: RecommendationSettings,
    pub pipeline: PipelineSettings,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub max_bytes: usize,
    pub allowed_formats: Vec<String>,
    pub max_width: u32,
    pub max_height: u32,
    pub min_dimension: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub classifier_path: Option<PathBuf>,
    pub embedding_path: Option<PathBuf>,
    pub catalog_path: Option<PathBuf>,
    pub reduced_precision: bool,
    pub precision_epsilon: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSettings {
    pub similarity_threshold: f32,
    pub max_features: usize,
    pub language: Language,
    pub match_predicted_label: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub max_chars: usize,
    pub mock: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    pub rate_limit_per_user: u32,
    pub rate_limit_window_secs: u64,
    pub request_deadline_secs: u64,
    pub store_shards: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            image: ImageSettings::default(),
            models: ModelSettings::default(),
            features: FeatureSettings::default(),
            recommendation: RecommendationSettings::default(),
            pipeline: PipelineSettings::default(),
            port: 8081,
        }
    }
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            allowed_formats: ["jpg", "jpeg", "png", "bmp", "webp"]
                .iter()
                .map(|f| f.to_string())
                .collect(),
            max_width: 1024,
            max_height: 1024,
            min_dimension: 32,
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            classifier_path: None,
            embedding_path: None,
            catalog_path: None,
            reduced_precision: false,
            precision_epsilon: 0.01,
        }
    }
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.3,
            max_features: 10,
            language: Language::Th,
            match_predicted_label: false,
        }
    }
}

impl Default for RecommendationSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.opentyphoon.ai/v1".to_string(),
            model: "typhoon-v1.5x-70b-instruct".to_string(),
            timeout_secs: 30,
            max_retries: 2,
            backoff_ms: 500,
            max_chars: 1500,
            mock: false,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600,
            cache_max_entries: 1024,
            rate_limit_per_user: 10,
            rate_limit_window_secs: 60,
            request_deadline_secs: 45,
            store_shards: 16,
        }
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            key,
            reason: format!("expected a boolean, got '{}'", other),
        }),
    }
}

impl Settings {
    /// Reads `.env`, an optional YAML base from `WOUNDCARE_CONFIG`, then
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let mut settings = match std::env::var("WOUNDCARE_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_yaml_file(PathBuf::from(path))?,
            _ => Self::default(),
        };

        let env: HashMap<String, String> = std::env::vars().collect();
        settings.apply_overrides(|key| env.get(key).cloned())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_yaml_file(path: PathBuf) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        log::info!("Loaded configuration file {}", path.display());
        Ok(serde_yaml::from_str(&raw)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MAX_IMAGE_SIZE") {
            self.image.max_bytes = parse_value("MAX_IMAGE_SIZE", &v)?;
        }
        if let Some(v) = get("ALLOWED_IMAGE_FORMATS") {
            self.image.allowed_formats = v
                .split(',')
                .map(|f| f.trim().to_ascii_lowercase())
                .filter(|f| !f.is_empty())
                .collect();
        }
        if let Some(v) = get("IMAGE_RESIZE_MAX_WIDTH") {
            self.image.max_width = parse_value("IMAGE_RESIZE_MAX_WIDTH", &v)?;
        }
        if let Some(v) = get("IMAGE_RESIZE_MAX_HEIGHT") {
            self.image.max_height = parse_value("IMAGE_RESIZE_MAX_HEIGHT", &v)?;
        }
        if let Some(v) = get("IMAGE_MIN_DIMENSION") {
            self.image.min_dimension = parse_value("IMAGE_MIN_DIMENSION", &v)?;
        }

        if let Some(v) = get("CLASSIFIER_MODEL_PATH") {
            self.models.classifier_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("EMBEDDING_MODEL_PATH") {
            self.models.embedding_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("FEATURE_CATALOG_PATH") {
            self.models.catalog_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("USE_FP16_QUANTIZATION") {
            self.models.reduced_precision = parse_bool("USE_FP16_QUANTIZATION", &v)?;
        }
        if let Some(v) = get("PRECISION_EPSILON") {
            self.models.precision_epsilon = parse_value("PRECISION_EPSILON", &v)?;
        }

        if let Some(v) = get("SIMILARITY_THRESHOLD") {
            self.features.similarity_threshold = parse_value("SIMILARITY_THRESHOLD", &v)?;
        }
        if let Some(v) = get("MAX_FEATURES") {
            self.features.max_features = parse_value("MAX_FEATURES", &v)?;
        }
        if let Some(v) = get("FEATURE_EXTRACTION_LANG") {
            self.features.language =
                parse_value("FEATURE_EXTRACTION_LANG", &v.to_ascii_lowercase())?;
        }
        if let Some(v) = get("FEATURES_MATCH_PREDICTED_LABEL") {
            self.features.match_predicted_label =
                parse_bool("FEATURES_MATCH_PREDICTED_LABEL", &v)?;
        }

        if let Some(v) = get("TYPHOON_API_KEY") {
            self.recommendation.api_key = Some(v);
        }
        if let Some(v) = get("TYPHOON_BASE_URL") {
            self.recommendation.base_url = v.trim().trim_end_matches('/').to_string();
        }
        if let Some(v) = get("TYPHOON_MODEL") {
            self.recommendation.model = v;
        }
        if let Some(v) = get("RECOMMENDATION_TIMEOUT") {
            self.recommendation.timeout_secs = parse_value("RECOMMENDATION_TIMEOUT", &v)?;
        }
        if let Some(v) = get("RECOMMENDATION_MAX_RETRIES") {
            self.recommendation.max_retries = parse_value("RECOMMENDATION_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("RECOMMENDATION_BACKOFF_MS") {
            self.recommendation.backoff_ms = parse_value("RECOMMENDATION_BACKOFF_MS", &v)?;
        }
        if let Some(v) = get("RECOMMENDATION_MAX_CHARS") {
            self.recommendation.max_chars = parse_value("RECOMMENDATION_MAX_CHARS", &v)?;
        }
        if let Some(v) = get("MOCK_TYPHOON_API") {
            self.recommendation.mock = parse_bool("MOCK_TYPHOON_API", &v)?;
        }

        if let Some(v) = get("CACHE_TTL") {
            self.pipeline.cache_ttl_secs = parse_value("CACHE_TTL", &v)?;
        }
        if let Some(v) = get("CACHE_MAX_ENTRIES") {
            self.pipeline.cache_max_entries = parse_value("CACHE_MAX_ENTRIES", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_PER_USER") {
            self.pipeline.rate_limit_per_user = parse_value("RATE_LIMIT_PER_USER", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_WINDOW") {
            self.pipeline.rate_limit_window_secs = parse_value("RATE_LIMIT_WINDOW", &v)?;
        }
        if let Some(v) = get("REQUEST_DEADLINE") {
            self.pipeline.request_deadline_secs = parse_value("REQUEST_DEADLINE", &v)?;
        }
        if let Some(v) = get("STORE_SHARDS") {
            self.pipeline.store_shards = parse_value("STORE_SHARDS", &v)?;
        }

        if let Some(v) = get("PORT") {
            self.port = parse_value("PORT", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image.max_bytes == 0 {
            return Err(invalid("MAX_IMAGE_SIZE", "must be positive"));
        }
        if self.image.max_width == 0 || self.image.max_height == 0 {
            return Err(invalid("IMAGE_RESIZE_MAX_WIDTH", "dimensions must be positive"));
        }
        if self.image.allowed_formats.is_empty() {
            return Err(invalid("ALLOWED_IMAGE_FORMATS", "at least one format is required"));
        }
        if let Some(bad) = self
            .image
            .allowed_formats
            .iter()
            .find(|f| !KNOWN_FORMATS.contains(&f.as_str()))
        {
            return Err(invalid(
                "ALLOWED_IMAGE_FORMATS",
                &format!("unsupported format '{}'", bad),
            ));
        }
        if !(0.0..1.0).contains(&self.models.precision_epsilon) {
            return Err(invalid("PRECISION_EPSILON", "must be within [0, 1)"));
        }
        if !(-1.0..=1.0).contains(&self.features.similarity_threshold) {
            return Err(invalid("SIMILARITY_THRESHOLD", "must be within [-1, 1]"));
        }
        if self.features.max_features == 0 {
            return Err(invalid("MAX_FEATURES", "must be at least 1"));
        }
        url::Url::parse(&self.recommendation.base_url)
            .map_err(|e| invalid("TYPHOON_BASE_URL", &e.to_string()))?;
        if self.recommendation.timeout_secs == 0 {
            return Err(invalid("RECOMMENDATION_TIMEOUT", "must be positive"));
        }
        if self.pipeline.rate_limit_per_user == 0 {
            return Err(invalid("RATE_LIMIT_PER_USER", "must be at least 1"));
        }
        if self.pipeline.rate_limit_window_secs == 0 {
            return Err(invalid("RATE_LIMIT_WINDOW", "must be positive"));
        }
        if self.pipeline.cache_max_entries == 0 {
            return Err(invalid("CACHE_MAX_ENTRIES", "must be at least 1"));
        }
        if self.pipeline.store_shards == 0 {
            return Err(invalid("STORE_SHARDS", "must be at least 1"));
        }
        Ok(())
    }

    pub fn precision(&self) -> Precision {
        if self.models.reduced_precision {
            Precision::Reduced
        } else {
            Precision::Full
        }
    }

    pub fn to_normalizer_config(&self) -> NormalizerConfig {
        NormalizerConfig {
            max_bytes: self.image.max_bytes,
            allowed_formats: self.image.allowed_formats.clone(),
            max_width: self.image.max_width,
            max_height: self.image.max_height,
            min_dimension: self.image.min_dimension,
        }
    }

    pub fn to_classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            precision: self.precision(),
            precision_epsilon: self.models.precision_epsilon,
        }
    }

    pub fn to_extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            similarity_threshold: self.features.similarity_threshold,
            max_features: self.features.max_features,
            precision: self.precision(),
        }
    }

    pub fn to_recommendation_config(&self) -> RecommendationConfig {
        RecommendationConfig {
            timeout: Duration::from_secs(self.recommendation.timeout_secs),
            retry: RetryPolicy {
                max_retries: self.recommendation.max_retries,
                base_delay: Duration::from_millis(self.recommendation.backoff_ms),
                max_delay: Duration::from_secs(8),
            },
            max_chars: self.recommendation.max_chars,
        }
    }

    pub fn to_typhoon_config(&self) -> Result<TyphoonConfig, ConfigError> {
        let api_key = self
            .recommendation
            .api_key
            .clone()
            .ok_or(ConfigError::Missing("TYPHOON_API_KEY"))?;
        Ok(TyphoonConfig {
            api_key,
            base_url: self.recommendation.base_url.clone(),
            model: self.recommendation.model.clone(),
            request_timeout: Duration::from_secs(self.recommendation.timeout_secs),
        })
    }

    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_secs(self.pipeline.cache_ttl_secs),
            max_entries: self.pipeline.cache_max_entries,
        }
    }

    pub fn to_rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.pipeline.rate_limit_per_user,
            window: Duration::from_secs(self.pipeline.rate_limit_window_secs),
            shards: self.pipeline.store_shards,
        }
    }

    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            language: self.features.language,
            request_deadline: Duration::from_secs(self.pipeline.request_deadline_secs),
            match_predicted_label: self.features.match_predicted_label,
        }
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}
