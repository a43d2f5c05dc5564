use ndarray::Array1;
use shared::{ClassLabel, FeatureMatch, Language};
use std::sync::Arc;

use super::catalog::FeatureCatalog;
use crate::imaging::NormalizedImage;
use crate::inference::{EmbeddingModel, InferenceError, ModelSlot, Precision, prepare_input};

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub similarity_threshold: f32,
    pub max_features: usize,
    pub precision: Precision,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.3,
            max_features: 10,
            precision: Precision::Full,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding model has not been loaded")]
    ModelNotLoaded,
    #[error("Embedding dimension {actual} does not match catalog dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Embedding is zero or non-finite")]
    Degenerate,
    #[error("Embedding inference failed: {0}")]
    Inference(String),
}

impl From<InferenceError> for EmbeddingError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::ModelNotLoaded => EmbeddingError::ModelNotLoaded,
            other => EmbeddingError::Inference(other.to_string()),
        }
    }
}

pub struct FeatureExtractor {
    model: ModelSlot<dyn EmbeddingModel>,
    catalog: Arc<FeatureCatalog>,
    config: ExtractorConfig,
}

impl FeatureExtractor {
    pub fn new(config: ExtractorConfig, catalog: Arc<FeatureCatalog>) -> Self {
        Self {
            model: ModelSlot::new(),
            catalog,
            config,
        }
    }

    pub fn with_model(
        config: ExtractorConfig,
        catalog: Arc<FeatureCatalog>,
        model: Arc<dyn EmbeddingModel>,
    ) -> Self {
        Self {
            model: ModelSlot::loaded(model),
            catalog,
            config,
        }
    }

    /// Loads the embedding model once. A model whose output width differs
    /// from the catalog is refused and the slot stays empty.
    pub async fn load_with<F>(&self, loader: F) -> Result<(), EmbeddingError>
    where
        F: FnOnce() -> Result<Arc<dyn EmbeddingModel>, InferenceError>,
    {
        let expected = self.catalog.dimension();
        let mut mismatch = None;
        let loaded = self
            .model
            .load_with(|| {
                let model = loader()?;
                if model.dimension() != expected {
                    mismatch = Some(model.dimension());
                    return Err(InferenceError::ShapeMismatch {
                        expected: vec![expected],
                        actual: vec![model.dimension()],
                    });
                }
                Ok(model)
            })
            .await;

        match (loaded, mismatch) {
            (Ok(model), _) => {
                log::info!(
                    "Embedding model '{}' ready against {} catalog features",
                    model.name(),
                    self.catalog.len()
                );
                Ok(())
            }
            (Err(_), Some(actual)) => Err(EmbeddingError::DimensionMismatch { expected, actual }),
            (Err(e), None) => Err(e.into()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_loaded()
    }

    pub fn extract(
        &self,
        image: &NormalizedImage,
        language: Language,
    ) -> Result<Vec<FeatureMatch>, EmbeddingError> {
        let model = self.model.get()?;
        let input = prepare_input(image);
        let embedding = model.embed(&input, self.config.precision)?;
        let matches = self.rank(&embedding, language)?;
        log::debug!("Matched {} catalog features", matches.len());
        Ok(matches)
    }

    /// Cosine similarity against every catalog entry. Matches at or above
    /// the threshold, highest first, ties in catalog order.
    pub fn rank(
        &self,
        embedding: &[f32],
        language: Language,
    ) -> Result<Vec<FeatureMatch>, EmbeddingError> {
        let expected = self.catalog.dimension();
        if embedding.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }
        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if !norm.is_finite() || norm == 0.0 {
            return Err(EmbeddingError::Degenerate);
        }

        let query = Array1::from_iter(embedding.iter().map(|v| v / norm));
        let similarities = self.catalog.matrix().dot(&query);

        let mut scored: Vec<(usize, f32)> = similarities
            .iter()
            .map(|s| s.clamp(-1.0, 1.0))
            .enumerate()
            .filter(|(_, s)| *s >= self.config.similarity_threshold)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(self.config.max_features);

        let entries = self.catalog.entries();
        Ok(scored
            .into_iter()
            .map(|(index, similarity)| {
                let entry = &entries[index];
                FeatureMatch {
                    feature_id: entry.id.clone(),
                    description: entry.description(language).to_string(),
                    labels: entry.labels.clone(),
                    similarity,
                }
            })
            .collect())
    }
}

/// Keeps features tagged with `label`. Untagged features are dropped.
pub fn retain_for_label(matches: Vec<FeatureMatch>, label: ClassLabel) -> Vec<FeatureMatch> {
    matches
        .into_iter()
        .filter(|m| m.labels.contains(&label))
        .collect()
}
