pub mod classifier;
pub mod linear;
pub mod tensor;
#[cfg(feature = "torch")]
pub mod torch;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

pub use classifier::{ClassifierConfig, ClassifierEngine};
pub use linear::PooledLinearModel;
pub use tensor::{ModelInput, prepare_input};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    #[default]
    Full,
    /// Half-width floats. Faster on accelerators, slightly lossy.
    Reduced,
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Model has not been loaded")]
    ModelNotLoaded,
    #[error("Failed to load model from {path}: {reason}")]
    Load { path: PathBuf, reason: String },
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Model produced invalid output: {0}")]
    InvalidOutput(String),
    #[error("Inference runtime error: {0}")]
    Runtime(String),
}

/// Single-label wound classifier. Returns one logit per `ClassLabel`, in
/// `ClassLabel::ALL` order.
pub trait ClassifierModel: Send + Sync {
    fn name(&self) -> &str;
    fn logits(&self, input: &ModelInput, precision: Precision) -> Result<Vec<f32>, InferenceError>;

    /// Per-logit bound on `|reduced - full|` for `input`. `None` when the
    /// backend cannot bound its rounding error.
    fn reduced_error_bound(&self, _input: &ModelInput) -> Result<Option<Vec<f32>>, InferenceError> {
        Ok(None)
    }
}

/// Image embedding model with a fixed output dimension.
pub trait EmbeddingModel: Send + Sync {
    fn name(&self) -> &str;
    fn dimension(&self) -> usize;
    fn embed(&self, input: &ModelInput, precision: Precision) -> Result<Vec<f32>, InferenceError>;
}

/// Holds a model that is loaded at most once and shared read-only afterwards.
pub struct ModelSlot<M: ?Sized> {
    cell: OnceCell<Arc<M>>,
}

impl<M: ?Sized> Default for ModelSlot<M> {
    fn default() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }
}

impl<M: ?Sized> ModelSlot<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loaded(model: Arc<M>) -> Self {
        Self {
            cell: OnceCell::new_with(Some(model)),
        }
    }

    /// Runs `loader` unless a model is already present. Concurrent callers
    /// wait for the first one; a failed load leaves the slot empty.
    pub async fn load_with<F>(&self, loader: F) -> Result<Arc<M>, InferenceError>
    where
        F: FnOnce() -> Result<Arc<M>, InferenceError>,
    {
        self.cell
            .get_or_try_init(|| async move { loader() })
            .await
            .cloned()
    }

    pub fn get(&self) -> Result<Arc<M>, InferenceError> {
        self.cell.get().cloned().ok_or(InferenceError::ModelNotLoaded)
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

pub fn load_classifier(path: &Path) -> Result<Arc<dyn ClassifierModel>, InferenceError> {
    log::info!("Loading classifier model from {}", path.display());
    match extension(path).as_str() {
        "yaml" | "yml" | "json" => {
            let model = PooledLinearModel::from_file(path)?;
            if model.outputs() != shared::ClassLabel::ALL.len() {
                return Err(InferenceError::Load {
                    path: path.to_path_buf(),
                    reason: format!(
                        "classifier must have {} outputs, found {}",
                        shared::ClassLabel::ALL.len(),
                        model.outputs()
                    ),
                });
            }
            Ok(Arc::new(model))
        }
        "pt" => load_torch(path).map(|m| m as Arc<dyn ClassifierModel>),
        other => Err(InferenceError::Load {
            path: path.to_path_buf(),
            reason: format!("unsupported model format '{}'", other),
        }),
    }
}

pub fn load_embedder(path: &Path) -> Result<Arc<dyn EmbeddingModel>, InferenceError> {
    log::info!("Loading embedding model from {}", path.display());
    match extension(path).as_str() {
        "yaml" | "yml" | "json" => Ok(Arc::new(PooledLinearModel::from_file(path)?)),
        "pt" => load_torch(path).map(|m| m as Arc<dyn EmbeddingModel>),
        other => Err(InferenceError::Load {
            path: path.to_path_buf(),
            reason: format!("unsupported model format '{}'", other),
        }),
    }
}

#[cfg(feature = "torch")]
fn load_torch(path: &Path) -> Result<Arc<torch::TorchModel>, InferenceError> {
    Ok(Arc::new(torch::TorchModel::load(path)?))
}

#[cfg(not(feature = "torch"))]
fn load_torch(path: &Path) -> Result<Arc<PooledLinearModel>, InferenceError> {
    Err(InferenceError::Load {
        path: path.to_path_buf(),
        reason: "TorchScript models need the `torch` feature".to_string(),
    })
}
