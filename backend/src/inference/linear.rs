use ndarray::{Array1, Array2, s};
use serde::Deserialize;
use std::path::Path;

use super::tensor::{ModelInput, REDUCED_UNIT_ROUNDOFF, round_to_reduced};
use super::{ClassifierModel, EmbeddingModel, InferenceError, Precision};

#[derive(Debug, Deserialize)]
struct LinearFile {
    #[serde(default)]
    name: Option<String>,
    grid: usize,
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

/// Grid-pooled dense head: the input is averaged per channel over a
/// `grid x grid` layout of cells and fed through one linear layer.
#[derive(Debug, Clone)]
pub struct PooledLinearModel {
    name: String,
    grid: usize,
    weights: Array2<f32>,
    bias: Array1<f32>,
    reduced_weights: Array2<f32>,
    reduced_bias: Array1<f32>,
}

impl PooledLinearModel {
    pub fn new(
        name: impl Into<String>,
        grid: usize,
        weights: Array2<f32>,
        bias: Array1<f32>,
    ) -> Result<Self, InferenceError> {
        let name = name.into();
        let inputs = 3 * grid * grid;
        if grid == 0 {
            return Err(InferenceError::InvalidOutput(format!(
                "{}: grid must be at least 1",
                name
            )));
        }
        if weights.ncols() != inputs || weights.nrows() != bias.len() {
            return Err(InferenceError::ShapeMismatch {
                expected: vec![bias.len(), inputs],
                actual: weights.shape().to_vec(),
            });
        }
        if weights.iter().chain(bias.iter()).any(|v| !v.is_finite()) {
            return Err(InferenceError::InvalidOutput(format!(
                "{}: weights contain non-finite values",
                name
            )));
        }

        let reduced_weights = weights.mapv(round_to_reduced);
        let reduced_bias = bias.mapv(round_to_reduced);
        Ok(Self {
            name,
            grid,
            weights,
            bias,
            reduced_weights,
            reduced_bias,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, InferenceError> {
        let load_err = |reason: String| InferenceError::Load {
            path: path.to_path_buf(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let file: LinearFile = serde_yaml::from_str(&raw).map_err(|e| load_err(e.to_string()))?;

        let rows = file.weights.len();
        let cols = file.weights.first().map(Vec::len).unwrap_or(0);
        if rows == 0 || file.weights.iter().any(|row| row.len() != cols) {
            return Err(load_err("weights must be a non-empty rectangular matrix".into()));
        }
        let flat: Vec<f32> = file.weights.into_iter().flatten().collect();
        let weights = Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| load_err(e.to_string()))?;

        let name = file.name.unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("linear")
                .to_string()
        });
        let model = Self::new(name, file.grid, weights, Array1::from(file.bias))
            .map_err(|e| load_err(e.to_string()))?;
        log::info!(
            "Loaded pooled linear model '{}' (grid {}, {} outputs)",
            model.name,
            model.grid,
            model.outputs()
        );
        Ok(model)
    }

    pub fn outputs(&self) -> usize {
        self.bias.len()
    }

    pub fn grid(&self) -> usize {
        self.grid
    }

    /// Per-channel cell means, channel-major then row-major.
    pub fn pool(&self, input: &ModelInput) -> Result<Array1<f32>, InferenceError> {
        let shape = input.shape();
        if shape[0] != 1 || shape[1] != 3 || shape[2] < self.grid || shape[3] < self.grid {
            return Err(InferenceError::ShapeMismatch {
                expected: vec![1, 3, self.grid, self.grid],
                actual: shape.to_vec(),
            });
        }
        let (height, width) = (shape[2], shape[3]);
        let g = self.grid;

        let mut pooled = Array1::zeros(3 * g * g);
        for c in 0..3 {
            for gy in 0..g {
                let (y0, y1) = (gy * height / g, (gy + 1) * height / g);
                for gx in 0..g {
                    let (x0, x1) = (gx * width / g, (gx + 1) * width / g);
                    let cell = input.slice(s![0, c, y0..y1, x0..x1]);
                    pooled[c * g * g + gy * g + gx] = cell.mean().unwrap_or(0.0);
                }
            }
        }
        Ok(pooled)
    }

    pub fn forward(
        &self,
        input: &ModelInput,
        precision: Precision,
    ) -> Result<Vec<f32>, InferenceError> {
        let pooled = self.pool(input)?;
        let output = match precision {
            Precision::Full => self.weights.dot(&pooled) + &self.bias,
            Precision::Reduced => {
                let pooled = pooled.mapv(round_to_reduced);
                self.reduced_weights.dot(&pooled) + &self.reduced_bias
            }
        };
        Ok(output.to_vec())
    }

    /// Worst-case distance between each reduced-precision output and its
    /// full-precision value: operand rounding of every product and the bias,
    /// plus f32 accumulation in both passes.
    pub fn drift_bound(&self, input: &ModelInput) -> Result<Vec<f32>, InferenceError> {
        let pooled = self.pool(input)?.mapv(f32::abs);
        let terms = (self.weights.ncols() + 2) as f32;
        let relative = 2.02 * REDUCED_UNIT_ROUNDOFF + 2.0 * terms * f32::EPSILON;
        let magnitude = self.weights.mapv(f32::abs).dot(&pooled) + &self.bias.mapv(f32::abs);
        Ok(magnitude
            .mapv(|m| m * relative + terms * f32::MIN_POSITIVE)
            .to_vec())
    }
}

impl ClassifierModel for PooledLinearModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn logits(&self, input: &ModelInput, precision: Precision) -> Result<Vec<f32>, InferenceError> {
        self.forward(input, precision)
    }

    fn reduced_error_bound(&self, input: &ModelInput) -> Result<Option<Vec<f32>>, InferenceError> {
        self.drift_bound(input).map(Some)
    }
}

impl EmbeddingModel for PooledLinearModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.outputs()
    }

    fn embed(&self, input: &ModelInput, precision: Precision) -> Result<Vec<f32>, InferenceError> {
        self.forward(input, precision)
    }
}
