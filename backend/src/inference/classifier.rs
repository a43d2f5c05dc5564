use shared::{ClassLabel, ClassificationResult};
use std::sync::Arc;

use super::tensor::{ModelInput, prepare_input};
use super::{ClassifierModel, InferenceError, ModelSlot, Precision};
use crate::imaging::NormalizedImage;

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub precision: Precision,
    /// Reduced-precision results whose top-two gap is at or below this are
    /// recomputed at full precision, as are results the model cannot bound.
    pub precision_epsilon: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            precision: Precision::Full,
            precision_epsilon: 0.01,
        }
    }
}

pub struct ClassifierEngine {
    model: ModelSlot<dyn ClassifierModel>,
    config: ClassifierConfig,
}

impl ClassifierEngine {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            model: ModelSlot::new(),
            config,
        }
    }

    pub fn with_model(config: ClassifierConfig, model: Arc<dyn ClassifierModel>) -> Self {
        Self {
            model: ModelSlot::loaded(model),
            config,
        }
    }

    pub async fn load_with<F>(&self, loader: F) -> Result<(), InferenceError>
    where
        F: FnOnce() -> Result<Arc<dyn ClassifierModel>, InferenceError>,
    {
        let model = self.model.load_with(loader).await?;
        log::info!(
            "Classifier '{}' ready ({:?} precision)",
            model.name(),
            self.config.precision
        );
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_loaded()
    }

    pub fn classify(&self, image: &NormalizedImage) -> Result<ClassificationResult, InferenceError> {
        let model = self.model.get()?;
        let input = prepare_input(image);
        let result = self.classify_input(model.as_ref(), &input)?;
        log::debug!(
            "Classified as {} (confidence {:.3})",
            result.label,
            result.confidence
        );
        Ok(result)
    }

    pub fn classify_input(
        &self,
        model: &dyn ClassifierModel,
        input: &ModelInput,
    ) -> Result<ClassificationResult, InferenceError> {
        let probabilities = match self.config.precision {
            Precision::Full => softmax(&Self::logits(model, input, Precision::Full)?)?,
            Precision::Reduced => self.reduced_probabilities(model, input)?,
        };

        let label = select_label(&probabilities);
        Ok(ClassificationResult {
            label,
            confidence: probabilities[label.index()],
            probabilities,
        })
    }

    /// Reduced-precision distribution, kept only when its margin exceeds
    /// epsilon and the model's drift bound shows the full-precision argmax
    /// is the same label. Otherwise the full-precision distribution.
    fn reduced_probabilities(
        &self,
        model: &dyn ClassifierModel,
        input: &ModelInput,
    ) -> Result<Vec<f32>, InferenceError> {
        let logits = Self::logits(model, input, Precision::Reduced)?;
        let probabilities = softmax(&logits)?;

        let settled = top_two_margin(&probabilities) > self.config.precision_epsilon
            && match model.reduced_error_bound(input)? {
                Some(bound) => argmax_survives(&logits, &bound, select_label(&probabilities)),
                None => false,
            };
        if settled {
            return Ok(probabilities);
        }

        log::debug!("Reduced-precision label not settled, rerunning at full precision");
        softmax(&Self::logits(model, input, Precision::Full)?)
    }

    fn logits(
        model: &dyn ClassifierModel,
        input: &ModelInput,
        precision: Precision,
    ) -> Result<Vec<f32>, InferenceError> {
        let logits = model.logits(input, precision)?;
        if logits.len() != ClassLabel::ALL.len() {
            return Err(InferenceError::ShapeMismatch {
                expected: vec![ClassLabel::ALL.len()],
                actual: vec![logits.len()],
            });
        }
        Ok(logits)
    }
}

/// True when `label` leads every other logit by more than both drift
/// bounds combined, so no value within the bounds can overtake it.
fn argmax_survives(logits: &[f32], bound: &[f32], label: ClassLabel) -> bool {
    if bound.len() != logits.len() {
        return false;
    }
    let top = label.index();
    (0..logits.len())
        .filter(|&k| k != top)
        .all(|k| logits[top] - logits[k] > bound[top] + bound[k])
}

/// Numerically stable softmax. Non-finite logits are an error.
pub fn softmax(logits: &[f32]) -> Result<Vec<f32>, InferenceError> {
    if let Some(bad) = logits.iter().find(|v| !v.is_finite()) {
        return Err(InferenceError::InvalidOutput(format!("non-finite logit {}", bad)));
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    Ok(exps.into_iter().map(|v| v / sum).collect())
}

/// Argmax over `ClassLabel::ALL`; equal probabilities go to the label with
/// the higher priority.
pub fn select_label(probabilities: &[f32]) -> ClassLabel {
    ClassLabel::ALL
        .iter()
        .copied()
        .max_by(|a, b| {
            let pa = probabilities.get(a.index()).copied().unwrap_or(0.0);
            let pb = probabilities.get(b.index()).copied().unwrap_or(0.0);
            pa.total_cmp(&pb).then(a.priority().cmp(&b.priority()))
        })
        .unwrap_or(ClassLabel::Normal)
}

pub fn top_two_margin(probabilities: &[f32]) -> f32 {
    let mut first = f32::NEG_INFINITY;
    let mut second = f32::NEG_INFINITY;
    for &p in probabilities {
        if p > first {
            second = first;
            first = p;
        } else if p > second {
            second = p;
        }
    }
    if second.is_finite() { first - second } else { first }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::PooledLinearModel;
    use assert_matches::assert_matches;
    use ndarray::{Array1, Array2, Array4};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedLogits(Vec<f32>);

    impl ClassifierModel for FixedLogits {
        fn name(&self) -> &str {
            "fixed"
        }

        fn logits(&self, _: &ModelInput, _: Precision) -> Result<Vec<f32>, InferenceError> {
            Ok(self.0.clone())
        }
    }

    fn engine(logits: Vec<f32>) -> ClassifierEngine {
        ClassifierEngine::with_model(ClassifierConfig::default(), Arc::new(FixedLogits(logits)))
    }

    fn image() -> NormalizedImage {
        NormalizedImage::from_rgb(image::RgbImage::new(64, 64))
    }

    #[test]
    fn softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0, -50.0, 700.0]).unwrap();
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn non_finite_logits_are_rejected() {
        assert_matches!(softmax(&[1.0, f32::NAN]), Err(InferenceError::InvalidOutput(_)));
    }

    #[test]
    fn ties_follow_label_priority() {
        assert_eq!(select_label(&[0.4, 0.4, 0.1, 0.05, 0.05]), ClassLabel::Bruise);
        assert_eq!(select_label(&[0.3, 0.0, 0.0, 0.3, 0.4]), ClassLabel::Normal);
        assert_eq!(select_label(&[0.2; 5]), ClassLabel::Cut);
        assert_eq!(select_label(&[0.25, 0.0, 0.25, 0.0, 0.5]), ClassLabel::Normal);
        assert_eq!(select_label(&[0.45, 0.0, 0.45, 0.0, 0.1]), ClassLabel::Burn);
    }

    #[test]
    fn classify_reports_argmax_and_distribution() {
        let result = engine(vec![0.0, 0.0, 0.0, 3.0, 0.0]).classify(&image()).unwrap();
        assert_eq!(result.label, ClassLabel::Cut);
        assert!(result.confidence > 0.8);
        assert_eq!(result.confidence, result.probability(ClassLabel::Cut));
        let sum: f32 = result.probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn equal_logits_are_deterministic() {
        let result = engine(vec![1.0, 1.0, 0.0, 0.0, 0.0]).classify(&image()).unwrap();
        assert_eq!(result.label, ClassLabel::Bruise);
    }

    #[test]
    fn wrong_output_width_is_an_inference_error() {
        assert_matches!(
            engine(vec![1.0, 2.0]).classify(&image()),
            Err(InferenceError::ShapeMismatch { .. })
        );
    }

    #[test]
    fn unloaded_engine_refuses_to_classify() {
        let engine = ClassifierEngine::new(ClassifierConfig::default());
        assert_matches!(engine.classify(&image()), Err(InferenceError::ModelNotLoaded));
    }

    /// Returns one set of logits at full precision and another at reduced
    /// precision, with a fixed drift bound.
    struct SplitPrecision {
        full: Vec<f32>,
        reduced: Vec<f32>,
        bound: Option<f32>,
        full_calls: AtomicUsize,
    }

    impl SplitPrecision {
        fn new(full: Vec<f32>, reduced: Vec<f32>, bound: Option<f32>) -> Self {
            Self {
                full,
                reduced,
                bound,
                full_calls: AtomicUsize::new(0),
            }
        }
    }

    impl ClassifierModel for SplitPrecision {
        fn name(&self) -> &str {
            "split"
        }

        fn logits(&self, _: &ModelInput, precision: Precision) -> Result<Vec<f32>, InferenceError> {
            match precision {
                Precision::Full => {
                    self.full_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(self.full.clone())
                }
                Precision::Reduced => Ok(self.reduced.clone()),
            }
        }

        fn reduced_error_bound(&self, _: &ModelInput) -> Result<Option<Vec<f32>>, InferenceError> {
            Ok(self.bound.map(|b| vec![b; 5]))
        }
    }

    fn reduced_engine() -> ClassifierEngine {
        ClassifierEngine::new(ClassifierConfig {
            precision: Precision::Reduced,
            precision_epsilon: 0.01,
        })
    }

    fn any_input() -> ModelInput {
        Array4::zeros((1, 3, 4, 4))
    }

    #[test]
    fn flipped_reduced_label_is_rechecked_despite_wide_margin() {
        // Reduced precision prefers Cut by a wide margin; full precision says Normal.
        let model = SplitPrecision::new(
            vec![0.0, 0.0, 0.0, 1.0, 1.1],
            vec![0.0, 0.0, 0.0, 1.3, 1.0],
            Some(0.2),
        );
        let result = reduced_engine().classify_input(&model, &any_input()).unwrap();
        assert_eq!(result.label, ClassLabel::Normal);
        assert_eq!(model.full_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unbounded_backends_are_always_confirmed() {
        let model = SplitPrecision::new(
            vec![0.0, 0.0, 0.0, 0.0, 5.0],
            vec![0.0, 0.0, 0.0, 5.0, 0.0],
            None,
        );
        let result = reduced_engine().classify_input(&model, &any_input()).unwrap();
        assert_eq!(result.label, ClassLabel::Normal);
        assert_eq!(model.full_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_reduced_result_skips_full_precision() {
        let model = SplitPrecision::new(
            vec![0.0, 0.0, 0.0, 4.0, 0.0],
            vec![0.0, 0.0, 0.0, 4.1, 0.0],
            Some(0.2),
        );
        let result = reduced_engine().classify_input(&model, &any_input()).unwrap();
        assert_eq!(result.label, ClassLabel::Cut);
        assert_eq!(model.full_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reduced_precision_matches_full_precision_label() {
        let mut rng = StdRng::seed_from_u64(7);
        let full = ClassifierEngine::new(ClassifierConfig::default());
        let reduced = reduced_engine();
        let grid = 4;

        let (mut checked, mut kept_reduced) = (0, 0);
        for _ in 0..20 {
            let weights =
                Array2::from_shape_fn((5, 3 * grid * grid), |_| rng.random_range(-20.0..20.0));
            let bias = Array1::from_shape_fn(5, |_| rng.random_range(-5.0..5.0));
            let model = PooledLinearModel::new("sweep", grid, weights, bias).unwrap();

            for _ in 0..500 {
                let input = Array4::from_shape_fn((1, 3, 16, 16), |_| rng.random_range(-2.0..2.5));
                let a = full.classify_input(&model, &input).unwrap();
                let b = reduced.classify_input(&model, &input).unwrap();
                if b.probabilities != a.probabilities {
                    kept_reduced += 1;
                }
                if top_two_margin(&a.probabilities) > 0.01 {
                    assert_eq!(a.label, b.label);
                    checked += 1;
                }
            }
        }
        assert!(checked > 5000);
        // Most inputs are decided without a second pass.
        assert!(kept_reduced > 3000);
    }
}
