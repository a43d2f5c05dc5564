#![allow(dead_code)]

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use shared::Language;
use woundcare::cache::{CacheConfig, CacheService};
use woundcare::features::{ExtractorConfig, FeatureCatalog, FeatureExtractor};
use woundcare::imaging::{ImageNormalizer, NormalizerConfig, RawImage};
use woundcare::inference::{
    ClassifierConfig, ClassifierEngine, ClassifierModel, EmbeddingModel, InferenceError, ModelInput,
    Precision, load_classifier, load_embedder,
};
use woundcare::ratelimit::{RateLimitConfig, RateLimiter};
use woundcare::recommend::{
    GenerationError, Prompt, RecommendationClient, RecommendationConfig, RetryPolicy, TextGenerator,
};
use woundcare::{PipelineConfig, WoundAnalysisPipeline};

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format).unwrap();
    out.into_inner()
}

/// 500x500 skin-toned photo with a dark red diagonal laceration.
pub fn laceration_jpeg() -> RawImage {
    let skin = Rgb([224, 172, 150]);
    let wound = Rgb([150, 20, 30]);
    let (x0, y0, x1, y1) = (60.0f32, 80.0f32, 440.0f32, 420.0f32);
    let length = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();

    let image = RgbImage::from_fn(500, 500, |x, y| {
        let (px, py) = (x as f32, y as f32);
        let t = ((px - x0) * (x1 - x0) + (py - y0) * (y1 - y0)) / (length * length);
        let distance = ((px - x0) * (y1 - y0) - (py - y0) * (x1 - x0)).abs() / length;
        if (0.0..=1.0).contains(&t) && distance <= 5.0 {
            wound
        } else {
            skin
        }
    });
    RawImage::new(encode(&image, ImageFormat::Jpeg), "image/jpeg")
}

/// Plain patch of bluish skin, encoded as PNG.
pub fn bruise_png() -> RawImage {
    let image = RgbImage::from_pixel(320, 240, Rgb([120, 90, 160]));
    RawImage::new(encode(&image, ImageFormat::Png), "image/png")
}

pub fn corrupted_png() -> RawImage {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend_from_slice(&[0x13; 256]);
    RawImage::new(bytes, "image/png")
}

pub struct CountingClassifier {
    inner: Arc<dyn ClassifierModel>,
    pub calls: Arc<AtomicUsize>,
    panics: bool,
}

impl ClassifierModel for CountingClassifier {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn logits(&self, input: &ModelInput, precision: Precision) -> Result<Vec<f32>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("classifier backend crashed");
        }
        self.inner.logits(input, precision)
    }

    fn reduced_error_bound(&self, input: &ModelInput) -> Result<Option<Vec<f32>>, InferenceError> {
        self.inner.reduced_error_bound(input)
    }
}

pub struct CountingEmbedder {
    inner: Arc<dyn EmbeddingModel>,
    pub calls: Arc<AtomicUsize>,
}

impl EmbeddingModel for CountingEmbedder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed(&self, input: &ModelInput, precision: Precision) -> Result<Vec<f32>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(input, precision)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum GeneratorMode {
    Replies(&'static str),
    Unreachable,
    Stalls,
}

pub struct ScriptedGenerator {
    mode: GeneratorMode,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, _prompt: &Prompt) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            GeneratorMode::Replies(text) => Ok(text.to_string()),
            GeneratorMode::Unreachable => {
                Err(GenerationError::Transport("connection refused".to_string()))
            }
            GeneratorMode::Stalls => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok("too late".to_string())
            }
        }
    }
}

pub struct Options {
    pub rate_limit: u32,
    pub request_deadline: Duration,
    pub generator: GeneratorMode,
    pub match_predicted_label: bool,
    pub language: Language,
    pub load_models: bool,
    pub classifier_panics: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            rate_limit: 10,
            request_deadline: Duration::from_secs(45),
            generator: GeneratorMode::Replies(
                "Rinse the cut with clean water and cover it. See a doctor if it keeps bleeding.",
            ),
            match_predicted_label: false,
            language: Language::En,
            load_models: true,
            classifier_panics: false,
        }
    }
}

pub struct Harness {
    pub pipeline: WoundAnalysisPipeline,
    pub classifier_calls: Arc<AtomicUsize>,
    pub embedder_calls: Arc<AtomicUsize>,
    pub generator_calls: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new(options: Options) -> Self {
        let classifier_calls = Arc::new(AtomicUsize::new(0));
        let embedder_calls = Arc::new(AtomicUsize::new(0));
        let generator_calls = Arc::new(AtomicUsize::new(0));

        let catalog = Arc::new(FeatureCatalog::from_file(&fixture("feature_catalog.yaml")).unwrap());
        let extractor_config = ExtractorConfig::default();

        let (classifier, extractor) = if options.load_models {
            let classifier: Arc<dyn ClassifierModel> = Arc::new(CountingClassifier {
                inner: load_classifier(&fixture("classifier.yaml")).unwrap(),
                calls: classifier_calls.clone(),
                panics: options.classifier_panics,
            });
            let embedder: Arc<dyn EmbeddingModel> = Arc::new(CountingEmbedder {
                inner: load_embedder(&fixture("embedder.yaml")).unwrap(),
                calls: embedder_calls.clone(),
            });
            (
                ClassifierEngine::with_model(ClassifierConfig::default(), classifier),
                FeatureExtractor::with_model(extractor_config, catalog, embedder),
            )
        } else {
            (
                ClassifierEngine::new(ClassifierConfig::default()),
                FeatureExtractor::new(extractor_config, catalog),
            )
        };

        let generator = Arc::new(ScriptedGenerator {
            mode: options.generator,
            calls: generator_calls.clone(),
        });
        let recommender = RecommendationClient::new(
            generator,
            RecommendationConfig {
                timeout: Duration::from_secs(30),
                retry: RetryPolicy {
                    max_retries: 2,
                    base_delay: Duration::from_millis(500),
                    max_delay: Duration::from_secs(8),
                },
                max_chars: 1500,
            },
        );

        let pipeline = WoundAnalysisPipeline::new(
            PipelineConfig {
                language: options.language,
                request_deadline: options.request_deadline,
                match_predicted_label: options.match_predicted_label,
            },
            ImageNormalizer::new(NormalizerConfig::default()),
            Arc::new(classifier),
            Arc::new(extractor),
            recommender,
            RateLimiter::new(RateLimitConfig {
                max_requests: options.rate_limit,
                window: Duration::from_secs(60),
                shards: 4,
            }),
            CacheService::new(CacheConfig {
                ttl: Duration::from_secs(3600),
                max_entries: 64,
            }),
        );

        Self {
            pipeline,
            classifier_calls,
            embedder_calls,
            generator_calls,
        }
    }

    pub fn calls(&self) -> (usize, usize, usize) {
        (
            self.classifier_calls.load(Ordering::SeqCst),
            self.embedder_calls.load(Ordering::SeqCst),
            self.generator_calls.load(Ordering::SeqCst),
        )
    }
}
