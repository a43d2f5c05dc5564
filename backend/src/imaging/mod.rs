pub mod normalizer;

pub use normalizer::{ImageError, ImageNormalizer, NormalizedImage, NormalizerConfig, RawImage};
