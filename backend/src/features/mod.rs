pub mod catalog;
pub mod extractor;

pub use catalog::{CatalogError, FeatureCatalog, FeatureDescriptor};
pub use extractor::{EmbeddingError, ExtractorConfig, FeatureExtractor, retain_for_label};
