use ndarray::Array2;
use serde::Deserialize;
use shared::{ClassLabel, Language};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Catalog has no entries")]
    Empty,
    #[error("Duplicate feature id: {0}")]
    DuplicateId(String),
    #[error("Feature {id} has embedding dimension {actual}, expected {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },
    #[error("Feature {0} has a zero or non-finite embedding")]
    InvalidEmbedding(String),
    #[error("Feature {0} has no English description")]
    MissingEnglish(String),
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    features: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    id: String,
    #[serde(default)]
    labels: Vec<ClassLabel>,
    descriptions: HashMap<Language, String>,
    embedding: Vec<f32>,
}

/// Reference feature with a unit-length embedding.
#[derive(Debug, Clone)]
pub struct FeatureDescriptor {
    pub id: String,
    pub labels: Vec<ClassLabel>,
    descriptions: HashMap<Language, String>,
    embedding: Vec<f32>,
}

impl FeatureDescriptor {
    pub fn new(
        id: impl Into<String>,
        labels: Vec<ClassLabel>,
        descriptions: HashMap<Language, String>,
        embedding: Vec<f32>,
    ) -> Result<Self, CatalogError> {
        let id = id.into();
        if !descriptions.contains_key(&Language::En) {
            return Err(CatalogError::MissingEnglish(id));
        }
        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if !norm.is_finite() || norm == 0.0 {
            return Err(CatalogError::InvalidEmbedding(id));
        }
        let embedding = embedding.into_iter().map(|v| v / norm).collect();
        Ok(Self {
            id,
            labels,
            descriptions,
            embedding,
        })
    }

    /// Localized text, falling back to English.
    pub fn description(&self, language: Language) -> &str {
        self.descriptions
            .get(&language)
            .or_else(|| self.descriptions.get(&Language::En))
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }
}

/// Immutable after construction; shared across requests behind an `Arc`.
#[derive(Debug)]
pub struct FeatureCatalog {
    entries: Vec<FeatureDescriptor>,
    matrix: Array2<f32>,
}

impl FeatureCatalog {
    pub fn new(entries: Vec<FeatureDescriptor>) -> Result<Self, CatalogError> {
        let dimension = entries.first().ok_or(CatalogError::Empty)?.embedding.len();

        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.id.as_str()) {
                return Err(CatalogError::DuplicateId(entry.id.clone()));
            }
            if entry.embedding.len() != dimension {
                return Err(CatalogError::DimensionMismatch {
                    id: entry.id.clone(),
                    expected: dimension,
                    actual: entry.embedding.len(),
                });
            }
        }

        let flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();
        let matrix = Array2::from_shape_vec((entries.len(), dimension), flat)
            .map_err(|_| CatalogError::Empty)?;

        Ok(Self { entries, matrix })
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_yaml::from_str(raw)?;
        let entries = file
            .features
            .into_iter()
            .map(|entry| FeatureDescriptor::new(entry.id, entry.labels, entry.descriptions, entry.embedding))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(entries)
    }

    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_yaml_str(&raw)?;
        log::info!(
            "Loaded feature catalog from {} ({} entries, dimension {})",
            path.display(),
            catalog.len(),
            catalog.dimension()
        );
        Ok(catalog)
    }

    pub fn dimension(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FeatureDescriptor] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&FeatureDescriptor> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// One unit-length embedding per row, in catalog order.
    pub fn matrix(&self) -> &Array2<f32> {
        &self.matrix
    }
}
