use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumCount, EnumIter, EnumString};

/// Wound categories produced by the classifier, in model output order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    EnumCount,
    AsRefStr,
)]
pub enum ClassLabel {
    Abrasion,
    Bruise,
    Burn,
    Cut,
    Normal,
}

impl ClassLabel {
    pub const ALL: [ClassLabel; 5] = [
        ClassLabel::Abrasion,
        ClassLabel::Bruise,
        ClassLabel::Burn,
        ClassLabel::Cut,
        ClassLabel::Normal,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Tie-break rank when two labels share the maximal probability. Higher wins.
    pub fn priority(self) -> u8 {
        match self {
            ClassLabel::Cut => 4,
            ClassLabel::Burn => 3,
            ClassLabel::Bruise => 2,
            ClassLabel::Abrasion => 1,
            ClassLabel::Normal => 0,
        }
    }

    pub fn localized_name(self, language: Language) -> &'static str {
        match (self, language) {
            (ClassLabel::Abrasion, Language::En) => "Abrasion",
            (ClassLabel::Bruise, Language::En) => "Bruise",
            (ClassLabel::Burn, Language::En) => "Burn",
            (ClassLabel::Cut, Language::En) => "Cut",
            (ClassLabel::Normal, Language::En) => "Normal skin",
            (ClassLabel::Abrasion, Language::Th) => "แผลถลอก",
            (ClassLabel::Bruise, Language::Th) => "รอยช้ำ",
            (ClassLabel::Burn, Language::Th) => "แผลไฟไหม้",
            (ClassLabel::Cut, Language::Th) => "แผลบาด",
            (ClassLabel::Normal, Language::Th) => "ผิวหนังปกติ",
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Th,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Th => "th",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: ClassLabel,
    pub confidence: f32,
    /// Indexed like `ClassLabel::ALL`.
    pub probabilities: Vec<f32>,
}

impl ClassificationResult {
    pub fn probability(&self, label: ClassLabel) -> f32 {
        self.probabilities
            .get(label.index())
            .copied()
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatch {
    pub feature_id: String,
    pub description: String,
    pub labels: Vec<ClassLabel>,
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationOrigin {
    External,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub text: String,
    pub language: Language,
    pub origin: RecommendationOrigin,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageReports {
    pub normalize: StageReport,
    pub classify: StageReport,
    pub extract_features: StageReport,
    pub recommend: StageReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub image_hash: String,
    pub language: Language,
    pub classification: ClassificationResult,
    pub features: Vec<FeatureMatch>,
    pub recommendation: Recommendation,
    pub stages: StageReports,
    pub analyzed_at: String,
}
