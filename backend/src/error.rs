use shared::Language;
use std::time::Duration;

use crate::features::EmbeddingError;
use crate::imaging::ImageError;
use crate::inference::InferenceError;
use crate::ratelimit::RateLimitExceeded;

/// Caller-visible failures of one analysis request. Recommendation problems
/// never show up here; they degrade to the fallback template instead.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Invalid image: {0}")]
    InvalidImage(#[from] ImageError),
    #[error("Model not loaded: {0}")]
    ModelNotLoaded(&'static str),
    #[error("Classification failed: {0}")]
    Inference(InferenceError),
    #[error("Feature extraction failed: {0}")]
    Embedding(EmbeddingError),
    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),
}

impl From<InferenceError> for AnalysisError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::ModelNotLoaded => AnalysisError::ModelNotLoaded("classifier"),
            other => AnalysisError::Inference(other),
        }
    }
}

impl From<EmbeddingError> for AnalysisError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::ModelNotLoaded => AnalysisError::ModelNotLoaded("embedding"),
            other => AnalysisError::Embedding(other),
        }
    }
}

impl AnalysisError {
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AnalysisError::RateLimited(e) => Some(e.retry_after),
            _ => None,
        }
    }

    pub fn is_internal(&self) -> bool {
        !matches!(
            self,
            AnalysisError::InvalidImage(_) | AnalysisError::RateLimited(_)
        )
    }

    /// Text safe to show the person who sent the image.
    pub fn user_message(&self, language: Language) -> String {
        match (self, language) {
            (AnalysisError::InvalidImage(_), Language::En) => {
                "Please resend a valid image (JPEG or PNG photo of the wound).".to_string()
            }
            (AnalysisError::InvalidImage(_), Language::Th) => {
                "กรุณาส่งรูปภาพที่ถูกต้องอีกครั้ง (รูปถ่ายแผลแบบ JPEG หรือ PNG)".to_string()
            }
            (AnalysisError::RateLimited(e), Language::En) => format!(
                "Too many requests. Please try again in {} seconds.",
                retry_secs(e.retry_after)
            ),
            (AnalysisError::RateLimited(e), Language::Th) => format!(
                "คุณส่งคำขอบ่อยเกินไป กรุณาลองใหม่อีกครั้งใน {} วินาที",
                retry_secs(e.retry_after)
            ),
            (_, Language::En) => {
                "Analysis is temporarily unavailable. Please try again later.".to_string()
            }
            (_, Language::Th) => "ระบบวิเคราะห์ไม่พร้อมใช้งานชั่วคราว กรุณาลองใหม่ภายหลัง".to_string(),
        }
    }
}

fn retry_secs(retry_after: Duration) -> u64 {
    retry_after.as_secs_f64().ceil().max(1.0) as u64
}
