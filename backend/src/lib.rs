pub mod cache;
pub mod config;
pub mod error;
pub mod features;
pub mod imaging;
pub mod inference;
pub mod pipeline;
pub mod ratelimit;
pub mod recommend;

pub use error::AnalysisError;
pub use pipeline::{PipelineConfig, PipelineStats, WoundAnalysisPipeline};
