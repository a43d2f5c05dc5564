pub mod cache_service;
pub mod models;

pub use cache_service::{CacheConfig, CacheService};
pub use models::CacheKey;
