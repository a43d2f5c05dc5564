mod routes;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use routes::{USER_HEADER, configure_routes};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use woundcare::cache::CacheService;
use woundcare::config::{ConfigError, Settings};
use woundcare::features::{CatalogError, EmbeddingError, FeatureCatalog, FeatureExtractor};
use woundcare::imaging::ImageNormalizer;
use woundcare::inference::{ClassifierEngine, InferenceError, load_classifier, load_embedder};
use woundcare::ratelimit::RateLimiter;
use woundcare::recommend::{
    GenerationError, OfflineGenerator, RecommendationClient, TextGenerator, TyphoonClient,
};
use woundcare::WoundAnalysisPipeline;

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

async fn build_pipeline(settings: &Settings) -> Result<WoundAnalysisPipeline, StartupError> {
    let classifier_path = settings
        .models
        .classifier_path
        .clone()
        .ok_or(ConfigError::Missing("CLASSIFIER_MODEL_PATH"))?;
    let embedding_path = settings
        .models
        .embedding_path
        .clone()
        .ok_or(ConfigError::Missing("EMBEDDING_MODEL_PATH"))?;
    let catalog_path = settings
        .models
        .catalog_path
        .clone()
        .ok_or(ConfigError::Missing("FEATURE_CATALOG_PATH"))?;

    let catalog = Arc::new(FeatureCatalog::from_file(&catalog_path)?);

    let classifier = Arc::new(ClassifierEngine::new(settings.to_classifier_config()));
    classifier
        .load_with(|| load_classifier(&classifier_path))
        .await?;

    let extractor = Arc::new(FeatureExtractor::new(settings.to_extractor_config(), catalog));
    extractor
        .load_with(|| load_embedder(&embedding_path))
        .await?;

    let generator: Arc<dyn TextGenerator> = if settings.recommendation.mock {
        log::warn!("MOCK_TYPHOON_API is set, recommendations will use local templates only");
        Arc::new(OfflineGenerator)
    } else {
        let client = TyphoonClient::new(settings.to_typhoon_config()?)?;
        log::info!("Typhoon endpoint: {}", client.endpoint());
        Arc::new(client)
    };

    Ok(WoundAnalysisPipeline::new(
        settings.to_pipeline_config(),
        ImageNormalizer::new(settings.to_normalizer_config()),
        classifier,
        extractor,
        RecommendationClient::new(generator, settings.to_recommendation_config()),
        RateLimiter::new(settings.to_rate_limit_config()),
        CacheService::new(settings.to_cache_config()),
    ))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    let settings = Settings::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::other(e)
    })?;

    let pipeline = match build_pipeline(&settings).await {
        Ok(pipeline) => Arc::new(pipeline),
        Err(e) => {
            log::error!("Failed to initialise analysis pipeline: {}", e);
            return Err(std::io::Error::other(e));
        }
    };

    let purge_every = Duration::from_secs(
        settings
            .pipeline
            .rate_limit_window_secs
            .min(settings.pipeline.cache_ttl_secs)
            .max(1),
    );
    let purge_pipeline = pipeline.clone();
    let shutdown = pipeline.shutdown_token();
    actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(purge_every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    purge_pipeline.purge_expired();
                }
            }
        }
    });

    let bind_address = format!("0.0.0.0:{}", settings.port);
    log::info!("Starting server on {}", bind_address);

    let data = web::Data::from(pipeline.clone());
    let result = HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .allowed_header(USER_HEADER)
                    .expose_headers(vec![actix_web::http::header::RETRY_AFTER])
                    .max_age(3600),
            )
            .app_data(data.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await;

    pipeline.shutdown();
    result
}
