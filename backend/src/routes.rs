use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{Error, HttpRequest, HttpResponse, web};
use futures::{StreamExt, TryStreamExt};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use shared::Language;
use uuid::Uuid;
use woundcare::imaging::RawImage;
use woundcare::{AnalysisError, PipelineStats, WoundAnalysisPipeline};

pub const USER_HEADER: &str = "X-User-Id";
const IMAGE_FIELD: &str = "image";

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    stats: PipelineStats,
}

#[derive(Deserialize)]
struct AnalyzeQuery {
    lang: Option<Language>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/analyze").route(web::post().to(handle_analyze)))
        .service(web::resource("/health").route(web::get().to(health)));
}

fn bad_request(message: impl Into<String>) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponse {
        error: message.into(),
    })
}

fn error_response(err: &AnalysisError, language: Language) -> HttpResponse {
    let body = ErrorResponse {
        error: err.user_message(language),
    };
    match err {
        AnalysisError::InvalidImage(_) => HttpResponse::BadRequest().json(body),
        AnalysisError::RateLimited(e) => HttpResponse::TooManyRequests()
            .insert_header((
                header::RETRY_AFTER,
                e.retry_after.as_secs_f64().ceil().max(1.0).to_string(),
            ))
            .json(body),
        _ => HttpResponse::ServiceUnavailable().json(body),
    }
}

async fn handle_analyze(
    req: HttpRequest,
    pipeline: web::Data<WoundAnalysisPipeline>,
    query: web::Query<AnalyzeQuery>,
    mut payload: Multipart,
) -> Result<HttpResponse, Error> {
    let request_id = Uuid::new_v4();
    let language = query.lang.unwrap_or(pipeline.config().language);

    let user_id = match req
        .headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        Some(user_id) => user_id.to_string(),
        None => return Ok(bad_request(format!("Missing {} header", USER_HEADER))),
    };

    let limit = pipeline.max_image_bytes();
    let mut upload = None;
    while let Some(mut field) = payload.try_next().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let mime_type = field
            .content_type()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_default();
        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk?;
            // Anything past the limit is only counted, not kept.
            if bytes.len() <= limit {
                bytes.extend_from_slice(&data);
            }
        }
        upload = Some(RawImage::new(bytes, mime_type));
        break;
    }

    let Some(raw) = upload else {
        return Ok(bad_request(format!("Missing multipart field '{}'", IMAGE_FIELD)));
    };

    info!(
        "[{}] Analyze request from {} ({} bytes, {})",
        request_id,
        user_id,
        raw.bytes.len(),
        raw.mime_type
    );

    match pipeline.analyze_in(&user_id, raw, language).await {
        Ok(result) => Ok(HttpResponse::Ok().json(&*result)),
        Err(e) => {
            if e.is_internal() {
                error!("[{}] Analysis failed: {}", request_id, e);
            } else {
                warn!("[{}] Analysis rejected: {}", request_id, e);
            }
            Ok(error_response(&e, language))
        }
    }
}

async fn health(pipeline: web::Data<WoundAnalysisPipeline>) -> HttpResponse {
    let stats = pipeline.stats();
    let ready = stats.classifier_loaded && stats.embedder_loaded;
    let body = HealthResponse {
        status: if ready { "ok" } else { "degraded" },
        stats,
    };
    if ready {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, test};
    use ndarray::{Array1, Array2};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::Duration;
    use woundcare::cache::{CacheConfig, CacheService};
    use woundcare::features::{ExtractorConfig, FeatureCatalog, FeatureDescriptor, FeatureExtractor};
    use woundcare::imaging::{ImageNormalizer, NormalizerConfig};
    use woundcare::inference::{ClassifierConfig, ClassifierEngine, PooledLinearModel};
    use woundcare::ratelimit::{RateLimitConfig, RateLimiter};
    use woundcare::recommend::{OfflineGenerator, RecommendationClient, RecommendationConfig};
    use woundcare::PipelineConfig;

    fn pipeline(max_requests: u32) -> WoundAnalysisPipeline {
        let classifier = PooledLinearModel::new(
            "always-cut",
            1,
            Array2::zeros((5, 3)),
            Array1::from(vec![0.0, 0.0, 0.0, 4.0, 0.0]),
        )
        .unwrap();
        let embedder =
            PooledLinearModel::new("identity", 1, Array2::eye(3), Array1::from(vec![1.0, 0.0, 0.0]))
                .unwrap();
        let catalog = FeatureCatalog::new(vec![
            FeatureDescriptor::new(
                "linear-edges",
                vec![shared::ClassLabel::Cut],
                HashMap::from([(Language::En, "Clean linear edges".to_string())]),
                vec![1.0, 0.0, 0.0],
            )
            .unwrap(),
        ])
        .unwrap();

        WoundAnalysisPipeline::new(
            PipelineConfig {
                language: Language::En,
                ..Default::default()
            },
            ImageNormalizer::new(NormalizerConfig::default()),
            Arc::new(ClassifierEngine::with_model(
                ClassifierConfig::default(),
                Arc::new(classifier),
            )),
            Arc::new(FeatureExtractor::with_model(
                ExtractorConfig {
                    similarity_threshold: -1.0,
                    ..Default::default()
                },
                Arc::new(catalog),
                Arc::new(embedder),
            )),
            RecommendationClient::new(Arc::new(OfflineGenerator), RecommendationConfig::default()),
            RateLimiter::new(RateLimitConfig {
                max_requests,
                window: Duration::from_secs(60),
                shards: 2,
            }),
            CacheService::new(CacheConfig::default()),
        )
    }

    fn png() -> Vec<u8> {
        let image = image::RgbImage::from_pixel(64, 64, image::Rgb([200, 40, 40]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn multipart(mime: &str, bytes: &[u8]) -> (String, Vec<u8>) {
        let boundary = "woundcare-test-boundary";
        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"wound\"\r\nContent-Type: {mime}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        (format!("multipart/form-data; boundary={boundary}"), body)
    }

    fn analyze_request(user: Option<&str>, mime: &str, bytes: &[u8]) -> test::TestRequest {
        let (content_type, body) = multipart(mime, bytes);
        let mut req = test::TestRequest::post()
            .uri("/api/analyze")
            .insert_header((header::CONTENT_TYPE, content_type))
            .set_payload(body);
        if let Some(user) = user {
            req = req.insert_header((USER_HEADER, user));
        }
        req
    }

    #[actix_web::test]
    async fn health_reports_loaded_models() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(pipeline(5)))
                .configure(configure_routes),
        )
        .await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert!(resp.status().is_success());
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["classifier_loaded"], true);
    }

    #[actix_web::test]
    async fn analyze_returns_result() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(pipeline(5)))
                .configure(configure_routes),
        )
        .await;
        let resp = test::call_service(&app, analyze_request(Some("u1"), "image/png", &png()).to_request()).await;
        assert!(resp.status().is_success());
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["classification"]["label"], "Cut");
        assert_eq!(body["recommendation"]["origin"], "fallback");
        assert_eq!(body["features"][0]["feature_id"], "linear-edges");
    }

    #[actix_web::test]
    async fn missing_user_header_is_bad_request() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(pipeline(5)))
                .configure(configure_routes),
        )
        .await;
        let resp = test::call_service(&app, analyze_request(None, "image/png", &png()).to_request()).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn corrupt_image_is_bad_request() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(pipeline(5)))
                .configure(configure_routes),
        )
        .await;
        let resp = test::call_service(
            &app,
            analyze_request(Some("u1"), "image/png", b"\x89PNG\r\n\x1a\nnot really").to_request(),
        )
        .await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("valid image"));
    }

    #[actix_web::test]
    async fn rate_limited_requests_get_retry_after() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(pipeline(1)))
                .configure(configure_routes),
        )
        .await;
        let first = test::call_service(&app, analyze_request(Some("u1"), "image/png", &png()).to_request()).await;
        assert!(first.status().is_success());

        let second = test::call_service(&app, analyze_request(Some("u1"), "image/png", &png()).to_request()).await;
        assert_eq!(second.status(), actix_web::http::StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = second
            .headers()
            .get(header::RETRY_AFTER)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry_after >= 1 && retry_after <= 60);
    }
}
