use std::sync::Arc;

use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, Request, State,
    },
    http::{HeaderMap, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use uuid::Uuid;

use crate::config::CorsOrigins;
use crate::error::{ErrorKind, ResolveError};
use crate::service::{ResolutionService, TranscriptRequest, TranscriptResponse};

pub const SERVICE_NAME: &str = "yt-transcript";

const REQUEST_ID_HEADER: &str = "x-request-id";
const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    service: ResolutionService,
    api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(service: ResolutionService, api_key: Option<String>) -> Self {
        Self {
            service,
            api_key: api_key.map(Arc::from),
        }
    }
}

/// Per-request identifier, generated by [`assign_request_id`].
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

pub fn build_router(state: AppState, cors_origins: &CorsOrigins) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/transcript/{video_id}",
            get(get_transcript).delete(evict_transcript),
        )
        .layer(middleware::from_fn(assign_request_id))
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &CorsOrigins) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origins {
        CorsOrigins::Any => layer.allow_origin(Any),
        CorsOrigins::List(list) => {
            let origins: Vec<HeaderValue> = list
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        log::warn!("Ignoring invalid CORS origin '{origin}'");
                        None
                    }
                })
                .collect();
            layer.allow_origin(AllowOrigin::list(origins))
        }
    }
}

async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    log::info!(
        "Request {request_id}: {} {}",
        request.method(),
        request.uri().path()
    );
    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cache = state.service.cache();
    Json(serde_json::json!({
        "ok": true,
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "cache": {
            "entries": cache.len(),
            "capacity": cache.capacity(),
            "ttl_seconds": cache.ttl().as_secs(),
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct TranscriptQuery {
    lang: Option<String>,
    format: Option<String>,
}

#[derive(Serialize)]
struct TranscriptBody {
    #[serde(flatten)]
    transcript: TranscriptResponse,
    request_id: String,
}

/// Rejects the request unless it carries the configured API key.
fn authorize(state: &AppState, headers: &HeaderMap, request_id: &str) -> Result<(), ApiError> {
    let Some(expected) = &state.api_key else {
        return Ok(());
    };
    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    if provided != Some(&**expected) {
        log::warn!("Request {request_id}: Unauthorized access attempt");
        return Err(ApiError::new(ErrorKind::Unauthorized, request_id.to_string()));
    }
    Ok(())
}

/// Turns a malformed path or query string into `invalid_request` instead of
/// axum's plain-text rejection.
fn extracted<T, R: std::fmt::Display>(
    result: Result<T, R>,
    request_id: &str,
) -> Result<T, ApiError> {
    result.map_err(|rejection| {
        log::warn!("Request {request_id}: Malformed request: {rejection}");
        ApiError::new(ErrorKind::InvalidRequest, request_id.to_string())
    })
}

fn parse_request(
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<TranscriptQuery>, QueryRejection>,
    request_id: &str,
) -> Result<TranscriptRequest, ApiError> {
    let Path(video_id) = extracted(path, request_id)?;
    let Query(query) = extracted(query, request_id)?;
    TranscriptRequest::parse(&video_id, query.lang.as_deref(), query.format.as_deref())
        .map_err(|err| ApiError::from_resolve(err, &video_id, request_id.to_string()))
}

async fn get_transcript(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<TranscriptQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Json<TranscriptBody>, ApiError> {
    authorize(&state, &headers, &request_id)?;
    let request = parse_request(path, query, &request_id)?;
    let video_id = request.video_id().to_string();

    match state.service.resolve(&request).await {
        Ok(transcript) => {
            log::info!("Request {request_id}: Served transcript for video {video_id}");
            Ok(Json(TranscriptBody {
                transcript,
                request_id,
            }))
        }
        Err(err) => Err(ApiError::from_resolve(err, &video_id, request_id)),
    }
}

#[derive(Serialize)]
struct EvictionBody {
    video_id: String,
    evicted: bool,
    request_id: String,
}

/// Drops the cached transcript a GET with the same parameters would hit.
async fn evict_transcript(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<TranscriptQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Json<EvictionBody>, ApiError> {
    authorize(&state, &headers, &request_id)?;
    let request = parse_request(path, query, &request_id)?;
    let video_id = request.video_id().to_string();
    let evicted = state
        .service
        .invalidate(&request)
        .map_err(|err| ApiError::from_resolve(err, &video_id, request_id.clone()))?;

    log::info!("Request {request_id}: Cache eviction for video {video_id}, evicted={evicted}");
    Ok(Json(EvictionBody {
        video_id,
        evicted,
        request_id,
    }))
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorKind,
    message: &'static str,
    request_id: String,
}

/// Error response: status, code and message come from the kind alone.
#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    request_id: String,
}

impl ApiError {
    fn new(kind: ErrorKind, request_id: String) -> Self {
        Self { kind, request_id }
    }

    fn from_resolve(err: ResolveError, video_id: &str, request_id: String) -> Self {
        let kind = err.kind();
        match kind {
            ErrorKind::InternalError => {
                log::error!("Request {request_id}: Internal error for video {video_id}: {err}")
            }
            ErrorKind::RateLimited => {
                log::error!("Request {request_id}: Rate limited for video {video_id}")
            }
            _ => log::warn!("Request {request_id}: {kind} for video {video_id}: {err}"),
        }
        Self::new(kind, request_id)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind,
            message: self.kind.message(),
            request_id: self.request_id,
        };
        (self.kind.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::cache::TranscriptCache;
    use crate::language::FallbackResolver;
    use crate::service::fakes::ScriptedUpstream;
    use crate::transcript::{TranscriptResult, TranscriptSegment, UpstreamError};

    fn router(
        outcome: Result<TranscriptResult, UpstreamError>,
        api_key: Option<&str>,
    ) -> (Router, Arc<ScriptedUpstream>) {
        let upstream = Arc::new(ScriptedUpstream::new(outcome));
        let cache = Arc::new(TranscriptCache::new(8, Duration::from_secs(60)).unwrap());
        let service = ResolutionService::new(
            FallbackResolver::default(),
            cache,
            Arc::clone(&upstream) as Arc<dyn crate::transcript::UpstreamClient>,
        );
        let state = AppState::new(service, api_key.map(str::to_string));
        (build_router(state, &CorsOrigins::Any), upstream)
    }

    fn transcript() -> TranscriptResult {
        TranscriptResult::new(
            "dQw4w9WgXcQ",
            "en",
            vec![
                TranscriptSegment::new("Never gonna give you up.", 0.0, 2.0),
                TranscriptSegment::new("Never gonna let you down.", 2.0, 2.5),
            ],
        )
    }

    async fn send(
        router: Router,
        request: Request<Body>,
    ) -> (StatusCode, HeaderMap, serde_json::Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _) = router(Ok(transcript()), Some("secret"));
        let (status, headers, body) = send(router, get("/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(headers.contains_key("x-request-id"));
        assert_eq!(body["ok"], true);
        assert_eq!(body["service"], SERVICE_NAME);
        assert_eq!(body["cache"]["capacity"], 8);
        assert_eq!(body["cache"]["entries"], 0);
    }

    #[tokio::test]
    async fn test_transcript_json() {
        let (router, upstream) = router(Ok(transcript()), None);
        let (status, headers, body) = send(router, get("/transcript/dQw4w9WgXcQ?lang=en")).await;

        assert_eq!(status, StatusCode::OK);
        let request_id = headers["x-request-id"].to_str().unwrap();
        assert_eq!(body["request_id"], request_id);
        assert_eq!(body["video_id"], "dQw4w9WgXcQ");
        assert_eq!(
            body["text"],
            "Never gonna give you up. Never gonna let you down."
        );
        assert_eq!(body["language_used"], "en");
        assert_eq!(body["segments"].as_array().unwrap().len(), 2);
        assert_eq!(body["segments"][1]["start"], 2.0);
        assert_eq!(upstream.requested()[0].1[0], "en");
    }

    #[tokio::test]
    async fn test_transcript_text_format() {
        let (router, _) = router(Ok(transcript()), None);
        let (status, _, body) = send(router, get("/transcript/dQw4w9WgXcQ?format=text")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.get("segments").is_none());
        assert!(body.get("language_used").is_none());
        assert!(body["text"].as_str().unwrap().starts_with("Never gonna"));
    }

    #[tokio::test]
    async fn test_invalid_format_is_bad_request() {
        let (router, upstream) = router(Ok(transcript()), None);
        let (status, headers, body) = send(router, get("/transcript/dQw4w9WgXcQ?format=xml")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");
        assert_eq!(body["request_id"], headers["x-request-id"].to_str().unwrap());
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_path_and_query_are_json_errors() {
        let (router, upstream) = router(Ok(transcript()), None);
        for uri in [
            "/transcript/%FF",
            "/transcript/dQw4w9WgXcQ?format=json&format=text",
            "/transcript/dQw4w9WgXcQ?lang=en&lang=pt",
        ] {
            let (status, headers, body) = send(router.clone(), get(uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["error"], "invalid_request", "{uri}");
            assert_eq!(body["request_id"], headers["x-request-id"].to_str().unwrap());
        }

        let request = Request::builder()
            .method("DELETE")
            .uri("/transcript/%FF")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_language_is_bad_request() {
        let (router, upstream) = router(Ok(transcript()), None);
        let uri = "/transcript/dQw4w9WgXcQ?lang=en%0D%0AX";
        let (status, _, body) = send(router, get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_api_key_required_when_configured() {
        let (router, upstream) = router(Ok(transcript()), Some("secret"));

        let (status, _, body) = send(router.clone(), get("/transcript/dQw4w9WgXcQ")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let wrong = Request::builder()
            .uri("/transcript/dQw4w9WgXcQ")
            .header("x-api-key", "guess")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(router.clone(), wrong).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(upstream.calls(), 0);

        let right = Request::builder()
            .uri("/transcript/dQw4w9WgXcQ")
            .header("x-api-key", "secret")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(router, right).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_upstream_errors_map_to_statuses() {
        let cases = [
            (UpstreamError::NoTranscript, StatusCode::NOT_FOUND, "no_transcript"),
            (UpstreamError::VideoUnavailable, StatusCode::NOT_FOUND, "video_unavailable"),
            (UpstreamError::RateLimited, StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            (
                UpstreamError::Unknown("connection reset by peer".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
            ),
        ];
        for (upstream_err, expected_status, expected_code) in cases {
            let (router, _) = router(Err(upstream_err), None);
            let (status, _, body) = send(router, get("/transcript/dQw4w9WgXcQ")).await;
            assert_eq!(status, expected_status);
            assert_eq!(body["error"], expected_code);
            assert_eq!(
                body.as_object().unwrap().keys().collect::<Vec<_>>(),
                vec!["error", "message", "request_id"]
            );
            assert!(!body["message"].as_str().unwrap().contains("connection reset"));
        }
    }

    #[tokio::test]
    async fn test_delete_evicts_cached_transcript() {
        let (router, upstream) = router(Ok(transcript()), Some("secret"));
        let request = |method: &str| {
            Request::builder()
                .method(method)
                .uri("/transcript/dQw4w9WgXcQ?lang=en")
                .header("x-api-key", "secret")
                .body(Body::empty())
                .unwrap()
        };

        let (status, _, _) = send(router.clone(), request("GET")).await;
        assert_eq!(status, StatusCode::OK);
        let (_, _, health) = send(router.clone(), get("/health")).await;
        assert_eq!(health["cache"]["entries"], 1);

        let (status, _, body) = send(router.clone(), request("DELETE")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["evicted"], true);
        let (_, _, body) = send(router.clone(), request("DELETE")).await;
        assert_eq!(body["evicted"], false);

        send(router, request("GET")).await;
        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test]
    async fn test_delete_requires_api_key() {
        let (router, _) = router(Ok(transcript()), Some("secret"));
        let request = Request::builder()
            .method("DELETE")
            .uri("/transcript/dQw4w9WgXcQ")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_request_ids_are_unique() {
        let (router, _) = router(Ok(transcript()), None);
        let (_, first, _) = send(router.clone(), get("/health")).await;
        let (_, second, _) = send(router, get("/health")).await;
        assert_ne!(first["x-request-id"], second["x-request-id"]);
    }
}
