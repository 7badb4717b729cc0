use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use super::observability::{Observability, ObservabilitySnapshot};
use super::retry::Deadline;
use super::{ChatGateway, GatewayError};
use crate::astrology::AstrologyDataClient;
use crate::geocode::PlaceResolver;
use crate::types::ChatRequest;

static REQUEST_ID_SEQ: AtomicU64 = AtomicU64::new(1);

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Marks the 500 produced by the panic handler so [`assign_request_id`]
/// can restamp it with the caller's id.
#[derive(Debug, Clone, Copy)]
struct HandlerPanicked;

/// Shared handles for every route. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    chat: Arc<ChatGateway>,
    astrology: Option<Arc<AstrologyDataClient>>,
    geocoder: Option<Arc<dyn PlaceResolver>>,
    observability: Arc<Observability>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("chat", &self.chat)
            .field("astrology", &self.astrology)
            .field("geocoder", &self.geocoder.is_some())
            .finish()
    }
}

impl AppState {
    pub fn new(chat: ChatGateway) -> Self {
        let observability = chat.observability().clone();
        Self {
            chat: Arc::new(chat),
            astrology: None,
            geocoder: None,
            observability,
        }
    }

    pub fn with_astrology(mut self, client: AstrologyDataClient) -> Self {
        self.astrology = Some(Arc::new(client));
        self
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn PlaceResolver>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn chat(&self) -> &Arc<ChatGateway> {
        &self.chat
    }

    pub fn observability(&self) -> &Arc<Observability> {
        &self.observability
    }
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    request_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct DataResponse<T> {
    success: bool,
    data: T,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatHealthResponse {
    status: &'static str,
    api_key_available: bool,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct GeocodeQuery {
    #[serde(default)]
    q: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)]);

    Router::new()
        .route("/chat", get(chat_health).post(handle_chat))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/geocode", get(handle_geocode))
        .route("/astrology/*endpoint", get(handle_astrology))
        .fallback(handle_fallback)
        .layer(cors)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(axum::middleware::from_fn(assign_request_id))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn metrics(State(state): State<AppState>) -> Json<ObservabilitySnapshot> {
    Json(state.observability.snapshot())
}

async fn chat_health(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let request_id = request_id(&headers);
    if !query.contains_key("health") {
        return error_response(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "use POST /chat, or GET /chat?health for a health check",
            &request_id,
        );
    }

    let body = ChatHealthResponse {
        status: "ok",
        api_key_available: state.chat.api_key_available(),
        timestamp: rfc3339_now(),
    };
    with_request_id(Json(body).into_response(), &request_id)
}

async fn handle_chat(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request_id = request_id(&headers);

    let request = match serde_json::from_slice::<ChatRequest>(&body) {
        Ok(request) => request,
        Err(err) => {
            state.observability.record_request();
            state.observability.record_validation_failure();
            warn!(request_id = %request_id, error = %err, "rejecting malformed chat body");
            return error_response(
                StatusCode::BAD_REQUEST,
                "validation_error",
                format!("invalid request body: {err}"),
                &request_id,
            );
        }
    };

    match state.chat.handle(request, &request_id).await {
        Ok(outcome) => {
            info!(
                request_id = %request_id,
                provider = outcome.provider.as_str(),
                kind = outcome.kind.as_str(),
                reprompted = outcome.reprompted,
                "chat completed"
            );
            with_request_id(Json(outcome.response).into_response(), &request_id)
        }
        Err(err) => gateway_error_response(&err, &request_id),
    }
}

async fn handle_geocode(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<GeocodeQuery>,
) -> Response {
    let request_id = request_id(&headers);
    let Some(geocoder) = state.geocoder.as_ref() else {
        return gateway_error_response(
            &GatewayError::Internal {
                message: "geocoding is not configured".to_string(),
            },
            &request_id,
        );
    };
    let place = query.q.unwrap_or_default();

    match geocoder.resolve(&place).await {
        Ok(coordinates) => data_response(coordinates, &request_id),
        Err(err) => {
            record_failure(&state.observability, &err);
            gateway_error_response(&err, &request_id)
        }
    }
}

async fn handle_astrology(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(endpoint): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
) -> Response {
    let request_id = request_id(&headers);
    let Some(client) = state.astrology.as_ref() else {
        return gateway_error_response(
            &GatewayError::auth_config("data provider credentials are not configured"),
            &request_id,
        );
    };

    let deadline = Deadline::after(state.chat.request_deadline());
    match client.get(&endpoint, &query, deadline).await {
        Ok(data) => data_response::<Value>(data, &request_id),
        Err(err) => {
            record_failure(&state.observability, &err);
            warn!(request_id = %request_id, endpoint = %endpoint, error = %err, "data request failed");
            gateway_error_response(&err, &request_id)
        }
    }
}

async fn handle_fallback(headers: HeaderMap) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        "not_found",
        "no such route",
        &request_id(&headers),
    )
}

fn record_failure(observability: &Observability, err: &GatewayError) {
    match err {
        GatewayError::Validation { .. } => observability.record_validation_failure(),
        _ => observability.record_error(),
    }
}

/// Pins one request id on the way in, so handlers and the panic envelope
/// agree with the `x-request-id` the caller sees.
async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let request_id = request_id(request.headers());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let response = next.run(request).await;
    if response.extensions().get::<HandlerPanicked>().is_some() {
        error!(request_id = %request_id, "handler panicked");
        return internal_error_response(&request_id);
    }
    with_request_id(response, &request_id)
}

fn panic_response(_panic: Box<dyn std::any::Any + Send + 'static>) -> Response<Body> {
    let mut response = internal_error_response(&generate_request_id());
    response.extensions_mut().insert(HandlerPanicked);
    response
}

fn internal_error_response(request_id: &str) -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "internal error",
        request_id,
    )
}

fn data_response<T: Serialize>(data: T, request_id: &str) -> Response {
    with_request_id(
        Json(DataResponse {
            success: true,
            data,
        })
        .into_response(),
        request_id,
    )
}

fn gateway_error_response(err: &GatewayError, request_id: &str) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_response(status, err.code(), err.to_string(), request_id)
}

fn error_response(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    request_id: &str,
) -> Response {
    let body = ErrorResponse {
        success: false,
        error: ErrorDetail {
            code,
            message: message.into(),
            request_id: request_id.to_string(),
        },
    };
    with_request_id((status, Json(body)).into_response(), request_id)
}

fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn request_id(headers: &HeaderMap) -> String {
    extract_header(headers, REQUEST_ID_HEADER).unwrap_or_else(generate_request_id)
}

fn extract_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty() && value.len() <= 128)
}

fn generate_request_id() -> String {
    let seq = REQUEST_ID_SEQ.fetch_add(1, Ordering::Relaxed);
    let ts_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0);
    format!("astro-{ts_ms}-{seq}")
}

fn rfc3339_now() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
