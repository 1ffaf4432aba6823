use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;

use boilerfuel_core::error::RelayError;
use boilerfuel_core::relay::{
    BlobRelay, CreateResponse, MAX_CIPHERTEXT_BYTES, PullResponse, PushRequest, PushResponse,
};

// Ciphertext plus JSON framing.
const BODY_LIMIT: usize = MAX_CIPHERTEXT_BYTES + 64 * 1024;

#[derive(Clone)]
struct AppState {
    relay: Arc<Mutex<BlobRelay>>,
}

#[derive(Deserialize)]
struct PullQuery {
    since: Option<i64>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    PayloadTooLarge(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            Self::Internal(err) => {
                tracing::error!(error = %format!("{err:#}"), "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::TokenNotFound => Self::NotFound("Sync code not found".to_string()),
            RelayError::InvalidToken => Self::BadRequest("Invalid sync code".to_string()),
            e @ RelayError::TimestampAhead { .. } => Self::BadRequest(e.to_string()),
            e @ RelayError::PayloadTooLarge { .. } => Self::PayloadTooLarge(e.to_string()),
            e @ (RelayError::TokenSpaceExhausted | RelayError::Database(_)) => {
                Self::Internal(e.into())
            }
        }
    }
}

// --- Middleware ---

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    headers.insert("cache-control", HeaderValue::from_static("no-store"));
    response
}

// --- Handlers ---

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

async fn create_slot(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CreateResponse>), ApiError> {
    let relay = state.relay.lock().unwrap_or_else(PoisonError::into_inner);
    let token = relay.create()?;
    Ok((StatusCode::CREATED, Json(CreateResponse { token })))
}

async fn push_blob(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(req): Json<PushRequest>,
) -> Result<Json<PushResponse>, ApiError> {
    if req.updated_at <= 0 {
        return Err(ApiError::BadRequest(
            "updated_at must be a positive epoch-ms timestamp".to_string(),
        ));
    }
    let relay = state.relay.lock().unwrap_or_else(PoisonError::into_inner);
    let ack = relay.push(&token, &req.ciphertext, req.updated_at)?;
    Ok(Json(ack))
}

async fn pull_blob(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(params): Query<PullQuery>,
) -> Result<Json<PullResponse>, ApiError> {
    let relay = state.relay.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(Json(relay.pull(&token, params.since)?))
}

async fn delete_slot(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<StatusCode, ApiError> {
    let relay = state.relay.lock().unwrap_or_else(PoisonError::into_inner);
    relay.unpair(&token)?;
    Ok(StatusCode::NO_CONTENT)
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sync", post(create_slot))
        .route(
            "/api/sync/{token}",
            get(pull_blob).put(push_blob).delete(delete_slot),
        )
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub(crate) fn relay_router(relay: BlobRelay) -> Router {
    build_router(AppState {
        relay: Arc::new(Mutex::new(relay)),
    })
}

pub async fn start_server(relay: BlobRelay, port: u16, bind: &str) -> anyhow::Result<()> {
    let app = relay_router(relay);

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    tracing::info!(%bind, port, "relay listening");
    eprintln!("Relay listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
