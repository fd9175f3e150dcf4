//! HTTP grounding service.
//!
//! Exposes the [`GroundingRouter`] as a small JSON API so an answer
//! generator running in another process can fetch evidence per query.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/resolve` | Ground a query; returns the result and its context block |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `ungrounded` (404, only when the
//! request sets `require_grounded`).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::models::{GroundingResult, Query};
use crate::router::{GroundingRouter, RouterError};

/// Start the grounding service on `[server].bind`.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config, router: Arc<GroundingRouter>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "grounding service listening");
    axum::serve(listener, app(router)).await?;
    Ok(())
}

/// Build the service's routes around a shared router.
pub fn app(router: Arc<GroundingRouter>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/resolve", post(handle_resolve))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(router)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RouterError> for AppError {
    fn from(err: RouterError) -> Self {
        let (status, code) = match err {
            RouterError::Ungrounded => (StatusCode::NOT_FOUND, "ungrounded"),
            RouterError::EmptyQuery | RouterError::InvalidScope | RouterError::InvalidCode(_) => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ POST /resolve ============

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    query: String,
    #[serde(default)]
    scope_ids: Vec<String>,
    #[serde(default)]
    code: Option<String>,
    /// Answer 404 instead of an ungrounded result.
    #[serde(default)]
    require_grounded: bool,
}

#[derive(Serialize)]
struct ResolveResponse {
    result: GroundingResult,
    context: String,
}

async fn handle_resolve(
    State(router): State<Arc<GroundingRouter>>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, AppError> {
    let query = Query {
        text: req.query,
        scope_ids: req.scope_ids,
        explicit_code: req.code,
    };
    let mut result = router.resolve(&query).await?;
    if req.require_grounded {
        result = result.require_grounded()?;
    }
    let context = result.context_block();
    Ok(Json(ResolveResponse { result, context }))
}
