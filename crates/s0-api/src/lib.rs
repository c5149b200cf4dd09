//! HTTP service boundary for search and generation.
//!
//! Routes:
//!
//! - `POST /search` `{query, limit = 10, mode = "per_space" | "merged"}`
//! - `POST /generate` `{query, output_format = "html", similar_count?}`
//! - `GET /health`
//!
//! Fatal pipeline errors map to `500 {"detail": ...}`; malformed requests to
//! `400 {"detail": ...}`. A client disconnect drops the handler future, which
//! cancels its in-flight corpus queries and completion stream.
//!
//! # Examples
//!
//! ```no_run
//! use s0_core::S0Config;
//! use s0_forge::pipeline::GenerationPipeline;
//!
//! # async fn example() -> Result<(), s0_core::S0Error> {
//! let config = S0Config::default();
//! let pipeline = GenerationPipeline::from_config(&config).await?;
//! s0_api::serve(pipeline, &config).await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use s0_core::{OutputFormat, S0Config, S0Error, SearchMode};
use s0_forge::pipeline::{GenerateResponse, GenerationPipeline};
use s0_lens::search::SearchResponse;
use serde::{Deserialize, Serialize};

const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Shared request state.
#[derive(Clone, Debug)]
pub struct AppState {
    pipeline: GenerationPipeline,
    default_similar_count: usize,
}

impl AppState {
    /// Wrap a pipeline; `default_similar_count` applies when a generate
    /// request omits `similar_count`.
    pub fn new(pipeline: GenerationPipeline, default_similar_count: usize) -> Self {
        Self {
            pipeline,
            default_similar_count,
        }
    }
}

/// Body of `POST /search`.
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    /// Free-text query.
    pub query: String,
    /// Maximum results (per space in `per_space` mode).
    #[serde(default = "default_search_limit")]
    pub limit: usize,
    /// Whether to return per-space lists or one merged list.
    #[serde(default)]
    pub mode: SearchMode,
}

fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

/// Body of `POST /generate`.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// Description of the component to generate.
    pub query: String,
    /// Code shape to generate.
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Components to retrieve as references.
    pub similar_count: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            detail: message.into(),
        }),
    )
}

fn internal_error(err: S0Error) -> ApiError {
    tracing::error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            detail: err.to_string(),
        }),
    )
}

/// Build the router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/search", post(search_handler))
        .route("/generate", post(generate_handler))
        .with_state(state)
}

/// Bind `config.server.bind` and serve until the process is stopped.
///
/// # Errors
///
/// Returns [`S0Error::Config`] for an unparsable bind address, or
/// [`S0Error::Io`] if binding or serving fails.
pub async fn serve(pipeline: GenerationPipeline, config: &S0Config) -> Result<(), S0Error> {
    let addr: SocketAddr = config.server.bind.parse().map_err(|e| {
        S0Error::Config(format!("invalid bind address {}: {e}", config.server.bind))
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = router(AppState::new(pipeline, config.generation.similar_count));

    tracing::info!(%addr, "s0 API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "healthy" })
}

async fn search_handler(
    State(state): State<AppState>,
    request: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Json(request) = request.map_err(|e| bad_request(e.body_text()))?;
    let limit = request.limit.min(state.pipeline.max_limit());
    tracing::info!(query = %request.query, limit, mode = ?request.mode, "search request");

    let response = state
        .pipeline
        .search()
        .search(&request.query, limit, request.mode)
        .await
        .map_err(internal_error)?;
    Ok(Json(response))
}

async fn generate_handler(
    State(state): State<AppState>,
    request: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let Json(request) = request.map_err(|e| bad_request(e.body_text()))?;
    let similar_count = request
        .similar_count
        .unwrap_or(state.default_similar_count);
    tracing::info!(query = %request.query, format = %request.output_format, "generation request");

    let outcome = state
        .pipeline
        .generate(&request.query, request.output_format, similar_count)
        .await
        .map_err(internal_error)?;
    Ok(Json(outcome.into()))
}
