use axum::{
    body::Body,
    extract::{Path as UrlPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::bridge::ReviewBridge;
use crate::error::ReviewError;
use crate::models::{AiRequest, BackendKind, CommitPage, DiffEntry, ToolStatus};

pub type AppState = Arc<ReviewBridge>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/commits", post(list_commits))
        .route("/diff", post(get_diff))
        .route("/analyze", post(analyze))
        .route("/select-directory", get(select_directory))
        .route("/tools/:backend", get(tool_status))
        .route("/tools/:backend/refresh", post(refresh_tool_status))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ReviewError {
    fn into_response(self) -> Response {
        let status = match &self {
            ReviewError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ReviewError::ToolUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ReviewError::VcsCommandFailed { .. } => StatusCode::BAD_GATEWAY,
            ReviewError::InvalidCredential => StatusCode::UNAUTHORIZED,
            ReviewError::InvalidEndpoint => StatusCode::NOT_FOUND,
            ReviewError::EndpointRejected => StatusCode::IM_A_TEAPOT,
            ReviewError::HttpError { .. } => StatusCode::BAD_GATEWAY,
            ReviewError::NetworkTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ReviewError::ConnectionFailed(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    50
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitsRequest {
    pub backend: BackendKind,
    pub repo_path: PathBuf,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

async fn list_commits(
    State(bridge): State<AppState>,
    Json(request): Json<CommitsRequest>,
) -> Result<Json<CommitPage>, ReviewError> {
    tracing::info!(
        "Listing {} commits for {:?}, page {} size {}",
        request.backend,
        request.repo_path,
        request.page,
        request.page_size
    );
    let page = bridge
        .list_commits(
            request.backend,
            &request.repo_path,
            request.page,
            request.page_size,
        )
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffRequest {
    pub backend: BackendKind,
    pub repo_path: PathBuf,
    pub revision: String,
}

async fn get_diff(
    State(bridge): State<AppState>,
    Json(request): Json<DiffRequest>,
) -> Result<Json<Vec<DiffEntry>>, ReviewError> {
    tracing::info!(
        "Diff of {} revision {} in {:?}",
        request.backend,
        request.revision,
        request.repo_path
    );
    let entries = bridge
        .get_diff(request.backend, &request.repo_path, &request.revision)
        .await?;
    Ok(Json(entries))
}

/// Relays the completion body as it arrives.
///
/// Errors before the first chunk become JSON error responses; a transport
/// failure mid-stream aborts the chunked body.
async fn analyze(
    State(bridge): State<AppState>,
    Json(request): Json<AiRequest>,
) -> Result<Response, ReviewError> {
    let chunks = bridge
        .analyze_stream(&request.endpoint, &request.credential, &request.prompt)
        .await?;

    let body = Body::from_stream(chunks.map(|chunk| chunk.map_err(std::io::Error::other)));
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

#[derive(Debug, Serialize)]
struct SelectedDirectory {
    path: Option<PathBuf>,
}

async fn select_directory(State(bridge): State<AppState>) -> Json<SelectedDirectory> {
    Json(SelectedDirectory {
        path: bridge.select_directory(),
    })
}

async fn tool_status(
    State(bridge): State<AppState>,
    UrlPath(backend): UrlPath<String>,
) -> Result<Json<ToolStatus>, ReviewError> {
    let backend: BackendKind = backend.parse()?;
    Ok(Json(bridge.tool_status(backend).await))
}

async fn refresh_tool_status(
    State(bridge): State<AppState>,
    UrlPath(backend): UrlPath<String>,
) -> Result<Json<ToolStatus>, ReviewError> {
    let backend: BackendKind = backend.parse()?;
    Ok(Json(bridge.refresh_tool_status(backend).await))
}
