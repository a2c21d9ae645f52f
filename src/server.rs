//! HTTP mapping for the job controller (axum).
//!
//! | Route | Response |
//! |-------|----------|
//! | `GET /health` | `ok` |
//! | `POST /upload` (multipart field `pdf`) | `{"job_id": "…"}` |
//! | `GET /stream/:job_id` | `text/event-stream` of event frames |
//! | `POST /analyze` (multipart field `pdf`) | `{"pages": [...]}` once every page is done |
//!
//! Every error is a JSON body `{"error": "<message>"}`.

use crate::config::ServerConfig;
use crate::controller::JobController;
use crate::error::PdfLayoutError;
use crate::events::PageResult;
use crate::stream::{encode_stream, FrameFormat};
use axum::body::Body;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Multipart field carrying the document, as sent by the upload form.
pub const UPLOAD_FIELD: &str = "pdf";

#[derive(Clone)]
struct AppState {
    controller: Arc<JobController>,
    max_upload_bytes: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    job_id: String,
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    pages: Vec<PageResult>,
}

/// A [`PdfLayoutError`] on its way to becoming an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub PdfLayoutError);

impl From<PdfLayoutError> for ApiError {
    fn from(e: PdfLayoutError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            PdfLayoutError::NoFile
            | PdfLayoutError::NoFileSelected
            | PdfLayoutError::UnsupportedFile { .. }
            | PdfLayoutError::MalformedUpload(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            PdfLayoutError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, self.0.to_string())
            }
            PdfLayoutError::JobNotFound { .. } => {
                (StatusCode::NOT_FOUND, "Job not found".to_string())
            }
            PdfLayoutError::StoreFull { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string())
            }
            PdfLayoutError::Internal(detail) => {
                error!(detail, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string())
            }
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

/// Build the service router.
pub fn router(controller: Arc<JobController>, config: &ServerConfig) -> Router {
    let state = AppState {
        controller,
        max_upload_bytes: config.max_upload_bytes,
    };
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/upload", post(handle_upload))
        .route("/stream/:job_id", get(handle_stream))
        .route("/analyze", post(handle_analyze))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .with_state(state)
}

/// Bind `config.bind` and serve until `shutdown` resolves.
pub async fn serve<F>(
    controller: Arc<JobController>,
    config: &ServerConfig,
    shutdown: F,
) -> Result<(), PdfLayoutError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(config.bind).await.map_err(|e| {
        PdfLayoutError::Internal(format!("failed to bind {}: {}", config.bind, e))
    })?;
    serve_with_listener(listener, controller, config, shutdown).await
}

/// Serve on an already-bound listener until `shutdown` resolves.
///
/// Also runs the job-store sweeper for as long as the server is up.
pub async fn serve_with_listener<F>(
    listener: TcpListener,
    controller: Arc<JobController>,
    config: &ServerConfig,
    shutdown: F,
) -> Result<(), PdfLayoutError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .map_err(|e| PdfLayoutError::Internal(e.to_string()))?;
    let sweeper = controller.store().spawn_sweeper(config.sweep_interval);
    let app = router(controller, config);

    info!(addr = %addr, "pdf-layout service listening");
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    sweeper.abort();
    info!("pdf-layout service stopped");

    result.map_err(|e| PdfLayoutError::Internal(format!("server error: {e}")))
}

async fn handle_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let (filename, bytes) = read_upload(multipart, state.max_upload_bytes).await?;
    let job_id = state.controller.submit(filename.as_deref(), bytes)?;
    Ok(Json(UploadResponse {
        job_id: job_id.to_string(),
    }))
}

async fn handle_stream(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let events = state.controller.stream(&job_id)?;
    let frames = encode_stream(events, FrameFormat::EventStream).map(Ok::<_, Infallible>);

    Ok((
        [
            (header::CONTENT_TYPE, FrameFormat::EventStream.content_type()),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
        .into_response())
}

async fn handle_analyze(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let (filename, bytes) = read_upload(multipart, state.max_upload_bytes).await?;
    let pages = state.controller.analyze_now(filename.as_deref(), bytes).await?;
    Ok(Json(AnalyzeResponse { pages }))
}

/// Pull the `pdf` part out of a multipart body.
///
/// Returns `(None, [])` when the part is missing, and an empty filename
/// when the form was submitted without choosing a file.
async fn read_upload(
    mut multipart: Multipart,
    limit: usize,
) -> Result<(Option<String>, Vec<u8>), PdfLayoutError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
        return Ok((Some(filename), bytes.to_vec()));
    }
    Ok((None, Vec::new()))
}

fn multipart_error(e: MultipartError, limit: usize) -> PdfLayoutError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        PdfLayoutError::PayloadTooLarge { limit }
    } else {
        warn!("Failed to read upload: {}", e);
        PdfLayoutError::MalformedUpload(e.body_text())
    }
}
