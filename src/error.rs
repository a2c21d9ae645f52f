//! Error types for the edgequake-pdf-layout library.
//!
//! Three error types reflect the three places a job can go wrong:
//!
//! * [`PdfLayoutError`] — the top-level taxonomy. Upload and job-lookup
//!   failures are returned synchronously to the caller; document, render and
//!   analysis failures end a run and are turned into exactly one terminal
//!   `error` event.
//!
//! * [`RenderError`] — raised by a [`crate::pipeline::render::DocumentRenderer`]
//!   while opening a document or rasterising one page.
//!
//! * [`AnalysisError`] — raised by a [`crate::pipeline::llm::PageAnalyzer`].
//!   It separates the transient class (rate limit, network, upstream 5xx,
//!   timeout) from the permanent one so the retry layer only retries what
//!   can succeed on a second attempt.
//!
//! Messages are written for the person watching the stream: `Display` output
//! is what ends up in the `message` field of an `error` frame.

use edgequake_llm::LlmError;
use thiserror::Error;

/// All errors surfaced by the edgequake-pdf-layout library.
#[derive(Debug, Error)]
pub enum PdfLayoutError {
    // ── Upload errors ─────────────────────────────────────────────────────
    /// The request carried no file part, or the file was empty.
    #[error("No file uploaded")]
    NoFile,

    /// A file part was present but its filename was empty.
    #[error("No file selected")]
    NoFileSelected,

    /// The uploaded file does not look like a PDF by name.
    #[error("Please upload a PDF file")]
    UnsupportedFile { filename: String },

    /// The request body exceeds the configured upload limit.
    #[error("File is too large (limit {limit} bytes)")]
    PayloadTooLarge { limit: usize },

    /// The multipart body could not be parsed.
    #[error("Malformed upload: {0}")]
    MalformedUpload(String),

    /// The job store is at capacity; the caller should retry later.
    #[error("Too many pending jobs: {reason}")]
    StoreFull { reason: String },

    // ── Job errors ────────────────────────────────────────────────────────
    /// The job id was never issued, has expired, or was already streamed.
    #[error("Job not found: '{job_id}'")]
    JobNotFound { job_id: String },

    // ── Run errors (become a terminal `error` event) ─────────────────────
    /// pdfium could not parse the uploaded bytes.
    #[error("Error processing PDF: could not open document: {detail}")]
    DocumentOpen { detail: String },

    /// pdfium failed to rasterise a page.
    #[error("Error processing PDF: failed to render page {page}: {detail}")]
    Render { page: usize, detail: String },

    /// The analysis service failed for a page (after any retries).
    #[error("API error on page {page}: {source}")]
    Analysis {
        page: usize,
        #[source]
        source: AnalysisError,
    },

    // ── Input errors (CLI) ────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read but do not start with the `%PDF` magic.
    #[error("'{name}' is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { name: String, magic: Vec<u8> },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or place the library next to the binary."
    )]
    PdfiumBindingFailed(String),

    // ── Event encoding ────────────────────────────────────────────────────
    /// An event frame could not be serialised or parsed.
    #[error("Malformed event frame: {0}")]
    Frame(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (task panic, closed channel, …).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PdfLayoutError {
    /// True for errors rejected at submission time: no job is created.
    pub fn is_upload_error(&self) -> bool {
        matches!(
            self,
            PdfLayoutError::NoFile
                | PdfLayoutError::NoFileSelected
                | PdfLayoutError::UnsupportedFile { .. }
                | PdfLayoutError::PayloadTooLarge { .. }
                | PdfLayoutError::MalformedUpload(_)
                | PdfLayoutError::StoreFull { .. }
        )
    }
}

impl From<RenderError> for PdfLayoutError {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::Open(detail) => PdfLayoutError::DocumentOpen { detail },
            RenderError::Page { page, detail } => PdfLayoutError::Render { page, detail },
            RenderError::WorkerGone => {
                PdfLayoutError::Internal("render worker stopped unexpectedly".into())
            }
        }
    }
}

/// A failure inside the renderer collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    /// The document could not be opened (corrupt, encrypted, not a PDF).
    #[error("could not open document: {0}")]
    Open(String),

    /// A single page could not be rasterised or encoded (1-based page).
    #[error("page {page}: {detail}")]
    Page { page: usize, detail: String },

    /// The blocking render thread exited before answering.
    #[error("render worker stopped")]
    WorkerGone,
}

/// A failure inside the analysis collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    /// HTTP 429 or an equivalent quota signal.
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    /// Network failure or upstream 5xx / overload.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The call did not finish within the configured timeout.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// 401/403 — the credential is missing or wrong.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Malformed input or content rejected by the service.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// No provider could be constructed at startup.
    #[error("analysis provider is not configured: {0}")]
    NotConfigured(String),

    /// The service answered with no text.
    #[error("service returned an empty description")]
    EmptyResponse,
}

impl AnalysisError {
    /// Whether a later attempt at the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AnalysisError::RateLimited(_)
                | AnalysisError::Unavailable(_)
                | AnalysisError::Timeout { .. }
        )
    }

    /// Classify a free-form provider message into the taxonomy above.
    ///
    /// Only used for the untyped `LlmError` variants (`ApiError`,
    /// `ProviderError`, `Unknown`), where the HTTP status survives only in
    /// the text. Anything unrecognised is treated as permanent.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["429", "rate limit", "rate_limit", "too many requests"]) {
            AnalysisError::RateLimited(message)
        } else if has(&[
            "401",
            "403",
            "unauthorized",
            "forbidden",
            "api key",
            "api_key",
            "authentication",
        ]) {
            AnalysisError::Auth(message)
        } else if has(&[
            "502",
            "503",
            "504",
            "529",
            "overloaded",
            "service unavailable",
            "internal server error",
            "bad gateway",
        ]) {
            AnalysisError::Unavailable(message)
        } else {
            AnalysisError::Rejected(message)
        }
    }
}

impl From<LlmError> for AnalysisError {
    fn from(e: LlmError) -> Self {
        let message = e.to_string();
        match e {
            LlmError::RateLimited(_) => AnalysisError::RateLimited(message),
            LlmError::NetworkError(_) | LlmError::Timeout => AnalysisError::Unavailable(message),
            LlmError::AuthError(_) => AnalysisError::Auth(message),
            LlmError::ConfigError(_) => AnalysisError::NotConfigured(message),
            LlmError::InvalidRequest(_)
            | LlmError::TokenLimitExceeded { .. }
            | LlmError::ModelNotFound(_)
            | LlmError::SerializationError(_)
            | LlmError::NotSupported(_) => AnalysisError::Rejected(message),
            _ => AnalysisError::classify(message),
        }
    }
}
