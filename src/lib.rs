//! # edgequake-pdf-layout
//!
//! Describe the layout of every page of a PDF with a Vision Language Model,
//! streaming each result as soon as it is ready.
//!
//! ## Why this crate?
//!
//! Knowing *how* a page is laid out (columns, headers, figures, tables,
//! notable formatting) is what you need before extracting, redesigning or
//! auditing a document, and text extractors throw exactly that away. This
//! crate rasterises each page and asks a VLM to describe its structure, one
//! page at a time, in order, so a reader sees page 1 while page 2 is still
//! being analysed.
//!
//! ## Job Lifecycle
//!
//! ```text
//! upload ──▶ JobStore::put ──▶ job_id
//!
//! stream(job_id) ──▶ JobStore::take (exactly once)
//!                      │
//!                      ├─ 1. Open    load the document, count pages
//!                      ├─ 2. Render  preview (1×) + analysis copy (2×) per page
//!                      ├─ 3. Analyse page-aware prompt → VLM (timeout, retries)
//!                      ├─ 4. Polish  strip fences / blank runs / invisible chars
//!                      └─ 5. Emit    status / page / complete | error events
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf_layout::{AnalysisConfig, JobController, JobStore, Pipeline, PipelineEvent};
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads ANTHROPIC_API_KEY; pdfium is found via PDFIUM_LIB_PATH or the system.
//!     let pipeline = Pipeline::from_config(AnalysisConfig::default(), None)?;
//!     let controller = JobController::new(Arc::new(JobStore::default()), pipeline);
//!
//!     let job_id = controller.submit(Some("report.pdf"), std::fs::read("report.pdf")?)?;
//!     let mut events = controller.stream(&job_id.to_string())?;
//!     while let Some(event) = events.next().await {
//!         if let PipelineEvent::Page(page) = event {
//!             println!("## Page {}\n\n{}\n", page.page, page.description);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf-layout` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when embedding the service or the pipeline:
//! ```toml
//! edgequake-pdf-layout = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod jobs;
pub mod pipeline;
pub mod prompts;
pub mod server;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{AnalysisConfig, AnalysisConfigBuilder, JobStoreConfig, ServerConfig};
pub use controller::JobController;
pub use error::{AnalysisError, PdfLayoutError, RenderError};
pub use events::{PageResult, PipelineEvent};
pub use jobs::{JobId, JobStore};
pub use pipeline::{EventStream, Pipeline, PipelineOutcome};
pub use stream::{decode_frame, encode_frame, encode_stream, FrameFormat};
