//! Job lifecycle: accept an upload, then hand its events to exactly one
//! consumer.
//!
//! ```text
//! submit(filename, bytes) ──▶ validate ──▶ JobStore::put ──▶ JobId
//! stream(job_id)          ──▶ JobStore::take ──▶ Pipeline::stream ──▶ events
//! ```
//!
//! Validation failures and unknown ids are returned synchronously and never
//! produce events. Once `stream` has taken a job, every outcome of the run,
//! including a panic, reaches the consumer as events.

use crate::error::PdfLayoutError;
use crate::events::{PageResult, PipelineEvent};
use crate::jobs::{JobId, JobStore};
use crate::pipeline::{EventStream, Pipeline, PipelineOutcome};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Ties the job store to the page pipeline.
pub struct JobController {
    store: Arc<JobStore>,
    pipeline: Pipeline,
}

impl JobController {
    pub fn new(store: Arc<JobStore>, pipeline: Pipeline) -> Self {
        Self { store, pipeline }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Validate an upload and register it as a job.
    ///
    /// `filename` is `None` when the request carried no file part at all.
    pub fn submit(
        &self,
        filename: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<JobId, PdfLayoutError> {
        let filename = validate_upload(filename, &bytes)?;
        let size = bytes.len();
        let job_id = self.store.put(bytes, filename)?;
        info!(job_id = %job_id, filename, bytes = size, "upload accepted");
        Ok(job_id)
    }

    /// Consume the job and start its run.
    ///
    /// Unknown, malformed, expired and already-streamed ids all report
    /// [`PdfLayoutError::JobNotFound`]; no run is started for them.
    pub fn stream(&self, job_id: &str) -> Result<EventStream, PdfLayoutError> {
        let id: JobId = job_id.parse()?;
        let job = self.store.take(&id).ok_or_else(|| PdfLayoutError::JobNotFound {
            job_id: job_id.to_string(),
        })?;
        info!(job_id = %id, filename = %job.filename, "streaming job");
        Ok(self.pipeline.stream(job.payload))
    }

    /// Validate and analyse a document in one call, returning every page.
    ///
    /// The run's failure, if any, is returned as the error rather than as an
    /// event.
    pub async fn analyze_now(
        &self,
        filename: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<Vec<PageResult>, PdfLayoutError> {
        let filename = validate_upload(filename, &bytes)?;
        info!(filename, bytes = bytes.len(), "analysing upload inline");

        let (tx, mut rx) = mpsc::channel(DEFAULT_INLINE_BUFFER);
        let collect = async move {
            let mut pages = Vec::new();
            while let Some(event) = rx.recv().await {
                if let PipelineEvent::Page(page) = event {
                    pages.push(page);
                }
            }
            pages
        };

        let (outcome, pages) = tokio::join!(self.pipeline.run(bytes, tx), collect);
        match outcome {
            PipelineOutcome::Completed { .. } => Ok(pages),
            PipelineOutcome::Failed(e) => Err(e),
            PipelineOutcome::Cancelled => {
                warn!("inline analysis lost its event consumer");
                Err(PdfLayoutError::Internal("analysis was cancelled".into()))
            }
        }
    }
}

const DEFAULT_INLINE_BUFFER: usize = 8;

/// Upload checks, in the order a browser form can fail them.
fn validate_upload<'a>(
    filename: Option<&'a str>,
    bytes: &[u8],
) -> Result<&'a str, PdfLayoutError> {
    let filename = filename.ok_or(PdfLayoutError::NoFile)?.trim();
    if filename.is_empty() {
        return Err(PdfLayoutError::NoFileSelected);
    }
    if !filename.to_lowercase().ends_with(".pdf") {
        return Err(PdfLayoutError::UnsupportedFile {
            filename: filename.to_string(),
        });
    }
    if bytes.is_empty() {
        return Err(PdfLayoutError::NoFile);
    }
    Ok(filename)
}
