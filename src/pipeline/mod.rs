//! The page pipeline: open a document, then render, analyse and emit each
//! page in order.
//!
//! Each submodule implements exactly one step, so each is testable on its
//! own and the rendering or analysis backend can be swapped without touching
//! the others.
//!
//! ## Data Flow
//!
//! ```text
//! bytes ──▶ render ──▶ encode ──▶ llm ──▶ postprocess ──▶ PipelineEvent
//!          (pdfium)    (PNG)     (VLM)    (cleanup)
//! ```
//!
//! 1. [`render`] — rasterise a page twice (preview + analysis copy) on a
//!    blocking worker thread, because pdfium is neither async nor `Send`
//! 2. [`encode`] — PNG-encode and base64-wrap the rasters
//! 3. [`llm`]    — describe the analysis copy, with timeout and retry
//! 4. [`postprocess`] — deterministic cleanup of the description
//!
//! [`input`] sits outside the run: it loads a path or URL for the CLI.
//!
//! ## Ordering and termination
//!
//! Pages are processed strictly sequentially, so `page` events carry
//! 1, 2, …, N with no gaps. Every run ends with exactly one `complete` or
//! `error` event, unless the consumer went away first, in which case the run
//! abandons the call in flight (including pending retries) and emits nothing
//! more.

pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod render;

use crate::config::AnalysisConfig;
use crate::error::PdfLayoutError;
use crate::events::{PageResult, PipelineEvent};
use crate::prompts;
use futures::FutureExt;
use llm::{LlmAnalyzer, PageAnalyzer};
use render::{DocumentRenderer, PdfiumRenderer, RenderScales, RenderSession};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, error, info};

/// A boxed stream of pipeline events, ending with `complete` or `error`.
pub type EventStream = Pin<Box<dyn Stream<Item = PipelineEvent> + Send>>;

/// Events buffered between a spawned run and its consumer by default.
pub const DEFAULT_EVENT_BUFFER: usize = 16;

/// How a run ended.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Every page was emitted, followed by `complete`.
    Completed { pages: usize },
    /// The run stopped on an error, which was emitted as the final event.
    Failed(PdfLayoutError),
    /// The consumer went away; no further events were produced.
    Cancelled,
}

enum Stop {
    Cancelled,
    Failed(PdfLayoutError),
}

impl From<PdfLayoutError> for Stop {
    fn from(e: PdfLayoutError) -> Self {
        Stop::Failed(e)
    }
}

/// Drives one document through render → analyse → emit.
///
/// Cloning is cheap; every clone shares the same renderer and analyzer.
#[derive(Clone)]
pub struct Pipeline {
    renderer: Arc<dyn DocumentRenderer>,
    analyzer: Arc<dyn PageAnalyzer>,
    config: Arc<AnalysisConfig>,
    event_buffer: usize,
}

impl Pipeline {
    pub fn new(
        renderer: Arc<dyn DocumentRenderer>,
        analyzer: Arc<dyn PageAnalyzer>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            renderer,
            analyzer,
            config: Arc::new(config),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Bind pdfium and build the VLM analyzer described by `config`.
    ///
    /// Fails only if pdfium cannot be loaded. A missing analysis credential
    /// is logged and reported later, per job, as an `error` event.
    pub fn from_config(
        config: AnalysisConfig,
        pdfium_lib: Option<&Path>,
    ) -> Result<Self, PdfLayoutError> {
        let renderer = PdfiumRenderer::bind(pdfium_lib, config.max_rendered_pixels)?;
        let analyzer = LlmAnalyzer::from_config(&config);
        Ok(Self::new(Arc::new(renderer), Arc::new(analyzer), config))
    }

    /// Set how many events a spawned run may buffer ahead of its consumer.
    pub fn with_event_buffer(mut self, buffer: usize) -> Self {
        self.event_buffer = buffer.max(1);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run the pipeline over `bytes`, sending every event to `events`.
    ///
    /// Failures are not returned as `Err`: they are emitted as the final
    /// `error` event and reported in the outcome.
    pub async fn run(
        &self,
        bytes: Vec<u8>,
        events: mpsc::Sender<PipelineEvent>,
    ) -> PipelineOutcome {
        match self.drive(bytes, &events).await {
            Ok(pages) => {
                let done = PipelineEvent::complete(format!("Analyzed {pages} pages"));
                if events.send(done).await.is_err() {
                    return PipelineOutcome::Cancelled;
                }
                info!("Run complete: {} pages", pages);
                PipelineOutcome::Completed { pages }
            }
            Err(Stop::Cancelled) => {
                info!("Consumer disconnected; run cancelled");
                PipelineOutcome::Cancelled
            }
            Err(Stop::Failed(e)) => {
                error!("Run failed: {}", e);
                let _ = events.send(PipelineEvent::failure(e.to_string())).await;
                PipelineOutcome::Failed(e)
            }
        }
    }

    /// Spawn a run over `bytes` and return its events as a stream.
    ///
    /// A panic inside the run is turned into a final `error` event, so the
    /// stream always ends with a terminal event unless it was dropped.
    pub fn stream(&self, bytes: Vec<u8>) -> EventStream {
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let pipeline = self.clone();

        tokio::spawn(async move {
            let run = AssertUnwindSafe(pipeline.run(bytes, tx.clone())).catch_unwind();
            if let Err(panic) = run.await {
                let detail = panic_message(panic.as_ref());
                error!("Run panicked: {}", detail);
                let failure = PdfLayoutError::Internal(detail);
                let _ = tx.send(PipelineEvent::failure(failure.to_string())).await;
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    async fn drive(
        &self,
        bytes: Vec<u8>,
        events: &mpsc::Sender<PipelineEvent>,
    ) -> Result<usize, Stop> {
        let scales = RenderScales {
            preview: self.config.preview_scale,
            analysis: self.config.analysis_scale,
        };
        let session = RenderSession::open(
            Arc::clone(&self.renderer),
            bytes,
            self.config.password.clone(),
            scales,
        )
        .await
        .map_err(PdfLayoutError::from)?;

        let result = self.process_pages(&session, events).await;
        session.close().await;
        result
    }

    async fn process_pages(
        &self,
        session: &RenderSession,
        events: &mpsc::Sender<PipelineEvent>,
    ) -> Result<usize, Stop> {
        let total = session.page_count();
        emit(events, PipelineEvent::status(format!("PDF loaded: {total} pages"))).await?;

        for page in 1..=total {
            if events.is_closed() {
                return Err(Stop::Cancelled);
            }

            emit(
                events,
                PipelineEvent::status(format!("Rendering page {page} of {total}...")),
            )
            .await?;
            let rendered = unless_closed(events, session.render_page(page))
                .await?
                .map_err(PdfLayoutError::from)?;

            emit(
                events,
                PipelineEvent::status(format!("Analyzing page {page} of {total}...")),
            )
            .await?;
            let prompt = self.prompt_for(page, total);
            let analysis = llm::analyze_page(
                self.analyzer.as_ref(),
                &rendered.analysis_copy,
                &prompt,
                page,
                &self.config,
            );
            let raw = unless_closed(events, analysis)
                .await?
                .map_err(|source| PdfLayoutError::Analysis { page, source })?;

            let result = PageResult {
                page,
                thumbnail: encode::to_base64(&rendered.preview),
                description: postprocess::clean_description(&raw),
            };
            debug!("Page {}/{}: {} chars", page, total, result.description.len());
            emit(events, PipelineEvent::Page(result)).await?;
        }

        Ok(total)
    }

    fn prompt_for(&self, page: usize, total: usize) -> String {
        match self.config.prompt_template {
            Some(ref template) => prompts::render_prompt_template(template, page, total),
            None => prompts::page_layout_prompt(page, total),
        }
    }
}

async fn emit(events: &mpsc::Sender<PipelineEvent>, event: PipelineEvent) -> Result<(), Stop> {
    events.send(event).await.map_err(|_| Stop::Cancelled)
}

/// Await `work` unless the consumer goes away first.
///
/// Dropping `work` abandons the in-flight call and any pending retry backoff,
/// so a disconnect never triggers another render or analysis attempt.
async fn unless_closed<T>(
    events: &mpsc::Sender<PipelineEvent>,
    work: impl Future<Output = T>,
) -> Result<T, Stop> {
    tokio::select! {
        biased;
        _ = events.closed() => Err(Stop::Cancelled),
        out = work => Ok(out),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "analysis run panicked".to_string()
    }
}
