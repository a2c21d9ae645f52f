//! End-to-end tests for the job lifecycle: submit → stream → events.
//!
//! Most tests drive the real controller, store, pipeline and frame encoder
//! with an in-memory renderer and a scripted analyzer, so they need neither
//! pdfium nor an API key.
//!
//! `test_live_document` makes real pdfium + LLM calls. It is gated behind
//! `E2E_ENABLED` and reads the document from `E2E_PDF`:
//!
//!   E2E_ENABLED=1 E2E_PDF=/path/to/doc.pdf cargo test --test e2e -- --nocapture

use async_trait::async_trait;
use edgequake_pdf_layout::pipeline::llm::PageAnalyzer;
use edgequake_pdf_layout::pipeline::render::{DocumentRenderer, OpenDocument};
use edgequake_pdf_layout::{
    decode_frame, encode_stream, AnalysisConfig, AnalysisError, FrameFormat, JobController,
    JobStore, PdfLayoutError, Pipeline, PipelineEvent, RenderError,
};
use futures::StreamExt;
use image::{DynamicImage, Rgba, RgbaImage};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

// ── Fake collaborators ───────────────────────────────────────────────────────

/// In-memory renderer: `pages` blank pages, optionally failing.
#[derive(Default)]
struct FakeRenderer {
    pages: usize,
    fail_open: bool,
    /// 1-based page whose render fails.
    fail_page: Option<usize>,
    /// (1-based page, scale) for every render call.
    renders: Arc<Mutex<Vec<(usize, f32)>>>,
    closed: Arc<AtomicUsize>,
}

struct FakeDocument<'a> {
    renderer: &'a FakeRenderer,
}

impl DocumentRenderer for FakeRenderer {
    fn open<'a>(
        &'a self,
        bytes: Vec<u8>,
        _password: Option<&str>,
    ) -> Result<Box<dyn OpenDocument + 'a>, RenderError> {
        if self.fail_open || !bytes.starts_with(b"%PDF") {
            return Err(RenderError::Open("no PDF header".into()));
        }
        Ok(Box::new(FakeDocument { renderer: self }))
    }
}

impl OpenDocument for FakeDocument<'_> {
    fn page_count(&self) -> usize {
        self.renderer.pages
    }

    fn render(&self, index: usize, scale: f32) -> Result<DynamicImage, RenderError> {
        let page = index + 1;
        self.renderer.renders.lock().push((page, scale));
        if self.renderer.fail_page == Some(page) {
            return Err(RenderError::Page {
                page,
                detail: "simulated rasterisation failure".into(),
            });
        }
        let side = (10.0 * scale) as u32;
        Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            side,
            side,
            Rgba([255, 255, 255, 255]),
        )))
    }
}

impl Drop for FakeDocument<'_> {
    fn drop(&mut self) {
        self.renderer.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Answers from a script keyed by call number (1-based).
#[derive(Default)]
struct ScriptedAnalyzer {
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    failures: Mutex<Vec<(usize, AnalysisError)>>,
}

impl ScriptedAnalyzer {
    fn failing_on(call: usize, error: AnalysisError) -> Self {
        let analyzer = Self::default();
        analyzer.failures.lock().push((call, error));
        analyzer
    }
}

#[async_trait]
impl PageAnalyzer for ScriptedAnalyzer {
    async fn analyze(&self, png: &[u8], prompt: &str) -> Result<String, AnalysisError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.prompts.lock().push(prompt.to_string());
        assert!(png.starts_with(b"\x89PNG"), "analyzer must receive PNG bytes");

        let failures = self.failures.lock();
        if let Some((_, e)) = failures.iter().find(|(n, _)| *n == call) {
            return Err(e.clone());
        }
        Ok(format!("Layout for call {call}: single column"))
    }
}

/// Blocks every call until the test hands out a permit. Calls after the
/// first return `error`, if set, once released.
struct GatedAnalyzer {
    gate: Arc<Semaphore>,
    calls: AtomicUsize,
    error: Option<AnalysisError>,
}

impl GatedAnalyzer {
    fn new(permits: usize, error: Option<AnalysisError>) -> Self {
        Self {
            gate: Arc::new(Semaphore::new(permits)),
            calls: AtomicUsize::new(0),
            error,
        }
    }
}

#[async_trait]
impl PageAnalyzer for GatedAnalyzer {
    async fn analyze(&self, _png: &[u8], _prompt: &str) -> Result<String, AnalysisError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| AnalysisError::Unavailable("gate closed".into()))?;
        permit.forget();
        match self.error {
            Some(ref e) if call > 1 => Err(e.clone()),
            _ => Ok("gated".to_string()),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn fast_config() -> AnalysisConfig {
    AnalysisConfig::builder()
        .max_retries(0)
        .retry_backoff_ms(1)
        .build()
        .unwrap()
}

fn controller(renderer: Arc<FakeRenderer>, analyzer: Arc<dyn PageAnalyzer>) -> JobController {
    controller_with(renderer, analyzer, fast_config())
}

fn controller_with(
    renderer: Arc<FakeRenderer>,
    analyzer: Arc<dyn PageAnalyzer>,
    config: AnalysisConfig,
) -> JobController {
    JobController::new(
        Arc::new(JobStore::default()),
        Pipeline::new(renderer, analyzer, config),
    )
}

async fn submit_and_collect(controller: &JobController) -> Vec<PipelineEvent> {
    let job_id = controller
        .submit(Some("doc.pdf"), b"%PDF-1.7 fake".to_vec())
        .expect("submit accepts a .pdf upload");
    controller
        .stream(&job_id.to_string())
        .expect("fresh job streams")
        .collect()
        .await
}

fn page_numbers(events: &[PipelineEvent]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Page(p) => Some(p.page),
            _ => None,
        })
        .collect()
}

/// Exactly one terminal event, and it is last.
fn assert_single_terminal(events: &[PipelineEvent]) {
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "events: {events:?}");
    assert!(events.last().is_some_and(PipelineEvent::is_terminal));
}

async fn wait_for(counter: &AtomicUsize, expected: usize) {
    for _ in 0..200 {
        if counter.load(Ordering::SeqCst) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "counter stuck at {}, expected {}",
        counter.load(Ordering::SeqCst),
        expected
    );
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_three_page_document_full_sequence() {
    let renderer = Arc::new(FakeRenderer {
        pages: 3,
        ..Default::default()
    });
    let analyzer = Arc::new(ScriptedAnalyzer::default());
    let controller = controller(renderer.clone(), analyzer.clone());

    let job_id = controller.submit(Some("doc.pdf"), b"%PDF-1.7".to_vec()).unwrap();
    let events: Vec<_> = controller.stream(&job_id.to_string()).unwrap().collect().await;

    let mut expected = vec![PipelineEvent::status("PDF loaded: 3 pages")];
    for page in 1..=3 {
        expected.push(PipelineEvent::status(format!("Rendering page {page} of 3...")));
        expected.push(PipelineEvent::status(format!("Analyzing page {page} of 3...")));
        let PipelineEvent::Page(ref result) = events[expected.len()] else {
            panic!("expected a page event at {}: {events:?}", expected.len());
        };
        assert_eq!(result.page, page);
        assert_eq!(result.description, format!("Layout for call {page}: single column"));
        assert!(!result.thumbnail.is_empty());
        expected.push(events[expected.len()].clone());
    }
    expected.push(PipelineEvent::complete("Analyzed 3 pages"));
    assert_eq!(events, expected);

    // Second stream on the same id.
    let err = controller.stream(&job_id.to_string()).err().expect("job consumed");
    assert!(matches!(err, PdfLayoutError::JobNotFound { .. }));

    // Prompts carry the page position; the document was closed.
    let prompts = analyzer.prompts.lock();
    assert!(prompts[0].contains("(page 1 of 3)"));
    assert!(prompts[2].contains("(page 3 of 3)"));
    assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pages_strictly_increasing_for_any_length() {
    for pages in [0, 1, 2, 7] {
        let renderer = Arc::new(FakeRenderer {
            pages,
            ..Default::default()
        });
        let controller = controller(renderer, Arc::new(ScriptedAnalyzer::default()));
        let events = submit_and_collect(&controller).await;

        assert_eq!(page_numbers(&events), (1..=pages).collect::<Vec<_>>());
        assert_single_terminal(&events);
        assert!(matches!(events.last(), Some(PipelineEvent::Complete { .. })));
    }
}

#[tokio::test]
async fn test_each_page_rendered_at_preview_and_analysis_scale() {
    let renderer = Arc::new(FakeRenderer {
        pages: 2,
        ..Default::default()
    });
    let controller = controller(renderer.clone(), Arc::new(ScriptedAnalyzer::default()));
    submit_and_collect(&controller).await;

    assert_eq!(
        *renderer.renders.lock(),
        vec![(1, 1.0), (1, 2.0), (2, 1.0), (2, 2.0)]
    );
}

#[tokio::test]
async fn test_render_failure_on_page_two() {
    let renderer = Arc::new(FakeRenderer {
        pages: 3,
        fail_page: Some(2),
        ..Default::default()
    });
    let analyzer = Arc::new(ScriptedAnalyzer::default());
    let controller = controller(renderer.clone(), analyzer.clone());
    let events = submit_and_collect(&controller).await;

    assert_eq!(page_numbers(&events), vec![1]);
    assert_single_terminal(&events);
    match events.last() {
        Some(PipelineEvent::Failure { message }) => {
            assert!(message.starts_with("Error processing PDF"), "got: {message}");
            assert!(message.contains("page 2"), "got: {message}");
        }
        other => panic!("expected failure, got {other:?}"),
    }

    // Page 3 was never touched and page 2 never reached the analyzer.
    assert!(renderer.renders.lock().iter().all(|(page, _)| *page <= 2));
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_analysis_failure_ends_run() {
    let renderer = Arc::new(FakeRenderer {
        pages: 3,
        ..Default::default()
    });
    let analyzer = Arc::new(ScriptedAnalyzer::failing_on(
        2,
        AnalysisError::Auth("401 invalid x-api-key".into()),
    ));
    let config = AnalysisConfig::builder().max_retries(3).retry_backoff_ms(1).build().unwrap();
    let controller = controller_with(renderer.clone(), analyzer.clone(), config);
    let events = submit_and_collect(&controller).await;

    assert_eq!(page_numbers(&events), vec![1]);
    assert_single_terminal(&events);
    match events.last() {
        Some(PipelineEvent::Failure { message }) => {
            assert!(message.starts_with("API error on page 2"), "got: {message}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    // Permanent errors are not retried.
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
    assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transient_analysis_failure_is_retried() {
    let renderer = Arc::new(FakeRenderer {
        pages: 2,
        ..Default::default()
    });
    let analyzer = Arc::new(ScriptedAnalyzer::failing_on(
        1,
        AnalysisError::RateLimited("429".into()),
    ));
    let config = AnalysisConfig::builder().max_retries(1).retry_backoff_ms(1).build().unwrap();
    let controller = controller_with(renderer, analyzer.clone(), config);
    let events = submit_and_collect(&controller).await;

    assert_eq!(page_numbers(&events), vec![1, 2]);
    assert!(matches!(events.last(), Some(PipelineEvent::Complete { .. })));
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unopenable_document_emits_single_error() {
    let renderer = Arc::new(FakeRenderer {
        pages: 3,
        fail_open: true,
        ..Default::default()
    });
    let analyzer = Arc::new(ScriptedAnalyzer::default());
    let controller = controller(renderer, analyzer.clone());
    let events = submit_and_collect(&controller).await;

    assert_eq!(events.len(), 1, "events: {events:?}");
    match &events[0] {
        PipelineEvent::Failure { message } => {
            assert!(message.contains("could not open document"), "got: {message}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
}

// ── Job lifecycle ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_and_malformed_ids_are_not_found() {
    let controller = controller(
        Arc::new(FakeRenderer::default()),
        Arc::new(ScriptedAnalyzer::default()),
    );

    for id in ["6f1c2a4e-9b7d-4c3e-8a1f-2d5e6f7a8b9c", "not-a-job-id", ""] {
        let err = controller.stream(id).err().expect("unknown id");
        assert!(matches!(err, PdfLayoutError::JobNotFound { .. }), "{id:?}: {err}");
    }
}

#[tokio::test]
async fn test_rejected_uploads_create_no_job() {
    let controller = controller(
        Arc::new(FakeRenderer::default()),
        Arc::new(ScriptedAnalyzer::default()),
    );

    let cases: [(Option<&str>, &[u8]); 4] = [
        (None, b"%PDF"),
        (Some(""), b"%PDF"),
        (Some("slides.pptx"), b"%PDF"),
        (Some("empty.pdf"), b""),
    ];
    for (filename, bytes) in cases {
        let err = controller.submit(filename, bytes.to_vec()).unwrap_err();
        assert!(err.is_upload_error(), "{filename:?}: {err}");
    }
    assert!(controller.store().is_empty());
}

#[tokio::test]
async fn test_concurrent_streams_on_one_job_have_one_winner() {
    let renderer = Arc::new(FakeRenderer {
        pages: 1,
        ..Default::default()
    });
    let controller = Arc::new(controller(renderer, Arc::new(ScriptedAnalyzer::default())));
    let job_id = controller.submit(Some("doc.pdf"), b"%PDF".to_vec()).unwrap().to_string();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let controller = Arc::clone(&controller);
            let job_id = job_id.clone();
            tokio::spawn(async move { controller.stream(&job_id).is_ok() })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

/// Submits a 5-page job and reads events until page 1 arrives, with the
/// run then parked inside the analyzer's second call.
async fn stream_until_second_analysis(
    renderer: Arc<FakeRenderer>,
    analyzer: Arc<GatedAnalyzer>,
    config: AnalysisConfig,
) -> edgequake_pdf_layout::EventStream {
    let pipeline = Pipeline::new(renderer, analyzer.clone(), config).with_event_buffer(4);
    let controller = JobController::new(Arc::new(JobStore::default()), pipeline);

    let job_id = controller.submit(Some("doc.pdf"), b"%PDF".to_vec()).unwrap();
    let mut events = controller.stream(&job_id.to_string()).unwrap();
    loop {
        match events.next().await {
            Some(PipelineEvent::Page(p)) if p.page == 1 => break,
            Some(_) => continue,
            None => panic!("stream ended before page 1"),
        }
    }
    wait_for(&analyzer.calls, 2).await;
    events
}

#[tokio::test]
async fn test_dropped_stream_stops_remaining_work() {
    let renderer = Arc::new(FakeRenderer {
        pages: 5,
        ..Default::default()
    });
    let analyzer = Arc::new(GatedAnalyzer::new(1, None));
    let events =
        stream_until_second_analysis(renderer.clone(), analyzer.clone(), fast_config()).await;

    drop(events);
    analyzer.gate.add_permits(10);

    wait_for(&renderer.closed, 1).await;
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
    assert!(renderer.renders.lock().iter().all(|(page, _)| *page <= 2));
}

#[tokio::test]
async fn test_dropped_stream_abandons_pending_retries() {
    let renderer = Arc::new(FakeRenderer {
        pages: 3,
        ..Default::default()
    });
    let analyzer = Arc::new(GatedAnalyzer::new(
        1,
        Some(AnalysisError::Unavailable("503 service unavailable".into())),
    ));
    let config = AnalysisConfig::builder()
        .max_retries(5)
        .retry_backoff_ms(10)
        .build()
        .unwrap();
    let events = stream_until_second_analysis(renderer.clone(), analyzer.clone(), config).await;

    // Page 2's first attempt would now fail transiently; nobody is listening.
    drop(events);
    analyzer.gate.add_permits(10);

    wait_for(&renderer.closed, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_analyze_now_returns_pages_or_error() {
    let renderer = Arc::new(FakeRenderer {
        pages: 2,
        ..Default::default()
    });
    let controller = controller(renderer, Arc::new(ScriptedAnalyzer::default()));
    let pages = controller.analyze_now(Some("doc.pdf"), b"%PDF".to_vec()).await.unwrap();
    assert_eq!(pages.iter().map(|p| p.page).collect::<Vec<_>>(), vec![1, 2]);

    let renderer = Arc::new(FakeRenderer {
        pages: 2,
        fail_page: Some(1),
        ..Default::default()
    });
    let analyzer = Arc::new(ScriptedAnalyzer::default());
    let controller = controller_with(renderer, analyzer, fast_config());
    let err = controller.analyze_now(Some("doc.pdf"), b"%PDF".to_vec()).await.unwrap_err();
    assert!(matches!(err, PdfLayoutError::Render { page: 1, .. }), "got: {err}");
}

#[tokio::test]
async fn test_event_stream_frames_decode_in_order() {
    let renderer = Arc::new(FakeRenderer {
        pages: 2,
        ..Default::default()
    });
    let controller = controller(renderer, Arc::new(ScriptedAnalyzer::default()));
    let job_id = controller.submit(Some("doc.pdf"), b"%PDF".to_vec()).unwrap();

    let events = controller.stream(&job_id.to_string()).unwrap();
    let frames: Vec<String> = encode_stream(events, FrameFormat::EventStream).collect().await;

    assert!(frames.iter().all(|f| f.starts_with("data: ") && f.ends_with("\n\n")));
    let decoded: Vec<_> = frames
        .iter()
        .map(|f| decode_frame(f, FrameFormat::EventStream).unwrap())
        .collect();
    assert_eq!(page_numbers(&decoded), vec![1, 2]);
    assert_single_terminal(&decoded);
}

// ── Live run (pdfium + real provider) ────────────────────────────────────────

#[tokio::test]
async fn test_live_document() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
        return;
    }
    let Ok(path) = std::env::var("E2E_PDF") else {
        println!("SKIP — set E2E_PDF=/path/to/doc.pdf");
        return;
    };

    let bytes = std::fs::read(&path).expect("E2E_PDF is readable");
    let pipeline = Pipeline::from_config(AnalysisConfig::default(), None).expect("pdfium binds");
    let controller = JobController::new(Arc::new(JobStore::default()), pipeline);
    let job_id = controller.submit(Some("live.pdf"), bytes).unwrap();
    let events: Vec<_> = controller.stream(&job_id.to_string()).unwrap().collect().await;

    for event in &events {
        if let PipelineEvent::Page(p) = event {
            println!("── page {} ──\n{}\n", p.page, p.description);
        }
    }
    assert_single_terminal(&events);
    assert!(
        matches!(events.last(), Some(PipelineEvent::Complete { .. })),
        "run failed: {:?}",
        events.last()
    );
    let pages = page_numbers(&events);
    assert!(!pages.is_empty());
    assert_eq!(pages, (1..=pages.len()).collect::<Vec<_>>());
}
