//! PDF rasterisation: the renderer seam, its pdfium implementation, and the
//! per-run render session.
//!
//! ## Why a dedicated blocking thread per run?
//!
//! pdfium is not async-safe and an open `PdfDocument` borrows the bound
//! library, so it cannot be carried across `.await` points of a Tokio task.
//! [`RenderSession`] therefore opens the document inside `spawn_blocking` and
//! keeps it there, serving one render request at a time over a channel. The
//! document lives exactly as long as that thread: when the session is closed
//! or dropped the request channel closes, the loop ends and the document is
//! released, whichever way the run ended.
//!
//! Both copies of a page are PNG-encoded on the same thread, so the async side
//! only ever sees bytes.

use crate::error::RenderError;
use crate::pipeline::encode;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Opens documents. Implementations must be shareable across runs.
pub trait DocumentRenderer: Send + Sync {
    /// Open `bytes` as a document. The returned handle is closed on drop.
    fn open<'a>(
        &'a self,
        bytes: Vec<u8>,
        password: Option<&str>,
    ) -> Result<Box<dyn OpenDocument + 'a>, RenderError>;
}

/// An open document. Every call is addressed by page index, so calls are
/// independent of each other and of call order.
pub trait OpenDocument {
    fn page_count(&self) -> usize;

    /// Rasterise the page at 0-based `index` with resolution multiplier `scale`.
    fn render(&self, index: usize, scale: f32) -> Result<DynamicImage, RenderError>;
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// [`DocumentRenderer`] backed by a pdfium library bound at startup.
///
/// One binding is shared by every run; pdfium-render's `sync` feature makes
/// `Pdfium` `Send + Sync` and serialises calls into the library.
pub struct PdfiumRenderer {
    pdfium: Pdfium,
    max_pixels: u32,
}

impl PdfiumRenderer {
    /// Bind pdfium, trying in order: `lib_path`, `$PDFIUM_LIB_PATH`, the
    /// working directory, then the system library search path.
    pub fn bind(
        lib_path: Option<&Path>,
        max_pixels: u32,
    ) -> Result<Self, crate::PdfLayoutError> {
        let env_path = std::env::var("PDFIUM_LIB_PATH").ok().filter(|p| !p.is_empty());

        let bindings = match (lib_path, env_path) {
            (Some(path), _) => Pdfium::bind_to_library(path),
            (None, Some(env)) => Pdfium::bind_to_library(env),
            (None, None) => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                    .or_else(|_| Pdfium::bind_to_system_library())
            }
        }
        .map_err(|e| crate::PdfLayoutError::PdfiumBindingFailed(e.to_string()))?;

        info!("pdfium bound");
        Ok(Self {
            pdfium: Pdfium::new(bindings),
            max_pixels,
        })
    }
}

impl DocumentRenderer for PdfiumRenderer {
    fn open<'a>(
        &'a self,
        bytes: Vec<u8>,
        password: Option<&str>,
    ) -> Result<Box<dyn OpenDocument + 'a>, RenderError> {
        let document = self
            .pdfium
            .load_pdf_from_byte_vec(bytes, password)
            .map_err(|e| {
                let err_str = format!("{:?}", e);
                if err_str.contains("Password") || err_str.contains("password") {
                    if password.is_some() {
                        RenderError::Open("wrong password".into())
                    } else {
                        RenderError::Open("document is encrypted and requires a password".into())
                    }
                } else {
                    RenderError::Open(err_str)
                }
            })?;

        Ok(Box::new(PdfiumDocument {
            document,
            max_pixels: self.max_pixels,
        }))
    }
}

struct PdfiumDocument<'a> {
    document: PdfDocument<'a>,
    max_pixels: u32,
}

impl OpenDocument for PdfiumDocument<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn render(&self, index: usize, scale: f32) -> Result<DynamicImage, RenderError> {
        let page = self
            .document
            .pages()
            .get(index as u16)
            .map_err(|e| RenderError::Page {
                page: index + 1,
                detail: format!("{:?}", e),
            })?;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(scale)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| RenderError::Page {
                page: index + 1,
                detail: format!("{:?}", e),
            })?;

        Ok(bitmap.as_image())
    }
}

// ── Render session ───────────────────────────────────────────────────────

/// Resolution multipliers for the two copies of each page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderScales {
    pub preview: f32,
    pub analysis: f32,
}

/// Both renderings of one page, PNG-encoded.
#[derive(Debug, Clone)]
pub struct PageRender {
    /// 1-based page number.
    pub page: usize,
    pub preview: Vec<u8>,
    pub analysis_copy: Vec<u8>,
}

struct RenderRequest {
    page: usize,
    reply: oneshot::Sender<Result<PageRender, RenderError>>,
}

/// An open document on its own blocking thread.
pub struct RenderSession {
    page_count: usize,
    requests: Option<mpsc::Sender<RenderRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl RenderSession {
    /// Open `bytes` on a blocking thread and wait for the page count.
    pub async fn open(
        renderer: Arc<dyn DocumentRenderer>,
        bytes: Vec<u8>,
        password: Option<String>,
        scales: RenderScales,
    ) -> Result<Self, RenderError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (req_tx, req_rx) = mpsc::channel(1);

        let worker = tokio::task::spawn_blocking(move || {
            render_worker(renderer, bytes, password, scales, ready_tx, req_rx)
        });

        match ready_rx.await {
            Ok(Ok(page_count)) => Ok(Self {
                page_count,
                requests: Some(req_tx),
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.await;
                Err(e)
            }
            Err(_) => {
                if let Err(e) = worker.await {
                    warn!("Render worker panicked while opening: {}", e);
                }
                Err(RenderError::WorkerGone)
            }
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Render the preview and analysis copies of 1-based `page`.
    pub async fn render_page(&self, page: usize) -> Result<PageRender, RenderError> {
        let requests = self.requests.as_ref().ok_or(RenderError::WorkerGone)?;
        let (reply, response) = oneshot::channel();
        requests
            .send(RenderRequest { page, reply })
            .await
            .map_err(|_| RenderError::WorkerGone)?;
        response.await.map_err(|_| RenderError::WorkerGone)?
    }

    /// Close the document and wait for the render thread to finish.
    pub async fn close(mut self) {
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!("Render worker panicked: {}", e);
            }
        }
    }
}

/// Body of the blocking render thread.
fn render_worker(
    renderer: Arc<dyn DocumentRenderer>,
    bytes: Vec<u8>,
    password: Option<String>,
    scales: RenderScales,
    ready: oneshot::Sender<Result<usize, RenderError>>,
    mut requests: mpsc::Receiver<RenderRequest>,
) {
    let document = match renderer.open(bytes, password.as_deref()) {
        Ok(document) => document,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let page_count = document.page_count();
    info!("PDF loaded: {} pages", page_count);
    if ready.send(Ok(page_count)).is_err() {
        return;
    }

    while let Some(request) = requests.blocking_recv() {
        let result = render_both(document.as_ref(), page_count, request.page, scales);
        let _ = request.reply.send(result);
    }

    drop(document);
    debug!("Document closed");
}

fn render_both(
    document: &dyn OpenDocument,
    page_count: usize,
    page: usize,
    scales: RenderScales,
) -> Result<PageRender, RenderError> {
    if page == 0 || page > page_count {
        return Err(RenderError::Page {
            page,
            detail: format!("out of range (document has {} pages)", page_count),
        });
    }

    let encode_err = |e: image::ImageError| RenderError::Page {
        page,
        detail: format!("PNG encoding failed: {}", e),
    };

    let preview = document.render(page - 1, scales.preview)?;
    let preview = encode::encode_png(&preview).map_err(encode_err)?;

    let analysis = document.render(page - 1, scales.analysis)?;
    debug!(
        "Rendered page {} → {}x{} px for analysis",
        page,
        analysis.width(),
        analysis.height()
    );
    let analysis_copy = encode::encode_png(&analysis).map_err(encode_err)?;

    Ok(PageRender {
        page,
        preview,
        analysis_copy,
    })
}
