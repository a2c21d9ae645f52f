//! Input resolution for the command line: a local path or an HTTP(S) URL,
//! read fully into memory.
//!
//! Documents are rendered from a byte buffer, so a download never touches
//! disk. The `%PDF` magic is checked here so a wrong file fails with a clear
//! message instead of a pdfium parse error half-way through a run.

use crate::error::PdfLayoutError;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// A document read into memory, with a display name for reports.
#[derive(Debug, Clone)]
pub struct LoadedInput {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read `input` (path or URL) into memory and verify it is a PDF.
pub async fn load_input(input: &str, timeout_secs: u64) -> Result<LoadedInput, PdfLayoutError> {
    let loaded = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    check_magic(&loaded)?;
    Ok(loaded)
}

async fn read_local(path_str: &str) -> Result<LoadedInput, PdfLayoutError> {
    let path = Path::new(path_str);
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PdfLayoutError::FileNotFound {
            path: path_str.to_string(),
        },
        _ => PdfLayoutError::Internal(format!("failed to read '{}': {}", path.display(), e)),
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_str.to_string());
    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(LoadedInput { name, bytes })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<LoadedInput, PdfLayoutError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| PdfLayoutError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            PdfLayoutError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    info!("Downloaded {} bytes", bytes.len());

    Ok(LoadedInput {
        name: filename_from_url(url),
        bytes: bytes.to_vec(),
    })
}

fn check_magic(input: &LoadedInput) -> Result<(), PdfLayoutError> {
    if input.bytes.starts_with(b"%PDF") {
        return Ok(());
    }
    Err(PdfLayoutError::NotAPdf {
        name: input.name.clone(),
        magic: input.bytes.iter().take(4).copied().collect(),
    })
}

/// Last path segment of the URL if it looks like a file name.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}
