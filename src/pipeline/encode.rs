//! Image encoding: `DynamicImage` → PNG bytes → base64.
//!
//! PNG is lossless: text crispness matters far more than file size for the
//! model's reading of small print, and the preview must show the page exactly
//! as rendered. Base64 makes both copies safe to embed in JSON, once as the
//! `thumbnail` field of a `page` event and once inside the vision request.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} page → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

/// Standard-alphabet base64, as expected by browsers in `data:` URIs.
pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Wrap PNG bytes as a vision-request image attachment.
///
/// `detail: "high"` keeps providers that tile images (OpenAI) from
/// downsampling the page into a single low-resolution tile.
pub fn image_data(png: &[u8]) -> ImageData {
    ImageData::new(to_base64(png), "image/png").with_detail("high")
}
