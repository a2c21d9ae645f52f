//! Event frames: one self-delimited text frame per [`PipelineEvent`].
//!
//! Browsers consume the HTTP service as Server-Sent Events
//! (`data: <json>\n\n`); the CLI's `--json` mode writes one JSON object per
//! line. Both carry the same JSON body, so a consumer can switch transports
//! without changing how it parses events.
//!
//! Encoding is a pure function of the event. Ordering is the producer's
//! job: [`encode_stream`] maps events to frames one at a time, so each frame
//! is available to the transport as soon as its event is produced.

use crate::error::PdfLayoutError;
use crate::events::PipelineEvent;
use crate::pipeline::EventStream;
use futures::stream::StreamExt;
use std::pin::Pin;
use tokio_stream::Stream;
use tracing::error;

/// A boxed stream of encoded frames.
pub type FrameStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Wire framing for a stream of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameFormat {
    /// `data: <json>\n\n` frames, served as `text/event-stream`.
    #[default]
    EventStream,
    /// `<json>\n` frames (JSON Lines).
    JsonLines,
}

impl FrameFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            FrameFormat::EventStream => "text/event-stream",
            FrameFormat::JsonLines => "application/x-ndjson",
        }
    }
}

/// Encode one event as a complete frame.
pub fn encode_frame(event: &PipelineEvent, format: FrameFormat) -> Result<String, PdfLayoutError> {
    let json = serde_json::to_string(event).map_err(|e| PdfLayoutError::Frame(e.to_string()))?;
    Ok(match format {
        FrameFormat::EventStream => format!("data: {json}\n\n"),
        FrameFormat::JsonLines => format!("{json}\n"),
    })
}

/// Parse one frame produced by [`encode_frame`].
pub fn decode_frame(frame: &str, format: FrameFormat) -> Result<PipelineEvent, PdfLayoutError> {
    let body = match format {
        FrameFormat::EventStream => frame
            .trim_end()
            .strip_prefix("data:")
            .ok_or_else(|| PdfLayoutError::Frame("missing 'data:' prefix".into()))?
            .trim_start(),
        FrameFormat::JsonLines => frame.trim_end(),
    };
    serde_json::from_str(body).map_err(|e| PdfLayoutError::Frame(e.to_string()))
}

/// Map an event stream to frames, lazily and in order.
///
/// An event that cannot be serialised is replaced by an `error` frame and
/// the stream ends there, so a consumer never sees a partial frame followed
/// by more events.
pub fn encode_stream(events: EventStream, format: FrameFormat) -> FrameStream {
    let frames = events
        .scan(false, move |failed, event| {
            if *failed {
                return futures::future::ready(None);
            }
            let frame = match encode_frame(&event, format) {
                Ok(frame) => frame,
                Err(e) => {
                    error!("Dropping unencodable {} event: {}", event.kind(), e);
                    *failed = true;
                    fallback_error_frame(&e, format)
                }
            };
            futures::future::ready(Some(frame))
        });
    Box::pin(frames)
}

fn fallback_error_frame(e: &PdfLayoutError, format: FrameFormat) -> String {
    let event = PipelineEvent::failure(e.to_string());
    encode_frame(&event, format).unwrap_or_else(|_| {
        let json = r#"{"type":"error","message":"Malformed event frame"}"#;
        match format {
            FrameFormat::EventStream => format!("data: {json}\n\n"),
            FrameFormat::JsonLines => format!("{json}\n"),
        }
    })
}
