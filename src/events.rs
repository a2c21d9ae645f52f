//! Pipeline events and the per-page result they carry.
//!
//! The serialised shape is the wire contract with existing front ends:
//!
//! ```text
//! {"type":"status","message":"…"}
//! {"type":"page","page":1,"thumbnail":"<base64 png>","description":"…"}
//! {"type":"complete","message":"…"}
//! {"type":"error","message":"…"}
//! ```
//!
//! A run emits any number of `status` / `page` events followed by exactly one
//! `complete` or `error`, which is always last.

use serde::{Deserialize, Serialize};

/// Result of analysing one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-based page number.
    pub page: usize,
    /// Low-resolution preview, base64-encoded PNG.
    pub thumbnail: String,
    /// Layout description returned by the model.
    pub description: String,
}

/// One unit of the progress stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PipelineEvent {
    /// Progress message ("Rendering page 2 of 5...").
    Status { message: String },
    /// A page finished successfully.
    Page(PageResult),
    /// All pages finished. Terminal.
    Complete { message: String },
    /// The run failed. Terminal; nothing follows it.
    #[serde(rename = "error")]
    Failure { message: String },
}

impl PipelineEvent {
    pub fn status(message: impl Into<String>) -> Self {
        PipelineEvent::Status {
            message: message.into(),
        }
    }

    pub fn complete(message: impl Into<String>) -> Self {
        PipelineEvent::Complete {
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        PipelineEvent::Failure {
            message: message.into(),
        }
    }

    /// `complete` and `error` end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::Complete { .. } | PipelineEvent::Failure { .. })
    }

    /// The wire discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::Status { .. } => "status",
            PipelineEvent::Page(_) => "page",
            PipelineEvent::Complete { .. } => "complete",
            PipelineEvent::Failure { .. } => "error",
        }
    }
}
