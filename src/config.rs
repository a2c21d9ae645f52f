//! Configuration types for page-layout analysis and the HTTP service.
//!
//! Per-run behaviour is controlled through [`AnalysisConfig`], built via its
//! [`AnalysisConfigBuilder`]. The service-level knobs (bind address, upload
//! limit, job retention) live in [`ServerConfig`] and [`JobStoreConfig`].

use crate::error::PdfLayoutError;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Provider used when none is named. Matches the credential the service
/// warns about at startup (`ANTHROPIC_API_KEY`).
pub const DEFAULT_PROVIDER: &str = "anthropic";

/// Model used when none is named.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Configuration for one analysis run.
///
/// # Example
/// ```rust
/// use edgequake_pdf_layout::AnalysisConfig;
///
/// let config = AnalysisConfig::builder()
///     .analysis_scale(2.0)
///     .max_retries(0)
///     .build()
///     .unwrap();
/// assert_eq!(config.preview_scale, 1.0);
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Resolution multiplier for the preview thumbnail. Default: 1.0 (72 DPI).
    pub preview_scale: f32,

    /// Resolution multiplier for the copy sent to the model. Default: 2.0 (144 DPI).
    ///
    /// Twice the preview resolution keeps small print legible to the model
    /// while the thumbnail stays light enough to stream inline as base64.
    pub analysis_scale: f32,

    /// Cap on either rendered dimension in pixels. Default: 4000.
    ///
    /// Poster-sized pages at 2× would otherwise allocate hundreds of
    /// megabytes of pixels.
    pub max_rendered_pixels: u32,

    /// LLM model identifier. If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "anthropic", "openai", "ollama").
    /// If None, uses [`DEFAULT_PROVIDER`].
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. None leaves the provider default in place.
    pub temperature: Option<f32>,

    /// Maximum tokens the model may generate per page. Default: 1024.
    pub max_tokens: usize,

    /// Retry attempts for transient analysis failures. Default: 2.
    ///
    /// Only rate limits, network errors, upstream 5xx and timeouts are
    /// retried. Zero disables retries entirely.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call analysis timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Prompt template overriding the built-in layout prompt.
    /// `{page}` and `{total}` are substituted per page.
    pub prompt_template: Option<String>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            preview_scale: 1.0,
            analysis_scale: 2.0,
            max_rendered_pixels: 4000,
            model: None,
            provider_name: None,
            provider: None,
            temperature: None,
            max_tokens: 1024,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            prompt_template: None,
            password: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("preview_scale", &self.preview_scale)
            .field("analysis_scale", &self.analysis_scale)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("prompt_template", &self.prompt_template.is_some())
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }

    /// Provider name after applying the default.
    pub fn effective_provider(&self) -> &str {
        self.provider_name.as_deref().unwrap_or(DEFAULT_PROVIDER)
    }

    /// Model id after applying the default.
    pub fn effective_model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn preview_scale(mut self, scale: f32) -> Self {
        self.config.preview_scale = scale;
        self
    }

    pub fn analysis_scale(mut self, scale: f32) -> Self {
        self.config.analysis_scale = scale;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = Some(t.clamp(0.0, 2.0));
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.config.prompt_template = Some(template.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, PdfLayoutError> {
        let c = &self.config;
        for (name, scale) in [("preview", c.preview_scale), ("analysis", c.analysis_scale)] {
            if !(scale.is_finite() && scale > 0.0 && scale <= 10.0) {
                return Err(PdfLayoutError::InvalidConfig(format!(
                    "{name} scale must be in (0, 10], got {scale}"
                )));
            }
        }
        if c.max_tokens == 0 {
            return Err(PdfLayoutError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(PdfLayoutError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Retention and capacity limits for the job store.
#[derive(Debug, Clone)]
pub struct JobStoreConfig {
    /// Unconsumed jobs older than this are discarded. Default: 10 minutes.
    pub ttl: Duration,
    /// Maximum number of pending jobs. Default: 256.
    pub max_jobs: usize,
    /// Maximum bytes held across all pending jobs. Default: 1 GiB.
    pub max_total_bytes: usize,
}

impl Default for JobStoreConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            max_jobs: 256,
            max_total_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// HTTP service configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on. Default: 127.0.0.1:5000.
    pub bind: SocketAddr,
    /// Maximum upload size in bytes. Default: 50 MiB.
    pub max_upload_bytes: usize,
    /// Events buffered between a run and its HTTP body. Default: 16.
    pub event_buffer: usize,
    /// How often expired jobs are swept. Default: 60 s.
    pub sweep_interval: Duration,
    pub store: JobStoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5000)),
            max_upload_bytes: 50 * 1024 * 1024,
            event_buffer: 16,
            sweep_interval: Duration::from_secs(60),
            store: JobStoreConfig::default(),
        }
    }
}
