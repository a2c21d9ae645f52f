//! Page analysis: the analyzer seam, its VLM implementation, and the
//! timeout/retry wrapper the pipeline calls.
//!
//! [`LlmAnalyzer`] is intentionally thin: one chat call per page, one user
//! message carrying the prompt and the page image. Retry policy lives in
//! [`analyze_page`] so it applies to any [`PageAnalyzer`], including test
//! doubles.
//!
//! ## Retry Strategy
//!
//! Only the transient class of [`AnalysisError`] is retried (rate limits,
//! network errors, upstream 5xx, timeouts). Backoff is exponential,
//! `retry_backoff_ms * 2^attempt`: with 500 ms base and 2 retries the waits
//! are 500 ms → 1 s. Auth failures and rejected requests fail immediately.

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::pipeline::encode;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Turns a page image and a prompt into a layout description.
#[async_trait]
pub trait PageAnalyzer: Send + Sync {
    async fn analyze(&self, png: &[u8], prompt: &str) -> Result<String, AnalysisError>;
}

/// [`PageAnalyzer`] backed by an `edgequake-llm` vision provider.
pub struct LlmAnalyzer {
    provider: Result<Arc<dyn LLMProvider>, String>,
    temperature: Option<f32>,
    max_tokens: usize,
}

impl LlmAnalyzer {
    /// Wrap an already-constructed provider.
    pub fn new(provider: Arc<dyn LLMProvider>, config: &AnalysisConfig) -> Self {
        Self {
            provider: Ok(provider),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Resolve the provider from config.
    ///
    /// A provider that cannot be built (typically a missing API key) is not a
    /// startup failure: it is logged here and every later `analyze` call
    /// returns [`AnalysisError::NotConfigured`], which ends that run with an
    /// `error` event.
    pub fn from_config(config: &AnalysisConfig) -> Self {
        let provider = resolve_provider(config);
        if let Err(ref reason) = provider {
            warn!(
                "Analysis provider '{}' is not available: {}",
                config.effective_provider(),
                reason
            );
        }
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl PageAnalyzer for LlmAnalyzer {
    async fn analyze(&self, png: &[u8], prompt: &str) -> Result<String, AnalysisError> {
        let provider = self
            .provider
            .as_ref()
            .map_err(|reason| AnalysisError::NotConfigured(reason.clone()))?;

        let messages = vec![ChatMessage::user_with_images(
            prompt,
            vec![encode::image_data(png)],
        )];
        let options = self.build_options();

        let response = provider
            .chat(&messages, Some(&options))
            .await
            .map_err(AnalysisError::from)?;

        debug!(
            "{} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );

        if response.content.trim().is_empty() {
            return Err(AnalysisError::EmptyResponse);
        }
        Ok(response.content)
    }
}

/// Analyse one page with the configured timeout and transient-only retries.
pub async fn analyze_page(
    analyzer: &dyn PageAnalyzer,
    png: &[u8],
    prompt: &str,
    page: usize,
    config: &AnalysisConfig,
) -> Result<String, AnalysisError> {
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        let result = match timeout(config.api_timeout(), analyzer.analyze(png, prompt)).await {
            Ok(result) => result,
            Err(_) => Err(AnalysisError::Timeout {
                secs: config.api_timeout_secs,
            }),
        };

        match result {
            Ok(description) => {
                debug!(
                    "Page {}: analysed in {:?} ({} retries)",
                    page,
                    start.elapsed(),
                    attempt
                );
                return Ok(description);
            }
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                attempt += 1;
                let backoff = config
                    .retry_backoff_ms
                    .saturating_mul(1u64 << (attempt - 1).min(16));
                warn!(
                    "Page {}: attempt {} failed — {}; retry {}/{} after {}ms",
                    page, attempt, e, attempt, config.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }
            Err(e) => {
                warn!("Page {}: analysis failed — {}", page, e);
                return Err(e);
            }
        }
    }
}

/// Environment variable holding the credential for `provider`, if it needs one.
pub fn credential_env_var(provider: &str) -> Option<&'static str> {
    match provider.to_lowercase().as_str() {
        "anthropic" | "claude" => Some("ANTHROPIC_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "gemini" | "google" => Some("GEMINI_API_KEY"),
        "mistral" => Some("MISTRAL_API_KEY"),
        "azure" => Some("AZURE_OPENAI_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        _ => None,
    }
}

/// Log a startup warning when the configured provider's credential is unset.
///
/// Returns `true` if a warning was emitted. Never fails: a missing key only
/// surfaces as an `error` event once a job actually calls the model.
pub fn warn_if_credential_missing(config: &AnalysisConfig) -> bool {
    if config.provider.is_some() {
        return false;
    }
    let Some(var) = credential_env_var(config.effective_provider()) else {
        return false;
    };
    let missing = std::env::var(var).map(|v| v.is_empty()).unwrap_or(true);
    if missing {
        warn!("{} environment variable not set!", var);
        warn!("Set it with: export {}=your-api-key", var);
    }
    missing
}

/// Resolve the provider: explicit instance first, then name + model.
fn resolve_provider(config: &AnalysisConfig) -> Result<Arc<dyn LLMProvider>, String> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    ProviderFactory::create_llm_provider(config.effective_provider(), config.effective_model())
        .map_err(|e| format!("{e}"))
}
