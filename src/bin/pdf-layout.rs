//! CLI binary for edgequake-pdf-layout.
//!
//! `pdf-layout serve` runs the HTTP service; `pdf-layout analyze` runs one
//! document locally and prints a Markdown report or raw event frames.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_pdf_layout::pipeline::input::load_input;
use edgequake_pdf_layout::pipeline::llm::warn_if_credential_missing;
use edgequake_pdf_layout::{
    encode_stream, server, AnalysisConfig, EventStream, FrameFormat, JobController, JobStore,
    JobStoreConfig, PageResult, Pipeline, PipelineEvent, ServerConfig,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the service on the default port (5000)
  pdf-layout serve

  # Listen on all interfaces with a 100 MB upload limit
  pdf-layout serve --bind 0.0.0.0:8080 --max-upload-mb 100

  # Describe every page of a local file
  pdf-layout analyze brochure.pdf -o brochure-layout.md

  # Stream raw events (one JSON object per line)
  pdf-layout analyze --json https://arxiv.org/pdf/1706.03762

  # Use another provider
  pdf-layout analyze --provider openai --model gpt-4.1 report.pdf

HTTP API:
  POST /upload            multipart field "pdf"  →  {"job_id": "…"}
  GET  /stream/<job_id>   text/event-stream of status / page / complete / error
  POST /analyze           multipart field "pdf"  →  {"pages": [...]}
  GET  /health            ok

ENVIRONMENT VARIABLES:
  ANTHROPIC_API_KEY       Anthropic API key (default provider)
  OPENAI_API_KEY          OpenAI API key
  GEMINI_API_KEY          Google Gemini API key
  PDFIUM_LIB_PATH         Path to libpdfium
  PDF_LAYOUT_*            Every flag below has a PDF_LAYOUT_ fallback
  RUST_LOG                Log filter (overrides --verbose / --quiet)
"#;

/// Describe the layout of PDF pages with Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf-layout",
    version,
    about = "Describe the layout of PDF pages with Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF_LAYOUT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF_LAYOUT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the upload + streaming HTTP service.
    Serve(ServeArgs),
    /// Analyse one PDF (path or URL) and print the result.
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "PDF_LAYOUT_BIND", default_value = "127.0.0.1:5000")]
    bind: SocketAddr,

    /// Maximum upload size in MB.
    #[arg(long, env = "PDF_LAYOUT_MAX_UPLOAD_MB", default_value_t = 50)]
    max_upload_mb: usize,

    /// Seconds an uploaded job waits to be streamed before it is discarded.
    #[arg(long, env = "PDF_LAYOUT_JOB_TTL", default_value_t = 600)]
    job_ttl: u64,

    /// Maximum number of uploaded jobs waiting to be streamed.
    #[arg(long, env = "PDF_LAYOUT_MAX_JOBS", default_value_t = 256)]
    max_jobs: usize,

    #[command(flatten)]
    analysis: AnalysisArgs,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write the report to this file instead of stdout.
    #[arg(short, long, env = "PDF_LAYOUT_OUTPUT")]
    output: Option<PathBuf>,

    /// Print event frames as JSON lines instead of a Markdown report.
    #[arg(long, env = "PDF_LAYOUT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF_LAYOUT_NO_PROGRESS")]
    no_progress: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF_LAYOUT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    #[command(flatten)]
    analysis: AnalysisArgs,
}

/// Flags shared by both subcommands.
#[derive(Args, Debug)]
struct AnalysisArgs {
    /// LLM model ID (default: claude-sonnet-4-20250514).
    #[arg(long, env = "PDF_LAYOUT_MODEL")]
    model: Option<String>,

    /// LLM provider: anthropic, openai, gemini, ollama, azure.
    #[arg(long, env = "PDF_LAYOUT_PROVIDER")]
    provider: Option<String>,

    /// Render scale of the preview thumbnail (1.0 = 72 DPI).
    #[arg(long, env = "PDF_LAYOUT_PREVIEW_SCALE", default_value_t = 1.0)]
    preview_scale: f32,

    /// Render scale of the copy sent to the model.
    #[arg(long, env = "PDF_LAYOUT_ANALYSIS_SCALE", default_value_t = 2.0)]
    analysis_scale: f32,

    /// Max LLM output tokens per page.
    #[arg(long, env = "PDF_LAYOUT_MAX_TOKENS", default_value_t = 1024)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0). Provider default when unset.
    #[arg(long, env = "PDF_LAYOUT_TEMPERATURE")]
    temperature: Option<f32>,

    /// Retries per page on transient LLM failures (rate limit, 5xx, timeout).
    #[arg(long, env = "PDF_LAYOUT_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-page LLM call timeout in seconds.
    #[arg(long, env = "PDF_LAYOUT_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Text file with a prompt template; `{page}` and `{total}` are substituted.
    #[arg(long, env = "PDF_LAYOUT_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF_LAYOUT_PASSWORD")]
    password: Option<String>,

    /// Path to libpdfium (file or directory).
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during a local analysis.
    let show_progress = match cli.command {
        Command::Analyze(ref a) => !cli.quiet && !a.no_progress && !a.json,
        Command::Serve(_) => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => run_serve(args).await,
        Command::Analyze(args) => run_analyze(args, show_progress, cli.quiet).await,
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = build_config(&args.analysis).await?;
    warn_if_credential_missing(&config);

    let server_config = ServerConfig {
        bind: args.bind,
        max_upload_bytes: args.max_upload_mb * 1024 * 1024,
        store: JobStoreConfig {
            ttl: Duration::from_secs(args.job_ttl),
            max_jobs: args.max_jobs,
            ..JobStoreConfig::default()
        },
        ..ServerConfig::default()
    };

    let pipeline = Pipeline::from_config(config, args.analysis.pdfium_lib.as_deref())
        .context("Failed to initialise the page pipeline")?
        .with_event_buffer(server_config.event_buffer);
    let store = Arc::new(JobStore::new(server_config.store.clone()));
    let controller = Arc::new(JobController::new(store, pipeline));

    server::serve(controller, &server_config, shutdown_signal())
        .await
        .context("Server failed")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}

async fn run_analyze(args: AnalyzeArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let config = build_config(&args.analysis).await?;
    warn_if_credential_missing(&config);

    let input = load_input(&args.input, args.download_timeout)
        .await
        .context("Failed to load input")?;
    let pipeline = Pipeline::from_config(config, args.analysis.pdfium_lib.as_deref())
        .context("Failed to initialise the page pipeline")?;
    let events = pipeline.stream(input.bytes);

    if args.json {
        return write_frames(events, args.output.as_ref()).await;
    }

    let bar = if show_progress {
        Some(progress_bar())
    } else {
        None
    };

    let mut pages: Vec<PageResult> = Vec::new();
    let mut events = events;
    while let Some(event) = events.next().await {
        match event {
            PipelineEvent::Status { message } => {
                if let Some(ref bar) = bar {
                    bar.set_message(message);
                }
            }
            PipelineEvent::Page(page) => {
                if let Some(ref bar) = bar {
                    bar.println(format!(
                        "  {} Page {:>3}  {}",
                        green("✓"),
                        page.page,
                        dim(&format!("{:>5} chars", page.description.len())),
                    ));
                    bar.inc(1);
                }
                pages.push(page);
            }
            PipelineEvent::Complete { message } => {
                if let Some(ref bar) = bar {
                    bar.finish_and_clear();
                }
                if !quiet {
                    eprintln!("{} {}", green("✔"), bold(&message));
                }
            }
            PipelineEvent::Failure { message } => {
                if let Some(ref bar) = bar {
                    bar.abandon();
                }
                eprintln!("{} {}", red("✘"), message);
                bail!("Analysis of '{}' failed: {}", input.name, message);
            }
        }
    }

    let report = markdown_report(&input.name, &pages);
    match args.output {
        Some(ref path) => {
            tokio::fs::write(path, report)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !quiet {
                eprintln!("   →  {}", bold(&path.display().to_string()));
            }
        }
        None => {
            io::stdout()
                .lock()
                .write_all(report.as_bytes())
                .context("Failed to write to stdout")?;
        }
    }
    Ok(())
}

/// Write JSON-lines frames as they arrive; fail if the run failed.
async fn write_frames(events: EventStream, output: Option<&PathBuf>) -> Result<()> {
    let mut sink: Box<dyn Write> = match output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };

    let failure = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&failure);
    let events = events.inspect(move |event| {
        if let PipelineEvent::Failure { message } = event {
            *seen.lock() = Some(message.clone());
        }
    });

    let mut frames = encode_stream(Box::pin(events), FrameFormat::JsonLines);
    while let Some(frame) = frames.next().await {
        sink.write_all(frame.as_bytes()).context("Failed to write frame")?;
        sink.flush().context("Failed to flush frame")?;
    }

    let failure = failure.lock().take();
    match failure {
        Some(message) => bail!("Analysis failed: {}", message),
        None => Ok(()),
    }
}

fn progress_bar() -> ProgressBar {
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} {prefix:.bold}  {pos:>3} pages  ⏱ {elapsed_precise}  {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_spinner())
    .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

    let bar = ProgressBar::new_spinner();
    bar.set_style(style);
    bar.set_prefix("Analysing");
    bar.set_message("Opening PDF…");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn markdown_report(name: &str, pages: &[PageResult]) -> String {
    let mut out = format!("# Layout of {name}\n");
    for page in pages {
        out.push_str(&format!("\n## Page {}\n\n{}\n", page.page, page.description));
    }
    out
}

/// Map CLI args to `AnalysisConfig`.
async fn build_config(args: &AnalysisArgs) -> Result<AnalysisConfig> {
    let mut builder = AnalysisConfig::builder()
        .preview_scale(args.preview_scale)
        .analysis_scale(args.analysis_scale)
        .max_tokens(args.max_tokens)
        .max_retries(args.max_retries)
        .api_timeout_secs(args.api_timeout);

    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(t) = args.temperature {
        builder = builder.temperature(t);
    }
    if let Some(ref password) = args.password {
        builder = builder.password(password);
    }
    if let Some(ref path) = args.prompt_file {
        let template = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt template from {:?}", path))?;
        builder = builder.prompt_template(template);
    }

    builder.build().context("Invalid configuration")
}
