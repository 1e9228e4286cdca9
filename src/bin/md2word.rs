//! CLI binary for md2word.
//!
//! A thin shim over the library crate: `serve` runs the HTTP surface,
//! `convert` runs one document through the same pipeline from the terminal.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use md2word::pipeline::rate_limit::{DEFAULT_SWEEP_PERIOD, LOOPBACK_CLIENT};
use md2word::pipeline::telemetry::NullUsageLog;
use md2word::server::{start_server, AppState};
use md2word::{
    ChatCompletion, JsonFileCounter, LlmConfig, LlmGateway, PandocRenderer, Pipeline,
    PipelineConfig, PipelineError, PipelineProgressCallback, PipelineRequest, PipelineResult,
    ProcessingStep, RateLimiter, RendererConfig, RollingFileLog, TelemetryConfig, TemplateCatalog,
    UsageCounter,
};
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────

/// Spinner that shows the step the run is currently in.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

fn describe(step: ProcessingStep) -> &'static str {
    match step {
        ProcessingStep::Input => "reading input…",
        ProcessingStep::Validate => "validating…",
        ProcessingStep::NormalizeText => "converting text to Markdown…",
        ProcessingStep::SelectTemplate => "selecting template…",
        ProcessingStep::CleanText => "cleaning Markdown…",
        ProcessingStep::Render => "rendering Word document…",
        ProcessingStep::Done => "done",
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_step(&self, step: ProcessingStep) {
        if step != ProcessingStep::Input {
            self.bar
                .println(format!("  {} {}", green("✓"), dim(describe(step))));
        }
        self.bar.set_message(describe(step));
    }

    fn on_complete(&self, result: &PipelineResult) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {}  {}",
            green("✔"),
            result.output_filename,
            dim(&format!(
                "{} bytes, template {}{}",
                result.document.len(),
                result.template_id,
                if result.was_converted {
                    ", text converted to Markdown"
                } else {
                    ""
                }
            ))
        );
    }

    fn on_error(&self, error: &PipelineError) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", red("✘"), red(&error.to_string()));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve the HTTP API
  md2word serve --addr 0.0.0.0:3000

  # Convert a file with the default template
  md2word convert notes.md -o notes.docx

  # Convert stdin with another template and print the JSON response
  pbpaste | md2word convert - --template academic-paper --json > out.json

ENVIRONMENT VARIABLES:
  LLM_API_KEY        API key of the OpenAI-compatible endpoint (required)
  LLM_API_BASE_URL   Base URL, e.g. https://api.openai.com/v1 (required)
  LLM_MODEL          Model id (required)
  PANDOC_PATH        pandoc executable (default: tools/pandoc/bin/pandoc)
  RUST_LOG           tracing filter, e.g. md2word=debug,tower_http=info
"#;

/// Convert text and Markdown to styled Word documents.
#[derive(Parser, Debug)]
#[command(
    name = "md2word",
    version,
    about = "Convert text and Markdown to styled Word documents",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server.
    Serve {
        /// Listen address.
        #[arg(long, env = "MD2WORD_ADDR", default_value = "0.0.0.0:3000")]
        addr: String,

        /// Directory for the rolling usage log.
        #[arg(long, env = "MD2WORD_LOG_DIR", default_value = "logs")]
        log_dir: PathBuf,

        /// JSON file holding the usage counter.
        #[arg(long, env = "MD2WORD_STATS_FILE", default_value = "data/stats.json")]
        stats_file: PathBuf,
    },

    /// Convert one document.
    Convert {
        /// Input text file, or `-` for stdin.
        input: String,

        /// Template id.
        #[arg(short, long, env = "MD2WORD_TEMPLATE", default_value = "style-default")]
        template: String,

        /// Output `.docx` path. Default: the generated file name.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the JSON response (document as base64) to stdout instead.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// pandoc executable.
    #[arg(long, global = true, env = "PANDOC_PATH")]
    pandoc: Option<PathBuf>,

    /// Directory holding the reference `.docx` templates.
    #[arg(long, global = true, env = "MD2WORD_TEMPLATES_DIR", default_value = "templates")]
    templates_dir: PathBuf,

    /// JSON template catalog replacing the built-in one.
    #[arg(long, global = true, env = "MD2WORD_CATALOG")]
    catalog: Option<PathBuf>,

    /// Maximum input length in characters.
    #[arg(long, global = true, env = "MD2WORD_MAX_INPUT", default_value_t = 10_000)]
    max_input: usize,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "MD2WORD_VERBOSE")]
    verbose: bool,

    /// Suppress all logs except errors.
    #[arg(short, long, global = true, env = "MD2WORD_QUIET", conflicts_with = "verbose")]
    quiet: bool,
}

impl CommonArgs {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        PipelineConfig::builder()
            .max_input_length(self.max_input)
            .build()
            .context("Invalid pipeline configuration")
    }

    fn renderer(&self) -> PandocRenderer {
        let mut config = RendererConfig::from_env();
        if let Some(path) = &self.pandoc {
            config.executable = path.clone();
        }
        config.templates_dir = self.templates_dir.clone();
        PandocRenderer::new(config)
    }

    fn catalog(&self) -> Result<TemplateCatalog> {
        match &self.catalog {
            Some(path) => TemplateCatalog::from_json_file(path)
                .with_context(|| format!("Failed to load catalog {}", path.display())),
            None => Ok(TemplateCatalog::default()),
        }
    }

    fn gateway(&self) -> Result<Arc<LlmGateway>> {
        let config = LlmConfig::from_env().context("LLM endpoint is not configured")?;
        Ok(Arc::new(
            LlmGateway::new(config).context("Failed to create LLM client")?,
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner already reports progress for `convert`; keep logs quiet there.
    let filter = if cli.common.verbose {
        "md2word=debug,tower_http=debug"
    } else if cli.common.quiet {
        "error"
    } else {
        match cli.command {
            Command::Serve { .. } => "md2word=info,tower_http=info",
            Command::Convert { .. } => "error",
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve {
            ref addr,
            ref log_dir,
            ref stats_file,
        } => serve(&cli.common, addr, log_dir, stats_file).await,
        Command::Convert {
            ref input,
            ref template,
            ref output,
            json,
        } => convert(&cli.common, input, template, output.as_ref(), json).await,
    }
}

async fn serve(
    common: &CommonArgs,
    addr: &str,
    log_dir: &std::path::Path,
    stats_file: &std::path::Path,
) -> Result<()> {
    let config = common.pipeline_config()?;
    let telemetry = TelemetryConfig {
        log_dir: log_dir.to_path_buf(),
        counter_path: stats_file.to_path_buf(),
        ..TelemetryConfig::default()
    };

    let llm = common.gateway()?;
    let limiter = Arc::new(RateLimiter::from_config(&config));
    let _sweeper = limiter.spawn_sweeper(DEFAULT_SWEEP_PERIOD);
    let counter: Arc<dyn UsageCounter> = Arc::new(JsonFileCounter::from_config(&telemetry));

    info!(
        model = llm.model(),
        max_input = config.max_input_length,
        "Starting md2word server"
    );
    let pipeline = Pipeline::builder(llm.clone(), Arc::new(common.renderer()))
        .config(config)
        .rate_limiter(limiter)
        .catalog(common.catalog()?)
        .usage_log(Arc::new(RollingFileLog::new(&telemetry)))
        .usage_counter(counter.clone())
        .build();

    let state = AppState::new(Arc::new(pipeline), llm, counter);
    start_server(addr, state)
        .await
        .with_context(|| format!("Server on {addr} failed"))
}

async fn convert(
    common: &CommonArgs,
    input: &str,
    template: &str,
    output: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let text = if input == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("Failed to read {input}"))?
    };

    let mut builder = Pipeline::builder(common.gateway()?, Arc::new(common.renderer()))
        .config(common.pipeline_config()?)
        .catalog(common.catalog()?)
        .usage_log(Arc::new(NullUsageLog));
    if !json {
        builder = builder.progress_callback(CliProgressCallback::new());
    }
    let pipeline = builder.build();

    let request = PipelineRequest::new(text, template);
    let result = pipeline
        .run(&request, LOOPBACK_CLIENT)
        .await
        .context("Conversion failed")?;

    if json {
        let body = serde_json::to_string_pretty(&result.to_response())
            .context("Failed to serialise response")?;
        println!("{body}");
        return Ok(());
    }

    let path = output
        .cloned()
        .unwrap_or_else(|| PathBuf::from(&result.output_filename));
    tokio::fs::write(&path, &result.document)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    eprintln!("Wrote {}", path.display());
    Ok(())
}
