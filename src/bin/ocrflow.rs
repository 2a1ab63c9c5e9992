//! CLI binary for ocrflow.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` / endpoint configs, runs batches, and prints results.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use ocrflow::pipeline::input::plan_batches;
use ocrflow::{
    AnalysisEvent, AnalysisService, BatchProgressCallback, InMemoryTaskStore, NoticeRewrite,
    OcrEndpoint, Pipeline, PipelineConfig, ProgressCallback, TaskReport, TaskStore,
    WorkflowClient, WorkflowEndpoint,
};
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over the files of a batch, with a
/// log line per page above it.
struct CliProgressCallback {
    bar: ProgressBar,
    page_errors: AtomicUsize,
    file_errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  {msg}  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("OCR");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            page_errors: AtomicUsize::new(0),
            file_errors: AtomicUsize::new(0),
        })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, task_id: &str, total_files: usize) {
        self.page_errors.store(0, Ordering::SeqCst);
        self.file_errors.store(0, Ordering::SeqCst);
        self.bar.reset();
        self.bar.set_length(total_files as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Task {task_id}: {total_files} file(s)"))
        ));
    }

    fn on_file_start(&self, file: &str, _index: usize, total_pages: usize) {
        self.bar.set_message(format!("{file} ({total_pages} pages)"));
    }

    fn on_page_complete(&self, file: &str, page: usize, text_len: usize) {
        self.bar.println(format!(
            "  {} {} page {:>3}  {}",
            green("✓"),
            file,
            page,
            dim(&format!("{text_len:>5} chars")),
        ));
    }

    fn on_page_error(&self, file: &str, page: usize, error: &str) {
        self.page_errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {} page {:>3}  {}",
            red("✗"),
            file,
            page,
            red(&msg)
        ));
    }

    fn on_file_complete(&self, file: &str, _index: usize, error: Option<&str>) {
        if let Some(e) = error {
            self.file_errors.fetch_add(1, Ordering::SeqCst);
            self.bar
                .println(format!("  {} {}  {}", red("✘"), file, red(e)));
        }
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, task_id: &str, status: &str) {
        self.bar.finish_and_clear();
        let page_errors = self.page_errors.load(Ordering::SeqCst);
        let file_errors = self.file_errors.load(Ordering::SeqCst);
        let mark = if status != "completed" {
            red("✘")
        } else if page_errors + file_errors > 0 {
            cyan("⚠")
        } else {
            green("✔")
        };
        eprintln!(
            "{} Task {}: {}  ({} page error(s), {} file error(s))",
            mark,
            task_id,
            bold(status),
            page_errors,
            file_errors
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # OCR two files, print the page text
  ocrflow ocr a.pdf b.pdf

  # OCR a folder in sub-batches of at most 80 MB, JSON report
  ocrflow ocr --max-batch-mb 80 --json scans/*.pdf > report.json

  # OCR then stream an analysis (10 pages per chunk)
  ocrflow analyze -k 10 contract.pdf

  # Buffered analysis, exported to ./out
  ocrflow analyze --buffered --export out contract.pdf

  # Raw event frames, as a web client would receive them
  ocrflow analyze --events contract.pdf

ENVIRONMENT VARIABLES:
  OCRFLOW_APP_ID            OCR service app id
  OCRFLOW_API_KEY           OCR service api key
  OCRFLOW_API_SECRET        OCR service api secret
  OCRFLOW_OCR_URL           OCR endpoint URL
  OCRFLOW_WORKFLOW_TOKEN    Bearer token for the analysis workflow
  OCRFLOW_FLOW_ID           Analysis workflow id
  OCRFLOW_WORKFLOW_URL      Analysis workflow endpoint URL
  PDFIUM_LIB_PATH           Directory containing libpdfium
  RUST_LOG                  Overrides the log filter
"#;

/// OCR PDF files through a remote OCR service and analyse the text with an LLM workflow.
#[derive(Parser, Debug)]
#[command(
    name = "ocrflow",
    version,
    about = "OCR PDF files and analyse the text with an LLM workflow",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "OCRFLOW_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "OCRFLOW_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "OCRFLOW_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// OCR one or more PDF files and print the page text.
    Ocr(OcrCmd),
    /// OCR PDF files, then analyse them with the workflow endpoint.
    Analyze(AnalyzeCmd),
}

#[derive(Args, Debug)]
struct OcrCmd {
    #[command(flatten)]
    ocr: OcrArgs,

    /// Print the task report(s) as JSON.
    #[arg(long, env = "OCRFLOW_JSON")]
    json: bool,

    /// Split the files into sub-batches of at most this many megabytes.
    #[arg(long, env = "OCRFLOW_MAX_BATCH_MB")]
    max_batch_mb: Option<u64>,
}

#[derive(Args, Debug)]
struct AnalyzeCmd {
    #[command(flatten)]
    ocr: OcrArgs,

    /// Pages per analysis chunk.
    #[arg(short = 'k', long, env = "OCRFLOW_K_PAGES", default_value_t = 5,
          value_parser = clap::value_parser!(u64).range(1..))]
    k_pages: u64,

    /// Wait for the full analysis instead of streaming fragments.
    #[arg(long, env = "OCRFLOW_BUFFERED")]
    buffered: bool,

    /// Print raw `data: {...}` event frames instead of plain text.
    #[arg(long, env = "OCRFLOW_EVENTS", conflicts_with = "buffered")]
    events: bool,

    /// Write the analysis to this directory.
    #[arg(long, env = "OCRFLOW_EXPORT_DIR")]
    export: Option<PathBuf>,

    /// Bearer token for the workflow endpoint.
    #[arg(long, env = "OCRFLOW_WORKFLOW_TOKEN", hide_env_values = true)]
    workflow_token: String,

    /// Workflow id.
    #[arg(long, env = "OCRFLOW_FLOW_ID")]
    flow_id: String,

    /// Workflow endpoint URL.
    #[arg(long, env = "OCRFLOW_WORKFLOW_URL", default_value = ocrflow::config::DEFAULT_WORKFLOW_URL)]
    workflow_url: String,

    /// Instruction sent with the chunk list.
    #[arg(long, env = "OCRFLOW_PROMPT")]
    prompt: Option<String>,

    /// Rewrite streamed fragments starting with this prefix...
    #[arg(long, env = "OCRFLOW_NOTICE_PREFIX", requires = "notice_replacement")]
    notice_prefix: Option<String>,

    /// ...replacing the prefix with this text.
    #[arg(long, env = "OCRFLOW_NOTICE_REPLACEMENT")]
    notice_replacement: Option<String>,
}

/// Options shared by every command that runs OCR.
#[derive(Args, Debug)]
struct OcrArgs {
    /// PDF files to process, in order.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// OCR service app id.
    #[arg(long, env = "OCRFLOW_APP_ID")]
    app_id: String,

    /// OCR service api key.
    #[arg(long, env = "OCRFLOW_API_KEY", hide_env_values = true)]
    api_key: String,

    /// OCR service api secret.
    #[arg(long, env = "OCRFLOW_API_SECRET", hide_env_values = true)]
    api_secret: String,

    /// OCR endpoint URL.
    #[arg(long, env = "OCRFLOW_OCR_URL", default_value = ocrflow::config::DEFAULT_OCR_URL)]
    ocr_url: String,

    /// Per-call OCR timeout in seconds.
    #[arg(long, env = "OCRFLOW_OCR_TIMEOUT", default_value_t = 60)]
    ocr_timeout: u64,

    /// Page upscale factor for OCR (0.5–4.0).
    #[arg(long, env = "OCRFLOW_SCALE", default_value_t = 2.0)]
    scale: f32,

    /// Directory for rendered page images.
    #[arg(long, env = "OCRFLOW_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Directory containing the pdfium library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Delete each input PDF once it has been processed.
    #[arg(long, env = "OCRFLOW_DELETE_SOURCES")]
    delete_sources: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar provides the feedback that matters; keep library
    // logs at error level while it is active.
    let json_output = matches!(&cli.command, Command::Ocr(c) if c.json);
    let show_progress = !cli.quiet && !cli.no_progress && !json_output;
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    match cli.command {
        Command::Ocr(cmd) => run_ocr(cmd, progress_cb, cli.quiet).await,
        Command::Analyze(cmd) => run_analyze(cmd, progress_cb, cli.quiet).await,
    }
}

#[derive(Serialize)]
struct TaskOutput {
    task_id: String,
    #[serde(flatten)]
    report: TaskReport,
}

async fn run_ocr(cmd: OcrCmd, progress: Option<ProgressCallback>, quiet: bool) -> Result<()> {
    let config = build_config(&cmd.ocr, progress, None)?;
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let pipeline = build_pipeline(&cmd.ocr, &store, config)?;

    let batches = match cmd.max_batch_mb {
        Some(mb) => {
            let (batches, skipped) = plan_batches(&cmd.ocr.files, mb.saturating_mul(1024 * 1024));
            for file in &skipped {
                eprintln!(
                    "{} skipping {}: larger than {} MB",
                    cyan("⚠"),
                    file.display(),
                    mb
                );
            }
            batches
        }
        None => vec![cmd.ocr.files.clone()],
    };
    if batches.is_empty() {
        bail!("No files left to process");
    }

    let mut outputs = Vec::with_capacity(batches.len());
    for files in batches {
        let handle = pipeline.submit(files).context("Failed to start OCR batch")?;
        let task_id = handle.wait().await.context("OCR batch failed")?;
        let report = store.status(&task_id)?;
        outputs.push(TaskOutput { task_id, report });
    }

    if cmd.json {
        let json = serde_json::to_string_pretty(&outputs).context("Failed to serialise report")?;
        println!("{json}");
        return Ok(());
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for output in &outputs {
        match &output.report {
            TaskReport::Completed { results }
            | TaskReport::Cancelled { results, .. } => {
                for file in results {
                    for page in file.page_results() {
                        writeln!(out, "{}\n", page.block()).context("Failed to write to stdout")?;
                    }
                }
            }
            TaskReport::Error { error } => {
                bail!("Task {} failed: {}", output.task_id, error);
            }
            TaskReport::Processing { .. } => {
                bail!("Task {} did not finish", output.task_id);
            }
        }
    }

    if !quiet {
        eprintln!(
            "{}",
            dim(&format!("{} task(s) finished", outputs.len()))
        );
    }
    Ok(())
}

async fn run_analyze(
    cmd: AnalyzeCmd,
    progress: Option<ProgressCallback>,
    quiet: bool,
) -> Result<()> {
    let notice = match (&cmd.notice_prefix, &cmd.notice_replacement) {
        (Some(p), Some(r)) => Some(NoticeRewrite::new(p, r)),
        _ => None,
    };
    let mut config = build_config(&cmd.ocr, progress, notice)?;
    config.k_pages = usize::try_from(cmd.k_pages).context("Chunk size too large")?;
    config.export_dir = cmd.export.clone();

    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let pipeline = build_pipeline(&cmd.ocr, &store, config.clone())?;

    let handle = pipeline
        .submit(cmd.ocr.files.clone())
        .context("Failed to start OCR batch")?;
    let task_id = handle.wait().await.context("OCR batch failed")?;
    if let TaskReport::Error { error } = store.status(&task_id)? {
        bail!("OCR task {} failed: {}", task_id, error);
    }

    let mut endpoint =
        WorkflowEndpoint::new(&cmd.workflow_token, &cmd.flow_id).with_url(&cmd.workflow_url);
    if let Some(ref prompt) = cmd.prompt {
        endpoint.user_input = prompt.clone();
    }
    let client = WorkflowClient::new(endpoint).context("Invalid workflow endpoint")?;
    let service = AnalysisService::new(Arc::clone(&store), client, &config);

    if cmd.buffered {
        let response = service
            .analyze_buffered(&task_id, config.k_pages)
            .await
            .context("Analysis failed")?;
        if !response.success {
            bail!("{}", response.analysis_result);
        }
        println!("{}", response.analysis_result);
        if let Some(artifact) = response.artifact {
            if !quiet {
                eprintln!("{} exported {}", green("✔"), bold(&artifact.filename));
            }
        }
        return Ok(());
    }

    let mut events = service
        .analyze_stream(&task_id, config.k_pages)
        .context("Analysis failed")?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    while let Some(event) = events.next().await {
        if cmd.events {
            out.write_all(event.to_sse_frame().as_bytes())?;
            out.flush()?;
            if let AnalysisEvent::Error { error } = event {
                bail!("{error}");
            }
            continue;
        }
        match event {
            AnalysisEvent::Init {
                chunks_count,
                k_pages,
            } => {
                if !quiet {
                    eprintln!(
                        "{} {}",
                        cyan("◆"),
                        bold(&format!(
                            "Analysing {chunks_count} chunk(s) of up to {k_pages} pages"
                        ))
                    );
                }
            }
            AnalysisEvent::Content { data } => {
                out.write_all(data.as_bytes())?;
                out.flush()?;
            }
            AnalysisEvent::WordGenerated { filename, .. } => {
                if !quiet {
                    eprintln!("\n{} exported {}", green("✔"), bold(&filename));
                }
            }
            AnalysisEvent::Done => {
                writeln!(out)?;
            }
            AnalysisEvent::Error { error } => {
                writeln!(out)?;
                bail!("{error}");
            }
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(
    args: &OcrArgs,
    progress: Option<ProgressCallback>,
    notice: Option<NoticeRewrite>,
) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .render_scale(args.scale)
        .delete_sources(args.delete_sources);

    if let Some(ref dir) = args.scratch_dir {
        builder = builder.scratch_dir(dir);
    }
    if let Some(ref path) = args.pdfium_lib_path {
        builder = builder.pdfium_lib_path(path);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    if let Some(rule) = notice {
        builder = builder.notice_rewrite(rule);
    }

    builder.build().context("Invalid configuration")
}

fn build_pipeline(
    args: &OcrArgs,
    store: &Arc<dyn TaskStore>,
    config: PipelineConfig,
) -> Result<Pipeline> {
    let mut endpoint =
        OcrEndpoint::new(&args.app_id, &args.api_key, &args.api_secret).with_url(&args.ocr_url);
    endpoint.timeout_secs = args.ocr_timeout;

    Pipeline::remote(Arc::clone(store), endpoint, config).context("Invalid OCR endpoint")
}
