//! CLI binary for formschema.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints the extracted form structure.

use anyhow::{Context, Result};
use clap::Parser;
use formschema::{
    extract_document, extract_to_file, DatasetRecord, DatasetStore, ExtractionConfig,
    ExtractionOutput, ExtractionProgressCallback, ExtractionResponse, PageSelection,
    ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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

/// Live progress bar with one log line per finished batch. Batches may
/// finish out of order when `--concurrency` is above 1.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Batch number → (start time, first page, page count).
    started: Mutex<HashMap<usize, (Instant, usize, usize)>>,
}

impl CliProgressCallback {
    /// Spinner-only until `on_extraction_start` reports the batch count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total_batches: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} batches  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_batches as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
    }

    fn take_started(&self, batch: usize) -> (f64, String) {
        let entry = self
            .started
            .lock()
            .ok()
            .and_then(|mut map| map.remove(&batch));
        match entry {
            Some((t, start, count)) => (
                t.elapsed().as_secs_f64(),
                format!("pages {}-{}", start, start + count - 1),
            ),
            None => (0.0, String::new()),
        }
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize, total_batches: usize) {
        self.activate_bar(total_batches);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Extracting {total_pages} pages in {total_batches} batch(es)…"
            ))
        ));
    }

    fn on_batch_start(&self, batch: usize, _total: usize, start_page: usize, page_count: usize) {
        if let Ok(mut map) = self.started.lock() {
            map.insert(batch, (Instant::now(), start_page, page_count));
        }
        self.bar.set_message(format!("batch {batch}"));
    }

    fn on_batch_complete(&self, batch: usize, total: usize, section_count: usize) {
        let (secs, pages) = self.take_started(batch);
        self.bar.println(format!(
            "  {} Batch {:>2}/{:<2}  {:<12}  {}  {}",
            green("✓"),
            batch,
            total,
            pages,
            dim(&format!("{section_count:>3} sections")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_error(&self, batch: usize, total: usize, error: &str) {
        let (secs, pages) = self.take_started(batch);
        let msg = match error.char_indices().nth(79) {
            Some((idx, _)) => format!("{}\u{2026}", &error[..idx]),
            None => error.to_string(),
        };
        self.bar.println(format!(
            "  {} Batch {:>2}/{:<2}  {:<12}  {}  {}",
            red("✗"),
            batch,
            total,
            pages,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        // The job aborts on the first failed batch.
        self.bar.finish_and_clear();
    }

    fn on_extraction_complete(&self, total_batches: usize, section_count: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} sections extracted from {} batch(es)",
            green("✔"),
            bold(&section_count.to_string()),
            total_batches
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Print the form structure as JSON
  form2schema application.pdf

  # Write it to a file
  form2schema application.pdf -o application.json

  # Smaller batches for dense forms, two requests in flight
  form2schema --pages-per-batch 3 --concurrency 2 long-form.pdf

  # A single scanned page
  form2schema consent-form.png

  # API response envelope ({ success, data, meta })
  form2schema --json application.pdf

  # Keep the result for later review and fine-tuning export
  form2schema application.pdf --dataset forms.jsonl

COMPONENT TYPES:
  Signature, Multi-Select, File Upload, Short Input, Sections,
  Dropdown, Radio Select, Table, Title, Long Input

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium (skips auto-download)
  RUST_LOG                Log filter, e.g. formschema=debug

  PDFium is downloaded automatically on the first PDF and cached.
"#;

/// Extract form structures from PDFs and images using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "form2schema",
    version,
    about = "Extract form structures (sections and typed fields) from PDFs and images",
    long_about = "Extract the fillable structure of a form (titles, sections, and fields \
with their component types) from a PDF or image using Vision Language Models. Long \
documents are processed in page batches and merged into one schema.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF/image path or HTTP/HTTPS URL.
    input: String,

    /// Write the JSON to this file instead of stdout.
    #[arg(short, long, env = "FORM2SCHEMA_OUTPUT")]
    output: Option<PathBuf>,

    /// Emit the API response envelope instead of the bare structure.
    #[arg(long, env = "FORM2SCHEMA_JSON")]
    json: bool,

    /// Maximum pages per model request.
    #[arg(long, env = "FORM2SCHEMA_PAGES_PER_BATCH", default_value_t = 5,
          value_parser = clap::value_parser!(u64).range(1..=50))]
    pages_per_batch: u64,

    /// Batch requests in flight at once.
    #[arg(short, long, env = "FORM2SCHEMA_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// LLM model ID (e.g. gpt-4.1-mini, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Page selection for PDFs: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "FORM2SCHEMA_PAGES", default_value = "all")]
    pages: String,

    /// Rendering DPI (72–400).
    #[arg(long, env = "FORM2SCHEMA_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "FORM2SCHEMA_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "FORM2SCHEMA_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per batch.
    #[arg(long, env = "FORM2SCHEMA_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "FORM2SCHEMA_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Per-batch LLM call timeout in seconds.
    #[arg(long, env = "FORM2SCHEMA_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "FORM2SCHEMA_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Largest accepted input file in MiB.
    #[arg(long, env = "FORM2SCHEMA_MAX_FILE_MB", default_value_t = 50)]
    max_file_mb: u64,

    /// Append the result to this JSONL training dataset.
    #[arg(long, env = "FORM2SCHEMA_DATASET")]
    dataset: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, env = "FORM2SCHEMA_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FORM2SCHEMA_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "FORM2SCHEMA_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    // ── Ensure PDFium engine is available ───────────────────────────────────
    if may_need_pdf_engine(&cli.input) && !pdfium_auto::is_pdfium_cached() {
        if !cli.quiet {
            let dl_bar = ProgressBar::new(0);
            dl_bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.cyan} {prefix:.bold}  \
                     [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ")
                .tick_strings(TICKS),
            );
            dl_bar.set_prefix("PDF engine");
            dl_bar.enable_steady_tick(Duration::from_millis(80));

            let bar = dl_bar.clone();
            tokio::task::block_in_place(|| {
                pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
                    if let Some(t) = total {
                        if bar.length().unwrap_or(0) != t {
                            bar.set_length(t);
                        }
                    }
                    bar.set_position(downloaded);
                }))
            })
            .context("Failed to download PDFium engine")?;

            dl_bar.finish_with_message("ready ✓");
        } else {
            tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
                .context("Failed to download PDFium engine")?;
        }
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Run extraction ───────────────────────────────────────────────────
    let output = match (&cli.output, cli.json) {
        (Some(path), false) => extract_to_file(&cli.input, path, &config)
            .await
            .context("Extraction failed")?,
        _ => {
            let result = extract_document(&cli.input, &config).await;
            let text = if cli.json {
                let (_status, envelope) = ExtractionResponse::from_result(&result);
                Some(serde_json::to_string_pretty(&envelope).context("Failed to serialise output")?)
            } else {
                None
            };
            let output = match result {
                Ok(output) => output,
                Err(e) => {
                    if let Some(text) = text {
                        println!("{text}");
                    }
                    return Err(anyhow::Error::new(e).context("Extraction failed"));
                }
            };
            let text = match text {
                Some(t) => t,
                None => serde_json::to_string_pretty(&output.structure)
                    .context("Failed to serialise output")?,
            };
            match &cli.output {
                Some(path) => write_atomic(path, &text).await?,
                None => println!("{text}"),
            }
            output
        }
    };

    if let Some(ref dataset_path) = cli.dataset {
        let id = append_to_dataset(dataset_path, &output)?;
        if !cli.quiet {
            eprintln!(
                "{} record {} added to {}",
                green("✔"),
                id,
                bold(&dataset_path.display().to_string())
            );
        }
    }

    if !cli.quiet {
        let meta = &output.meta;
        eprintln!(
            "{}  {} sections, {} fields  {}/{} pages/batches  {}ms{}",
            green("✔"),
            output.structure.sections.len(),
            output.structure.field_count(),
            meta.pages_processed,
            meta.batches,
            meta.processing_time_ms,
            cli.output
                .as_ref()
                .map(|p| format!("  →  {}", bold(&p.display().to_string())))
                .unwrap_or_default(),
        );
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            dim(&meta.input_tokens.to_string()),
            dim(&meta.output_tokens.to_string()),
        );
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let pages = parse_pages(&cli.pages)?;

    let mut builder = ExtractionConfig::builder()
        .pages_per_batch(cli.pages_per_batch as usize)
        .concurrency(cli.concurrency)
        .dpi(cli.dpi)
        .pages(pages)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .max_file_bytes(cli.max_file_mb.saturating_mul(1024 * 1024));

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!("Invalid page range '{}-{}': start must be <= end", start, end);
        }
        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;
        if pages.contains(&0) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got 0)");
        }
        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageSelection::Single(page))
}

/// Image inputs never touch pdfium, so skip the engine download for them.
fn may_need_pdf_engine(input: &str) -> bool {
    let lower = input.to_lowercase();
    ![".png", ".jpg", ".jpeg", ".gif", ".webp"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

/// Temp file + rename so an interrupted run never leaves a partial file.
async fn write_atomic(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, text)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move output into {}", path.display()))?;
    Ok(())
}

fn append_to_dataset(path: &Path, output: &ExtractionOutput) -> Result<u64> {
    let mut store = DatasetStore::open(path).context("Failed to open dataset")?;
    let record = DatasetRecord::new(
        output.meta.original_filename.clone(),
        &output.pages,
        output.structure.clone(),
    );
    store.append(record).context("Failed to append to dataset")
}
