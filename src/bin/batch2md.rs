//! CLI binary for edgequake-batch2md.
//!
//! A thin shim over the library crate that maps CLI flags to a batch and a
//! `BatchConfig`, writes the archive and prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_batch2md::{
    BatchConfig, BatchInput, BatchProgressCallback, CompletionBackend, ConversionOptions,
    ConverterKey, ConverterRegistry, Credential, ItemDescriptor, ItemKind, KeyedProviderBackend,
    Manifest, MediaTranscriber, Orchestrator, ProgressCallback, ServiceConfig, ServiceProxy,
};
use edgequake_llm::{LLMProvider, ProviderFactory};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;
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

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per item.
/// Items complete out of order, so start times are keyed by index.
struct CliProgressCallback {
    bar: ProgressBar,
    names: Mutex<HashMap<usize, (String, Instant)>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Resolving batch…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            names: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}%  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(100);
        self.bar.set_style(progress_style);
        self.bar.set_prefix(format!("Converting {total}"));
        self.bar.reset_eta();
    }

    fn finish_item(&self, index: usize) -> (String, f64) {
        self.names
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|(name, t)| (name, t.elapsed().as_secs_f64()))
            .unwrap_or_else(|| (format!("#{index}"), 0.0))
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_items: usize) {
        self.activate_bar(total_items);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting conversion of {total_items} items…"))
        ));
    }

    fn on_item_start(&self, index: usize, _total: usize, name: &str) {
        if let Ok(mut m) = self.names.lock() {
            m.insert(index, (name.to_string(), Instant::now()));
        }
        self.bar.set_message(name.to_string());
    }

    fn on_item_complete(&self, index: usize, total: usize, markdown_len: usize) {
        let (name, secs) = self.finish_item(index);
        self.bar.println(format!(
            "  {} {:>3}/{:<3} {:<32} {:<12} {}",
            green("✓"),
            index + 1,
            total,
            name,
            dim(&format!("{markdown_len:>6} chars")),
            dim(&format!("{secs:.1}s")),
        ));
    }

    fn on_item_error(&self, index: usize, total: usize, error: &str) {
        let (name, secs) = self.finish_item(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:>3}/{:<3} {:<32} {}  {}",
            red("✗"),
            index + 1,
            total,
            name,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
    }

    fn on_progress(&self, percent: u8) {
        self.bar.set_position(u64::from(percent));
    }

    fn on_batch_complete(&self, total_items: usize, success_count: usize) {
        let failed = total_items.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} items converted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} items converted  ({} failed)",
                if failed == total_items {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_items,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Local files into batch.zip
  batch2md report.pdf sales.csv notes.md

  # Web pages and a crawled site
  batch2md https://example.com/post --crawl https://docs.example.com -o web.zip

  # Transcribe audio and a video link (needs an API key)
  batch2md talk.mp3 --video https://youtube.com/watch?v=abc --api-key sk-...

  # A JSON manifest: {"items": [{"kind": "file", "name": "a.txt", "text": "hi"}]}
  batch2md --manifest batch.json -o out.zip

  # Per-item results as JSON on stdout
  batch2md --json *.csv > results.json

ARCHIVE LAYOUT:
  documents/  data/  web/<host>/  multimedia/  other/   converted items
  <folder>/assets/                                     embedded images
  errors/<name>_error.md                               one per failed item
  summary.md                                           run report

ENVIRONMENT VARIABLES:
  BATCH2MD_API_KEY        Credential for multimedia items; with a hosted
                          provider (openai, anthropic, gemini, openrouter)
                          it is the key every transcription call uses
  EDGEQUAKE_LLM_PROVIDER  Provider, same as --provider (default: openai)
  EDGEQUAKE_MODEL         Override model ID
  OPENAI_API_KEY          Provider keys, used when no API key is given
  ANTHROPIC_API_KEY
  GEMINI_API_KEY
"#;

/// Convert batches of files, web pages and media to a zip of Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "batch2md",
    version,
    about = "Convert files, web pages and media links to a zip of Markdown",
    long_about = "Convert a heterogeneous batch (local files, web pages, whole sites and \
video links) into one zip archive of Markdown, organised by category, with an \
errors/ folder for failed items and a summary.md report.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file paths or HTTP/HTTPS URLs.
    inputs: Vec<String>,

    /// Treat URL inputs as site roots to crawl.
    #[arg(long, env = "BATCH2MD_CRAWL")]
    crawl: bool,

    /// Video-platform link to transcribe (repeatable).
    #[arg(long = "video", value_name = "URL")]
    videos: Vec<String>,

    /// JSON manifest of items; `upload` entries are paths relative to it.
    #[arg(long, env = "BATCH2MD_MANIFEST")]
    manifest: Option<PathBuf>,

    /// Write the archive to this file.
    #[arg(short, long, env = "BATCH2MD_OUTPUT", default_value = "batch.zip")]
    output: PathBuf,

    /// Number of items converted at once.
    #[arg(short, long, env = "BATCH2MD_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Per-item timeout in seconds.
    #[arg(long, env = "BATCH2MD_ITEM_TIMEOUT", default_value_t = 300)]
    item_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "BATCH2MD_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Deflate level (0–9). Default: library default.
    #[arg(long, env = "BATCH2MD_COMPRESSION",
          value_parser = clap::value_parser!(i64).range(0..=9))]
    compression_level: Option<i64>,

    /// Drop embedded images from results.
    #[arg(long, env = "BATCH2MD_NO_IMAGES")]
    no_images: bool,

    /// Link depth for crawled sites.
    #[arg(long, env = "BATCH2MD_CRAWL_DEPTH", default_value_t = 1)]
    crawl_depth: u8,

    /// Page cap for crawled sites.
    #[arg(long, env = "BATCH2MD_MAX_PAGES", default_value_t = 20)]
    max_pages: u32,

    /// API key for multimedia items; authenticates transcription calls.
    #[arg(long, env = "BATCH2MD_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// LLM provider for transcription: openai, anthropic, gemini, openrouter, ollama.
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID for transcription.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Transcription calls allowed per minute per credential.
    #[arg(long, env = "BATCH2MD_RPM", default_value_t = 15)]
    requests_per_minute: u32,

    /// Print per-item results as JSON on stdout.
    #[arg(long, env = "BATCH2MD_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "BATCH2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "BATCH2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "BATCH2MD_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Build batch, registry and config ─────────────────────────────────
    let input = build_input(&cli).await?;

    let mut registry = ConverterRegistry::with_builtins();
    match transcription_backend(&cli) {
        Ok(backend) => {
            let service = ServiceConfig {
                requests_per_minute: cli.requests_per_minute.max(1),
                model: cli.model.clone(),
                ..ServiceConfig::default()
            };
            let proxy = Arc::new(ServiceProxy::new(backend, service));
            registry.register(ConverterKey::Video, Arc::new(MediaTranscriber::new(proxy)));
        }
        Err(e) => warn!("Transcription disabled: {e:#}"),
    }

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let orchestrator = Orchestrator::new(Arc::new(registry), config);

    // ── Ctrl-C cancels the batch ─────────────────────────────────────────
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} cancelling…", red("✘"));
            on_signal.cancel();
        }
    });

    // ── Run ──────────────────────────────────────────────────────────────
    let output = orchestrator
        .convert_to_file(input, &cli.output, &cancel)
        .await
        .context("Batch conversion failed")?;

    if cli.json {
        let items: Vec<serde_json::Value> = output
            .results
            .iter()
            .enumerate()
            .map(|(index, r)| {
                serde_json::json!({
                    "index": index,
                    "name": r.name(),
                    "kind": r.kind(),
                    "category": r.category(),
                    "success": r.is_success(),
                    "chars": r.content().map(str::len),
                    "images": r.images().len(),
                    "sourceUrl": r.source_url(),
                    "error": r.error(),
                })
            })
            .collect();
        let report = serde_json::json!({
            "archive": cli.output.display().to_string(),
            "stats": output.stats,
            "items": items,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise results")?
        );
    }

    if !cli.quiet && !cli.json {
        let stats = &output.stats;
        eprintln!(
            "{}  {}/{} items  {} images  {}ms  →  {}",
            if stats.failed == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            stats.succeeded,
            stats.total,
            stats.images,
            stats.duration_ms,
            bold(&cli.output.display().to_string()),
        );
        if stats.failed > 0 && !show_progress {
            eprintln!("   {}", dim(&format!("{} items failed, see errors/", stats.failed)));
        }
    }

    Ok(())
}

/// Map CLI args to `BatchConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<BatchConfig> {
    let options = ConversionOptions {
        include_images: !cli.no_images,
        crawl_depth: cli.crawl_depth,
        max_pages: cli.max_pages,
        ..ConversionOptions::default()
    };

    let mut builder = BatchConfig::builder()
        .concurrency(cli.concurrency)
        .item_timeout_secs(cli.item_timeout)
        .download_timeout_secs(cli.download_timeout)
        .default_options(options);

    if let Some(level) = cli.compression_level {
        builder = builder.compression_level(level);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Collect positional inputs, `--video` links and the manifest into a batch.
async fn build_input(cli: &Cli) -> Result<BatchInput> {
    let mut items = Vec::new();
    let mut uploads = HashMap::new();

    if let Some(ref path) = cli.manifest {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read manifest {:?}", path))?;
        let manifest: Manifest = serde_json::from_str(&text)
            .with_context(|| format!("Invalid manifest {:?}", path))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        for mut item in manifest.items {
            if let Some(ref key) = item.upload {
                let file = base.join(key);
                let bytes = tokio::fs::read(&file)
                    .await
                    .with_context(|| format!("Failed to read {:?}", file))?;
                if item.name.is_empty() {
                    item.name = file_name(&file);
                }
                uploads.insert(key.clone(), bytes);
            }
            items.push(item);
        }
    }

    for input in &cli.inputs {
        if input.starts_with("http://") || input.starts_with("https://") {
            let kind = if cli.crawl {
                ItemKind::ParentUrl
            } else {
                ItemKind::Url
            };
            items.push(ItemDescriptor::url(kind, input.clone()));
            continue;
        }

        let path = PathBuf::from(input);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        uploads.insert(input.clone(), bytes);
        items.push(ItemDescriptor::upload(file_name(&path), input.clone()));
    }

    for link in &cli.videos {
        items.push(ItemDescriptor::url(ItemKind::VideoLink, link.clone()));
    }

    if items.is_empty() {
        anyhow::bail!("Nothing to convert: pass files, URLs, --video links or --manifest");
    }

    let mut input = BatchInput {
        items,
        uploads,
        credential: None,
    };
    if let Some(ref key) = cli.api_key {
        input = input.with_credential(Credential::new(key.clone()));
    }
    Ok(input)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Pick the transcription backend.
///
/// With `--api-key` and a hosted provider, every call authenticates with that
/// key. Otherwise the provider is resolved from the environment and uses its
/// own key.
fn transcription_backend(cli: &Cli) -> Result<Arc<dyn CompletionBackend>> {
    let provider = cli.provider.as_deref().unwrap_or("openai");
    if cli.api_key.is_some() && KeyedProviderBackend::supports(provider) {
        let model = cli.model.clone().or_else(|| {
            provider
                .eq_ignore_ascii_case("openai")
                .then(|| DEFAULT_MODEL.to_string())
        });
        let backend = KeyedProviderBackend::new(provider, model)
            .map_err(|e| anyhow::anyhow!("Provider '{provider}' is not usable: {e}"))?;
        return Ok(Arc::new(backend));
    }
    Ok(Arc::new(resolve_provider(cli)?))
}

/// Resolve an environment-configured provider, most-specific first:
/// `--provider/--model`, then `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`,
/// then an OpenAI key, then whatever [`ProviderFactory::from_env`] finds.
fn resolve_provider(cli: &Cli) -> Result<Arc<dyn LLMProvider>> {
    let default_model = DEFAULT_MODEL;

    if let Some(ref name) = cli.provider {
        let model = cli.model.as_deref().unwrap_or(default_model);
        return ProviderFactory::create_llm_provider(name, model)
            .map_err(|e| anyhow::anyhow!("Provider '{name}' is not configured: {e}"));
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return ProviderFactory::create_llm_provider(&prov, &model)
                .map_err(|e| anyhow::anyhow!("Provider '{prov}' is not configured: {e}"));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = cli.model.as_deref().unwrap_or(default_model);
            return ProviderFactory::create_llm_provider("openai", model)
                .map_err(|e| anyhow::anyhow!("OpenAI provider is not configured: {e}"));
        }
    }

    let (llm_provider, _embedding) = ProviderFactory::from_env().map_err(|e| {
        anyhow::anyhow!("No LLM provider could be auto-detected from environment: {e}")
    })?;
    Ok(llm_provider)
}
