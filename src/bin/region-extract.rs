//! Server binary for region-extract.
//!
//! A thin shim over the library crate: maps CLI flags and environment
//! variables to `ServiceConfig`, sets up logging, builds the adapters and
//! serves.

use anyhow::{Context, Result};
use clap::Parser;
use region_extract::config::DEFAULT_PREDICT_URL;
use region_extract::{
    AppState, Extractor, InferenceBackend, PdfiumRasterizer, ServiceConfig, StorageLayout,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

const AFTER_HELP: &str = r#"EXAMPLES:
  # Minimal: credentials from the environment
  LANDINGAI_ENDPOINT_ID=... LANDINGAI_API_KEY=... region-extract

  # Custom port and storage roots
  region-extract --port 8080 --upload-folder /var/lib/rx/in --output-folder /var/lib/rx/out

  # Upload from the command line
  curl -L -F "file=@scan.pdf" http://localhost:5000/upload -o extracted_images.zip

SETUP:
  Settings may also be placed in a .env file in the working directory.
  PDF uploads need libpdfium: either installed system-wide or pointed to
  with PDFIUM_LIB_PATH=/path/to/libpdfium.so
"#;

/// Extract detected regions from uploaded PDFs and images.
#[derive(Parser, Debug)]
#[command(
    name = "region-extract",
    version,
    about = "Extract detected regions from uploaded PDFs and images",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    port: u16,

    /// Key used to sign flash-message cookies. Random if unset.
    #[arg(long, env = "SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// Root for per-session upload directories.
    #[arg(long, env = "UPLOAD_FOLDER", default_value = "input_images")]
    upload_folder: PathBuf,

    /// Root for per-session output directories.
    #[arg(long, env = "OUTPUT_FOLDER", default_value = "output_images")]
    output_folder: PathBuf,

    /// Directory holding archives until they are downloaded.
    #[arg(long, env = "TEMP_FOLDER", default_value = "tmp")]
    temp_folder: PathBuf,

    /// Maximum request body size in bytes.
    #[arg(long, env = "MAX_UPLOAD_SIZE", default_value_t = 50 * 1024 * 1024)]
    max_upload_size: usize,

    /// Detector endpoint id.
    #[arg(long, env = "LANDINGAI_ENDPOINT_ID")]
    endpoint_id: Option<String>,

    /// Detector API key.
    #[arg(long, env = "LANDINGAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Detector predict URL.
    #[arg(long, env = "LANDINGAI_PREDICT_URL", default_value = DEFAULT_PREDICT_URL)]
    predict_url: String,

    /// Timeout for one predict call, in seconds.
    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = 300)]
    request_timeout: u64,

    /// PDF rendering DPI (72–400).
    #[arg(long, env = "RENDER_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Path to libpdfium. Uses the system library if unset.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Also write logs to this file. Pass an empty value to disable.
    #[arg(long, env = "LOG_FILE", default_value = "app.log")]
    log_file: PathBuf,

    /// Verbose logging (debug level).
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let _log_guard = init_logging(&cli)?;

    let config = build_config(&cli)?;
    info!("Configuration: {:?}", config);

    let layout = StorageLayout::new(
        &config.upload_folder,
        &config.output_folder,
        &config.temp_folder,
    );
    layout
        .ensure_roots()
        .context("Failed to create storage directories")?;

    let backend = InferenceBackend::from_config(&config);
    if !backend.is_ready() {
        warn!("Uploads will be rejected until the inference service is configured");
    }

    let rasterizer = Arc::new(PdfiumRasterizer::new(config.pdfium_lib_path.clone()));
    let extractor = Extractor::new(layout, rasterizer, backend).with_dpi(config.render_dpi);

    let secret = match &config.secret_key {
        Some(key) => key.clone(),
        None => {
            warn!("No SECRET_KEY set, using a random key. Flash messages will not survive a restart.");
            random_secret()
        }
    };

    let state = AppState::new(extractor, &secret, config.max_upload_size);
    region_extract::serve(state, &config.bind_address())
        .await
        .with_context(|| format!("Server on {} failed", config.bind_address()))?;
    Ok(())
}

/// stderr always; a plain-text log file unless `--log-file ""`.
fn init_logging(cli: &Cli) -> Result<Option<WorkerGuard>> {
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = if cli.log_file.as_os_str().is_empty() {
        (None, None)
    } else {
        let dir = match cli.log_file.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let name = cli
            .log_file
            .file_name()
            .map(Path::new)
            .context("Log file path has no file name")?;
        let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
        let layer = fmt::layer().with_writer(writer).with_ansi(false).boxed();
        (Some(layer), Some(guard))
    };

    Registry::default()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

/// Map CLI flags onto the library's config builder.
fn build_config(cli: &Cli) -> Result<ServiceConfig> {
    let mut builder = ServiceConfig::builder()
        .host(cli.host.clone())
        .port(cli.port)
        .upload_folder(&cli.upload_folder)
        .output_folder(&cli.output_folder)
        .temp_folder(&cli.temp_folder)
        .max_upload_size(cli.max_upload_size)
        .predict_url(cli.predict_url.clone())
        .request_timeout_secs(cli.request_timeout)
        .render_dpi(cli.dpi);

    if let Some(key) = non_empty(&cli.secret_key) {
        builder = builder.secret_key(key);
    }
    if let Some(id) = non_empty(&cli.endpoint_id) {
        builder = builder.endpoint_id(id);
    }
    if let Some(key) = non_empty(&cli.api_key) {
        builder = builder.api_key(key);
    }
    if let Some(path) = &cli.pdfium_lib_path {
        builder = builder.pdfium_lib_path(path);
    }

    builder.build().context("Invalid configuration")
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn random_secret() -> String {
    let a = uuid::Uuid::new_v4();
    let b = uuid::Uuid::new_v4();
    hex::encode([a.as_bytes().as_slice(), b.as_bytes().as_slice()].concat())
}
