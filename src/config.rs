//! Service configuration.
//!
//! Everything the service reads from its environment ends up in one
//! [`ServiceConfig`], built through [`ServiceConfigBuilder`]. The binary maps
//! CLI flags / environment variables onto the builder; tests set only the
//! fields they care about and rely on the defaults for the rest.

use crate::error::ExtractError;
use std::fmt;
use std::path::{Path, PathBuf};

/// Extensions accepted by `POST /upload`, compared case-insensitively.
pub const ALLOWED_EXTENSIONS: [&str; 6] = ["pdf", "jpg", "jpeg", "png", "gif", "bmp"];

/// Default LandingAI cloud inference URL.
pub const DEFAULT_PREDICT_URL: &str = "https://predict.app.landing.ai/inference/v1/predict";

/// Configuration for the upload-and-extract service.
///
/// # Example
/// ```rust
/// use region_extract::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .upload_folder("/var/lib/extract/in")
///     .output_folder("/var/lib/extract/out")
///     .port(8000)
///     .build()
///     .unwrap();
/// assert_eq!(config.render_dpi, 150);
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Key used to sign flash-message cookies. `None` means "generate one".
    pub secret_key: Option<String>,

    /// Root for per-session upload directories. Default: `input_images`.
    pub upload_folder: PathBuf,

    /// Root for per-session output directories. Default: `output_images`.
    pub output_folder: PathBuf,

    /// Where finished archives wait for download. Default: `tmp`.
    pub temp_folder: PathBuf,

    /// Maximum accepted request body in bytes. Default: 50 MiB.
    pub max_upload_size: usize,

    /// PDF rasterisation resolution. Range: 72–400. Default: 150.
    pub render_dpi: u32,

    /// Inference endpoint identifier.
    pub endpoint_id: Option<String>,

    /// Inference API key.
    pub api_key: Option<String>,

    /// Inference predict URL. Default: [`DEFAULT_PREDICT_URL`].
    pub predict_url: String,

    /// Explicit libpdfium location; falls back to the system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Listen address. Default: `0.0.0.0`.
    pub host: String,

    /// Listen port. Default: 5000.
    pub port: u16,

    /// Timeout for one inference call, in seconds. Default: 300.
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            upload_folder: PathBuf::from("input_images"),
            output_folder: PathBuf::from("output_images"),
            temp_folder: PathBuf::from("tmp"),
            max_upload_size: 50 * 1024 * 1024,
            render_dpi: 150,
            endpoint_id: None,
            api_key: None,
            predict_url: DEFAULT_PREDICT_URL.to_string(),
            pdfium_lib_path: None,
            host: "0.0.0.0".to_string(),
            port: 5000,
            request_timeout_secs: 300,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("upload_folder", &self.upload_folder)
            .field("output_folder", &self.output_folder)
            .field("temp_folder", &self.temp_folder)
            .field("max_upload_size", &self.max_upload_size)
            .field("render_dpi", &self.render_dpi)
            .field("endpoint_id", &self.endpoint_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("predict_url", &self.predict_url)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// `host:port` string for the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn secret_key(mut self, key: impl Into<String>) -> Self {
        self.config.secret_key = Some(key.into());
        self
    }

    pub fn upload_folder(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_folder = dir.into();
        self
    }

    pub fn output_folder(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_folder = dir.into();
        self
    }

    pub fn temp_folder(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_folder = dir.into();
        self
    }

    pub fn max_upload_size(mut self, bytes: usize) -> Self {
        self.config.max_upload_size = bytes;
        self
    }

    pub fn render_dpi(mut self, dpi: u32) -> Self {
        self.config.render_dpi = dpi;
        self
    }

    pub fn endpoint_id(mut self, id: impl Into<String>) -> Self {
        self.config.endpoint_id = Some(id.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn predict_url(mut self, url: impl Into<String>) -> Self {
        self.config.predict_url = url.into();
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ExtractError> {
        let c = &self.config;
        if c.render_dpi < 72 || c.render_dpi > 400 {
            return Err(ExtractError::InvalidConfig(format!(
                "render DPI must be 72–400, got {}",
                c.render_dpi
            )));
        }
        if c.max_upload_size == 0 {
            return Err(ExtractError::InvalidConfig(
                "max upload size must be > 0".into(),
            ));
        }
        if c.request_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "request timeout must be > 0".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Lower-cased extension of `filename`, if it has one.
pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
}

/// `true` when the filename's extension is in [`ALLOWED_EXTENSIONS`].
pub fn is_allowed_file(filename: &str) -> bool {
    extension_of(filename).is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}
