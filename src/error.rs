//! Error types for the region-extract service.
//!
//! Failures are split by how far they reach:
//!
//! * [`ExtractError`]: **Fatal** for the request: the upload is rejected
//!   (validation), the inference service was never initialised, session
//!   storage could not be written, or the archive could not be built. The
//!   HTTP layer turns these into a JSON 400 or a flash-and-redirect.
//!
//! * [`FileError`]: **Per file**: one image (or one PDF page) could not be
//!   rendered, decoded, predicted or saved. The orchestrator records it next
//!   to the file's outcome and writes a fallback artifact; the rest of the
//!   batch carries on.
//!
//! * [`CleanupError`]: a directory or archive could not be deleted after the
//!   fact. Only ever logged.

use std::path::PathBuf;
use thiserror::Error;

/// Request-level errors. Anything here aborts the whole upload.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Validation (HTTP 400) ─────────────────────────────────────────────
    /// The multipart body has no `file` field.
    #[error("No file part")]
    NoFilePart,

    /// A `file` field was sent without a filename.
    #[error("No selected file")]
    NoSelectedFile,

    /// The filename's extension is not in [`crate::config::ALLOWED_EXTENSIONS`].
    #[error("File type not allowed")]
    DisallowedExtension { filename: String },

    /// Nothing usable was left after sanitising the filename.
    #[error("Invalid filename")]
    InvalidFilename { filename: String },

    // ── Config ────────────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Processing ────────────────────────────────────────────────────────
    /// The inference client failed to initialise at startup.
    #[error("Image processing service is not available: {reason}")]
    ServiceUnavailable { reason: String },

    /// Session directories or the uploaded file could not be written.
    #[error("Storage error at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The ZIP archive could not be created.
    #[error("Failed to create archive '{path}': {detail}")]
    Archive { path: PathBuf, detail: String },
}

impl ExtractError {
    /// `true` for errors caused by the client's request rather than the server.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ExtractError::NoFilePart
                | ExtractError::NoSelectedFile
                | ExtractError::DisallowedExtension { .. }
                | ExtractError::InvalidFilename { .. }
        )
    }
}

/// A recoverable failure for a single image or page.
#[derive(Debug, Clone, Error, serde::Serialize)]
pub enum FileError {
    /// PDF page enumeration or rasterisation failed.
    #[error("{file}: rasterisation failed: {detail}")]
    Render { file: String, detail: String },

    /// The image could not be opened or decoded.
    #[error("{file}: could not open image: {detail}")]
    Decode { file: String, detail: String },

    /// The inference call failed.
    #[error("{file}: prediction failed: {detail}")]
    Predict { file: String, detail: String },

    /// A crop or fallback image could not be written.
    #[error("{file}: could not save output: {detail}")]
    Save { file: String, detail: String },
}

/// Errors from the PDF rasteriser.
#[derive(Debug, Error)]
pub enum RenderError {
    /// libpdfium could not be loaded.
    #[error("failed to bind pdfium: {0}")]
    Bind(String),

    /// The document could not be opened (corrupt, encrypted, not a PDF).
    #[error("failed to open PDF: {0}")]
    Open(String),

    /// A single page failed to render.
    #[error("page {page}: {detail}")]
    Page { page: usize, detail: String },

    /// A rendered page could not be written as PNG.
    #[error("failed to save page {page}: {source}")]
    Save {
        page: usize,
        #[source]
        source: image::ImageError,
    },
}

/// Errors from the inference adapter.
#[derive(Debug, Error)]
pub enum PredictError {
    /// The adapter was never initialised.
    #[error("inference service unavailable: {0}")]
    Unavailable(String),

    /// The image could not be encoded for upload.
    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),

    /// Transport-level failure (connect, timeout, body read).
    #[error("inference request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("inference service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("unexpected inference response: {0}")]
    Response(String),
}

/// Why the inference client could not be built at startup.
#[derive(Debug, Clone, Error)]
pub enum PredictorInitError {
    #[error("missing inference endpoint id (set LANDINGAI_ENDPOINT_ID)")]
    MissingEndpoint,

    #[error("missing inference API key (set LANDINGAI_API_KEY)")]
    MissingApiKey,

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// A post-delivery or post-processing deletion failed.
#[derive(Debug, Error)]
#[error("failed to remove '{path}': {source}")]
pub struct CleanupError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}
