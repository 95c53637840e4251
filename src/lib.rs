//! # region-extract
//!
//! Upload a PDF or an image, get back a zip of every region an object
//! detector found in it.
//!
//! ```text
//! POST /upload ──▶ validate ──▶ store ──▶ rasterise PDF (150 DPI)
//!                                            │
//!                 ┌──────────────────────────┘
//!                 ▼
//!        per image: predict ──▶ crop ──▶ save PNGs
//!                                            │
//!                                            ▼
//!                                  zip ──▶ GET /download ──▶ delete
//! ```
//!
//! Every request gets its own session token, and all on-disk state for that
//! request lives under paths derived from it ([`storage`]). The archive and
//! the session's output are deleted once the download response is finished.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use region_extract::{Extractor, InferenceBackend, PdfiumRasterizer, ServiceConfig, StorageLayout, UploadedFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder()
//!         .endpoint_id("my-endpoint")
//!         .api_key("land_sk_...")
//!         .build()?;
//!
//!     let layout = StorageLayout::new(&config.upload_folder, &config.output_folder, &config.temp_folder);
//!     layout.ensure_roots()?;
//!
//!     let extractor = Extractor::new(
//!         layout,
//!         Arc::new(PdfiumRasterizer::default()),
//!         InferenceBackend::from_config(&config),
//!     );
//!
//!     let outcome = extractor
//!         .process_upload(UploadedFile {
//!             filename: "scan.pdf".into(),
//!             data: std::fs::read("scan.pdf")?,
//!         })
//!         .await?;
//!     println!("archive: {}", outcome.archive_path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! | Variable | Default | |
//! |---|---|---|
//! | `LANDINGAI_ENDPOINT_ID` | none | detector endpoint; required |
//! | `LANDINGAI_API_KEY` | none | required |
//! | `UPLOAD_FOLDER` | `input_images` | per-session upload dirs |
//! | `OUTPUT_FOLDER` | `output_images` | per-session crop dirs |
//! | `TEMP_FOLDER` | `tmp` | archives awaiting download |
//! | `MAX_UPLOAD_SIZE` | 50 MiB | request body limit |
//! | `RENDER_DPI` | 150 | PDF rasterisation resolution |
//!
//! Without endpoint id and API key the service still starts, but every
//! upload is refused with a "service not available" message.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod server;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ServiceConfig, ServiceConfigBuilder, ALLOWED_EXTENSIONS};
pub use error::{CleanupError, ExtractError, FileError, PredictError, RenderError};
pub use extract::{Extractor, FileOutcome, FileStatus, SessionOutcome, UploadedFile};
pub use pipeline::predict::{InferenceBackend, LandingAiPredictor, Prediction, Predictor, Region};
pub use pipeline::render::{PdfRasterizer, PdfiumRasterizer};
pub use server::{create_router, serve, AppState};
pub use storage::{SessionContext, SessionToken, StorageLayout};
