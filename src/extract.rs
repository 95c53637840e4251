//! Session pipeline orchestrator.
//!
//! One call to [`Extractor::process_upload`] takes an uploaded file from
//! validation to a finished archive:
//!
//! ```text
//! validate ─▶ store ─▶ [rasterise PDF] ─▶ per image: open ─▶ predict ─▶ crop ─▶ save
//!                                                                                  │
//!                                        archive ◀─────────────────────────────────┘
//!                                           │
//!                                 delete upload dir ─▶ SessionOutcome
//! ```
//!
//! Per-image failures never escape: each image ends as crops, an
//! `_original.png` copy, an `_error.png` copy, or (only if it cannot be
//! opened at all) nothing. Only validation, an unavailable inference
//! service, storage failures and archive failures abort the request.

use crate::config::{extension_of, is_allowed_file};
use crate::error::{ExtractError, FileError};
use crate::pipeline::predict::InferenceBackend;
use crate::pipeline::render::{rasterize_pdf, PdfRasterizer};
use crate::pipeline::{archive, crop};
use crate::storage::{self, SessionContext, SessionToken, StorageLayout};
use image::{DynamicImage, ImageFormat, ImageReader};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// A named byte stream received from the client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub data: Vec<u8>,
}

/// How one input image ended up in the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    /// `count` crops written as `{name}_crop_{i}.png`.
    Cropped { count: usize },
    /// No regions detected; written as `{name}_original.png`.
    Original,
    /// Prediction or saving failed; written as `{name}_error.png`.
    ErrorFallback,
    /// Nothing could be written for this image.
    Skipped,
}

/// Result for one input image.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    /// File name of the source image inside the upload directory.
    pub source: String,
    pub status: FileStatus,
    /// Files written to the output directory, in write order.
    pub outputs: Vec<PathBuf>,
    pub error: Option<FileError>,
}

/// Result of one successful upload.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub token: SessionToken,
    pub archive_path: PathBuf,
    /// Archive file name, as used in the download URL.
    pub archive_name: String,
    pub files: Vec<FileOutcome>,
    /// Set when PDF rasterisation stopped early.
    pub render_error: Option<FileError>,
    pub duration_ms: u64,
}

impl SessionOutcome {
    /// Number of files written to the output directory.
    pub fn output_count(&self) -> usize {
        self.files.iter().map(|f| f.outputs.len()).sum()
    }

    /// Number of input images that ended in a fallback or were skipped.
    pub fn failed_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::ErrorFallback | FileStatus::Skipped))
            .count()
    }
}

/// Drives uploads through the pipeline.
///
/// Holds the storage layout and the two external collaborators. Cheap to
/// share behind an `Arc`; it has no per-request state.
pub struct Extractor {
    layout: StorageLayout,
    rasterizer: Arc<dyn PdfRasterizer>,
    backend: InferenceBackend,
    dpi: u32,
}

impl Extractor {
    pub fn new(
        layout: StorageLayout,
        rasterizer: Arc<dyn PdfRasterizer>,
        backend: InferenceBackend,
    ) -> Self {
        Self {
            layout,
            rasterizer,
            backend,
            dpi: 150,
        }
    }

    /// Override the PDF rendering resolution (default 150 DPI).
    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn backend(&self) -> &InferenceBackend {
        &self.backend
    }

    /// Run one upload end to end.
    ///
    /// # Errors
    /// Validation errors, [`ExtractError::ServiceUnavailable`],
    /// [`ExtractError::Storage`] and [`ExtractError::Archive`]. Validation
    /// and availability are checked before any session state is created.
    pub async fn process_upload(
        &self,
        upload: UploadedFile,
    ) -> Result<SessionOutcome, ExtractError> {
        let start = Instant::now();

        // ── Step 1: Validate ─────────────────────────────────────────────────
        let filename = validate_filename(&upload.filename)?;
        if let Some(reason) = self.backend.unavailable_reason() {
            return Err(ExtractError::ServiceUnavailable {
                reason: reason.to_string(),
            });
        }

        // ── Step 2: Open session ─────────────────────────────────────────────
        let session = self.layout.open_session()?;
        info!(session = %session.token, "Processing upload '{}'", filename);

        // ── Step 3: Store upload ─────────────────────────────────────────────
        let stored = session.upload_dir.join(&filename);
        if let Err(source) = tokio::fs::write(&stored, &upload.data).await {
            discard_session(&session);
            return Err(ExtractError::Storage {
                path: stored,
                source,
            });
        }
        info!("Saved uploaded file: {}", stored.display());

        // ── Step 4: Expand PDF into pages ────────────────────────────────────
        let (images, render_error) = if extension_of(&filename).as_deref() == Some("pdf") {
            let raster = rasterize_pdf(
                Arc::clone(&self.rasterizer),
                stored,
                session.upload_dir.clone(),
                self.dpi,
            )
            .await;
            (raster.pages, raster.error)
        } else {
            (vec![stored], None)
        };

        // ── Step 5: Predict, crop, save ──────────────────────────────────────
        let mut files = Vec::with_capacity(images.len());
        for image_path in &images {
            files.push(self.process_image(image_path, &session.output_dir).await);
        }

        // ── Step 6: Archive ──────────────────────────────────────────────────
        let archive_path = match archive::create_archive(
            session.output_dir.clone(),
            session.archive_path.clone(),
        )
        .await
        {
            Ok(path) => path,
            Err(e) => {
                error!(session = %session.token, "Error creating archive: {}", e);
                discard_session(&session);
                return Err(e);
            }
        };
        info!("Created zip file: {}", archive_path.display());

        // ── Step 7: Drop the upload directory ────────────────────────────────
        match storage::remove_dir(&session.upload_dir) {
            Ok(()) => info!("Cleaned up input folder: {}", session.upload_dir.display()),
            Err(e) => warn!("Could not clean up input folder: {}", e),
        }

        let outcome = SessionOutcome {
            token: session.token,
            archive_name: session.archive_file_name(),
            archive_path,
            files,
            render_error,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            session = %outcome.token,
            "Processing completed: {} images, {} outputs, {} failed, {}ms",
            outcome.files.len(),
            outcome.output_count(),
            outcome.failed_count(),
            outcome.duration_ms
        );
        Ok(outcome)
    }

    /// Take one image through predict → crop → save, with fallbacks.
    async fn process_image(&self, path: &Path, output_dir: &Path) -> FileOutcome {
        let source = file_name(path);
        let stem = file_stem(path);
        info!("Processing: {}", path.display());

        let error_fallback = |error: FileError| {
            warn!("Error processing image {}: {}", source, error);
            let dest = output_dir.join(format!("{stem}_error.png"));
            let path = path.to_path_buf();
            let source = source.clone();
            async move {
                match tokio::task::spawn_blocking({
                    let dest = dest.clone();
                    move || save_copy(&path, &dest)
                })
                .await
                {
                    Ok(Ok(())) => {
                        info!("Saved original due to error: {}", dest.display());
                        FileOutcome {
                            source,
                            status: FileStatus::ErrorFallback,
                            outputs: vec![dest],
                            error: Some(error),
                        }
                    }
                    _ => {
                        error!("Could not save original image for {}", source);
                        FileOutcome {
                            source,
                            status: FileStatus::Skipped,
                            outputs: Vec::new(),
                            error: Some(error),
                        }
                    }
                }
            }
        };

        let image = match load_image(path).await {
            Ok(img) => img,
            Err(e) => return error_fallback(e).await,
        };

        let prediction = match self.backend.predict(&image).await {
            Ok(p) => p,
            Err(e) => {
                return error_fallback(FileError::Predict {
                    file: source.clone(),
                    detail: e.to_string(),
                })
                .await
            }
        };
        debug!("{}: {} regions predicted", source, prediction.regions.len());

        let saved = tokio::task::spawn_blocking({
            let output_dir = output_dir.to_path_buf();
            let stem = stem.clone();
            let source = source.clone();
            move || {
                let crops = crop::crop_regions(&prediction, &image);
                save_outputs(&source, &stem, &image, &crops, &output_dir)
            }
        })
        .await
        .unwrap_or_else(|e| {
            Err(FileError::Save {
                file: source.clone(),
                detail: format!("save task panicked: {e}"),
            })
        });

        match saved {
            Ok((status, outputs)) => FileOutcome {
                source,
                status,
                outputs,
                error: None,
            },
            Err(e) => error_fallback(e).await,
        }
    }
}

/// Write crops, or the original when there are none.
fn save_outputs(
    source: &str,
    stem: &str,
    image: &DynamicImage,
    crops: &[DynamicImage],
    output_dir: &Path,
) -> Result<(FileStatus, Vec<PathBuf>), FileError> {
    let save_err = |e: image::ImageError| FileError::Save {
        file: source.to_string(),
        detail: e.to_string(),
    };

    if crops.is_empty() {
        warn!("No objects detected in {}, saving original", source);
        let dest = output_dir.join(format!("{stem}_original.png"));
        image
            .save_with_format(&dest, ImageFormat::Png)
            .map_err(save_err)?;
        info!("Saved original: {}", dest.display());
        return Ok((FileStatus::Original, vec![dest]));
    }

    let mut outputs = Vec::with_capacity(crops.len());
    for (i, crop) in crops.iter().enumerate() {
        let dest = output_dir.join(format!("{stem}_crop_{}.png", i + 1));
        if let Err(e) = crop.save_with_format(&dest, ImageFormat::Png) {
            // The error fallback replaces the whole set; drop what was written.
            if dest.is_file() {
                outputs.push(dest);
            }
            for written in &outputs {
                if let Err(e) = storage::remove_file(written) {
                    warn!("Could not remove partial crop: {}", e);
                }
            }
            return Err(save_err(e));
        }
        info!("Saved: {}", dest.display());
        outputs.push(dest);
    }
    Ok((
        FileStatus::Cropped {
            count: outputs.len(),
        },
        outputs,
    ))
}

/// Re-open `source` from disk and write it to `dest` as PNG.
fn save_copy(source: &Path, dest: &Path) -> Result<(), image::ImageError> {
    let img = decode(source)?;
    img.save_with_format(dest, ImageFormat::Png)
}

async fn load_image(path: &Path) -> Result<DynamicImage, FileError> {
    let owned = path.to_path_buf();
    let file = file_name(path);
    match tokio::task::spawn_blocking(move || decode(&owned)).await {
        Ok(Ok(img)) => Ok(img),
        Ok(Err(e)) => Err(FileError::Decode {
            file,
            detail: e.to_string(),
        }),
        Err(e) => Err(FileError::Decode {
            file,
            detail: format!("decode task panicked: {e}"),
        }),
    }
}

/// Decode by content rather than trusting the extension.
fn decode(path: &Path) -> Result<DynamicImage, image::ImageError> {
    ImageReader::open(path)?.with_guessed_format()?.decode()
}

/// Remove everything a failed session left behind.
fn discard_session(session: &SessionContext) {
    for dir in [&session.upload_dir, &session.output_dir] {
        if let Err(e) = storage::remove_dir(dir) {
            warn!("Could not clean up {}: {}", dir.display(), e);
        }
    }
    if let Err(e) = storage::remove_file(&session.archive_path) {
        warn!("Could not remove partial archive: {}", e);
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ── Filename validation ───────────────────────────────────────────────────

static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.-]").expect("valid regex"));

/// Reduce a client-supplied filename to something safe to join onto a path.
///
/// Non-ASCII characters are dropped, path separators become word breaks,
/// whitespace runs become `_`, anything outside `[A-Za-z0-9_.-]` is removed,
/// and leading/trailing `.`/`_` are stripped. May return an empty string.
pub fn sanitize_filename(name: &str) -> String {
    let ascii: String = name
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    UNSAFE_FILENAME_CHARS
        .replace_all(&joined, "")
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

/// Validate and sanitise an upload's declared filename.
pub fn validate_filename(raw: &str) -> Result<String, ExtractError> {
    if raw.is_empty() {
        return Err(ExtractError::NoSelectedFile);
    }
    if !is_allowed_file(raw) {
        return Err(ExtractError::DisallowedExtension {
            filename: raw.to_string(),
        });
    }
    let safe = sanitize_filename(raw);
    if safe.is_empty() || !is_allowed_file(&safe) {
        return Err(ExtractError::InvalidFilename {
            filename: raw.to_string(),
        });
    }
    Ok(safe)
}
