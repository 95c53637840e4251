//! PDF rasterisation: expand an uploaded PDF into one PNG per page.
//!
//! The PDF decoder sits behind [`PdfRasterizer`] so the orchestrator never
//! talks to pdfium directly. [`PdfiumRasterizer`] is the production
//! implementation; tests substitute their own.
//!
//! pdfium is not async-safe, so [`rasterize_pdf`] moves the whole job onto
//! `spawn_blocking`. Pages are written as `{stem}_page_{n}.png` (1-indexed)
//! next to the PDF, and the PDF is deleted once every page is on disk.
//! A failure part-way leaves the pages rendered so far in place and is
//! reported back as a non-fatal [`FileError::Render`].

use crate::error::{FileError, RenderError};
use image::{DynamicImage, ImageFormat};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Callback receiving each rendered page (1-indexed) in page order.
pub type PageSink<'a> = dyn FnMut(usize, DynamicImage) -> Result<(), RenderError> + 'a;

/// Collaborator contract: "accepts a file path, yields decoded page images".
pub trait PdfRasterizer: Send + Sync {
    /// Render every page of `pdf` at `dpi`, handing each one to `sink` in
    /// order. Returns the document's page count.
    ///
    /// An error from `sink` stops rendering and is returned unchanged.
    fn render_pages(
        &self,
        pdf: &Path,
        dpi: u32,
        sink: &mut PageSink<'_>,
    ) -> Result<usize, RenderError>;
}

/// pdfium-backed rasteriser.
///
/// Binds to `library_path` when given, otherwise to the system libpdfium.
/// Binding happens per document on the blocking thread doing the work.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(library_path: Option<PathBuf>) -> Self {
        Self { library_path }
    }

    fn bind(&self) -> Result<Pdfium, RenderError> {
        let bindings = match &self.library_path {
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| RenderError::Bind(format!("{e:?}")))?;
        Ok(Pdfium::new(bindings))
    }
}

impl PdfRasterizer for PdfiumRasterizer {
    fn render_pages(
        &self,
        pdf: &Path,
        dpi: u32,
        sink: &mut PageSink<'_>,
    ) -> Result<usize, RenderError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(pdf, None)
            .map_err(|e| RenderError::Open(format!("{e:?}")))?;

        let pages = document.pages();
        let total = pages.len() as usize;
        info!("{} has {} pages", pdf.display(), total);

        // PDF user space is 72 units per inch.
        let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);

        for (idx, page) in pages.iter().enumerate() {
            let page_num = idx + 1;
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| RenderError::Page {
                    page: page_num,
                    detail: format!("{e:?}"),
                })?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                page_num,
                image.width(),
                image.height()
            );
            sink(page_num, image)?;
        }

        Ok(total)
    }
}

/// What rasterising one PDF produced.
#[derive(Debug, Default)]
pub struct RasterOutcome {
    /// Page images written, in page order.
    pub pages: Vec<PathBuf>,
    /// Set when rendering stopped early; `pages` holds what was written before.
    pub error: Option<FileError>,
}

/// Rasterise `pdf` into `dest_dir` on the blocking pool.
pub async fn rasterize_pdf(
    rasterizer: Arc<dyn PdfRasterizer>,
    pdf: PathBuf,
    dest_dir: PathBuf,
    dpi: u32,
) -> RasterOutcome {
    let file = display_name(&pdf);
    tokio::task::spawn_blocking(move || {
        rasterize_pdf_blocking(rasterizer.as_ref(), &pdf, &dest_dir, dpi)
    })
    .await
    .unwrap_or_else(|e| RasterOutcome {
        pages: Vec::new(),
        error: Some(FileError::Render {
            file,
            detail: format!("render task panicked: {e}"),
        }),
    })
}

/// Blocking implementation of [`rasterize_pdf`].
pub fn rasterize_pdf_blocking(
    rasterizer: &dyn PdfRasterizer,
    pdf: &Path,
    dest_dir: &Path,
    dpi: u32,
) -> RasterOutcome {
    info!("Converting PDF to images: {}", pdf.display());
    let stem = pdf
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    let mut pages = Vec::new();
    let result = rasterizer.render_pages(pdf, dpi, &mut |page_num, image| {
        let path = dest_dir.join(page_file_name(&stem, page_num));
        image
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|source| RenderError::Save {
                page: page_num,
                source,
            })?;
        info!("Saved page {} as image: {}", page_num, path.display());
        pages.push(path);
        Ok(())
    });

    match result {
        Ok(total) => {
            debug!("{} of {} pages written", pages.len(), total);
            if let Err(e) = crate::storage::remove_file(pdf) {
                warn!("Could not remove rasterised PDF: {}", e);
            }
            RasterOutcome { pages, error: None }
        }
        Err(e) => {
            warn!(
                "Error converting PDF to images ({} pages kept): {}",
                pages.len(),
                e
            );
            RasterOutcome {
                pages,
                error: Some(FileError::Render {
                    file: display_name(pdf),
                    detail: e.to_string(),
                }),
            }
        }
    }
}

/// `{stem}_page_{n}.png`
pub fn page_file_name(stem: &str, page_num: usize) -> String {
    format!("{stem}_page_{page_num}.png")
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::tempdir;

    /// Produces `pages` solid images, failing at `fail_at` if set.
    struct FakeRasterizer {
        pages: usize,
        fail_at: Option<usize>,
    }

    impl PdfRasterizer for FakeRasterizer {
        fn render_pages(
            &self,
            _pdf: &Path,
            _dpi: u32,
            sink: &mut PageSink<'_>,
        ) -> Result<usize, RenderError> {
            for n in 1..=self.pages {
                if self.fail_at == Some(n) {
                    return Err(RenderError::Page {
                        page: n,
                        detail: "corrupt content stream".into(),
                    });
                }
                let img = RgbaImage::from_pixel(8, 8, Rgba([n as u8, 0, 0, 255]));
                sink(n, DynamicImage::ImageRgba8(img))?;
            }
            Ok(self.pages)
        }
    }

    #[test]
    fn page_names_are_one_indexed() {
        assert_eq!(page_file_name("scan", 1), "scan_page_1.png");
        assert_eq!(page_file_name("scan", 12), "scan_page_12.png");
    }

    #[test]
    fn all_pages_written_and_pdf_removed() {
        let dir = tempdir().unwrap();
        let pdf = dir.path().join("scan.pdf");
        std::fs::write(&pdf, b"%PDF-1.4").unwrap();

        let out = rasterize_pdf_blocking(
            &FakeRasterizer {
                pages: 3,
                fail_at: None,
            },
            &pdf,
            dir.path(),
            150,
        );

        assert!(out.error.is_none());
        let names: Vec<_> = out
            .pages
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["scan_page_1.png", "scan_page_2.png", "scan_page_3.png"]
        );
        assert!(out.pages.iter().all(|p| p.exists()));
        assert!(!pdf.exists(), "PDF must be deleted after rasterising");
    }

    #[test]
    fn failure_keeps_earlier_pages() {
        let dir = tempdir().unwrap();
        let pdf = dir.path().join("report.pdf");
        std::fs::write(&pdf, b"%PDF-1.4").unwrap();

        let out = rasterize_pdf_blocking(
            &FakeRasterizer {
                pages: 4,
                fail_at: Some(3),
            },
            &pdf,
            dir.path(),
            150,
        );

        assert_eq!(out.pages.len(), 2);
        assert!(matches!(out.error, Some(FileError::Render { .. })));
    }

    #[test]
    fn failure_before_first_page_yields_nothing() {
        let dir = tempdir().unwrap();
        let pdf = dir.path().join("empty.pdf");
        std::fs::write(&pdf, b"not a pdf").unwrap();

        let out = rasterize_pdf_blocking(
            &FakeRasterizer {
                pages: 2,
                fail_at: Some(1),
            },
            &pdf,
            dir.path(),
            150,
        );
        assert!(out.pages.is_empty());
        assert!(out.error.is_some());
    }

    #[tokio::test]
    async fn async_wrapper_runs_on_blocking_pool() {
        let dir = tempdir().unwrap();
        let pdf = dir.path().join("deck.pdf");
        std::fs::write(&pdf, b"%PDF-1.4").unwrap();

        let out = rasterize_pdf(
            Arc::new(FakeRasterizer {
                pages: 2,
                fail_at: None,
            }),
            pdf.clone(),
            dir.path().to_path_buf(),
            150,
        )
        .await;
        assert_eq!(out.pages.len(), 2);
        assert!(!pdf.exists());
    }
}
