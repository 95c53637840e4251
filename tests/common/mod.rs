//! Shared fixtures for integration tests: scripted collaborators and
//! scratch storage.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use region_extract::pipeline::encode::encode_png;
use region_extract::pipeline::predict::BoundingBox;
use region_extract::pipeline::render::PageSink;
use region_extract::{
    Extractor, InferenceBackend, PdfRasterizer, PredictError, Prediction, Predictor, Region,
    RenderError, StorageLayout,
};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Route crate logs to the test harness. `RUST_LOG` overrides the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Poll `cond` for up to two seconds; cleanup after a download runs on the
/// blocking pool.
pub async fn wait_until(cond: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Returns the same boxes for every image, except images whose top-left
/// pixel has red channel `fail_marker`, which get an HTTP 500.
pub struct ScriptedPredictor {
    pub boxes: Vec<BoundingBox>,
    pub fail_marker: Option<u8>,
    pub calls: AtomicUsize,
}

impl ScriptedPredictor {
    pub fn with_boxes(boxes: Vec<BoundingBox>) -> Self {
        Self {
            boxes,
            fail_marker: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(mut self, marker: u8) -> Self {
        self.fail_marker = Some(marker);
        self
    }
}

#[async_trait]
impl Predictor for ScriptedPredictor {
    async fn predict(&self, image: &DynamicImage) -> Result<Prediction, PredictError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let marker = image.get_pixel(0, 0)[0];
        if self.fail_marker == Some(marker) {
            return Err(PredictError::Status {
                status: 500,
                body: "inference backend exploded".into(),
            });
        }
        let regions = self
            .boxes
            .iter()
            .enumerate()
            .map(|(i, b)| Region {
                id: format!("r{i}"),
                label: "figure".into(),
                score: 1.0 - i as f32 * 0.1,
                bbox: *b,
            })
            .collect();
        Ok(Prediction { regions })
    }
}

/// Produces `pages` solid 64x64 pages whose red channel is the page number.
pub struct FakeRasterizer {
    pub pages: usize,
    pub fail_at: Option<usize>,
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
                    detail: "broken page tree".into(),
                });
            }
            sink(n, solid_image(64, 64, n as u8))?;
        }
        Ok(self.pages)
    }
}

pub fn bbox(xmin: i64, ymin: i64, xmax: i64, ymax: i64) -> BoundingBox {
    BoundingBox {
        xmin,
        ymin,
        xmax,
        ymax,
    }
}

pub fn solid_image(w: u32, h: u32, red: u8) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([red, 10, 20, 255])))
}

pub fn png_bytes(w: u32, h: u32) -> Vec<u8> {
    encode_png(&solid_image(w, h, 200)).unwrap()
}

/// Scratch storage roots under one temp dir.
pub struct Scratch {
    pub dir: TempDir,
    pub layout: StorageLayout,
}

impl Scratch {
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(
            dir.path().join("input_images"),
            dir.path().join("output_images"),
            dir.path().join("tmp"),
        );
        layout.ensure_roots().unwrap();
        Self { dir, layout }
    }

    pub fn extractor(&self, predictor: Arc<dyn Predictor>, rasterizer: FakeRasterizer) -> Extractor {
        Extractor::new(
            self.layout.clone(),
            Arc::new(rasterizer),
            InferenceBackend::ready(predictor),
        )
    }

    pub fn unavailable_extractor(&self) -> Extractor {
        Extractor::new(
            self.layout.clone(),
            Arc::new(FakeRasterizer {
                pages: 1,
                fail_at: None,
            }),
            InferenceBackend::Unavailable("LandingAI endpoint id is not configured".into()),
        )
    }

    pub fn upload_entries(&self) -> Vec<PathBuf> {
        entries(self.layout.upload_root())
    }

    pub fn output_entries(&self) -> Vec<PathBuf> {
        entries(self.layout.output_root())
    }

    pub fn temp_entries(&self) -> Vec<PathBuf> {
        entries(self.layout.temp_root())
    }
}

fn entries(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    out.sort();
    out
}

/// Sorted entry names of a zip file on disk.
pub fn zip_names(path: &Path) -> Vec<String> {
    zip_names_from(File::open(path).unwrap())
}

/// Sorted entry names of an in-memory zip.
pub fn zip_names_from<R: Read + std::io::Seek>(reader: R) -> Vec<String> {
    let mut zip = zip::ZipArchive::new(reader).unwrap();
    let mut names: Vec<String> = (0..zip.len())
        .map(|i| zip.by_index(i).unwrap().name().to_string())
        .collect();
    names.sort();
    names
}
