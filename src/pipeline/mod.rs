//! Pipeline stages for one upload session.
//!
//! Each submodule wraps exactly one external collaborator or transformation
//! so it can be tested and swapped on its own.
//!
//! ## Data Flow
//!
//! ```text
//! render ──▶ predict ──▶ crop ──▶ archive
//! (pdfium)   (HTTP)     (image)   (zip)
//! ```
//!
//! 1. [`render`]: expand a PDF into page PNGs on the blocking pool
//! 2. [`encode`]: PNG-encode an image for the inference request
//! 3. [`predict`]: the only stage with network I/O; one call per image
//! 4. [`crop`]: cut detected regions out of the source image
//! 5. [`archive`]: zip the session's output directory

pub mod archive;
pub mod crop;
pub mod encode;
pub mod predict;
pub mod render;
