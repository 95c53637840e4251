//! Archive builder: zip a session's output directory for download.

use crate::error::ExtractError;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Zip every file under `source_dir` into `archive_path` on the blocking pool.
pub async fn create_archive(
    source_dir: PathBuf,
    archive_path: PathBuf,
) -> Result<PathBuf, ExtractError> {
    let path = archive_path.clone();
    tokio::task::spawn_blocking(move || create_archive_blocking(&source_dir, &archive_path))
        .await
        .map_err(|e| ExtractError::Archive {
            path,
            detail: format!("archive task panicked: {e}"),
        })?
}

/// Blocking implementation of [`create_archive`].
///
/// Entries are stored under their path relative to `source_dir`, using `/`
/// separators, in sorted order. Directories are walked recursively; only
/// files become entries.
pub fn create_archive_blocking(
    source_dir: &Path,
    archive_path: &Path,
) -> Result<PathBuf, ExtractError> {
    let archive_err = |detail: String| ExtractError::Archive {
        path: archive_path.to_path_buf(),
        detail,
    };

    let mut files = Vec::new();
    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| archive_err(e.to_string()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    info!(
        "Creating zip from {} with {} files",
        source_dir.display(),
        files.len()
    );

    let out = File::create(archive_path).map_err(|e| archive_err(e.to_string()))?;
    let mut zip = ZipWriter::new(out);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for file in &files {
        let name = entry_name(source_dir, file).ok_or_else(|| {
            archive_err(format!("{} is outside {}", file.display(), source_dir.display()))
        })?;
        debug!("Adding to zip: {} as {}", file.display(), name);

        zip.start_file(name, options)
            .map_err(|e| archive_err(e.to_string()))?;
        let mut input = File::open(file).map_err(|e| archive_err(e.to_string()))?;
        io::copy(&mut input, &mut zip).map_err(|e| archive_err(e.to_string()))?;
    }

    zip.finish().map_err(|e| archive_err(e.to_string()))?;
    Ok(archive_path.to_path_buf())
}

/// Archive-relative name of `file`, always `/`-separated.
fn entry_name(root: &Path, file: &Path) -> Option<String> {
    let rel = file.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;
    use zip::ZipArchive;

    fn entries(archive: &Path) -> Vec<(String, Vec<u8>)> {
        let mut zip = ZipArchive::new(File::open(archive).unwrap()).unwrap();
        let mut out = Vec::new();
        for i in 0..zip.len() {
            let mut f = zip.by_index(i).unwrap();
            let mut buf = Vec::new();
            f.read_to_end(&mut buf).unwrap();
            out.push((f.name().to_string(), buf));
        }
        out.sort();
        out
    }

    #[test]
    fn every_file_appears_under_its_relative_path() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("out");
        std::fs::create_dir_all(src.join("nested/deeper")).unwrap();
        std::fs::write(src.join("photo_crop_1.png"), b"one").unwrap();
        std::fs::write(src.join("photo_crop_2.png"), b"two").unwrap();
        std::fs::write(src.join("nested/deeper/x.png"), b"three").unwrap();

        let zip_path = dir.path().join("s_extracted_images.zip");
        create_archive_blocking(&src, &zip_path).unwrap();

        assert_eq!(
            entries(&zip_path),
            vec![
                ("nested/deeper/x.png".to_string(), b"three".to_vec()),
                ("photo_crop_1.png".to_string(), b"one".to_vec()),
                ("photo_crop_2.png".to_string(), b"two".to_vec()),
            ]
        );
    }

    #[test]
    fn empty_directory_gives_empty_archive() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("out");
        std::fs::create_dir_all(&src).unwrap();
        let zip_path = dir.path().join("empty.zip");
        create_archive_blocking(&src, &zip_path).unwrap();
        assert!(entries(&zip_path).is_empty());
    }

    #[test]
    fn missing_source_is_an_archive_error() {
        let dir = tempdir().unwrap();
        let err = create_archive_blocking(&dir.path().join("nope"), &dir.path().join("a.zip"))
            .unwrap_err();
        assert!(matches!(err, ExtractError::Archive { .. }));
    }

    #[tokio::test]
    async fn unwritable_destination_is_an_archive_error() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("out");
        std::fs::create_dir_all(&src).unwrap();
        let err = create_archive(src, dir.path().join("no/such/dir/a.zip"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Archive { .. }));
    }
}
