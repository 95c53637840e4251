//! Per-session storage layout.
//!
//! Every upload gets a fresh session token. All on-disk state for that upload
//! hangs off the token and nothing else:
//!
//! ```text
//! {upload_root}/{token}/                    stored upload + rendered pages
//! {output_root}/{token}/                    crops and fallback copies
//! {temp_root}/{token}_extracted_images.zip  archive awaiting download
//! ```
//!
//! Two concurrent requests therefore never touch the same directory, and the
//! service needs no locking of its own.

use crate::error::{CleanupError, ExtractError};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Suffix appended to the session token to name its archive.
pub const ARCHIVE_SUFFIX: &str = "_extracted_images.zip";

/// The three roots all session paths are derived from.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    upload_root: PathBuf,
    output_root: PathBuf,
    temp_root: PathBuf,
}

impl StorageLayout {
    pub fn new(
        upload_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        temp_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            upload_root: upload_root.into(),
            output_root: output_root.into(),
            temp_root: temp_root.into(),
        }
    }

    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    /// Create the three roots. Called once at startup.
    pub fn ensure_roots(&self) -> Result<(), ExtractError> {
        for dir in [&self.upload_root, &self.output_root, &self.temp_root] {
            ensure_dir(dir)?;
        }
        Ok(())
    }

    /// Resolve the paths for `token` without touching the filesystem.
    pub fn session(&self, token: SessionToken) -> SessionContext {
        let id = token.to_string();
        SessionContext {
            upload_dir: self.upload_root.join(&id),
            output_dir: self.output_root.join(&id),
            archive_path: self.temp_root.join(archive_file_name(&token)),
            token,
        }
    }

    /// Start a new session: fresh token, directories created.
    pub fn open_session(&self) -> Result<SessionContext, ExtractError> {
        let session = self.session(SessionToken::generate());
        session.create_dirs()?;
        debug!(session = %session.token, "Opened session");
        Ok(session)
    }

    /// Where the archive named `file_name` would live.
    pub fn archive_path(&self, file_name: &str) -> PathBuf {
        self.temp_root.join(file_name)
    }
}

/// Unique identifier scoping one upload's directories and archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(Uuid);

impl SessionToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a token supplied by a client. Only canonical UUIDs are accepted,
    /// so a token can never smuggle path components into a derived path.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Name of the archive for `token`.
pub fn archive_file_name(token: &SessionToken) -> String {
    format!("{token}{ARCHIVE_SUFFIX}")
}

/// Resolved paths for one session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub token: SessionToken,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub archive_path: PathBuf,
}

impl SessionContext {
    /// Create the upload and output directories. Idempotent.
    pub fn create_dirs(&self) -> Result<(), ExtractError> {
        ensure_dir(&self.upload_dir)?;
        ensure_dir(&self.output_dir)
    }

    pub fn archive_file_name(&self) -> String {
        archive_file_name(&self.token)
    }
}

fn ensure_dir(dir: &Path) -> Result<(), ExtractError> {
    std::fs::create_dir_all(dir).map_err(|source| ExtractError::Storage {
        path: dir.to_path_buf(),
        source,
    })
}

/// Recursively delete `dir`. An already-absent directory is not an error.
pub fn remove_dir(dir: &Path) -> Result<(), CleanupError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CleanupError {
            path: dir.to_path_buf(),
            source,
        }),
    }
}

/// Delete a single file. An already-absent file is not an error.
pub fn remove_file(path: &Path) -> Result<(), CleanupError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CleanupError {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn layout(root: &Path) -> StorageLayout {
        StorageLayout::new(root.join("in"), root.join("out"), root.join("tmp"))
    }

    #[test]
    fn paths_derive_only_from_token() {
        let dir = tempdir().unwrap();
        let layout = layout(dir.path());
        let token = SessionToken::generate();

        let a = layout.session(token);
        let b = layout.session(token);
        assert_eq!(a.upload_dir, b.upload_dir);
        assert_eq!(a.upload_dir, dir.path().join("in").join(token.to_string()));
        assert_eq!(a.output_dir, dir.path().join("out").join(token.to_string()));
        assert_eq!(
            a.archive_path,
            dir.path()
                .join("tmp")
                .join(format!("{token}_extracted_images.zip"))
        );
        // Nothing is created by resolution alone.
        assert!(!a.upload_dir.exists());
    }

    #[test]
    fn distinct_sessions_never_collide() {
        let dir = tempdir().unwrap();
        let layout = layout(dir.path());
        let a = layout.open_session().unwrap();
        let b = layout.open_session().unwrap();
        assert_ne!(a.token, b.token);
        assert_ne!(a.upload_dir, b.upload_dir);
        assert_ne!(a.output_dir, b.output_dir);
    }

    #[test]
    fn create_dirs_is_idempotent() {
        let dir = tempdir().unwrap();
        let session = layout(dir.path()).open_session().unwrap();
        session.create_dirs().expect("second create should succeed");
        assert!(session.upload_dir.is_dir());
        assert!(session.output_dir.is_dir());
    }

    #[test]
    fn remove_missing_is_ok() {
        let dir = tempdir().unwrap();
        remove_dir(&dir.path().join("never-existed")).unwrap();
        remove_file(&dir.path().join("never-existed.zip")).unwrap();
    }

    #[test]
    fn remove_dir_is_recursive() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("f.png"), b"x").unwrap();
        remove_dir(&dir.path().join("a")).unwrap();
        assert!(!dir.path().join("a").exists());
    }

    #[test]
    fn token_parse_rejects_paths() {
        assert!(SessionToken::parse("../../etc").is_none());
        assert!(SessionToken::parse("").is_none());
        let t = SessionToken::generate();
        assert_eq!(SessionToken::parse(&t.to_string()), Some(t));
    }
}
