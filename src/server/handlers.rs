//! HTTP request handlers.

use askama::Template;
use axum::body::Body;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Json;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use super::flash::{self, FlashKey, CLEAR_FLASH_COOKIE};
use super::templates::IndexTemplate;
use super::AppState;
use crate::config::ALLOWED_EXTENSIONS;
use crate::error::ExtractError;
use crate::extract::UploadedFile;
use crate::storage::{self, SessionToken};

/// Download chunk size.
const CHUNK_SIZE: usize = 64 * 1024;

/// Name the client saves the archive under.
const DOWNLOAD_NAME: &str = "extracted_images.zip";

/// Shown to the client instead of the configuration reason, which is logged.
const SERVICE_UNAVAILABLE_MESSAGE: &str = "Image processing service is not available";

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn multipart_error(e: MultipartError) -> Response {
    warn!("Failed to read multipart body: {}", e);
    json_error(e.status(), e.body_text())
}

/// 303 to the upload form with a flash message attached.
fn flash_redirect(key: &FlashKey, message: &str) -> Response {
    let mut response = Redirect::to("/").into_response();
    attach_flash(&mut response, key, message);
    response
}

fn attach_flash(response: &mut Response, key: &FlashKey, message: &str) {
    match HeaderValue::from_str(&key.set_cookie(message)) {
        Ok(cookie) => {
            response.headers_mut().insert(SET_COOKIE, cookie);
        }
        Err(e) => warn!("Could not attach flash message: {}", e),
    }
}

/// `GET /`: the upload form, plus any pending flash message.
pub async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let cookie = flash::read_cookie(&headers);
    let messages: Vec<String> = cookie
        .and_then(|value| state.flash.decode(value))
        .into_iter()
        .collect();

    let accept = ALLOWED_EXTENSIONS
        .iter()
        .map(|ext| format!(".{ext}"))
        .collect::<Vec<_>>()
        .join(",");

    let template = IndexTemplate {
        messages: &messages,
        accept: &accept,
        max_upload_mb: state.max_upload_size / (1024 * 1024),
        service_ready: state.extractor.backend().is_ready(),
    };

    let html = match template.render() {
        Ok(html) => html,
        Err(e) => {
            error!("Failed to render upload form: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response();
        }
    };

    let mut response = Html(html).into_response();
    if cookie.is_some() {
        response
            .headers_mut()
            .insert(SET_COOKIE, HeaderValue::from_static(CLEAR_FLASH_COOKIE));
    }
    response
}

/// `POST /upload`: run one upload through the pipeline.
///
/// * validation failure: 400 `{"error": ...}`
/// * processing failure: 303 to `/` with a flash message
/// * success: 303 to the archive's download URL
pub async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut multipart = match multipart {
        Ok(m) => m,
        Err(e) => {
            error!("Upload is not a multipart form: {}", e);
            return json_error(StatusCode::BAD_REQUEST, ExtractError::NoFilePart.to_string());
        }
    };

    let mut upload = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return multipart_error(e),
        };
        let name = field.name().unwrap_or_default().to_string();
        // A `file` field without a filename is a plain form value, not an upload.
        let Some(filename) = field.file_name().map(str::to_string) else {
            debug!("Ignoring form field '{}'", name);
            continue;
        };
        if name != "file" {
            debug!("Ignoring file field '{}'", name);
            continue;
        }
        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) => return multipart_error(e),
        };
        info!("Upload request received: '{}' ({} bytes)", filename, data.len());
        upload = Some(UploadedFile {
            filename,
            data: data.to_vec(),
        });
        break;
    }

    let Some(upload) = upload else {
        error!("No 'file' field in request");
        return json_error(StatusCode::BAD_REQUEST, ExtractError::NoFilePart.to_string());
    };

    match state.extractor.process_upload(upload).await {
        Ok(outcome) => {
            for file in &outcome.files {
                match &file.error {
                    Some(e) => info!("{}: {:?} ({})", file.source, file.status, e),
                    None => debug!("{}: {:?}", file.source, file.status),
                }
            }
            let location = download_location(&outcome.archive_name, &outcome.token);
            debug!("Redirecting to {}", location);
            let mut response = Redirect::to(&location).into_response();
            // Partial PDFs still download; the warning shows on the next page view.
            if let Some(e) = &outcome.render_error {
                warn!("Delivering partial PDF output: {}", e);
                attach_flash(&mut response, &state.flash, &format!("Error processing PDF: {e}"));
            }
            response
        }
        Err(e) if e.is_validation() => {
            warn!("Rejected upload: {}", e);
            json_error(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e @ ExtractError::ServiceUnavailable { .. }) => {
            error!("{}", e);
            flash_redirect(&state.flash, SERVICE_UNAVAILABLE_MESSAGE)
        }
        Err(e) => {
            error!("Error during processing: {}", e);
            flash_redirect(
                &state.flash,
                "Error during image processing. Please try again.",
            )
        }
    }
}

/// Download URL for a finished session.
pub fn download_location(archive_name: &str, token: &SessionToken) -> String {
    format!(
        "/download/{}?session_id={}",
        urlencoding::encode(archive_name),
        token
    )
}

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    pub session_id: Option<String>,
}

/// `GET /download/:filename`: stream the archive, then delete it together
/// with the session's output directory.
pub async fn download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(params): Query<DownloadParams>,
) -> Response {
    if !is_plain_file_name(&filename) {
        warn!("Rejected download of '{}'", filename);
        return json_error(StatusCode::BAD_REQUEST, "Invalid filename");
    }
    let token = match params.session_id.as_deref() {
        None => None,
        Some(raw) => match SessionToken::parse(raw) {
            Some(token) => Some(token),
            None => return json_error(StatusCode::BAD_REQUEST, "Invalid session id"),
        },
    };

    let layout = state.extractor.layout();
    let archive = layout.archive_path(&filename);
    let file = match tokio::fs::File::open(&archive).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("Archive not found: {}", archive.display());
            return json_error(StatusCode::NOT_FOUND, "File not found");
        }
        Err(e) => {
            error!("Could not open archive {}: {}", archive.display(), e);
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Could not read archive");
        }
    };
    let length = file.metadata().await.ok().map(|m| m.len());

    let guard = CleanupGuard {
        archive,
        output_dir: token.map(|t| layout.session(t).output_dir),
    };

    let mut response = (
        StatusCode::OK,
        [
            (CONTENT_TYPE, "application/zip".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{DOWNLOAD_NAME}\""),
            ),
        ],
        Body::from_stream(archive_stream(file, guard)),
    )
        .into_response();
    if let Some(len) = length {
        response.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(len));
    }
    response
}

/// Reject anything that could leave the temp directory.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && !name.contains("..")
}

/// Read `file` in fixed-size chunks. `guard` lives exactly as long as the
/// stream: it is dropped at EOF, on a read error, or when the body is
/// dropped because the client went away.
fn archive_stream(
    file: tokio::fs::File,
    guard: CleanupGuard,
) -> impl Stream<Item = io::Result<Vec<u8>>> + Send + 'static {
    futures::stream::unfold(Some((file, guard)), |state| async move {
        let (mut file, guard) = state?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        match file.read(&mut buf).await {
            Ok(0) => {
                drop(file);
                drop(guard);
                None
            }
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(buf), Some((file, guard))))
            }
            Err(e) => {
                error!("Error reading archive: {}", e);
                Some((Err(e), None))
            }
        }
    })
}

/// Deletes a delivered archive and its session output on drop.
struct CleanupGuard {
    archive: PathBuf,
    output_dir: Option<PathBuf>,
}

impl CleanupGuard {
    fn run(archive: &std::path::Path, output_dir: Option<&std::path::Path>) {
        if let Err(e) = storage::remove_file(archive) {
            warn!("Cleanup error: {}", e);
        }
        if let Some(dir) = output_dir {
            if let Err(e) = storage::remove_dir(dir) {
                warn!("Cleanup error: {}", e);
            }
        }
        info!(
            "Cleaned up after download: {} and {}",
            archive.display(),
            output_dir
                .map(|d| d.display().to_string())
                .unwrap_or_else(|| "<no session>".into())
        );
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let archive = std::mem::take(&mut self.archive);
        let output_dir = self.output_dir.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || Self::run(&archive, output_dir.as_deref()));
            }
            Err(_) => Self::run(&archive, output_dir.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tempfile::tempdir;

    async fn wait_for_removal(paths: &[&std::path::Path]) {
        for _ in 0..200 {
            if paths.iter().all(|p| !p.exists()) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("not removed: {paths:?}");
    }

    #[test]
    fn guard_outside_runtime_cleans_up_inline() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        std::fs::write(&archive, b"zip").unwrap();
        drop(CleanupGuard {
            archive: archive.clone(),
            output_dir: None,
        });
        assert!(!archive.exists());
    }

    #[test]
    fn plain_file_names_only() {
        assert!(is_plain_file_name("abc_extracted_images.zip"));
        assert!(!is_plain_file_name(""));
        assert!(!is_plain_file_name("../secret.zip"));
        assert!(!is_plain_file_name("a/b.zip"));
        assert!(!is_plain_file_name("a\\b.zip"));
        assert!(!is_plain_file_name(".."));
    }

    #[test]
    fn download_location_carries_token() {
        let token = SessionToken::generate();
        let name = storage::archive_file_name(&token);
        assert_eq!(
            download_location(&name, &token),
            format!("/download/{token}_extracted_images.zip?session_id={token}")
        );
    }

    #[tokio::test]
    async fn stream_yields_whole_file_then_cleans_up() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        let output = dir.path().join("out");
        std::fs::create_dir_all(&output).unwrap();
        std::fs::write(output.join("x.png"), b"x").unwrap();
        let payload: Vec<u8> = (0..(CHUNK_SIZE * 2 + 10)).map(|i| i as u8).collect();
        std::fs::write(&archive, &payload).unwrap();

        let file = tokio::fs::File::open(&archive).await.unwrap();
        let guard = CleanupGuard {
            archive: archive.clone(),
            output_dir: Some(output.clone()),
        };
        let chunks: Vec<_> = archive_stream(file, guard).collect().await;

        assert!(chunks.len() >= 3);
        let joined: Vec<u8> = chunks.into_iter().flat_map(|c| c.unwrap()).collect();
        assert_eq!(joined, payload);
        wait_for_removal(&[&archive, &output]).await;
    }

    #[tokio::test]
    async fn dropped_stream_still_cleans_up() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        std::fs::write(&archive, vec![0u8; CHUNK_SIZE * 3]).unwrap();

        let file = tokio::fs::File::open(&archive).await.unwrap();
        let guard = CleanupGuard {
            archive: archive.clone(),
            output_dir: None,
        };
        let mut stream = Box::pin(archive_stream(file, guard));
        assert!(stream.next().await.is_some());
        drop(stream);

        wait_for_removal(&[&archive]).await;
    }
}
