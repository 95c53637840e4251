//! Web server: upload form, upload endpoint and archive download.
//!
//! | Route                       | Handler              |
//! |-----------------------------|----------------------|
//! | `GET /`                     | upload form + flash  |
//! | `POST /upload`              | run the pipeline     |
//! | `GET /download/:filename`   | stream + clean up    |

mod flash;
mod handlers;
mod routes;
mod templates;

pub use flash::FlashKey;
pub use handlers::download_location;
pub use routes::create_router;

use std::sync::Arc;

use crate::extract::Extractor;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<Extractor>,
    pub flash: FlashKey,
    /// Request body limit in bytes.
    pub max_upload_size: usize,
}

impl AppState {
    pub fn new(extractor: Extractor, secret_key: &str, max_upload_size: usize) -> Self {
        Self {
            extractor: Arc::new(extractor),
            flash: FlashKey::derive(secret_key),
            max_upload_size,
        }
    }
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(state: AppState, addr: &str) -> std::io::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting server at http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
