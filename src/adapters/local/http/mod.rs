//! HTTP inbound adapter.
//!
//! `POST /api/up` takes a multipart upload and answers with the session's
//! progress as a Server-Sent Events stream.

pub mod upload;

use crate::application::lifecycle::SessionLifecycle;
use crate::ports::prober::MediaProber;
use crate::ports::storage::StoragePort;
use crate::ports::transcoder::Transcoder;
use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

pub struct AppState<T, S, P> {
    pub lifecycle: SessionLifecycle<T, S, P>,
    pub upload_dir: PathBuf,
}

impl<T, S, P> Clone for AppState<T, S, P> {
    fn clone(&self) -> Self {
        Self {
            lifecycle: self.lifecycle.clone(),
            upload_dir: self.upload_dir.clone(),
        }
    }
}

pub fn router<T, S, P>(state: AppState<T, S, P>) -> Router
where
    T: Transcoder + 'static,
    S: StoragePort + 'static,
    P: MediaProber + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/api/up", post(upload::upload_media::<T, S, P>))
        .route("/api/healthcheck", get(healthcheck))
        .layer(DefaultBodyLimit::disable())
        .layer(cors)
        .with_state(state)
}

/// Expose the fs object store so published playlists are playable.
pub fn with_media(router: Router, storage_root: &Path) -> Router {
    router.nest_service("/media", ServeDir::new(storage_root))
}

async fn healthcheck() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn root() -> Html<&'static str> {
    Html(
        r#"
        <!doctype html>
        <html>
            <head>
                <title>Upload a video</title>
            </head>
            <body>
                <h1>Upload a video</h1>
                <form action="/api/up" method="post" enctype="multipart/form-data">
                    <div>
                        <label>
                            Video file:
                            <input type="file" name="file" accept="video/*">
                        </label>
                    </div>
                    <div>
                        <input type="submit" value="Upload">
                    </div>
                </form>
            </body>
        </html>
        "#,
    )
}
