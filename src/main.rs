//! Relay server: accepts uploads on `/api/up` and streams HLS publishing progress.

use axum::Router;
use hlsrelay::adapters::local::http::{self, AppState};
use hlsrelay::ports::storage::StoragePort;
use hlsrelay::{
    AppConfig, FfmpegTranscoder, FfprobeProber, FsStorage, HttpStorage, SessionLifecycle,
    StorageBackend,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env();

    tracing_subscriber::fmt::init();

    let shutdown = CancellationToken::new();

    let app = match config.storage_backend {
        StorageBackend::Fs => {
            let storage = FsStorage::new(&config.storage_root, &config.public_base_url);
            let router = build_router(&config, storage, shutdown.clone());
            http::with_media(router, &config.storage_root)
        }
        StorageBackend::Http => {
            let storage = HttpStorage::new(reqwest::Client::new(), &config.storage_endpoint);
            build_router(&config, storage, shutdown.clone())
        }
    };

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.addr, config.port))
        .await
        .expect("Failed to bind TCP listener");
    tracing::info!(
        addr = %config.addr,
        port = %config.port,
        backend = ?config.storage_backend,
        "listening"
    );

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down, cancelling running sessions");
            signal.cancel();
        })
        .await
        .expect("Server failed to start");
}

fn build_router<S>(config: &AppConfig, storage: S, shutdown: CancellationToken) -> Router
where
    S: StoragePort + 'static,
{
    let transcoder = FfmpegTranscoder::new(config.pipeline.segment_seconds);
    let lifecycle = SessionLifecycle::new(
        Arc::new(transcoder),
        Arc::new(storage),
        Arc::new(FfprobeProber::default()),
        &config.work_dir,
        &config.storage_prefix,
        config.pipeline.clone(),
    )
    .with_shutdown(shutdown);

    http::router(AppState {
        lifecycle,
        upload_dir: config.upload_dir.clone(),
    })
}
