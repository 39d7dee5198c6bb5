//! hlsrelay - incremental transcode-and-upload pipeline
//!
//! Hexagonal Architecture:
//! - domain/: Pure session, artifact, playlist and progress types
//! - ports/: Trait definitions for the transcoder, prober and storage
//! - adapters/: ffmpeg, fs and HTTP storage, the axum server
//! - application/: Watcher, upload coordinator, sequencer and lifecycle
//! - config: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

pub use adapters::remote::HttpStorage;
pub use adapters::local::{FfmpegTranscoder, FfprobeProber, FsStorage};
pub use application::lifecycle::{IncomingUpload, SessionLifecycle};
pub use config::{AppConfig, PipelineSettings, StorageBackend};
