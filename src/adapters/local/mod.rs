//! Adapters running on the relay host itself.

pub mod ffmpeg;
pub mod fs;
pub mod http;

pub use ffmpeg::{FfmpegTranscoder, FfprobeProber};
pub use fs::FsStorage;
