//! ffmpeg/ffprobe process adapters.

use crate::domain::media::VideoDimensions;
use crate::error::{TranscodeError, ValidationError};
use crate::ports::prober::MediaProber;
use crate::ports::transcoder::Transcoder;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;

/// Name of the manifest ffmpeg writes into the working directory.
pub const MANIFEST_NAME: &str = "index.m3u8";

const STDERR_TAIL_LINES: usize = 8;

/// Runs `ffmpeg` to produce a 1080p VOD HLS ladder of `%03d.ts` segments.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
    segment_seconds: u32,
}

impl FfmpegTranscoder {
    pub fn new(segment_seconds: u32) -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            segment_seconds,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn args(&self, input: &Path, working_dir: &Path) -> Vec<OsString> {
        let scale = "scale=w=iw*min(1920/iw\\,1080/ih):h=ih*min(1920/iw\\,1080/ih),\
            pad=1920:1080:(1920-iw*min(1920/iw\\,1080/ih))/2:(1080-ih*min(1920/iw\\,1080/ih))/2";

        let mut args: Vec<OsString> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-y",
            "-i",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(input.as_os_str().to_owned());
        args.extend(
            [
                "-vf",
                scale,
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-crf",
                "23",
                "-g",
                "48",
                "-keyint_min",
                "48",
                "-sc_threshold",
                "0",
                "-hls_time",
            ]
            .iter()
            .map(OsString::from),
        );
        args.push(self.segment_seconds.to_string().into());
        args.extend(
            ["-hls_playlist_type", "vod", "-c:a", "aac", "-b:a", "128k", "-hls_segment_filename"]
                .iter()
                .map(OsString::from),
        );
        args.push(working_dir.join("%03d.ts").into_os_string());
        args.push(working_dir.join(MANIFEST_NAME).into_os_string());
        args
    }
}

/// Collapse a finished process into the transcoder's error taxonomy.
pub fn check_exit(output: &Output) -> Result<(), TranscodeError> {
    if output.status.success() {
        return Ok(());
    }
    let diagnostic = stderr_tail(&output.stderr);
    match output.status.code() {
        Some(code) => Err(TranscodeError::Failed { code, diagnostic }),
        None => Err(TranscodeError::Crashed(format!("{}: {}", output.status, diagnostic))),
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn run(&self, input: &Path, working_dir: &Path) -> Result<(), TranscodeError> {
        tracing::info!(input = ?input, dir = ?working_dir, "starting ffmpeg");
        let output = Command::new(&self.program)
            .args(self.args(input, working_dir))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(TranscodeError::Spawn)?;

        check_exit(&output)?;

        let manifest = working_dir.join(MANIFEST_NAME);
        match tokio::fs::metadata(&manifest).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(TranscodeError::MissingManifest(manifest)),
        }
    }
}

/// Reads video dimensions with `ffprobe`.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    program: PathBuf,
}

impl Default for FfprobeProber {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffprobe"),
        }
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn dimensions(&self, path: &Path) -> Result<VideoDimensions, ValidationError> {
        let output = Command::new(&self.program)
            .arg("-v")
            .arg("error")
            .arg("-select_streams")
            .arg("v:0")
            .arg("-show_entries")
            .arg("stream=width,height")
            .arg("-of")
            .arg("json")
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ValidationError::Probe(e.to_string()))?;

        if !output.status.success() {
            return Err(ValidationError::Probe(stderr_tail(&output.stderr)));
        }
        VideoDimensions::from_probe_json(&String::from_utf8_lossy(&output.stdout))
    }
}
