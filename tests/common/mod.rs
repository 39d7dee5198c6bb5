#![allow(dead_code)]

use async_trait::async_trait;
use hlsrelay::domain::hls::MediaPlaylist;
use hlsrelay::domain::media::VideoDimensions;
use hlsrelay::error::{StorageError, TranscodeError, ValidationError};
use hlsrelay::ports::prober::MediaProber;
use hlsrelay::ports::storage::StoragePort;
use hlsrelay::ports::transcoder::Transcoder;
use hlsrelay::PipelineSettings;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        settle_interval: Duration::from_millis(10),
        upload_retry_delay: Duration::from_millis(1),
        upload_grace: Duration::from_millis(200),
        ..PipelineSettings::default()
    }
}

pub async fn write_input(dir: &Path) -> PathBuf {
    let path = dir.join("clip-0001.mp4");
    tokio::fs::write(&path, b"fake mp4 payload").await.unwrap();
    path
}

/// Writes segments into the working directory over time, then the playlist.
pub struct ScriptedTranscoder {
    pub segments: Vec<String>,
    /// Pause after each segment
    pub pace: Duration,
    /// Stop after this many segments and exit with an error
    pub fail_after: Option<usize>,
    pub write_manifest: bool,
    /// Write the playlist before this segment, then wait, as ffmpeg does when
    /// it rewrites the playlist while the last segment is still open
    pub early_manifest: Option<(usize, Duration)>,
    /// Pause before returning, used to keep a session busy
    pub linger: Duration,
}

impl ScriptedTranscoder {
    pub fn new(count: usize) -> Self {
        Self {
            segments: (0..count).map(|n| format!("{:03}.ts", n)).collect(),
            pace: Duration::from_millis(30),
            fail_after: None,
            write_manifest: true,
            early_manifest: None,
            linger: Duration::ZERO,
        }
    }

    pub fn playlist(&self) -> MediaPlaylist {
        let mut playlist = MediaPlaylist::new(4);
        playlist.playlist_type = Some("VOD".to_string());
        for segment in &self.segments {
            playlist.add_segment(4.0, segment.clone());
        }
        playlist
    }

    async fn write_playlist(&self, working_dir: &Path) -> Result<(), TranscodeError> {
        self.playlist()
            .write_to(&working_dir.join("index.m3u8"))
            .await
            .map_err(TranscodeError::Spawn)
    }
}

#[async_trait]
impl Transcoder for ScriptedTranscoder {
    async fn run(&self, _input: &Path, working_dir: &Path) -> Result<(), TranscodeError> {
        for (index, segment) in self.segments.iter().enumerate() {
            if self.fail_after == Some(index) {
                return Err(TranscodeError::Failed {
                    code: 1,
                    diagnostic: "Conversion failed!".to_string(),
                });
            }
            if let Some((before, wait)) = self.early_manifest {
                if before == index {
                    self.write_playlist(working_dir).await?;
                    tokio::time::sleep(wait).await;
                }
            }
            let body = format!("segment {} payload", segment);
            tokio::fs::write(working_dir.join(segment), body)
                .await
                .map_err(TranscodeError::Spawn)?;
            tokio::time::sleep(self.pace).await;
        }
        if self.write_manifest && self.early_manifest.is_none() {
            self.write_playlist(working_dir).await?;
        }
        tokio::time::sleep(self.linger).await;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start(String),
    End(String),
}

/// Records every transfer and the peak number of concurrent ones.
#[derive(Default)]
pub struct InstrumentedStorage {
    pub log: Mutex<Vec<Call>>,
    pub delay: Duration,
    pub fail_on: Option<String>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl InstrumentedStorage {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing_on(name: &str) -> Self {
        Self {
            fail_on: Some(name.to_string()),
            delay: Duration::from_millis(5),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Start(name) => Some(name),
                Call::End(_) => None,
            })
            .collect()
    }

    pub fn peak(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoragePort for InstrumentedStorage {
    async fn put(&self, local_path: &Path, remote_folder: &str) -> Result<String, StorageError> {
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.log.lock().unwrap().push(Call::Start(name.clone()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let read = tokio::fs::read(local_path).await;
        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(Call::End(name.clone()));

        read?;
        if self.fail_on.as_deref() == Some(name.as_str()) {
            return Err(StorageError::Rejected {
                path: local_path.to_path_buf(),
                status: 503,
            });
        }
        Ok(format!("https://cdn.test/{}/{}", remote_folder, name))
    }
}

pub struct FixedProber(pub VideoDimensions);

impl FixedProber {
    pub fn new(width: u32, height: u32) -> Self {
        Self(VideoDimensions { width, height })
    }
}

#[async_trait]
impl MediaProber for FixedProber {
    async fn dimensions(&self, _path: &Path) -> Result<VideoDimensions, ValidationError> {
        Ok(self.0)
    }
}

/// Every regular file below `root`, recursively.
pub fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = std::fs::read_dir(root) else {
        return files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(files_under(&path));
        } else {
            files.push(path);
        }
    }
    files
}
