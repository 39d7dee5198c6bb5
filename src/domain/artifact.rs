use std::path::{Path, PathBuf};

/// What a file in the working directory is to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Segment,
    Manifest,
}

impl ArtifactKind {
    /// Classify a file by its suffix. Hidden files, temporaries and
    /// anything the transcoder is not expected to publish are ignored.
    /// An fMP4 init section (`init.mp4`) travels like a segment, since the
    /// playlist references it through `EXT-X-MAP`.
    pub fn classify(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        if file_name.starts_with('.') {
            return None;
        }
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("ts") | Some("m4s") | Some("mp4") => Some(ArtifactKind::Segment),
            Some("m3u8") => Some(ArtifactKind::Manifest),
            _ => None,
        }
    }
}

/// A file whose size has stopped changing and is safe to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledArtifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub size_bytes: u64,
}

impl SettledArtifact {
    pub fn name(&self) -> String {
        file_name(&self.path)
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Settled,
    Uploading,
    Uploaded,
    Failed,
}

/// One playable chunk of the transcoded output.
#[derive(Debug, Clone)]
pub struct Segment {
    pub name: String,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub state: SegmentState,
    pub attempts: u32,
    pub remote_url: Option<String>,
}

impl Segment {
    pub fn settled(artifact: &SettledArtifact) -> Self {
        Self {
            name: artifact.name(),
            local_path: artifact.path.clone(),
            size_bytes: artifact.size_bytes,
            state: SegmentState::Settled,
            attempts: 0,
            remote_url: None,
        }
    }
}
