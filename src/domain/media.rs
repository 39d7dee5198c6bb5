use crate::error::ValidationError;
use serde_json::Value;
use std::path::Path;

/// Container types accepted for upload.
pub const ALLOWED_VIDEO_TYPES: &[&str] = &[
    "video/mp4",
    "video/mkv",
    "video/x-matroska",
    "video/webm",
    "video/avi",
    "video/x-msvideo",
];

const ALLOWED_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "avi"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoDimensions {
    pub width: u32,
    pub height: u32,
}

impl VideoDimensions {
    pub fn shorter_side(&self) -> u32 {
        self.width.min(self.height)
    }

    /// Read the first video stream's size out of `ffprobe -of json` output.
    pub fn from_probe_json(stdout: &str) -> Result<Self, ValidationError> {
        let v: Value =
            serde_json::from_str(stdout).map_err(|e| ValidationError::Probe(e.to_string()))?;
        let stream = v
            .get("streams")
            .and_then(|streams| streams.as_array())
            .and_then(|streams| streams.first())
            .ok_or_else(|| ValidationError::Probe("no video stream".to_string()))?;

        let dimension = |key: &str| {
            stream
                .get(key)
                .and_then(|value| value.as_u64())
                .and_then(|value| u32::try_from(value).ok())
                .ok_or_else(|| ValidationError::Probe(format!("missing or invalid {}", key)))
        };

        Ok(Self {
            width: dimension("width")?,
            height: dimension("height")?,
        })
    }

    pub fn ensure_min(&self, min_dimension: u32) -> Result<(), ValidationError> {
        if self.shorter_side() < min_dimension {
            return Err(ValidationError::ResolutionTooLow {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

/// Accept an upload when its declared content type is on the allow-list.
/// Clients that send a generic type are judged by the file extension.
pub fn ensure_allowed_type(content_type: Option<&str>, file_name: &str) -> Result<(), ValidationError> {
    let declared = content_type.unwrap_or("application/octet-stream");
    if ALLOWED_VIDEO_TYPES.contains(&declared) {
        return Ok(());
    }

    let generic = declared == "application/octet-stream";
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension {
        Some(ext) if generic && ALLOWED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(ValidationError::UnsupportedType(declared.to_string())),
    }
}
