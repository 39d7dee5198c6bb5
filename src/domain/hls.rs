use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, PartialEq)]
pub struct MediaSegment {
    pub duration: f64,
    pub uri: String,
}

/// An HLS media playlist, the manifest published last by every session.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub version: u8,
    pub target_duration: u64,
    pub media_sequence: u64,
    pub segments: Vec<MediaSegment>,
    pub end_list: bool,
    pub playlist_type: Option<String>,
    pub independent_segments: bool,
    /// Initialization segment for fMP4 (EXT-X-MAP)
    pub init_segment: Option<String>,
}

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"^#(EXT[A-Z0-9-]*)(?::(.*))?$").unwrap())
}

fn map_uri_regex() -> &'static Regex {
    static MAP_URI: OnceLock<Regex> = OnceLock::new();
    MAP_URI.get_or_init(|| Regex::new(r#"URI="([^"]+)""#).unwrap())
}

impl MediaPlaylist {
    pub fn new(target_duration: u64) -> Self {
        Self {
            version: 3,
            target_duration,
            media_sequence: 0,
            segments: Vec::new(),
            end_list: true,
            playlist_type: None,
            independent_segments: false,
            init_segment: None,
        }
    }

    pub fn add_segment(&mut self, duration: f64, uri: String) {
        self.segments.push(MediaSegment { duration, uri });
    }

    /// Every URI the playlist needs in order to play, init segment first.
    pub fn referenced_uris(&self) -> Vec<&str> {
        self.init_segment
            .iter()
            .map(String::as_str)
            .chain(self.segments.iter().map(|s| s.uri.as_str()))
            .collect()
    }

    /// Lenient parse of a media playlist. Unknown tags are skipped; a URI line
    /// without a preceding `#EXTINF` gets a zero duration.
    pub fn parse(content: &str) -> Self {
        let mut playlist = MediaPlaylist::new(0);
        playlist.end_list = false;
        let mut pending_duration: Option<f64> = None;

        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(caps) = tag_regex().captures(line) {
                let value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                match &caps[1] {
                    "EXT-X-VERSION" => playlist.version = value.parse().unwrap_or(playlist.version),
                    "EXT-X-TARGETDURATION" => {
                        playlist.target_duration = value.parse().unwrap_or(0)
                    }
                    "EXT-X-MEDIA-SEQUENCE" => playlist.media_sequence = value.parse().unwrap_or(0),
                    "EXT-X-PLAYLIST-TYPE" => playlist.playlist_type = Some(value.to_string()),
                    "EXT-X-INDEPENDENT-SEGMENTS" => playlist.independent_segments = true,
                    "EXT-X-ENDLIST" => playlist.end_list = true,
                    "EXT-X-MAP" => {
                        playlist.init_segment = map_uri_regex()
                            .captures(value)
                            .map(|c| c[1].to_string());
                    }
                    "EXTINF" => {
                        let duration = value.split(',').next().unwrap_or("");
                        pending_duration = duration.trim().parse().ok();
                    }
                    _ => {}
                }
            } else if !line.starts_with('#') {
                let duration = pending_duration.take().unwrap_or(0.0);
                playlist.add_segment(duration, line.to_string());
            }
        }

        playlist
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("#EXTM3U\n");
        out.push_str(&format!("#EXT-X-VERSION:{}\n", self.version));
        out.push_str(&format!("#EXT-X-TARGETDURATION:{}\n", self.target_duration));
        out.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{}\n", self.media_sequence));

        if let Some(pt) = &self.playlist_type {
            out.push_str(&format!("#EXT-X-PLAYLIST-TYPE:{}\n", pt));
        }

        if self.independent_segments {
            out.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");
        }

        if let Some(init) = &self.init_segment {
            out.push_str(&format!("#EXT-X-MAP:URI=\"{}\"\n", init));
        }

        for segment in &self.segments {
            // Using {:.6} for reasonable precision on float duration
            out.push_str(&format!("#EXTINF:{:.6},\n", segment.duration));
            out.push_str(&segment.uri);
            out.push('\n');
        }

        if self.end_list {
            out.push_str("#EXT-X-ENDLIST\n");
        }
        out
    }

    pub async fn write_to(&self, path: &Path) -> Result<(), std::io::Error> {
        let mut file = File::create(path).await?;
        file.write_all(self.render().as_bytes()).await?;
        file.flush().await
    }

    pub async fn read_from(path: &Path) -> Result<Self, std::io::Error> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(Self::parse(&content))
    }
}
