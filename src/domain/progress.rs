use serde::Serialize;

/// Id reserved for the terminal success event.
pub const DONE_ID: i64 = 0;
/// Id reserved for the terminal error event.
pub const ERROR_ID: i64 = -1;

pub const DONE_MESSAGE: &str = "Upload completed!";
pub const ERROR_MESSAGE: &str = "Error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Info,
    SegmentUploaded,
    Error,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ProgressPayload {
    Segment { segment: String, url: String },
    Url { url: String },
    Err { err: String },
}

/// An event as delivered to the caller. Serializes to
/// `{"id":..,"kind":..,"message":..}` with the payload fields inlined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub id: i64,
    pub kind: ProgressKind,
    pub message: String,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ProgressPayload>,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ProgressKind::Done | ProgressKind::Error)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"id":{},"message":"serialization failed: {}"}}"#,
                self.id, e
            )
        })
    }
}

/// An event as produced inside the pipeline, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Info(String),
    SegmentUploaded { segment: String, url: String },
    Done { url: String },
    Failed { err: String },
}

impl RawEvent {
    pub fn info(message: impl Into<String>) -> Self {
        RawEvent::Info(message.into())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RawEvent::Done { .. } | RawEvent::Failed { .. })
    }

    /// Attach an id. Terminal events ignore `next_id` and take their reserved id.
    pub fn into_event(self, next_id: i64) -> ProgressEvent {
        match self {
            RawEvent::Info(message) => ProgressEvent {
                id: next_id,
                kind: ProgressKind::Info,
                message,
                payload: None,
            },
            RawEvent::SegmentUploaded { segment, url } => ProgressEvent {
                id: next_id,
                kind: ProgressKind::SegmentUploaded,
                message: format!("Uploaded {}", segment),
                payload: Some(ProgressPayload::Segment { segment, url }),
            },
            RawEvent::Done { url } => ProgressEvent {
                id: DONE_ID,
                kind: ProgressKind::Done,
                message: DONE_MESSAGE.to_string(),
                payload: Some(ProgressPayload::Url { url }),
            },
            RawEvent::Failed { err } => ProgressEvent {
                id: ERROR_ID,
                kind: ProgressKind::Error,
                message: ERROR_MESSAGE.to_string(),
                payload: Some(ProgressPayload::Err { err }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_done_event_wire_format() {
        let event = RawEvent::Done {
            url: "https://cdn/x/index.m3u8".to_string(),
        }
        .into_event(7);
        let value: Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 0,
                "kind": "done",
                "message": "Upload completed!",
                "url": "https://cdn/x/index.m3u8"
            })
        );
    }

    #[test]
    fn test_error_event_uses_reserved_id() {
        let event = RawEvent::Failed {
            err: "Video resolution too low: 200x150".to_string(),
        }
        .into_event(3);
        assert_eq!(event.id, ERROR_ID);
        assert!(event.is_terminal());
        let value: Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["message"], "Error");
        assert_eq!(value["err"], "Video resolution too low: 200x150");
    }

    #[test]
    fn test_info_event_has_no_payload() {
        let event = RawEvent::info("Processing the video...").into_event(2);
        let value: Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(
            value,
            json!({"id": 2, "kind": "info", "message": "Processing the video..."})
        );
    }

    #[test]
    fn test_segment_uploaded_payload() {
        let event = RawEvent::SegmentUploaded {
            segment: "001.ts".to_string(),
            url: "u".to_string(),
        }
        .into_event(4);
        assert_eq!(event.message, "Uploaded 001.ts");
        assert!(!event.is_terminal());
        let value: Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["segment"], "001.ts");
        assert_eq!(value["url"], "u");
    }
}
