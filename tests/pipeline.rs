mod common;

use common::{
    fast_settings, files_under, write_input, Call, FixedProber, InstrumentedStorage,
    ScriptedTranscoder,
};
use futures::StreamExt;
use hlsrelay::application::sequencer::ProgressSequencer;
use hlsrelay::domain::progress::{ProgressEvent, ProgressKind, ProgressPayload};
use hlsrelay::domain::session::SessionState;
use hlsrelay::{IncomingUpload, PipelineSettings, SessionLifecycle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

struct Harness {
    uploads: TempDir,
    work: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            uploads: tempfile::tempdir().unwrap(),
            work: tempfile::tempdir().unwrap(),
        }
    }

    fn work_root(&self) -> &Path {
        self.work.path()
    }

    async fn start(
        &self,
        transcoder: ScriptedTranscoder,
        storage: Arc<InstrumentedStorage>,
        prober: FixedProber,
        settings: PipelineSettings,
    ) -> (JoinHandle<SessionState>, ProgressSequencer, IncomingUpload) {
        let lifecycle = SessionLifecycle::new(
            Arc::new(transcoder),
            storage,
            Arc::new(prober),
            self.work.path(),
            "hls_videos",
            settings,
        );
        let upload = IncomingUpload {
            path: write_input(self.uploads.path()).await,
            file_name: "clip.mp4".to_string(),
            content_type: Some("video/mp4".to_string()),
        };
        let (progress, sequencer) = ProgressSequencer::channel();
        let session_upload = upload.clone();
        let task = tokio::spawn(async move { lifecycle.run(session_upload, progress).await });
        (task, sequencer, upload)
    }
}

async fn collect(sequencer: ProgressSequencer) -> Vec<ProgressEvent> {
    tokio::time::timeout(Duration::from_secs(10), sequencer.into_stream().collect())
        .await
        .expect("session did not finish")
}

fn assert_well_formed(events: &[ProgressEvent]) {
    let (last, body) = events.split_last().expect("no events");
    assert!(last.is_terminal(), "last event must be terminal: {:?}", last);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    for (index, event) in body.iter().enumerate() {
        assert_eq!(event.id, index as i64 + 1, "ids must be gap free: {:?}", events);
    }
}

fn error_text(event: &ProgressEvent) -> String {
    match &event.payload {
        Some(ProgressPayload::Err { err }) => err.clone(),
        other => panic!("expected an error payload, got {:?}", other),
    }
}

#[tokio::test]
async fn test_clip_is_published_with_manifest_last() {
    let harness = Harness::new();
    let storage = Arc::new(InstrumentedStorage::with_delay(Duration::from_millis(10)));
    let (task, sequencer, upload) = harness
        .start(
            ScriptedTranscoder::new(3),
            storage.clone(),
            FixedProber::new(1920, 1080),
            fast_settings(),
        )
        .await;

    let events = collect(sequencer).await;
    assert_eq!(task.await.unwrap(), SessionState::Succeeded);
    assert_well_formed(&events);

    let done = events.last().unwrap();
    assert_eq!(done.id, 0);
    assert_eq!(done.message, "Upload completed!");
    match &done.payload {
        Some(ProgressPayload::Url { url }) => {
            assert!(url.starts_with("https://cdn.test/hls_videos/"));
            assert!(url.ends_with("/index.m3u8"));
        }
        other => panic!("unexpected payload {:?}", other),
    }

    let messages: Vec<_> = events.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages[0], "Checking resolution...");
    assert_eq!(messages[1], "Processing the video...");
    assert!(messages.contains(&"Video processing completed, uploading playlist..."));

    let mut uploaded: Vec<_> = events
        .iter()
        .filter(|e| e.kind == ProgressKind::SegmentUploaded)
        .map(|e| match &e.payload {
            Some(ProgressPayload::Segment { segment, .. }) => segment.clone(),
            other => panic!("unexpected payload {:?}", other),
        })
        .collect();
    uploaded.sort();
    assert_eq!(uploaded, vec!["000.ts", "001.ts", "002.ts"]);

    let started = storage.started();
    assert_eq!(started.len(), 4);
    assert_eq!(started.last().unwrap(), "index.m3u8");

    // Working directory and input are both gone.
    assert!(files_under(harness.work_root()).is_empty());
    assert_eq!(std::fs::read_dir(harness.work_root()).unwrap().count(), 0);
    assert!(!upload.path.exists());
}

#[tokio::test]
async fn test_manifest_starts_only_after_every_segment_finished() {
    let harness = Harness::new();
    let storage = Arc::new(InstrumentedStorage::with_delay(Duration::from_millis(40)));
    let mut transcoder = ScriptedTranscoder::new(4);
    transcoder.pace = Duration::from_millis(5);
    let (task, sequencer, _) = harness
        .start(transcoder, storage.clone(), FixedProber::new(1280, 720), fast_settings())
        .await;

    collect(sequencer).await;
    assert_eq!(task.await.unwrap(), SessionState::Succeeded);

    let calls = storage.calls();
    let manifest_start = calls
        .iter()
        .position(|call| *call == Call::Start("index.m3u8".to_string()))
        .unwrap();
    let last_segment_end = calls
        .iter()
        .rposition(|call| matches!(call, Call::End(name) if name.ends_with(".ts")))
        .unwrap();
    assert!(last_segment_end < manifest_start, "{:?}", calls);
}

#[tokio::test]
async fn test_manifest_settled_before_last_segment_still_publishes() {
    let harness = Harness::new();
    let storage = Arc::new(InstrumentedStorage::with_delay(Duration::from_millis(5)));
    let mut transcoder = ScriptedTranscoder::new(2);
    // 000.ts and the full playlist settle, then 001.ts lands as the process exits.
    transcoder.pace = Duration::ZERO;
    transcoder.early_manifest = Some((1, Duration::from_millis(150)));
    let (task, sequencer, _) = harness
        .start(transcoder, storage.clone(), FixedProber::new(1920, 1080), fast_settings())
        .await;

    let events = collect(sequencer).await;
    assert_eq!(task.await.unwrap(), SessionState::Succeeded, "{:?}", events.last());
    assert_well_formed(&events);
    assert_eq!(events.last().unwrap().id, 0);

    let calls = storage.calls();
    assert_eq!(
        storage.started(),
        vec!["000.ts".to_string(), "001.ts".to_string(), "index.m3u8".to_string()]
    );
    let manifest_start = calls
        .iter()
        .position(|call| *call == Call::Start("index.m3u8".to_string()))
        .unwrap();
    assert!(calls[..manifest_start].contains(&Call::End("001.ts".to_string())));
}

#[tokio::test]
async fn test_uploaded_segment_is_gone_when_reported() {
    let harness = Harness::new();
    let storage = Arc::new(InstrumentedStorage::with_delay(Duration::from_millis(5)));
    let mut transcoder = ScriptedTranscoder::new(3);
    transcoder.pace = Duration::from_millis(60);
    let (task, sequencer, _) = harness
        .start(transcoder, storage, FixedProber::new(1920, 1080), fast_settings())
        .await;

    let mut stream = Box::pin(sequencer.into_stream());
    let mut reported = 0;
    while let Some(event) = tokio::time::timeout(Duration::from_secs(10), stream.next())
        .await
        .unwrap()
    {
        if let Some(ProgressPayload::Segment { segment, .. }) = &event.payload {
            reported += 1;
            let leftovers: Vec<_> = files_under(harness.work_root())
                .into_iter()
                .filter(|path| path.file_name().is_some_and(|name| name == segment.as_str()))
                .collect();
            assert!(leftovers.is_empty(), "{} still on disk", segment);
        }
    }
    assert_eq!(reported, 3);
    assert_eq!(task.await.unwrap(), SessionState::Succeeded);
}

#[tokio::test]
async fn test_upload_concurrency_is_bounded() {
    let harness = Harness::new();
    let storage = Arc::new(InstrumentedStorage::with_delay(Duration::from_millis(50)));
    let mut transcoder = ScriptedTranscoder::new(5);
    // All five segments land at once.
    transcoder.pace = Duration::ZERO;
    transcoder.linger = Duration::from_millis(50);
    let settings = PipelineSettings {
        upload_concurrency: 2,
        ..fast_settings()
    };
    let (task, sequencer, _) = harness
        .start(transcoder, storage.clone(), FixedProber::new(1920, 1080), settings)
        .await;

    let events = collect(sequencer).await;
    assert_eq!(task.await.unwrap(), SessionState::Succeeded);
    assert_well_formed(&events);
    assert!(storage.peak() <= 2, "peak was {}", storage.peak());
    assert_eq!(storage.started().len(), 6);
}

#[tokio::test]
async fn test_low_resolution_is_rejected_without_working_dir() {
    let harness = Harness::new();
    let storage = Arc::new(InstrumentedStorage::default());
    let (task, sequencer, upload) = harness
        .start(
            ScriptedTranscoder::new(3),
            storage.clone(),
            FixedProber::new(200, 150),
            fast_settings(),
        )
        .await;

    let events = collect(sequencer).await;
    assert_eq!(task.await.unwrap(), SessionState::Failed);
    assert_well_formed(&events);

    let last = events.last().unwrap();
    assert_eq!(last.id, -1);
    assert_eq!(last.message, "Error");
    assert!(error_text(last).contains("too low"));
    assert_eq!(std::fs::read_dir(harness.work_root()).unwrap().count(), 0);
    assert!(storage.calls().is_empty());
    assert!(!upload.path.exists());
}

#[tokio::test]
async fn test_permanent_segment_failure_aborts_before_manifest() {
    let harness = Harness::new();
    let storage = Arc::new(InstrumentedStorage::failing_on("001.ts"));
    let (task, sequencer, _) = harness
        .start(
            ScriptedTranscoder::new(3),
            storage.clone(),
            FixedProber::new(1920, 1080),
            fast_settings(),
        )
        .await;

    let events = collect(sequencer).await;
    assert_eq!(task.await.unwrap(), SessionState::Failed);
    assert_well_formed(&events);
    assert_eq!(events.last().unwrap().id, -1);
    assert!(error_text(events.last().unwrap()).contains("001.ts"));

    assert!(!storage.started().contains(&"index.m3u8".to_string()));
    assert!(files_under(harness.work_root()).is_empty());
}

#[tokio::test]
async fn test_transcoder_failure_never_publishes_manifest() {
    let harness = Harness::new();
    let storage = Arc::new(InstrumentedStorage::with_delay(Duration::from_millis(5)));
    let mut transcoder = ScriptedTranscoder::new(3);
    transcoder.fail_after = Some(2);
    let (task, sequencer, _) = harness
        .start(transcoder, storage.clone(), FixedProber::new(1920, 1080), fast_settings())
        .await;

    let events = collect(sequencer).await;
    assert_eq!(task.await.unwrap(), SessionState::Failed);
    assert_well_formed(&events);
    assert_eq!(events.last().unwrap().kind, ProgressKind::Error);
    assert!(error_text(events.last().unwrap()).contains("Conversion failed!"));
    assert!(!storage.started().contains(&"index.m3u8".to_string()));
    assert!(files_under(harness.work_root()).is_empty());
}

#[tokio::test]
async fn test_missing_manifest_fails_session() {
    let harness = Harness::new();
    let storage = Arc::new(InstrumentedStorage::default());
    let mut transcoder = ScriptedTranscoder::new(2);
    transcoder.write_manifest = false;
    let (task, sequencer, _) = harness
        .start(transcoder, storage, FixedProber::new(1920, 1080), fast_settings())
        .await;

    let events = collect(sequencer).await;
    assert_eq!(task.await.unwrap(), SessionState::Failed);
    assert!(error_text(events.last().unwrap()).contains("no manifest"));
}

#[tokio::test]
async fn test_client_disconnect_cancels_and_cleans_up() {
    let harness = Harness::new();
    let storage = Arc::new(InstrumentedStorage::default());
    let mut transcoder = ScriptedTranscoder::new(1);
    transcoder.linger = Duration::from_secs(30);
    let (task, sequencer, upload) = harness
        .start(transcoder, storage, FixedProber::new(1920, 1080), fast_settings())
        .await;

    let mut stream = Box::pin(sequencer.into_stream());
    let first = stream.next().await.unwrap();
    assert_eq!(first.id, 1);
    drop(stream);

    let state = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("session ignored the disconnect")
        .unwrap();
    assert_eq!(state, SessionState::Cancelled);
    assert_eq!(std::fs::read_dir(harness.work_root()).unwrap().count(), 0);
    assert!(!upload.path.exists());
}
