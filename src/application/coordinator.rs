//! Bounded-concurrency upload of settled artifacts, manifest last.

use super::sequencer::ProgressSender;
use crate::config::PipelineSettings;
use crate::domain::artifact::{file_name, ArtifactKind, Segment, SegmentState, SettledArtifact};
use crate::domain::hls::MediaPlaylist;
use crate::domain::progress::RawEvent;
use crate::error::{PipelineError, StorageError, TranscodeError, UploadError};
use crate::ports::storage::StoragePort;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
enum Command {
    Submit(SettledArtifact),
    TranscodeFinished(Result<(), TranscodeError>),
    InputClosed,
}

/// Input side of a running coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Command>,
    outstanding: Arc<AtomicUsize>,
}

impl CoordinatorHandle {
    pub fn submit(&self, artifact: SettledArtifact) {
        if self.tx.send(Command::Submit(artifact)).is_err() {
            tracing::debug!("coordinator already finished, artifact dropped");
        }
    }

    /// Report the transcoder's terminal outcome. A failure resolves the
    /// completion with that error; success allows the manifest through.
    pub fn transcode_finished(&self, outcome: Result<(), TranscodeError>) {
        if self.tx.send(Command::TranscodeFinished(outcome)).is_err() {
            tracing::debug!("coordinator already finished, transcode outcome dropped");
        }
    }

    /// No more artifacts will be submitted. The manifest is only published
    /// after this, so a segment that settles late is still verified.
    pub fn close_input(&self) {
        if self.tx.send(Command::InputClosed).is_err() {
            tracing::debug!("coordinator already finished, input close dropped");
        }
    }

    /// Segments submitted but not yet uploaded.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

/// Resolves once the manifest is published or the session cannot succeed.
#[derive(Debug)]
pub struct Completion {
    task: JoinHandle<Result<String, PipelineError>>,
}

impl Completion {
    pub async fn await_completion(self) -> Result<String, PipelineError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(PipelineError::Cancelled),
            Err(e) => Err(PipelineError::Io(io::Error::other(e.to_string()))),
        }
    }
}

struct UploadOutcome {
    name: String,
    attempts: u32,
    result: Result<String, StorageError>,
}

pub struct UploadCoordinator<S> {
    storage: Arc<S>,
    remote_folder: String,
    concurrency: usize,
    max_attempts: u32,
    retry_delay: Duration,
    grace: Duration,
    progress: ProgressSender,
    cancel: CancellationToken,
    outstanding: Arc<AtomicUsize>,
    segments: HashMap<String, Segment>,
    queue: VecDeque<String>,
    manifest: Option<SettledArtifact>,
    transcoded: bool,
    input_closed: bool,
}

impl<S> UploadCoordinator<S>
where
    S: StoragePort + 'static,
{
    pub fn start(
        storage: Arc<S>,
        remote_folder: String,
        settings: &PipelineSettings,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> (CoordinatorHandle, Completion) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outstanding = Arc::new(AtomicUsize::new(0));

        let coordinator = Self {
            storage,
            remote_folder,
            concurrency: settings.upload_concurrency.max(1),
            max_attempts: settings.upload_attempts.max(1),
            retry_delay: settings.upload_retry_delay,
            grace: settings.upload_grace,
            progress,
            cancel,
            outstanding: outstanding.clone(),
            segments: HashMap::new(),
            queue: VecDeque::new(),
            manifest: None,
            transcoded: false,
            input_closed: false,
        };

        let task = tokio::spawn(coordinator.run(rx));
        (CoordinatorHandle { tx, outstanding }, Completion { task })
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) -> Result<String, PipelineError> {
        let mut in_flight = JoinSet::new();
        let result = self.drive(&mut commands, &mut in_flight).await;

        if !in_flight.is_empty() {
            tracing::debug!(in_flight = in_flight.len(), grace = ?self.grace, "waiting for in-flight uploads");
            let drained = tokio::time::timeout(self.grace, async {
                while in_flight.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                tracing::warn!(abandoned = in_flight.len(), "abandoning in-flight uploads");
                in_flight.abort_all();
            }
        }

        result
    }

    async fn drive(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        in_flight: &mut JoinSet<UploadOutcome>,
    ) -> Result<String, PipelineError> {
        let mut commands_open = true;

        loop {
            while in_flight.len() < self.concurrency {
                let Some(name) = self.queue.pop_front() else {
                    break;
                };
                self.dispatch(&name, in_flight);
            }

            if self.transcoded && self.input_closed && self.outstanding.load(Ordering::SeqCst) == 0 {
                return match self.manifest.take() {
                    Some(manifest) => self.publish_manifest(manifest).await,
                    None => Err(UploadError::MissingManifest.into()),
                };
            }

            if !commands_open && in_flight.is_empty() {
                // Every handle is gone and nothing can make progress anymore.
                return Err(if self.transcoded {
                    UploadError::MissingManifest.into()
                } else {
                    PipelineError::Cancelled
                });
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    let outcome = joined.map_err(|e| PipelineError::Io(io::Error::other(e.to_string())))?;
                    self.complete(outcome)?;
                }
                command = commands.recv(), if commands_open => match command {
                    Some(Command::Submit(artifact)) => self.accept(artifact),
                    Some(Command::TranscodeFinished(Ok(()))) => self.transcoded = true,
                    Some(Command::TranscodeFinished(Err(e))) => return Err(e.into()),
                    Some(Command::InputClosed) => self.input_closed = true,
                    None => {
                        commands_open = false;
                        self.input_closed = true;
                    }
                },
            }
        }
    }

    fn accept(&mut self, artifact: SettledArtifact) {
        match artifact.kind {
            ArtifactKind::Segment => {
                let name = artifact.name();
                if self.segments.contains_key(&name) {
                    tracing::debug!(segment = %name, "duplicate segment ignored");
                    return;
                }
                self.outstanding.fetch_add(1, Ordering::SeqCst);
                self.segments.insert(name.clone(), Segment::settled(&artifact));
                self.queue.push_back(name);
            }
            ArtifactKind::Manifest => {
                if self.manifest.is_some() {
                    tracing::debug!(manifest = %artifact.name(), "manifest already pending");
                    return;
                }
                tracing::debug!(
                    manifest = %artifact.name(),
                    outstanding = self.outstanding.load(Ordering::SeqCst),
                    "manifest held until segments are uploaded"
                );
                self.manifest = Some(artifact);
            }
        }
    }

    fn dispatch(&mut self, name: &str, in_flight: &mut JoinSet<UploadOutcome>) {
        let Some(segment) = self.segments.get_mut(name) else {
            return;
        };
        segment.state = SegmentState::Uploading;

        let storage = self.storage.clone();
        let path = segment.local_path.clone();
        let folder = self.remote_folder.clone();
        let name = name.to_string();
        let (max_attempts, retry_delay) = (self.max_attempts, self.retry_delay);

        tracing::debug!(segment = %name, "upload started");
        in_flight.spawn(async move {
            let (attempts, result) =
                put_with_retries(storage.as_ref(), &path, &folder, max_attempts, retry_delay).await;
            if result.is_ok() {
                // The local copy must not outlive its first successful upload.
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(segment = %name, error = %e, "failed to remove uploaded segment");
                }
            }
            UploadOutcome { name, attempts, result }
        });
    }

    fn complete(&mut self, outcome: UploadOutcome) -> Result<(), PipelineError> {
        let UploadOutcome { name, attempts, result } = outcome;
        let Some(segment) = self.segments.get_mut(&name) else {
            return Ok(());
        };
        segment.attempts = attempts;

        match result {
            Ok(url) => {
                segment.state = SegmentState::Uploaded;
                segment.remote_url = Some(url.clone());
                self.outstanding.fetch_sub(1, Ordering::SeqCst);
                tracing::info!(segment = %name, attempts, url = %url, "segment uploaded");
                self.progress.send(RawEvent::SegmentUploaded { segment: name, url });
                Ok(())
            }
            Err(source) => {
                segment.state = SegmentState::Failed;
                tracing::error!(segment = %name, attempts, error = %source, "segment upload failed");
                Err(UploadError::Segment { name, attempts, source }.into())
            }
        }
    }

    async fn publish_manifest(&mut self, manifest: SettledArtifact) -> Result<String, PipelineError> {
        debug_assert_eq!(self.outstanding.load(Ordering::SeqCst), 0);

        let playlist = MediaPlaylist::read_from(&manifest.path)
            .await
            .map_err(UploadError::UnreadableManifest)?;
        for uri in playlist.referenced_uris() {
            let name = file_name(Path::new(uri));
            let uploaded = self
                .segments
                .get(&name)
                .is_some_and(|segment| segment.state == SegmentState::Uploaded);
            if !uploaded {
                return Err(UploadError::UnconfirmedSegment(name).into());
            }
        }

        tracing::info!(
            manifest = %manifest.name(),
            segments = self.segments.len(),
            "all segments uploaded, publishing manifest"
        );
        let (attempts, result) = put_with_retries(
            self.storage.as_ref(),
            &manifest.path,
            &self.remote_folder,
            self.max_attempts,
            self.retry_delay,
        )
        .await;

        let url = result.map_err(|source| UploadError::Manifest { attempts, source })?;
        if let Err(e) = tokio::fs::remove_file(&manifest.path).await {
            tracing::warn!(error = %e, "failed to remove uploaded manifest");
        }
        Ok(url)
    }
}

async fn put_with_retries<S: StoragePort + ?Sized>(
    storage: &S,
    path: &Path,
    folder: &str,
    max_attempts: u32,
    retry_delay: Duration,
) -> (u32, Result<String, StorageError>) {
    let mut attempt = 1;
    loop {
        match storage.put(path, folder).await {
            Ok(url) => return (attempt, Ok(url)),
            Err(e) if attempt < max_attempts => {
                tracing::warn!(path = ?path, attempt, error = %e, "upload attempt failed, retrying");
                tokio::time::sleep(retry_delay * attempt).await;
                attempt += 1;
            }
            Err(e) => return (attempt, Err(e)),
        }
    }
}
