//! Drives one session from a persisted upload to a terminal progress event.

use super::coordinator::UploadCoordinator;
use super::sequencer::ProgressSender;
use super::watcher;
use crate::config::PipelineSettings;
use crate::domain::media::ensure_allowed_type;
use crate::domain::progress::RawEvent;
use crate::domain::session::{Session, SessionState};
use crate::error::{CleanupError, PipelineError, ValidationError};
use crate::ports::prober::MediaProber;
use crate::ports::storage::StoragePort;
use crate::ports::transcoder::Transcoder;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub const READING_MESSAGE: &str = "Reading file...";
pub const CHECKING_MESSAGE: &str = "Checking resolution...";
pub const PROCESSING_MESSAGE: &str = "Processing the video...";
pub const FINALIZING_MESSAGE: &str = "Video processing completed, uploading playlist...";

/// An upload already persisted to disk by the transport layer.
#[derive(Debug, Clone)]
pub struct IncomingUpload {
    pub path: PathBuf,
    /// Name the client sent, used for the type fallback on generic content types
    pub file_name: String,
    pub content_type: Option<String>,
}

pub struct SessionLifecycle<T, S, P> {
    transcoder: Arc<T>,
    storage: Arc<S>,
    prober: Arc<P>,
    work_root: PathBuf,
    storage_prefix: String,
    settings: PipelineSettings,
    shutdown: CancellationToken,
}

impl<T, S, P> Clone for SessionLifecycle<T, S, P> {
    fn clone(&self) -> Self {
        Self {
            transcoder: self.transcoder.clone(),
            storage: self.storage.clone(),
            prober: self.prober.clone(),
            work_root: self.work_root.clone(),
            storage_prefix: self.storage_prefix.clone(),
            settings: self.settings.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<T, S, P> SessionLifecycle<T, S, P>
where
    T: Transcoder + 'static,
    S: StoragePort + 'static,
    P: MediaProber + 'static,
{
    pub fn new(
        transcoder: Arc<T>,
        storage: Arc<S>,
        prober: Arc<P>,
        work_root: impl Into<PathBuf>,
        storage_prefix: impl Into<String>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            transcoder,
            storage,
            prober,
            work_root: work_root.into(),
            storage_prefix: storage_prefix.into(),
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    /// Sessions started from this lifecycle are cancelled together with `token`.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Run a session to completion. Exactly one terminal event is sent on
    /// `progress`, after cleanup has finished.
    pub async fn run(&self, upload: IncomingUpload, progress: ProgressSender) -> SessionState {
        let mut session = Session::new(upload.path.clone(), &self.work_root, &self.storage_prefix);
        let cancel = self.shutdown.child_token();
        let span = tracing::info_span!("session", id = %session.id);

        async {
            tracing::info!(input = ?upload.path, "session started");
            let outcome = self.execute(&mut session, &upload, &progress, &cancel).await;
            cancel.cancel();
            self.cleanup(&session).await;

            match outcome {
                Ok(url) => {
                    transition(&mut session, SessionState::Succeeded);
                    tracing::info!(url = %url, "session succeeded");
                    progress.send(RawEvent::Done { url });
                }
                Err(PipelineError::Cancelled) => {
                    transition(&mut session, SessionState::Cancelled);
                    tracing::info!("session cancelled");
                    progress.send(RawEvent::Failed {
                        err: PipelineError::Cancelled.to_string(),
                    });
                }
                Err(e) => {
                    transition(&mut session, SessionState::Failed);
                    tracing::error!(error = %e, "session failed");
                    progress.send(RawEvent::Failed { err: e.to_string() });
                }
            }
            session.state()
        }
        .instrument(span)
        .await
    }

    async fn validate(&self, upload: &IncomingUpload) -> Result<(), ValidationError> {
        ensure_allowed_type(upload.content_type.as_deref(), &upload.file_name)?;
        let dimensions = self.prober.dimensions(&upload.path).await?;
        tracing::debug!(width = dimensions.width, height = dimensions.height, "probed input");
        dimensions.ensure_min(self.settings.min_dimension)
    }

    async fn execute(
        &self,
        session: &mut Session,
        upload: &IncomingUpload,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        progress.info(CHECKING_MESSAGE);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            _ = progress.closed() => return Err(PipelineError::Cancelled),
            validated = self.validate(upload) => validated?,
        }

        tokio::fs::create_dir_all(&session.working_dir).await?;
        progress.info(PROCESSING_MESSAGE);

        let (watcher, mut artifacts) =
            watcher::observe(session.working_dir.clone(), self.settings.settle_interval);
        let (handle, completion) = UploadCoordinator::start(
            self.storage.clone(),
            session.remote_folder.clone(),
            &self.settings,
            progress.clone(),
            cancel.clone(),
        );
        transition(session, SessionState::Transcoding);

        let (input, working_dir) = (session.input_path.clone(), session.working_dir.clone());
        let transcode = self.transcoder.run(&input, &working_dir);
        tokio::pin!(transcode);
        let completion = completion.await_completion();
        tokio::pin!(completion);

        let mut transcoding = true;
        let mut watching = true;
        let mut resolved = false;

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(PipelineError::Cancelled),
                _ = progress.closed() => {
                    tracing::info!("client disconnected");
                    break Err(PipelineError::Cancelled);
                }
                result = &mut completion => {
                    resolved = true;
                    break result;
                }
                artifact = artifacts.recv(), if watching => match artifact {
                    Some(artifact) => handle.submit(artifact),
                    None => {
                        watching = false;
                        handle.close_input();
                    }
                },
                outcome = &mut transcode, if transcoding => {
                    transcoding = false;
                    match outcome {
                        Ok(()) => {
                            tracing::info!("transcoding finished");
                            transition(session, SessionState::Finalizing);
                            watcher.drain();
                            handle.transcode_finished(Ok(()));
                            progress.info(FINALIZING_MESSAGE);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "transcoding failed");
                            handle.transcode_finished(Err(e));
                        }
                    }
                }
            }
        };

        watcher.stop();
        if !resolved {
            // Let in-flight uploads wind down before their files are removed.
            cancel.cancel();
            let _ = (&mut completion).await;
        }
        watcher.join().await;

        result
    }

    async fn cleanup(&self, session: &Session) {
        if let Err(e) = remove_path(&session.working_dir, true).await {
            tracing::warn!(error = %e, "cleanup failed");
        }
        if let Err(e) = remove_path(&session.input_path, false).await {
            tracing::warn!(error = %e, "cleanup failed");
        }
    }
}

fn transition(session: &mut Session, next: SessionState) {
    if let Err(e) = session.advance(next) {
        tracing::warn!(error = %e, "ignored session transition");
    }
}

async fn remove_path(path: &Path, is_dir: bool) -> Result<(), CleanupError> {
    let removed = if is_dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match removed {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CleanupError {
            path: path.to_path_buf(),
            source,
        }),
    }
}
