use super::AppState;
use crate::application::lifecycle::{IncomingUpload, READING_MESSAGE};
use crate::application::sequencer::ProgressSequencer;
use crate::domain::media::ensure_allowed_type;
use crate::domain::progress::{ProgressEvent, RawEvent};
use crate::error::{PipelineError, ValidationError};
use crate::ports::prober::MediaProber;
use crate::ports::storage::StoragePort;
use crate::ports::transcoder::Transcoder;
use axum::{
    body::Bytes,
    extract::{Multipart, State},
    response::sse::{Event, KeepAlive, Sse},
    BoxError,
};
use futures::{Stream, StreamExt, TryStreamExt};
use std::convert::Infallible;
use std::io;
use std::path::{Component, Path};
use tokio::io::AsyncWriteExt;
use tokio::{fs::File, io::BufWriter};
use tokio_util::io::StreamReader;
use uuid::Uuid;

/// Open the progress stream at once, then persist the `file` field and run
/// the session in the background.
pub async fn upload_media<T, S, P>(
    State(state): State<AppState<T, S, P>>,
    multipart: Multipart,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Transcoder + 'static,
    S: StoragePort + 'static,
    P: MediaProber + 'static,
{
    let (progress, sequencer) = ProgressSequencer::channel();
    progress.info(READING_MESSAGE);

    tokio::spawn(async move {
        match receive_upload(&state.upload_dir, multipart).await {
            Ok(upload) => {
                tracing::info!(path = ?upload.path, "upload stored");
                state.lifecycle.run(upload, progress).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "upload rejected");
                progress.send(RawEvent::Failed { err: e.to_string() });
            }
        }
    });

    let stream = sequencer.into_stream().map(|event| Ok(to_sse(&event)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub(crate) fn to_sse(event: &ProgressEvent) -> Event {
    Event::default()
        .id(event.id.to_string())
        .event("status")
        .data(event.to_json())
}

async fn receive_upload(upload_dir: &Path, mut multipart: Multipart) -> Result<IncomingUpload, PipelineError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = if let Some(file_name) = field.file_name() {
            file_name.to_owned()
        } else {
            continue;
        };

        if !path_is_valid(Path::new(&file_name)) {
            return Err(ValidationError::InvalidName(file_name).into());
        }
        let content_type = field.content_type().map(str::to_owned);
        ensure_allowed_type(content_type.as_deref(), &file_name)?;

        tokio::fs::create_dir_all(upload_dir).await?;
        let path = upload_dir.join(stored_name(&file_name));
        tracing::debug!(path = ?path, "saving upload");
        if let Err(e) = stream_to_file(&path, field).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }

        return Ok(IncomingUpload {
            path,
            file_name,
            content_type,
        });
    }

    Err(ValidationError::MissingFile.into())
}

/// `<stem>-<uuid><ext>`, so concurrent uploads of one name never collide.
fn stored_name(file_name: &str) -> String {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("upload");
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default();
    format!("{}-{}{}", stem, Uuid::new_v4(), extension)
}

// Save a `Stream` to a file
async fn stream_to_file<S, E>(path: &Path, stream: S) -> io::Result<()>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    let body_with_io_error = stream.map_err(io::Error::other);
    let body_reader = StreamReader::new(body_with_io_error);
    futures::pin_mut!(body_reader);

    let mut file = BufWriter::new(File::create(path).await?);
    tokio::io::copy(&mut body_reader, &mut file).await?;
    file.flush().await?;

    Ok(())
}

/// A client file name must be a single plain component.
fn path_is_valid(path: &Path) -> bool {
    let mut components = path.components();
    let valid = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !valid {
        tracing::debug!(path = ?path, "invalid upload name");
    }
    valid
}
