//! Turns concurrently produced raw events into the caller's ordered stream.

use crate::domain::progress::{ProgressEvent, RawEvent};
use futures::Stream;
use tokio::sync::mpsc;

/// Cloneable intake point shared by every producer of a session.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<RawEvent>,
}

impl ProgressSender {
    /// Queue an event. Returns `false` once the consumer is gone.
    pub fn send(&self, event: RawEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn info(&self, message: impl Into<String>) -> bool {
        self.send(RawEvent::info(message))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the consumer has been dropped, e.g. on client disconnect.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Owns the id counter. Ids are assigned when an event is dequeued, so the
/// delivered order is the id order no matter how producers interleave.
#[derive(Debug)]
pub struct ProgressSequencer {
    rx: mpsc::UnboundedReceiver<RawEvent>,
    next_id: i64,
    finished: bool,
}

impl ProgressSequencer {
    pub fn channel() -> (ProgressSender, ProgressSequencer) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ProgressSender { tx },
            ProgressSequencer {
                rx,
                next_id: 1,
                finished: false,
            },
        )
    }

    /// Next event for the caller, or `None` after the terminal event.
    ///
    /// If every producer goes away without reporting an outcome an `Error`
    /// terminal is synthesized, so a stream never ends without one.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }

        let raw = self.rx.recv().await.unwrap_or_else(|| RawEvent::Failed {
            err: "pipeline ended without a result".to_string(),
        });

        if raw.is_terminal() {
            self.finished = true;
            // Residual events still queued are dropped with the receiver.
            self.rx.close();
            return Some(raw.into_event(0));
        }

        let event = raw.into_event(self.next_id);
        self.next_id += 1;
        Some(event)
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        futures::stream::unfold(self, |mut sequencer| async move {
            sequencer.next().await.map(|event| (event, sequencer))
        })
    }
}
