use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Transcoding,
    Finalizing,
    Succeeded,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Succeeded | SessionState::Failed | SessionState::Cancelled
        )
    }

    fn can_become(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Initializing, Transcoding) => true,
            (Transcoding, Finalizing) => true,
            (Finalizing, Succeeded) => true,
            (Initializing | Transcoding | Finalizing, Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("illegal session transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// One upload request and the on-disk resources it owns.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub input_path: PathBuf,
    pub working_dir: PathBuf,
    /// Folder artifacts are published under in remote storage
    pub remote_folder: String,
    pub created_at: DateTime<Utc>,
    state: SessionState,
}

impl Session {
    pub fn new(input_path: PathBuf, work_root: &Path, storage_prefix: &str) -> Self {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let working_dir = work_root.join(format!("{}_{}", id, created_at.format("%Y%m%dT%H%M%S")));
        let remote_folder = if storage_prefix.is_empty() {
            id.to_string()
        } else {
            format!("{}/{}", storage_prefix.trim_end_matches('/'), id)
        };

        Self {
            id,
            input_path,
            working_dir,
            remote_folder,
            created_at,
            state: SessionState::Initializing,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn advance(&mut self, next: SessionState) -> Result<(), InvalidTransition> {
        if !self.state.can_become(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(session = %self.id, from = %self.state, to = %next, "session transition");
        self.state = next;
        Ok(())
    }
}
