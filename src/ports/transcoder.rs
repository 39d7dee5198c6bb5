use crate::error::TranscodeError;
use async_trait::async_trait;
use std::path::Path;

/// External process turning one input file into segments plus a manifest.
///
/// Only the terminal outcome is reported. Segment visibility comes from
/// watching `working_dir` while `run` is pending.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn run(&self, input: &Path, working_dir: &Path) -> Result<(), TranscodeError>;
}
