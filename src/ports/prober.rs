use crate::domain::media::VideoDimensions;
use crate::error::ValidationError;
use async_trait::async_trait;
use std::path::Path;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// Dimensions of the first video stream of `path`.
    async fn dimensions(&self, path: &Path) -> Result<VideoDimensions, ValidationError>;
}
