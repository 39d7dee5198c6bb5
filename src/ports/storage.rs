use crate::error::StorageError;
use async_trait::async_trait;
use std::path::Path;

/// Remote object store the pipeline publishes artifacts to.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoragePort: Send + Sync {
    /// Upload a local file into `remote_folder`, keeping its file name, and
    /// return the public URL. Re-uploading the same file to the same folder
    /// overwrites the previous object.
    async fn put(&self, local_path: &Path, remote_folder: &str) -> Result<String, StorageError>;
}
