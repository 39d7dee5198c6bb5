use crate::domain::artifact::file_name;
use crate::error::StorageError;
use crate::ports::storage::StoragePort;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// Object store backed by a local directory, typically served under `/media`.
#[derive(Clone, Debug)]
pub struct FsStorage {
    root: PathBuf,
    public_base_url: String,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

/// Remote folders are relative, slash separated and never climb out of the root.
pub(crate) fn folder_is_valid(folder: &str) -> bool {
    Path::new(folder)
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
}

#[async_trait]
impl StoragePort for FsStorage {
    async fn put(&self, local_path: &Path, remote_folder: &str) -> Result<String, StorageError> {
        if !folder_is_valid(remote_folder) {
            return Err(StorageError::Other(format!("invalid remote folder {:?}", remote_folder)));
        }
        let name = file_name(local_path);
        let destination = self.root.join(remote_folder).join(&name);

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Copy overwrites, which keeps retries idempotent.
        tokio::fs::copy(local_path, &destination).await?;

        Ok(format!("{}/{}/{}", self.public_base_url, remote_folder, name))
    }
}
