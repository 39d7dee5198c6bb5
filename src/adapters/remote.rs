//! Remote object store reached over plain HTTP `PUT`.

use crate::domain::artifact::file_name;
use crate::error::StorageError;
use crate::ports::storage::StoragePort;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::path::Path;

/// Uploads each artifact with `PUT <endpoint>/<folder>/<file>`. Object stores
/// replace the object on a repeated `PUT`, so retries do not duplicate.
#[derive(Clone, Debug)]
pub struct HttpStorage {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpStorage {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn object_url(&self, remote_folder: &str, name: &str) -> String {
        format!("{}/{}/{}", self.endpoint, remote_folder.trim_matches('/'), name)
    }
}

pub(crate) fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("m4s") | Some("mp4") => "video/mp4",
        Some("ts") => "video/mp2t",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl StoragePort for HttpStorage {
    async fn put(&self, local_path: &Path, remote_folder: &str) -> Result<String, StorageError> {
        let body = tokio::fs::read(local_path).await?;
        let url = self.object_url(remote_folder, &file_name(local_path));

        let response = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, content_type(local_path))
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Rejected {
                path: local_path.to_path_buf(),
                status: status.as_u16(),
            });
        }
        Ok(url)
    }
}
