//! HTTP object storage client.
//!
//! Objects are PUT to `<base_url>/<key>` and served from
//! `<public_url>/<key>`.

use super::{hash_file, ObjectStorage, StorageError};
use crate::models::{Backup, BackupHandle};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};

/// Object storage reached over plain HTTP PUT.
#[derive(Clone)]
pub struct HttpObjectStorage {
    http: reqwest::Client,
    base_url: String,
    public_url: String,
    token: Option<String>,
}

impl HttpObjectStorage {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        public_url: Option<&str>,
        token: Option<String>,
    ) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        let public_url = public_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| base_url.clone());
        Self {
            http,
            base_url,
            public_url,
            token,
        }
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn upload_file(
        &self,
        local_path: &Path,
        key: &str,
    ) -> Result<BackupHandle, StorageError> {
        let (hash, size) = hash_file(local_path)?;
        let data = std::fs::read(local_path).map_err(|source| StorageError::Io {
            path: local_path.display().to_string(),
            source,
        })?;

        let url = format!("{}/{}", self.base_url, key);
        debug!("PUT {} ({} bytes)", url, size);

        let mut req = self
            .http
            .put(&url)
            .header("Content-Type", "application/zip")
            .header("x-content-sha256", &hash);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }

        let response = req
            .body(data)
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Http { status, body });
        }

        info!("Uploaded {} to {}", local_path.display(), key);

        Ok(Backup {
            url: format!("{}/{}", self.public_url, key),
            hash,
            size,
        })
    }
}
