//! S3 object storage.
//!
//! Objects are written to `<bucket>/<key>` with static credentials and served
//! either from a configured public URL or from the bucket's virtual-hosted
//! address.

use super::{hash_file, ObjectStorage, StorageError};
use crate::models::{Backup, BackupHandle};
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::Path;
use tracing::{debug, info};

/// Connection parameters for an S3 bucket.
#[derive(Debug, Clone)]
pub struct S3Params {
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Custom endpoint (MinIO, localstack); path-style addressing is used
    /// when set.
    pub endpoint: Option<String>,
    pub public_url: Option<String>,
}

/// Object storage backed by an S3 bucket.
#[derive(Clone)]
pub struct S3ObjectStorage {
    client: Client,
    bucket: String,
    public_url: String,
}

impl S3ObjectStorage {
    pub fn new(params: &S3Params) -> Self {
        let credentials = Credentials::new(
            params.access_key_id.clone(),
            params.secret_access_key.clone(),
            None,
            None,
            "payroll-packager",
        );
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(params.region.clone()))
            .credentials_provider(credentials);
        if let Some(ref endpoint) = params.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: params.bucket.clone(),
            public_url: public_base(params),
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_url, key)
    }
}

fn public_base(params: &S3Params) -> String {
    match params.public_url {
        Some(ref url) => url.trim_end_matches('/').to_string(),
        None => format!(
            "https://{}.s3.{}.amazonaws.com",
            params.bucket, params.region
        ),
    }
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
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

        debug!("PutObject s3://{}/{} ({} bytes)", self.bucket, key, size);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/zip")
            .metadata("sha256", &hash)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| match e.raw_response() {
                Some(response) => StorageError::Http {
                    status: response.status().as_u16(),
                    body: DisplayErrorContext(&e).to_string(),
                },
                None => StorageError::Network(DisplayErrorContext(&e).to_string()),
            })?;

        info!("Uploaded {} to s3://{}/{}", local_path.display(), self.bucket, key);

        Ok(Backup {
            url: self.object_url(key),
            hash,
            size,
        })
    }
}
