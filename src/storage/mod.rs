//! Object storage collaborator.
//!
//! Turns a local file into an addressable, content-hashed remote object.

pub mod http;
pub mod s3;

use crate::models::BackupHandle;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use thiserror::Error;

pub use http::HttpObjectStorage;
pub use s3::{S3ObjectStorage, S3Params};

/// Errors raised by object storage implementations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload `local_path` under `key` and return its handle.
    async fn upload_file(&self, local_path: &Path, key: &str)
        -> Result<BackupHandle, StorageError>;
}

/// Compute the sha256 hex digest and byte size of a file.
pub fn hash_file(path: &Path) -> Result<(String, i64), StorageError> {
    let io_err = |source| StorageError::Io {
        path: path.display().to_string(),
        source,
    };
    let mut file = std::fs::File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size: i64 = 0;
    loop {
        let n = file.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as i64;
    }
    Ok((hex::encode(hasher.finalize()), size))
}
