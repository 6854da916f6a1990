//! Error types for the aggregation pipeline.
//!
//! Every variant is terminal for the current run: nothing is retried and
//! the process surface reports the error and exits.

use std::path::PathBuf;
use thiserror::Error;

use crate::storage::StorageError;
use crate::store::StoreError;

/// Errors that can occur while aggregating a scope.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The store query failed, or a selector resolved to no agencies.
    #[error("lookup failed: {context}")]
    Lookup {
        context: String,
        #[source]
        source: Option<StoreError>,
    },

    /// Network failure, non-success status, or local write failure.
    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    /// An archive member resolves outside the extraction directory.
    #[error("unsafe archive member '{member}' in {}", .archive.display())]
    UnsafeArchive { archive: PathBuf, member: String },

    /// The archive could not be opened or a matched member could not be read.
    #[error("extraction from {} failed: {reason}", .archive.display())]
    Extraction { archive: PathBuf, reason: String },

    /// A fragment file is unreadable or malformed.
    #[error("merge of table '{table}' failed: {reason}")]
    Merge { table: String, reason: String },

    /// Descriptor template or archive write failure.
    #[error("package build failed: {0}")]
    Build(String),

    /// The object storage rejected or failed the upload.
    #[error("upload failed: {0}")]
    Upload(#[from] StorageError),

    /// The package record could not be persisted.
    #[error("persisting package record failed: {0}")]
    Persist(#[source] StoreError),
}

impl PipelineError {
    pub fn lookup(context: impl Into<String>, source: StoreError) -> Self {
        Self::Lookup {
            context: context.into(),
            source: Some(source),
        }
    }

    pub fn unresolved(context: impl Into<String>) -> Self {
        Self::Lookup {
            context: context.into(),
            source: None,
        }
    }

    /// Short name of the error kind, used in logs and run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Lookup { .. } => "lookup",
            PipelineError::Download { .. } => "download",
            PipelineError::UnsafeArchive { .. } => "unsafe_archive",
            PipelineError::Extraction { .. } => "extraction",
            PipelineError::Merge { .. } => "merge",
            PipelineError::Build(_) => "build",
            PipelineError::Upload(_) => "upload",
            PipelineError::Persist(_) => "persist",
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
