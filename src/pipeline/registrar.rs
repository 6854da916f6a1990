//! Backup registrar: uploads the aggregated archive and records it.

use crate::error::{PipelineError, Result};
use crate::models::{AggregationIdentity, PackageRecord};
use crate::storage::ObjectStorage;
use crate::store::Store;
use std::path::Path;
use tracing::{error, info};

/// Upload `archive_path` and persist a provenance record for `identity`.
///
/// There is no rollback: if persisting fails the uploaded object stays in
/// storage without a record.
pub async fn register(
    store: &dyn Store,
    storage: &dyn ObjectStorage,
    archive_path: &Path,
    identity: &AggregationIdentity,
) -> Result<PackageRecord> {
    let key = identity.object_key();
    let handle = storage.upload_file(archive_path, &key).await?;
    info!("Uploaded {} as {} ({} bytes)", identity, handle.url, handle.size);

    let record = PackageRecord::for_identity(identity, handle);
    if let Err(e) = store.store_package(&record).await {
        error!(
            "Package for {} uploaded to {} but not recorded",
            identity, record.package.url
        );
        return Err(PipelineError::Persist(e));
    }

    info!("Registered package for {}", identity);
    Ok(record)
}
