//! Persistent store collaborator.
//!
//! The store answers which monthly archives exist for an agency and year,
//! resolves groups to agencies and records produced packages.

pub mod postgres;

use crate::models::{Agency, MonthlyRecord, PackageRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub use postgres::PostgresStore;

/// Errors raised by store implementations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed row: {0}")]
    Decode(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Read and write access to the disclosure database.
#[async_trait]
pub trait Store: Send + Sync {
    /// Monthly records for the given agencies and year, keyed by agency id.
    async fn get_monthly_info(
        &self,
        agency_ids: &[String],
        year: i32,
    ) -> StoreResult<HashMap<String, Vec<MonthlyRecord>>>;

    /// Monthly records of every year for one agency.
    async fn get_agency_history(&self, agency_id: &str) -> StoreResult<Vec<MonthlyRecord>>;

    async fn get_all_agencies(&self) -> StoreResult<Vec<Agency>>;

    /// Fails with `StoreError::NotFound` for unknown ids.
    async fn get_agency(&self, id: &str) -> StoreResult<Agency>;

    /// Agencies belonging to `group` in `year`.
    async fn get_ope(&self, group: &str, year: i32) -> StoreResult<Vec<Agency>>;

    /// Plain insert; reruns for the same identity add another row.
    async fn store_package(&self, record: &PackageRecord) -> StoreResult<()>;
}
