//! Aggregation pipeline.
//!
//! locate -> fetch -> extract -> merge -> build -> register, once per scope
//! member, strictly in sequence. The first error aborts the whole run.

pub mod builder;
pub mod extractor;
pub mod fetcher;
pub mod locator;
pub mod merger;
pub mod registrar;

#[cfg(test)]
pub(crate) mod testing;

use crate::error::Result;
use crate::models::{AggregationIdentity, PackageRecord, Scope, TableFragment, TableSet, TableSpec};
use crate::storage::ObjectStorage;
use crate::store::Store;
use builder::PackageBuilder;
use fetcher::{FetchOptions, Fetcher};
use locator::ScopeMember;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Settings that parameterize a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub table_set: TableSet,
    pub tables: Vec<TableSpec>,
    /// Where monthly archives and fragments are written.
    pub scratch_dir: PathBuf,
    /// Where aggregated archives are written.
    pub output_dir: PathBuf,
    pub descriptor_template: Option<PathBuf>,
    pub show_progress: bool,
}

/// What one scope member produced.
#[derive(Debug, Clone)]
pub struct PackageOutcome {
    pub identity: AggregationIdentity,
    pub archive_path: PathBuf,
    pub record: PackageRecord,
    /// Monthly archives that contributed at least one table.
    pub months_merged: usize,
    /// Data rows per table.
    pub tables: BTreeMap<String, usize>,
}

/// The aggregation pipeline with its injected collaborators.
pub struct Pipeline {
    store: Arc<dyn Store>,
    storage: Arc<dyn ObjectStorage>,
    fetcher: Fetcher,
    builder: PackageBuilder,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn ObjectStorage>,
        http: reqwest::Client,
        settings: PipelineSettings,
    ) -> Self {
        let fetcher = Fetcher::new(
            http,
            FetchOptions {
                scratch_dir: settings.scratch_dir.clone(),
                show_progress: settings.show_progress,
            },
        );
        let builder = PackageBuilder::new(settings.table_set, settings.descriptor_template.clone());
        Self {
            store,
            storage,
            fetcher,
            builder,
            settings,
        }
    }

    /// Aggregate every member of `scope`, one after another.
    pub async fn run(&self, scope: &Scope) -> Result<Vec<PackageOutcome>> {
        let members = locator::resolve(self.store.as_ref(), scope).await?;

        let mut outcomes = Vec::new();
        for member in &members {
            if let Some(outcome) = self.aggregate(member).await? {
                outcomes.push(outcome);
            }
        }
        Ok(outcomes)
    }

    /// Run the full chain for one scope member.
    ///
    /// Returns `None` when no month of the member has a usable archive.
    pub async fn aggregate(&self, member: &ScopeMember) -> Result<Option<PackageOutcome>> {
        let identity = &member.identity;
        info!("Aggregating {}", identity);

        let records = locator::locate(self.store.as_ref(), member).await?;

        let mut fragments: Vec<TableFragment> = Vec::new();
        let mut months_merged = 0;
        for record in &records {
            let Some(ref package) = record.package else {
                continue;
            };
            if !fetcher::is_fetchable(&package.url) {
                debug!("{} is not a zip archive, skipping", package.url);
                continue;
            }

            let archive = self.fetcher.fetch(record, identity.group()).await?;
            let suffix = format!("{}_{}_{}", record.year, record.month, record.agency_id);
            let extracted = extractor::extract(
                &archive,
                &self.settings.tables,
                &self.settings.scratch_dir,
                &suffix,
            )?;

            if extracted.is_empty() {
                debug!("{} has none of the configured tables", archive.display());
                continue;
            }
            months_merged += 1;
            fragments.extend(extracted.into_iter().map(|(table, path)| TableFragment {
                table,
                year: record.year,
                month: record.month,
                agency_id: record.agency_id.clone(),
                path,
            }));
        }

        if fragments.is_empty() {
            warn!("Nothing to aggregate for {}, skipping", identity);
            return Ok(None);
        }

        let merged = merger::merge(fragments, &self.settings.tables)?;
        let archive_path = self.builder.build(
            &merged,
            &self.settings.tables,
            identity,
            &self.settings.output_dir,
        )?;
        let record = registrar::register(
            self.store.as_ref(),
            self.storage.as_ref(),
            &archive_path,
            identity,
        )
        .await?;

        Ok(Some(PackageOutcome {
            identity: identity.clone(),
            archive_path,
            record,
            months_merged,
            tables: merged
                .iter()
                .map(|(name, table)| (name.clone(), table.data_rows()))
                .collect(),
        }))
    }
}
