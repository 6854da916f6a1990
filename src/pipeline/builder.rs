//! Package builder.
//!
//! Writes merged tables as CSV, stamps the descriptor and bundles everything
//! into one zip archive.

use crate::error::{PipelineError, Result};
use crate::models::{AggregationIdentity, MergedTable, TableSet, TableSpec};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Name of the descriptor inside the aggregated archive.
pub const DESCRIPTOR_NAME: &str = "datapackage.json";

const DEFAULT_DESCRIPTOR: &str = include_str!("../../templates/datapackage.json");

/// Builds aggregated archives.
#[derive(Debug, Clone)]
pub struct PackageBuilder {
    table_set: TableSet,
    descriptor_template: Option<PathBuf>,
}

impl PackageBuilder {
    pub fn new(table_set: TableSet, descriptor_template: Option<PathBuf>) -> Self {
        Self {
            table_set,
            descriptor_template,
        }
    }

    /// Build `<out_dir>/<identity archive name>` from the merged tables,
    /// written in the order of `tables`.
    ///
    /// The archive is assembled in a staging directory and only moved into
    /// `out_dir` once complete, so a failed build leaves nothing behind.
    pub fn build(
        &self,
        merged: &BTreeMap<String, MergedTable>,
        tables: &[TableSpec],
        identity: &AggregationIdentity,
        out_dir: &Path,
    ) -> Result<PathBuf> {
        let build_err = |what: &str, e: &dyn std::fmt::Display| {
            PipelineError::Build(format!("{}: {}", what, e))
        };

        let descriptor = if self.table_set.has_descriptor() {
            Some(self.descriptor(identity)?)
        } else {
            None
        };

        fs::create_dir_all(out_dir)
            .map_err(|e| build_err(&format!("cannot create {}", out_dir.display()), &e))?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(out_dir)
            .map_err(|e| build_err("cannot create staging directory", &e))?;

        let staged_archive = staging.path().join(identity.archive_name());
        let file = fs::File::create(&staged_archive)
            .map_err(|e| build_err(&format!("cannot create {}", staged_archive.display()), &e))?;
        let mut zip = ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut written = BTreeSet::new();
        for spec in tables {
            let Some(table) = merged.get(&spec.name) else {
                debug!("No rows for {}, leaving it out of {}", spec.name, identity);
                continue;
            };

            let csv_path = staging.path().join(&spec.output);
            write_csv(&csv_path, table)
                .map_err(|e| build_err(&format!("writing {}", spec.output), &e))?;

            zip.start_file(spec.output.as_str(), options)
                .map_err(|e| build_err(&format!("adding {}", spec.output), &e))?;
            let mut csv_file = fs::File::open(&csv_path)
                .map_err(|e| build_err(&format!("reading {}", csv_path.display()), &e))?;
            io::copy(&mut csv_file, &mut zip)
                .map_err(|e| build_err(&format!("adding {}", spec.output), &e))?;
            drop(csv_file);

            if let Err(e) = fs::remove_file(&csv_path) {
                warn!("Failed to remove {}: {}", csv_path.display(), e);
            }
            written.insert(spec.output.clone());
        }

        if let Some(mut descriptor) = descriptor {
            retain_resources(&mut descriptor, &written);
            let bytes = serde_json::to_vec_pretty(&descriptor)
                .map_err(|e| build_err("serializing descriptor", &e))?;
            zip.start_file(DESCRIPTOR_NAME, options)
                .map_err(|e| build_err("adding descriptor", &e))?;
            zip.write_all(&bytes)
                .map_err(|e| build_err("adding descriptor", &e))?;
        }

        let file = zip
            .finish()
            .map_err(|e| build_err(&format!("finishing {}", staged_archive.display()), &e))?;
        drop(file);

        let archive_path = out_dir.join(identity.archive_name());
        fs::rename(&staged_archive, &archive_path)
            .map_err(|e| build_err(&format!("moving {} into place", archive_path.display()), &e))?;

        info!("Built {}", archive_path.display());
        Ok(archive_path)
    }

    fn descriptor(&self, identity: &AggregationIdentity) -> Result<Value> {
        let template = match self.descriptor_template {
            Some(ref path) => fs::read_to_string(path).map_err(|e| {
                PipelineError::Build(format!(
                    "cannot read descriptor template {}: {}",
                    path.display(),
                    e
                ))
            })?,
            None => DEFAULT_DESCRIPTOR.to_string(),
        };
        stamp_descriptor(&template, identity)
    }
}

/// Parse a descriptor template and inject the identity fields.
pub fn stamp_descriptor(template: &str, identity: &AggregationIdentity) -> Result<Value> {
    let mut descriptor: Value = serde_json::from_str(template)
        .map_err(|e| PipelineError::Build(format!("invalid descriptor template: {}", e)))?;
    let fields = descriptor.as_object_mut().ok_or_else(|| {
        PipelineError::Build("descriptor template is not a JSON object".to_string())
    })?;

    fields.insert(
        "aid".to_string(),
        identity
            .agency_id()
            .map(|a| Value::String(a.to_string()))
            .unwrap_or(Value::Null),
    );
    fields.insert(
        "year".to_string(),
        identity.year().map(Value::from).unwrap_or(Value::Null),
    );
    if let Some(group) = identity.group() {
        fields.insert("group".to_string(), Value::String(group.to_string()));
    }

    Ok(descriptor)
}

/// Drop descriptor resources whose `path` is not among `members`.
pub fn retain_resources(descriptor: &mut Value, members: &BTreeSet<String>) {
    let Some(resources) = descriptor
        .get_mut("resources")
        .and_then(Value::as_array_mut)
    else {
        return;
    };
    resources.retain(|resource| match resource.get("path").and_then(Value::as_str) {
        Some(path) => members.contains(path),
        None => true,
    });
}

fn write_csv(path: &Path, table: &MergedTable) -> std::result::Result<(), csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_path(path)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}
