//! Table merger.
//!
//! Concatenates per-month fragments of each table in chronological order,
//! keeping the header row of the first fragment only.

use crate::error::{PipelineError, Result};
use crate::models::{MergedTable, Row, TableFragment, TableSpec, DEFAULT_HEADER_MARKERS};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Merge fragments into one table per table name.
///
/// Fragment files are deleted once read.
pub fn merge(
    fragments: Vec<TableFragment>,
    tables: &[TableSpec],
) -> Result<BTreeMap<String, MergedTable>> {
    let mut by_table: BTreeMap<String, Vec<TableFragment>> = BTreeMap::new();
    for fragment in fragments {
        by_table
            .entry(fragment.table.clone())
            .or_default()
            .push(fragment);
    }

    let mut merged = BTreeMap::new();
    for (table, mut parts) in by_table {
        parts.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let fallback;
        let spec = match tables.iter().find(|s| s.name == table) {
            Some(spec) => spec,
            None => {
                fallback = TableSpec::new(
                    &table,
                    DEFAULT_HEADER_MARKERS.iter().map(|s| s.to_string()).collect(),
                );
                &fallback
            }
        };

        let result = merge_table(spec, &parts)?;
        info!(
            "Merged {} fragment(s) of {} into {} data rows",
            parts.len(),
            table,
            result.data_rows()
        );
        merged.insert(table, result);
    }

    Ok(merged)
}

/// Merge the already ordered fragments of a single table.
fn merge_table(spec: &TableSpec, parts: &[TableFragment]) -> Result<MergedTable> {
    let mut table = MergedTable {
        table: spec.name.clone(),
        rows: Vec::new(),
    };

    for (i, part) in parts.iter().enumerate() {
        let read = read_rows(&part.path);
        if let Err(e) = fs::remove_file(&part.path) {
            warn!("Failed to remove {}: {}", part.path.display(), e);
        }
        let mut rows = read.map_err(|reason| PipelineError::Merge {
            table: spec.name.clone(),
            reason: format!("{}: {}", part.path.display(), reason),
        })?;

        if table.rows.is_empty() {
            table.rows = rows;
            continue;
        }

        let repeats_header = rows
            .first()
            .and_then(|row| row.first())
            .is_some_and(|first| spec.is_header(first));
        if repeats_header {
            rows.remove(0);
        } else {
            debug!(
                "Fragment #{} of {} ({}/{}) has no header row, keeping all rows",
                i, spec.name, part.year, part.month
            );
        }
        table.rows.extend(rows);
    }

    Ok(table)
}

fn read_rows(path: &Path) -> std::result::Result<Vec<Row>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut rows = Vec::new();
    for result in reader.byte_records() {
        let record = result?;
        rows.push(record.iter().map(|field| field.to_vec()).collect());
    }
    Ok(rows)
}
