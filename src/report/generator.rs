//! Run summary generation.
//!
//! Turns the outcomes of a pipeline run into a `RunReport` and renders it as
//! JSON or Markdown.

use crate::cli::OutputFormat;
use crate::models::{PackageSummary, RunMetadata, RunReport};
use crate::pipeline::PackageOutcome;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;

/// Build the summary of a finished run.
pub fn summarize(
    mode: &str,
    started_at: DateTime<Utc>,
    duration_seconds: f64,
    outcomes: &[PackageOutcome],
) -> RunReport {
    let packages: Vec<PackageSummary> = outcomes
        .iter()
        .map(|outcome| PackageSummary {
            identity: outcome.identity.to_string(),
            archive: outcome
                .archive_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| outcome.identity.archive_name()),
            url: outcome.record.package.url.clone(),
            hash: outcome.record.package.hash.clone(),
            size: outcome.record.package.size,
            months_merged: outcome.months_merged,
            tables: outcome.tables.clone(),
        })
        .collect();

    RunReport {
        metadata: RunMetadata {
            mode: mode.to_string(),
            started_at,
            duration_seconds,
            packages_built: packages.len(),
        },
        packages,
    }
}

/// Generate a complete Markdown summary.
pub fn generate_markdown_report(report: &RunReport) -> String {
    let mut output = String::new();

    output.push_str("# Package Aggregation Summary\n\n");
    output.push_str(&generate_metadata_section(&report.metadata, report.total_rows()));
    output.push_str(&generate_packages_section(&report.packages));

    output
}

fn generate_metadata_section(metadata: &RunMetadata, total_rows: usize) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Mode:** `{}`\n", metadata.mode));
    section.push_str(&format!(
        "- **Started:** {}\n",
        metadata.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Packages Built:** {}\n", metadata.packages_built));
    section.push_str(&format!("- **Rows Merged:** {}\n", total_rows));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

fn generate_packages_section(packages: &[PackageSummary]) -> String {
    let mut section = String::new();

    section.push_str("## Packages\n\n");
    if packages.is_empty() {
        section.push_str("No packages were built.\n\n");
        return section;
    }

    section.push_str("| Package | Archive | Months | Size | SHA-256 |\n");
    section.push_str("|:---|:---|:---:|---:|:---|\n");
    for package in packages {
        section.push_str(&format!(
            "| {} | [{}]({}) | {} | {} | `{}` |\n",
            package.identity,
            package.archive,
            package.url,
            package.months_merged,
            package.size,
            package.hash
        ));
    }
    section.push('\n');

    for package in packages {
        section.push_str(&format!("### {}\n\n", package.identity));
        section.push_str("| Table | Rows |\n");
        section.push_str("|:---|---:|\n");
        for (table, rows) in &package.tables {
            section.push_str(&format!("| {} | {} |\n", table, rows));
        }
        section.push('\n');
    }

    section
}

/// Generate a JSON summary.
pub fn generate_json_report(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Render `report` in `format` and write it to `path`.
pub fn write_report(report: &RunReport, format: OutputFormat, path: &Path) -> Result<()> {
    let content = match format {
        OutputFormat::Json => generate_json_report(report)?,
        OutputFormat::Markdown => generate_markdown_report(report),
    };
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write summary to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AggregationIdentity, Backup, PackageRecord};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn outcome() -> PackageOutcome {
        let identity = AggregationIdentity::AgencyYear {
            agency_id: "mppb".to_string(),
            year: 2021,
        };
        let record = PackageRecord::for_identity(
            &identity,
            Backup {
                url: "https://files.example/mppb/datapackage/mppb-2021.zip".to_string(),
                hash: "ab12".to_string(),
                size: 2048,
            },
        );
        PackageOutcome {
            identity,
            archive_path: PathBuf::from("out/mppb-2021.zip"),
            record,
            months_merged: 12,
            tables: BTreeMap::from([("collection".to_string(), 12), ("payslip".to_string(), 340)]),
        }
    }

    #[test]
    fn test_summarize() {
        let report = summarize("agency-year", Utc::now(), 3.5, &[outcome()]);

        assert_eq!(report.metadata.packages_built, 1);
        assert_eq!(report.packages[0].identity, "mppb/2021");
        assert_eq!(report.packages[0].archive, "mppb-2021.zip");
        assert_eq!(report.total_rows(), 352);
    }

    #[test]
    fn test_generate_markdown_report() {
        let report = summarize("agency-year", Utc::now(), 3.5, &[outcome()]);
        let markdown = generate_markdown_report(&report);

        assert!(markdown.contains("# Package Aggregation Summary"));
        assert!(markdown.contains("- **Mode:** `agency-year`"));
        assert!(markdown.contains("- **Rows Merged:** 352"));
        assert!(markdown.contains("[mppb-2021.zip](https://files.example/mppb/datapackage/mppb-2021.zip)"));
        assert!(markdown.contains("| payslip | 340 |"));
    }

    #[test]
    fn test_markdown_without_packages() {
        let report = summarize("agency", Utc::now(), 0.1, &[]);
        let markdown = generate_markdown_report(&report);
        assert!(markdown.contains("No packages were built."));
    }

    #[test]
    fn test_generate_json_report() {
        let report = summarize("group-year", Utc::now(), 1.0, &[outcome()]);
        let json = generate_json_report(&report).unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["metadata"]["mode"], "group-year");
        assert_eq!(value["packages"][0]["tables"]["collection"], 12);
        assert_eq!(value["packages"][0]["size"], 2048);
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.md");
        let report = summarize("agency", Utc::now(), 0.1, &[outcome()]);

        write_report(&report, OutputFormat::Markdown, &path).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("# Package"));
    }
}
