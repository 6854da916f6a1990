//! Data models for the package aggregator.
//!
//! This module contains the core data structures shared by the store,
//! the object storage and every pipeline stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

/// Header markers recognised in the first column of every table by default.
pub const DEFAULT_HEADER_MARKERS: &[&str] = &["aid", "chave_coleta", "IdContraCheque"];

/// Tables of the current monthly archive layout.
pub const CURRENT_TABLES: &[&str] = &["collection", "payslip", "compensation", "metadata"];

/// Table name used by the legacy single-table layout.
pub const LEGACY_TABLE: &str = "data";

/// An agency known to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agency {
    /// Short identifier, e.g. "mppb".
    pub id: String,
    /// Display name.
    pub name: String,
    /// Agency type (e.g. "Ministério", "Tribunal").
    #[serde(rename = "type")]
    pub agency_type: String,
    /// Entity the agency belongs to.
    pub entity: String,
    /// Federative unit, when the agency is state level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uf: Option<String>,
}

/// Content-addressed descriptor of an uploaded archive.
///
/// Used both for the monthly archives referenced by the store and for the
/// handle returned when the aggregated archive is uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub url: String,
    pub hash: String,
    pub size: i64,
}

/// Reference to a previously uploaded monthly archive.
pub type PackageRef = Backup;

/// Handle of a freshly uploaded aggregated archive.
pub type BackupHandle = Backup;

/// One month of one agency as recorded by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyRecord {
    pub agency_id: String,
    pub year: i32,
    pub month: u32,
    /// Absent when the month has no backup to aggregate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageRef>,
}

impl MonthlyRecord {
    /// Chronological ordering key; agency breaks ties inside a month.
    pub fn sort_key(&self) -> (i32, u32, &str) {
        (self.year, self.month, self.agency_id.as_str())
    }
}

/// A single table's content extracted from one month's archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFragment {
    pub table: String,
    pub year: i32,
    pub month: u32,
    pub agency_id: String,
    pub path: PathBuf,
}

impl TableFragment {
    pub fn sort_key(&self) -> (i32, u32, &str) {
        (self.year, self.month, self.agency_id.as_str())
    }
}

/// One CSV row as raw field bytes. Agencies publish in mixed encodings, so
/// fields are never decoded.
pub type Row = Vec<Vec<u8>>;

/// A table merged across months. The first row is the header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedTable {
    pub table: String,
    pub rows: Vec<Row>,
}

impl MergedTable {
    /// Number of rows after the header.
    pub fn data_rows(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }
}

/// Layout of the monthly archives being aggregated.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum TableSet {
    /// collection, payslip, compensation and metadata tables plus a descriptor
    #[default]
    Current,
    /// A single `data.csv` table, no descriptor
    Legacy,
}

impl fmt::Display for TableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableSet::Current => write!(f, "current"),
            TableSet::Legacy => write!(f, "legacy"),
        }
    }
}

/// Where built packages are uploaded.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// An S3 bucket
    #[default]
    S3,
    /// A plain HTTP PUT endpoint
    Http,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::S3 => write!(f, "s3"),
            StorageBackend::Http => write!(f, "http"),
        }
    }
}

impl TableSet {
    /// Table specs for this layout. Tables missing from `markers` use
    /// [`DEFAULT_HEADER_MARKERS`].
    pub fn specs(&self, markers: &HashMap<String, Vec<String>>) -> Vec<TableSpec> {
        let markers_for = |name: &str| {
            markers.get(name).cloned().unwrap_or_else(|| {
                DEFAULT_HEADER_MARKERS
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            })
        };
        match self {
            TableSet::Current => CURRENT_TABLES
                .iter()
                .map(|name| TableSpec::new(name, markers_for(name)))
                .collect(),
            TableSet::Legacy => vec![TableSpec::new(LEGACY_TABLE, markers_for(LEGACY_TABLE))],
        }
    }

    /// Whether packages of this layout carry a `datapackage.json` descriptor.
    pub fn has_descriptor(&self) -> bool {
        matches!(self, TableSet::Current)
    }
}

/// How one table is found in a monthly archive and written to the package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    /// Logical table name, also used to name fragments.
    pub name: String,
    /// Member name inside the monthly archive.
    pub member: String,
    /// File name inside the aggregated archive.
    pub output: String,
    /// First-column values that identify a header row.
    pub header_markers: Vec<String>,
}

impl TableSpec {
    pub fn new(name: &str, header_markers: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            member: format!("{}.csv", name),
            output: format!("{}.csv", name),
            header_markers,
        }
    }

    /// Returns true if `first_field` is one of this table's header markers.
    pub fn is_header(&self, first_field: impl AsRef<[u8]>) -> bool {
        let first_field = first_field.as_ref();
        self.header_markers
            .iter()
            .any(|m| m.as_bytes() == first_field)
    }
}

/// Selects which agencies an agency/year run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeSelector {
    Agency(String),
    AllAgencies,
    Group(String),
}

impl fmt::Display for ScopeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeSelector::Agency(id) => write!(f, "agency {}", id),
            ScopeSelector::AllAgencies => write!(f, "all agencies"),
            ScopeSelector::Group(g) => write!(f, "group {}", g),
        }
    }
}

/// What a run aggregates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// One package per selected agency for the year.
    AgencyYear { selector: ScopeSelector, year: i32 },
    /// One package for all of a group's agencies for the year.
    GroupYear { group: String, year: i32 },
    /// One package spanning every year of a single agency.
    AgencyHistory { agency_id: String },
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::AgencyYear { selector, year } => write!(f, "{} / {}", selector, year),
            Scope::GroupYear { group, year } => write!(f, "group {} / {}", group, year),
            Scope::AgencyHistory { agency_id } => write!(f, "agency {} / all years", agency_id),
        }
    }
}

/// Identity of one aggregated package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregationIdentity {
    AgencyYear { agency_id: String, year: i32 },
    GroupYear { group: String, year: i32 },
    Agency { agency_id: String },
}

impl AggregationIdentity {
    pub fn agency_id(&self) -> Option<&str> {
        match self {
            AggregationIdentity::AgencyYear { agency_id, .. }
            | AggregationIdentity::Agency { agency_id } => Some(agency_id),
            AggregationIdentity::GroupYear { .. } => None,
        }
    }

    pub fn group(&self) -> Option<&str> {
        match self {
            AggregationIdentity::GroupYear { group, .. } => Some(group),
            _ => None,
        }
    }

    pub fn year(&self) -> Option<i32> {
        match self {
            AggregationIdentity::AgencyYear { year, .. }
            | AggregationIdentity::GroupYear { year, .. } => Some(*year),
            AggregationIdentity::Agency { .. } => None,
        }
    }

    /// The agency or group the package belongs to.
    pub fn owner(&self) -> &str {
        match self {
            AggregationIdentity::AgencyYear { agency_id, .. }
            | AggregationIdentity::Agency { agency_id } => agency_id,
            AggregationIdentity::GroupYear { group, .. } => group,
        }
    }

    /// Deterministic archive file name, e.g. `mppb-2021.zip` or `mppb.zip`.
    pub fn archive_name(&self) -> String {
        match self.year() {
            Some(year) => format!("{}-{}.zip", self.owner(), year),
            None => format!("{}.zip", self.owner()),
        }
    }

    /// Object storage key for the archive.
    pub fn object_key(&self) -> String {
        format!("{}/datapackage/{}", self.owner(), self.archive_name())
    }
}

impl fmt::Display for AggregationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationIdentity::AgencyYear { agency_id, year } => {
                write!(f, "{}/{}", agency_id, year)
            }
            AggregationIdentity::GroupYear { group, year } => write!(f, "group {}/{}", group, year),
            AggregationIdentity::Agency { agency_id } => write!(f, "{}", agency_id),
        }
    }
}

/// Provenance record persisted for every registered package.
///
/// Exactly one of `agency_id`/`group` is set; `year` is set unless the
/// package spans the whole history of an agency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agency_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub package: BackupHandle,
}

impl PackageRecord {
    pub fn for_identity(identity: &AggregationIdentity, package: BackupHandle) -> Self {
        Self {
            agency_id: identity.agency_id().map(String::from),
            year: identity.year(),
            group: identity.group().map(String::from),
            package,
        }
    }
}

/// Metadata about a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Aggregation mode the run was started with.
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub packages_built: usize,
}

/// One aggregated package as reported at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSummary {
    /// Human readable identity, e.g. `mppb/2021`.
    pub identity: String,
    pub archive: String,
    pub url: String,
    pub hash: String,
    pub size: i64,
    pub months_merged: usize,
    /// Data rows per table.
    pub tables: BTreeMap<String, usize>,
}

/// Summary of a complete run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub metadata: RunMetadata,
    pub packages: Vec<PackageSummary>,
}

impl RunReport {
    pub fn total_rows(&self) -> usize {
        self.packages
            .iter()
            .flat_map(|p| p.tables.values())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> BackupHandle {
        Backup {
            url: "https://files.example/mppb/datapackage/mppb-2021.zip".to_string(),
            hash: "ab12".to_string(),
            size: 42,
        }
    }

    #[test]
    fn test_identity_archive_names() {
        let agency_year = AggregationIdentity::AgencyYear {
            agency_id: "mppb".to_string(),
            year: 2021,
        };
        assert_eq!(agency_year.archive_name(), "mppb-2021.zip");
        assert_eq!(agency_year.object_key(), "mppb/datapackage/mppb-2021.zip");

        let group_year = AggregationIdentity::GroupYear {
            group: "g1".to_string(),
            year: 2020,
        };
        assert_eq!(group_year.archive_name(), "g1-2020.zip");

        let agency = AggregationIdentity::Agency {
            agency_id: "trepb".to_string(),
        };
        assert_eq!(agency.archive_name(), "trepb.zip");
        assert_eq!(agency.object_key(), "trepb/datapackage/trepb.zip");
    }

    #[test]
    fn test_package_record_fields_follow_identity() {
        let record = PackageRecord::for_identity(
            &AggregationIdentity::AgencyYear {
                agency_id: "mppb".to_string(),
                year: 2021,
            },
            handle(),
        );
        assert_eq!(record.agency_id.as_deref(), Some("mppb"));
        assert_eq!(record.year, Some(2021));
        assert_eq!(record.group, None);

        let record = PackageRecord::for_identity(
            &AggregationIdentity::GroupYear {
                group: "g1".to_string(),
                year: 2020,
            },
            handle(),
        );
        assert_eq!(record.agency_id, None);
        assert_eq!(record.group.as_deref(), Some("g1"));
        assert_eq!(record.year, Some(2020));

        let record = PackageRecord::for_identity(
            &AggregationIdentity::Agency {
                agency_id: "mppb".to_string(),
            },
            handle(),
        );
        assert_eq!(record.year, None);
        assert_eq!(record.group, None);
    }

    #[test]
    fn test_table_spec_header_detection() {
        let spec = TableSpec::new(
            "collection",
            DEFAULT_HEADER_MARKERS.iter().map(|s| s.to_string()).collect(),
        );
        assert_eq!(spec.member, "collection.csv");
        assert!(spec.is_header("aid"));
        assert!(spec.is_header("chave_coleta"));
        assert!(!spec.is_header("mppb"));
    }

    #[test]
    fn test_monthly_record_ordering() {
        let mut records = vec![
            MonthlyRecord {
                agency_id: "b".to_string(),
                year: 2021,
                month: 1,
                package: None,
            },
            MonthlyRecord {
                agency_id: "a".to_string(),
                year: 2020,
                month: 12,
                package: None,
            },
            MonthlyRecord {
                agency_id: "a".to_string(),
                year: 2021,
                month: 1,
                package: None,
            },
        ];
        records.sort_by(|x, y| x.sort_key().cmp(&y.sort_key()));
        let keys: Vec<_> = records
            .iter()
            .map(|r| (r.year, r.month, r.agency_id.clone()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (2020, 12, "a".to_string()),
                (2021, 1, "a".to_string()),
                (2021, 1, "b".to_string()),
            ]
        );
    }
}
