//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and the mapping from flags to aggregation scopes.

use crate::models::{Scope, ScopeSelector, StorageBackend, TableSet};
use clap::parser::ValueSource;
use clap::{CommandFactory, FromArgMatches, Parser};
use std::path::PathBuf;

/// payroll-packager - aggregates monthly payroll archives into data packages
///
/// Downloads the monthly archives of one or more agencies, merges their
/// tables into yearly or multi-year CSVs, bundles them as a data package,
/// uploads it and records where it lives.
///
/// Examples:
///   payroll-packager --agency mppb --year 2021 --output out
///   payroll-packager --all-agencies --year 2021 --output out
///   payroll-packager --mode group-year --group mpe --year 2020 --output out
///   payroll-packager --mode agency --agency trepb --tables legacy
///   payroll-packager --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// What a run aggregates
    #[arg(long, value_enum, default_value_t = Mode::AgencyYear)]
    pub mode: Mode,

    /// Agency to aggregate
    ///
    /// A value taken from AID is ignored when --all-agencies or --group is
    /// given, and in group-year mode.
    #[arg(short, long, value_name = "ID", env = "AID")]
    pub agency: Option<String>,

    /// Aggregate every agency known to the store
    #[arg(long)]
    pub all_agencies: bool,

    /// Group of agencies to aggregate
    ///
    /// A value taken from GROUP is ignored when --all-agencies or --agency is
    /// given, and in agency mode.
    #[arg(short, long, value_name = "GROUP", env = "GROUP")]
    pub group: Option<String>,

    /// Year to aggregate
    #[arg(short, long, value_name = "YEAR", env = "YEAR")]
    pub year: Option<i32>,

    /// Directory the aggregated archives are written to
    #[arg(short, long, value_name = "DIR", env = "OUTPUT_FOLDER")]
    pub output: Option<PathBuf>,

    /// Directory for downloaded archives and table fragments
    ///
    /// Defaults to a temporary directory removed at the end of the run.
    #[arg(long, value_name = "DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Table layout of the monthly archives
    #[arg(long, value_enum, value_name = "SET")]
    pub tables: Option<TableSet>,

    /// JSON descriptor template for current-layout packages
    #[arg(long, value_name = "FILE")]
    pub descriptor: Option<PathBuf>,

    /// Also build the multi-year package of the agency
    ///
    /// Only valid for agency-year runs of a single agency.
    #[arg(long)]
    pub rollup: bool,

    /// Path to configuration file
    ///
    /// If not specified, looks for .packager.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Write a run summary to this file
    #[arg(long, value_name = "FILE")]
    pub summary: Option<PathBuf>,

    /// Summary format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    // === Store connection ===
    /// Postgres host
    #[arg(long, value_name = "HOST", env = "POSTGRES_HOST")]
    pub db_host: Option<String>,

    /// Postgres port
    #[arg(long, value_name = "PORT", env = "POSTGRES_PORT")]
    pub db_port: Option<u16>,

    /// Postgres database name
    #[arg(long, value_name = "NAME", env = "POSTGRES_DBNAME")]
    pub db_name: Option<String>,

    /// Postgres user
    #[arg(long, value_name = "USER", env = "POSTGRES_USER")]
    pub db_user: Option<String>,

    /// Postgres password
    #[arg(long, value_name = "PASSWORD", env = "POSTGRES_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    // === Object storage ===
    /// Object storage backend (s3, http)
    #[arg(long, value_enum, value_name = "BACKEND", env = "STORAGE_BACKEND")]
    pub storage_backend: Option<StorageBackend>,

    /// S3 region
    #[arg(long, value_name = "REGION", env = "AWS_REGION")]
    pub aws_region: Option<String>,

    /// S3 bucket packages are uploaded to
    #[arg(long, value_name = "BUCKET", env = "S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Custom S3 endpoint, e.g. a MinIO server
    #[arg(long, value_name = "URL", env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// S3 access key id
    #[arg(long, value_name = "KEY", env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub aws_access_key_id: Option<String>,

    /// S3 secret access key
    #[arg(long, value_name = "SECRET", env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub aws_secret_access_key: Option<String>,

    /// Base URL objects are uploaded to (http backend)
    #[arg(long, value_name = "URL", env = "STORAGE_URL")]
    pub storage_url: Option<String>,

    /// Base URL uploaded objects are served from
    ///
    /// Defaults to the upload URL.
    #[arg(long, value_name = "URL", env = "STORAGE_PUBLIC_URL")]
    pub storage_public_url: Option<String>,

    /// Bearer token for uploads (http backend)
    #[arg(long, value_name = "TOKEN", env = "STORAGE_TOKEN", hide_env_values = true)]
    pub storage_token: Option<String>,

    /// Generate a default .packager.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Aggregation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Mode {
    /// One package per agency for a year
    #[default]
    AgencyYear,
    /// One package for a whole group for a year
    GroupYear,
    /// One package with every year of an agency
    Agency,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::AgencyYear => "agency-year",
            Mode::GroupYear => "group-year",
            Mode::Agency => "agency",
        }
    }
}

/// Output format for the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    ///
    /// Selectors read from the environment give way to selectors given on
    /// the command line.
    pub fn parse_args() -> Self {
        let matches = Self::command().get_matches();
        let mut args = match Self::from_arg_matches(&matches) {
            Ok(args) => args,
            Err(e) => e.exit(),
        };
        let from_env = |id: &str| matches.value_source(id) == Some(ValueSource::EnvVariable);
        args.drop_env_selectors(from_env("agency"), from_env("group"));
        args
    }

    /// Clear an environment-sourced `agency` or `group` that another
    /// selector, or the mode, already rules out.
    pub fn drop_env_selectors(&mut self, agency_from_env: bool, group_from_env: bool) {
        let explicit_agency = self.agency.is_some() && !agency_from_env;
        let explicit_group = self.group.is_some() && !group_from_env;

        let drop_agency = agency_from_env
            && (self.all_agencies || explicit_group || self.mode == Mode::GroupYear);
        let drop_group = group_from_env
            && (self.all_agencies || explicit_agency || self.mode == Mode::Agency);

        if drop_agency {
            self.agency = None;
        }
        if drop_group {
            self.group = None;
        }
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(year) = self.year {
            if year <= 0 {
                return Err(format!("Invalid year: {}", year));
            }
        }

        match self.mode {
            Mode::AgencyYear => {
                self.require_year()?;
                let selectors = [
                    self.agency.is_some(),
                    self.all_agencies,
                    self.group.is_some(),
                ];
                if selectors.iter().filter(|s| **s).count() != 1 {
                    return Err(
                        "agency-year mode needs exactly one of --agency, --all-agencies or --group"
                            .to_string(),
                    );
                }
                if self.rollup && self.agency.is_none() {
                    return Err("--rollup requires a single --agency".to_string());
                }
            }
            Mode::GroupYear => {
                self.require_year()?;
                if self.group.is_none() {
                    return Err("group-year mode requires --group".to_string());
                }
                if self.agency.is_some() || self.all_agencies {
                    return Err("group-year mode takes --group only".to_string());
                }
            }
            Mode::Agency => {
                if self.agency.is_none() {
                    return Err("agency mode requires --agency".to_string());
                }
                if self.all_agencies || self.group.is_some() {
                    return Err("agency mode takes --agency only".to_string());
                }
            }
        }

        if self.rollup && self.mode != Mode::AgencyYear {
            return Err("--rollup is only valid in agency-year mode".to_string());
        }

        for url in [&self.storage_url, &self.s3_endpoint].into_iter().flatten() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!("URL must start with 'http://' or 'https://': {}", url));
            }
        }

        Ok(())
    }

    fn require_year(&self) -> Result<i32, String> {
        self.year
            .ok_or_else(|| format!("{} mode requires --year", self.mode.as_str()))
    }

    /// Scopes to run, in order. Call after `validate`.
    pub fn scopes(&self) -> Result<Vec<Scope>, String> {
        let mut scopes = Vec::new();
        match self.mode {
            Mode::AgencyYear => {
                let year = self.require_year()?;
                let selector = match (&self.agency, &self.group) {
                    (Some(agency), _) => ScopeSelector::Agency(agency.clone()),
                    (None, Some(group)) => ScopeSelector::Group(group.clone()),
                    (None, None) => ScopeSelector::AllAgencies,
                };
                scopes.push(Scope::AgencyYear { selector, year });
                if self.rollup {
                    if let Some(ref agency) = self.agency {
                        scopes.push(Scope::AgencyHistory {
                            agency_id: agency.clone(),
                        });
                    }
                }
            }
            Mode::GroupYear => {
                let year = self.require_year()?;
                let group = self.group.clone().ok_or("group-year mode requires --group")?;
                scopes.push(Scope::GroupYear { group, year });
            }
            Mode::Agency => {
                let agency_id = self.agency.clone().ok_or("agency mode requires --agency")?;
                scopes.push(Scope::AgencyHistory { agency_id });
            }
        }
        Ok(scopes)
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `--quiet` wins over a config file asking for verbose output.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            mode: Mode::AgencyYear,
            agency: Some("mppb".to_string()),
            all_agencies: false,
            group: None,
            year: Some(2021),
            output: Some(PathBuf::from("out")),
            scratch_dir: None,
            tables: None,
            descriptor: None,
            rollup: false,
            config: None,
            verbose: false,
            quiet: false,
            summary: None,
            format: OutputFormat::Markdown,
            db_host: None,
            db_port: None,
            db_name: None,
            db_user: None,
            db_password: None,
            storage_backend: None,
            aws_region: None,
            s3_bucket: None,
            s3_endpoint: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            storage_url: None,
            storage_public_url: None,
            storage_token: None,
            init_config: false,
        }
    }

    #[test]
    fn test_validation_ok() {
        assert!(make_args().validate().is_ok());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_agency_year_needs_one_selector() {
        let mut args = make_args();
        args.group = Some("g1".to_string());
        assert!(args.validate().is_err());

        args.agency = None;
        args.group = None;
        assert!(args.validate().is_err());

        args.all_agencies = true;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_year_required() {
        let mut args = make_args();
        args.year = None;
        assert!(args.validate().is_err());

        args.mode = Mode::Agency;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_rollup_requires_single_agency() {
        let mut args = make_args();
        args.rollup = true;
        assert!(args.validate().is_ok());

        args.agency = None;
        args.all_agencies = true;
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.mode = Mode::Agency;
        args.rollup = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_scopes() {
        let mut args = make_args();
        args.rollup = true;
        assert_eq!(
            args.scopes().unwrap(),
            vec![
                Scope::AgencyYear {
                    selector: ScopeSelector::Agency("mppb".to_string()),
                    year: 2021
                },
                Scope::AgencyHistory {
                    agency_id: "mppb".to_string()
                },
            ]
        );

        let mut args = make_args();
        args.mode = Mode::GroupYear;
        args.agency = None;
        args.group = Some("g1".to_string());
        assert!(args.validate().is_ok());
        assert_eq!(
            args.scopes().unwrap(),
            vec![Scope::GroupYear {
                group: "g1".to_string(),
                year: 2021
            }]
        );
    }

    #[test]
    fn test_invalid_storage_url() {
        let mut args = make_args();
        args.storage_url = Some("ftp://files".to_string());
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.s3_endpoint = Some("minio:9000".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_env_agency_gives_way_to_explicit_selectors() {
        let mut args = make_args();
        args.all_agencies = true;
        args.drop_env_selectors(true, false);
        assert_eq!(args.agency, None);
        assert!(args.validate().is_ok());

        let mut args = make_args();
        args.group = Some("g1".to_string());
        args.drop_env_selectors(true, false);
        assert_eq!(args.agency, None);
        assert_eq!(args.group.as_deref(), Some("g1"));
        assert!(args.validate().is_ok());

        let mut args = make_args();
        args.mode = Mode::GroupYear;
        args.group = Some("g1".to_string());
        args.drop_env_selectors(true, false);
        assert_eq!(args.agency, None);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_env_group_gives_way_to_explicit_agency() {
        let mut args = make_args();
        args.group = Some("g1".to_string());
        args.drop_env_selectors(false, true);
        assert_eq!(args.agency.as_deref(), Some("mppb"));
        assert_eq!(args.group, None);
        assert!(args.validate().is_ok());

        let mut args = make_args();
        args.mode = Mode::Agency;
        args.year = None;
        args.group = Some("g1".to_string());
        args.drop_env_selectors(true, true);
        assert_eq!(args.agency.as_deref(), Some("mppb"));
        assert_eq!(args.group, None);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_explicit_selectors_are_kept() {
        // Both given on the command line still conflict.
        let mut args = make_args();
        args.group = Some("g1".to_string());
        args.drop_env_selectors(false, false);
        assert!(args.agency.is_some() && args.group.is_some());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_parse_without_env_selectors() {
        let args = Args::try_parse_from(["payroll-packager", "--all-agencies", "--year", "2021"])
            .unwrap();
        assert!(args.all_agencies);
        assert_eq!(args.year, Some(2021));
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(false), tracing::Level::INFO);
        assert_eq!(args.log_level(true), tracing::Level::DEBUG);

        args.verbose = true;
        assert_eq!(args.log_level(false), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(true), tracing::Level::ERROR);
    }
}
