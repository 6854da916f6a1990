//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.packager.toml` files. Credentials never live here; they come from
//! flags or the environment.

use crate::models::{StorageBackend, TableSet, TableSpec};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = ".packager.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Postgres connection settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Object storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory aggregated archives are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            verbose: false,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

/// Aggregation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Table layout of the monthly archives.
    #[serde(default)]
    pub table_set: TableSet,

    /// Scratch directory; a temporary one is used when unset.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// Descriptor template overriding the built-in one.
    #[serde(default)]
    pub descriptor_template: Option<PathBuf>,

    /// Per-table header markers.
    #[serde(default)]
    pub header_markers: HashMap<String, Vec<String>>,
}

impl PipelineConfig {
    /// Table specs for the configured layout.
    pub fn tables(&self) -> Vec<TableSpec> {
        self.table_set.specs(&self.header_markers)
    }
}

/// Postgres connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default = "default_db_name")]
    pub database: String,

    /// Pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            database: default_db_name(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "dadosjusbr".to_string()
}

fn default_max_connections() -> u32 {
    5
}

/// Object storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Which backend uploads go to.
    #[serde(default)]
    pub backend: StorageBackend,

    /// S3 region.
    #[serde(default)]
    pub region: Option<String>,

    /// S3 bucket.
    #[serde(default)]
    pub bucket: Option<String>,

    /// Custom S3 endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Upload endpoint of the http backend.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Where uploaded objects are served from.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings and only
    /// override when given.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output_dir = output.clone();
        }
        if args.verbose {
            self.general.verbose = true;
        }

        if let Some(tables) = args.tables {
            self.pipeline.table_set = tables;
        }
        if let Some(ref scratch) = args.scratch_dir {
            self.pipeline.scratch_dir = Some(scratch.clone());
        }
        if let Some(ref descriptor) = args.descriptor {
            self.pipeline.descriptor_template = Some(descriptor.clone());
        }

        if let Some(ref host) = args.db_host {
            self.store.host = host.clone();
        }
        if let Some(port) = args.db_port {
            self.store.port = port;
        }
        if let Some(ref name) = args.db_name {
            self.store.database = name.clone();
        }

        if let Some(backend) = args.storage_backend {
            self.storage.backend = backend;
        }
        if let Some(ref region) = args.aws_region {
            self.storage.region = Some(region.clone());
        }
        if let Some(ref bucket) = args.s3_bucket {
            self.storage.bucket = Some(bucket.clone());
        }
        if let Some(ref endpoint) = args.s3_endpoint {
            self.storage.endpoint = Some(endpoint.clone());
        }
        if let Some(ref url) = args.storage_url {
            self.storage.base_url = Some(url.clone());
        }
        if let Some(ref url) = args.storage_public_url {
            self.storage.public_url = Some(url.clone());
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let mut config = Config::default();
        config.pipeline.header_markers = config
            .pipeline
            .tables()
            .into_iter()
            .map(|spec| (spec.name, spec.header_markers))
            .collect();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
