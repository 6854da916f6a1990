//! payroll-packager - aggregates monthly payroll archives into data packages
//!
//! Locates the monthly archives of an agency or group in the disclosure
//! database, merges their tables and publishes the result as a single
//! downloadable package.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Invalid arguments, configuration or any pipeline failure

mod cli;
mod config;
mod error;
mod models;
mod pipeline;
mod report;
mod storage;
mod store;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use cli::Args;
use config::{Config, DEFAULT_CONFIG_FILE};
use pipeline::{PackageOutcome, Pipeline, PipelineSettings};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use models::StorageBackend;
use storage::{HttpObjectStorage, ObjectStorage, S3ObjectStorage, S3Params};
use store::postgres::{PostgresParams, PostgresStore};
use tracing::{debug, error, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Load configuration first so it can raise verbosity
    let (mut config, config_source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    // Initialize logging
    if let Err(e) = init_logging(&args, &config) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    info!("payroll-packager v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", config_source);
    debug!("Mode: {}", args.mode.as_str());

    if let Err(e) = run(args, config).await {
        error!("Run failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .packager.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize tables, header markers, store and storage.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args, config: &Config) -> Result<()> {
    let level = args.log_level(config.general.verbose);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Run every requested scope, stopping at the first failure.
async fn run(args: Args, config: Config) -> Result<()> {
    let started_at = Utc::now();
    let start_time = Instant::now();

    let scopes = args.scopes().map_err(|e| anyhow!(e))?;

    // Scratch space lives as long as this guard.
    let scratch_guard = match config.pipeline.scratch_dir {
        Some(_) => None,
        None => Some(
            tempfile::Builder::new()
                .prefix("payroll-packager-")
                .tempdir()
                .context("Failed to create scratch directory")?,
        ),
    };
    let scratch_dir = match scratch_guard {
        Some(ref dir) => dir.path().to_path_buf(),
        None => config.pipeline.scratch_dir.clone().unwrap_or_default(),
    };
    debug!("Scratch directory: {}", scratch_dir.display());

    let http = reqwest::Client::builder()
        .user_agent(concat!("payroll-packager/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let params = PostgresParams {
        host: config.store.host.clone(),
        port: config.store.port,
        user: args
            .db_user
            .clone()
            .context("POSTGRES_USER (or --db-user) is not set")?,
        password: args.db_password.clone().unwrap_or_default(),
        database: config.store.database.clone(),
        max_connections: config.store.max_connections,
    };
    println!("🗄️  Connecting to {}:{}/{}", params.host, params.port, params.database);
    let store = Arc::new(
        PostgresStore::connect(&params)
            .await
            .context("Failed to connect to the store")?,
    );
    let storage = object_storage(&args, &config, &http)?;

    let tables = config.pipeline.tables();
    let settings = PipelineSettings {
        table_set: config.pipeline.table_set,
        tables,
        scratch_dir,
        output_dir: config.general.output_dir.clone(),
        descriptor_template: config.pipeline.descriptor_template.clone(),
        show_progress: !args.quiet,
    };
    let pipeline = Pipeline::new(store.clone(), storage, http, settings);

    let mut outcomes: Vec<PackageOutcome> = Vec::new();
    let mut result = Ok(());
    for scope in &scopes {
        println!("📦 Aggregating {}", scope);
        match pipeline.run(scope).await {
            Ok(built) => outcomes.extend(built),
            Err(e) => {
                error!(kind = e.kind(), "Aggregation of {} failed", scope);
                result = Err(anyhow::Error::new(e).context(format!("Aggregating {}", scope)));
                break;
            }
        }
    }
    store.close().await;
    result?;

    let duration = start_time.elapsed().as_secs_f64();
    let summary = report::summarize(args.mode.as_str(), started_at, duration, &outcomes);

    println!("\n📊 Run Summary:");
    for package in &summary.packages {
        println!(
            "   {} -> {} ({} months, {} bytes)",
            package.identity, package.url, package.months_merged, package.size
        );
    }
    println!("   Packages built: {}", summary.metadata.packages_built);
    println!("   Duration: {:.1}s", duration);

    if let Some(ref path) = args.summary {
        report::write_report(&summary, args.format, path)?;
        println!("\n✅ Summary saved to: {}", path.display());
    }

    Ok(())
}

/// Build the configured object storage backend.
fn object_storage(
    args: &Args,
    config: &Config,
    http: &reqwest::Client,
) -> Result<Arc<dyn ObjectStorage>> {
    let storage = &config.storage;
    info!("Object storage backend: {}", storage.backend);
    match storage.backend {
        StorageBackend::S3 => {
            let params = S3Params {
                region: storage
                    .region
                    .clone()
                    .context("AWS_REGION (or --aws-region) is not set")?,
                bucket: storage
                    .bucket
                    .clone()
                    .context("S3_BUCKET (or --s3-bucket) is not set")?,
                access_key_id: args
                    .aws_access_key_id
                    .clone()
                    .context("AWS_ACCESS_KEY_ID (or --aws-access-key-id) is not set")?,
                secret_access_key: args
                    .aws_secret_access_key
                    .clone()
                    .context("AWS_SECRET_ACCESS_KEY (or --aws-secret-access-key) is not set")?,
                endpoint: storage.endpoint.clone(),
                public_url: storage.public_url.clone(),
            };
            Ok(Arc::new(S3ObjectStorage::new(&params)))
        }
        StorageBackend::Http => {
            let base_url = storage
                .base_url
                .clone()
                .context("STORAGE_URL (or --storage-url) is not set")?;
            Ok(Arc::new(HttpObjectStorage::new(
                http.clone(),
                &base_url,
                storage.public_url.as_deref(),
                args.storage_token.clone(),
            )))
        }
    }
}

/// Load configuration from file or use defaults.
///
/// Runs before logging is set up, so it reports where the configuration came
/// from instead of logging it.
fn load_config(args: &Args) -> Result<(Config, String)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, config_path.display().to_string()));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, DEFAULT_CONFIG_FILE.to_string())),
        Ok(None) => Ok((Config::default(), "built-in defaults".to_string())),
        Err(e) => {
            eprintln!("⚠️  Failed to load config: {:#}", e);
            Ok((Config::default(), "built-in defaults".to_string()))
        }
    }
}
