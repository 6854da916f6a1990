//! Archive fetcher.
//!
//! Downloads monthly archives into the scratch directory under names derived
//! from year, month and agency, so reruns overwrite instead of piling up.

use crate::error::{PipelineError, Result};
use crate::models::MonthlyRecord;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Options for downloading archives.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Directory the archives are written to.
    pub scratch_dir: PathBuf,
    /// Whether to show a progress bar per download.
    pub show_progress: bool,
}

/// Downloads monthly archives over HTTP.
pub struct Fetcher {
    http: reqwest::Client,
    options: FetchOptions,
}

/// Only references to zip archives are downloaded.
pub fn is_fetchable(url: &str) -> bool {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    };
    Path::new(&path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

/// Scratch file name for a monthly archive.
pub fn scratch_name(record: &MonthlyRecord, group: Option<&str>) -> String {
    let base = format!("{}_{}_{}.zip", record.year, record.month, record.agency_id);
    match group {
        Some(group) => format!("{}_{}", group, base),
        None => base,
    }
}

impl Fetcher {
    pub fn new(http: reqwest::Client, options: FetchOptions) -> Self {
        Self { http, options }
    }

    /// Download the archive referenced by `record` and return its local path.
    pub async fn fetch(&self, record: &MonthlyRecord, group: Option<&str>) -> Result<PathBuf> {
        let url = match record.package {
            Some(ref package) => package.url.as_str(),
            None => {
                return Err(PipelineError::Download {
                    url: String::new(),
                    reason: format!(
                        "{} {}/{} has no package reference",
                        record.agency_id, record.year, record.month
                    ),
                })
            }
        };
        let download_err = |reason: String| PipelineError::Download {
            url: url.to_string(),
            reason,
        };

        let path = self.options.scratch_dir.join(scratch_name(record, group));
        fs::create_dir_all(&self.options.scratch_dir).map_err(|e| {
            download_err(format!(
                "cannot create {}: {}",
                self.options.scratch_dir.display(),
                e
            ))
        })?;

        debug!("Downloading {} to {}", url, path.display());
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| download_err(e.to_string()))?;

        if !response.status().is_success() {
            return Err(download_err(format!("HTTP {}", response.status())));
        }

        let progress_bar = if self.options.show_progress {
            let pb = ProgressBar::new(response.content_length().unwrap_or(0));
            let style = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .map_err(|e| download_err(e.to_string()))?
                .progress_chars("#>-");
            pb.set_style(style);
            pb.set_message(scratch_name(record, group));
            Some(pb)
        } else {
            None
        };

        let mut out = fs::File::create(&path)
            .map_err(|e| download_err(format!("cannot create {}: {}", path.display(), e)))?;
        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| download_err(e.to_string()))?
        {
            out.write_all(&chunk)
                .map_err(|e| download_err(format!("write to {}: {}", path.display(), e)))?;
            written += chunk.len() as u64;
            if let Some(ref pb) = progress_bar {
                pb.set_position(written);
            }
        }
        out.flush()
            .map_err(|e| download_err(format!("write to {}: {}", path.display(), e)))?;

        if let Some(pb) = progress_bar {
            pb.finish_and_clear();
        }

        info!("Downloaded {} ({} bytes)", path.display(), written);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::record;
    use httpmock::prelude::*;

    #[test]
    fn test_is_fetchable() {
        assert!(is_fetchable("https://files.example/mppb/2021/1.zip"));
        assert!(is_fetchable("https://files.example/mppb/1.ZIP?sig=abc"));
        assert!(!is_fetchable("https://files.example/mppb/2021/1.csv"));
        assert!(!is_fetchable("https://files.example/mppb/"));
    }

    #[test]
    fn test_scratch_name() {
        let r = record("mppb", 2021, 3, Some("https://x/a.zip"));
        assert_eq!(scratch_name(&r, None), "2021_3_mppb.zip");
        assert_eq!(scratch_name(&r, Some("g1")), "g1_2021_3_mppb.zip");
    }

    #[tokio::test]
    async fn test_fetch_writes_archive() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/mppb/1.zip");
                then.status(200).body("zipbytes");
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("nested/scratch");
        let fetcher = Fetcher::new(
            reqwest::Client::new(),
            FetchOptions {
                scratch_dir: scratch.clone(),
                show_progress: false,
            },
        );

        let r = record("mppb", 2021, 1, Some(&server.url("/mppb/1.zip")));
        let path = fetcher.fetch(&r, None).await.unwrap();

        assert_eq!(path, scratch.join("2021_1_mppb.zip"));
        assert_eq!(std::fs::read(&path).unwrap(), b"zipbytes");
    }

    #[tokio::test]
    async fn test_fetch_non_success_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(404);
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(
            reqwest::Client::new(),
            FetchOptions {
                scratch_dir: dir.path().to_path_buf(),
                show_progress: false,
            },
        );

        let r = record("mppb", 2021, 1, Some(&server.url("/missing.zip")));
        let err = fetcher.fetch(&r, None).await.unwrap_err();
        assert_eq!(err.kind(), "download");
    }
}
