//! Selective extractor.
//!
//! Pulls only the configured table members out of a monthly archive and
//! removes the archive afterwards.

use crate::error::{PipelineError, Result};
use crate::models::TableSpec;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use zip::ZipArchive;

/// Extract the members named by `tables` from `archive_path` into
/// `scratch_dir`, naming each fragment `<table>_<suffix>.csv`.
///
/// Returns table name to fragment path; tables without a member are absent.
/// The archive is deleted whether or not extraction succeeded.
pub fn extract(
    archive_path: &Path,
    tables: &[TableSpec],
    scratch_dir: &Path,
    suffix: &str,
) -> Result<BTreeMap<String, PathBuf>> {
    let result = extract_members(archive_path, tables, scratch_dir, suffix);

    if let Err(e) = fs::remove_file(archive_path) {
        warn!("Failed to remove {}: {}", archive_path.display(), e);
    }

    result
}

fn extract_members(
    archive_path: &Path,
    tables: &[TableSpec],
    scratch_dir: &Path,
    suffix: &str,
) -> Result<BTreeMap<String, PathBuf>> {
    let extraction_err = |reason: String| PipelineError::Extraction {
        archive: archive_path.to_path_buf(),
        reason,
    };

    let file = fs::File::open(archive_path).map_err(|e| extraction_err(e.to_string()))?;
    let mut archive =
        ZipArchive::new(file).map_err(|e| extraction_err(format!("not a zip archive: {}", e)))?;

    // Every member is checked, not only the ones we extract.
    let mut names = HashSet::new();
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| extraction_err(format!("member #{}: {}", i, e)))?;
        if !is_contained(entry.name(), entry.enclosed_name().as_deref()) {
            return Err(PipelineError::UnsafeArchive {
                archive: archive_path.to_path_buf(),
                member: entry.name().to_string(),
            });
        }
        names.insert(entry.name().to_string());
    }

    let mut fragments = BTreeMap::new();
    for spec in tables {
        if !names.contains(&spec.member) {
            debug!("{} has no {}", archive_path.display(), spec.member);
            continue;
        }

        let target = scratch_dir.join(format!("{}_{}.csv", spec.name, suffix));
        let mut member = archive
            .by_name(&spec.member)
            .map_err(|e| extraction_err(format!("{}: {}", spec.member, e)))?;
        let mut out = fs::File::create(&target)
            .map_err(|e| extraction_err(format!("cannot create {}: {}", target.display(), e)))?;
        io::copy(&mut member, &mut out)
            .map_err(|e| extraction_err(format!("{}: {}", spec.member, e)))?;

        debug!("Extracted {} to {}", spec.member, target.display());
        fragments.insert(spec.name.clone(), target);
    }

    Ok(fragments)
}

/// A member is contained when it has a relative, normalised path with no
/// parent-directory components.
fn is_contained(raw_name: &str, enclosed: Option<&Path>) -> bool {
    let Some(enclosed) = enclosed else {
        return false;
    };
    let raw_escapes = Path::new(raw_name)
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    !raw_escapes && enclosed.is_relative()
}
