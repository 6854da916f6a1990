//! In-memory collaborators and archive helpers shared by pipeline tests.

use crate::models::{Agency, BackupHandle, MonthlyRecord, PackageRecord, PackageRef, TableSet, TableSpec};
use crate::storage::{hash_file, ObjectStorage, StorageError};
use crate::store::{Store, StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::Mutex;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

#[derive(Default)]
pub struct FakeStore {
    agencies: Vec<Agency>,
    months: Vec<MonthlyRecord>,
    groups: HashMap<(String, i32), Vec<String>>,
    stored: Mutex<Vec<PackageRecord>>,
    fail_persist: bool,
}

impl FakeStore {
    pub fn with_agency(mut self, id: &str) -> Self {
        self.agencies.push(Agency {
            id: id.to_string(),
            name: id.to_uppercase(),
            agency_type: "Tribunal".to_string(),
            entity: "Tribunal".to_string(),
            uf: None,
        });
        self
    }

    pub fn with_months(mut self, months: Vec<MonthlyRecord>) -> Self {
        self.months.extend(months);
        self
    }

    pub fn with_group(mut self, group: &str, year: i32, agency_ids: &[&str]) -> Self {
        self.groups.insert(
            (group.to_string(), year),
            agency_ids.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn failing_persist(mut self) -> Self {
        self.fail_persist = true;
        self
    }

    pub fn stored(&self) -> Vec<PackageRecord> {
        self.stored.lock().unwrap().clone()
    }
}

#[async_trait]
impl Store for FakeStore {
    async fn get_monthly_info(
        &self,
        agency_ids: &[String],
        year: i32,
    ) -> StoreResult<HashMap<String, Vec<MonthlyRecord>>> {
        let mut by_agency: HashMap<String, Vec<MonthlyRecord>> = HashMap::new();
        for record in &self.months {
            if record.year == year && agency_ids.contains(&record.agency_id) {
                by_agency
                    .entry(record.agency_id.clone())
                    .or_default()
                    .push(record.clone());
            }
        }
        Ok(by_agency)
    }

    async fn get_agency_history(&self, agency_id: &str) -> StoreResult<Vec<MonthlyRecord>> {
        Ok(self
            .months
            .iter()
            .filter(|r| r.agency_id == agency_id)
            .cloned()
            .collect())
    }

    async fn get_all_agencies(&self) -> StoreResult<Vec<Agency>> {
        Ok(self.agencies.clone())
    }

    async fn get_agency(&self, id: &str) -> StoreResult<Agency> {
        self.agencies
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("agency {}", id)))
    }

    async fn get_ope(&self, group: &str, year: i32) -> StoreResult<Vec<Agency>> {
        let ids = self
            .groups
            .get(&(group.to_string(), year))
            .cloned()
            .unwrap_or_default();
        Ok(self
            .agencies
            .iter()
            .filter(|a| ids.contains(&a.id))
            .cloned()
            .collect())
    }

    async fn store_package(&self, record: &PackageRecord) -> StoreResult<()> {
        if self.fail_persist {
            return Err(StoreError::Decode("insert rejected".to_string()));
        }
        self.stored.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Records uploaded keys; hashes the real file so missing files fail.
#[derive(Default)]
pub struct FakeStorage {
    keys: Mutex<Vec<String>>,
}

impl FakeStorage {
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn upload_file(
        &self,
        local_path: &Path,
        key: &str,
    ) -> Result<BackupHandle, StorageError> {
        let (hash, size) = hash_file(local_path)?;
        self.keys.lock().unwrap().push(key.to_string());
        Ok(BackupHandle {
            url: format!("https://storage.test/{}", key),
            hash,
            size,
        })
    }
}

pub fn record(agency_id: &str, year: i32, month: u32, url: Option<&str>) -> MonthlyRecord {
    MonthlyRecord {
        agency_id: agency_id.to_string(),
        year,
        month,
        package: url.map(|url| PackageRef {
            url: url.to_string(),
            hash: "h".to_string(),
            size: 1,
        }),
    }
}

pub fn current_specs() -> Vec<TableSpec> {
    TableSet::Current.specs(&HashMap::new())
}

pub fn zip_bytes(members: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in members {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub fn write_zip(path: &Path, members: &[(&str, &str)]) {
    std::fs::write(path, zip_bytes(members)).unwrap();
}

pub fn read_zip(path: &Path) -> BTreeMap<String, String> {
    let mut archive = ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    let mut members = BTreeMap::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        members.insert(entry.name().to_string(), content);
    }
    members
}
