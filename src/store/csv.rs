//! CSV file record store
//!
//! The whole file is the table: every write loads it, upserts by id and
//! replaces it atomically (temp file + rename), so a crash never leaves a
//! half-written file behind.

use super::{RecordStore, StoreError, StoreResult};
use crate::Record;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// One CSV row
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    id: String,
    upstream_id: Option<String>,
    fetched_at: DateTime<Utc>,
    /// Attributes as a JSON document
    attributes: String,
}

impl TryFrom<&Record> for CsvRow {
    type Error = StoreError;

    fn try_from(record: &Record) -> StoreResult<Self> {
        Ok(Self {
            id: record.id.clone(),
            upstream_id: record.upstream_id.clone(),
            fetched_at: record.fetched_at,
            attributes: serde_json::to_string(&record.attributes)
                .map_err(|e| StoreError::SerializationError(e.to_string()))?,
        })
    }
}

impl TryFrom<CsvRow> for Record {
    type Error = StoreError;

    fn try_from(row: CsvRow) -> StoreResult<Self> {
        Ok(Self {
            attributes: serde_json::from_str(&row.attributes).map_err(|e| {
                StoreError::SerializationError(format!("attributes for {}: {}", row.id, e))
            })?,
            id: row.id,
            upstream_id: row.upstream_id.filter(|s| !s.is_empty()),
            fetched_at: row.fetched_at,
        })
    }
}

/// Upserts records into a single CSV file
#[derive(Debug, Clone)]
pub struct CsvRecordStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl CsvRecordStore {
    /// Create a store backed by `path`, creating parent directories
    ///
    /// The file itself is created on the first write.
    pub fn new<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::IoError(format!("Failed to create directory: {}", e)))?;
        }

        info!("CSV record store: path={}", path.display());
        Ok(Self {
            path,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every stored record, keyed by id
    pub fn load(&self) -> StoreResult<BTreeMap<String, Record>> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        load_records(&self.path)
    }
}

#[async_trait]
impl RecordStore for CsvRecordStore {
    async fn persist_many(&self, records: &[Record]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let path = self.path.clone();
        let lock = self.write_lock.clone();
        let records = records.to_vec();

        tokio::task::spawn_blocking(move || {
            let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());
            upsert_records(&path, &records)
        })
        .await
        .map_err(|e| StoreError::IoError(format!("store task failed: {}", e)))?
    }
}

fn load_records(path: &Path) -> StoreResult<BTreeMap<String, Record>> {
    let mut records = BTreeMap::new();
    if !path.exists() {
        return Ok(records);
    }

    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| StoreError::CsvError(format!("Failed to open {}: {}", path.display(), e)))?;

    for row in reader.deserialize::<CsvRow>() {
        let row = row.map_err(|e| StoreError::CsvError(format!("Failed to read row: {}", e)))?;
        let record = Record::try_from(row)?;
        records.insert(record.id.clone(), record);
    }

    Ok(records)
}

fn upsert_records(path: &Path, records: &[Record]) -> StoreResult<()> {
    let mut table = load_records(path)?;
    for record in records {
        table.insert(record.id.clone(), record.clone());
    }

    let tmp_path = temp_path(path);
    let file = File::create(&tmp_path)
        .map_err(|e| StoreError::IoError(format!("Failed to create file: {}", e)))?;
    let mut writer = csv::Writer::from_writer(file);

    for record in table.values() {
        writer
            .serialize(CsvRow::try_from(record)?)
            .map_err(|e| StoreError::CsvError(format!("Failed to write record: {}", e)))?;
    }

    let file = writer
        .into_inner()
        .map_err(|e| StoreError::IoError(format!("Failed to flush: {}", e)))?;
    file.sync_all()
        .map_err(|e| StoreError::IoError(format!("Failed to sync file: {}", e)))?;

    std::fs::rename(&tmp_path, path)
        .map_err(|e| StoreError::IoError(format!("Failed to replace {}: {}", path.display(), e)))?;

    debug!(
        written = records.len(),
        total = table.len(),
        path = %path.display(),
        "CSV store updated"
    );
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "records.csv".into());
    name.push(".tmp");
    path.with_file_name(name)
}
