//! In-memory record store

use super::{RecordStore, StoreError, StoreResult};
use crate::Record;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Upserts records into a map and remembers every call
///
/// Useful for tests and dry runs. [`MemoryRecordStore::set_failing`] makes
/// every later write fail.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<String, Record>>,
    calls: Mutex<Vec<Vec<String>>>,
    failing: AtomicBool,
}

impl MemoryRecordStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `persist_many` fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Stored record for `id`
    pub fn get(&self, id: &str) -> Option<Record> {
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
    }

    /// Number of distinct records stored
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Whether nothing has been stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored ids, sorted
    pub fn ids(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Ids passed to each `persist_many` call, in call order (failed calls included)
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn persist_many(&self, records: &[Record]) -> StoreResult<()> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(records.iter().map(|r| r.id.clone()).collect());

        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store set to fail".to_string(),
            ));
        }

        let mut stored = self.records.lock().unwrap_or_else(|p| p.into_inner());
        for record in records {
            stored.insert(record.id.clone(), record.clone());
        }

        debug!(records = records.len(), total = stored.len(), "Records upserted");
        Ok(())
    }
}
