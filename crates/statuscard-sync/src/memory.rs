//! In-process backend. Holds records, the catalog and list sizes in memory,
//! counts every call and can be told to fail. Used for demos and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use statuscard_core::{ListCount, ListView, RawRecord, SAVE_REJECTED};

use crate::backend::{BackendError, ListCatalog, ListCounter, PreferenceStore};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, RawRecord>>,
    /// `None` makes catalog fetches fail.
    catalog: Mutex<Option<Vec<ListView>>>,
    /// Keyed by source ref; a missing entry makes the count fetch fail.
    counts: Mutex<HashMap<String, ListCount>>,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
    reject_saves: AtomicBool,
    next_id: AtomicU64,
    load_calls: AtomicUsize,
    save_calls: AtomicUsize,
    catalog_calls: AtomicUsize,
    count_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_catalog(&self, catalog: Option<Vec<ListView>>) {
        *lock(&self.catalog) = catalog;
    }

    pub fn set_count(&self, source_ref: &str, count: ListCount) {
        lock(&self.counts).insert(source_ref.to_string(), count);
    }

    pub fn clear_count(&self, source_ref: &str) {
        lock(&self.counts).remove(source_ref);
    }

    pub fn put_record(&self, record: RawRecord) {
        lock(&self.records).insert(record.owner_ref.clone(), record);
    }

    pub fn record(&self, owner_ref: &str) -> Option<RawRecord> {
        lock(&self.records).get(owner_ref).cloned()
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Answer saves with the rejection id instead of storing them.
    pub fn reject_saves(&self, reject: bool) {
        self.reject_saves.store(reject, Ordering::SeqCst);
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    pub fn catalog_calls(&self) -> usize {
        self.catalog_calls.load(Ordering::SeqCst)
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }
}

// Every call yields once so callers observe a real suspension point.

#[async_trait]
impl PreferenceStore for MemoryBackend {
    async fn fetch_record(&self, owner_ref: &str) -> Result<Option<RawRecord>, BackendError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("load unavailable".to_string()));
        }
        Ok(self.record(owner_ref))
    }

    async fn persist_record(&self, mut record: RawRecord) -> Result<String, BackendError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("save unavailable".to_string()));
        }
        if self.reject_saves.load(Ordering::SeqCst) {
            return Ok(SAVE_REJECTED.to_string());
        }
        let id = match &record.id {
            Some(id) => id.clone(),
            None => format!("rec-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        };
        record.id = Some(id.clone());
        self.put_record(record);
        Ok(id)
    }
}

#[async_trait]
impl ListCatalog for MemoryBackend {
    async fn fetch_catalog(&self) -> Result<Vec<ListView>, BackendError> {
        self.catalog_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        lock(&self.catalog)
            .clone()
            .ok_or_else(|| BackendError::Transport("catalog unavailable".to_string()))
    }
}

#[async_trait]
impl ListCounter for MemoryBackend {
    async fn fetch_count(&self, _source_type: &str, source_ref: &str) -> Result<ListCount, BackendError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        lock(&self.counts)
            .get(source_ref)
            .cloned()
            .ok_or(BackendError::NotFound)
    }
}
