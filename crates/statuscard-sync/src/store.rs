use std::path::PathBuf;

use async_trait::async_trait;
use statuscard_core::{read_record_raw, records_dir, write_record_raw, RawRecord};

use crate::backend::{BackendError, PreferenceStore};

/// Keeps one JSON file per owner under a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under ~/.statuscard/records/.
    pub fn open_default() -> Self {
        Self::new(records_dir())
    }
}

#[async_trait]
impl PreferenceStore for FileStore {
    async fn fetch_record(&self, owner_ref: &str) -> Result<Option<RawRecord>, BackendError> {
        read_record_raw(&self.dir, owner_ref).map_err(|e| BackendError::Storage(e.to_string()))
    }

    async fn persist_record(&self, mut record: RawRecord) -> Result<String, BackendError> {
        let id = record
            .id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();
        write_record_raw(&self.dir, &record).map_err(|e| BackendError::Storage(e.to_string()))?;
        Ok(id)
    }
}
