use async_trait::async_trait;
use statuscard_core::{ListCount, ListView, RawRecord};

/// Failures reported by the widget's external collaborators.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("not found")]
    NotFound,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Loads and saves the per-user preference record.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// `Ok(None)` when the owner has no record yet.
    async fn fetch_record(&self, owner_ref: &str) -> Result<Option<RawRecord>, BackendError>;

    /// Persist `record` and return its id. An id of
    /// [`statuscard_core::SAVE_REJECTED`] means the store refused it.
    async fn persist_record(&self, record: RawRecord) -> Result<String, BackendError>;
}

/// Enumerates the lists a card can point at.
#[async_trait]
pub trait ListCatalog: Send + Sync {
    async fn fetch_catalog(&self) -> Result<Vec<ListView>, BackendError>;
}

/// Reports the current size of one list.
#[async_trait]
pub trait ListCounter: Send + Sync {
    async fn fetch_count(&self, source_type: &str, source_ref: &str) -> Result<ListCount, BackendError>;
}

/// Everything a widget instance talks to.
pub trait Backend: PreferenceStore + ListCatalog + ListCounter {}

impl<T: PreferenceStore + ListCatalog + ListCounter + ?Sized> Backend for T {}
