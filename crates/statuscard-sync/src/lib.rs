pub mod backend;
pub mod catalog;
pub mod memory;
pub mod store;
pub mod sync;

pub use backend::{Backend, BackendError, ListCatalog, ListCounter, PreferenceStore};
pub use catalog::{Catalog, CatalogCache, CatalogError};
pub use memory::MemoryBackend;
pub use store::FileStore;
pub use sync::{LoadOutcome, PreferenceSync, SaveError, SaveOutcome};
