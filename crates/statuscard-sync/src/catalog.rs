//! Single-flight cache for the list catalog.
//!
//! The first caller to find the cache empty becomes the leader and performs
//! the fetch. Callers arriving while that fetch is outstanding subscribe to
//! the leader's result instead of issuing their own. If the leader is dropped
//! before it finishes, a waiting caller takes over the fetch. Only a
//! non-empty catalog is kept; failures and empty catalogs are retried on the
//! next call.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use statuscard_core::ListView;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::ListCatalog;

pub type Catalog = Arc<Vec<ListView>>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog fetch failed: {0}")]
    Fetch(String),
}

type Outcome = Result<Catalog, CatalogError>;

enum Slot {
    Empty,
    Loading(watch::Receiver<Option<Outcome>>),
    Ready(Catalog),
}

enum Role {
    Leader(watch::Sender<Option<Outcome>>),
    Joiner(watch::Receiver<Option<Outcome>>),
}

pub struct CatalogCache<C: ListCatalog + ?Sized> {
    source: Arc<C>,
    slot: Mutex<Slot>,
    disposal: CancellationToken,
}

impl<C: ListCatalog + ?Sized> CatalogCache<C> {
    pub fn new(source: Arc<C>, disposal: CancellationToken) -> Self {
        Self {
            source,
            slot: Mutex::new(Slot::Empty),
            disposal,
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The catalog, fetching it if it is not cached yet.
    pub async fn get(&self) -> Outcome {
        loop {
            let role = {
                let mut slot = self.lock_slot();
                let pending = match &*slot {
                    Slot::Ready(catalog) => return Ok(Arc::clone(catalog)),
                    // a closed channel means the leader went away; take over
                    Slot::Loading(rx) if rx.has_changed().is_ok() => Some(rx.clone()),
                    _ => None,
                };
                match pending {
                    Some(rx) => Role::Joiner(rx),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        *slot = Slot::Loading(rx);
                        Role::Leader(tx)
                    }
                }
            };

            match role {
                Role::Leader(tx) => return self.lead(tx).await,
                Role::Joiner(rx) => {
                    if let Some(outcome) = Self::join(rx).await {
                        return outcome;
                    }
                    debug!("catalog fetch leader dropped, retrying");
                }
            }
        }
    }

    async fn lead(&self, tx: watch::Sender<Option<Outcome>>) -> Outcome {
        debug!("fetching list catalog");
        let outcome = match self.source.fetch_catalog().await {
            Ok(views) => Ok(Arc::new(views)),
            Err(e) => {
                warn!(error = %e, "list catalog fetch failed");
                Err(CatalogError::Fetch(e.to_string()))
            }
        };

        {
            let mut slot = self.lock_slot();
            *slot = match &outcome {
                Ok(catalog) if !catalog.is_empty() && !self.disposal.is_cancelled() => {
                    Slot::Ready(Arc::clone(catalog))
                }
                _ => Slot::Empty,
            };
        }
        tx.send_replace(Some(outcome.clone()));
        outcome
    }

    /// The leader's outcome, or None if the leader was dropped first.
    async fn join(mut rx: watch::Receiver<Option<Outcome>>) -> Option<Outcome> {
        debug!("joining outstanding catalog fetch");
        let shared = rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|value| (*value).clone());
        shared
    }
}
