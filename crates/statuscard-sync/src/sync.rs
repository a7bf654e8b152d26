//! Preference sync: owns the in-memory record, tracks whether it diverged
//! from the stored copy and writes it back on request.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use statuscard_core::{AlertCollection, PreferenceRecord, SAVE_REJECTED};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, PreferenceStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The stored record was found and decoded.
    Restored,
    /// Nothing usable was stored; a fresh, dirty record was created.
    Fresh,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SaveError {
    #[error("encode payload: {0}")]
    Encode(String),

    #[error("store rejected the record")]
    Rejected,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved,
    /// Nothing to save; no call was made.
    Skipped,
    Failed(SaveError),
}

impl SaveOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SaveOutcome::Failed(_))
    }
}

struct SyncState {
    record: PreferenceRecord,
    dirty: bool,
    /// Bumped on every edit so a save only clears edits it actually wrote.
    revision: u64,
    loaded: Option<LoadOutcome>,
}

pub struct PreferenceSync<S: PreferenceStore + ?Sized> {
    store: Arc<S>,
    owner_ref: String,
    state: Mutex<SyncState>,
    load_gate: tokio::sync::Mutex<()>,
    save_gate: tokio::sync::Mutex<()>,
    disposal: CancellationToken,
}

impl<S: PreferenceStore + ?Sized> PreferenceSync<S> {
    /// Once `disposal` is cancelled, results arriving from the store no
    /// longer touch the record.
    pub fn new(store: Arc<S>, owner_ref: &str, disposal: CancellationToken) -> Self {
        Self {
            store,
            owner_ref: owner_ref.to_string(),
            state: Mutex::new(SyncState {
                record: PreferenceRecord::new(owner_ref),
                dirty: false,
                revision: 0,
                loaded: None,
            }),
            load_gate: tokio::sync::Mutex::new(()),
            save_gate: tokio::sync::Mutex::new(()),
            disposal,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn owner_ref(&self) -> &str {
        &self.owner_ref
    }

    /// Fetch and decode the owner's record. Any failure yields an empty,
    /// dirty record so the next save creates it.
    pub async fn load(&self) -> PreferenceRecord {
        let _gate = self.load_gate.lock().await;
        let fetched = self.store.fetch_record(&self.owner_ref).await;

        if self.disposal.is_cancelled() {
            debug!(owner = %self.owner_ref, "load finished after disposal, ignoring");
            return self.record();
        }

        let restored = match fetched {
            Ok(Some(raw)) => PreferenceRecord::from_raw(raw).map_err(|e| {
                warn!(owner = %self.owner_ref, error = %e, "stored preferences could not be decoded");
            }),
            Ok(None) => {
                debug!(owner = %self.owner_ref, "no stored preferences");
                Err(())
            }
            Err(e) => {
                warn!(owner = %self.owner_ref, error = %e, "loading preferences failed");
                Err(())
            }
        };

        let mut state = self.lock_state();
        state.revision += 1;
        match restored {
            Ok(record) => {
                info!(owner = %self.owner_ref, cards = record.payload.alerts().len(), "preferences loaded");
                state.record = record;
                state.dirty = false;
                state.loaded = Some(LoadOutcome::Restored);
            }
            Err(()) => {
                state.record = PreferenceRecord::new(&self.owner_ref);
                state.dirty = true;
                state.loaded = Some(LoadOutcome::Fresh);
            }
        }
        state.record.clone()
    }

    /// Outcome of the most recent load, if any completed.
    pub fn last_load(&self) -> Option<LoadOutcome> {
        self.lock_state().loaded
    }

    pub fn mark_dirty(&self) {
        let mut state = self.lock_state();
        state.dirty = true;
        state.revision += 1;
    }

    pub fn is_dirty(&self) -> bool {
        self.lock_state().dirty
    }

    pub fn record(&self) -> PreferenceRecord {
        self.lock_state().record.clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&AlertCollection) -> R) -> R {
        f(&self.lock_state().record.payload)
    }

    /// Apply a persisted edit. `f` returns whether it changed anything; the
    /// record is marked dirty if so. Ignored after disposal.
    pub fn modify(&self, f: impl FnOnce(&mut AlertCollection) -> bool) -> bool {
        if self.disposal.is_cancelled() {
            return false;
        }
        let mut state = self.lock_state();
        let changed = f(&mut state.record.payload);
        if changed {
            state.dirty = true;
            state.revision += 1;
        }
        changed
    }

    /// Apply a change to transient card state (fetched counts). Never marks
    /// the record dirty. Returns None after disposal.
    pub fn refresh<R>(&self, f: impl FnOnce(&mut AlertCollection) -> R) -> Option<R> {
        if self.disposal.is_cancelled() {
            return None;
        }
        Some(f(&mut self.lock_state().record.payload))
    }

    /// Write the record back if it is dirty. Saves are serialized: a save
    /// issued while another is pending waits for it, then re-checks.
    pub async fn save(&self) -> SaveOutcome {
        let _gate = self.save_gate.lock().await;

        let (raw, revision) = {
            let state = self.lock_state();
            if !state.dirty {
                debug!(owner = %self.owner_ref, "preferences unchanged, skipping save");
                return SaveOutcome::Skipped;
            }
            match state.record.to_raw() {
                Ok(raw) => (raw, state.revision),
                Err(e) => {
                    warn!(owner = %self.owner_ref, error = %e, "encoding preferences failed");
                    return SaveOutcome::Failed(SaveError::Encode(e.to_string()));
                }
            }
        };

        match self.store.persist_record(raw).await {
            Ok(id) if id == SAVE_REJECTED => {
                warn!(owner = %self.owner_ref, "store rejected preferences");
                SaveOutcome::Failed(SaveError::Rejected)
            }
            Ok(id) => {
                if self.disposal.is_cancelled() {
                    return SaveOutcome::Saved;
                }
                let mut state = self.lock_state();
                if !state.record.assign_id(&id) {
                    warn!(owner = %self.owner_ref, returned = %id, "store returned a different record id");
                }
                if state.revision == revision {
                    state.dirty = false;
                }
                info!(owner = %self.owner_ref, id = %id, "preferences saved");
                SaveOutcome::Saved
            }
            Err(e) => {
                warn!(owner = %self.owner_ref, error = %e, "saving preferences failed");
                SaveOutcome::Failed(SaveError::Backend(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use statuscard_core::{CardDefaults, DisplayMode, RawRecord};

    fn sync_for(backend: &Arc<MemoryBackend>) -> PreferenceSync<MemoryBackend> {
        PreferenceSync::new(Arc::clone(backend), "005A", CancellationToken::new())
    }

    fn add_card(sync: &PreferenceSync<MemoryBackend>, source: &str) -> bool {
        sync.modify(|c| {
            c.create_card(CardDefaults {
                source_ref: source.to_string(),
                display_mode: DisplayMode::Light,
                suffix_label: "items".to_string(),
            })
            .is_some()
        })
    }

    #[tokio::test]
    async fn not_found_yields_fresh_dirty_record() {
        let backend = Arc::new(MemoryBackend::new());
        let sync = sync_for(&backend);
        let record = sync.load().await;
        assert!(record.id().is_none());
        assert_eq!(record.owner_ref(), "005A");
        assert_eq!(record.payload.counter(), 0);
        assert!(record.payload.is_empty());
        assert!(sync.is_dirty());
        assert_eq!(sync.last_load(), Some(LoadOutcome::Fresh));
    }

    #[tokio::test]
    async fn transport_and_decode_failures_are_normalized() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_loads(true);
        let sync = sync_for(&backend);
        assert!(sync.load().await.payload.is_empty());
        assert!(sync.is_dirty());

        backend.fail_loads(false);
        backend.put_record(RawRecord {
            id: Some("a0X1".to_string()),
            owner_ref: "005A".to_string(),
            encoded_payload: "%%%".to_string(),
        });
        let record = sync.load().await;
        assert!(record.id().is_none());
        assert!(sync.is_dirty());
    }

    #[tokio::test]
    async fn card_id_at_counter_limit_loads_fresh() {
        use base64::Engine;

        let json = format!(
            r##"{{"counter":0,"alerts":[{{"id":{},"listId":"00B1","bg":{{"0":{{"color":"#1589ee"}},
            "1":{{"op":"<","color":"#c23934"}},"2":{{"op":"<","color":"#fff03f"}},"3":{{"op":">=","color":"#4bca81"}}}}}}]}}"##,
            u64::MAX
        );
        let backend = Arc::new(MemoryBackend::new());
        backend.put_record(RawRecord {
            id: Some("a0X1".to_string()),
            owner_ref: "005A".to_string(),
            encoded_payload: base64::engine::general_purpose::STANDARD.encode(json),
        });
        let sync = sync_for(&backend);
        let record = sync.load().await;
        assert_eq!(sync.last_load(), Some(LoadOutcome::Fresh));
        assert!(record.payload.is_empty());
        assert!(sync.is_dirty());
        assert!(add_card(&sync, "00B1"));
    }

    #[tokio::test]
    async fn first_save_creates_record_and_later_saves_reuse_id() {
        let backend = Arc::new(MemoryBackend::new());
        let sync = sync_for(&backend);
        sync.load().await;
        assert!(add_card(&sync, "00B1"));

        assert_eq!(sync.save().await, SaveOutcome::Saved);
        assert!(!sync.is_dirty());
        let id = sync.record().id().map(str::to_string);
        assert!(id.is_some());

        assert!(add_card(&sync, "00B2"));
        assert_eq!(sync.save().await, SaveOutcome::Saved);
        assert_eq!(sync.record().id().map(str::to_string), id);
        assert_eq!(backend.save_calls(), 2);

        let reloaded = sync_for(&backend).load().await;
        assert_eq!(reloaded.payload, sync.record().payload);
        assert_eq!(reloaded.id(), sync.record().id());
    }

    #[tokio::test]
    async fn clean_record_skips_save() {
        let backend = Arc::new(MemoryBackend::new());
        let sync = sync_for(&backend);
        assert_eq!(sync.save().await, SaveOutcome::Skipped);
        assert_eq!(backend.save_calls(), 0);
    }

    #[tokio::test]
    async fn failed_save_keeps_edits_dirty() {
        let backend = Arc::new(MemoryBackend::new());
        let sync = sync_for(&backend);
        sync.load().await;
        add_card(&sync, "00B1");

        backend.fail_saves(true);
        assert!(sync.save().await.is_failure());
        assert!(sync.is_dirty());
        assert_eq!(sync.read(|c| c.alerts().len()), 1);

        backend.fail_saves(false);
        assert_eq!(sync.save().await, SaveOutcome::Saved);
        assert!(!sync.is_dirty());
    }

    #[tokio::test]
    async fn rejected_save_is_a_failure() {
        let backend = Arc::new(MemoryBackend::new());
        backend.reject_saves(true);
        let sync = sync_for(&backend);
        sync.load().await;
        assert_eq!(sync.save().await, SaveOutcome::Failed(SaveError::Rejected));
        assert!(sync.is_dirty());
        assert!(sync.record().id().is_none());
    }

    #[tokio::test]
    async fn concurrent_saves_run_one_at_a_time() {
        let backend = Arc::new(MemoryBackend::new());
        let sync = sync_for(&backend);
        sync.load().await;
        let (a, b) = futures::join!(sync.save(), sync.save());
        assert_eq!(a, SaveOutcome::Saved);
        assert_eq!(b, SaveOutcome::Skipped);
        assert_eq!(backend.save_calls(), 1);
    }

    #[tokio::test]
    async fn edit_during_save_stays_dirty() {
        let backend = Arc::new(MemoryBackend::new());
        let sync = sync_for(&backend);
        sync.load().await;
        let edit = async {
            tokio::task::yield_now().await;
            add_card(&sync, "00B1")
        };
        let (added, outcome) = futures::join!(edit, sync.save());
        assert_eq!(outcome, SaveOutcome::Saved);
        assert!(added);
        assert!(sync.is_dirty());
    }

    #[tokio::test]
    async fn counts_do_not_dirty_the_record() {
        let backend = Arc::new(MemoryBackend::new());
        let sync = sync_for(&backend);
        sync.load().await;
        add_card(&sync, "00B1");
        sync.save().await;
        sync.refresh(|c| c.card_mut(0).map(|card| card.refresh_count(None)));
        assert!(!sync.is_dirty());
    }

    #[tokio::test]
    async fn disposed_sync_ignores_late_results() {
        let backend = Arc::new(MemoryBackend::new());
        let token = CancellationToken::new();
        let sync = PreferenceSync::new(Arc::clone(&backend), "005A", token.clone());
        token.cancel();
        sync.load().await;
        assert_eq!(sync.last_load(), None);
        assert!(!sync.is_dirty());
        assert!(!add_card(&sync, "00B1"));
    }
}
