//! Status card widget: live list counts shown as color-coded cards that the
//! owner can edit in place.
//!
//! [`WidgetController`] owns one widget instance. It loads the owner's
//! preference record, resolves the list catalog, fetches a count per card and
//! exposes the result as a [`WidgetView`]. Renderer interactions come back in
//! as [`WidgetEvent`]s.

mod config;
mod events;
mod signal;
mod view;

pub use config::WidgetConfig;
pub use events::{EventOutcome, NavigationTarget, Notice, WidgetEvent};
pub use signal::{SignalBus, WidgetSignal};
pub use view::{CardView, CountDisplay, SourceOption, WidgetMode, WidgetView};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use statuscard_core::{AlertCard, CardDefaults, ListCount, ListView};
use statuscard_sync::{
    Backend, BackendError, Catalog, CatalogCache, CatalogError, ListCounter, PreferenceSync,
    SaveOutcome,
};
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn applied(changed: bool) -> EventOutcome {
    if changed {
        EventOutcome::Applied
    } else {
        EventOutcome::Ignored
    }
}

struct WidgetState {
    mode: WidgetMode,
    /// Catalog the cards are rendered against. `None` until resolved or
    /// after a failed fetch.
    catalog: Option<Catalog>,
}

pub struct WidgetController<B: Backend + ?Sized> {
    config: WidgetConfig,
    instance: u64,
    backend: Arc<B>,
    prefs: PreferenceSync<B>,
    catalog: CatalogCache<B>,
    bus: SignalBus,
    disposal: CancellationToken,
    state: Mutex<WidgetState>,
    subscription: Mutex<Option<broadcast::Receiver<WidgetSignal>>>,
}

impl<B: Backend + ?Sized> WidgetController<B> {
    pub fn new(config: WidgetConfig, backend: Arc<B>, bus: SignalBus) -> Self {
        let disposal = CancellationToken::new();
        let prefs = PreferenceSync::new(Arc::clone(&backend), &config.owner_ref, disposal.clone());
        let catalog = CatalogCache::new(Arc::clone(&backend), disposal.clone());
        Self {
            config,
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            backend,
            prefs,
            catalog,
            bus,
            disposal,
            state: Mutex::new(WidgetState {
                mode: WidgetMode::Loading,
                catalog: None,
            }),
            subscription: Mutex::new(None),
        }
    }

    /// Identifies this instance in the signals it publishes.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    pub fn mode(&self) -> WidgetMode {
        lock(&self.state).mode
    }

    pub fn preferences(&self) -> &PreferenceSync<B> {
        &self.prefs
    }

    pub fn is_disposed(&self) -> bool {
        self.disposal.is_cancelled()
    }

    /// Start listening for updates from other instances, then render.
    pub async fn initialize(&self) {
        if self.is_disposed() {
            return;
        }
        {
            let mut subscription = lock(&self.subscription);
            if subscription.is_none() {
                *subscription = Some(self.bus.subscribe());
            }
        }
        info!(owner = %self.config.owner_ref, instance = self.instance, "widget initialized");
        self.reload().await;
    }

    /// Load the record and rebuild everything derived from it. Unsaved edits
    /// are discarded.
    pub async fn reload(&self) {
        if self.is_disposed() {
            return;
        }
        self.set_mode(WidgetMode::Loading);
        let record = self.prefs.load().await;
        if self.is_disposed() {
            return;
        }

        if record.payload.is_empty() {
            debug!(owner = %self.config.owner_ref, "no cards configured, opening editor");
            self.set_mode(WidgetMode::Edit);
            return;
        }

        let catalog = self.resolve_catalog().await;
        if self.is_disposed() {
            return;
        }
        {
            let mut state = lock(&self.state);
            state.mode = WidgetMode::View;
            state.catalog = catalog.clone();
        }
        if let Some(catalog) = catalog {
            let ids: Vec<u64> = record.payload.alerts().iter().map(AlertCard::id).collect();
            self.refresh_counts(&catalog, &ids).await;
        }
    }

    async fn resolve_catalog(&self) -> Option<Catalog> {
        match self.catalog.get().await {
            Ok(catalog) => Some(catalog),
            Err(e) => {
                warn!(owner = %self.config.owner_ref, error = %e, "list catalog unavailable, hiding cards");
                None
            }
        }
    }

    fn set_mode(&self, mode: WidgetMode) {
        lock(&self.state).mode = mode;
    }

    fn remember_catalog(&self, catalog: &Catalog) {
        lock(&self.state).catalog = Some(Arc::clone(catalog));
    }

    /// Fetch counts for the given cards concurrently. Each result lands on
    /// its card as soon as it arrives.
    async fn refresh_counts(&self, catalog: &[ListView], ids: &[u64]) {
        let (targets, orphans): (Vec<_>, Vec<_>) = self.prefs.read(|collection| {
            ids.iter()
                .filter_map(|id| collection.card(*id))
                .map(|card| {
                    let view = catalog.iter().find(|v| v.id == card.source_ref());
                    (
                        card.id(),
                        card.source_ref().to_string(),
                        view.map(|v| v.source_type.clone()),
                    )
                })
                .partition(|(_, _, source_type)| source_type.is_some())
        });

        for (id, source_ref, _) in orphans {
            warn!(card = id, source = %source_ref, "card source is not in the list catalog");
            self.apply_count(id, &source_ref, Err(BackendError::NotFound));
        }

        let fetches = targets
            .into_iter()
            .filter_map(|(id, source_ref, source_type)| Some((id, source_ref, source_type?)))
            .map(|(id, source_ref, source_type)| async move {
                let result = self.backend.fetch_count(&source_type, &source_ref).await;
                self.apply_count(id, &source_ref, result);
            });
        join_all(fetches).await;
    }

    fn apply_count(&self, id: u64, source_ref: &str, result: Result<ListCount, BackendError>) {
        let report = match result {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(card = id, source = %source_ref, error = %e, "count fetch failed");
                None
            }
        };
        let landed = self.prefs.refresh(|collection| match collection.card_mut(id) {
            // the card may have been repointed or deleted while the fetch ran
            Some(card) if card.source_ref() == source_ref => {
                card.refresh_count(report);
                true
            }
            _ => false,
        });
        if landed != Some(true) {
            debug!(card = id, source = %source_ref, "dropping stale count");
        }
    }

    /// Current render snapshot.
    pub fn view(&self) -> WidgetView {
        let (mode, catalog) = {
            let state = lock(&self.state);
            (state.mode, state.catalog.clone())
        };
        let settings = &self.config.settings;
        self.prefs.read(|collection| {
            view::build_view(
                mode,
                settings.transparent,
                &settings.labels,
                collection,
                catalog.as_deref().map(Vec::as_slice),
            )
        })
    }

    pub async fn handle(&self, event: WidgetEvent) -> EventOutcome {
        if self.is_disposed() {
            return EventOutcome::Ignored;
        }
        let mode = self.mode();
        if event.is_edit() && mode != WidgetMode::Edit {
            debug!(?event, ?mode, "ignoring edit outside edit mode");
            return EventOutcome::Ignored;
        }

        match event {
            WidgetEvent::ToggleEditMode => self.toggle_edit_mode(mode).await,
            WidgetEvent::AddCard => self.add_card().await,
            WidgetEvent::ChangeSourceRef { card, source_ref } => {
                self.change_source(card, &source_ref).await
            }
            WidgetEvent::ChangeSuffix { card, text } => {
                self.edit_card(card, |c| c.set_suffix_label(&text))
            }
            WidgetEvent::ChangeColorRule { card, index, update } => {
                self.edit_card(card, |c| c.set_color_rule(index, update))
            }
            WidgetEvent::ChangeBaseColor { card, color } => {
                self.edit_card(card, |c| c.set_base_color(&color))
            }
            WidgetEvent::ToggleDisplayMode { card } => self.edit_card(card, |c| {
                c.toggle_display_mode();
                true
            }),
            WidgetEvent::DeleteCard { card } => {
                applied(self.prefs.modify(|c| c.remove_card(card).is_some()))
            }
            WidgetEvent::NavigateToSource { card } => self.navigate(card, mode),
            WidgetEvent::Reload => {
                self.reload().await;
                EventOutcome::ModeChanged(self.mode())
            }
        }
    }

    fn edit_card(&self, id: u64, f: impl FnOnce(&mut AlertCard) -> bool) -> EventOutcome {
        applied(self.prefs.modify(|c| c.card_mut(id).map_or(false, f)))
    }

    async fn toggle_edit_mode(&self, mode: WidgetMode) -> EventOutcome {
        match mode {
            WidgetMode::Loading => EventOutcome::Ignored,
            WidgetMode::View => {
                self.set_mode(WidgetMode::Edit);
                EventOutcome::ModeChanged(WidgetMode::Edit)
            }
            WidgetMode::Edit => self.leave_edit_mode().await,
        }
    }

    /// Save, then switch to view mode. Other instances are told about the
    /// new record only once the save succeeded.
    async fn leave_edit_mode(&self) -> EventOutcome {
        match self.prefs.save().await {
            SaveOutcome::Failed(e) => {
                warn!(owner = %self.config.owner_ref, error = %e, "save failed, staying in edit mode");
                let labels = &self.config.settings.labels;
                return EventOutcome::SaveFailed(Notice {
                    title: labels.update_error_title.clone(),
                    message: labels.update_error_message.clone(),
                });
            }
            SaveOutcome::Saved => {
                let listeners = self.bus.publish(WidgetSignal::RecordUpdated {
                    owner_ref: self.config.owner_ref.clone(),
                    origin: self.instance,
                });
                debug!(instance = self.instance, listeners, "published record update");
            }
            SaveOutcome::Skipped => {}
        }
        if self.is_disposed() {
            return EventOutcome::Ignored;
        }

        if self.prefs.read(|c| c.is_empty()) {
            return EventOutcome::ModeChanged(WidgetMode::Edit);
        }
        self.set_mode(WidgetMode::View);

        let known = lock(&self.state).catalog.is_some();
        if !known {
            if let Some(catalog) = self.resolve_catalog().await {
                self.remember_catalog(&catalog);
                let ids: Vec<u64> = self.prefs.read(|c| c.alerts().iter().map(AlertCard::id).collect());
                self.refresh_counts(&catalog, &ids).await;
            }
        }
        EventOutcome::ModeChanged(WidgetMode::View)
    }

    async fn catalog_for_edit(&self) -> Result<Catalog, CatalogError> {
        self.catalog.get().await.map_err(|e| {
            warn!(owner = %self.config.owner_ref, error = %e, "list catalog unavailable for editing");
            e
        })
    }

    /// New card pointing at the first catalog entry, with the configured
    /// suffix and display mode.
    async fn add_card(&self) -> EventOutcome {
        let Ok(catalog) = self.catalog_for_edit().await else {
            return EventOutcome::CatalogUnavailable;
        };
        if self.is_disposed() {
            return EventOutcome::Ignored;
        }
        let Some(first) = catalog.first() else {
            debug!("list catalog is empty, no source for a new card");
            return EventOutcome::Ignored;
        };

        let settings = &self.config.settings;
        let defaults = CardDefaults {
            source_ref: first.id.clone(),
            display_mode: settings.default_display_mode,
            suffix_label: settings.labels.default_number_text.clone(),
        };
        let mut added = None;
        self.prefs.modify(|c| {
            added = c.create_card(defaults).map(AlertCard::id);
            added.is_some()
        });
        let Some(id) = added else {
            return EventOutcome::Ignored;
        };

        self.remember_catalog(&catalog);
        self.refresh_counts(&catalog, &[id]).await;
        EventOutcome::CardAdded(id)
    }

    async fn change_source(&self, id: u64, source_ref: &str) -> EventOutcome {
        let Ok(catalog) = self.catalog_for_edit().await else {
            return EventOutcome::CatalogUnavailable;
        };
        if !catalog.iter().any(|v| v.id == source_ref) {
            debug!(card = id, source = %source_ref, "source is not in the list catalog");
            return EventOutcome::Ignored;
        }
        let changed = self
            .prefs
            .modify(|c| c.card_mut(id).map_or(false, |card| card.set_source_ref(source_ref)));
        if !changed {
            return EventOutcome::Ignored;
        }

        self.remember_catalog(&catalog);
        self.refresh_counts(&catalog, &[id]).await;
        EventOutcome::Applied
    }

    fn navigate(&self, id: u64, mode: WidgetMode) -> EventOutcome {
        if mode != WidgetMode::View {
            return EventOutcome::Ignored;
        }
        let Some(catalog) = lock(&self.state).catalog.clone() else {
            return EventOutcome::Ignored;
        };
        let Some(source_ref) = self.prefs.read(|c| c.card(id).map(|card| card.source_ref().to_string())) else {
            return EventOutcome::Ignored;
        };
        match catalog.iter().find(|v| v.id == source_ref) {
            Some(view) => EventOutcome::Navigate(NavigationTarget {
                object_type: view.source_type.clone(),
                filter_name: view.id.clone(),
            }),
            None => EventOutcome::Ignored,
        }
    }

    fn wants(&self, signal: &WidgetSignal) -> bool {
        match signal {
            WidgetSignal::RecordUpdated { owner_ref, origin } => {
                *origin != self.instance && *owner_ref == self.config.owner_ref
            }
        }
    }

    /// Handle queued signals without waiting. Reloads once if any came from
    /// another instance for the same owner. Returns whether it reloaded.
    pub async fn drain_signals(&self) -> bool {
        let relevant = {
            let mut subscription = lock(&self.subscription);
            let Some(rx) = subscription.as_mut() else {
                return false;
            };
            let mut relevant = false;
            loop {
                match rx.try_recv() {
                    Ok(signal) => relevant |= self.wants(&signal),
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed record updates");
                        relevant = true;
                    }
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }
            relevant
        };
        if relevant {
            self.reload().await;
        }
        relevant
    }

    /// Listen for signals until the widget is torn down.
    pub async fn run(&self) {
        let Some(mut rx) = lock(&self.subscription).take() else {
            return;
        };
        loop {
            tokio::select! {
                _ = self.disposal.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(signal) => {
                        if self.wants(&signal) {
                            debug!(instance = self.instance, "record updated elsewhere, reloading");
                            self.reload().await;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed record updates, reloading");
                        self.reload().await;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!(instance = self.instance, "signal listener stopped");
    }

    /// Stop listening and make every result still in flight a no-op.
    pub fn teardown(&self) {
        if self.disposal.is_cancelled() {
            return;
        }
        self.disposal.cancel();
        *lock(&self.subscription) = None;
        info!(owner = %self.config.owner_ref, instance = self.instance, "widget torn down");
    }
}

impl<B: Backend + ?Sized> Drop for WidgetController<B> {
    fn drop(&mut self) {
        self.disposal.cancel();
    }
}
