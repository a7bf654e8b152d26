use std::sync::Arc;

use statuscard::{
    CountDisplay, EventOutcome, NavigationTarget, Notice, SignalBus, WidgetConfig, WidgetController,
    WidgetEvent, WidgetMode,
};
use statuscard_core::{
    AlertCollection, CardDefaults, DisplayMode, Labels, ListCount, ListView, PreferenceRecord,
    RuleUpdate, Threshold, DEFAULT_ALERT_COLOR, DEFAULT_BASE_COLOR,
};
use statuscard_sync::MemoryBackend;

const OWNER: &str = "005A";

fn list(id: &str, label: &str, source_type: &str) -> ListView {
    ListView {
        id: id.to_string(),
        label: label.to_string(),
        source_type: source_type.to_string(),
        object_label: None,
    }
}

fn backend() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.set_catalog(Some(vec![
        list("00B1", "Open Cases", "Case"),
        list("00B2", "New Leads", "Lead"),
    ]));
    backend.set_count(
        "00B1",
        ListCount {
            label: "Cases".to_string(),
            size: Some(12),
        },
    );
    backend.set_count(
        "00B2",
        ListCount {
            label: "Leads".to_string(),
            size: Some(3),
        },
    );
    backend
}

/// Store a record for OWNER with one card per source.
fn seed(backend: &MemoryBackend, sources: &[&str]) {
    let mut payload = AlertCollection::default();
    for source in sources {
        payload.create_card(CardDefaults {
            source_ref: source.to_string(),
            display_mode: DisplayMode::Light,
            suffix_label: "items".to_string(),
        });
    }
    let mut record = PreferenceRecord::new(OWNER);
    record.payload = payload;
    let mut raw = record.to_raw().unwrap();
    raw.id = Some("rec-seed".to_string());
    backend.put_record(raw);
}

fn widget(backend: &Arc<MemoryBackend>, bus: &SignalBus) -> WidgetController<MemoryBackend> {
    WidgetController::new(WidgetConfig::new(OWNER), Arc::clone(backend), bus.clone())
}

#[tokio::test]
async fn fresh_owner_opens_the_editor() {
    let backend = backend();
    let widget = widget(&backend, &SignalBus::new());
    widget.initialize().await;

    assert_eq!(widget.mode(), WidgetMode::Edit);
    assert!(widget.view().cards.is_empty());
    assert!(widget.preferences().is_dirty());
    assert_eq!(backend.catalog_calls(), 0);
}

#[tokio::test]
async fn stored_cards_render_with_counts() {
    let backend = backend();
    seed(&backend, &["00B1", "00B2"]);
    let widget = widget(&backend, &SignalBus::new());
    widget.initialize().await;

    assert_eq!(widget.mode(), WidgetMode::View);
    let view = widget.view();
    assert_eq!(view.cards.len(), 2);
    assert_eq!(view.cards[0].title, "Open Cases");
    assert_eq!(view.cards[0].count, CountDisplay::Count(12));
    assert_eq!(view.cards[0].count_text, "12 items");
    assert_eq!(view.cards[0].object_label.as_deref(), Some("Cases"));
    assert_eq!(view.cards[1].count, CountDisplay::Count(3));
    assert_eq!(backend.catalog_calls(), 1);
    assert_eq!(backend.count_calls(), 2);
    assert!(!widget.preferences().is_dirty());
}

#[tokio::test]
async fn failed_count_only_affects_its_card() {
    let backend = backend();
    backend.clear_count("00B2");
    seed(&backend, &["00B1", "00B2"]);
    let widget = widget(&backend, &SignalBus::new());
    widget.initialize().await;

    let view = widget.view();
    assert_eq!(view.cards[0].count, CountDisplay::Count(12));
    assert_eq!(view.cards[1].count, CountDisplay::AccessError);
    assert_eq!(view.cards[1].count_text, Labels::default().access_error);
    assert_eq!(view.cards[1].color, DEFAULT_BASE_COLOR);
}

#[tokio::test]
async fn catalog_failure_hides_cards() {
    let backend = backend();
    backend.set_catalog(None);
    seed(&backend, &["00B1"]);
    let widget = widget(&backend, &SignalBus::new());
    widget.initialize().await;

    assert_eq!(widget.mode(), WidgetMode::View);
    let view = widget.view();
    assert!(view.cards.is_empty());
    assert!(view.catalog_unavailable);
    assert_eq!(backend.count_calls(), 0);
}

#[tokio::test]
async fn add_card_uses_first_catalog_entry() {
    let backend = backend();
    let widget = widget(&backend, &SignalBus::new());
    widget.initialize().await;

    assert_eq!(widget.handle(WidgetEvent::AddCard).await, EventOutcome::CardAdded(0));
    assert_eq!(widget.handle(WidgetEvent::AddCard).await, EventOutcome::CardAdded(1));

    let view = widget.view();
    assert_eq!(view.cards.len(), 2);
    assert_eq!(view.cards[0].title, "Open Cases");
    assert_eq!(view.cards[0].suffix_label, "items");
    assert_eq!(view.cards[0].count, CountDisplay::Count(12));
    assert!(view.cards[0].source_options[0].selected);
    assert_eq!(backend.catalog_calls(), 1);
}

#[tokio::test]
async fn add_card_without_catalog_reports_it() {
    let backend = backend();
    backend.set_catalog(None);
    let widget = widget(&backend, &SignalBus::new());
    widget.initialize().await;

    assert_eq!(widget.handle(WidgetEvent::AddCard).await, EventOutcome::CatalogUnavailable);
    backend.set_catalog(Some(Vec::new()));
    assert_eq!(widget.handle(WidgetEvent::AddCard).await, EventOutcome::Ignored);
    assert!(widget.preferences().read(|c| c.is_empty()));
}

#[tokio::test]
async fn leaving_edit_mode_saves_first() {
    let backend = backend();
    let widget = widget(&backend, &SignalBus::new());
    widget.initialize().await;
    widget.handle(WidgetEvent::AddCard).await;

    assert_eq!(
        widget.handle(WidgetEvent::ToggleEditMode).await,
        EventOutcome::ModeChanged(WidgetMode::View)
    );
    assert_eq!(widget.mode(), WidgetMode::View);
    assert_eq!(backend.save_calls(), 1);
    assert!(!widget.preferences().is_dirty());
    assert_eq!(widget.preferences().record().id(), Some("rec-1"));

    let stored = PreferenceRecord::from_raw(backend.record(OWNER).unwrap()).unwrap();
    assert_eq!(stored.payload.alerts().len(), 1);
    assert_eq!(stored.payload.counter(), 1);
}

#[tokio::test]
async fn leaving_edit_mode_without_cards_stays_in_editor() {
    let backend = backend();
    let widget = widget(&backend, &SignalBus::new());
    widget.initialize().await;

    assert_eq!(
        widget.handle(WidgetEvent::ToggleEditMode).await,
        EventOutcome::ModeChanged(WidgetMode::Edit)
    );
    // the fresh record is still created
    assert_eq!(backend.save_calls(), 1);
    assert!(backend.record(OWNER).is_some());
}

#[tokio::test]
async fn failed_save_keeps_the_editor_open() {
    let backend = backend();
    backend.fail_saves(true);
    let widget = widget(&backend, &SignalBus::new());
    widget.initialize().await;
    widget.handle(WidgetEvent::AddCard).await;

    let labels = Labels::default();
    assert_eq!(
        widget.handle(WidgetEvent::ToggleEditMode).await,
        EventOutcome::SaveFailed(Notice {
            title: labels.update_error_title,
            message: labels.update_error_message,
        })
    );
    assert_eq!(widget.mode(), WidgetMode::Edit);
    assert!(widget.preferences().is_dirty());

    backend.fail_saves(false);
    assert_eq!(
        widget.handle(WidgetEvent::ToggleEditMode).await,
        EventOutcome::ModeChanged(WidgetMode::View)
    );
}

#[tokio::test]
async fn edits_are_ignored_outside_edit_mode() {
    let backend = backend();
    seed(&backend, &["00B1"]);
    let widget = widget(&backend, &SignalBus::new());
    widget.initialize().await;

    let outcome = widget
        .handle(WidgetEvent::ChangeSuffix {
            card: 0,
            text: "cases".to_string(),
        })
        .await;
    assert_eq!(outcome, EventOutcome::Ignored);
    assert_eq!(widget.handle(WidgetEvent::DeleteCard { card: 0 }).await, EventOutcome::Ignored);
    assert!(!widget.preferences().is_dirty());
}

#[tokio::test]
async fn card_edits_mark_the_record_dirty() {
    let backend = backend();
    seed(&backend, &["00B1", "00B2"]);
    let widget = widget(&backend, &SignalBus::new());
    widget.initialize().await;
    widget.handle(WidgetEvent::ToggleEditMode).await;

    let outcome = widget
        .handle(WidgetEvent::ChangeColorRule {
            card: 0,
            index: 1,
            update: RuleUpdate {
                threshold: Some(Some(Threshold::Integer(20))),
                ..RuleUpdate::default()
            },
        })
        .await;
    assert_eq!(outcome, EventOutcome::Applied);
    assert!(widget.preferences().is_dirty());
    // 12 < 20 now matches the first rule
    assert_eq!(widget.view().cards[0].color, DEFAULT_ALERT_COLOR);

    let bad_color = widget
        .handle(WidgetEvent::ChangeBaseColor {
            card: 0,
            color: "blue".to_string(),
        })
        .await;
    assert_eq!(bad_color, EventOutcome::Ignored);

    assert_eq!(
        widget.handle(WidgetEvent::ToggleDisplayMode { card: 1 }).await,
        EventOutcome::Applied
    );
    assert_eq!(widget.view().cards[1].display_mode, DisplayMode::Dark);

    assert_eq!(widget.handle(WidgetEvent::DeleteCard { card: 0 }).await, EventOutcome::Applied);
    let view = widget.view();
    assert_eq!(view.cards.len(), 1);
    assert_eq!(view.cards[0].id, 1);
    assert_eq!(widget.handle(WidgetEvent::DeleteCard { card: 0 }).await, EventOutcome::Ignored);
}

#[tokio::test]
async fn deleting_a_card_dirties_a_clean_record() {
    let backend = backend();
    seed(&backend, &["00B1", "00B2", "00B1"]);
    let widget = widget(&backend, &SignalBus::new());
    widget.initialize().await;
    widget.handle(WidgetEvent::ToggleEditMode).await;
    assert!(!widget.preferences().is_dirty());

    assert_eq!(widget.handle(WidgetEvent::DeleteCard { card: 9 }).await, EventOutcome::Ignored);
    assert!(!widget.preferences().is_dirty());

    assert_eq!(widget.handle(WidgetEvent::DeleteCard { card: 1 }).await, EventOutcome::Applied);
    let ids: Vec<u64> = widget.view().cards.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![0, 2]);
    assert!(widget.preferences().is_dirty());
}

#[tokio::test]
async fn changing_source_fetches_its_count() {
    let backend = backend();
    seed(&backend, &["00B1"]);
    let widget = widget(&backend, &SignalBus::new());
    widget.initialize().await;
    widget.handle(WidgetEvent::ToggleEditMode).await;

    let outcome = widget
        .handle(WidgetEvent::ChangeSourceRef {
            card: 0,
            source_ref: "00B2".to_string(),
        })
        .await;
    assert_eq!(outcome, EventOutcome::Applied);
    let card = &widget.view().cards[0];
    assert_eq!(card.title, "New Leads");
    assert_eq!(card.count, CountDisplay::Count(3));
    assert_eq!(backend.count_calls(), 2);

    let unknown = widget
        .handle(WidgetEvent::ChangeSourceRef {
            card: 0,
            source_ref: "00B9".to_string(),
        })
        .await;
    assert_eq!(unknown, EventOutcome::Ignored);
}

#[tokio::test]
async fn navigation_only_in_view_mode() {
    let backend = backend();
    seed(&backend, &["00B2"]);
    let widget = widget(&backend, &SignalBus::new());
    widget.initialize().await;

    assert_eq!(
        widget.handle(WidgetEvent::NavigateToSource { card: 0 }).await,
        EventOutcome::Navigate(NavigationTarget {
            object_type: "Lead".to_string(),
            filter_name: "00B2".to_string(),
        })
    );
    assert_eq!(widget.handle(WidgetEvent::NavigateToSource { card: 7 }).await, EventOutcome::Ignored);

    widget.handle(WidgetEvent::ToggleEditMode).await;
    assert_eq!(widget.handle(WidgetEvent::NavigateToSource { card: 0 }).await, EventOutcome::Ignored);
}

#[tokio::test]
async fn teardown_during_render_drops_late_results() {
    let backend = backend();
    seed(&backend, &["00B1"]);
    let widget = widget(&backend, &SignalBus::new());

    futures::join!(widget.initialize(), async {
        tokio::task::yield_now().await;
        widget.teardown();
    });

    assert!(widget.is_disposed());
    assert_eq!(backend.count_calls(), 0);
    assert!(widget.view().cards.is_empty());
    assert_eq!(widget.handle(WidgetEvent::ToggleEditMode).await, EventOutcome::Ignored);
}

#[tokio::test]
async fn torn_down_widget_does_nothing() {
    let backend = backend();
    let widget = widget(&backend, &SignalBus::new());
    widget.teardown();
    widget.initialize().await;
    assert_eq!(backend.load_calls(), 0);
    assert_eq!(widget.handle(WidgetEvent::Reload).await, EventOutcome::Ignored);
}

#[tokio::test]
async fn saves_reload_other_instances() {
    let backend = backend();
    seed(&backend, &["00B1"]);
    let bus = SignalBus::new();
    let editor = widget(&backend, &bus);
    let viewer = widget(&backend, &bus);
    editor.initialize().await;
    viewer.initialize().await;
    assert_eq!(bus.listeners(), 2);

    editor.handle(WidgetEvent::ToggleEditMode).await;
    assert_eq!(editor.handle(WidgetEvent::AddCard).await, EventOutcome::CardAdded(1));
    editor.handle(WidgetEvent::ToggleEditMode).await;

    assert!(!editor.drain_signals().await);
    assert!(viewer.drain_signals().await);
    assert_eq!(viewer.view().cards.len(), 2);
    assert_eq!(viewer.view().cards[1].count, CountDisplay::Count(12));

    viewer.teardown();
    assert_eq!(bus.listeners(), 1);
}

#[tokio::test]
async fn listener_stops_on_teardown() {
    let backend = backend();
    seed(&backend, &["00B1"]);
    let bus = SignalBus::new();
    let editor = widget(&backend, &bus);
    let viewer = widget(&backend, &bus);
    editor.initialize().await;
    viewer.initialize().await;

    futures::join!(viewer.run(), async {
        editor.handle(WidgetEvent::ToggleEditMode).await;
        editor.handle(WidgetEvent::AddCard).await;
        editor.handle(WidgetEvent::ToggleEditMode).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        viewer.teardown();
    });

    assert_eq!(viewer.view().cards.len(), 2);
    assert_eq!(bus.listeners(), 1);
}
