//! Render-ready snapshot of the widget, handed to whatever draws it.

use serde::Serialize;
use statuscard_core::{AlertCard, AlertCollection, ColorRules, CountState, DisplayMode, Labels, ListView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetMode {
    Loading,
    Edit,
    View,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "camelCase")]
pub enum CountDisplay {
    Loading,
    Count(u64),
    AccessError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceOption {
    pub id: String,
    pub text: String,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardView {
    pub id: u64,
    /// Label of the card's list, empty if the list is not in the catalog.
    pub title: String,
    pub object_label: Option<String>,
    pub count: CountDisplay,
    pub count_text: String,
    pub suffix_label: String,
    pub display_mode: DisplayMode,
    pub color: String,
    pub color_rules: ColorRules,
    pub source_options: Vec<SourceOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetView {
    pub mode: WidgetMode,
    pub transparent: bool,
    /// Set when cards exist but the catalog they depend on could not be fetched.
    pub catalog_unavailable: bool,
    pub cards: Vec<CardView>,
}

pub(crate) fn build_view(
    mode: WidgetMode,
    transparent: bool,
    labels: &Labels,
    collection: &AlertCollection,
    catalog: Option<&[ListView]>,
) -> WidgetView {
    let mut view = WidgetView {
        mode,
        transparent,
        catalog_unavailable: false,
        cards: Vec::new(),
    };
    if mode == WidgetMode::Loading {
        return view;
    }
    match catalog {
        Some(catalog) => {
            view.cards = collection
                .alerts()
                .iter()
                .map(|card| card_view(card, labels, catalog))
                .collect();
        }
        None => view.catalog_unavailable = !collection.is_empty(),
    }
    view
}

fn card_view(card: &AlertCard, labels: &Labels, catalog: &[ListView]) -> CardView {
    let title = catalog
        .iter()
        .find(|v| v.id == card.source_ref())
        .map(|v| v.label.clone())
        .unwrap_or_default();

    let (count, count_text) = match card.count() {
        CountState::NotFetched => (CountDisplay::Loading, labels.loading.clone()),
        CountState::Loaded(n) => (CountDisplay::Count(n), format!("{} {}", n, card.suffix_label())),
        CountState::Failed => (CountDisplay::AccessError, labels.access_error.clone()),
    };

    CardView {
        id: card.id(),
        title,
        object_label: card.object_label().map(str::to_string),
        count,
        count_text,
        suffix_label: card.suffix_label().to_string(),
        display_mode: card.display_mode(),
        color: card.resolved_color().to_string(),
        color_rules: card.color_rules().clone(),
        source_options: catalog
            .iter()
            .map(|v| SourceOption {
                id: v.id.clone(),
                text: v.option_text(),
                selected: v.id == card.source_ref(),
            })
            .collect(),
    }
}
