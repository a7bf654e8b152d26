use serde::Serialize;
use statuscard_core::RuleUpdate;

use crate::view::WidgetMode;

/// User interactions forwarded by the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetEvent {
    ToggleEditMode,
    AddCard,
    ChangeSourceRef { card: u64, source_ref: String },
    ChangeSuffix { card: u64, text: String },
    ChangeColorRule { card: u64, index: usize, update: RuleUpdate },
    ChangeBaseColor { card: u64, color: String },
    ToggleDisplayMode { card: u64 },
    DeleteCard { card: u64 },
    NavigateToSource { card: u64 },
    Reload,
}

impl WidgetEvent {
    /// Events that edit the record and are only accepted in edit mode.
    pub fn is_edit(&self) -> bool {
        !matches!(
            self,
            WidgetEvent::ToggleEditMode | WidgetEvent::NavigateToSource { .. } | WidgetEvent::Reload
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub title: String,
    pub message: String,
}

/// Where the host should navigate when a card is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationTarget {
    pub object_type: String,
    pub filter_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Applied,
    CardAdded(u64),
    ModeChanged(WidgetMode),
    /// Leaving edit mode failed to save; the widget stays in edit mode.
    SaveFailed(Notice),
    CatalogUnavailable,
    Navigate(NavigationTarget),
    /// Not applicable in the current mode, or nothing changed.
    Ignored,
}
