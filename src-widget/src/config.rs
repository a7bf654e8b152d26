use statuscard_core::{read_settings, WidgetSettings};

/// Everything a widget instance is configured with by its host.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetConfig {
    /// Owner whose preference record the widget edits.
    pub owner_ref: String,
    pub settings: WidgetSettings,
}

impl WidgetConfig {
    pub fn new(owner_ref: &str) -> Self {
        Self {
            owner_ref: owner_ref.to_string(),
            settings: WidgetSettings::default(),
        }
    }

    /// Settings from ~/.statuscard/settings.json, defaults where missing.
    pub fn from_settings_file(owner_ref: &str) -> Self {
        Self::new(owner_ref).with_settings(read_settings())
    }

    pub fn with_settings(mut self, settings: WidgetSettings) -> Self {
        self.settings = settings;
        self
    }
}
