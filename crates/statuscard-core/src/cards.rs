//! Card-level operations. Every mutator reports whether it changed anything;
//! callers mark the owning record dirty on `true`. Invalid input is ignored.

use crate::{AlertCard, AlertCollection, ColorRules, CountState, DisplayMode, ListCount, Operator, Threshold};

/// Initial values for a new card.
#[derive(Debug, Clone)]
pub struct CardDefaults {
    pub source_ref: String,
    pub display_mode: DisplayMode,
    pub suffix_label: String,
}

/// Partial update of one conditional rule. `threshold: Some(None)` clears
/// the threshold and deactivates the rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleUpdate {
    pub operator: Option<Operator>,
    pub threshold: Option<Option<Threshold>>,
    pub color: Option<String>,
}

/// Accepts `#rgb`, `#rrggbb` and `#rrggbbaa`.
pub fn is_hex_color(s: &str) -> bool {
    match s.strip_prefix('#') {
        Some(hex) => matches!(hex.len(), 3 | 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

impl AlertCollection {
    /// Append a card with the default rule set. The id comes from the
    /// counter, which is then advanced. Returns None for a blank source or
    /// an exhausted counter, leaving the collection untouched.
    pub fn create_card(&mut self, defaults: CardDefaults) -> Option<&AlertCard> {
        let source_ref = defaults.source_ref.trim();
        if source_ref.is_empty() {
            return None;
        }
        let next = self.counter.checked_add(1)?;
        let suffix = defaults.suffix_label.trim();
        let card = AlertCard {
            id: self.counter,
            source_ref: source_ref.to_string(),
            display_mode: defaults.display_mode,
            suffix_label: suffix.to_string(),
            color_rules: ColorRules::default(),
            count: CountState::NotFetched,
            object_label: None,
        };
        self.counter = next;
        self.alerts.push(card);
        self.alerts.last()
    }

    /// Remove the card with `id`. Removing an absent card is a no-op.
    pub fn remove_card(&mut self, id: u64) -> Option<AlertCard> {
        let index = self.alerts.iter().position(|c| c.id == id)?;
        Some(self.alerts.remove(index))
    }
}

impl AlertCard {
    /// Point the card at another catalog entry. The previous count no longer
    /// applies and is dropped.
    pub fn set_source_ref(&mut self, source_ref: &str) -> bool {
        let source_ref = source_ref.trim();
        if source_ref.is_empty() || source_ref == self.source_ref {
            return false;
        }
        self.source_ref = source_ref.to_string();
        self.count = CountState::NotFetched;
        self.object_label = None;
        true
    }

    pub fn set_display_mode(&mut self, mode: DisplayMode) -> bool {
        if self.display_mode == mode {
            return false;
        }
        self.display_mode = mode;
        true
    }

    pub fn toggle_display_mode(&mut self) -> DisplayMode {
        self.display_mode = self.display_mode.toggled();
        self.display_mode
    }

    pub fn set_suffix_label(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() || text == self.suffix_label {
            return false;
        }
        self.suffix_label = text.to_string();
        true
    }

    pub fn set_base_color(&mut self, color: &str) -> bool {
        if !is_hex_color(color) || self.color_rules.base.color == color {
            return false;
        }
        self.color_rules.base.color = color.to_string();
        true
    }

    /// Apply a partial update to conditional rule `index` (1..=3). The update
    /// is validated as a whole: one bad field rejects all of it.
    pub fn set_color_rule(&mut self, index: usize, update: RuleUpdate) -> bool {
        if let Some(color) = &update.color {
            if !is_hex_color(color) {
                return false;
            }
        }
        let Some(rule) = self.color_rules.conditional_mut(index) else {
            return false;
        };

        let mut changed = false;
        if let Some(operator) = update.operator {
            changed |= rule.operator != operator;
            rule.operator = operator;
        }
        if let Some(threshold) = update.threshold {
            let threshold = threshold.filter(|t| !t.is_blank());
            changed |= rule.threshold != threshold;
            rule.threshold = threshold;
        }
        if let Some(color) = update.color {
            changed |= rule.color != color;
            rule.color = color;
        }
        changed
    }

    /// Store the outcome of a count fetch; `None` is a failed fetch. A
    /// report without a size also counts as failed, but its label is kept.
    pub fn refresh_count(&mut self, report: Option<ListCount>) {
        match report {
            Some(report) => {
                self.count = match report.size {
                    Some(size) => CountState::Loaded(size),
                    None => CountState::Failed,
                };
                if !report.label.is_empty() {
                    self.object_label = Some(report.label);
                }
            }
            None => self.count = CountState::Failed,
        }
    }
}
