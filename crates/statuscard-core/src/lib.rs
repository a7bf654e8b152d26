pub mod cards;
pub mod rules;

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub use cards::{CardDefaults, RuleUpdate};

/// Current payload schema version. Payloads written before versioning carry
/// no `version` field and decode as version 1.
pub const PAYLOAD_VERSION: u32 = 1;

/// Id returned by the save collaborator when it refuses a record.
pub const SAVE_REJECTED: &str = "NG";

pub const DEFAULT_BASE_COLOR: &str = "#1589ee";
pub const DEFAULT_ALERT_COLOR: &str = "#c23934";
pub const DEFAULT_WARNING_COLOR: &str = "#fff03f";
pub const DEFAULT_OK_COLOR: &str = "#4bca81";

// --- Types ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Light,
    Dark,
}

impl DisplayMode {
    pub fn toggled(self) -> Self {
        match self {
            DisplayMode::Light => DisplayMode::Dark,
            DisplayMode::Dark => DisplayMode::Light,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
pub enum Operator {
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessOrEqual,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Equal => "==",
            Operator::Less => "<",
            Operator::LessOrEqual => "<=",
        }
    }

    pub fn holds(self, lhs: i128, rhs: i128) -> bool {
        match self {
            Operator::Greater => lhs > rhs,
            Operator::GreaterOrEqual => lhs >= rhs,
            Operator::Equal => lhs == rhs,
            Operator::Less => lhs < rhs,
            Operator::LessOrEqual => lhs <= rhs,
        }
    }
}

/// A rule threshold as stored in the payload. The editor stores whatever the
/// user typed, so both JSON numbers and numeric strings occur.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
#[serde(untagged)]
pub enum Threshold {
    Integer(i64),
    Decimal(f64),
    Text(String),
}

impl Threshold {
    /// Integer value used for comparisons. Text is read up to the first
    /// non-digit ("12px" is 12); text without leading digits has no value.
    /// Values too large to represent saturate.
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Threshold::Integer(n) => Some(i128::from(*n)),
            // float to int casts saturate
            Threshold::Decimal(f) if f.is_finite() => Some(f.trunc() as i128),
            Threshold::Decimal(_) => None,
            Threshold::Text(s) => leading_integer(s),
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Threshold::Text(s) if s.trim().is_empty())
    }
}

impl From<i64> for Threshold {
    fn from(n: i64) -> Self {
        Threshold::Integer(n)
    }
}

impl From<&str> for Threshold {
    fn from(s: &str) -> Self {
        Threshold::Text(s.to_string())
    }
}

fn leading_integer(s: &str) -> Option<i128> {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    // only digits remain, so parsing can fail on overflow alone
    let value: i128 = digits[..end].parse().unwrap_or(i128::MAX);
    Some(if negative { -value } else { value })
}

/// Rule 0: applied when no conditional rule matches or the count is unknown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct BaseRule {
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct ConditionalRule {
    #[serde(rename = "op")]
    pub operator: Operator,
    /// `None` leaves the rule inactive.
    #[serde(rename = "th", default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Threshold>,
    pub color: String,
}

impl ConditionalRule {
    pub fn new(operator: Operator, color: &str) -> Self {
        Self {
            operator,
            threshold: None,
            color: color.to_string(),
        }
    }

    pub fn with_threshold(mut self, threshold: impl Into<Threshold>) -> Self {
        self.threshold = Some(threshold.into());
        self
    }
}

/// The four rules of a card, keyed "0".."3" on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct ColorRules {
    #[serde(rename = "0")]
    pub base: BaseRule,
    #[serde(rename = "1")]
    pub first: ConditionalRule,
    #[serde(rename = "2")]
    pub second: ConditionalRule,
    #[serde(rename = "3")]
    pub third: ConditionalRule,
}

impl Default for ColorRules {
    fn default() -> Self {
        Self {
            base: BaseRule {
                color: DEFAULT_BASE_COLOR.to_string(),
            },
            first: ConditionalRule::new(Operator::Less, DEFAULT_ALERT_COLOR),
            second: ConditionalRule::new(Operator::Less, DEFAULT_WARNING_COLOR),
            third: ConditionalRule::new(Operator::GreaterOrEqual, DEFAULT_OK_COLOR),
        }
    }
}

impl ColorRules {
    /// Conditional rules in evaluation order (indices 1, 2, 3).
    pub fn conditional(&self) -> [&ConditionalRule; 3] {
        [&self.first, &self.second, &self.third]
    }

    pub fn conditional_mut(&mut self, index: usize) -> Option<&mut ConditionalRule> {
        match index {
            1 => Some(&mut self.first),
            2 => Some(&mut self.second),
            3 => Some(&mut self.third),
            _ => None,
        }
    }
}

/// Result of the most recent count fetch for a card. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountState {
    #[default]
    NotFetched,
    Loaded(u64),
    Failed,
}

impl CountState {
    pub fn value(self) -> Option<u64> {
        match self {
            CountState::Loaded(n) => Some(n),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct AlertCard {
    id: u64,
    #[serde(rename = "listId")]
    source_ref: String,
    #[serde(rename = "mode", default)]
    display_mode: DisplayMode,
    #[serde(rename = "suffix", default)]
    suffix_label: String,
    #[serde(rename = "bg")]
    color_rules: ColorRules,
    #[serde(skip)]
    count: CountState,
    #[serde(skip)]
    object_label: Option<String>,
}

/// Cards compare by their persisted fields; fetched counts are ignored.
impl PartialEq for AlertCard {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.source_ref == other.source_ref
            && self.display_mode == other.display_mode
            && self.suffix_label == other.suffix_label
            && self.color_rules == other.color_rules
    }
}

impl AlertCard {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source_ref(&self) -> &str {
        &self.source_ref
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.display_mode
    }

    pub fn suffix_label(&self) -> &str {
        &self.suffix_label
    }

    pub fn color_rules(&self) -> &ColorRules {
        &self.color_rules
    }

    pub fn count(&self) -> CountState {
        self.count
    }

    /// Object label reported by the last count fetch.
    pub fn object_label(&self) -> Option<&str> {
        self.object_label.as_deref()
    }

    pub fn resolved_color(&self) -> &str {
        rules::evaluate(self.count.value(), &self.color_rules)
    }
}

fn current_version() -> u32 {
    PAYLOAD_VERSION
}

/// The persisted payload: id counter plus cards in display order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct AlertCollection {
    #[serde(default = "current_version")]
    version: u32,
    #[serde(default)]
    counter: u64,
    #[serde(default)]
    alerts: Vec<AlertCard>,
}

impl Default for AlertCollection {
    fn default() -> Self {
        Self {
            version: PAYLOAD_VERSION,
            counter: 0,
            alerts: Vec::new(),
        }
    }
}

impl AlertCollection {
    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn alerts(&self) -> &[AlertCard] {
        &self.alerts
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn card(&self, id: u64) -> Option<&AlertCard> {
        self.alerts.iter().find(|c| c.id == id)
    }

    pub fn card_mut(&mut self, id: u64) -> Option<&mut AlertCard> {
        self.alerts.iter_mut().find(|c| c.id == id)
    }

    /// Reject structurally broken payloads and raise a lagging counter so
    /// new ids can never collide with stored ones.
    fn normalize(&mut self) -> Result<(), CodecError> {
        if self.version > PAYLOAD_VERSION {
            return Err(CodecError::UnsupportedVersion(self.version));
        }
        self.version = PAYLOAD_VERSION;
        let mut seen = HashSet::new();
        for card in &self.alerts {
            if !seen.insert(card.id) {
                return Err(CodecError::DuplicateCardId(card.id));
            }
        }
        if let Some(max) = self.alerts.iter().map(|c| c.id).max() {
            let next = max.checked_add(1).ok_or(CodecError::CounterOverflow)?;
            self.counter = self.counter.max(next);
        }
        Ok(())
    }
}

/// JSON Schema of the persisted payload.
pub fn payload_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(AlertCollection)).unwrap_or_default()
}

/// The per-user record as held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceRecord {
    id: Option<String>,
    owner_ref: String,
    pub payload: AlertCollection,
}

impl PreferenceRecord {
    /// A record that has never been persisted.
    pub fn new(owner_ref: &str) -> Self {
        Self {
            id: None,
            owner_ref: owner_ref.to_string(),
            payload: AlertCollection::default(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn owner_ref(&self) -> &str {
        &self.owner_ref
    }

    /// Record the id handed back by the first successful save. Returns false
    /// if the record already had a different id, which is left untouched.
    pub fn assign_id(&mut self, id: &str) -> bool {
        match &self.id {
            None => {
                self.id = Some(id.to_string());
                true
            }
            Some(existing) => existing == id,
        }
    }

    pub fn to_raw(&self) -> Result<RawRecord, CodecError> {
        Ok(RawRecord {
            id: self.id.clone(),
            owner_ref: self.owner_ref.clone(),
            encoded_payload: encode_payload(&self.payload)?,
        })
    }

    pub fn from_raw(raw: RawRecord) -> Result<Self, CodecError> {
        let payload = decode_payload(&raw.encoded_payload)?;
        Ok(Self {
            id: raw.id,
            owner_ref: raw.owner_ref,
            payload,
        })
    }
}

/// The record as exchanged with the load/save collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub owner_ref: String,
    pub encoded_payload: String,
}

/// One selectable data source from the list catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListView {
    pub id: String,
    pub label: String,
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_label: Option<String>,
}

impl ListView {
    /// Text shown for this source in the card's source picker.
    pub fn option_text(&self) -> String {
        let object = self
            .object_label
            .as_deref()
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.source_type);
        format!("{} - {}", object, self.label)
    }
}

/// Count reported for one list. `size` may be missing even on success.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListCount {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub size: Option<u64>,
}

// --- Payload codec ---

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("payload JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u32),

    #[error("duplicate card id {0}")]
    DuplicateCardId(u64),

    #[error("card id leaves no room for the id counter")]
    CounterOverflow,
}

/// JSON text, UTF-8 bytes, standard base64.
pub fn encode_payload(collection: &AlertCollection) -> Result<String, CodecError> {
    let json = serde_json::to_string(collection)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(json.as_bytes()))
}

pub fn decode_payload(encoded: &str) -> Result<AlertCollection, CodecError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded)?;
    let json = String::from_utf8(bytes)?;
    let mut collection: AlertCollection = serde_json::from_str(&json)?;
    collection.normalize()?;
    Ok(collection)
}

// --- Storage ---

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("record JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Resolve the global widget directory (~/.statuscard/).
pub fn statuscard_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".statuscard")
}

pub fn records_dir() -> PathBuf {
    statuscard_dir().join("records")
}

/// Owner refs become file names; anything outside [A-Za-z0-9_-] is replaced.
fn record_file_name(owner_ref: &str) -> String {
    let safe: String = owner_ref
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}.json", safe)
}

/// Read the raw record stored for `owner_ref`. Returns None if there is none.
pub fn read_record_raw(dir: &Path, owner_ref: &str) -> Result<Option<RawRecord>, StorageError> {
    let path = dir.join(record_file_name(owner_ref));
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Write a raw record. Uses temp file + rename so readers never observe a
/// half-written record.
pub fn write_record_raw(dir: &Path, record: &RawRecord) -> Result<(), StorageError> {
    fs::create_dir_all(dir)?;
    let name = record_file_name(&record.owner_ref);
    let tmp = dir.join(format!(".{}.tmp", name));
    let path = dir.join(name);
    let json = serde_json::to_string_pretty(record)?;
    fs::write(&tmp, json)?;
    fs::rename(&tmp, &path)?;
    Ok(())
}

// --- Settings ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Labels {
    /// Suffix given to new cards.
    pub default_number_text: String,
    pub update_error_title: String,
    pub update_error_message: String,
    pub access_error: String,
    pub loading: String,
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            default_number_text: "items".to_string(),
            update_error_title: "Update failed".to_string(),
            update_error_message: "Your status cards could not be saved. Please try again."
                .to_string(),
            access_error: "Access Error".to_string(),
            loading: "Loading...".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WidgetSettings {
    /// Render cards without the surrounding card chrome.
    pub transparent: bool,
    pub default_display_mode: DisplayMode,
    pub labels: Labels,
}

fn settings_path() -> PathBuf {
    statuscard_dir().join("settings.json")
}

pub fn read_settings() -> WidgetSettings {
    read_settings_from(&settings_path())
}

pub fn read_settings_from(path: &Path) -> WidgetSettings {
    if !path.exists() {
        return WidgetSettings::default();
    }
    fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

pub fn write_settings(settings: &WidgetSettings) -> Result<(), StorageError> {
    write_settings_to(&settings_path(), settings)
}

pub fn write_settings_to(path: &Path, settings: &WidgetSettings) -> Result<(), StorageError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;
    Ok(())
}
