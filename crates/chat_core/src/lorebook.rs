//! Lorebook records and entries.
//!
//! Entries are keyword-triggered snippets of world information. Their
//! `content` may start with `@@directive` lines which the context builder
//! interprets; this module only models and validates the stored shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::validation::{parse_validated, Validate, ValidationErrors};

/// Where an entry goes relative to the character definitions when no
/// decorator says otherwise.
#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryPosition {
    #[default]
    BeforeChar,
    AfterChar,
}

impl<'de> Deserialize<'de> for EntryPosition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let position = match &value {
            Value::String(text) => match text.as_str() {
                "after_char" | "1" => EntryPosition::AfterChar,
                _ => EntryPosition::BeforeChar,
            },
            Value::Number(number) if number.as_f64() == Some(1.0) => EntryPosition::AfterChar,
            _ => EntryPosition::BeforeChar,
        };
        Ok(position)
    }
}

/// Entry ids arrive as numbers from character cards and as strings from
/// native lorebooks; both are kept as strings.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, found {other}"
        ))),
    }
}

fn default_true() -> bool {
    true
}

fn default_entry_name() -> String {
    "New Entry".to_string()
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LorebookEntry {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub constant: bool,
    #[serde(default)]
    pub selective: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_keys: Option<Vec<String>>,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub use_regex: bool,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub insertion_order: i64,
    #[serde(default)]
    pub position: EntryPosition,
    #[serde(default = "default_entry_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub extensions: Map<String, Value>,
}

impl Default for LorebookEntry {
    fn default() -> Self {
        Self {
            id: String::new(),
            keys: Vec::new(),
            content: String::new(),
            enabled: true,
            constant: false,
            selective: false,
            secondary_keys: None,
            case_sensitive: false,
            use_regex: false,
            priority: 0,
            insertion_order: 0,
            position: EntryPosition::BeforeChar,
            name: default_entry_name(),
            comment: None,
            extensions: Map::new(),
        }
    }
}

impl LorebookEntry {
    pub fn new(id: impl Into<String>, keys: &[&str], content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            keys: keys.iter().map(|key| key.to_string()).collect(),
            content: content.into(),
            ..Default::default()
        }
    }

    /// Secondary keys, only when the entry is selective and has some.
    pub fn active_secondary_keys(&self) -> Option<&[String]> {
        match &self.secondary_keys {
            Some(keys) if self.selective && !keys.is_empty() => Some(keys),
            _ => None,
        }
    }
}

impl Validate for LorebookEntry {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.id.trim().is_empty() {
            errors.push("id", "must not be empty");
        }
        if self.insertion_order < 0 {
            errors.push("insertion_order", "must be non-negative");
        }
        if !self.constant && self.keys.iter().all(|key| key.trim().is_empty()) {
            errors.push("keys", "a non-constant entry needs at least one key");
        }
        if self.selective && self.secondary_keys.as_ref().map_or(true, Vec::is_empty) {
            errors.push("secondary_keys", "a selective entry needs secondary keys");
        }
        errors.into_result()
    }
}

fn default_scan_depth() -> i64 {
    -1
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LorebookData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Number of trailing messages scanned; negative means the whole transcript.
    #[serde(default = "default_scan_depth")]
    pub scan_depth: i64,
    #[serde(default = "default_scan_depth")]
    pub token_budget: i64,
    #[serde(default)]
    pub recursive_scanning: bool,
    #[serde(default)]
    pub extensions: Map<String, Value>,
    #[serde(default)]
    pub entries: Vec<LorebookEntry>,
}

impl Default for LorebookData {
    fn default() -> Self {
        Self {
            name: None,
            description: None,
            scan_depth: -1,
            token_budget: -1,
            recursive_scanning: false,
            extensions: Map::new(),
            entries: Vec::new(),
        }
    }
}

impl LorebookData {
    /// Scan depth as a window size, `None` when unlimited.
    pub fn scan_window(&self) -> Option<usize> {
        usize::try_from(self.scan_depth).ok()
    }
}

impl Validate for LorebookData {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let mut seen = std::collections::HashSet::new();
        for (index, entry) in self.entries.iter().enumerate() {
            let path = format!("entries[{index}]");
            if let Err(nested) = entry.validate() {
                errors.extend_nested(&path, nested);
            }
            if !entry.id.is_empty() && !seen.insert(entry.id.as_str()) {
                errors.push(format!("{path}.id"), format!("duplicate entry id {}", entry.id));
            }
        }
        errors.into_result()
    }
}

/// A stored lorebook and how it is attached to characters.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lorebook {
    pub id: String,
    #[serde(default)]
    pub data: LorebookData,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub global: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_character_id: Option<String>,
    #[serde(default)]
    pub linked_character_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lorebook {
    pub fn new(id: impl Into<String>, data: LorebookData) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            data,
            enabled: true,
            global: false,
            embedded_character_id: None,
            linked_character_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    pub fn embedded_in(mut self, character_id: impl Into<String>) -> Self {
        self.embedded_character_id = Some(character_id.into());
        self
    }

    pub fn linked_to(mut self, character_id: impl Into<String>) -> Self {
        self.linked_character_ids.push(character_id.into());
        self
    }

    /// Parse imported lorebook JSON.
    ///
    /// Accepts bare lorebook data, a `lorebook_v3` wrapper, and a character
    /// book. Entries missing an id are given `entry-<index>`; an entry with
    /// non-empty secondary keys is treated as selective.
    pub fn parse(json: Value) -> Result<LorebookData, ValidationErrors> {
        let mut data = match json {
            Value::Object(mut map) if map.get("spec").and_then(Value::as_str) == Some("lorebook_v3") => {
                map.remove("data").unwrap_or(Value::Object(Map::new()))
            }
            other => other,
        };

        if let Some(entries) = data.get_mut("entries").and_then(Value::as_array_mut) {
            for (index, entry) in entries.iter_mut().enumerate() {
                let Some(entry) = entry.as_object_mut() else { continue };
                if entry.get("id").map_or(true, Value::is_null) {
                    entry.insert("id".into(), Value::String(format!("entry-{index}")));
                }
                if let Some(Value::Array(keys)) = entry.get_mut("secondary_keys") {
                    keys.retain(|key| key.as_str().is_some_and(|key| !key.is_empty()));
                    let selective = !keys.is_empty();
                    if !selective {
                        entry.remove("secondary_keys");
                    }
                    entry.insert("selective".into(), Value::Bool(selective));
                }
                if let Some(Value::Array(keys)) = entry.get_mut("keys") {
                    keys.retain(|key| key.as_str().is_some_and(|key| !key.is_empty()));
                }
            }
        }

        let data: LorebookData = parse_validated(data)?;
        log::debug!(
            "parsed lorebook {:?} with {} entries",
            data.name,
            data.entries.len()
        );
        Ok(data)
    }
}

impl Validate for Lorebook {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.id.trim().is_empty() {
            errors.push("id", "must not be empty");
        }
        if let Err(nested) = self.data.validate() {
            errors.extend_nested("data", nested);
        }
        errors.into_result()
    }
}
