//! Character and persona records consumed read-only by the context builder.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::validation::{Validate, ValidationErrors};

/// Character card fields. Unknown card fields are kept in `extra` so that
/// `{{char.<path>}}` can still reach them.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CharacterData {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub first_mes: String,
    #[serde(default)]
    pub mes_example: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub post_history_instructions: String,
    #[serde(default)]
    pub alternate_greetings: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub character_version: String,
    #[serde(default)]
    pub extensions: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CharacterData {
    /// Nickname when set and non-empty, else the name.
    pub fn display_name(&self) -> &str {
        match self.nickname.as_deref() {
            Some(nickname) if !nickname.is_empty() => nickname,
            _ => &self.name,
        }
    }

    /// `first_mes` followed by every non-empty alternate greeting.
    pub fn greetings(&self) -> Vec<&str> {
        std::iter::once(self.first_mes.as_str())
            .chain(self.alternate_greetings.iter().map(String::as_str))
            .filter(|greeting| !greeting.trim().is_empty())
            .collect()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Character {
    pub id: String,
    pub data: CharacterData,
}

impl Character {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: CharacterData {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    /// The card as a JSON tree, for path lookups.
    pub fn data_value(&self) -> Value {
        serde_json::to_value(&self.data).unwrap_or(Value::Null)
    }
}

impl Validate for Character {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.id.trim().is_empty() {
            errors.push("id", "must not be empty");
        }
        if self.data.name.trim().is_empty() {
            errors.push("data.name", "must not be empty");
        }
        errors.into_result()
    }
}

/// The user's side of the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Persona {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Persona {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl Validate for Persona {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.id.trim().is_empty() {
            errors.push("id", "must not be empty");
        }
        errors.into_result()
    }
}
