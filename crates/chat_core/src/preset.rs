//! Prompt presets.
//!
//! A preset is an ordered list of prompts layered around the conversation.
//! List order is the only ordering signal: `before` prompts are emitted in
//! preset order, `after` prompts are placed by `depth`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Role;
use crate::validation::{Validate, ValidationErrors};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PromptPosition {
    /// Prepended ahead of the conversation.
    #[default]
    Before,
    /// Inserted `depth` messages from the end of the conversation.
    After,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Prompt {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub position: PromptPosition,
    #[serde(default)]
    pub depth: usize,
}

impl Prompt {
    pub fn new(id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: Role::System,
            content: content.into(),
            enabled: true,
            position: PromptPosition::Before,
            depth: 0,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Place the prompt `depth` messages from the end of the conversation.
    pub fn after(mut self, depth: usize) -> Self {
        self.position = PromptPosition::After;
        self.depth = depth;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "Preset::default_prompts")]
    pub prompts: Vec<Prompt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Preset {
    pub fn new(id: impl Into<String>, name: impl Into<String>, prompts: Vec<Prompt>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            prompts,
            created_at: now,
            updated_at: now,
        }
    }

    /// The stock layout: card system prompt, lore, persona, card fields,
    /// example dialogue, and post-history instructions at the end.
    pub fn default_prompts() -> Vec<Prompt> {
        vec![
            Prompt::new("system-prompt", "System Prompt (Card)", "{{char.system_prompt}}"),
            Prompt::new("lorebook-before", "Lorebook (Before)", "{{lorebook.before}}"),
            Prompt::new("persona", "Persona", "{{user.description}}"),
            Prompt::new("card-description", "Card Description", "{{char.description}}"),
            Prompt::new("card-personality", "Card Personality", "{{char.personality}}"),
            Prompt::new("card-scenario", "Scenario", "{{char.scenario}}"),
            Prompt::new("lorebook-after", "Lorebook (After)", "{{lorebook.after}}"),
            Prompt::new("example-dialogue", "Example Dialogue", "{{char.mes_example}}"),
            Prompt::new(
                "post-history",
                "Post-History Instructions (Card)",
                "{{char.post_history_instructions}}",
            )
            .after(0),
        ]
    }
}

impl Default for Preset {
    fn default() -> Self {
        Self::new("default", "Default", Self::default_prompts())
    }
}

impl Validate for Preset {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.id.trim().is_empty() {
            errors.push("id", "must not be empty");
        }
        let mut seen = std::collections::HashSet::new();
        for (index, prompt) in self.prompts.iter().enumerate() {
            if prompt.id.trim().is_empty() {
                errors.push(format!("prompts[{index}].id"), "must not be empty");
            } else if !seen.insert(prompt.id.as_str()) {
                errors.push(
                    format!("prompts[{index}].id"),
                    format!("duplicate prompt id {}", prompt.id),
                );
            }
        }
        errors.into_result()
    }
}
