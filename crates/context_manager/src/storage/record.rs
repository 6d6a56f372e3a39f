use chat_core::{Validate, ValidationErrors};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::GraphSnapshot;

/// A persisted chat: graph snapshot plus metadata.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub id: String,
    #[serde(default)]
    pub character_ids: Vec<String>,
    #[serde(default)]
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub graph: GraphSnapshot,
}

impl ChatRecord {
    pub fn new(
        id: impl Into<String>,
        character_ids: Vec<String>,
        graph: GraphSnapshot,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            character_ids,
            title: String::new(),
            created_at: now,
            updated_at: now,
            graph,
        }
    }
}

impl Validate for ChatRecord {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.id.trim().is_empty() {
            errors.push("id", "must not be empty");
        }
        if self.updated_at < self.created_at {
            errors.push("updatedAt", "must not precede createdAt");
        }
        if let Err(nested) = self.graph.validate() {
            errors.extend_nested("graph", nested);
        }
        errors.into_result()
    }
}
