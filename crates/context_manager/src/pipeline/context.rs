//! Processing Context
//!
//! This module defines the state passed mutably through the context stages.

use chat_core::{Character, EngineConfig, Lorebook, Message, Persona, Preset};
use chrono::{DateTime, Utc};

use crate::lorebook::LoreMatcher;
use crate::macros::MacroContext;
use crate::tokenizer::TokenCounter;

/// Processing Context
///
/// Holds the transcript being assembled plus everything the stages read.
/// Each stage can:
/// - Rewrite `messages` in place or hand back a replacement
/// - Resolve macros through the shared `macros` context, so variables set
///   by lore content are visible to later messages
/// - Record lore matches in the chat's `matcher`
/// - Update statistics
pub struct ProcessingContext<'a> {
    /// Chat the context is built for
    pub chat_id: &'a str,

    /// The transcript being assembled
    pub messages: Vec<Message>,

    pub preset: &'a Preset,
    pub character: Option<&'a Character>,
    pub persona: Option<&'a Persona>,

    /// Enabled lorebooks applicable to the character, deduplicated
    pub lorebooks: Vec<Lorebook>,

    /// Tokenizer acquired for this build; dropped with the context
    pub token_counter: Box<dyn TokenCounter>,

    /// Per-chat lore match memory
    pub matcher: &'a mut LoreMatcher,

    pub macros: MacroContext<'a>,

    pub config: &'a EngineConfig,

    /// Build clock, read once; every synthesized message carries it
    pub now: DateTime<Utc>,

    /// Index of the greeting the active path starts from
    pub greeting_index: Option<usize>,

    pub user_icon: Option<String>,

    /// Processing statistics
    pub stats: ProcessingStats,
}

impl ProcessingContext<'_> {
    /// Texts of the transcript's messages for lore scanning: the first text
    /// part of each message, empty ones skipped.
    pub fn history(&self) -> Vec<String> {
        self.messages
            .iter()
            .filter_map(Message::first_text)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Processing Statistics
///
/// Tracks statistics during a context build.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProcessingStats {
    /// Number of stages executed
    pub stages_run: usize,
    /// Total processing time in milliseconds
    pub total_duration_ms: u64,
    /// Per-stage durations (stage_name, duration_ms)
    pub stage_durations: Vec<(String, u64)>,
    /// Lorebooks scanned
    pub lorebooks_scanned: usize,
    /// Lore entries injected
    pub lore_injected: usize,
    /// Lore matches dropped by a lorebook token budget
    pub lore_over_budget: usize,
    /// Messages dropped because they resolved to nothing
    pub messages_dropped: usize,
    /// Leading system messages merged into one
    pub system_messages_squashed: usize,
}

impl ProcessingStats {
    /// Record that a stage ran
    pub fn record_stage(&mut self, name: String, duration_ms: u64) {
        self.stages_run += 1;
        self.total_duration_ms += duration_ms;
        self.stage_durations.push((name, duration_ms));
    }
}
