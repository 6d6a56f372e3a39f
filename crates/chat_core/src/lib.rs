//! chat_core - Core data model for the character chat engine
//!
//! This crate provides the types shared by the conversation graph and the
//! context builder:
//! - `message` - Message, Role, ContentPart
//! - `character` - Character cards and user personas
//! - `lorebook` - Lorebooks and their entries
//! - `preset` - Prompt presets
//! - `validation` / `normalize` - explicit checks for external input
//! - `id` - identity generation
//! - `config` - engine configuration

pub mod character;
pub mod config;
pub mod id;
pub mod lorebook;
pub mod message;
pub mod normalize;
pub mod preset;
pub mod validation;

// Re-export commonly used types
pub use character::{Character, CharacterData, Persona};
pub use config::{AnchorConfig, AnchorRule, EngineConfig, Placement, PositionTag, TokenizerKind};
pub use id::{IdGenerator, SequentialIdGenerator, UuidGenerator};
pub use lorebook::{EntryPosition, Lorebook, LorebookData, LorebookEntry};
pub use message::{ContentPart, Message, MessageMetadata, Role};
pub use normalize::{walk_mut, DropNulls, NormalizeText, ValueVisitor};
pub use preset::{Preset, Prompt, PromptPosition};
pub use validation::{parse_validated, Validate, ValidationError, ValidationErrors};
