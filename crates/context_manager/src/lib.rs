//! `context_manager` keeps branching character chats and assembles the
//! message list sent to a model for the active branch.
//!
//! - `graph` - the conversation tree and its snapshot format
//! - `macros` - `{{...}}` template expansion
//! - `lorebook` - decorator parsing and keyword-triggered lore matching
//! - `pipeline` - the staged context builder
//! - `session` - one chat's graph, branch bookkeeping and persistence
//! - `storage` - store traits with in-memory and JSON file backends
//! - `tokenizer` - token counting

pub mod error;
pub mod graph;
pub mod lorebook;
pub mod macros;
pub mod pipeline;
pub mod session;
pub mod storage;
pub mod tokenizer;

// Re-export the public API
pub use error::{GraphError, SessionError, StorageError, TokenizerError};
pub use graph::{ConversationGraph, GraphSnapshot, Vertex};
pub use lorebook::{LoreMatch, LoreMatcher, MatchContext, ScanOptions};
pub use macros::{MacroContext, replace_macros};
pub use pipeline::{BuildError, BuildOutput, BuildRequest, ContextBuilder, ContextStage};
pub use session::{ChatSession, SiblingPosition};
pub use storage::{ChatRecord, ChatStore, JsonFileStore, LibraryStore, LorebookStore, MemoryStore};
pub use tokenizer::{TokenCounter, acquire as acquire_tokenizer};
