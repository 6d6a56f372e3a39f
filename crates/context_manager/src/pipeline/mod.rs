//! Context Build Pipeline
//!
//! Assembles the message list sent to a model from the flattened active
//! path of a chat. Assembly runs as a sequence of stages over a shared
//! `ProcessingContext`.
//!
//! # Architecture
//!
//! ```text
//! Active path → [Preset] → [Lorebook] → [Macros] → [Squash] → Messages
//!               ↓          ↓            ↓           ↓
//!             prompts    lore entries  {{...}}     leading system
//!             layered    spliced in    resolved    messages merged
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chat_core::EngineConfig;
//! use context_manager::pipeline::ContextBuilder;
//! use context_manager::pipeline::stages::{PresetStage, MacroStage};
//! use context_manager::storage::MemoryStore;
//!
//! let builder = ContextBuilder::new(Arc::new(MemoryStore::new()), EngineConfig::default())
//!     .register(Box::new(PresetStage))
//!     .register(Box::new(MacroStage));
//! ```

pub mod context;
pub mod error;
#[allow(clippy::module_inception)]
pub mod pipeline;
pub mod result;
pub mod stages;
pub mod traits;

// Re-exports for convenience
pub use context::{ProcessingContext, ProcessingStats};
pub use error::{BuildError, StageError};
pub use pipeline::{BuildRequest, Clock, ContextBuilder};
pub use result::{BuildOutput, ProcessResult};
pub use traits::ContextStage;
