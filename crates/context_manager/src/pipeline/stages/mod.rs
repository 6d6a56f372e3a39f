//! Built-in context stages, in the order the default builder runs them.

pub mod lorebook;
pub mod macros;
pub mod preset;
pub mod squash;

pub use lorebook::{LOREBOOK_AFTER, LOREBOOK_BEFORE, LorebookStage};
pub use macros::MacroStage;
pub use preset::PresetStage;
pub use squash::SquashStage;
