//! Pipeline Errors
//!
//! This module defines error types for context assembly.

use chat_core::ValidationErrors;
use thiserror::Error;

use crate::error::{StorageError, TokenizerError};

/// Stage Error
///
/// Errors raised by a single stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// The preset failed validation
    #[error("Invalid preset: {0}")]
    InvalidPreset(ValidationErrors),
}

/// Build Error
///
/// Errors that can occur while building a context.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A stage failed
    #[error("Stage '{stage}' failed: {error}")]
    StageFailed {
        stage: String,
        #[source]
        error: StageError,
    },

    /// No stages registered
    #[error("No stages registered in context builder")]
    NoStages,

    /// Lorebook lookup failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Tokenizer could not be acquired
    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),
}
