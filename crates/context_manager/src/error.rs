//! Errors
//!
//! Error types shared across the graph, storage, tokenizer and session layers.
//! Context build errors live in [`crate::pipeline::error`].

use chat_core::ValidationErrors;
use thiserror::Error;

use crate::pipeline::BuildError;

/// Structural errors raised by [`crate::graph::ConversationGraph`].
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    /// Operation referenced a vertex that does not exist
    #[error("Vertex not found: {0}")]
    VertexNotFound(String),

    /// Branching from a parent that does not exist
    #[error("Parent vertex not found: {0}")]
    ParentNotFound(String),

    /// The root vertex anchors the graph id and cannot be removed
    #[error("Cannot delete the root vertex {0}")]
    CannotDeleteRoot(String),

    /// Snapshot failed structural validation
    #[error("Invalid graph snapshot: {0}")]
    InvalidSnapshot(ValidationErrors),
}

/// Errors from a storage collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A stored record failed validation on the way in or out
    #[error("Invalid {kind} {id}: {errors}")]
    Invalid {
        kind: &'static str,
        id: String,
        errors: ValidationErrors,
    },
}

impl StorageError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StorageError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// The tokenizer could not be instantiated.
#[derive(Debug, Error)]
#[error("Tokenizer {name} unavailable: {reason}")]
pub struct TokenizerError {
    pub name: &'static str,
    pub reason: String,
}

/// Errors raised by [`crate::session::ChatSession`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Build(#[from] BuildError),

    /// A message id that is not part of this chat
    #[error("Unknown message: {0}")]
    UnknownMessage(String),
}
