//! Processing Results
//!
//! This module defines the result types returned by stages and the builder.

use chat_core::Message;

use super::context::ProcessingStats;

/// Process Result
///
/// Returned by each stage to indicate what should happen next.
#[derive(Debug)]
pub enum ProcessResult {
    /// Continue with the transcript as the stage left it
    Continue,

    /// Replace the transcript and continue
    Transform(Vec<Message>),
}

/// Build Output
///
/// The final result of a context build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// Ordered messages ready for conversion to a model's wire format
    pub messages: Vec<Message>,
    /// Statistics about the build
    pub stats: ProcessingStats,
}
