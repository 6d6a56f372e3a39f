//! Context Stage Trait
//!
//! This module defines the core trait that all context stages implement.

use super::context::ProcessingContext;
use super::error::StageError;
use super::result::ProcessResult;

/// Context Stage Trait
///
/// Every step of context assembly implements this trait. A stage receives
/// the mutable `ProcessingContext` and can:
/// - Insert, replace or drop messages
/// - Resolve text
/// - Update statistics
///
/// # Example
///
/// ```no_run
/// use context_manager::pipeline::{ContextStage, ProcessingContext, ProcessResult, StageError};
///
/// struct DropEmpty;
///
/// impl ContextStage for DropEmpty {
///     fn name(&self) -> &str {
///         "drop_empty"
///     }
///
///     fn process(&self, ctx: &mut ProcessingContext<'_>) -> Result<ProcessResult, StageError> {
///         ctx.messages.retain(|message| !message.joined_text().is_empty());
///         Ok(ProcessResult::Continue)
///     }
/// }
/// ```
pub trait ContextStage: Send + Sync {
    /// Returns the name of this stage (for logging and statistics)
    fn name(&self) -> &str;

    /// Run the stage
    ///
    /// # Arguments
    ///
    /// * `ctx` - Mutable processing context holding the transcript and build inputs
    ///
    /// # Returns
    ///
    /// - `Ok(ProcessResult)` - Continue with the transcript as left in `ctx`, or replace it
    /// - `Err(StageError)` - The build cannot continue
    fn process(&self, ctx: &mut ProcessingContext<'_>) -> Result<ProcessResult, StageError>;

    /// Check if this stage should run
    ///
    /// Default implementation always returns true.
    fn should_run(&self, _ctx: &ProcessingContext<'_>) -> bool {
        true
    }
}
