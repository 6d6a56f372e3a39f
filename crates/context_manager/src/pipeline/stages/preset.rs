use chat_core::{Message, Prompt, PromptPosition, Validate};
use chrono::{DateTime, Utc};

use crate::pipeline::{ContextStage, ProcessResult, ProcessingContext, StageError};

/// Layers the enabled preset prompts around the chat history.
///
/// `before` prompts are prepended in preset order. `after` prompts are
/// spliced into the history at `max(len - depth, 0)`, deepest first, so an
/// insertion never shifts the index of one still to come; prompts of equal
/// depth keep preset order.
pub struct PresetStage;

impl PresetStage {
    fn message(prompt: &Prompt, now: DateTime<Utc>) -> Message {
        Message::text(prompt.id.clone(), prompt.role, prompt.content.clone()).with_created_at(now)
    }
}

impl ContextStage for PresetStage {
    fn name(&self) -> &str {
        "preset"
    }

    fn process(&self, ctx: &mut ProcessingContext<'_>) -> Result<ProcessResult, StageError> {
        ctx.preset.validate().map_err(StageError::InvalidPreset)?;

        let enabled = ctx.preset.prompts.iter().filter(|prompt| prompt.enabled);
        let (before, mut after): (Vec<&Prompt>, Vec<&Prompt>) =
            enabled.partition(|prompt| prompt.position == PromptPosition::Before);

        let mut history = std::mem::take(&mut ctx.messages);
        after.sort_by(|a, b| b.depth.cmp(&a.depth));
        for prompt in after {
            let index = history.len().saturating_sub(prompt.depth);
            history.insert(index, Self::message(prompt, ctx.now));
        }

        let mut messages: Vec<Message> = before
            .into_iter()
            .map(|prompt| Self::message(prompt, ctx.now))
            .collect();
        messages.append(&mut history);
        Ok(ProcessResult::Transform(messages))
    }
}
