use chat_core::{ContentPart, Message, MessageMetadata, Role};

use crate::pipeline::{ContextStage, ProcessResult, ProcessingContext, StageError};

/// Merges a run of more than one leading system message into one.
///
/// Text parts are joined with a blank line and trimmed; non-text parts
/// follow the merged text. The result keeps the first message's id and the
/// earliest creation time of the run. A single leading system message is
/// left untouched.
pub struct SquashStage;

impl ContextStage for SquashStage {
    fn name(&self) -> &str {
        "squash"
    }

    fn should_run(&self, ctx: &ProcessingContext<'_>) -> bool {
        ctx.config.squash_system_messages
    }

    fn process(&self, ctx: &mut ProcessingContext<'_>) -> Result<ProcessResult, StageError> {
        let count = ctx
            .messages
            .iter()
            .take_while(|message| message.role == Role::System)
            .count();
        if count <= 1 {
            return Ok(ProcessResult::Continue);
        }

        let rest = ctx.messages.split_off(count);
        let leading = std::mem::take(&mut ctx.messages);

        let id = leading[0].id.clone();
        let created_at = leading
            .iter()
            .map(|message| message.created_at().unwrap_or(ctx.now))
            .min();

        let mut texts = Vec::new();
        let mut media = Vec::new();
        for part in leading.into_iter().flat_map(|message| message.parts) {
            match part {
                ContentPart::Text { text } => texts.push(text),
                other => media.push(other),
            }
        }

        let mut parts = Vec::with_capacity(media.len() + 1);
        let combined = texts.join("\n\n").trim().to_string();
        if !combined.is_empty() {
            parts.push(ContentPart::text(combined));
        }
        parts.extend(media);

        let squashed = Message {
            id,
            role: Role::System,
            parts,
            metadata: MessageMetadata {
                created_at,
                ..Default::default()
            },
        };
        ctx.stats.system_messages_squashed = count;

        let mut messages = Vec::with_capacity(rest.len() + 1);
        messages.push(squashed);
        messages.extend(rest);
        Ok(ProcessResult::Transform(messages))
    }
}
