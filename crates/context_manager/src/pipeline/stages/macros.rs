use chat_core::ContentPart;

use crate::macros::replace_macros;
use crate::pipeline::{ContextStage, ProcessResult, ProcessingContext, StageError};

/// Resolves macros in every text part, strips `<START>` example-dialogue
/// markers at line starts, and trims. Text parts left empty are removed; a
/// message with no text left is dropped along with any media it carries.
pub struct MacroStage;

/// Remove `<START>` at the start of any line, with the whitespace after it.
pub fn strip_start_markers(text: &str) -> String {
    const MARKER: &str = "<START>";

    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    let mut line_start = true;

    while !rest.is_empty() {
        if line_start {
            if let Some(after) = rest.strip_prefix(MARKER) {
                let trimmed = after.trim_start();
                line_start = after[..after.len() - trimmed.len()].ends_with('\n');
                rest = trimmed;
                continue;
            }
        }
        match rest.find('\n') {
            Some(newline) => {
                output.push_str(&rest[..=newline]);
                rest = &rest[newline + 1..];
                line_start = true;
            }
            None => {
                output.push_str(rest);
                break;
            }
        }
    }
    output
}

impl ContextStage for MacroStage {
    fn name(&self) -> &str {
        "macros"
    }

    fn process(&self, ctx: &mut ProcessingContext<'_>) -> Result<ProcessResult, StageError> {
        let before = ctx.messages.len();

        for message in &mut ctx.messages {
            for part in &mut message.parts {
                if let ContentPart::Text { text } = part {
                    let resolved = replace_macros(text, &mut ctx.macros);
                    *text = strip_start_markers(&resolved).trim().to_string();
                }
            }
            message
                .parts
                .retain(|part| part.as_text().is_none_or(|text| !text.is_empty()));
        }
        ctx.messages
            .retain(|message| message.parts.iter().any(ContentPart::is_text));

        ctx.stats.messages_dropped += before - ctx.messages.len();
        Ok(ProcessResult::Continue)
    }
}
