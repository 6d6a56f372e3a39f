use chat_core::{EntryPosition, Message, Placement, Role};
use chrono::{DateTime, Utc};

use crate::lorebook::{
    DecoratorContext, InsertionPosition, LoreMatch, MatchContext, ScanOptions, insertion_position,
};
use crate::pipeline::{ContextStage, ProcessResult, ProcessingContext, StageError};

/// Sentinel prompt replaced by lore routed `before`.
pub const LOREBOOK_BEFORE: &str = "{{lorebook.before}}";
/// Sentinel prompt replaced by lore routed `after`.
pub const LOREBOOK_AFTER: &str = "{{lorebook.after}}";

/// Scans the applicable lorebooks and splices matched entries into the
/// transcript.
///
/// Routing per match:
/// - `before` / `after` collect into buckets that replace the
///   `{{lorebook.before}}` / `{{lorebook.after}}` sentinel messages. A
///   missing before-sentinel puts its bucket at the start; a missing
///   after-sentinel puts its bucket right after the before bucket.
/// - `depth` inserts at `clamp(len - depth, 0, len)` of the transcript as
///   it was before any lore went in.
/// - anchored positions go next to the first message containing the
///   configured marker, or into the before bucket when none does.
///
/// Within each bucket matches are ordered by descending priority, then
/// ascending insertion order, then scan order. Sentinels are always
/// removed, even when nothing matched.
pub struct LorebookStage;

fn is_sentinel(message: &Message, sentinel: &str) -> bool {
    message.first_text().is_some_and(|text| text.trim() == sentinel)
}

fn lore_message(lore: &LoreMatch, role: Role, now: DateTime<Utc>) -> Message {
    Message::text(format!("lorebook-{}", lore.entry.id), role, lore.content.clone())
        .with_created_at(now)
}

impl LorebookStage {
    /// Scan every lorebook, apply token budgets, and order the survivors.
    fn collect_matches(ctx: &mut ProcessingContext<'_>, match_ctx: &MatchContext) -> Vec<LoreMatch> {
        let mut all = Vec::new();
        for lorebook in &ctx.lorebooks {
            let options = ScanOptions {
                scan_depth: lorebook.data.scan_window().or(ctx.config.default_scan_depth),
                recursive: lorebook.data.recursive_scanning,
                max_recursion_depth: ctx.config.max_recursion_depth,
            };
            let mut matches = ctx
                .matcher
                .scan(&lorebook.data.entries, match_ctx, &options, &mut ctx.macros);
            sort_matches(&mut matches);

            if let Ok(budget) = usize::try_from(lorebook.data.token_budget) {
                if budget > 0 {
                    let before = matches.len();
                    let mut used = 0;
                    matches.retain(|lore| {
                        used += ctx.token_counter.count_text(&lore.content);
                        used <= budget
                    });
                    ctx.stats.lore_over_budget += before - matches.len();
                }
            }

            tracing::debug!(
                chat_id = %ctx.chat_id,
                lorebook_id = %lorebook.id,
                matches = matches.len(),
                "lorebook scanned"
            );
            ctx.stats.lorebooks_scanned += 1;
            all.extend(matches);
        }
        sort_matches(&mut all);
        all
    }
}

/// Descending priority, then ascending insertion order; stable otherwise.
fn sort_matches(matches: &mut [LoreMatch]) {
    matches.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.entry.insertion_order.cmp(&b.entry.insertion_order))
    });
}

impl ContextStage for LorebookStage {
    fn name(&self) -> &str {
        "lorebook"
    }

    fn process(&self, ctx: &mut ProcessingContext<'_>) -> Result<ProcessResult, StageError> {
        let history = ctx.history();
        let token_count = ctx.token_counter.count_text(&history.join("\n"));
        let match_ctx = MatchContext {
            message_count: history.len(),
            assistant_message_count: ctx
                .messages
                .iter()
                .filter(|message| message.role == Role::Assistant)
                .count(),
            token_count,
            greeting_index: ctx.greeting_index,
            user_icon: ctx.user_icon.clone(),
            messages: history,
        };

        let matches = Self::collect_matches(ctx, &match_ctx);
        ctx.stats.lore_injected = matches.len();

        let transcript = std::mem::take(&mut ctx.messages);
        let len = transcript.len();
        let mut ahead: Vec<Vec<Message>> = vec![Vec::new(); len + 1];
        let mut behind: Vec<Vec<Message>> = vec![Vec::new(); len];
        let mut before_bucket = Vec::new();
        let mut after_bucket = Vec::new();

        let decorator_ctx = DecoratorContext {
            message_count: match_ctx.message_count,
            assistant_message_count: match_ctx.assistant_message_count,
            token_count: match_ctx.token_count,
            greeting_index: match_ctx.greeting_index,
            user_icon: match_ctx.user_icon.as_deref(),
            previous_matches: ctx.matcher.previous_matches(),
        };

        for lore in &matches {
            let default = match lore.entry.position {
                EntryPosition::BeforeChar => InsertionPosition::Before,
                EntryPosition::AfterChar => InsertionPosition::After,
            };
            match insertion_position(&lore.decorators, &decorator_ctx, default) {
                InsertionPosition::Before => before_bucket.push(lore_message(lore, Role::System, ctx.now)),
                InsertionPosition::After => after_bucket.push(lore_message(lore, Role::System, ctx.now)),
                InsertionPosition::Depth { depth, role } => {
                    let index = (len as i64 - depth).clamp(0, len as i64) as usize;
                    ahead[index].push(lore_message(lore, role.unwrap_or(Role::System), ctx.now));
                }
                InsertionPosition::Position { anchor } => {
                    let rule = ctx.config.anchors.rule(anchor);
                    let message = lore_message(lore, Role::System, ctx.now);
                    let target = transcript
                        .iter()
                        .position(|m| m.joined_text().contains(&rule.marker));
                    match (target, rule.placement) {
                        (Some(index), Placement::Before) => ahead[index].push(message),
                        (Some(index), Placement::After) => behind[index].push(message),
                        (None, _) => {
                            tracing::debug!(
                                entry_id = %lore.entry.id,
                                anchor = anchor.as_str(),
                                "anchor not found, routing lore before"
                            );
                            before_bucket.push(message)
                        }
                    }
                }
            }
        }

        let before_at = transcript.iter().position(|m| is_sentinel(m, LOREBOOK_BEFORE));
        let after_at = transcript.iter().position(|m| is_sentinel(m, LOREBOOK_AFTER));

        let mut output = Vec::with_capacity(len + matches.len());
        if before_at.is_none() {
            output.append(&mut before_bucket);
            if after_at.is_none() {
                output.append(&mut after_bucket);
            }
        }
        for (index, (message, (mut inserted_ahead, mut inserted_behind))) in transcript
            .into_iter()
            .zip(ahead.drain(..len).zip(behind))
            .enumerate()
        {
            output.append(&mut inserted_ahead);
            if Some(index) == before_at {
                output.append(&mut before_bucket);
                if after_at.is_none() {
                    output.append(&mut after_bucket);
                }
            } else if Some(index) == after_at {
                output.append(&mut after_bucket);
            } else {
                output.push(message);
            }
            output.append(&mut inserted_behind);
        }
        if let Some(tail) = ahead.pop() {
            output.extend(tail);
        }

        Ok(ProcessResult::Transform(output))
    }
}
