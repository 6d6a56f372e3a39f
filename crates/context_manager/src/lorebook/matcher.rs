//! Lore Matcher
//!
//! Scans lorebook entries against a rolling window of recent message text
//! and returns the entries to inject, each with its parsed decorators and
//! macro-expanded content.

use std::collections::HashSet;

use chat_core::LorebookEntry;
use regex::RegexBuilder;
use serde::Serialize;

use super::decorator::{self, Decorator, DecoratorContext, DecoratorValue, ParsedContent};
use crate::macros::{MacroContext, replace_macros};

/// Transcript facts a scan runs against.
#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    /// Message texts, oldest first.
    pub messages: Vec<String>,
    pub message_count: usize,
    pub assistant_message_count: usize,
    pub token_count: usize,
    /// Index of the greeting the active path starts from, if any.
    pub greeting_index: Option<usize>,
    pub user_icon: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Trailing messages in the window; `None` scans everything.
    pub scan_depth: Option<usize>,
    pub recursive: bool,
    /// Upper bound on recursive passes.
    pub max_recursion_depth: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            scan_depth: None,
            recursive: false,
            max_recursion_depth: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoreMatch {
    pub entry: LorebookEntry,
    pub decorators: Vec<Decorator>,
    /// Entry content with the decorator block removed and macros resolved.
    pub content: String,
    pub priority: i64,
}

/// Entry matching with memory of which entries matched in earlier scans.
///
/// One matcher belongs to one chat; the remembered ids drive
/// `keep_activate_after_match` and `dont_activate_after_match`.
#[derive(Debug, Clone, Default)]
pub struct LoreMatcher {
    previous_matches: HashSet<String>,
}

impl LoreMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous_matches(&self) -> &HashSet<String> {
        &self.previous_matches
    }

    pub fn was_matched(&self, entry_id: &str) -> bool {
        self.previous_matches.contains(entry_id)
    }

    pub fn clear(&mut self) {
        self.previous_matches.clear();
    }

    /// Scan `entries` and remember every matched id.
    ///
    /// The first pass skips `delay_until_recursion` entries. With
    /// `options.recursive`, matched content is appended to the window and
    /// the entry list is scanned again, skipping entries already matched in
    /// this scan and `non_recursable` ones, until a pass adds nothing or the
    /// pass limit is reached. `prevent_recursion` entries match but do not
    /// feed their content back into the window.
    pub fn scan(
        &mut self,
        entries: &[LorebookEntry],
        ctx: &MatchContext,
        options: &ScanOptions,
        macros: &mut MacroContext<'_>,
    ) -> Vec<LoreMatch> {
        let decorator_ctx = DecoratorContext {
            message_count: ctx.message_count,
            assistant_message_count: ctx.assistant_message_count,
            token_count: ctx.token_count,
            greeting_index: ctx.greeting_index,
            user_icon: ctx.user_icon.as_deref(),
            previous_matches: &self.previous_matches,
        };
        let parsed: Vec<ParsedContent> = entries
            .iter()
            .map(|entry| decorator::parse_content(&entry.content))
            .collect();

        let mut matched_ids: HashSet<String> = HashSet::new();
        let mut matches = Vec::new();
        let mut pending = Vec::new();

        for (entry, parsed) in entries.iter().zip(&parsed) {
            if parsed.has("delay_until_recursion") || matched_ids.contains(&entry.id) {
                continue;
            }
            if entry_matches(entry, parsed, &ctx.messages, options.scan_depth, &decorator_ctx) {
                record(entry, parsed, macros, &mut matched_ids, &mut matches, &mut pending);
            }
        }

        if options.recursive && !ctx.messages.is_empty() {
            let mut window = ctx.messages.clone();
            for pass in 0..options.max_recursion_depth {
                if pending.is_empty() {
                    break;
                }
                window.append(&mut pending);
                let before = matches.len();

                for (entry, parsed) in entries.iter().zip(&parsed) {
                    if matched_ids.contains(&entry.id) || parsed.has("non_recursable") {
                        continue;
                    }
                    if entry_matches(entry, parsed, &window, options.scan_depth, &decorator_ctx) {
                        record(entry, parsed, macros, &mut matched_ids, &mut matches, &mut pending);
                    }
                }
                tracing::trace!(pass, added = matches.len() - before, "recursive lore pass");
            }
        }

        self.previous_matches.extend(matched_ids);
        matches
    }
}

fn record(
    entry: &LorebookEntry,
    parsed: &ParsedContent,
    macros: &mut MacroContext<'_>,
    matched_ids: &mut HashSet<String>,
    matches: &mut Vec<LoreMatch>,
    pending: &mut Vec<String>,
) {
    let content = replace_macros(&parsed.content, macros);
    if !parsed.has("prevent_recursion") {
        pending.push(content.clone());
    }
    matched_ids.insert(entry.id.clone());
    matches.push(LoreMatch {
        entry: entry.clone(),
        decorators: parsed.decorators.clone(),
        content,
        priority: entry.priority,
    });
}

/// The last `depth` texts joined with spaces.
fn window_text(messages: &[String], depth: Option<usize>) -> String {
    let start = depth.map_or(0, |depth| messages.len().saturating_sub(depth));
    messages[start..].join(" ")
}

fn entry_matches(
    entry: &LorebookEntry,
    parsed: &ParsedContent,
    messages: &[String],
    default_depth: Option<usize>,
    ctx: &DecoratorContext<'_>,
) -> bool {
    if !entry.enabled || !decorator::conditions_pass(parsed, ctx, &entry.id) {
        return false;
    }
    let forced = entry.constant
        || parsed.has("activate")
        || (parsed.has("keep_activate_after_match") && ctx.previous_matches.contains(&entry.id));
    if forced {
        return true;
    }

    let window = window_text(messages, decorator::scan_depth(&parsed.decorators, default_depth));
    if window.is_empty() {
        return false;
    }
    let keys = KeyMatcher {
        window: &window,
        mode: if entry.use_regex {
            KeyMode::Regex
        } else if parsed.has("match_whole_words") {
            KeyMode::WholeWord
        } else {
            KeyMode::Substring
        },
        case_sensitive: entry.case_sensitive,
        entry_id: &entry.id,
    };

    if !keys.any(&entry.keys) {
        return false;
    }
    if let Some(secondary) = entry.active_secondary_keys() {
        if !keys.any(secondary) {
            return false;
        }
    }
    let values = |name: &'static str| {
        parsed
            .all(name)
            .filter_map(|d| d.value.as_ref().map(DecoratorValue::as_keys))
    };
    if values("additional_keys").any(|required| !keys.any(&required)) {
        return false;
    }
    !values("exclude_keys").any(|excluded| keys.any(&excluded))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyMode {
    Regex,
    WholeWord,
    Substring,
}

struct KeyMatcher<'a> {
    window: &'a str,
    mode: KeyMode,
    case_sensitive: bool,
    entry_id: &'a str,
}

impl KeyMatcher<'_> {
    fn any(&self, keys: &[String]) -> bool {
        keys.iter().any(|key| self.matches(key))
    }

    fn matches(&self, key: &str) -> bool {
        if key.trim().is_empty() {
            return false;
        }
        match self.mode {
            KeyMode::Regex => self.matches_regex(key),
            KeyMode::WholeWord => self.build(&format!(r"\b{}\b", regex::escape(key)), "", key),
            KeyMode::Substring if self.case_sensitive => self.window.contains(key),
            KeyMode::Substring => self.window.to_lowercase().contains(&key.to_lowercase()),
        }
    }

    /// `/pattern/flags` literals honour `i`, `m` and `s`; anything else is
    /// used as a bare pattern.
    fn matches_regex(&self, key: &str) -> bool {
        let literal = key.strip_prefix('/').and_then(|rest| {
            let end = rest.rfind('/')?;
            let (pattern, flags) = (&rest[..end], &rest[end + 1..]);
            (!pattern.is_empty() && flags.chars().all(|c| c.is_ascii_alphabetic()))
                .then_some((pattern, flags))
        });
        match literal {
            Some((pattern, flags)) => self.build(pattern, flags, key),
            None => self.build(key, "", key),
        }
    }

    fn build(&self, pattern: &str, flags: &str, key: &str) -> bool {
        let compiled = RegexBuilder::new(pattern)
            .case_insensitive(!self.case_sensitive || flags.contains('i'))
            .multi_line(flags.contains('m'))
            .dot_matches_new_line(flags.contains('s'))
            .build();
        match compiled {
            Ok(regex) => regex.is_match(self.window),
            Err(error) => {
                tracing::warn!(
                    entry_id = %self.entry_id,
                    key = %key,
                    error = %error,
                    "invalid lore key pattern, treating entry as non-matching"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(messages: &[&str]) -> MatchContext {
        MatchContext {
            messages: messages.iter().map(|m| m.to_string()).collect(),
            message_count: messages.len(),
            ..Default::default()
        }
    }

    fn scan(entries: &[LorebookEntry], ctx: &MatchContext, options: ScanOptions) -> Vec<String> {
        let mut matcher = LoreMatcher::new();
        ids(matcher.scan(entries, ctx, &options, &mut MacroContext::default()))
    }

    fn ids(matches: Vec<LoreMatch>) -> Vec<String> {
        matches.into_iter().map(|m| m.entry.id).collect()
    }

    #[test]
    fn substring_match_is_case_insensitive_by_default() {
        let entries = vec![LorebookEntry::new("e1", &["Sword"], "A blade.")];
        assert_eq!(scan(&entries, &context(&["the old sword"]), ScanOptions::default()), vec!["e1"]);

        let mut strict = entries.clone();
        strict[0].case_sensitive = true;
        assert!(scan(&strict, &context(&["the old sword"]), ScanOptions::default()).is_empty());
    }

    #[test]
    fn whole_word_mode() {
        let entries = vec![LorebookEntry::new("e1", &["cat"], "@@match_whole_words\nCats.")];
        assert!(scan(&entries, &context(&["concatenate"]), ScanOptions::default()).is_empty());
        assert_eq!(scan(&entries, &context(&["a cat sat"]), ScanOptions::default()), vec!["e1"]);
    }

    #[test]
    fn regex_literal_with_flags() {
        let mut entry = LorebookEntry::new("e1", &["/dra(g|k)on/i"], "Dragons.");
        entry.use_regex = true;
        entry.case_sensitive = true;
        assert_eq!(scan(&[entry], &context(&["A DRAKON!"]), ScanOptions::default()), vec!["e1"]);
    }

    #[test]
    fn bad_regex_is_isolated() {
        let mut broken = LorebookEntry::new("bad", &["(unclosed"], "x");
        broken.use_regex = true;
        let good = LorebookEntry::new("good", &["unclosed"], "y");
        assert_eq!(
            scan(&[broken, good], &context(&["(unclosed"]), ScanOptions::default()),
            vec!["good"]
        );
    }

    #[test]
    fn selective_and_filters() {
        let mut selective = LorebookEntry::new("sel", &["sword"], "x");
        selective.selective = true;
        selective.secondary_keys = Some(vec!["magic".into()]);
        let additional = LorebookEntry::new("add", &["sword"], "@@additional_keys fire, ice\nx");
        let excluded = LorebookEntry::new("exc", &["sword"], "@@exclude_keys rusty\nx");

        let entries = vec![selective, additional, excluded];
        assert_eq!(
            scan(&entries, &context(&["a rusty sword"]), ScanOptions::default()),
            Vec::<String>::new()
        );
        assert_eq!(
            scan(&entries, &context(&["a magic ice sword"]), ScanOptions::default()),
            vec!["sel", "add", "exc"]
        );
    }

    #[test]
    fn constant_and_disabled() {
        let mut constant = LorebookEntry::new("c", &[], "Always.");
        constant.constant = true;
        let mut disabled = LorebookEntry::new("d", &["hi"], "Never.");
        disabled.enabled = false;
        assert_eq!(scan(&[constant, disabled], &context(&["hi"]), ScanOptions::default()), vec!["c"]);
    }

    #[test]
    fn scan_depth_limits_window() {
        let entries = vec![LorebookEntry::new("e1", &["dragon"], "x")];
        let ctx = context(&["dragon", "hello", "there"]);
        let depth = |scan_depth| ScanOptions { scan_depth, ..Default::default() };

        assert!(scan(&entries, &ctx, depth(Some(2))).is_empty());
        assert_eq!(scan(&entries, &ctx, depth(Some(3))), vec!["e1"]);
        assert!(scan(&entries, &ctx, depth(Some(0))).is_empty());

        let widened = vec![LorebookEntry::new("e1", &["dragon"], "@@scan_depth 5\nx")];
        assert_eq!(scan(&widened, &ctx, depth(Some(1))), vec!["e1"]);
    }

    #[test]
    fn recursion_follows_matched_content() {
        let entries = vec![
            LorebookEntry::new("a", &["castle"], "The castle has a dragon."),
            LorebookEntry::new("b", &["dragon"], "The dragon guards gold."),
            LorebookEntry::new("c", &["gold"], "@@delay_until_recursion\nGold is cursed."),
            LorebookEntry::new("d", &["castle"], "@@non_recursable\nx"),
        ];
        let ctx = context(&["we reach the castle"]);

        assert_eq!(scan(&entries, &ctx, ScanOptions::default()), vec!["a", "d"]);
        let recursive = ScanOptions { recursive: true, ..Default::default() };
        assert_eq!(scan(&entries, &ctx, recursive), vec!["a", "d", "b", "c"]);
    }

    #[test]
    fn prevent_recursion_stops_expansion() {
        let entries = vec![
            LorebookEntry::new("a", &["castle"], "@@prevent_recursion\nThe castle has a dragon."),
            LorebookEntry::new("b", &["dragon"], "Dragon."),
        ];
        let recursive = ScanOptions { recursive: true, ..Default::default() };
        assert_eq!(scan(&entries, &context(&["castle"]), recursive), vec!["a"]);
    }

    #[test]
    fn recursion_terminates_on_cycles() {
        let entries = vec![
            LorebookEntry::new("a", &["ping"], "pong"),
            LorebookEntry::new("b", &["pong"], "ping"),
        ];
        let recursive = ScanOptions { recursive: true, ..Default::default() };
        assert_eq!(scan(&entries, &context(&["ping"]), recursive), vec!["a", "b"]);
    }

    #[test]
    fn remembers_matches_across_scans() {
        let entries = vec![
            LorebookEntry::new("once", &["sword"], "@@dont_activate_after_match\nx"),
            LorebookEntry::new("sticky", &["sword"], "@@keep_activate_after_match\ny"),
        ];
        let options = ScanOptions::default();
        let mut matcher = LoreMatcher::new();
        let mut macros = MacroContext::default();

        let first = matcher.scan(&entries, &context(&["sword"]), &options, &mut macros);
        assert_eq!(ids(first), vec!["once", "sticky"]);
        assert!(matcher.was_matched("once"));

        let second = matcher.scan(&entries, &context(&["nothing here"]), &options, &mut macros);
        assert_eq!(ids(second), vec!["sticky"]);
    }

    #[test]
    fn content_is_stripped_and_expanded() {
        let entries = vec![LorebookEntry::new("e1", &["x"], "@@depth 2\n{{reverse:abc}}")];
        let mut matcher = LoreMatcher::new();
        let matches = matcher.scan(
            &entries,
            &context(&["x"]),
            &ScanOptions::default(),
            &mut MacroContext::default(),
        );
        assert_eq!(matches[0].content, "cba");
        assert_eq!(matches[0].decorators[0].name, "depth");
    }
}
