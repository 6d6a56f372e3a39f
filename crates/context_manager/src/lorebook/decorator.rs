//! Decorator Parser
//!
//! Lore entry bodies may open with a block of directive lines:
//!
//! ```text
//! @@depth 2
//! @@role assistant
//! @@activate_only_after 3
//! @@@is_greeting 0
//! The actual entry text starts here.
//! ```
//!
//! `@@name value` declares a decorator; `@@@name value` attaches a fallback
//! to the decorator right above it, consulted when the primary condition
//! fails. The block ends at the first line that is neither a directive nor
//! blank.

use std::collections::HashSet;

use chat_core::{PositionTag, Role};
use serde::Serialize;

/// A coerced directive value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecoratorValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl DecoratorValue {
    /// Comma lists first, then `true`/`false`, then finite numbers, else text.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.contains(',') {
            return DecoratorValue::List(raw.split(',').map(|item| item.trim().to_string()).collect());
        }
        match raw {
            "true" => DecoratorValue::Bool(true),
            "false" => DecoratorValue::Bool(false),
            _ => match raw.parse::<f64>() {
                Ok(number) if number.is_finite() => DecoratorValue::Number(number),
                _ => DecoratorValue::Text(raw.to_string()),
            },
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            DecoratorValue::Number(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DecoratorValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The value as a key list, for `additional_keys` / `exclude_keys`.
    pub fn as_keys(&self) -> Vec<String> {
        match self {
            DecoratorValue::List(items) => items.clone(),
            DecoratorValue::Text(text) => vec![text.clone()],
            DecoratorValue::Number(number) => vec![number.to_string()],
            DecoratorValue::Bool(flag) => vec![flag.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decorator {
    /// Canonical name; aliases are folded at parse time.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<DecoratorValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<Decorator>,
}

fn canonical_name(name: &str) -> &str {
    match name {
        "activate_only_on_recursion" => "delay_until_recursion",
        "ignore_on_recursion" => "non_recursable",
        "instruct_scan_depth" => "scan_depth",
        other => other,
    }
}

impl Decorator {
    pub fn new(name: &str, value: Option<DecoratorValue>) -> Self {
        Self {
            name: canonical_name(name).to_string(),
            value,
            fallbacks: Vec::new(),
        }
    }

    /// Parse `name[ value]`, the part after the leading `@@`.
    fn parse(text: &str) -> Option<Self> {
        let end = text
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(text.len());
        if end == 0 {
            return None;
        }
        let (name, rest) = text.split_at(end);
        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let rest = rest.trim();
        let value = (!rest.is_empty()).then(|| DecoratorValue::parse(rest));
        Some(Self::new(name, value))
    }

    fn number(&self) -> Option<f64> {
        self.value.as_ref().and_then(DecoratorValue::as_number)
    }
}

/// Entry content split into its decorator block and the remaining text.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedContent {
    pub decorators: Vec<Decorator>,
    pub content: String,
}

impl ParsedContent {
    pub fn has(&self, name: &str) -> bool {
        self.decorators.iter().any(|d| d.name == name)
    }

    pub fn find(&self, name: &str) -> Option<&Decorator> {
        self.decorators.iter().find(|d| d.name == name)
    }

    pub fn all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Decorator> + 'a {
        self.decorators.iter().filter(move |d| d.name == name)
    }
}

/// Split leading `@@` directives from an entry body.
pub fn parse_content(content: &str) -> ParsedContent {
    let lines: Vec<&str> = content.split('\n').collect();
    let mut decorators: Vec<Decorator> = Vec::new();
    let mut start = 0;

    for (index, line) in lines.iter().enumerate() {
        let line = line.trim();
        if let Some(fallback) = line.strip_prefix("@@@") {
            let (Some(fallback), Some(primary)) = (Decorator::parse(fallback), decorators.last_mut())
            else {
                break;
            };
            primary.fallbacks.push(fallback);
            start = index + 1;
        } else if let Some(directive) = line.strip_prefix("@@") {
            let Some(decorator) = Decorator::parse(directive) else {
                break;
            };
            decorators.push(decorator);
            start = index + 1;
        } else if !line.is_empty() {
            break;
        }
    }

    ParsedContent {
        decorators,
        content: lines[start..].join("\n").trim().to_string(),
    }
}

/// State decorator conditions are evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct DecoratorContext<'a> {
    pub message_count: usize,
    pub assistant_message_count: usize,
    pub token_count: usize,
    pub greeting_index: Option<usize>,
    pub user_icon: Option<&'a str>,
    pub previous_matches: &'a HashSet<String>,
}

/// Whether one decorator's activation condition holds for `entry_id`.
/// Decorators without a condition always pass.
fn condition_holds(
    decorator: &Decorator,
    parsed: &ParsedContent,
    ctx: &DecoratorContext<'_>,
    entry_id: &str,
) -> bool {
    match decorator.name.as_str() {
        "activate_only_after" => decorator
            .number()
            .is_none_or(|after| ctx.assistant_message_count as f64 >= after),
        "activate_only_every" => match decorator.number() {
            Some(every) if every >= 1.0 => ctx.assistant_message_count % (every as usize) == 0,
            Some(_) => false,
            None => true,
        },
        "dont_activate_after_match" => !ctx.previous_matches.contains(entry_id),
        "is_greeting" => match decorator.number() {
            Some(index) => ctx.greeting_index.is_some_and(|greeting| greeting as f64 == index),
            None => false,
        },
        "is_user_icon" => {
            let expected = decorator.value.as_ref().and_then(DecoratorValue::as_text);
            expected.is_some() && expected == ctx.user_icon
        }
        "dont_activate" => parsed.has("activate"),
        _ => true,
    }
}

/// Every decorator must pass its condition, directly or through one of its
/// `@@@` fallbacks.
pub fn conditions_pass(parsed: &ParsedContent, ctx: &DecoratorContext<'_>, entry_id: &str) -> bool {
    parsed.decorators.iter().all(|decorator| {
        condition_holds(decorator, parsed, ctx, entry_id)
            || decorator
                .fallbacks
                .iter()
                .any(|fallback| condition_holds(fallback, parsed, ctx, entry_id))
    })
}

/// Where a matched entry is placed in the built context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "position", rename_all = "snake_case")]
pub enum InsertionPosition {
    /// Replaces the `{{lorebook.before}}` sentinel.
    Before,
    /// Replaces the `{{lorebook.after}}` sentinel.
    After,
    /// `depth` messages from the end of the transcript.
    Depth { depth: i64, role: Option<Role> },
    /// Next to a character-definition anchor.
    Position { anchor: PositionTag },
}

const DEPTH_DECORATORS: [&str; 4] = ["depth", "reverse_depth", "instruct_depth", "reverse_instruct_depth"];

/// Resolve placement from decorators: a position decorator wins over a depth
/// decorator; with neither, `default` is returned.
pub fn insertion_position(
    decorators: &[Decorator],
    ctx: &DecoratorContext<'_>,
    default: InsertionPosition,
) -> InsertionPosition {
    if let Some(anchor) = decorators
        .iter()
        .find_map(|d| PositionTag::from_decorator(&d.name))
    {
        return InsertionPosition::Position { anchor };
    }

    let Some(decorator) = decorators
        .iter()
        .find(|d| DEPTH_DECORATORS.contains(&d.name.as_str()))
    else {
        return default;
    };

    let value = decorator.number().unwrap_or(0.0) as i64;
    let depth = match decorator.name.as_str() {
        "reverse_depth" => ctx.message_count as i64 - value,
        "reverse_instruct_depth" => ctx.token_count as i64 - value,
        _ => value,
    };
    let role = decorators
        .iter()
        .find(|d| d.name == "role")
        .and_then(|d| d.value.as_ref())
        .and_then(DecoratorValue::as_text)
        .and_then(Role::parse);

    InsertionPosition::Depth { depth, role }
}

/// `@@scan_depth N` when present; a negative value means unlimited.
pub fn scan_depth(decorators: &[Decorator], default: Option<usize>) -> Option<usize> {
    match decorators
        .iter()
        .find(|d| d.name == "scan_depth")
        .and_then(Decorator::number)
    {
        Some(depth) if depth < 0.0 => None,
        Some(depth) => Some(depth as usize),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(previous: &HashSet<String>) -> DecoratorContext<'_> {
        DecoratorContext {
            message_count: 10,
            assistant_message_count: 4,
            token_count: 500,
            greeting_index: Some(1),
            user_icon: Some("cat"),
            previous_matches: previous,
        }
    }

    #[test]
    fn strips_leading_block() {
        let parsed = parse_content("@@depth 2\nA magic sword glows.");
        assert_eq!(parsed.content, "A magic sword glows.");
        assert_eq!(parsed.decorators.len(), 1);
        assert_eq!(parsed.decorators[0].value, Some(DecoratorValue::Number(2.0)));
    }

    #[test]
    fn block_ends_at_first_text_line() {
        let parsed = parse_content("\n@@activate\n\nBody\n@@depth 3");
        assert_eq!(parsed.decorators.len(), 1);
        assert_eq!(parsed.content, "Body\n@@depth 3");
    }

    #[test]
    fn malformed_directive_ends_block() {
        let parsed = parse_content("@@ spaced\nBody");
        assert!(parsed.decorators.is_empty());
        assert_eq!(parsed.content, "@@ spaced\nBody");
    }

    #[test]
    fn values_are_coerced() {
        assert_eq!(DecoratorValue::parse("true"), DecoratorValue::Bool(true));
        assert_eq!(DecoratorValue::parse("-1.5"), DecoratorValue::Number(-1.5));
        assert_eq!(
            DecoratorValue::parse("a, b"),
            DecoratorValue::List(vec!["a".into(), "b".into()])
        );
        assert_eq!(DecoratorValue::parse("inf"), DecoratorValue::Text("inf".into()));
    }

    #[test]
    fn aliases_fold_to_canonical_names() {
        let parsed = parse_content("@@activate_only_on_recursion\n@@ignore_on_recursion\n@@instruct_scan_depth 2\nx");
        let names: Vec<_> = parsed.decorators.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["delay_until_recursion", "non_recursable", "scan_depth"]);
    }

    #[test]
    fn fallback_rescues_failing_condition() {
        let previous = HashSet::new();
        let parsed = parse_content("@@activate_only_after 9\n@@@is_greeting 1\nx");
        assert_eq!(parsed.decorators[0].fallbacks.len(), 1);
        assert!(conditions_pass(&parsed, &ctx(&previous), "e"));

        let parsed = parse_content("@@activate_only_after 9\n@@@is_greeting 0\nx");
        assert!(!conditions_pass(&parsed, &ctx(&previous), "e"));
    }

    #[test]
    fn activation_conditions() {
        let previous: HashSet<String> = HashSet::from(["seen".to_string()]);
        let c = ctx(&previous);
        let check = |text: &str, id: &str| conditions_pass(&parse_content(text), &c, id);

        assert!(check("@@activate_only_after 4\nx", "e"));
        assert!(!check("@@activate_only_after 5\nx", "e"));
        assert!(check("@@activate_only_every 2\nx", "e"));
        assert!(!check("@@activate_only_every 3\nx", "e"));
        assert!(!check("@@activate_only_every 0\nx", "e"));
        assert!(!check("@@activate_only_every -2\nx", "e"));
        assert!(!check("@@dont_activate_after_match\nx", "seen"));
        assert!(check("@@dont_activate_after_match\nx", "fresh"));
        assert!(check("@@is_user_icon cat\nx", "e"));
        assert!(!check("@@is_user_icon dog\nx", "e"));
        assert!(!check("@@dont_activate\nx", "e"));
        assert!(check("@@dont_activate\n@@activate\nx", "e"));
    }

    #[test]
    fn position_beats_depth() {
        let previous = HashSet::new();
        let parsed = parse_content("@@depth 2\n@@scenario\nx");
        assert_eq!(
            insertion_position(&parsed.decorators, &ctx(&previous), InsertionPosition::Before),
            InsertionPosition::Position { anchor: PositionTag::Scenario }
        );
    }

    #[test]
    fn depth_variants() {
        let previous = HashSet::new();
        let c = ctx(&previous);
        let position = |text: &str| {
            insertion_position(&parse_content(text).decorators, &c, InsertionPosition::After)
        };

        assert_eq!(position("@@depth 2\nx"), InsertionPosition::Depth { depth: 2, role: None });
        assert_eq!(
            position("@@reverse_depth 3\n@@role user\nx"),
            InsertionPosition::Depth { depth: 7, role: Some(Role::User) }
        );
        assert_eq!(
            position("@@reverse_instruct_depth 100\nx"),
            InsertionPosition::Depth { depth: 400, role: None }
        );
        assert_eq!(position("x"), InsertionPosition::After);
    }

    #[test]
    fn scan_depth_override() {
        assert_eq!(scan_depth(&parse_content("@@scan_depth 2\nx").decorators, None), Some(2));
        assert_eq!(scan_depth(&parse_content("@@scan_depth -1\nx").decorators, Some(3)), None);
        assert_eq!(scan_depth(&parse_content("x").decorators, Some(3)), Some(3));
    }
}
