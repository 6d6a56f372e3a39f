//! Macro Engine
//!
//! Resolves `{{...}}` templates in prompt, card and lore text. Resolution
//! never fails: a macro that cannot be resolved stays in the text literally,
//! and content-suppressing macros resolve to an empty string.
//!
//! Spans are matched by brace depth and resolved left to right; macros
//! nested in a span's body resolve before the span itself, so
//! `{{reverse:{{char}}}}` reverses the character name. When resolved text
//! introduces new macros the whole text is scanned again, until a pass
//! changes nothing or [`MAX_PASSES`] is reached.

mod path;
mod values;

use std::collections::BTreeMap;
use std::num::IntErrorKind;

use chat_core::{Character, Persona};
use chrono::Local;
use rand::Rng;
use serde::Serialize;

pub use values::split_values;

/// Upper bound on resolution passes over one text.
pub const MAX_PASSES: usize = 27;

/// Data macros read from, plus the variables `setvar` writes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MacroContext<'a> {
    pub character: Option<&'a Character>,
    pub persona: Option<&'a Persona>,
    pub variables: BTreeMap<String, String>,
}

impl<'a> MacroContext<'a> {
    pub fn new(character: Option<&'a Character>, persona: Option<&'a Persona>) -> Self {
        Self {
            character,
            persona,
            variables: BTreeMap::new(),
        }
    }

    /// Stable serialization used to seed `pick`.
    fn seed(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Resolve every macro in `text`.
pub fn replace_macros(text: &str, ctx: &mut MacroContext<'_>) -> String {
    let mut current = text.to_string();
    for _ in 0..MAX_PASSES {
        if !current.contains("{{") {
            break;
        }
        let next = replace_pass(&current, ctx);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// One pass over `text`, resolving top-level spans left to right.
fn replace_pass(text: &str, ctx: &mut MacroContext<'_>) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find("{{") {
        output.push_str(&rest[..open]);
        let inner = &rest[open + 2..];
        let Some(close) = matching_close(inner) else {
            output.push_str(&rest[open..]);
            return output;
        };
        let body = &inner[..close];
        let resolved = if body.contains("{{") {
            let body = replace_pass(body, ctx);
            process_macro(&body, ctx)
        } else {
            process_macro(body, ctx)
        };
        output.push_str(&resolved);
        rest = &inner[close + 2..];
    }
    output.push_str(rest);
    output
}

/// Byte offset of the `}}` closing a span whose `{{` precedes `text`.
fn matching_close(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 1usize;
    let mut index = 0;
    while index + 1 < bytes.len() {
        match &bytes[index..index + 2] {
            b"{{" => {
                depth += 1;
                index += 2;
            }
            b"}}" => {
                depth -= 1;
                if depth == 0 {
                    return Some(index);
                }
                index += 2;
            }
            _ => index += 1,
        }
    }
    None
}

/// `getvar::rest` / `setvar::rest`, matched case-insensitively.
fn strip_command<'b>(body: &'b str, command: &str) -> Option<&'b str> {
    let head = body.get(..command.len())?;
    if !head.eq_ignore_ascii_case(command) {
        return None;
    }
    body[command.len()..]
        .trim_start()
        .strip_prefix("::")
        .map(str::trim_start)
}

/// Split `name::rest` into a trimmed name and the untrimmed remainder.
fn name_and_rest(body: &str) -> (&str, Option<&str>) {
    match body.split_once("::") {
        Some((name, rest)) => (name.trim(), Some(rest)),
        None => (body.trim(), None),
    }
}

/// Resolve the body of a single `{{...}}` macro.
pub fn process_macro(body: &str, ctx: &mut MacroContext<'_>) -> String {
    let literal = || format!("{{{{{body}}}}}");

    if let Some(rest) = strip_command(body, "getvar") {
        let (name, fallback) = name_and_rest(rest);
        return ctx
            .variables
            .get(name)
            .cloned()
            .unwrap_or_else(|| fallback.unwrap_or_default().to_string());
    }

    if let Some(rest) = strip_command(body, "setvar") {
        let (name, value) = name_and_rest(rest);
        let value = match value {
            Some(value) if !value.is_empty() => replace_macros(value, ctx),
            _ => String::new(),
        };
        if !name.is_empty() {
            ctx.variables.insert(name.to_string(), value);
        }
        return String::new();
    }

    let (raw_key, payload) = match body.split_once(':') {
        Some((key, payload)) => (key.trim(), payload.trim()),
        None => (body.trim(), ""),
    };
    let key = raw_key.to_lowercase();

    if key.starts_with("//") {
        return String::new();
    }

    if key.starts_with("char.") {
        let Some(character) = ctx.character else {
            return literal();
        };
        return path::lookup(&character.data_value(), &raw_key["char.".len()..]);
    }

    match key.as_str() {
        "char" => match ctx.character {
            Some(character) => character.data.display_name().to_string(),
            None => literal(),
        },
        "user" => match ctx.persona {
            Some(persona) => persona.name.clone(),
            None => literal(),
        },
        "user.description" => match ctx.persona {
            Some(persona) => persona.description.clone(),
            None => literal(),
        },
        "random" => {
            let values = split_values(payload);
            let index = rand::thread_rng().gen_range(0..values.len());
            values[index].clone()
        }
        "pick" => pick(body, payload, ctx),
        "roll" => roll(payload),
        "hidden_key" | "trim" | "original" => String::new(),
        "comment" => format!("<!-- {payload} -->"),
        "reverse" => payload.chars().rev().collect(),
        "date" => Local::now().format("%B %-d, %Y").to_string(),
        "time" => Local::now().format("%-I:%M %p").to_string(),
        _ => literal(),
    }
}

/// Deterministic choice: the same context and body always pick the same value.
fn pick(body: &str, payload: &str, ctx: &MacroContext<'_>) -> String {
    let values = split_values(payload);
    let seed = format!("{}{}", ctx.seed(), body);
    let fraction = f64::from(fnv1a(&seed)) / 4_294_967_296.0;
    let index = ((fraction * values.len() as f64) as usize).min(values.len() - 1);
    values[index].clone()
}

/// 32-bit FNV-1a over UTF-16 code units.
fn fnv1a(text: &str) -> u32 {
    text.encode_utf16().fold(0x811c_9dc5_u32, |hash, unit| {
        (hash ^ u32::from(unit)).wrapping_mul(0x0100_0193)
    })
}

/// `N` or `dN`: a random integer in `1..=N`; `"0"` when `N` is invalid.
/// Sides beyond `u64::MAX` saturate.
fn roll(payload: &str) -> String {
    let digits = payload
        .strip_prefix('d')
        .or_else(|| payload.strip_prefix('D'))
        .unwrap_or(payload);
    let sides = match digits.trim().parse::<u64>() {
        Ok(sides) => sides,
        Err(error) if *error.kind() == IntErrorKind::PosOverflow => u64::MAX,
        Err(_) => 0,
    };
    if sides == 0 {
        return "0".to_string();
    }
    rand::thread_rng().gen_range(1..=sides).to_string()
}
