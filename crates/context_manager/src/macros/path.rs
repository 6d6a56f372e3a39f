//! `{{char.<path>}}` lookups into the character card.

use serde_json::Value;

enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Split `a.b[0].c` into keys and indices. Quoted bracket keys
/// (`extensions["depth prompt"]`) are accepted.
fn segments(path: &str) -> Vec<Segment<'_>> {
    let mut result = Vec::new();
    for part in path.split('.') {
        let mut rest = part;
        if let Some(open) = rest.find('[') {
            if open > 0 {
                result.push(Segment::Key(&rest[..open]));
            }
            rest = &rest[open..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let Some(close) = stripped.find(']') else { break };
                let inner = stripped[..close].trim_matches(|c| c == '"' || c == '\'');
                result.push(match inner.parse::<usize>() {
                    Ok(index) => Segment::Index(index),
                    Err(_) => Segment::Key(inner),
                });
                rest = &stripped[close + 1..];
            }
        } else if !rest.is_empty() {
            result.push(Segment::Key(rest));
        }
    }
    result
}

/// Resolve `path` in `root`. Strings come back as-is, arrays are joined with
/// newlines, and anything missing resolves to an empty string.
pub fn lookup(root: &Value, path: &str) -> String {
    let mut current = root;
    for segment in segments(path.trim()) {
        let next = match segment {
            Segment::Key(key) => current.get(key),
            Segment::Index(index) => current.get(index),
        };
        match next {
            Some(value) => current = value,
            None => return String::new(),
        }
    }
    render(current)
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items.iter().map(render).collect::<Vec<_>>().join("\n"),
        other => other.to_string(),
    }
}
