/// Split a comma-separated macro payload. A backslash escapes the next
/// character, so `a\,b` is a single value. Always yields at least one value.
pub fn split_values(payload: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut value = String::new();
    let mut escape = false;

    for ch in payload.chars() {
        if escape {
            value.push(ch);
            escape = false;
        } else if ch == '\\' {
            escape = true;
        } else if ch == ',' {
            values.push(std::mem::take(&mut value));
        } else {
            value.push(ch);
        }
    }
    values.push(value);
    values
}
