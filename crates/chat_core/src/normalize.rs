//! Recursive normalization over JSON values.
//!
//! A [`ValueVisitor`] is walked over every node of a `serde_json::Value`
//! tree. Imports run [`NormalizeText`] before deserializing so that stored
//! text is stable regardless of the platform that produced the file.

use serde_json::{Map, Value};

/// Visitor over the tagged JSON value type. Every hook defaults to a no-op.
pub trait ValueVisitor {
    fn visit_string(&mut self, _value: &mut String) {}

    fn visit_number(&mut self, _value: &mut serde_json::Number) {}

    fn visit_bool(&mut self, _value: &mut bool) {}

    /// Called before the children of an object are visited.
    fn visit_object(&mut self, _value: &mut Map<String, Value>) {}

    /// Called before the items of an array are visited.
    fn visit_array(&mut self, _value: &mut Vec<Value>) {}
}

/// Walk `value` depth-first, applying `visitor` to every node.
pub fn walk_mut<V: ValueVisitor + ?Sized>(value: &mut Value, visitor: &mut V) {
    match value {
        Value::Null => {}
        Value::Bool(flag) => visitor.visit_bool(flag),
        Value::Number(number) => visitor.visit_number(number),
        Value::String(text) => visitor.visit_string(text),
        Value::Array(items) => {
            visitor.visit_array(items);
            for item in items.iter_mut() {
                walk_mut(item, visitor);
            }
        }
        Value::Object(map) => {
            visitor.visit_object(map);
            for (_, item) in map.iter_mut() {
                walk_mut(item, visitor);
            }
        }
    }
}

/// Converts CRLF/CR line endings to LF and strips byte-order marks and NULs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NormalizeText;

impl ValueVisitor for NormalizeText {
    fn visit_string(&mut self, value: &mut String) {
        if !value.contains(['\r', '\u{feff}', '\0']) {
            return;
        }
        let normalized = value
            .replace("\r\n", "\n")
            .replace('\r', "\n")
            .replace(['\u{feff}', '\0'], "");
        *value = normalized;
    }
}

/// Drops object keys whose value is `null`, so serde defaults apply.
#[derive(Debug, Default, Clone, Copy)]
pub struct DropNulls;

impl ValueVisitor for DropNulls {
    fn visit_object(&mut self, value: &mut Map<String, Value>) {
        value.retain(|_, item| !item.is_null());
    }
}
