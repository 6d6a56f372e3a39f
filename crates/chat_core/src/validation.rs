//! Explicit validation for every entity that crosses into the engine.
//!
//! External input (imported lorebook JSON, stored snapshots, presets) is
//! deserialized into typed structs and then checked with [`Validate`], which
//! reports every structural problem at once instead of stopping at the first.

use std::fmt;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::normalize::{walk_mut, DropNulls, NormalizeText};

/// A single structural problem, located by a JSON-pointer-like path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Every problem found while validating one value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("validation failed with {} error(s): {}", .errors.len(), render(.errors))]
pub struct ValidationErrors {
    pub errors: Vec<ValidationError>,
}

fn render(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            errors: vec![ValidationError::new(path, message)],
        }
    }

    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError::new(path, message));
    }

    /// Merge errors from a nested value, prefixing their paths.
    pub fn extend_nested(&mut self, prefix: &str, nested: ValidationErrors) {
        for error in nested.errors {
            let path = if error.path.is_empty() {
                prefix.to_string()
            } else {
                format!("{prefix}.{}", error.path)
            };
            self.errors.push(ValidationError::new(path, error.message));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

/// Structural checks for an entity.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationErrors>;
}

/// Normalize, deserialize and validate an external JSON value.
pub fn parse_validated<T>(mut value: serde_json::Value) -> Result<T, ValidationErrors>
where
    T: DeserializeOwned + Validate,
{
    walk_mut(&mut value, &mut DropNulls);
    walk_mut(&mut value, &mut NormalizeText);
    let parsed: T = serde_json::from_value(value)
        .map_err(|error| ValidationErrors::single("", error.to_string()))?;
    parsed.validate()?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_errors_are_prefixed() {
        let mut inner = ValidationErrors::new();
        inner.push("keys", "must not be empty");
        inner.push("", "entry is broken");

        let mut outer = ValidationErrors::new();
        outer.extend_nested("entries[3]", inner);

        assert_eq!(outer.errors[0].path, "entries[3].keys");
        assert_eq!(outer.errors[1].path, "entries[3]");
    }

    #[test]
    fn display_lists_every_error() {
        let mut errors = ValidationErrors::new();
        errors.push("a", "bad");
        errors.push("b", "worse");

        let rendered = errors.to_string();
        assert!(rendered.contains("2 error(s)"));
        assert!(rendered.contains("a: bad"));
        assert!(rendered.contains("b: worse"));
    }
}
