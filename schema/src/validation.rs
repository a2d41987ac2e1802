//! Field-level validation for incoming payloads.
//!
//! Errors are collected rather than short-circuited so a client sees every
//! bad field in one response. Each error carries the JSON path of the
//! offending field.

use serde::{de::DeserializeOwned, Serialize};
use serde_path_to_error::Segment;
use std::fmt;
use unicode_segmentation::UnicodeSegmentation;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_URL_LEN: usize = 2048;
pub const MAX_TEXT_LEN: usize = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub path: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        let path = if field.is_empty() {
            Vec::new()
        } else {
            vec![field.to_string()]
        };
        self.0.push(FieldError {
            path,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    /// True if some error points at `field`.
    pub fn mentions(&self, field: &str) -> bool {
        self.0
            .iter()
            .any(|e| e.path.first().map(String::as_str) == Some(field))
    }

    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Translate a deserialization failure into field errors. `path` is
    /// where the failure happened; missing and unknown fields are reported
    /// one level below it.
    pub fn from_serde_at(mut path: Vec<String>, err: &serde_json::Error) -> Self {
        let full = err.to_string();
        let message = match full.rfind(" at line ") {
            Some(idx) => &full[..idx],
            None => full.as_str(),
        };

        let (field, message) = if let Some(field) = backticked(message, "missing field ") {
            (Some(field), "Required")
        } else if let Some(field) = backticked(message, "unknown field ") {
            (Some(field), "Unrecognized field")
        } else {
            (None, message)
        };
        path.extend(field.map(str::to_string));

        Self(vec![FieldError {
            path,
            message: message.to_string(),
        }])
    }

    pub fn from_serde(err: &serde_json::Error) -> Self {
        Self::from_serde_at(Vec::new(), err)
    }
}

/// Deserialize a JSON body, reporting a failure against the field that
/// caused it.
pub fn from_json_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ValidationErrors> {
    let mut de = serde_json::Deserializer::from_slice(bytes);
    let value = serde_path_to_error::deserialize(&mut de).map_err(|err| {
        let path = err.path().iter().filter_map(segment_name).collect();
        ValidationErrors::from_serde_at(path, err.inner())
    })?;
    de.end().map_err(|err| ValidationErrors::from_serde(&err))?;
    Ok(value)
}

fn segment_name(segment: &Segment) -> Option<String> {
    match segment {
        Segment::Map { key } => Some(key.clone()),
        Segment::Seq { index } => Some(index.to_string()),
        _ => None,
    }
}

fn backticked<'a>(message: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = message.strip_prefix(prefix)?.strip_prefix('`')?;
    let end = rest.find('`')?;
    Some(&rest[..end])
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| {
                if e.path.is_empty() {
                    e.message.clone()
                } else {
                    format!("{}: {}", e.path.join("."), e.message)
                }
            })
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Implemented by every insert payload.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationErrors>;
}

fn grapheme_len(value: &str) -> usize {
    value.graphemes(true).count()
}

pub(crate) fn required_text(errors: &mut ValidationErrors, field: &str, value: &str, max: usize) {
    if value.trim().is_empty() {
        errors.add(field, "Required");
    } else if grapheme_len(value) > max {
        errors.add(field, format!("Must be at most {} characters", max));
    }
}

pub(crate) fn optional_text(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<&str>,
    max: usize,
) {
    if let Some(value) = value {
        if grapheme_len(value) > max {
            errors.add(field, format!("Must be at most {} characters", max));
        }
    }
}

pub(crate) fn non_negative(errors: &mut ValidationErrors, field: &str, value: Option<i32>) {
    if let Some(value) = value {
        if value < 0 {
            errors.add(field, "Must be greater than or equal to 0");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    #[allow(dead_code)]
    struct Payload {
        name: String,
        count: Option<i32>,
    }

    #[test]
    fn missing_field_is_reported_by_name() {
        let err = serde_json::from_str::<Payload>("{}").unwrap_err();
        let errors = ValidationErrors::from_serde(&err);
        assert!(errors.mentions("name"));
        assert_eq!(errors.errors()[0].message, "Required");
    }

    #[test]
    fn type_mismatch_is_reported_against_body() {
        let err = serde_json::from_str::<Payload>(r#"{"name": 5}"#).unwrap_err();
        let errors = ValidationErrors::from_serde(&err);
        assert_eq!(errors.errors().len(), 1);
        assert!(errors.errors()[0].path.is_empty());
        assert!(!errors.errors()[0].message.contains("line"));
    }

    #[test]
    fn type_mismatch_names_the_field() {
        let errors = from_json_slice::<Payload>(br#"{"name": "ok", "count": "x"}"#).unwrap_err();
        assert_eq!(errors.errors().len(), 1);
        assert_eq!(errors.errors()[0].path, vec!["count".to_string()]);
        assert!(errors.errors()[0].message.starts_with("invalid type: string"));
    }

    #[test]
    fn nested_missing_field_carries_its_parent() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Outer {
            items: Vec<Payload>,
        }

        let errors = from_json_slice::<Outer>(br#"{"items": [{"name": "a"}, {}]}"#).unwrap_err();
        assert_eq!(errors.errors()[0].path, vec!["items", "1", "name"]);
        assert_eq!(errors.errors()[0].message, "Required");
    }

    #[test]
    fn trailing_input_is_rejected() {
        let errors = from_json_slice::<Payload>(br#"{"name": "a"} x"#).unwrap_err();
        assert!(errors.errors()[0].path.is_empty());
        assert!(from_json_slice::<Payload>(br#"{"name": "a"}"#).is_ok());
    }

    #[test]
    fn length_counts_graphemes_not_bytes() {
        let mut errors = ValidationErrors::new();
        // each flag is one grapheme but eight bytes
        let flags = "🇮🇹".repeat(10);
        required_text(&mut errors, "title", &flags, 10);
        assert!(errors.is_empty());

        required_text(&mut errors, "title", &flags, 9);
        assert!(errors.mentions("title"));
    }

    #[test]
    fn blank_required_text_is_rejected() {
        let mut errors = ValidationErrors::new();
        required_text(&mut errors, "name", "   ", MAX_NAME_LEN);
        non_negative(&mut errors, "duration", Some(-1));
        assert_eq!(errors.errors().len(), 2);
        assert!(errors.mentions("name"));
        assert!(errors.mentions("duration"));
    }
}
